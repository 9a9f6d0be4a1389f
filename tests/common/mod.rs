//! Shared helpers for the binary tests

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

/// Blocking HTTP/1.1 server answering by path
///
/// Each listed path answers `200` with the path as body, everything else
/// answers `404`. Requests are recorded in arrival order.
pub struct PathServer {
    pub addr: SocketAddr,
    seen: Arc<Mutex<Vec<String>>>,
}

impl PathServer {
    pub fn start(found: &[&str]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let found: Arc<Vec<String>> = Arc::new(found.iter().map(|s| s.to_string()).collect());

        let recorded = seen.clone();
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let recorded = recorded.clone();
                let found = found.clone();
                thread::spawn(move || {
                    let _ = serve(stream, &recorded, &found);
                });
            }
        });

        Self { addr, seen }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn paths(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

fn serve(stream: TcpStream, seen: &Mutex<Vec<String>>, found: &[String]) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;

    loop {
        let mut request_line = String::new();
        if reader.read_line(&mut request_line)? == 0 {
            return Ok(());
        }
        let path = request_line
            .split_whitespace()
            .nth(1)
            .unwrap_or_default()
            .to_string();

        // Skip headers; the fuzzer sends no body for GET
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 || line == "\r\n" {
                break;
            }
        }

        seen.lock().unwrap().push(path.clone());
        let (status, body) = if found.contains(&path) {
            ("200 OK", path)
        } else {
            ("404 Not Found", "not found".to_string())
        };
        write!(
            writer,
            "HTTP/1.1 {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{}",
            status,
            body.len(),
            body
        )?;
        writer.flush()?;
    }
}

/// Write a wordlist into `dir`, one word per line
pub fn wordlist(dir: &Path, words: &[&str]) -> PathBuf {
    let path = dir.join("words.txt");
    std::fs::write(&path, words.join("\n")).unwrap();
    path
}

/// Command for the fuzz404 binary with a clean environment for its role
pub fn fuzz404() -> std::process::Command {
    let mut cmd = std::process::Command::new(env!("CARGO_BIN_EXE_fuzz404"));
    cmd.env_remove("FUZZ404_WORKER_ID")
        .env_remove("FUZZ404_WORKER_COUNT")
        .env_remove("FUZZ404_IPC_ADDR")
        .env("RUST_LOG", "warn");
    cmd
}
