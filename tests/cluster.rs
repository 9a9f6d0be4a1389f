//! End-to-end runs of the fuzz404 binary: primary plus worker processes

mod common;

use std::net::TcpListener;
use std::process::Stdio;
use std::time::{Duration, Instant};

use common::{fuzz404, wordlist, PathServer};

fn empty_config(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("config.toml");
    std::fs::write(&path, "").unwrap();
    path
}

#[test]
fn test_two_workers_write_consolidated_output() {
    let dir = tempfile::tempdir().unwrap();
    let server = PathServer::start(&["/admin", "/login"]);
    let words = wordlist(dir.path(), &["admin", "login", "xyz", "", "backup", "secret"]);
    let out = dir.path().join("results.jsonl");

    let status = fuzz404()
        .env("FUZZ404_CONFIG", empty_config(dir.path()))
        .arg(server.url("/FUZZ"))
        .arg("-w")
        .arg(&words)
        .args(["-c", "2", "--json", "-m", "200", "-t", "4"])
        .arg("-o")
        .arg(&out)
        .stdout(Stdio::null())
        .status()
        .unwrap();
    assert!(status.success());

    // Every non-empty word was requested exactly once across both shards
    let mut paths = server.paths();
    paths.sort();
    assert_eq!(paths, vec!["/admin", "/backup", "/login", "/secret", "/xyz"]);

    let text = std::fs::read_to_string(&out).unwrap();
    let mut found: Vec<serde_json::Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    found.sort_by_key(|v| v["fuzz"].as_str().unwrap_or_default().to_string());

    assert_eq!(found.len(), 2);
    assert_eq!(found[0]["fuzz"], "admin");
    assert_eq!(found[0]["status"], 200);
    assert_eq!(found[0]["url"], server.url("/admin"));
    assert_eq!(found[1]["fuzz"], "login");
    assert!(found[1]["timeMs"].is_number());
}

#[test]
fn test_missing_placeholder_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let words = wordlist(dir.path(), &["a"]);

    let output = fuzz404()
        .env("FUZZ404_CONFIG", empty_config(dir.path()))
        .args(["http://127.0.0.1:9/static", "-w"])
        .arg(&words)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error: No FUZZ keyword found"));
    assert!(stderr.contains("hint:"));
}

#[test]
fn test_missing_wordlist_is_fatal() {
    let dir = tempfile::tempdir().unwrap();

    let output = fuzz404()
        .env("FUZZ404_CONFIG", empty_config(dir.path()))
        .args(["http://127.0.0.1:9/FUZZ", "-w"])
        .arg(dir.path().join("nope.txt"))
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("error:"));
}

/// Pids of live processes whose environment carries `marker`
#[cfg(target_os = "linux")]
fn processes_marked(marker: &str) -> Vec<u32> {
    let needle = marker.as_bytes();
    let mut pids = Vec::new();
    for entry in std::fs::read_dir("/proc").unwrap().flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
            continue;
        };
        // Exited processes and zombies have no readable environment
        let Ok(environ) = std::fs::read(entry.path().join("environ")) else {
            continue;
        };
        if environ.split(|b| *b == 0).any(|var| var == needle) {
            pids.push(pid);
        }
    }
    pids
}

#[cfg(unix)]
#[test]
fn test_interrupt_stops_workers_and_exits_cleanly() {
    use std::io::Read;

    let dir = tempfile::tempdir().unwrap();
    // Connections queue in the backlog and never get an answer
    let silent = TcpListener::bind("127.0.0.1:0").unwrap();
    let target = format!("http://{}/FUZZ", silent.local_addr().unwrap());
    let many: Vec<String> = (0..5000).map(|i| format!("w{}", i)).collect();
    let words = wordlist(
        dir.path(),
        &many.iter().map(String::as_str).collect::<Vec<_>>(),
    );
    // Inherited by the workers, so they can be found after the primary exits
    let marker = format!(
        "FUZZ404_TEST_RUN={}-{}",
        std::process::id(),
        silent.local_addr().unwrap().port()
    );
    let (marker_key, marker_value) = marker.split_once('=').unwrap();

    let mut child = fuzz404()
        .env("FUZZ404_CONFIG", empty_config(dir.path()))
        .env(marker_key, marker_value)
        .arg(&target)
        .arg("-w")
        .arg(&words)
        .args(["-c", "2", "-t", "8"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    std::thread::sleep(Duration::from_millis(1500));
    #[cfg(target_os = "linux")]
    assert!(
        processes_marked(&marker).len() >= 2,
        "primary and workers should be running"
    );

    // SAFETY: plain syscall on a child we own
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGINT);
    }

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break status;
        }
        if started.elapsed() > Duration::from_secs(10) {
            let _ = child.kill();
            panic!("primary did not exit after SIGINT");
        }
        std::thread::sleep(Duration::from_millis(50));
    };
    assert_eq!(status.code(), Some(0));

    #[cfg(target_os = "linux")]
    {
        let deadline = Instant::now() + Duration::from_secs(1);
        let mut survivors = processes_marked(&marker);
        while !survivors.is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(50));
            survivors = processes_marked(&marker);
        }
        assert!(survivors.is_empty(), "workers still running: {:?}", survivors);
    }

    // Every connection a worker opened must be closed by now
    silent.set_nonblocking(true).unwrap();
    let mut pending = Vec::new();
    while let Ok((stream, _)) = silent.accept() {
        pending.push(stream);
    }
    assert!(!pending.is_empty(), "workers never reached the target");

    for mut stream in pending {
        stream.set_nonblocking(false).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => break,
                Err(e) => panic!("connection left open by a surviving worker: {}", e),
            }
        }
    }
}
