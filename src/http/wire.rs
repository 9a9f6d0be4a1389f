//! HTTP/1.1 wire format
//!
//! Requests are written byte for byte from the substituted request: the
//! request target is never parsed or normalized, so `..`, `#` and friends
//! reach the server exactly as the word produced them. Responses are read
//! with just enough framing to find the end of the body.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use super::request::{Endpoint, FuzzedRequest};
use crate::error::{FuzzError, Result};

/// Upper bound for a status line plus headers
pub const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Upper bound for one chunk-size or trailer line
const MAX_CHUNK_LINE: usize = 4096;

/// RFC 9110 token: methods and header names
pub fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'!' | b'#'
                        | b'$'
                        | b'%'
                        | b'&'
                        | b'\''
                        | b'*'
                        | b'+'
                        | b'-'
                        | b'.'
                        | b'^'
                        | b'_'
                        | b'`'
                        | b'|'
                        | b'~'
                )
        })
}

/// Header values may hold anything but control characters other than tab
pub fn is_valid_header_value(s: &str) -> bool {
    s.bytes().all(|b| b == b'\t' || (b >= 0x20 && b != 0x7f))
}

/// Request targets are sent raw; only bytes that would break the request
/// line are refused
fn is_valid_target(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b > 0x20 && b != 0x7f)
}

/// Serialize `request` into a complete HTTP/1.1 message
///
/// `Host` is added unless the caller supplied one, `Content-Length` when
/// there is a body and none was given. A word that makes the message
/// unsendable fails only this request.
pub fn encode_request(request: &FuzzedRequest, endpoint: &Endpoint) -> Result<Vec<u8>> {
    if !is_valid_target(&request.path) {
        return Err(FuzzError::Http(format!(
            "request target contains unescaped characters: {:?}",
            request.path
        )));
    }

    let mut head = format!("{} {} HTTP/1.1\r\n", request.method, request.path);

    let has = |name: &str| request.headers.keys().any(|k| k.eq_ignore_ascii_case(name));
    if !has("host") {
        head.push_str(&format!("Host: {}\r\n", endpoint.host_header()));
    }
    for (key, value) in &request.headers {
        if !is_token(key) {
            return Err(FuzzError::Http(format!("invalid header name: {:?}", key)));
        }
        if !is_valid_header_value(value) {
            return Err(FuzzError::Http(format!("invalid value for header {}", key)));
        }
        head.push_str(&format!("{}: {}\r\n", key, value));
    }
    if let Some(body) = &request.body {
        if !has("content-length") {
            head.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
    }
    head.push_str("\r\n");

    let mut message = head.into_bytes();
    if let Some(body) = &request.body {
        message.extend_from_slice(body.as_bytes());
    }
    Ok(message)
}

/// Status line and headers of a response
#[derive(Debug, Clone)]
pub struct ResponseHead {
    /// `major.minor` from the status line
    pub version: String,
    pub status: u16,
    /// Reason phrase exactly as sent
    pub reason: String,
    /// Headers in arrival order, names as sent
    pub headers: Vec<(String, String)>,
    /// Sum of header name and value bytes
    pub header_bytes: usize,
}

/// How the end of a response body is found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Empty,
    Chunked,
    Length(u64),
    UntilClose,
}

impl ResponseHead {
    /// Values of every header called `name`
    fn values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Comma separated tokens of every header called `name`, lowercased
    fn tokens(&self, name: &str) -> Vec<String> {
        self.values(name)
            .flat_map(|v| v.split(','))
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect()
    }

    pub fn framing(&self, method: &str) -> io::Result<BodyFraming> {
        if method.eq_ignore_ascii_case("HEAD")
            || matches!(self.status, 100..=199 | 204 | 304)
        {
            return Ok(BodyFraming::Empty);
        }

        let codings = self.tokens("transfer-encoding");
        if let Some(last) = codings.last() {
            return Ok(if last == "chunked" {
                BodyFraming::Chunked
            } else {
                BodyFraming::UntilClose
            });
        }

        let mut length = None;
        for value in self.values("content-length").flat_map(|v| v.split(',')) {
            let parsed = value
                .trim()
                .parse::<u64>()
                .map_err(|_| invalid(format!("invalid content-length: {:?}", value)))?;
            if length.is_some_and(|l| l != parsed) {
                return Err(invalid("conflicting content-length headers"));
            }
            length = Some(parsed);
        }

        Ok(match length {
            Some(0) => BodyFraming::Empty,
            Some(n) => BodyFraming::Length(n),
            None => BodyFraming::UntilClose,
        })
    }

    /// Whether the server is willing to take another request on this
    /// connection
    pub fn keep_alive(&self) -> bool {
        let connection = self.tokens("connection");
        if connection.iter().any(|t| t == "close") || self.status == 101 {
            return false;
        }
        if self.version == "1.0" {
            return connection.iter().any(|t| t == "keep-alive");
        }
        true
    }
}

/// Buffered body of a response
#[derive(Debug, Clone, Default)]
pub struct ResponseBody {
    pub bytes: Vec<u8>,
    /// The cap cut the body short
    pub truncated: bool,
    /// The body was read to its framed end and the stream is positioned at
    /// the next response
    pub complete: bool,
}

fn invalid(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

fn trim_line(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Read one `\n` terminated line, charging it against `budget`
///
/// Returns 0 at a clean end of stream.
async fn read_line<R>(reader: &mut R, budget: &mut usize, line: &mut Vec<u8>) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let n = (&mut *reader)
        .take(*budget as u64)
        .read_until(b'\n', line)
        .await?;
    if n > 0 && !line.ends_with(b"\n") {
        return Err(if n == *budget {
            invalid("response head too large")
        } else {
            io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed mid line")
        });
    }
    *budget -= n;
    Ok(n)
}

fn parse_status_line(line: &[u8]) -> io::Result<(String, u16, String)> {
    let text = std::str::from_utf8(line).map_err(|_| invalid("status line is not UTF-8"))?;
    let (version, rest) = text
        .split_once(' ')
        .ok_or_else(|| invalid(format!("malformed status line: {:?}", text)))?;
    let version = version
        .strip_prefix("HTTP/")
        .ok_or_else(|| invalid(format!("malformed status line: {:?}", text)))?;
    let (code, reason) = rest.split_once(' ').unwrap_or((rest, ""));
    let status = code
        .parse::<u16>()
        .ok()
        .filter(|s| (100..=999).contains(s))
        .ok_or_else(|| invalid(format!("invalid status code: {:?}", code)))?;
    Ok((version.to_string(), status, reason.trim().to_string()))
}

/// Read the next final response head, skipping interim `1xx` responses
///
/// `None` means the peer closed the connection before sending anything.
pub async fn read_head<R>(reader: &mut R) -> io::Result<Option<ResponseHead>>
where
    R: AsyncBufRead + Unpin,
{
    let mut budget = MAX_HEAD_BYTES;
    let mut line = Vec::new();
    let mut received = false;

    loop {
        if read_line(reader, &mut budget, &mut line).await? == 0 {
            if received {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before the response head ended",
                ));
            }
            return Ok(None);
        }
        received = true;
        let status_line = trim_line(&line);
        if status_line.is_empty() {
            continue;
        }
        let (version, status, reason) = parse_status_line(status_line)?;

        let mut headers = Vec::new();
        let mut header_bytes = 0;
        loop {
            if read_line(reader, &mut budget, &mut line).await? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before the response head ended",
                ));
            }
            let header = trim_line(&line);
            if header.is_empty() {
                break;
            }
            let colon = header
                .iter()
                .position(|&b| b == b':')
                .ok_or_else(|| invalid("malformed header line"))?;
            let name = String::from_utf8_lossy(&header[..colon]).trim().to_string();
            let value = String::from_utf8_lossy(&header[colon + 1..]).trim().to_string();
            header_bytes += name.len() + value.len();
            headers.push((name, value));
        }

        if (100..200).contains(&status) && status != 101 {
            continue;
        }

        return Ok(Some(ResponseHead {
            version,
            status,
            reason,
            headers,
            header_bytes,
        }));
    }
}

/// Read a body, keeping at most `max` bytes
///
/// Stops reading as soon as the cap is hit; the rest stays on the wire and
/// the connection must not be reused.
pub async fn read_body<R>(reader: &mut R, framing: BodyFraming, max: usize) -> io::Result<ResponseBody>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = ResponseBody::default();

    match framing {
        BodyFraming::Empty => body.complete = true,
        BodyFraming::Length(length) => {
            let keep = length.min(max as u64) as usize;
            body.bytes = vec![0; keep];
            reader.read_exact(&mut body.bytes).await?;
            body.truncated = (keep as u64) < length;
            body.complete = !body.truncated;
        }
        BodyFraming::Chunked => {
            let mut line = Vec::new();
            loop {
                let mut budget = MAX_CHUNK_LINE;
                if read_line(reader, &mut budget, &mut line).await? == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed mid chunked body",
                    ));
                }
                let size_text = String::from_utf8_lossy(trim_line(&line));
                let size_text = size_text.split(';').next().unwrap_or_default().trim();
                let size = u64::from_str_radix(size_text, 16)
                    .map_err(|_| invalid(format!("invalid chunk size: {:?}", size_text)))?;

                if size == 0 {
                    // Trailers end with an empty line
                    loop {
                        let mut budget = MAX_CHUNK_LINE;
                        if read_line(reader, &mut budget, &mut line).await? == 0
                            || trim_line(&line).is_empty()
                        {
                            break;
                        }
                    }
                    body.complete = true;
                    break;
                }

                let room = (max - body.bytes.len()) as u64;
                let keep = size.min(room) as usize;
                let start = body.bytes.len();
                body.bytes.resize(start + keep, 0);
                reader.read_exact(&mut body.bytes[start..]).await?;
                if (keep as u64) < size {
                    body.truncated = true;
                    break;
                }

                let mut budget = MAX_CHUNK_LINE;
                read_line(reader, &mut budget, &mut line).await?;
                if !trim_line(&line).is_empty() {
                    return Err(invalid("missing CRLF after chunk"));
                }
            }
        }
        BodyFraming::UntilClose => {
            (&mut *reader)
                .take(max as u64)
                .read_to_end(&mut body.bytes)
                .await?;
            if body.bytes.len() == max {
                body.truncated = !reader.fill_buf().await?.is_empty();
            }
        }
    }

    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::Protocol;
    use tokio::io::BufReader;

    fn endpoint() -> Endpoint {
        Endpoint {
            protocol: Protocol::Http,
            hostname: "example.com".into(),
            port: Some(8080),
        }
    }

    fn request(path: &str) -> FuzzedRequest {
        FuzzedRequest {
            method: "GET".into(),
            url: format!("http://example.com:8080{}", path),
            path: path.into(),
            headers: Default::default(),
            body: None,
        }
    }

    async fn head_of(raw: &str) -> io::Result<Option<ResponseHead>> {
        let mut reader = BufReader::new(raw.as_bytes());
        read_head(&mut reader).await
    }

    #[test]
    fn test_tokens() {
        assert!(is_token("GET"));
        assert!(is_token("X-Custom_Header.1"));
        assert!(!is_token(""));
        assert!(!is_token("bad name"));
        assert!(!is_token("a:b"));
        assert!(is_valid_header_value("Bearer abc\tdef"));
        assert!(!is_valid_header_value("a\r\nInjected: 1"));
    }

    #[test]
    fn test_encode_keeps_target_verbatim() {
        let message = encode_request(&request("/app/../../etc/passwd#x"), &endpoint()).unwrap();
        let text = String::from_utf8(message).unwrap();
        assert!(text.starts_with("GET /app/../../etc/passwd#x HTTP/1.1\r\n"), "{}", text);
        assert!(text.contains("Host: example.com:8080\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_encode_headers_in_order_with_body() {
        let mut req = request("/login");
        req.method = "POST".into();
        req.headers.insert("Zeta".into(), "1".into());
        req.headers.insert("host".into(), "vhost.local".into());
        req.headers.insert("Alpha".into(), "2".into());
        req.body = Some("a=b".into());

        let text = String::from_utf8(encode_request(&req, &endpoint()).unwrap()).unwrap();
        assert_eq!(
            text,
            "POST /login HTTP/1.1\r\nZeta: 1\r\nhost: vhost.local\r\nAlpha: 2\r\nContent-Length: 3\r\n\r\na=b"
        );
    }

    #[test]
    fn test_encode_rejects_unsendable_words() {
        let err = encode_request(&request("/a b"), &endpoint()).unwrap_err();
        assert!(!err.is_fatal());

        let mut req = request("/");
        req.headers.insert("X-Id".into(), "1\r\nInjected: yes".into());
        assert!(!encode_request(&req, &endpoint()).unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn test_read_head_skips_interim_responses() {
        let head = head_of(
            "HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 404 Nope Nope\r\nContent-Length: 0\r\nX-A:  b \r\n\r\n",
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(head.status, 404);
        assert_eq!(head.reason, "Nope Nope");
        assert_eq!(head.version, "1.1");
        assert_eq!(head.headers[1], ("X-A".to_string(), "b".to_string()));
        assert_eq!(head.header_bytes, "Content-Length".len() + 1 + "X-A".len() + 1);
    }

    #[tokio::test]
    async fn test_read_head_eof() {
        assert!(head_of("").await.unwrap().is_none());
        assert!(head_of("HTTP/1.1 200 OK\r\nServer: x").await.is_err());
        assert!(head_of("garbage\r\n\r\n").await.is_err());
    }

    #[tokio::test]
    async fn test_framing_and_keep_alive() {
        let head = head_of("HTTP/1.1 200 OK\r\nTransfer-Encoding: gzip, chunked\r\n\r\n")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(head.framing("GET").unwrap(), BodyFraming::Chunked);
        assert_eq!(head.framing("HEAD").unwrap(), BodyFraming::Empty);
        assert!(head.keep_alive());

        let head = head_of("HTTP/1.0 200 OK\r\nContent-Length: 5\r\n\r\n")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(head.framing("GET").unwrap(), BodyFraming::Length(5));
        assert!(!head.keep_alive());

        let head = head_of("HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(head.framing("GET").unwrap(), BodyFraming::UntilClose);
        assert!(!head.keep_alive());

        let head = head_of("HTTP/1.1 200 OK\r\nContent-Length: 1\r\nContent-Length: 2\r\n\r\n")
            .await
            .unwrap()
            .unwrap();
        assert!(head.framing("GET").is_err());
    }

    #[tokio::test]
    async fn test_read_chunked_body() {
        let raw = "4\r\nWiki\r\n6;ext=1\r\npedia \r\n0\r\nTrailer: x\r\n\r\nNEXT";
        let mut reader = BufReader::new(raw.as_bytes());
        let body = read_body(&mut reader, BodyFraming::Chunked, 1024).await.unwrap();
        assert_eq!(body.bytes, b"Wikipedia ");
        assert!(body.complete);
        assert!(!body.truncated);

        let mut rest = String::new();
        reader.read_to_string(&mut rest).await.unwrap();
        assert_eq!(rest, "NEXT");
    }

    #[tokio::test]
    async fn test_read_body_caps() {
        let mut reader = BufReader::new(&b"abcdefgh"[..]);
        let body = read_body(&mut reader, BodyFraming::Length(8), 3).await.unwrap();
        assert_eq!(body.bytes, b"abc");
        assert!(body.truncated);
        assert!(!body.complete);

        let mut reader = BufReader::new(&b"5\r\nhello\r\n5\r\nworld\r\n0\r\n\r\n"[..]);
        let body = read_body(&mut reader, BodyFraming::Chunked, 7).await.unwrap();
        assert_eq!(body.bytes, b"hellowo");
        assert!(body.truncated);

        let mut reader = BufReader::new(&b"until close"[..]);
        let body = read_body(&mut reader, BodyFraming::UntilClose, 5).await.unwrap();
        assert_eq!(body.bytes, b"until");
        assert!(body.truncated);
        assert!(!body.complete);

        let mut reader = BufReader::new(&b"short"[..]);
        let body = read_body(&mut reader, BodyFraming::Length(10), 100).await;
        assert!(body.is_err());
    }
}
