//! HTTP CONNECT tunneling through a forward proxy.

use axum::http::HeaderValue;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ConnectionError, ConnectionErrorKind};

const MAX_RESPONSE_HEAD: usize = 8 * 1024;

/// Ask the proxy on `stream` to open a tunnel to `authority` (host:port).
/// On success the stream carries raw bytes to the target.
pub async fn establish_tunnel<S>(
    stream: &mut S,
    authority: &str,
    authorization: Option<&HeaderValue>,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut head = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n").into_bytes();
    if let Some(value) = authorization {
        head.extend_from_slice(b"Proxy-Authorization: ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    head.extend_from_slice(b"\r\n");
    stream.write_all(&head).await?;
    stream.flush().await?;

    let mut buf = Vec::with_capacity(512);
    let mut chunk = [0u8; 512];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(ConnectionError::new(
                ConnectionErrorKind::Proxy,
                "proxy closed the connection during CONNECT",
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if buf.len() > MAX_RESPONSE_HEAD {
            return Err(ConnectionError::new(
                ConnectionErrorKind::Proxy,
                "proxy CONNECT response head too large",
            ));
        }
    }

    let status = parse_status(&buf)?;
    match status {
        200..=299 => Ok(()),
        407 => Err(ConnectionError::new(
            ConnectionErrorKind::ProxyAuthentication,
            "proxy answered 407 Proxy Authentication Required",
        )),
        other => Err(ConnectionError::new(
            ConnectionErrorKind::Proxy,
            format!("proxy refused tunnel to {authority} with status {other}"),
        )),
    }
}

fn parse_status(head: &[u8]) -> Result<u16, ConnectionError> {
    let line_end = head.iter().position(|&b| b == b'\r').unwrap_or(head.len());
    let line = String::from_utf8_lossy(&head[..line_end]);
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next().and_then(|s| s.parse::<u16>().ok())) {
        (Some(version), Some(status)) if version.starts_with("HTTP/1.") => Ok(status),
        _ => Err(ConnectionError::new(
            ConnectionErrorKind::Proxy,
            format!("malformed CONNECT response: {line}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    async fn run_proxy(answer: &'static [u8]) -> (Result<(), ConnectionError>, String) {
        let (mut client, mut proxy) = duplex(4096);
        let server = tokio::spawn(async move {
            let mut buf = vec![0u8; 1024];
            let n = proxy.read(&mut buf).await.unwrap();
            proxy.write_all(answer).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });
        let auth = HeaderValue::from_static("Basic aGVsbG86d29ybGQ=");
        let result = establish_tunnel(&mut client, "10.0.0.1:9243", Some(&auth)).await;
        (result, server.await.unwrap())
    }

    #[tokio::test]
    async fn test_tunnel_established() {
        let (result, request) = run_proxy(b"HTTP/1.1 200 Connection established\r\n\r\n").await;
        assert!(result.is_ok());
        assert!(request.starts_with("CONNECT 10.0.0.1:9243 HTTP/1.1\r\n"));
        assert!(request.contains("Proxy-Authorization: Basic aGVsbG86d29ybGQ=\r\n"));
    }

    #[tokio::test]
    async fn test_tunnel_auth_rejected() {
        let (result, _) = run_proxy(b"HTTP/1.1 407 Proxy Authentication Required\r\nContent-Length: 0\r\n\r\n").await;
        assert_eq!(result.unwrap_err().kind, ConnectionErrorKind::ProxyAuthentication);
    }

    #[tokio::test]
    async fn test_tunnel_refused() {
        let (result, _) = run_proxy(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await;
        assert_eq!(result.unwrap_err().kind, ConnectionErrorKind::Proxy);
    }

    #[tokio::test]
    async fn test_proxy_hangs_up() {
        let (mut client, proxy) = duplex(1024);
        drop(proxy);
        let err = establish_tunnel(&mut client, "10.0.0.1:9243", None).await.unwrap_err();
        assert_ne!(err.kind, ConnectionErrorKind::ProxyAuthentication);
    }

    #[test]
    fn test_malformed_status_line() {
        assert!(parse_status(b"garbage\r\n\r\n").is_err());
        assert_eq!(parse_status(b"HTTP/1.0 200 OK\r\n\r\n").unwrap(), 200);
    }
}
