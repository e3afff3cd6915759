use std::net::Ipv4Addr;
use thiserror::Error;
use tokio::{io::AsyncWriteExt, net::TcpStream};
use tracing::debug;

#[derive(Debug, Error)]
pub enum DialError {
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        source: std::io::Error,
    },
    #[error("destination closed without sending any data")]
    ZeroBytesReceived,
}

/// Rewrites a dotted-quad IP literal to a wildcard-DNS hostname
/// (`www.<ip>.<suffix>`), routing literal IPs through a hostname-based
/// path. Non-literal addresses pass through unchanged.
#[must_use]
pub fn rewrite_ip_literal(address: &str, suffix: Option<&str>) -> String {
    match suffix {
        Some(suffix) if address.parse::<Ipv4Addr>().is_ok() => {
            format!("www.{address}.{suffix}")
        }
        _ => address.to_string(),
    }
}

/// Connects to `(address, port)` and writes the client's first payload
/// chunk immediately, which for TLS destinations is usually the client
/// hello.
pub async fn connect_and_write(
    address: &str,
    port: u16,
    first_payload: &[u8],
) -> Result<TcpStream, DialError> {
    let mut stream =
        TcpStream::connect((address, port))
            .await
            .map_err(|source| DialError::ConnectFailed {
                addr: format!("{address}:{port}"),
                source,
            })?;
    debug!(target_addr = %format!("{address}:{port}"), "Connected to destination");

    if !first_payload.is_empty() {
        stream
            .write_all(first_payload)
            .await
            .map_err(|source| DialError::ConnectFailed {
                addr: format!("{address}:{port}"),
                source,
            })?;
    }
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::{io::AsyncReadExt, net::TcpListener};

    #[test]
    fn rewrites_only_dotted_quads() {
        assert_eq!(
            rewrite_ip_literal("1.2.3.4", Some("sslip.io")),
            "www.1.2.3.4.sslip.io"
        );
        assert_eq!(
            rewrite_ip_literal("example.com", Some("sslip.io")),
            "example.com"
        );
        assert_eq!(rewrite_ip_literal("1.2.3.4", None), "1.2.3.4");
        assert_eq!(
            rewrite_ip_literal("300.1.1.1", Some("sslip.io")),
            "300.1.1.1"
        );
    }

    #[tokio::test]
    async fn writes_first_payload_on_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let accept = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 5];
            stream.read_exact(&mut buf).await.unwrap();
            buf
        });

        connect_and_write("127.0.0.1", port, b"hello")
            .await
            .unwrap();
        assert_eq!(accept.await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn connect_failure_reports_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect_and_write("127.0.0.1", port, b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, DialError::ConnectFailed { .. }));
        assert!(err.to_string().contains(&port.to_string()));
    }
}
