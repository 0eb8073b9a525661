// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Gateway to the on-board block-memory server over TCP.
//!
//! Reads are `"<name> <offset> <length>"` answered by raw bytes; writes are
//! `"write <name> <offset> <length>\n"` plus payload answered by `OK`. Either
//! may be answered by `ERROR` instead.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use dss_core::{DeviceCommError, DeviceGateway, GatewayFuture};

const ERROR_REPLY: &[u8] = b"ERROR";
const OK_REPLY: &[u8] = b"OK";

/// True when `received` is the server's rejection rather than data.
///
/// Reads shorter than the rejection only see its prefix.
pub fn is_error_reply(received: &[u8], requested: usize) -> bool {
    if requested < ERROR_REPLY.len() {
        received.len() == requested && ERROR_REPLY.starts_with(received)
    } else {
        received == ERROR_REPLY
    }
}

pub struct TcpBramGateway {
    addr: String,
    timeout: Duration,
    stream: Option<TcpStream>,
}

impl TcpBramGateway {
    /// Connect once; later failures reconnect lazily on the next request.
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self, DeviceCommError> {
        let mut gateway = Self {
            addr: addr.to_string(),
            timeout,
            stream: None,
        };
        gateway.ensure_connected().await?;
        Ok(gateway)
    }

    async fn ensure_connected(&mut self) -> Result<&mut TcpStream, DeviceCommError> {
        if self.stream.is_none() {
            let stream = time::timeout(self.timeout, TcpStream::connect(&self.addr))
                .await
                .map_err(|_| DeviceCommError::Timeout(self.timeout))??;
            if let Err(e) = stream.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY on {}: {}", self.addr, e);
            }
            info!("Connected to block-memory server at {}", self.addr);
            self.stream = Some(stream);
        }
        self.stream.as_mut().ok_or(DeviceCommError::Disconnected)
    }

    async fn read_inner(
        &mut self,
        name: &str,
        offset: usize,
        length: usize,
    ) -> Result<Vec<u8>, DeviceCommError> {
        let timeout = self.timeout;
        let deadline = Instant::now() + timeout;
        let stream = self.ensure_connected().await?;

        let request = format!("{} {} {}", name, offset, length);
        time::timeout_at(deadline, stream.write_all(request.as_bytes()))
            .await
            .map_err(|_| DeviceCommError::Timeout(timeout))??;

        let mut buf = vec![0u8; length];
        let mut filled = 0;
        while filled < length {
            let n = match time::timeout_at(deadline, stream.read(&mut buf[filled..])).await {
                Ok(res) => res?,
                Err(_) if filled > 0 => {
                    buf.truncate(filled);
                    if is_error_reply(&buf, length) {
                        break;
                    }
                    return Err(DeviceCommError::ShortReply {
                        name: name.to_string(),
                        expected: length,
                        got: filled,
                    });
                }
                Err(_) => return Err(DeviceCommError::Timeout(timeout)),
            };
            if n == 0 {
                return Err(DeviceCommError::Disconnected);
            }
            filled += n;
            // The server sends nothing after a rejection.
            if filled < length && is_error_reply(&buf[..filled], length) {
                break;
            }
        }
        buf.truncate(filled);

        if !is_error_reply(&buf, length) {
            return Ok(buf);
        }
        if length < ERROR_REPLY.len() {
            // The tail of the rejection is still in the socket.
            let mut rest = vec![0u8; ERROR_REPLY.len() - length];
            let drained = time::timeout_at(deadline, stream.read_exact(&mut rest)).await;
            if !matches!(drained, Ok(Ok(_))) || rest != ERROR_REPLY[length..] {
                debug!(
                    "Dropping connection to {}: rejection of {} not drained",
                    self.addr, name
                );
                self.stream = None;
            }
        }
        Err(DeviceCommError::Rejected {
            name: name.to_string(),
        })
    }

    async fn write_inner(
        &mut self,
        name: &str,
        offset: usize,
        data: &[u8],
    ) -> Result<(), DeviceCommError> {
        let timeout = self.timeout;
        let deadline = Instant::now() + timeout;
        let stream = self.ensure_connected().await?;

        let mut request = format!("write {} {} {}\n", name, offset, data.len()).into_bytes();
        request.extend_from_slice(data);
        time::timeout_at(deadline, stream.write_all(&request))
            .await
            .map_err(|_| DeviceCommError::Timeout(timeout))??;

        let mut reply = [0u8; 2];
        time::timeout_at(deadline, stream.read_exact(&mut reply))
            .await
            .map_err(|_| DeviceCommError::Timeout(timeout))?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => DeviceCommError::Disconnected,
                _ => DeviceCommError::Io(e),
            })?;
        if reply == OK_REPLY {
            return Ok(());
        }
        if reply == ERROR_REPLY[..2] {
            // Drain the rest of the rejection so the stream stays aligned.
            let mut rest = [0u8; 3];
            time::timeout_at(deadline, stream.read_exact(&mut rest))
                .await
                .map_err(|_| DeviceCommError::Timeout(timeout))??;
            return Err(DeviceCommError::Rejected {
                name: name.to_string(),
            });
        }
        // Servers without the write extension treat the header as a read.
        Err(DeviceCommError::Unsupported("block-memory writes"))
    }

    /// Any failure leaves the stream in an unknown state; drop it.
    fn settle<T>(&mut self, result: Result<T, DeviceCommError>) -> Result<T, DeviceCommError> {
        match &result {
            Err(DeviceCommError::Rejected { .. }) | Ok(_) => {}
            Err(e) => {
                if self.stream.take().is_some() {
                    debug!("Dropping connection to {} after error: {}", self.addr, e);
                }
            }
        }
        result
    }
}

impl DeviceGateway for TcpBramGateway {
    fn describe(&self) -> String {
        format!("block-memory server at {}", self.addr)
    }

    fn read_bytes<'a>(
        &'a mut self,
        name: &'a str,
        offset: usize,
        length: usize,
    ) -> GatewayFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let result = self.read_inner(name, offset, length).await;
            self.settle(result)
        })
    }

    fn write_bytes<'a>(
        &'a mut self,
        name: &'a str,
        offset: usize,
        data: &'a [u8],
    ) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let result = self.write_inner(name, offset, data).await;
            self.settle(result)
        })
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    /// Serves `replies` in order, one per request read, then closes.
    async fn mock_server(replies: Vec<Vec<u8>>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            for reply in replies {
                let mut buf = [0u8; 256];
                let n = socket.read(&mut buf).await.unwrap();
                seen.push(String::from_utf8_lossy(&buf[..n]).into_owned());
                socket.write_all(&reply).await.unwrap();
            }
            seen
        });
        (addr, handle)
    }

    #[test]
    fn test_error_reply_detection() {
        assert!(is_error_reply(b"ERROR", 4096));
        assert!(is_error_reply(b"ERRO", 4));
        assert!(!is_error_reply(b"ERRO", 4096));
        assert!(!is_error_reply(&[5, 0, 0, 0], 4));
    }

    #[tokio::test]
    async fn test_register_read_request_format() {
        let (addr, server) = mock_server(vec![vec![0x2a, 0x01, 0, 0]]).await;
        let mut gw = TcpBramGateway::connect(&addr, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(gw.read_register("acc_cnt").await.unwrap(), 0x012a);
        let seen = server.await.unwrap();
        assert_eq!(seen, vec!["acc_cnt 0 4".to_string()]);
    }

    #[tokio::test]
    async fn test_rejected_read_keeps_connection() {
        let (addr, server) =
            mock_server(vec![b"ERROR".to_vec(), vec![1, 2, 3, 4, 5, 6, 7, 8]]).await;
        let mut gw = TcpBramGateway::connect(&addr, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(matches!(
            gw.read_bytes("synth0_9", 0, 64).await,
            Err(DeviceCommError::Rejected { .. })
        ));
        assert_eq!(
            gw.read_bytes("synth0_0", 8, 8).await.unwrap(),
            vec![1, 2, 3, 4, 5, 6, 7, 8]
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_short_rejection_does_not_shift_next_reply() {
        let (addr, server) = mock_server(vec![b"ERROR".to_vec(), vec![0x2a, 0, 0, 0]]).await;
        let mut gw = TcpBramGateway::connect(&addr, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(matches!(
            gw.read_register("acc_len").await,
            Err(DeviceCommError::Rejected { .. })
        ));
        assert!(gw.stream.is_some());
        assert_eq!(gw.read_register("acc_cnt").await.unwrap(), 42);
        let seen = server.await.unwrap();
        assert_eq!(seen, vec!["acc_len 0 4".to_string(), "acc_cnt 0 4".to_string()]);
    }

    #[tokio::test]
    async fn test_closed_server_reports_disconnect() {
        let (addr, server) = mock_server(vec![]).await;
        let mut gw = TcpBramGateway::connect(&addr, Duration::from_secs(2))
            .await
            .unwrap();
        server.await.unwrap();
        let err = gw.read_bytes("synth0_0", 0, 16).await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {err}");
        assert!(gw.stream.is_none());
    }

    #[tokio::test]
    async fn test_write_without_server_support() {
        let (addr, server) = mock_server(vec![vec![0x10, 0x20, 0x30, 0x40]]).await;
        let mut gw = TcpBramGateway::connect(&addr, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(matches!(
            gw.write_register("gain", 1).await,
            Err(DeviceCommError::Unsupported(_))
        ));
        assert!(gw.stream.is_none());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_write_sends_header_and_payload() {
        let (addr, server) = mock_server(vec![b"OK".to_vec()]).await;
        let mut gw = TcpBramGateway::connect(&addr, Duration::from_secs(2))
            .await
            .unwrap();
        gw.write_register("acc_len", 1).await.unwrap();
        let seen = server.await.unwrap();
        assert_eq!(seen[0].as_bytes(), b"write acc_len 0 4\n\x01\x00\x00\x00");
    }
}
