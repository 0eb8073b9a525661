// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Controller-facing TCP listener.
//!
//! Serves one controller at a time. Each session runs an ingest loop
//! (socket → frame splitter → dispatch/persist queues) and an egress loop
//! (reply queue → socket). When the controller goes away the next one is
//! accepted; the dispatch worker and its cache live on.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time;
use tracing::{debug, info, warn};

use dss_core::{ControllerLinkError, Response};
use dss_protocol::{Frame, FrameSplitter};

use crate::dispatch::ControllerRequest;
use crate::persist::PersistEvent;

/// Everything a controller session needs, shared across sessions.
pub struct SessionContext {
    pub read_buffer: usize,
    pub write_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub packet_length: usize,
    pub requests: mpsc::UnboundedSender<ControllerRequest>,
    pub persist: mpsc::UnboundedSender<PersistEvent>,
}

pub async fn wait_for_shutdown(mut shutdown_rx: watch::Receiver<bool>) {
    if *shutdown_rx.borrow() {
        return;
    }
    while shutdown_rx.changed().await.is_ok() {
        if *shutdown_rx.borrow() {
            break;
        }
    }
}

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Retry `accept` through failures such as fd exhaustion or aborted
/// handshakes. Returns `None` on shutdown.
async fn accept_until_shutdown<T, F, Fut>(
    mut accept: F,
    shutdown_rx: &watch::Receiver<bool>,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::io::Result<T>>,
{
    let mut backoff = ACCEPT_BACKOFF;
    loop {
        tokio::select! {
            accepted = accept() => match accepted {
                Ok(conn) => return Some(conn),
                Err(e) => warn!("Accept failed: {}; retrying in {:?}", e, backoff),
            },
            _ = wait_for_shutdown(shutdown_rx.clone()) => return None,
        }
        tokio::select! {
            _ = time::sleep(backoff) => {}
            _ = wait_for_shutdown(shutdown_rx.clone()) => return None,
        }
        backoff = (backoff * 2).min(ACCEPT_BACKOFF_MAX);
    }
}

/// Accept controllers until shutdown.
pub async fn run_listener(
    listener: TcpListener,
    ctx: SessionContext,
    shutdown_rx: watch::Receiver<bool>,
) {
    if let Ok(addr) = listener.local_addr() {
        info!("Listening for controller on {}", addr);
    }

    while let Some((socket, peer)) =
        accept_until_shutdown(|| listener.accept(), &shutdown_rx).await
    {
        info!("Controller connected: {}", peer);
        if let Err(e) = socket.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        tokio::select! {
            result = handle_client(socket, peer, &ctx) => match result {
                Ok(()) => info!("Controller {} disconnected", peer),
                Err(e) => warn!("Controller {} session ended: {}", peer, e),
            },
            _ = wait_for_shutdown(shutdown_rx.clone()) => {
                info!("Closing controller session {} for shutdown", peer);
                break;
            }
        }
    }

    info!("Controller listener stopped");
}

async fn handle_client(
    socket: TcpStream,
    peer: SocketAddr,
    ctx: &SessionContext,
) -> Result<(), ControllerLinkError> {
    let (reader, writer) = socket.into_split();
    let (resp_tx, resp_rx) = mpsc::unbounded_channel();
    tokio::try_join!(
        ingest(reader, peer, ctx, resp_tx),
        egress(writer, resp_rx, ctx.write_timeout)
    )?;
    Ok(())
}

async fn ingest(
    mut reader: OwnedReadHalf,
    peer: SocketAddr,
    ctx: &SessionContext,
    resp_tx: mpsc::UnboundedSender<Response>,
) -> Result<(), ControllerLinkError> {
    let mut splitter = FrameSplitter::new(ctx.packet_length);
    let mut buf = vec![0u8; ctx.read_buffer];

    loop {
        let read = reader.read(&mut buf);
        let n = match ctx.idle_timeout {
            Some(idle) => time::timeout(idle, read)
                .await
                .map_err(|_| ControllerLinkError::IdleTimeout(idle))??,
            None => read.await?,
        };
        if n == 0 {
            break;
        }

        for frame in splitter.push(&buf[..n]) {
            match frame {
                Frame::Status(record) => {
                    debug!("Status record ({} bytes) from {}", record.len(), peer);
                    if ctx.persist.send(PersistEvent::Status(record)).is_err() {
                        warn!("Persist worker gone, status record dropped");
                    }
                }
                Frame::Command(command) => {
                    debug!(
                        "Command from {}: {:?}",
                        peer,
                        String::from_utf8_lossy(command.as_bytes())
                    );
                    let req = ControllerRequest {
                        command,
                        respond_to: resp_tx.clone(),
                    };
                    if ctx.requests.send(req).is_err() {
                        warn!("Dispatch worker gone, closing session {}", peer);
                        return Ok(());
                    }
                }
            }
        }
    }

    if let Err(e) = splitter.finish() {
        warn!("Controller {} closed mid-record: {}", peer, e);
    }
    Ok(())
}

/// Write replies until the session's last sender is dropped.
async fn egress(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Response>,
    write_timeout: Duration,
) -> Result<(), ControllerLinkError> {
    while let Some(response) = rx.recv().await {
        time::timeout(write_timeout, writer.write_all(response.as_bytes()))
            .await
            .map_err(|_| ControllerLinkError::WriteTimeout(write_timeout))??;
    }
    let _ = writer.shutdown().await;
    Ok(())
}
