// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Single dispatch worker. Owns the router, so device access and cache
//! updates happen strictly in queue order.

use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use dss_core::{Command, Response};
use dss_protocol::classify;

use crate::router::Router;

/// Command queued by a controller session together with its reply channel.
#[derive(Debug)]
pub struct ControllerRequest {
    pub command: Command,
    pub respond_to: mpsc::UnboundedSender<Response>,
}

/// Run until shutdown or until every request sender is dropped.
pub async fn run_dispatch(
    mut router: Router,
    mut rx: mpsc::UnboundedReceiver<ControllerRequest>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                match changed {
                    Ok(()) if *shutdown_rx.borrow() => break,
                    Ok(()) => {}
                    Err(_) => break,
                }
            }
            maybe_req = rx.recv() => {
                let Some(ControllerRequest { command, respond_to }) = maybe_req else {
                    break;
                };
                let kind = classify(&command);
                let started = Instant::now();
                let response = match router.handle(&kind).await {
                    Ok(response) => response,
                    Err(e) => {
                        warn!(
                            "Device error handling {:?} (cached count {}): {}",
                            kind,
                            router
                                .last_count()
                                .map(|c| c.to_wire_hex())
                                .unwrap_or_else(|| "none".to_string()),
                            e
                        );
                        router.degraded_response(&kind)
                    }
                };
                debug!("Handled {:?} in {:?}", kind, started.elapsed());
                if let Some(response) = response {
                    if respond_to.send(response).is_err() {
                        debug!("Controller session gone, dropping reply to {:?}", kind);
                    }
                }
            }
        }
    }
    info!("Dispatch worker stopped");
}
