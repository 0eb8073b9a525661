// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Error kinds shared by the bridge components.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure talking to the spectrometer.
///
/// Never retried by the gateway itself; callers decide.
#[derive(Debug, Error)]
pub enum DeviceCommError {
    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("device request timed out after {0:?}")]
    Timeout(Duration),

    #[error("short reply for {name}: expected {expected} bytes, got {got}")]
    ShortReply {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("device rejected request for {name}")]
    Rejected { name: String },

    #[error("device connection is closed")]
    Disconnected,

    #[error("{0} is not supported by this device backend")]
    Unsupported(&'static str),
}

impl DeviceCommError {
    /// Connection-level failures that may clear up on reconnect.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DeviceCommError::Io(_) | DeviceCommError::Timeout(_) | DeviceCommError::Disconnected
        )
    }
}

/// Failure on the controller socket. Fatal to the session it occurs in.
#[derive(Debug, Error)]
pub enum ControllerLinkError {
    #[error("controller I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("controller write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error("controller idle for {0:?}")]
    IdleTimeout(Duration),
}

/// Status record framing problem.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    #[error("status record truncated: have {have} of {need} bytes")]
    TruncatedRecord { have: usize, need: usize },
}

/// Append failure on one of the persisted logs.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}
