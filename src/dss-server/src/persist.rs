// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Append-only storage for status records and refreshed spectra.
//!
//! One status file (`<UTC>_STATE`, raw records back to back) and, when
//! enabled, one spectra file (`<UTC>_SPECTRA.csv`) per server run. Files
//! are opened on first use; failures are logged and retried on the next
//! item, never surfaced to command processing.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use dss_core::{Sideband, SpectrumSnapshot, StatusRecord, StorageError};

/// Item handed to the persist worker.
#[derive(Debug, Clone)]
pub enum PersistEvent {
    Status(StatusRecord),
    Spectrum(SpectrumSnapshot),
}

fn run_stamp(started: DateTime<Utc>) -> String {
    started.format("%Y-%m-%dT%H-%M-%S%.3fZ").to_string()
}

fn open_append(path: &Path) -> Result<File, StorageError> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent).map_err(|source| StorageError::Open {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| StorageError::Open {
            path: path.to_path_buf(),
            source,
        })
}

/// Binary log of status records in arrival order.
pub struct StatusLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl StatusLog {
    pub fn open(dir: &Path, started: DateTime<Utc>) -> Result<Self, StorageError> {
        let path = dir.join(format!("{}_STATE", run_stamp(started)));
        let writer = BufWriter::new(open_append(&path)?);
        info!("Status log: {}", path.display());
        Ok(Self { path, writer })
    }

    pub fn append(&mut self, record: &StatusRecord) -> Result<(), StorageError> {
        self.writer
            .write_all(record.as_bytes())
            .and_then(|_| self.writer.flush())
            .map_err(|source| StorageError::Write {
                path: self.path.clone(),
                source,
            })
    }
}

/// CSV log with two rows (USB, LSB) per refreshed spectrum.
pub struct SpectraLog {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl SpectraLog {
    pub fn open(dir: &Path, started: DateTime<Utc>) -> Result<Self, StorageError> {
        let path = dir.join(format!("{}_SPECTRA.csv", run_stamp(started)));
        let file = open_append(&path)?;
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_writer(file);
        info!("Spectra log: {}", path.display());
        Ok(Self { path, writer })
    }

    pub fn append(&mut self, snapshot: &SpectrumSnapshot) -> Result<(), StorageError> {
        let taken_at: DateTime<Utc> = snapshot.taken_at.into();
        let timestamp = taken_at.to_rfc3339_opts(SecondsFormat::Millis, true);
        let count = snapshot.count.to_wire_hex();
        for sideband in Sideband::BOTH {
            let samples = match sideband {
                Sideband::Usb => &snapshot.usb,
                Sideband::Lsb => &snapshot.lsb,
            };
            let mut row = Vec::with_capacity(samples.len() + 3);
            row.push(timestamp.clone());
            row.push(count.clone());
            row.push(sideband.label().to_string());
            row.extend(samples.iter().map(u32::to_string));
            self.writer.write_record(&row).map_err(|e| self.write_error(e))?;
        }
        self.writer.flush().map_err(|source| StorageError::Write {
            path: self.path.clone(),
            source,
        })
    }

    fn write_error(&self, err: csv::Error) -> StorageError {
        StorageError::Write {
            path: self.path.clone(),
            source: std::io::Error::other(err),
        }
    }
}

/// Owns both logs for one server run.
pub struct Persister {
    dir: PathBuf,
    started: DateTime<Utc>,
    spectra_enabled: bool,
    status: Option<StatusLog>,
    spectra: Option<SpectraLog>,
}

impl Persister {
    pub fn new(dir: PathBuf, spectra_enabled: bool) -> Self {
        Self {
            dir,
            started: Utc::now(),
            spectra_enabled,
            status: None,
            spectra: None,
        }
    }

    pub fn record(&mut self, event: &PersistEvent) -> Result<(), StorageError> {
        match event {
            PersistEvent::Status(record) => {
                if self.status.is_none() {
                    self.status = Some(StatusLog::open(&self.dir, self.started)?);
                }
                match self.status.as_mut() {
                    Some(log) => log.append(record),
                    None => Ok(()),
                }
            }
            PersistEvent::Spectrum(snapshot) => {
                if !self.spectra_enabled {
                    return Ok(());
                }
                if self.spectra.is_none() {
                    self.spectra = Some(SpectraLog::open(&self.dir, self.started)?);
                }
                match self.spectra.as_mut() {
                    Some(log) => log.append(snapshot),
                    None => Ok(()),
                }
            }
        }
    }
}

/// Drain `rx` until every sender is gone.
pub async fn run_persist(mut persister: Persister, mut rx: mpsc::UnboundedReceiver<PersistEvent>) {
    while let Some(event) = rx.recv().await {
        if let Err(e) = persister.record(&event) {
            warn!("Persist failed: {}", e);
        }
    }
    debug!("Persist queue closed");
}
