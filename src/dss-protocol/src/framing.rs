// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Separation of embedded status records from controller commands.
//!
//! The controller interleaves fixed-length status records, each starting
//! with the two bytes `ST`, into the same stream as its commands. Every
//! complete record is cut out; whatever else arrived in the read is one
//! command. A record whose tail has not arrived yet stays buffered and is
//! completed by the following reads, as does a lone `S` ending a read.

use bytes::{Buf, BytesMut};
use tracing::trace;

use dss_core::{Command, FramingError, StatusRecord};

pub const STATUS_MARKER: &[u8; 2] = b"ST";

/// Record length including the marker.
pub const DEFAULT_PACKET_LENGTH: usize = 70;

/// One unit extracted from the controller stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Status(StatusRecord),
    Command(Command),
}

#[derive(Debug)]
pub struct FrameSplitter {
    packet_length: usize,
    pending: BytesMut,
}

impl FrameSplitter {
    pub fn new(packet_length: usize) -> Self {
        Self {
            packet_length: packet_length.max(STATUS_MARKER.len()),
            pending: BytesMut::with_capacity(packet_length * 2),
        }
    }

    pub fn packet_length(&self) -> usize {
        self.packet_length
    }

    /// Bytes of an incomplete record waiting for more input.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Feed one socket read. Returns records in stream order, followed by
    /// the command made of the remaining bytes, if any.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.pending.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut command = BytesMut::new();

        loop {
            match find_marker(&self.pending) {
                Some(at) => {
                    command.extend_from_slice(&self.pending[..at]);
                    self.pending.advance(at);
                    if self.pending.len() < self.packet_length {
                        trace!(
                            "Holding partial status record ({} of {} bytes)",
                            self.pending.len(),
                            self.packet_length
                        );
                        break;
                    }
                    let record = self.pending.split_to(self.packet_length).freeze();
                    frames.push(Frame::Status(StatusRecord::new(record)));
                }
                None => {
                    // A trailing `S` may be the first half of a marker.
                    let held = usize::from(self.pending.last() == Some(&STATUS_MARKER[0]));
                    let flush = self.pending.len() - held;
                    command.extend_from_slice(&self.pending[..flush]);
                    self.pending.advance(flush);
                    break;
                }
            }
        }

        if !command.is_empty() {
            frames.push(Frame::Command(Command::new(command.freeze())));
        }
        frames
    }

    /// Drop any buffered partial record, reporting it.
    pub fn finish(&mut self) -> Result<(), FramingError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let have = self.pending.len();
        self.pending.clear();
        Err(FramingError::TruncatedRecord {
            have,
            need: self.packet_length,
        })
    }
}

impl Default for FrameSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_PACKET_LENGTH)
    }
}

fn find_marker(buf: &[u8]) -> Option<usize> {
    buf.windows(STATUS_MARKER.len())
        .position(|w| w == STATUS_MARKER)
}
