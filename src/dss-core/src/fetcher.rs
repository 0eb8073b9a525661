// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Spectrum retrieval from the lane-distributed block memories.
//!
//! The device spreads consecutive channels round-robin over [`LANES`] output
//! lanes and stores each lane in one block memory per sideband, with the
//! FFT span rotated by half. A window read therefore becomes one or two byte
//! ranges per lane, followed by a lane-to-channel interleave.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::device::{block_name, DeviceGateway, Sideband, LANES, WORD_BYTES};
use crate::error::DeviceCommError;
use crate::pacing::ReadPacer;
use crate::Mode;

/// Requested slice of the FFT span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpectrumWindow {
    pub first_channel: u32,
    pub fft_size: u32,
    pub channel_count: u32,
}

impl SpectrumWindow {
    /// Window always used in calibration mode.
    pub const CALIBRATION: SpectrumWindow = SpectrumWindow {
        first_channel: 0,
        fft_size: 512,
        channel_count: 512,
    };

    pub fn new(first_channel: u32, fft_size: u32, channel_count: u32) -> Self {
        Self {
            first_channel,
            fft_size,
            channel_count,
        }
    }

    /// Window actually read for `mode`.
    pub fn effective(&self, mode: Mode) -> SpectrumWindow {
        match mode {
            Mode::Cal => Self::CALIBRATION,
            Mode::Splobs => *self,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let lanes = LANES as u32;
        if self.fft_size == 0 || self.fft_size % (2 * lanes) != 0 {
            return Err(format!(
                "fft_size {} must be a non-zero multiple of {}",
                self.fft_size,
                2 * lanes
            ));
        }
        if self.channel_count == 0 || self.channel_count % lanes != 0 {
            return Err(format!(
                "channel_count {} must be a non-zero multiple of {}",
                self.channel_count, lanes
            ));
        }
        if self.first_channel % lanes != 0 {
            return Err(format!(
                "first_channel {} must be a multiple of {}",
                self.first_channel, lanes
            ));
        }
        if self.first_channel as u64 + self.channel_count as u64 > self.fft_size as u64 {
            return Err(format!(
                "window {}+{} exceeds fft_size {}",
                self.first_channel, self.channel_count, self.fft_size
            ));
        }
        Ok(())
    }

    fn words_per_lane(&self) -> usize {
        self.channel_count as usize / LANES
    }
}

/// Byte range of one block-memory read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadSpan {
    pub offset: usize,
    pub length: usize,
}

impl ReadSpan {
    fn words(offset_words: usize, length_words: usize) -> Self {
        Self {
            offset: offset_words * WORD_BYTES,
            length: length_words * WORD_BYTES,
        }
    }
}

/// Byte ranges to read from every lane memory for `window`, in order.
pub fn plan_reads(window: &SpectrumWindow) -> Vec<ReadSpan> {
    let span = window.fft_size as usize / LANES;
    let mid = span / 2;
    let first = window.first_channel as usize / LANES;
    let count = window.words_per_lane();

    let spans = if first <= mid {
        if mid + first + count <= span {
            vec![ReadSpan::words(mid + first, count)]
        } else {
            // Window crosses the rotation point: read to the end, then wrap.
            vec![
                ReadSpan::words(mid + first, mid - first),
                ReadSpan::words(0, first + count - mid),
            ]
        }
    } else {
        vec![ReadSpan::words(first - mid, count)]
    };
    spans.into_iter().filter(|s| s.length > 0).collect()
}

/// Decode a little-endian word stream.
pub fn decode_words(raw: &[u8]) -> Vec<u32> {
    raw.chunks_exact(WORD_BYTES)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect()
}

/// Undo the round-robin lane distribution: lane `i` word `k` lands at `k * LANES + i`.
pub fn interleave_lanes(lanes: &[Vec<u32>]) -> Vec<u32> {
    let words = lanes.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(words * lanes.len());
    for k in 0..words {
        for lane in lanes {
            out.push(lane[k]);
        }
    }
    out
}

/// Channel-ordered samples for both sidebands, equal length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spectrum {
    pub usb: Vec<u32>,
    pub lsb: Vec<u32>,
}

/// Issues paced block-memory reads and reassembles channel order.
#[derive(Debug, Default)]
pub struct SpectrumFetcher {
    pacer: ReadPacer,
}

impl SpectrumFetcher {
    pub fn new(pacer: ReadPacer) -> Self {
        Self { pacer }
    }

    /// Fetch `window` (overridden by the calibration window in `Cal`).
    ///
    /// Either returns the full spectrum or the first device error; nothing
    /// partial is ever returned.
    pub async fn fetch(
        &mut self,
        gateway: &mut dyn DeviceGateway,
        window: &SpectrumWindow,
        mode: Mode,
    ) -> Result<Spectrum, DeviceCommError> {
        let window = window.effective(mode);
        let namespace = mode.namespace();
        let spans = plan_reads(&window);
        let words = window.words_per_lane();
        debug!(
            "Fetching {} channels from {} ({} read(s) per lane)",
            window.channel_count,
            namespace,
            spans.len()
        );

        let mut usb_lanes = Vec::with_capacity(LANES);
        let mut lsb_lanes = Vec::with_capacity(LANES);
        for lane in 0..LANES {
            for sideband in Sideband::BOTH {
                let name = block_name(namespace, sideband, lane);
                let mut raw = Vec::with_capacity(words * WORD_BYTES);
                for span in &spans {
                    self.pacer.ready().await;
                    let chunk = gateway.read_bytes(&name, span.offset, span.length).await;
                    self.pacer.mark();
                    let chunk = chunk?;
                    if chunk.len() != span.length {
                        return Err(DeviceCommError::ShortReply {
                            name,
                            expected: span.length,
                            got: chunk.len(),
                        });
                    }
                    raw.extend_from_slice(&chunk);
                }
                let decoded = decode_words(&raw);
                match sideband {
                    Sideband::Usb => usb_lanes.push(decoded),
                    Sideband::Lsb => lsb_lanes.push(decoded),
                }
            }
        }

        Ok(Spectrum {
            usb: interleave_lanes(&usb_lanes),
            lsb: interleave_lanes(&lsb_lanes),
        })
    }
}
