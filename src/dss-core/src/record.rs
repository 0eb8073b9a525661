// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Values carried between the bridge workers.

use std::fmt;
use std::time::SystemTime;

use bytes::Bytes;

/// Number of channels the controller reads back with `?read bram0`.
pub const SPECTRUM_CHANNELS: usize = 512;

/// Opaque status block extracted from the controller stream, marker included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord(Bytes);

impl StatusRecord {
    pub fn new(raw: impl Into<Bytes>) -> Self {
        StatusRecord(raw.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Device integration-cycle counter. Wraps; only equality is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AccumulationCount(pub u32);

impl AccumulationCount {
    /// Wire form expected by the controller, e.g. `0x0000002a`.
    pub fn to_wire_hex(self) -> String {
        format!("{:#010x}", self.0)
    }
}

impl fmt::Display for AccumulationCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire_hex())
    }
}

/// Cached controller-facing spectrum. Always exactly [`SPECTRUM_CHANNELS`] long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpectrumBuffer(Box<[u32; SPECTRUM_CHANNELS]>);

impl SpectrumBuffer {
    pub fn zeroed() -> Self {
        SpectrumBuffer(Box::new([0; SPECTRUM_CHANNELS]))
    }

    /// Build from the head of `samples`; missing channels stay zero.
    pub fn from_head(samples: &[u32]) -> Self {
        let mut buf = Self::zeroed();
        let n = samples.len().min(SPECTRUM_CHANNELS);
        buf.0[..n].copy_from_slice(&samples[..n]);
        buf
    }

    pub fn samples(&self) -> &[u32] {
        &self.0[..]
    }

    /// Big-endian packing used by the `?read bram0` reply.
    pub fn to_be_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SPECTRUM_CHANNELS * 4);
        for sample in self.0.iter() {
            out.extend_from_slice(&sample.to_be_bytes());
        }
        out
    }
}

impl Default for SpectrumBuffer {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Full fetch result handed to the spectra log.
#[derive(Debug, Clone)]
pub struct SpectrumSnapshot {
    pub taken_at: SystemTime,
    pub count: AccumulationCount,
    pub usb: Vec<u32>,
    pub lsb: Vec<u32>,
}
