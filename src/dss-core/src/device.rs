// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Request/response access to the spectrometer's registers and block memories.

use std::future::Future;
use std::pin::Pin;

use crate::error::DeviceCommError;

/// Alias to reduce type complexity in DeviceGateway.
pub type GatewayFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, DeviceCommError>> + Send + 'a>>;

/// Register holding the accumulation counter.
pub const ACC_CNT_REGISTER: &str = "acc_cnt";

/// Parallel output lanes of the FFT/accumulation pipeline.
pub const LANES: usize = 8;

/// Width in bytes of one block-memory word.
pub const WORD_BYTES: usize = 4;

/// Common interface for device backends.
///
/// Takes `&mut self` on every call, so at most one request is in flight per
/// gateway. Implementations must not retry internally.
pub trait DeviceGateway: Send {
    /// Human-readable endpoint description for logs.
    fn describe(&self) -> String;

    fn read_bytes<'a>(
        &'a mut self,
        name: &'a str,
        offset: usize,
        length: usize,
    ) -> GatewayFuture<'a, Vec<u8>>;

    fn write_bytes<'a>(
        &'a mut self,
        name: &'a str,
        offset: usize,
        data: &'a [u8],
    ) -> GatewayFuture<'a, ()>;

    /// Read a 32-bit register (little-endian word at offset 0).
    fn read_register<'a>(&'a mut self, name: &'a str) -> GatewayFuture<'a, u32> {
        Box::pin(async move {
            let raw = self.read_bytes(name, 0, WORD_BYTES).await?;
            decode_register(name, &raw)
        })
    }

    /// Write a 32-bit register (little-endian word at offset 0).
    fn write_register<'a>(&'a mut self, name: &'a str, value: u32) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let raw = value.to_le_bytes();
            self.write_bytes(name, 0, &raw).await
        })
    }
}

/// Output sideband of the sideband-separating spectrometer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sideband {
    Usb,
    Lsb,
}

impl Sideband {
    pub const BOTH: [Sideband; 2] = [Sideband::Usb, Sideband::Lsb];

    /// Memory index used in block names (`synth0_*` is USB, `synth1_*` LSB).
    pub fn index(self) -> usize {
        match self {
            Sideband::Usb => 0,
            Sideband::Lsb => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Sideband::Usb => "usb",
            Sideband::Lsb => "lsb",
        }
    }
}

/// Block-memory name for one lane of one sideband, e.g. `re_bin_synth1_7`.
pub fn block_name(namespace: &str, sideband: Sideband, lane: usize) -> String {
    format!("{}{}_{}", namespace, sideband.index(), lane)
}

fn decode_register(name: &str, raw: &[u8]) -> Result<u32, DeviceCommError> {
    let word: [u8; WORD_BYTES] = raw
        .get(..WORD_BYTES)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| DeviceCommError::ShortReply {
            name: name.to_string(),
            expected: WORD_BYTES,
            got: raw.len(),
        })?;
    Ok(u32::from_le_bytes(word))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_names() {
        assert_eq!(block_name("synth", Sideband::Usb, 0), "synth0_0");
        assert_eq!(block_name("synth", Sideband::Lsb, 7), "synth1_7");
        assert_eq!(block_name("re_bin_synth", Sideband::Lsb, 3), "re_bin_synth1_3");
    }

    #[test]
    fn test_decode_register() {
        assert_eq!(decode_register("acc_cnt", &[0x2a, 0, 0, 0]).unwrap(), 42);
        assert!(matches!(
            decode_register("acc_cnt", &[1, 2]),
            Err(DeviceCommError::ShortReply { got: 2, .. })
        ));
    }
}
