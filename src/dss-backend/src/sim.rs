// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Simulated spectrometer for bench testing without hardware.
//!
//! Holds registers and block memories in memory. The accumulation counter
//! advances once every few reads of `acc_cnt` ([`POLLS_PER_CYCLE`] unless
//! overridden), and every
//! advance rewrites the block memories so consecutive spectra differ.

use std::collections::HashMap;

use dss_core::device::{block_name, Sideband, ACC_CNT_REGISTER, LANES, WORD_BYTES};
use dss_core::{DeviceCommError, DeviceGateway, GatewayFuture, Mode, SpectrumWindow};

/// Default counter reads per simulated integration cycle.
pub const POLLS_PER_CYCLE: u32 = 3;

const CNT_RST_REGISTER: &str = "cnt_rst";

pub struct SimulatedDevice {
    fft_size: u32,
    registers: HashMap<String, u32>,
    blocks: HashMap<String, Vec<u8>>,
    counter_reads: u32,
    polls_per_cycle: u32,
    cycle: u32,
}

impl SimulatedDevice {
    pub fn new(fft_size: u32) -> Self {
        let mut dev = Self {
            fft_size,
            registers: HashMap::new(),
            blocks: HashMap::new(),
            counter_reads: 0,
            polls_per_cycle: POLLS_PER_CYCLE,
            cycle: 0,
        };
        dev.fill_blocks();
        dev
    }

    pub fn with_polls_per_cycle(mut self, polls: u32) -> Self {
        self.polls_per_cycle = polls.max(1);
        self
    }

    fn fill_blocks(&mut self) {
        let layouts = [
            (Mode::Splobs.namespace(), self.fft_size as usize / LANES),
            (
                Mode::Cal.namespace(),
                SpectrumWindow::CALIBRATION.fft_size as usize / LANES,
            ),
        ];
        for (namespace, words) in layouts {
            for sideband in Sideband::BOTH {
                for lane in 0..LANES {
                    let mut data = Vec::with_capacity(words * WORD_BYTES);
                    for k in 0..words {
                        data.extend_from_slice(
                            &sample(self.cycle, sideband, lane, k).to_le_bytes(),
                        );
                    }
                    self.blocks
                        .insert(block_name(namespace, sideband, lane), data);
                }
            }
        }
    }

    fn read_counter(&mut self) -> u32 {
        let value = self.cycle;
        self.counter_reads += 1;
        if self.counter_reads % self.polls_per_cycle == 0 {
            self.cycle = self.cycle.wrapping_add(1);
            self.fill_blocks();
        }
        value
    }

    fn read(&mut self, name: &str, offset: usize, length: usize) -> Result<Vec<u8>, DeviceCommError> {
        if name == ACC_CNT_REGISTER {
            let value = self.read_counter().to_le_bytes();
            return Ok(truncate(&value, offset, length));
        }
        if let Some(value) = self.registers.get(name) {
            return Ok(truncate(&value.to_le_bytes(), offset, length));
        }
        let block = self.blocks.get(name).ok_or_else(|| DeviceCommError::Rejected {
            name: name.to_string(),
        })?;
        if offset >= block.len() {
            return Err(DeviceCommError::Rejected {
                name: name.to_string(),
            });
        }
        Ok(truncate(block, offset, length))
    }

    fn write(&mut self, name: &str, offset: usize, data: &[u8]) -> Result<(), DeviceCommError> {
        if let Some(block) = self.blocks.get_mut(name) {
            let end = offset + data.len();
            if end > block.len() {
                return Err(DeviceCommError::Rejected {
                    name: name.to_string(),
                });
            }
            block[offset..end].copy_from_slice(data);
            return Ok(());
        }
        let word: [u8; WORD_BYTES] = data
            .get(..WORD_BYTES)
            .and_then(|s| s.try_into().ok())
            .filter(|_| offset == 0)
            .ok_or_else(|| DeviceCommError::Rejected {
                name: name.to_string(),
            })?;
        let value = u32::from_le_bytes(word);
        if name == CNT_RST_REGISTER && value != 0 {
            self.cycle = 0;
            self.counter_reads = 0;
            self.fill_blocks();
        }
        self.registers.insert(name.to_string(), value);
        Ok(())
    }
}

/// Ramp per lane, offset per sideband, shifted by the cycle number.
fn sample(cycle: u32, sideband: Sideband, lane: usize, word: usize) -> u32 {
    (sideband.index() as u32 * 100_000)
        .wrapping_add(lane as u32 * 1000)
        .wrapping_add(word as u32)
        .wrapping_add(cycle.wrapping_mul(10_000_000))
}

/// Like the block-memory server: lengths past the end are cut short.
fn truncate(data: &[u8], offset: usize, length: usize) -> Vec<u8> {
    let start = offset.min(data.len());
    let end = offset.saturating_add(length).min(data.len());
    data[start..end].to_vec()
}

impl DeviceGateway for SimulatedDevice {
    fn describe(&self) -> String {
        format!("simulated spectrometer ({} channels)", self.fft_size)
    }

    fn read_bytes<'a>(
        &'a mut self,
        name: &'a str,
        offset: usize,
        length: usize,
    ) -> GatewayFuture<'a, Vec<u8>> {
        Box::pin(async move { self.read(name, offset, length) })
    }

    fn write_bytes<'a>(
        &'a mut self,
        name: &'a str,
        offset: usize,
        data: &'a [u8],
    ) -> GatewayFuture<'a, ()> {
        Box::pin(async move { self.write(name, offset, data) })
    }
}
