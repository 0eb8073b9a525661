// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Accumulation-counter driven spectrum cache.
//!
//! The controller polls `acc_cnt` and later reads the spectrum. A device
//! fetch is issued only when the counter differs from the last one seen, so
//! reads between transitions always observe the previous cycle's data.

use std::time::SystemTime;

use tracing::debug;

use crate::device::{DeviceGateway, ACC_CNT_REGISTER};
use crate::error::DeviceCommError;
use crate::fetcher::{SpectrumFetcher, SpectrumWindow};
use crate::record::{AccumulationCount, SpectrumBuffer, SpectrumSnapshot};
use crate::Mode;

/// Result of one [`AccumulationCache::poll_and_maybe_refresh`] call.
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub count: AccumulationCount,
    /// Set when this poll observed a new counter value and refetched.
    pub refreshed: Option<SpectrumSnapshot>,
}

pub struct AccumulationCache {
    last_count: Option<AccumulationCount>,
    spectrum: SpectrumBuffer,
    fetcher: SpectrumFetcher,
    window: SpectrumWindow,
}

impl AccumulationCache {
    pub fn new(fetcher: SpectrumFetcher, window: SpectrumWindow) -> Self {
        Self {
            last_count: None,
            spectrum: SpectrumBuffer::zeroed(),
            fetcher,
            window,
        }
    }

    pub fn last_count(&self) -> Option<AccumulationCount> {
        self.last_count
    }

    pub fn spectrum(&self) -> &SpectrumBuffer {
        &self.spectrum
    }

    /// Read the counter and refetch the spectrum if it moved.
    ///
    /// On any device error the cached count and spectrum are left untouched,
    /// so the next poll retries the fetch.
    pub async fn poll_and_maybe_refresh(
        &mut self,
        gateway: &mut dyn DeviceGateway,
        mode: Mode,
    ) -> Result<PollOutcome, DeviceCommError> {
        let count = AccumulationCount(gateway.read_register(ACC_CNT_REGISTER).await?);
        if self.last_count == Some(count) {
            return Ok(PollOutcome {
                count,
                refreshed: None,
            });
        }

        let spectrum = self.fetcher.fetch(gateway, &self.window, mode).await?;
        debug!(
            "Accumulation {} -> {}, spectrum refreshed ({} mode)",
            self.last_count
                .map(|c| c.to_wire_hex())
                .unwrap_or_else(|| "none".to_string()),
            count,
            mode
        );
        self.spectrum = SpectrumBuffer::from_head(&spectrum.usb);
        self.last_count = Some(count);

        Ok(PollOutcome {
            count,
            refreshed: Some(SpectrumSnapshot {
                taken_at: SystemTime::now(),
                count,
                usb: spectrum.usb,
                lsb: spectrum.lsb,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use super::*;
    use crate::device::GatewayFuture;

    /// Counter values popped per `acc_cnt` read; block memories hold `fill`.
    struct ScriptedGateway {
        counts: VecDeque<u32>,
        fill: u32,
        block_reads: usize,
        fail_blocks: bool,
    }

    impl ScriptedGateway {
        fn new(counts: &[u32]) -> Self {
            Self {
                counts: counts.iter().copied().collect(),
                fill: 1,
                block_reads: 0,
                fail_blocks: false,
            }
        }
    }

    impl DeviceGateway for ScriptedGateway {
        fn describe(&self) -> String {
            "scripted".to_string()
        }

        fn read_bytes<'a>(
            &'a mut self,
            name: &'a str,
            _offset: usize,
            length: usize,
        ) -> GatewayFuture<'a, Vec<u8>> {
            Box::pin(async move {
                if name == ACC_CNT_REGISTER {
                    let c = self.counts.pop_front().ok_or(DeviceCommError::Disconnected)?;
                    return Ok(c.to_le_bytes().to_vec());
                }
                if self.fail_blocks {
                    return Err(DeviceCommError::Timeout(Duration::from_millis(1)));
                }
                self.block_reads += 1;
                Ok(self
                    .fill
                    .to_le_bytes()
                    .iter()
                    .copied()
                    .cycle()
                    .take(length)
                    .collect())
            })
        }

        fn write_bytes<'a>(
            &'a mut self,
            _name: &'a str,
            _offset: usize,
            _data: &'a [u8],
        ) -> GatewayFuture<'a, ()> {
            Box::pin(async move { Ok(()) })
        }
    }

    fn cache() -> AccumulationCache {
        AccumulationCache::new(
            SpectrumFetcher::default(),
            SpectrumWindow::new(0, 1024, 1024),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetches_once_per_distinct_count() {
        let mut gw = ScriptedGateway::new(&[5, 5, 5, 7, 7, 9]);
        let mut cache = cache();
        let mut fetches = 0;
        let mut seen = Vec::new();
        for _ in 0..6 {
            let outcome = cache
                .poll_and_maybe_refresh(&mut gw, Mode::Splobs)
                .await
                .unwrap();
            if outcome.refreshed.is_some() {
                fetches += 1;
            }
            seen.push(outcome.count.to_wire_hex());
        }
        assert_eq!(fetches, 3);
        assert_eq!(
            seen,
            vec![
                "0x00000005",
                "0x00000005",
                "0x00000005",
                "0x00000007",
                "0x00000007",
                "0x00000009"
            ]
        );
        // 1024 channels over a 1024 span crosses the midpoint: 2 reads per lane/sideband.
        assert_eq!(gw.block_reads, 3 * 16 * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spectrum_changes_only_on_transition() {
        let mut gw = ScriptedGateway::new(&[1, 1, 2]);
        let mut cache = cache();
        assert!(cache.spectrum().samples().iter().all(|s| *s == 0));

        gw.fill = 10;
        cache.poll_and_maybe_refresh(&mut gw, Mode::Splobs).await.unwrap();
        assert!(cache.spectrum().samples().iter().all(|s| *s == 10));

        gw.fill = 20;
        cache.poll_and_maybe_refresh(&mut gw, Mode::Splobs).await.unwrap();
        assert!(cache.spectrum().samples().iter().all(|s| *s == 10));

        cache.poll_and_maybe_refresh(&mut gw, Mode::Splobs).await.unwrap();
        assert!(cache.spectrum().samples().iter().all(|s| *s == 20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_keeps_previous_state() {
        let mut gw = ScriptedGateway::new(&[3, 4, 4]);
        let mut cache = cache();
        gw.fill = 7;
        cache.poll_and_maybe_refresh(&mut gw, Mode::Splobs).await.unwrap();

        gw.fail_blocks = true;
        gw.fill = 8;
        assert!(cache
            .poll_and_maybe_refresh(&mut gw, Mode::Splobs)
            .await
            .is_err());
        assert_eq!(cache.last_count(), Some(AccumulationCount(3)));
        assert!(cache.spectrum().samples().iter().all(|s| *s == 7));

        // Same counter again, but the previous fetch never landed: refetch.
        gw.fail_blocks = false;
        let outcome = cache
            .poll_and_maybe_refresh(&mut gw, Mode::Splobs)
            .await
            .unwrap();
        assert!(outcome.refreshed.is_some());
        assert!(cache.spectrum().samples().iter().all(|s| *s == 8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_read_failure_is_propagated() {
        let mut gw = ScriptedGateway::new(&[]);
        let mut cache = cache();
        let err = cache
            .poll_and_maybe_refresh(&mut gw, Mode::Splobs)
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceCommError::Disconnected));
        assert_eq!(cache.last_count(), None);
    }
}
