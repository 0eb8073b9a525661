// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Command router: one classified command in, at most one reply out.
//!
//! The only state carried between commands is the acquisition mode and the
//! accumulation cache. Device errors are returned to the caller; the
//! router itself never retries.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use dss_core::{
    AccumulationCache, AccumulationCount, CommandKind, DeviceCommError, DeviceGateway, Mode,
    Response,
};
use dss_protocol::encode;

use crate::config::UnknownCommandPolicy;
use crate::persist::PersistEvent;

/// Register read back after a mode switch.
const ACC_LEN_REGISTER: &str = "acc_len";

pub struct Router {
    gateway: Box<dyn DeviceGateway>,
    cache: AccumulationCache,
    mode: Mode,
    unknown: UnknownCommandPolicy,
    spectra_tx: Option<mpsc::UnboundedSender<PersistEvent>>,
}

impl Router {
    pub fn new(
        gateway: Box<dyn DeviceGateway>,
        cache: AccumulationCache,
        initial_mode: Mode,
        unknown: UnknownCommandPolicy,
    ) -> Self {
        Self {
            gateway,
            cache,
            mode: initial_mode,
            unknown,
            spectra_tx: None,
        }
    }

    /// Forward every refreshed spectrum to the persist worker.
    pub fn with_spectra_sink(mut self, tx: mpsc::UnboundedSender<PersistEvent>) -> Self {
        self.spectra_tx = Some(tx);
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn last_count(&self) -> Option<AccumulationCount> {
        self.cache.last_count()
    }

    /// Handle one command. `Ok(None)` means no reply is sent.
    pub async fn handle(&mut self, kind: &CommandKind) -> Result<Option<Response>, DeviceCommError> {
        let response = match kind {
            CommandKind::ReadAccumulation => {
                let outcome = self
                    .cache
                    .poll_and_maybe_refresh(self.gateway.as_mut(), self.mode)
                    .await?;
                if let (Some(snapshot), Some(tx)) = (outcome.refreshed, self.spectra_tx.as_ref()) {
                    if tx.send(PersistEvent::Spectrum(snapshot)).is_err() {
                        debug!("Spectra sink closed, dropping snapshot");
                    }
                }
                encode::wordread_ok(outcome.count)
            }
            CommandKind::ReadSpectrum => encode::read_ok(self.cache.spectrum()),
            CommandKind::ProgramDevice => encode::progdev_ok(),
            CommandKind::SetMode(mode) => {
                self.set_mode(*mode).await;
                encode::wordwrite_ok()
            }
            CommandKind::WordWrite => encode::wordwrite_ok(),
            CommandKind::Write => encode::write_ok(),
            CommandKind::Unknown(verb) => match self.unknown {
                UnknownCommandPolicy::Drop => {
                    debug!(
                        "Dropping unrecognised command ({})",
                        verb.as_deref().unwrap_or("no verb")
                    );
                    return Ok(None);
                }
                UnknownCommandPolicy::Reject => encode::fail(verb.as_deref()),
            },
        };
        Ok(Some(response))
    }

    /// Reply sent when [`Router::handle`] failed; the protocol has no
    /// negative acknowledgement for known commands.
    pub fn degraded_response(&self, kind: &CommandKind) -> Option<Response> {
        match kind {
            CommandKind::ReadAccumulation => Some(encode::wordread_ok(
                self.cache.last_count().unwrap_or_default(),
            )),
            CommandKind::ReadSpectrum => Some(encode::read_ok(self.cache.spectrum())),
            CommandKind::ProgramDevice => Some(encode::progdev_ok()),
            CommandKind::SetMode(_) | CommandKind::WordWrite => Some(encode::wordwrite_ok()),
            CommandKind::Write => Some(encode::write_ok()),
            CommandKind::Unknown(_) => None,
        }
    }

    async fn set_mode(&mut self, mode: Mode) {
        if mode != self.mode {
            info!("Integration mode {} -> {}", self.mode, mode);
        }
        self.mode = mode;
        match self.gateway.read_register(ACC_LEN_REGISTER).await {
            Ok(acc_len) => info!("Device accumulation length is {}", acc_len),
            Err(e) => warn!("Failed to read back {}: {}", ACC_LEN_REGISTER, e),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use dss_core::device::ACC_CNT_REGISTER;
    use dss_core::{Command, GatewayFuture, ReadPacer, SpectrumFetcher, SpectrumWindow};
    use dss_protocol::classify;

    use super::*;

    /// Shared view into a [`ScriptedGateway`]; blocks read as zeros.
    #[derive(Debug, Default)]
    pub(crate) struct DeviceLog {
        pub count: u32,
        pub fail_counter: bool,
        pub block_reads: Vec<String>,
        pub registers: HashMap<String, u32>,
    }

    pub(crate) struct ScriptedGateway(pub Arc<Mutex<DeviceLog>>);

    impl DeviceGateway for ScriptedGateway {
        fn describe(&self) -> String {
            "scripted device".to_string()
        }

        fn read_bytes<'a>(
            &'a mut self,
            name: &'a str,
            _offset: usize,
            length: usize,
        ) -> GatewayFuture<'a, Vec<u8>> {
            Box::pin(async move {
                let mut log = self.0.lock().unwrap();
                if name == ACC_CNT_REGISTER {
                    if log.fail_counter {
                        return Err(DeviceCommError::Timeout(Duration::from_millis(10)));
                    }
                    return Ok(log.count.to_le_bytes().to_vec());
                }
                if let Some(value) = log.registers.get(name) {
                    return Ok(value.to_le_bytes().to_vec());
                }
                log.block_reads.push(name.to_string());
                Ok(vec![0; length])
            })
        }

        fn write_bytes<'a>(
            &'a mut self,
            name: &'a str,
            _offset: usize,
            data: &'a [u8],
        ) -> GatewayFuture<'a, ()> {
            Box::pin(async move {
                let mut word = [0u8; 4];
                word.copy_from_slice(&data[..4]);
                self.0
                    .lock()
                    .unwrap()
                    .registers
                    .insert(name.to_string(), u32::from_le_bytes(word));
                Ok(())
            })
        }
    }

    pub(crate) fn scripted_router(count: u32, unknown: UnknownCommandPolicy) -> (Router, Arc<Mutex<DeviceLog>>) {
        let log = Arc::new(Mutex::new(DeviceLog {
            count,
            ..DeviceLog::default()
        }));
        let cache = AccumulationCache::new(
            SpectrumFetcher::new(ReadPacer::new(Duration::ZERO)),
            SpectrumWindow::new(0, 1024, 1024),
        );
        let router = Router::new(
            Box::new(ScriptedGateway(Arc::clone(&log))),
            cache,
            Mode::Splobs,
            unknown,
        );
        (router, log)
    }

    async fn reply(router: &mut Router, raw: &str) -> Option<Vec<u8>> {
        let kind = classify(&Command::new(raw.as_bytes().to_vec()));
        router
            .handle(&kind)
            .await
            .unwrap()
            .map(|r| r.as_bytes().to_vec())
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_responses() {
        let (mut router, _log) = scripted_router(0x2a, UnknownCommandPolicy::Drop);
        let mut read_reply = b"!read ok ".to_vec();
        read_reply.extend_from_slice(&[0u8; 2048]);
        read_reply.push(b'\n');

        let got = vec![
            reply(&mut router, "?progdev").await.unwrap(),
            reply(&mut router, "?wordread acc_cnt").await.unwrap(),
            reply(&mut router, "?read bram0").await.unwrap(),
            reply(&mut router, "?wordwrite integ_mode 0 1").await.unwrap(),
        ];
        assert_eq!(
            got,
            vec![
                b"!progdev ok 525\n".to_vec(),
                b"!wordread ok 0x0000002a\n".to_vec(),
                read_reply,
                b"!wordwrite ok\n".to_vec(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_table_verbs() {
        let (mut router, _log) = scripted_router(7, UnknownCommandPolicy::Drop);
        let cases: [(&str, &[u8]); 7] = [
            ("?wordread acc_cnt", b"!wordread ok "),
            ("?read bram0 0 2048", b"!read ok "),
            ("?progdev x.fpg", b"!progdev ok 525\n"),
            ("?wordwrite integ_mode 0 0", b"!wordwrite ok\n"),
            ("?wordwrite integ_mode 0 1", b"!wordwrite ok\n"),
            ("?wordwrite gain 0 5", b"!wordwrite ok\n"),
            ("?write bram1 0 abcd", b"!write ok\n"),
        ];
        for (command, prefix) in cases {
            let got = reply(&mut router, command).await.unwrap();
            assert!(got.starts_with(prefix), "{command}: {got:?}");
            assert_eq!(got.last(), Some(&b'\n'));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_reflects_latest_poll() {
        let (mut router, log) = scripted_router(1, UnknownCommandPolicy::Drop);
        reply(&mut router, "?wordread acc_cnt").await;
        assert_eq!(log.lock().unwrap().block_reads.len(), 32);

        // Same count: no new fetch.
        reply(&mut router, "?wordread acc_cnt").await;
        assert_eq!(log.lock().unwrap().block_reads.len(), 32);

        log.lock().unwrap().count = 2;
        let got = reply(&mut router, "?wordread acc_cnt").await.unwrap();
        assert_eq!(got, b"!wordread ok 0x00000002\n".to_vec());
        assert_eq!(log.lock().unwrap().block_reads.len(), 64);
        assert_eq!(router.last_count(), Some(AccumulationCount(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mode_switch_selects_namespace() {
        let (mut router, log) = scripted_router(1, UnknownCommandPolicy::Drop);
        log
            .lock()
            .unwrap()
            .registers
            .insert("acc_len".to_string(), 8192);

        reply(&mut router, "?wordwrite integ_mode 0 0").await;
        assert_eq!(router.mode(), Mode::Cal);
        reply(&mut router, "?wordread acc_cnt").await;
        {
            let log = log.lock().unwrap();
            assert_eq!(log.block_reads.len(), 32);
            assert!(log.block_reads.iter().all(|n| n.starts_with("re_bin_synth")));
        }

        log.lock().unwrap().block_reads.clear();
        log.lock().unwrap().count = 2;
        reply(&mut router, "?wordwrite integ_mode 0 1").await;
        assert_eq!(router.mode(), Mode::Splobs);
        reply(&mut router, "?wordread acc_cnt").await;
        let log = log.lock().unwrap();
        assert_eq!(log.block_reads.len(), 32);
        assert!(log.block_reads.iter().all(|n| n.starts_with("synth")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_command_policy() {
        let (mut router, _log) = scripted_router(1, UnknownCommandPolicy::Drop);
        assert_eq!(reply(&mut router, "?status now").await, None);

        let (mut router, _log) = scripted_router(1, UnknownCommandPolicy::Reject);
        assert_eq!(
            reply(&mut router, "?status now").await,
            Some(b"!status fail\n".to_vec())
        );
        assert_eq!(
            reply(&mut router, "garbage").await,
            Some(b"!unknown fail\n".to_vec())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_poll_degrades_to_cached_count() {
        let (mut router, log) = scripted_router(5, UnknownCommandPolicy::Drop);
        reply(&mut router, "?wordread acc_cnt").await;

        log.lock().unwrap().fail_counter = true;
        let kind = CommandKind::ReadAccumulation;
        assert!(router.handle(&kind).await.is_err());
        assert_eq!(
            router.degraded_response(&kind).unwrap().as_bytes(),
            b"!wordread ok 0x00000005\n"
        );
        assert_eq!(router.last_count(), Some(AccumulationCount(5)));
        assert!(router.degraded_response(&CommandKind::Unknown(None)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_feeds_spectra_sink() {
        let (router, log) = scripted_router(3, UnknownCommandPolicy::Drop);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut router = router.with_spectra_sink(tx);
        reply(&mut router, "?wordread acc_cnt").await;
        reply(&mut router, "?wordread acc_cnt").await;
        log.lock().unwrap().count = 4;
        reply(&mut router, "?wordread acc_cnt").await;

        let mut counts = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                PersistEvent::Spectrum(s) => {
                    assert_eq!(s.usb.len(), 1024);
                    counts.push(s.count.0);
                }
                PersistEvent::Status(_) => panic!("unexpected status record"),
            }
        }
        assert_eq!(counts, vec![3, 4]);
    }
}
