// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Device bring-up before the controller is accepted.

use std::time::Duration;

use tokio::time;
use tracing::{info, warn};

use dss_backend::{BackendFactory, DeviceAccess};
use dss_core::policies::{ExponentialBackoff, NoRetry, RetryPolicy};
use dss_core::{DeviceCommError, DeviceGateway};

use crate::config::DeviceConfig;

const CNT_RST_REGISTER: &str = "cnt_rst";
const RETRY_MAX_DELAY: Duration = Duration::from_secs(2);

/// Backoff for the startup connect; a single attempt never waits.
pub fn connect_policy(device: &DeviceConfig) -> Box<dyn RetryPolicy> {
    if device.connect_attempts <= 1 {
        return Box::new(NoRetry);
    }
    Box::new(ExponentialBackoff::new(
        device.connect_attempts,
        Duration::from_millis(device.retry_base_delay_ms),
        RETRY_MAX_DELAY,
    ))
}

/// Instantiate the backend, retrying transient failures per `policy`.
pub async fn connect_device(
    factory: BackendFactory,
    access: DeviceAccess,
    policy: &dyn RetryPolicy,
) -> Result<Box<dyn DeviceGateway>, DeviceCommError> {
    let mut attempt = 0;
    loop {
        match factory(access.clone()).await {
            Ok(gateway) => {
                info!("Device ready: {}", gateway.describe());
                return Ok(gateway);
            }
            Err(e) if policy.should_retry(attempt, &e) => {
                let delay = policy.delay(attempt);
                warn!(
                    "Device connect to {} failed (attempt {}/{}): {}; retrying in {:?}",
                    access.addr,
                    attempt + 1,
                    policy.max_attempts(),
                    e,
                    delay
                );
                time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Write accumulation length and gains, then pulse the counter reset.
///
/// A device that refuses register writes keeps the values it was
/// programmed with; only transport failures abort startup.
pub async fn init_registers(
    gateway: &mut dyn DeviceGateway,
    device: &DeviceConfig,
) -> Result<(), DeviceCommError> {
    let writes = [
        ("acc_len", device.acc_len),
        ("acc_len_re_bin", device.acc_len),
        ("gain", device.gain),
        ("gain_re_bin", device.gain_re_bin),
        (CNT_RST_REGISTER, 1),
        (CNT_RST_REGISTER, 0),
    ];
    for (name, value) in writes {
        match gateway.write_register(name, value).await {
            Ok(()) => {}
            Err(e @ (DeviceCommError::Rejected { .. } | DeviceCommError::Unsupported(_))) => {
                warn!(
                    "Register write to {} on {} refused ({}); keeping programmed values",
                    name,
                    gateway.describe(),
                    e
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }
    info!(
        "Device registers initialised (acc_len {}, gain {}, gain_re_bin {})",
        device.acc_len, device.gain, device.gain_re_bin
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use dss_backend::{SimulatedDevice, TcpBramGateway};
    use dss_core::device::ACC_CNT_REGISTER;
    use dss_core::GatewayFuture;

    use super::*;

    static FLAKY_CALLS: AtomicU32 = AtomicU32::new(0);

    fn flaky_factory(access: DeviceAccess) -> GatewayFuture<'static, Box<dyn DeviceGateway>> {
        Box::pin(async move {
            if FLAKY_CALLS.fetch_add(1, Ordering::SeqCst) < 2 {
                return Err(DeviceCommError::Disconnected);
            }
            Ok(Box::new(SimulatedDevice::new(access.fft_size)) as Box<dyn DeviceGateway>)
        })
    }

    fn rejecting_factory(_access: DeviceAccess) -> GatewayFuture<'static, Box<dyn DeviceGateway>> {
        Box::pin(async move {
            Err(DeviceCommError::Rejected {
                name: "device".to_string(),
            })
        })
    }

    fn access() -> DeviceAccess {
        DeviceAccess {
            addr: "sim".to_string(),
            timeout: Duration::from_millis(100),
            fft_size: 512,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_transient_failures() {
        let policy = ExponentialBackoff::new(5, Duration::from_millis(50), Duration::from_secs(1));
        let gateway = connect_device(flaky_factory, access(), &policy).await.unwrap();
        assert!(gateway.describe().contains("simulated"));
        assert_eq!(FLAKY_CALLS.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_connect_gives_up_on_permanent_error() {
        let policy = ExponentialBackoff::default();
        assert!(matches!(
            connect_device(rejecting_factory, access(), &policy).await,
            Err(DeviceCommError::Rejected { .. })
        ));
        assert!(connect_device(rejecting_factory, access(), &NoRetry).await.is_err());
    }

    #[test]
    fn test_connect_policy_follows_attempts() {
        let single = DeviceConfig {
            connect_attempts: 1,
            ..DeviceConfig::default()
        };
        let policy = connect_policy(&single);
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.delay(0), Duration::ZERO);

        let policy = connect_policy(&DeviceConfig::default());
        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.delay(0), Duration::from_millis(200));
        assert!(policy.should_retry(0, &DeviceCommError::Disconnected));
    }

    #[tokio::test]
    async fn test_init_registers_tolerates_read_only_server() {
        // Answers every request with ERROR, like a server without writes.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut requests = 0;
            let mut buf = [0u8; 256];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return requests;
                }
                requests += 1;
                socket.write_all(b"ERROR").await.unwrap();
            }
        });

        let mut gw = TcpBramGateway::connect(&addr, Duration::from_secs(2))
            .await
            .unwrap();
        init_registers(&mut gw, &DeviceConfig::default()).await.unwrap();
        drop(gw);
        assert_eq!(server.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_init_registers_propagates_transport_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });
        let mut gw = TcpBramGateway::connect(&addr, Duration::from_secs(2))
            .await
            .unwrap();
        server.await.unwrap();
        let err = init_registers(&mut gw, &DeviceConfig::default())
            .await
            .unwrap_err();
        assert!(err.is_transient(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_init_registers_and_reset_counter() {
        let mut dev = SimulatedDevice::new(512);
        for _ in 0..4 {
            dev.read_register(ACC_CNT_REGISTER).await.unwrap();
        }
        let device = DeviceConfig {
            acc_len: 4096,
            gain: 7,
            gain_re_bin: 9,
            ..DeviceConfig::default()
        };
        init_registers(&mut dev, &device).await.unwrap();

        assert_eq!(dev.read_register("acc_len").await.unwrap(), 4096);
        assert_eq!(dev.read_register("acc_len_re_bin").await.unwrap(), 4096);
        assert_eq!(dev.read_register("gain").await.unwrap(), 7);
        assert_eq!(dev.read_register("gain_re_bin").await.unwrap(), 9);
        assert_eq!(dev.read_register("cnt_rst").await.unwrap(), 0);
        assert_eq!(dev.read_register(ACC_CNT_REGISTER).await.unwrap(), 0);
    }
}
