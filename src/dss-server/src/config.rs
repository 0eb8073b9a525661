// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for the bridge.
//!
//! Config is loaded from the `[dss-server]` section of `dss-bridge.toml`.
//! Default search order:
//! 1. Path specified via `--config` CLI argument
//! 2. `./dss-bridge.toml`
//! 3. `~/.config/dss-bridge/dss-bridge.toml`
//! 4. `/etc/dss-bridge/dss-bridge.toml`

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use dss_app::ConfigFile;
use dss_core::{Mode, SpectrumWindow};
use dss_protocol::DEFAULT_PACKET_LENGTH;

/// Top-level server configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// General settings
    pub general: GeneralConfig,
    /// Controller listener
    pub listen: ListenConfig,
    /// Spectrometer connection and register initialisation
    pub device: DeviceConfig,
    /// Spectrum window and acquisition mode
    pub spectrometer: SpectrometerConfig,
    /// Controller stream framing
    pub framing: FramingConfig,
    /// Status and spectra logs
    pub storage: StorageConfig,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
}

/// Controller-facing TCP listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// IP address to listen on
    pub listen: IpAddr,
    /// TCP port to listen on
    pub port: u16,
    /// Socket read size in bytes
    pub read_buffer: usize,
    /// Per-response write timeout
    pub write_timeout_ms: u64,
    /// Drop a silent controller after this many seconds (0 disables)
    pub idle_timeout_secs: u64,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            listen: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 1234,
            read_buffer: 2048,
            write_timeout_ms: 2000,
            idle_timeout_secs: 0,
        }
    }
}

impl ListenConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

/// Device backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Backend name ("tcp" or "sim")
    pub backend: String,
    /// Block-memory server host (tcp backend)
    pub host: String,
    /// Block-memory server port (tcp backend)
    pub port: u16,
    /// Per-request timeout
    pub timeout_ms: u64,
    /// Connection attempts at startup
    pub connect_attempts: u32,
    /// Base delay between startup connection attempts
    pub retry_base_delay_ms: u64,
    /// Bitstream the external driver programs; logged only
    pub bitstream: Option<String>,
    /// Write accumulation length and gains, then reset the counters
    pub init_registers: bool,
    /// Accumulation length (`acc_len` and `acc_len_re_bin`)
    pub acc_len: u32,
    /// Gain of the primary spectrometer
    pub gain: u32,
    /// Gain of the re-binned spectrometer
    pub gain_re_bin: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            backend: "tcp".to_string(),
            host: "127.0.0.1".to_string(),
            port: 12345,
            timeout_ms: 1000,
            connect_attempts: 5,
            retry_base_delay_ms: 200,
            bitstream: None,
            init_registers: true,
            acc_len: 1 << 13,
            gain: 1 << 20,
            gain_re_bin: 1 << 20,
        }
    }
}

impl DeviceConfig {
    pub fn addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Spectrum window fetched in `splobs` mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrometerConfig {
    /// Full FFT span in channels
    pub fft_size: u32,
    /// Channels fetched per refresh
    pub channel_count: u32,
    /// First fetched channel
    pub first_channel: u32,
    /// Mode before the controller selects one
    pub initial_mode: Mode,
    /// Minimum gap between consecutive block-memory reads
    pub read_pacing_us: u64,
}

impl Default for SpectrometerConfig {
    fn default() -> Self {
        Self {
            fft_size: 8192,
            channel_count: 8192,
            first_channel: 0,
            initial_mode: Mode::Splobs,
            read_pacing_us: 500,
        }
    }
}

impl SpectrometerConfig {
    pub fn window(&self) -> SpectrumWindow {
        SpectrumWindow::new(self.first_channel, self.fft_size, self.channel_count)
    }

    pub fn read_pacing(&self) -> Duration {
        Duration::from_micros(self.read_pacing_us)
    }
}

/// What to do with commands outside the known vocabulary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownCommandPolicy {
    /// No reply at all
    #[default]
    Drop,
    /// Reply `!<verb> fail`
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FramingConfig {
    /// Status record length including the `ST` marker
    pub packet_length: usize,
    pub unknown_commands: UnknownCommandPolicy,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            packet_length: DEFAULT_PACKET_LENGTH,
            unknown_commands: UnknownCommandPolicy::Drop,
        }
    }
}

fn default_storage_dir() -> String {
    if let Some(data_dir) = dirs::data_dir() {
        return data_dir
            .join("dss-bridge")
            .join("bin_spectra_and_states")
            .to_string_lossy()
            .to_string();
    }
    "bin_spectra_and_states".to_string()
}

/// Persisted logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for `<UTC>_STATE` and `<UTC>_SPECTRA.csv`
    pub dir: String,
    /// Append every refreshed spectrum to the CSV log
    pub spectra_log: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
            spectra_log: false,
        }
    }
}

impl StorageConfig {
    pub fn dir_path(&self) -> PathBuf {
        PathBuf::from(self.dir.trim())
    }
}

impl ServerConfig {
    /// Check value ranges the type system cannot express.
    pub fn validate(&self) -> Result<(), String> {
        validate_log_level(self.general.log_level.as_deref())?;

        if self.listen.port == 0 {
            return Err("[listen].port must be > 0".to_string());
        }
        if self.listen.read_buffer == 0 {
            return Err("[listen].read_buffer must be > 0".to_string());
        }
        if self.listen.write_timeout_ms == 0 {
            return Err("[listen].write_timeout_ms must be > 0".to_string());
        }

        if self.device.backend.trim().is_empty() {
            return Err("[device].backend must not be empty".to_string());
        }
        if self.device.port == 0 {
            return Err("[device].port must be > 0".to_string());
        }
        if self.device.timeout_ms == 0 {
            return Err("[device].timeout_ms must be > 0".to_string());
        }
        if self.device.connect_attempts == 0 {
            return Err("[device].connect_attempts must be > 0".to_string());
        }

        self.spectrometer
            .window()
            .validate()
            .map_err(|e| format!("[spectrometer] {}", e))?;

        if self.framing.packet_length < 2 {
            return Err("[framing].packet_length must be >= 2".to_string());
        }

        if self.storage.dir.trim().is_empty() {
            return Err("[storage].dir must not be empty".to_string());
        }
        Ok(())
    }

    /// Example file with every section filled in, wrapped in `[dss-server]`.
    pub fn example_combined_toml() -> String {
        #[derive(serde::Serialize)]
        struct Wrapper {
            #[serde(rename = "dss-server")]
            inner: ServerConfig,
        }
        let example = ServerConfig {
            general: GeneralConfig {
                log_level: Some("info".to_string()),
            },
            device: DeviceConfig {
                host: "192.168.1.12".to_string(),
                bitstream: Some("dss_ideal_8192ch_32bits_reset_1966mhz_cx.fpg".to_string()),
                ..DeviceConfig::default()
            },
            ..ServerConfig::default()
        };
        toml::to_string_pretty(&Wrapper { inner: example }).unwrap_or_default()
    }
}

impl ConfigFile for ServerConfig {
    fn section_key() -> &'static str {
        "dss-server"
    }
}

fn validate_log_level(level: Option<&str>) -> Result<(), String> {
    if let Some(level) = level {
        match level {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(format!(
                    "[general].log_level '{}' is invalid (expected one of: trace, debug, info, warn, error)",
                    level
                ))
            }
        }
    }
    Ok(())
}
