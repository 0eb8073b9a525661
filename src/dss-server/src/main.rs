// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod config;
mod dispatch;
mod listener;
mod persist;
mod router;
mod startup;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use dss_app::{init_logging, ConfigFile};
use dss_backend::{register_builtin_backends_on, DeviceAccess, RegistrationContext};
use dss_core::{AccumulationCache, DynResult, ReadPacer, SpectrumFetcher};

use config::ServerConfig;
use listener::SessionContext;
use persist::Persister;
use router::Router;

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - spectrometer control bridge");
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Parser)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print example configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// IP address for the controller listener
    #[arg(short = 'l', long = "listen")]
    listen: Option<IpAddr>,
    /// Port for the controller listener
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,
    /// Device block-memory server as <host>:<port>
    #[arg(short = 'd', long = "device", value_name = "HOST:PORT")]
    device: Option<String>,
    /// Device backend (e.g. tcp, sim)
    #[arg(short = 'b', long = "backend")]
    backend: Option<String>,
}

/// Split `<host>:<port>`, accepting bracketed IPv6 hosts.
fn parse_device_addr(addr: &str) -> DynResult<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or("Device address must be '<host>:<port>'")?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err("Device address must be '<host>:<port>' (empty host)".into());
    }
    let port: u16 = port
        .parse()
        .map_err(|e| format!("Invalid device port '{}': {}", port, e))?;
    Ok((host.to_string(), port))
}

fn apply_cli_overrides(cli: &Cli, cfg: &mut ServerConfig) -> DynResult<()> {
    if let Some(listen) = cli.listen {
        cfg.listen.listen = listen;
    }
    if let Some(port) = cli.port {
        cfg.listen.port = port;
    }
    if let Some(ref addr) = cli.device {
        let (host, port) = parse_device_addr(addr)?;
        cfg.device.host = host;
        cfg.device.port = port;
    }
    if let Some(ref backend) = cli.backend {
        cfg.device.backend = backend.clone();
    }
    Ok(())
}

async fn join_or_abort(name: &str, handle: JoinHandle<()>) {
    let abort = handle.abort_handle();
    if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
        warn!("{} did not stop in time, aborting", name);
        abort.abort();
    }
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let mut registry = RegistrationContext::new();
    register_builtin_backends_on(&mut registry);

    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", ServerConfig::example_combined_toml());
        return Ok(());
    }

    let (mut cfg, config_path) = if let Some(ref path) = cli.config {
        let cfg = ServerConfig::load_from_file(path)?;
        (cfg, Some(path.clone()))
    } else {
        ServerConfig::load_from_default_paths()?
    };
    apply_cli_overrides(&cli, &mut cfg)?;
    cfg.validate()
        .map_err(|e| format!("Invalid server configuration: {}", e))?;

    init_logging(cfg.general.log_level.as_deref());

    if let Some(ref path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }
    info!(
        "Starting dss-bridge {} (built {})",
        env!("CARGO_PKG_VERSION"),
        env!("DSS_SERVER_BUILD_DATE")
    );

    let factory = registry.factory(&cfg.device.backend).ok_or_else(|| {
        format!(
            "Unknown device backend '{}' (available: {})",
            cfg.device.backend,
            registry.registered_backends().join(", ")
        )
    })?;
    let access = DeviceAccess {
        addr: cfg.device.addr(),
        timeout: cfg.device.timeout(),
        fft_size: cfg.spectrometer.fft_size,
    };
    info!(
        "Device backend: {} ({})",
        cfg.device.backend, access.addr
    );
    let retry = startup::connect_policy(&cfg.device);
    let mut gateway = startup::connect_device(factory, access, retry.as_ref()).await?;

    match cfg.device.bitstream.as_deref() {
        Some(path) => info!("Bitstream (programmed externally): {}", path),
        None => info!("No bitstream configured; assuming the device is programmed"),
    }
    if cfg.device.init_registers {
        startup::init_registers(gateway.as_mut(), &cfg.device).await?;
    }

    let mut task_handles: Vec<(&str, JoinHandle<()>)> = Vec::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (persist_tx, persist_rx) = mpsc::unbounded_channel();
    let persister = Persister::new(cfg.storage.dir_path(), cfg.storage.spectra_log);
    info!("Storage directory: {}", cfg.storage.dir_path().display());
    let persist_handle = tokio::spawn(persist::run_persist(persister, persist_rx));

    let cache = AccumulationCache::new(
        SpectrumFetcher::new(ReadPacer::new(cfg.spectrometer.read_pacing())),
        cfg.spectrometer.window(),
    );
    let mut router = Router::new(
        gateway,
        cache,
        cfg.spectrometer.initial_mode,
        cfg.framing.unknown_commands,
    );
    if cfg.storage.spectra_log {
        router = router.with_spectra_sink(persist_tx.clone());
    }
    info!("Initial integration mode: {}", router.mode());

    let (req_tx, req_rx) = mpsc::unbounded_channel();
    task_handles.push((
        "dispatch worker",
        tokio::spawn(dispatch::run_dispatch(router, req_rx, shutdown_rx.clone())),
    ));

    let listen_addr = SocketAddr::from((cfg.listen.listen, cfg.listen.port));
    let tcp = TcpListener::bind(listen_addr).await?;
    let ctx = SessionContext {
        read_buffer: cfg.listen.read_buffer,
        write_timeout: cfg.listen.write_timeout(),
        idle_timeout: cfg.listen.idle_timeout(),
        packet_length: cfg.framing.packet_length,
        requests: req_tx,
        persist: persist_tx,
    };
    let listener_shutdown_rx = shutdown_rx.clone();
    task_handles.push((
        "controller listener",
        tokio::spawn(listener::run_listener(tcp, ctx, listener_shutdown_rx)),
    ));

    signal::ctrl_c().await?;
    info!("Ctrl+C received, shutting down");
    let _ = shutdown_tx.send(true);

    for (name, handle) in task_handles {
        join_or_abort(name, handle).await;
    }
    // Every sender is gone now; the persist worker drains and exits.
    join_or_abort("persist worker", persist_handle).await;
    Ok(())
}
