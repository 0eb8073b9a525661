// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Device backends selectable by name from `[device].backend`: the TCP
//! client for the board's block-memory server and an in-memory
//! spectrometer for running without hardware.

use std::collections::HashMap;
use std::time::Duration;

use dss_core::{DeviceGateway, GatewayFuture};

#[cfg(feature = "sim")]
mod sim;
#[cfg(feature = "tcp")]
mod tcp;

#[cfg(feature = "sim")]
pub use sim::SimulatedDevice;
#[cfg(feature = "tcp")]
pub use tcp::TcpBramGateway;

/// Connection details for instantiating a device backend.
#[derive(Debug, Clone)]
pub struct DeviceAccess {
    /// `host:port` of the device's block-memory server.
    pub addr: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// FFT size the simulated device lays out its memories for.
    pub fft_size: u32,
}

pub type BackendFactory = fn(DeviceAccess) -> GatewayFuture<'static, Box<dyn DeviceGateway>>;

/// Name to factory table consulted once at startup.
#[derive(Clone)]
pub struct RegistrationContext {
    factories: HashMap<String, BackendFactory>,
}

impl RegistrationContext {
    /// Create a new empty registration context.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a backend factory under a stable name (e.g. "tcp").
    pub fn register_backend(&mut self, name: &str, factory: BackendFactory) {
        let key = normalize_name(name);
        self.factories.insert(key, factory);
    }

    /// Check whether a backend name is registered.
    pub fn is_backend_registered(&self, name: &str) -> bool {
        let key = normalize_name(name);
        self.factories.contains_key(&key)
    }

    /// List registered backend names.
    pub fn registered_backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Look up the factory registered under `name`.
    pub fn factory(&self, name: &str) -> Option<BackendFactory> {
        self.factories.get(&normalize_name(name)).copied()
    }
}

impl Default for RegistrationContext {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_name(name: &str) -> String {
    name.to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Register all built-in backends enabled by features on a context.
pub fn register_builtin_backends_on(context: &mut RegistrationContext) {
    #[cfg(feature = "tcp")]
    context.register_backend("tcp", tcp_factory);
    #[cfg(feature = "sim")]
    context.register_backend("sim", sim_factory);
}

#[cfg(feature = "tcp")]
fn tcp_factory(access: DeviceAccess) -> GatewayFuture<'static, Box<dyn DeviceGateway>> {
    Box::pin(async move {
        let gateway = TcpBramGateway::connect(&access.addr, access.timeout).await?;
        Ok(Box::new(gateway) as Box<dyn DeviceGateway>)
    })
}

#[cfg(feature = "sim")]
fn sim_factory(access: DeviceAccess) -> GatewayFuture<'static, Box<dyn DeviceGateway>> {
    Box::pin(async move {
        Ok(Box::new(SimulatedDevice::new(access.fft_size)) as Box<dyn DeviceGateway>)
    })
}
