// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod cache;
pub mod command;
pub mod device;
pub mod error;
pub mod fetcher;
pub mod mode;
pub mod pacing;
pub mod policies;
pub mod record;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub use cache::{AccumulationCache, PollOutcome};
pub use command::{Command, CommandKind, Response};
pub use device::{DeviceGateway, GatewayFuture, Sideband};
pub use error::{ControllerLinkError, DeviceCommError, FramingError, StorageError};
pub use fetcher::{Spectrum, SpectrumFetcher, SpectrumWindow};
pub use mode::Mode;
pub use pacing::ReadPacer;
pub use record::{AccumulationCount, SpectrumBuffer, SpectrumSnapshot, StatusRecord};
