// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::fmt;

use serde::{Deserialize, Serialize};

/// Acquisition mode selected by the controller through `integ_mode`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Fixed 512-channel calibration window from the re-binned memories.
    Cal,
    /// Full observation window from the primary spectrometer memories.
    #[default]
    Splobs,
}

impl Mode {
    /// Block-memory name prefix targeted in this mode.
    pub fn namespace(self) -> &'static str {
        match self {
            Mode::Cal => "re_bin_synth",
            Mode::Splobs => "synth",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Cal => "cal",
            Mode::Splobs => "splobs",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
