// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use bytes::Bytes;

use crate::Mode;

/// Raw controller command, exactly as left over after status extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command(Bytes);

impl Command {
    pub fn new(raw: impl Into<Bytes>) -> Self {
        Command(raw.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Classified controller command handled by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    /// `?wordread acc_cnt`
    ReadAccumulation,
    /// `?read bram0`
    ReadSpectrum,
    /// `?progdev`
    ProgramDevice,
    /// `?wordwrite integ_mode 0 0` / `?wordwrite integ_mode 0 1`
    SetMode(Mode),
    /// Any other `?wordwrite`
    WordWrite,
    /// Any other `?write`
    Write,
    /// Anything else; carries the leading verb (without `?`) if one was found.
    Unknown(Option<String>),
}

/// Encoded reply for the controller, `\n` terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response(Bytes);

impl Response {
    pub fn new(raw: impl Into<Bytes>) -> Self {
        Response(raw.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}
