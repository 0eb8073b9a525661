// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Controller command classification and reply encoding.
//!
//! Commands carry no terminator; they are recognised by fixed ASCII prefixes.
//! Replies are `!<verb> ok[ <payload>]\n`.

use dss_core::record::{AccumulationCount, SpectrumBuffer};
use dss_core::{Command, CommandKind, Mode, Response};

const READ_ACC_CNT: &[u8] = b"?wordread acc_cnt";
const READ_BRAM0: &[u8] = b"?read bram0";
const PROGDEV: &[u8] = b"?progdev";
const INTEG_MODE_CAL: &[u8] = b"?wordwrite integ_mode 0 0";
const INTEG_MODE_SPLOBS: &[u8] = b"?wordwrite integ_mode 0 1";
const WORDWRITE: &[u8] = b"?wordwrite";
const WRITE: &[u8] = b"?write";

/// Reply to `?progdev`; the device is programmed before the controller connects.
pub const PROGDEV_REPLY: &[u8] = b"!progdev ok 525\n";

/// Classify a raw command. More specific prefixes are tested first.
pub fn classify(command: &Command) -> CommandKind {
    let raw = command.as_bytes();
    if raw.starts_with(READ_ACC_CNT) {
        CommandKind::ReadAccumulation
    } else if raw.starts_with(READ_BRAM0) {
        CommandKind::ReadSpectrum
    } else if raw.starts_with(PROGDEV) {
        CommandKind::ProgramDevice
    } else if raw.starts_with(INTEG_MODE_CAL) {
        CommandKind::SetMode(Mode::Cal)
    } else if raw.starts_with(INTEG_MODE_SPLOBS) {
        CommandKind::SetMode(Mode::Splobs)
    } else if raw.starts_with(WORDWRITE) {
        CommandKind::WordWrite
    } else if raw.starts_with(WRITE) {
        CommandKind::Write
    } else {
        CommandKind::Unknown(leading_verb(raw))
    }
}

fn leading_verb(raw: &[u8]) -> Option<String> {
    let rest = raw.strip_prefix(b"?")?;
    let verb: Vec<u8> = rest
        .iter()
        .copied()
        .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_' || *b == b'-')
        .collect();
    if verb.is_empty() {
        None
    } else {
        String::from_utf8(verb).ok()
    }
}

/// Reply builders.
pub mod encode {
    use super::*;

    pub fn wordread_ok(count: AccumulationCount) -> Response {
        Response::new(format!("!wordread ok {}\n", count.to_wire_hex()).into_bytes())
    }

    pub fn read_ok(spectrum: &SpectrumBuffer) -> Response {
        let payload = spectrum.to_be_bytes();
        let mut out = Vec::with_capacity(b"!read ok ".len() + payload.len() + 1);
        out.extend_from_slice(b"!read ok ");
        out.extend_from_slice(&payload);
        out.push(b'\n');
        Response::new(out)
    }

    pub fn progdev_ok() -> Response {
        Response::new(PROGDEV_REPLY)
    }

    pub fn wordwrite_ok() -> Response {
        Response::new(&b"!wordwrite ok\n"[..])
    }

    pub fn write_ok() -> Response {
        Response::new(&b"!write ok\n"[..])
    }

    /// Negative reply for unrecognised commands when rejection is enabled.
    pub fn fail(verb: Option<&str>) -> Response {
        Response::new(format!("!{} fail\n", verb.unwrap_or("unknown")).into_bytes())
    }
}
