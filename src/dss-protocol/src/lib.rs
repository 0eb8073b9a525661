// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod codec;
pub mod framing;

pub use codec::{classify, encode};
pub use framing::{Frame, FrameSplitter, DEFAULT_PACKET_LENGTH, STATUS_MARKER};
