/*
 * Copyright 2025 OmniFS contributors
 *
 * This file is part of OmniFS.
 *
 * OmniFS is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * OmniFS is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * OmniFS. If not, see <https://www.gnu.org/licenses/>.
 */

//! Core of OmniFS: a user-multiplexed virtual filesystem stored inside one
//! host file, the container.
//!
//! The container is self-describing. It carries its own header, user table,
//! metadata table, allocation bitmap and block region, with fixed binary
//! layouts ([`layout`]). File contents and directory child lists both live
//! in singly linked block chains ([`device`], [`dir`]); file payloads go
//! through an optional byte-permutation ([`codec`]).
//!
//! A mounted container ([`instance::FsInstance`]) is driven either directly,
//! for embedders, or through the serializing request dispatcher
//! ([`dispatch::Engine`]), which is the only model under which the on-disk
//! invariants are guaranteed: one worker, one FIFO queue, no concurrent
//! operations on the same container.

use std::fmt;
use std::process::exit;

pub mod bitmap;
pub mod codec;
pub mod config;
pub mod device;
pub mod dir;
pub mod dispatch;
pub mod error;
pub mod file;
pub mod fsck;
pub mod instance;
pub mod layout;
pub mod meta;
pub mod prompt;
pub mod session;
pub mod stats;
pub mod user;
pub mod util;
pub mod views;

#[cfg(test)]
mod testutil;

/// Writes an error to stderr, then exits.
pub fn error<M: fmt::Display>(bin: &str, msg: M) -> ! {
    eprintln!("{bin}: error: {msg}");
    exit(1);
}
