// SPDX-License-Identifier: Apache-2.0
// Copyright Authors of bpfman

//! Compose, load, and attach multiple XDP programs to a single network
//! interface by synthesizing a dispatcher program that chains them.
//!
//! The kernel only allows one XDP program per interface; this crate works
//! around that the way `libxdp` does, by generating a small dispatcher
//! program at runtime that calls each caller-supplied program in turn as
//! a BPF function extension, honoring per-program priority and chain-call
//! configuration read from each program's own compiled type info.

pub mod action;
mod attach;
pub mod config;
mod dispatcher;
pub mod errors;
mod lock;
mod metadata;
mod mount;
mod ordering;
mod pin;
pub mod program;
mod utils;

pub use action::{Action, ChainCallBitmap};
pub use attach::{attach, Attachment};
pub use config::{AttachMode, Config};
pub use dispatcher::{Dispatcher, MAX_DISPATCHER_PROGRAMS};
pub use errors::Error;
pub use program::{ProgramHandle, SourceObject};
pub use utils::get_ifindex;

/// Removes a previously pinned dispatcher (and its components) for the
/// given interface index, detaching nothing that isn't already pinned.
pub fn unpin(ifindex: u32) -> Result<(), Error> {
    pin::unpin_multiprog(ifindex)
}
