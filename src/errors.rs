// SPDX-License-Identifier: Apache-2.0
// Copyright Authors of bpfman

use thiserror::Error;

/// The error taxonomy surfaced by this crate.
///
/// Every public operation returns one of these variants; callers match on
/// them rather than on the wrapped library errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("An error occurred. {0}")]
    Other(String),

    #[error(transparent)]
    BpfProgramError(#[from] aya::programs::ProgramError),

    #[error(transparent)]
    BpfLoadError(#[from] aya::EbpfError),

    #[error(transparent)]
    BtfError(#[from] aya_obj::btf::BtfError),

    #[error("failed to pin link: {0}")]
    UnableToPinLink(#[source] aya::pin::PinError),

    #[error("failed to pin program: {0}")]
    UnableToPinProgram(#[source] aya::pin::PinError),

    #[error("dispatcher is not loaded")]
    NotLoaded,

    #[error("dispatcher attach on ifindex {ifindex} failed in mode {mode}: {source}")]
    AttachFailed {
        ifindex: u32,
        mode: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Maps a raw `errno`-shaped I/O error onto this crate's own taxonomy,
    /// the way the mount resolver, lock manager and pin store need to: most
    /// `io::Error`s from this crate's syscalls are really `NotFound` or
    /// `PermissionDenied`, not generic I/O faults.
    pub(crate) fn from_io(context: &str, err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => Error::NotFound(format!("{context}: {err}")),
            ErrorKind::PermissionDenied => Error::PermissionDenied(format!("{context}: {err}")),
            _ => Error::Io(err),
        }
    }
}
