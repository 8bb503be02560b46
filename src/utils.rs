// SPDX-License-Identifier: Apache-2.0
// Copyright Authors of bpfman

use std::{fs::OpenOptions, io::Read, os::unix::fs::OpenOptionsExt, path::Path};

use log::debug;
use nix::net::if_::if_nametoindex;

use crate::errors::Error;

/// Like `std::fs::read`, but with `O_NOCTTY` set so opening a compiled
/// program object can never accidentally attach a controlling terminal.
pub(crate) fn read<P: AsRef<Path>>(path: P) -> Result<Vec<u8>, Error> {
    let mut data = vec![];
    OpenOptions::new()
        .custom_flags(nix::libc::O_NOCTTY)
        .read(true)
        .open(path)
        .map_err(|e| Error::from_io("can't open file", e))?
        .read_to_end(&mut data)
        .map_err(|e| Error::from_io("can't read file", e))?;
    Ok(data)
}

/// Resolves an interface name to its kernel ifindex.
pub fn get_ifindex(iface: &str) -> Result<u32, Error> {
    debug!("resolving ifindex for interface {iface}");
    if_nametoindex(iface).map_err(|_| Error::InvalidArgument(format!("invalid interface {iface}")))
}

/// Resolves an ifindex back to its interface name, the direction the
/// attacher needs when handing a name to `aya::programs::Xdp::attach`.
pub(crate) fn ifname_from_index(ifindex: u32) -> Result<String, Error> {
    nix::net::if_::if_indextoname(ifindex as nix::libc::c_uint)
        .map_err(|_| Error::InvalidArgument(format!("no interface with ifindex {ifindex}")))
        .map(|name| name.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_interface_is_invalid_argument() {
        let result = get_ifindex("xdp-multiprog-test-nonexistent-iface-0");
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
