// SPDX-License-Identifier: Apache-2.0
// Copyright Authors of bpfman

//! Composes a synthesized dispatcher program out of a fixed template plus
//! the caller's component programs.
//!
//! Grounded on `original_source/lib/libxdp/libxdp.c`'s `gen_xdp_multiprog()`
//! (the rodata patch of `num_progs_enabled` / `chain_call_actions` before
//! load) and `bpfman-bpfman/bpfman/src/multiprog/xdp.rs`'s use of
//! `aya::{Ebpf, EbpfLoader}` plus `Extension::attach_to_program` to load the
//! template and splice components into its numbered stub slots.

use aya::{
    programs::{Extension, Xdp, XdpFlags},
    Ebpf, EbpfLoader,
};

use crate::{
    errors::Error,
    ordering,
    program::{Loaded, ProgramHandle},
};

/// Maximum number of programs one dispatcher can chain, fixed by the
/// number of stub slots (`prog0` .. `prog9`) compiled into the template
/// object.
pub const MAX_DISPATCHER_PROGRAMS: usize = 10;

const DISPATCHER_TEMPLATE_ENVVAR: &str = "XDP_DISPATCHER_OBJECT";
const DEFAULT_DISPATCHER_TEMPLATE_PATH: &str = "/usr/lib/xdp-multiprog/xdp_dispatcher.bpf.o";

/// Locates the compiled dispatcher template object, the way
/// `original_source/lib/libxdp/libxdp.c`'s `find_bpf_file()` resolves
/// libxdp's own dispatcher object from a well-known install path,
/// overridable by an environment variable for tests and packaging.
fn load_template() -> Result<Vec<u8>, Error> {
    let path = std::env::var(DISPATCHER_TEMPLATE_ENVVAR)
        .unwrap_or_else(|_| DEFAULT_DISPATCHER_TEMPLATE_PATH.to_string());
    crate::utils::read(&path)
}

/// A loaded dispatcher, ready to be attached to an interface or pinned.
pub struct Dispatcher {
    pub(crate) ebpf: Ebpf,
    pub(crate) num_programs: usize,
}

/// Sorts `handles` by priority, then composes a dispatcher
/// that chains them in that order, loading every not-yet-loaded component
/// as a function extension attached into the matching numbered slot.
///
/// Rejects an empty `handles` and a `handles` longer than
/// [`MAX_DISPATCHER_PROGRAMS`]. Any failure midway
/// through loading components leaves no program attached to any slot: the
/// whole composed `Ebpf` instance is dropped, unwinding every load.
pub fn compose(handles: &mut [ProgramHandle]) -> Result<Dispatcher, Error> {
    if handles.is_empty() {
        return Err(Error::InvalidArgument(
            "at least one program is required to compose a dispatcher".to_string(),
        ));
    }
    if handles.len() > MAX_DISPATCHER_PROGRAMS {
        return Err(Error::InvalidArgument(format!(
            "{} programs exceeds the dispatcher's {} slot limit",
            handles.len(),
            MAX_DISPATCHER_PROGRAMS
        )));
    }

    ordering::sort(handles);

    let num_progs_enabled = handles.len() as u8;
    let chain_call_actions: Vec<u32> = handles.iter().map(|h| h.chain_call_mask()).collect();

    let template = load_template()?;
    let mut ebpf = EbpfLoader::new()
        .set_global("num_progs_enabled", &num_progs_enabled, true)
        .set_global("chain_call_actions", chain_call_actions.as_slice(), true)
        .load(&template)?;

    let dispatcher_prog: &mut Xdp = ebpf
        .program_mut("xdp_dispatcher")
        .ok_or_else(|| Error::NotFound("dispatcher program not found in template".to_string()))?
        .try_into()?;
    dispatcher_prog.load()?;
    let dispatcher_fd = dispatcher_prog.fd()?.try_clone()?;

    for (i, handle) in handles.iter_mut().enumerate() {
        let target_fn = format!("prog{i}");
        match handle.loaded.take() {
            Some(Loaded::Extension(mut ext)) => {
                ext.set_attach_target(&dispatcher_fd, &target_fn)?;
                ext.load()?;
                handle.loaded = Some(Loaded::Extension(ext));
            }
            Some(other @ Loaded::Standalone(_)) => {
                // Already loaded standalone (e.g. by `from_id`); cannot be
                // re-parented into a dispatcher slot without reloading.
                handle.loaded = Some(other);
                return Err(Error::Unsupported(format!(
                    "program '{}' is already loaded standalone and cannot join a dispatcher",
                    handle.name_str()
                )));
            }
            None => return Err(Error::NotLoaded),
        }
        handle.composed = true;
    }

    Ok(Dispatcher {
        ebpf,
        num_programs: handles.len(),
    })
}

/// Attaches `dispatcher` to `ifindex` in `flags` mode, returning its link
/// for the caller to keep, pin, or drop.
pub(crate) fn attach_to_interface(
    dispatcher: &mut Dispatcher,
    ifindex: u32,
    flags: XdpFlags,
) -> Result<aya::programs::xdp::XdpLinkId, Error> {
    let prog: &mut Xdp = dispatcher
        .ebpf
        .program_mut("xdp_dispatcher")
        .ok_or(Error::NotLoaded)?
        .try_into()?;
    let ifname = crate::utils::ifname_from_index(ifindex)?;
    let link_id = prog.attach(&ifname, flags)?;
    Ok(link_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_rejected() {
        let mut handles: Vec<ProgramHandle> = Vec::new();
        assert!(matches!(
            compose(&mut handles),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn too_many_programs_is_rejected() {
        use std::rc::Rc;
        let mut handles: Vec<ProgramHandle> = (0..MAX_DISPATCHER_PROGRAMS + 1)
            .map(|i| {
                let source = Rc::new(crate::program::SourceObject::parse(&[]).unwrap());
                ProgramHandle::from_source_object(&source, format!("p{i}").into_bytes()).unwrap()
            })
            .collect();
        assert!(matches!(
            compose(&mut handles),
            Err(Error::InvalidArgument(_))
        ));
    }
}
