// SPDX-License-Identifier: Apache-2.0
// Copyright Authors of bpfman

//! Mount resolution for the kernel's bpf pseudo-filesystem.

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Mutex,
};

use nix::sys::statfs::{statfs, BPF_FS_MAGIC};

use crate::errors::Error;

const XDP_BPFFS_ENVVAR: &str = "XDP_BPFFS";
const DEFAULT_BPFFS_MOUNT: &str = "/sys/fs/bpf";

// A `Mutex` rather than a `OnceLock`: tests need a private reset hook so
// successive calls can be pointed at different scratch bpffs trees, which
// a write-once cell can't support.
static BPFFS_SUBDIR: Mutex<Option<PathBuf>> = Mutex::new(None);

fn is_valid_bpffs(mnt: &Path) -> bool {
    match statfs(mnt) {
        Ok(st) => st.filesystem_type() == BPF_FS_MAGIC,
        Err(_) => false,
    }
}

fn resolve_mountpoint() -> Result<PathBuf, Error> {
    let candidate = std::env::var(XDP_BPFFS_ENVVAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_BPFFS_MOUNT));

    if is_valid_bpffs(&candidate) {
        Ok(candidate)
    } else {
        Err(Error::NotFound(format!(
            "no bpffs mount found at {}",
            candidate.display()
        )))
    }
}

/// Locates (and caches) the library-owned `<mount>/xdp` subdirectory,
/// creating it with owner-only `rwx` permissions if absent.
///
/// The answer is cached process-wide on first success;
/// later calls return the cached path without touching the filesystem
/// again.
pub fn bpffs_subdir() -> Result<PathBuf, Error> {
    let mut cache = BPFFS_SUBDIR.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(dir) = cache.as_ref() {
        return Ok(dir.clone());
    }

    let mnt = resolve_mountpoint()?;
    let dir = mnt.join("xdp");

    match fs::create_dir(&dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(Error::from_io("creating bpffs xdp subdirectory", e)),
    }

    fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))
        .map_err(|e| Error::from_io("setting bpffs xdp subdirectory permissions", e))?;

    *cache = Some(dir.clone());
    Ok(dir)
}

/// Test-only hook to forget the cached mountpoint so each test can point
/// `$XDP_BPFFS` at its own scratch directory.
#[cfg(test)]
pub(crate) fn reset_cache_for_test() {
    *BPFFS_SUBDIR.lock().unwrap_or_else(|e| e.into_inner()) = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    // Serializes tests in this module: they all mutate the same
    // process-wide cache and the `XDP_BPFFS` environment variable.
    static TEST_LOCK: StdMutex<()> = StdMutex::new(());

    #[test]
    fn default_mountpoint_is_bpffs_path() {
        assert_eq!(DEFAULT_BPFFS_MOUNT, "/sys/fs/bpf");
    }

    #[test]
    fn envvar_name_is_well_known() {
        assert_eq!(XDP_BPFFS_ENVVAR, "XDP_BPFFS");
    }

    #[test]
    fn unresolvable_mount_is_not_found() {
        let _guard = TEST_LOCK.lock().unwrap();
        reset_cache_for_test();
        unsafe {
            std::env::set_var(XDP_BPFFS_ENVVAR, "/nonexistent/path/for/test");
        }
        let result = bpffs_subdir();
        unsafe {
            std::env::remove_var(XDP_BPFFS_ENVVAR);
        }
        reset_cache_for_test();
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
