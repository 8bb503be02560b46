// SPDX-License-Identifier: Apache-2.0
// Copyright Authors of bpfman

//! Cross-process exclusive advisory locking on the bpffs `xdp` subdirectory.

use std::{
    fs::File,
    os::fd::AsFd,
    path::Path,
};

use nix::fcntl::{flock, FlockArg};

use crate::errors::Error;

/// An open, exclusively `flock`'d handle on a directory.
///
/// Acquisition blocks until the lock is available. The lock — and the
/// directory fd it was taken on — is released when this guard drops, on
/// every exit path including an error unwind or a signal-interrupted
/// caller propagating out.
#[derive(Debug)]
pub struct DirLock {
    _fd: File,
}

impl DirLock {
    /// Opens `dir` and takes an exclusive advisory lock on it.
    ///
    /// The protocol is cooperative: it only excludes other callers going
    /// through this same path, not arbitrary filesystem access.
    pub fn acquire(dir: &Path) -> Result<DirLock, Error> {
        let fd = File::open(dir).map_err(|e| Error::from_io("opening lock directory", e))?;
        flock(fd.as_fd(), FlockArg::LockExclusive)
            .map_err(|errno| Error::from_io("flock", std::io::Error::from(errno)))?;
        Ok(DirLock { _fd: fd })
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        // Best-effort: closing the fd on drop also releases the flock, but
        // we unlock explicitly first so a failure here is observable in
        // logs rather than silently deferred to `File`'s own close.
        if let Err(e) = flock(self._fd.as_fd(), FlockArg::Unlock) {
            log::warn!("failed to release bpffs xdp directory lock cleanly: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn acquire_and_release_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let lock = DirLock::acquire(dir.path()).unwrap();
        drop(lock);
        // A second acquisition must succeed now that the first was released.
        let _lock2 = DirLock::acquire(dir.path()).unwrap();
    }

    #[test]
    fn missing_directory_is_not_found() {
        let result = DirLock::acquire(Path::new("/nonexistent/for/lock/test"));
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn second_acquirer_blocks_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        let barrier = Arc::new(Barrier::new(2));

        let first = DirLock::acquire(&path).unwrap();
        let barrier2 = barrier.clone();
        let path2 = path.clone();
        let handle = thread::spawn(move || {
            barrier2.wait();
            let _second = DirLock::acquire(&path2).unwrap();
        });

        barrier.wait();
        // Give the second thread a moment to actually block on the lock.
        thread::sleep(std::time::Duration::from_millis(50));
        drop(first);
        handle.join().unwrap();
    }
}
