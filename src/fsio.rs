//! Small-file I/O against the cgroup pseudo-filesystem
//!
//! Interface files hold one short value each; the kernel applies a write
//! atomically and accepts exactly one value per write(2). Directory locks
//! are advisory flocks on an open directory descriptor.

use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::Path;
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::unistd::{access, AccessFlags};

use crate::error::{CgroupError, Result};

/// Largest integer value we expect to read back from an interface file
const MAX_INT_LEN: usize = 64;

/// Read a decimal integer from a small file
pub fn read_i64(path: &Path) -> Result<i64> {
    let text = read_str(path, MAX_INT_LEN)?;
    text.trim()
        .parse()
        .map_err(|_| CgroupError::parse(path, text.trim()))
}

/// Write a decimal integer to an interface file
pub fn write_i64(path: &Path, value: i64) -> Result<()> {
    std::fs::write(path, value.to_string()).map_err(|e| CgroupError::io("write", path, e))
}

/// Read at most `max` bytes from a file; the trailing newline is trimmed
pub fn read_str(path: &Path, max: usize) -> Result<String> {
    let file = File::open(path).map_err(|e| CgroupError::io("open", path, e))?;
    let mut text = String::new();
    file.take(max as u64)
        .read_to_string(&mut text)
        .map_err(|e| CgroupError::io("read", path, e))?;
    if text.ends_with('\n') {
        text.pop();
    }
    Ok(text)
}

/// Write a string value to an interface file
pub fn write_str(path: &Path, value: &str) -> Result<()> {
    std::fs::write(path, value).map_err(|e| CgroupError::io("write", path, e))
}

/// Parse a multi-line pid list (the cgroup.procs format)
pub fn read_pids(path: &Path) -> Result<Vec<i64>> {
    let mut file = File::open(path).map_err(|e| CgroupError::io("open", path, e))?;
    let mut text = String::new();
    // procs files are small; a single read keeps the pid set consistent
    file.read_to_string(&mut text)
        .map_err(|e| CgroupError::io("read", path, e))?;

    let mut pids = Vec::new();
    for token in text.split_whitespace() {
        let pid = token
            .parse()
            .map_err(|_| CgroupError::parse(path, token))?;
        pids.push(pid);
    }
    Ok(pids)
}

/// Open an interface file for pid-at-a-time writes
pub fn open_for_write(path: &Path) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| CgroupError::io("open", path, e))
}

/// access(2) probe; true when every requested permission bit is granted
pub fn access_ok(path: &Path, flags: AccessFlags) -> bool {
    access(path, flags).is_ok()
}

/// Advisory exclusive lock on a directory. Dropping the guard closes the
/// descriptor and releases the lock, so an error return can never leak it.
pub struct DirLock {
    _lock: Flock<File>,
}

/// Open `path` and take an exclusive flock on it.
///
/// With `block` unset, contention is reported as `Ok(None)` rather than an
/// error; callers treat it the same way the kernel treats EWOULDBLOCK.
pub fn lock_dir(path: &Path, block: bool) -> Result<Option<DirLock>> {
    let file = File::open(path).map_err(|e| CgroupError::io("open", path, e))?;
    let arg = if block {
        FlockArg::LockExclusive
    } else {
        FlockArg::LockExclusiveNonblock
    };
    match Flock::lock(file, arg) {
        Ok(lock) => Ok(Some(DirLock { _lock: lock })),
        Err((_, errno)) if !block && errno == Errno::EWOULDBLOCK => Ok(None),
        Err((_, errno)) => Err(CgroupError::io("lock", path, errno.into())),
    }
}

/// Bounded cooperative wait: run `pred` up to `retries` times, sleeping
/// `interval` between attempts. Not a busy loop.
pub fn poll_until(retries: u32, interval: Duration, mut pred: impl FnMut() -> bool) -> bool {
    for _ in 0..retries {
        if pred() {
            return true;
        }
        thread::sleep(interval);
    }
    false
}
