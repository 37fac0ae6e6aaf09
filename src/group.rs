//! Per-group lifecycle: create, attach, detach, destroy, lock
//!
//! A resource group is one directory per controller under the managed
//! sub-tree. The kernel populates interface files asynchronously after
//! mkdir, removal of a populated group requires migrating its pids out
//! first, and both sides are guarded by advisory locks on the managed
//! top-level directory.

use std::fs;
use std::io::{self, Write};
use std::thread;
use std::time::Duration;

use nix::unistd::AccessFlags;
use tracing::warn;

use crate::controller::{Controller, GroupId, MAX_CPUSET_LENGTH, MAX_RETRY};
use crate::error::{CgroupError, Result};
use crate::fsio::{self, DirLock};
use crate::paths::{BaseDir, PathLayout};
use crate::perms::{self, Capabilities};

/// Create the group's directory under every enabled controller.
///
/// The kernel creates the interface files some time after mkdir returns,
/// so readiness is polled before the group is handed to callers. For
/// cpuset the kernel leaves `cpuset.mems`/`cpuset.cpus` empty, and an
/// empty cpuset rejects all attachments, so both are copied down from
/// the managed root.
pub fn create_group(layout: &PathLayout, caps: &Capabilities, group: GroupId) -> Result<()> {
    create_group_dir(layout, group, Controller::Cpu)?;
    create_group_dir(layout, group, Controller::Cpuacct)?;
    if caps.memory {
        create_group_dir(layout, group, Controller::Memory)?;
    }
    if caps.cpuset {
        create_group_dir(layout, group, Controller::Cpuset)?;
    }

    let ready = fsio::poll_until(MAX_RETRY, Duration::from_millis(1), || {
        matches!(perms::check_permission(layout, group, false, None), Ok(true))
    });
    if !ready {
        // still not ready, might be a real error; this scan raises
        perms::check_permission(layout, group, true, None)?;
    }

    if caps.cpuset {
        copy_cpuset_config(layout, BaseDir::Managed, GroupId::ROOT, group)?;
    }
    Ok(())
}

/// Create the default cpuset pseudo-group, which receives every process
/// whose resource group does not constrain cpuset
pub fn create_default_cpuset_group(layout: &PathLayout, caps: &Capabilities) -> Result<()> {
    if !caps.cpuset {
        return Ok(());
    }

    let group = GroupId::DEFAULT_CPUSET;
    create_group_dir(layout, group, Controller::Cpuset)?;

    let ready = fsio::poll_until(MAX_RETRY, Duration::from_millis(1), || {
        matches!(
            perms::check_cpuset_permission(layout, caps, group, false),
            Ok(true)
        )
    });
    if !ready {
        perms::check_cpuset_permission(layout, caps, group, true)?;
    }

    copy_cpuset_config(layout, BaseDir::Managed, GroupId::ROOT, group)
}

/// mkdir one controller directory; an already-existing directory is fine
fn create_group_dir(layout: &PathLayout, group: GroupId, controller: Controller) -> Result<()> {
    let path = layout.build(group, BaseDir::Managed, controller, "")?;
    match fs::create_dir(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(CgroupError::io("mkdir", path, e)),
    }
}

/// Copy `cpuset.mems` and `cpuset.cpus` from one group directory into
/// another, so the destination matches its parent's configuration
pub(crate) fn copy_cpuset_config(
    layout: &PathLayout,
    from_base: BaseDir,
    from: GroupId,
    to: GroupId,
) -> Result<()> {
    for leaf in ["cpuset.mems", "cpuset.cpus"] {
        let src = layout.build(from, from_base, Controller::Cpuset, leaf)?;
        let value = fsio::read_str(&src, MAX_CPUSET_LENGTH)?;
        let dst = layout.build(to, BaseDir::Managed, Controller::Cpuset, leaf)?;
        fsio::write_str(&dst, &value)?;
    }
    Ok(())
}

/// Move a pid into the group.
///
/// The pid lands in `cgroup.procs` under cpu and cpuacct; with cpuset
/// enabled it also lands in either the group's own cpuset directory or the
/// default cpuset pseudo-group. The memory controller is deliberately left
/// alone so memory accounting stays continuous across group changes.
pub fn attach_pid(
    layout: &PathLayout,
    caps: &Capabilities,
    group: GroupId,
    pid: i32,
    with_cpuset: bool,
) -> Result<()> {
    let procs = layout.build(group, BaseDir::Managed, Controller::Cpu, "cgroup.procs")?;
    fsio::write_i64(&procs, pid as i64)?;

    let procs = layout.build(group, BaseDir::Managed, Controller::Cpuacct, "cgroup.procs")?;
    fsio::write_i64(&procs, pid as i64)?;

    if caps.cpuset {
        let target = if with_cpuset { group } else { GroupId::DEFAULT_CPUSET };
        let procs = layout.build(target, BaseDir::Managed, Controller::Cpuset, "cgroup.procs")?;
        fsio::write_i64(&procs, pid as i64)?;
    }
    Ok(())
}

/// Move every pid in the group out to the default group.
///
/// Must be called with the managed top-level directory locked; the
/// `_lock` parameter witnesses that. The kernel accepts exactly one pid
/// per write, so the list is parsed and re-emitted pid by pid. A pid that
/// fails to move is logged and skipped: partial migration beats leaving
/// the whole group wedged. On error the lock is released by drop in the
/// caller's frame, so it can never leak.
pub fn detach_group(
    layout: &PathLayout,
    group: GroupId,
    controller: Controller,
    _lock: &DirLock,
) -> Result<()> {
    let src = layout.build(group, BaseDir::Managed, controller, "cgroup.procs")?;
    let pids = match fsio::read_pids(&src) {
        Ok(pids) => pids,
        // the directory is already gone: nothing left to migrate
        Err(CgroupError::Io { ref source, .. }) if source.kind() == io::ErrorKind::NotFound => {
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    if pids.is_empty() {
        return Ok(());
    }

    let dst = layout.build(GroupId::DEFAULT, BaseDir::Managed, controller, "cgroup.procs")?;
    let mut file = fsio::open_for_write(&dst)?;
    for pid in pids {
        let buf = format!("{pid}\n");
        match file.write(buf.as_bytes()) {
            Err(e) => {
                warn!(pid, error = %e, "failed to migrate pid to the default group");
            }
            Ok(n) if n != buf.len() => {
                return Err(CgroupError::io(
                    "write",
                    &dst,
                    io::Error::new(io::ErrorKind::WriteZero, format!("short write of pid {pid}")),
                ));
            }
            Ok(_) => {}
        }
    }
    Ok(())
}

/// Remove the group's directories under every enabled controller,
/// migrating resident pids to the default group first when asked
pub fn destroy_group(
    layout: &PathLayout,
    caps: &Capabilities,
    group: GroupId,
    migrate: bool,
) -> Result<()> {
    remove_group_dir(layout, group, Controller::Cpu, Some("cpu.shares"), migrate)?;
    remove_group_dir(layout, group, Controller::Cpuacct, None, migrate)?;
    if caps.cpuset {
        remove_group_dir(layout, group, Controller::Cpuset, None, migrate)?;
    }
    if caps.memory {
        remove_group_dir(
            layout,
            group,
            Controller::Memory,
            Some("memory.limit_in_bytes"),
            migrate,
        )?;
    }
    Ok(())
}

/// Remove one controller directory.
///
/// `anchor` is an interface file whose writability proves the directory is
/// still ours; an absent or unwritable anchor means another process beat
/// us to it and there is nothing to do. The kernel briefly reports EBUSY
/// after the last pid leaves, hence the bounded rmdir retry.
fn remove_group_dir(
    layout: &PathLayout,
    group: GroupId,
    controller: Controller,
    anchor: Option<&str>,
    migrate: bool,
) -> Result<()> {
    let lock = lock_group_blocking(layout, GroupId::ROOT, controller)?;

    if let Some(anchor) = anchor {
        let Some(path) = layout.try_build(group, BaseDir::Managed, controller, anchor) else {
            return Ok(());
        };
        if !fsio::access_ok(&path, AccessFlags::W_OK) {
            return Ok(());
        }
    }

    if migrate {
        detach_group(layout, group, controller, &lock)?;
    }

    let dir = layout.build(group, BaseDir::Managed, controller, "")?;
    let mut attempts = 0;
    loop {
        match fs::remove_dir(&dir) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::EBUSY) && attempts < MAX_RETRY => {
                attempts += 1;
                thread::sleep(Duration::from_millis(1));
            }
            Err(e) => return Err(CgroupError::io("rmdir", &dir, e)),
        }
    }
}

/// Lock one of the group's controller directories. While held, the group
/// cannot be removed by other processes. `None` reports non-blocking
/// contention; dropping the guard unlocks.
pub fn lock_group(
    layout: &PathLayout,
    group: GroupId,
    controller: Controller,
    block: bool,
) -> Result<Option<DirLock>> {
    let dir = layout.build(group, BaseDir::Managed, controller, "")?;
    fsio::lock_dir(&dir, block)
}

/// Blocking variant of [`lock_group`]; a blocking flock cannot report
/// contention, so the guard is returned directly
pub(crate) fn lock_group_blocking(
    layout: &PathLayout,
    group: GroupId,
    controller: Controller,
) -> Result<DirLock> {
    let dir = layout.build(group, BaseDir::Managed, controller, "")?;
    match fsio::lock_dir(&dir, true)? {
        Some(lock) => Ok(lock),
        None => Err(CgroupError::io(
            "lock",
            dir,
            io::Error::from(io::ErrorKind::WouldBlock),
        )),
    }
}
