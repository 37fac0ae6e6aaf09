//! Controller discovery
//!
//! The kernel tells us two things at runtime: where the cgroup v1
//! hierarchies are mounted (`/proc/self/mounts`) and which sub-path each
//! controller uses for the init process (`/proc/1/cgroup`). Both formats
//! are parsed by pure functions so the edge cases stay unit-testable.

use std::path::{Path, PathBuf};

use nix::unistd::AccessFlags;
use tracing::debug;

use crate::controller::{Controller, GroupId, MAX_CGROUP_PATHLEN};
use crate::error::{CgroupError, Result};
use crate::fsio;
use crate::paths::{BaseDir, PathLayout};

const PROC_CGROUP: &str = "/proc/1/cgroup";
const PROC_MOUNTS: &str = "/proc/self/mounts";

/// Locate the cgroup v1 mount directory.
///
/// Each controller is mounted separately (e.g. `/sys/fs/cgroup/cpu`); the
/// common parent of those mount points is the directory we build every
/// path from.
pub fn discover_mount_dir() -> Result<PathBuf> {
    let content = fsio::read_str(Path::new(PROC_MOUNTS), 1 << 20)?;
    mount_dir_from(&content)
}

/// Pure core of [`discover_mount_dir`]
pub(crate) fn mount_dir_from(mounts: &str) -> Result<PathBuf> {
    let mut mount_dir: Option<PathBuf> = None;

    for line in mounts.lines() {
        // device mountpoint fstype options dump pass
        let mut fields = line.split_whitespace();
        let _device = fields.next();
        let (Some(mountpoint), Some(fstype)) = (fields.next(), fields.next()) else {
            continue;
        };
        if fstype != "cgroup" {
            continue;
        }

        let Some(parent) = Path::new(mountpoint).parent() else {
            continue;
        };
        match &mount_dir {
            None => mount_dir = Some(parent.to_path_buf()),
            Some(seen) if seen != parent => {
                return Err(CgroupError::config(format!(
                    "cgroup controllers are mounted under both '{}' and '{}'",
                    seen.display(),
                    parent.display()
                )));
            }
            Some(_) => {}
        }
    }

    mount_dir.ok_or_else(|| CgroupError::config("can not find cgroup mount point"))
}

/// Detect the per-controller sub-paths from the init process's cgroup
/// memberships and store them in `layout`.
///
/// If any required controller is missing, detected twice, or its managed
/// directory fails a basic permission probe, every controller falls back
/// to the default sub-path. Fallback is all-or-nothing, never partial.
pub fn detect_comp_dirs(layout: &mut PathLayout) {
    let content = match fsio::read_str(Path::new(PROC_CGROUP), 1 << 20) {
        Ok(content) => content,
        Err(_) => {
            debug!("can't read {PROC_CGROUP}, using fallback controller dirs");
            layout.reset_comp_dirs();
            return;
        }
    };

    let Some(dirs) = parse_proc_cgroup(&content) else {
        debug!("controller detection failed, using fallback controller dirs");
        layout.reset_comp_dirs();
        return;
    };

    for controller in Controller::ALL {
        layout.set_comp_dir(controller, dirs[controller.index()].clone());
    }

    // The managed dir must already exist with good permissions under every
    // detected sub-path, or none of them are usable.
    for controller in Controller::ALL {
        let probe_ok = layout
            .try_build(GroupId::ROOT, BaseDir::Managed, controller, "")
            .map(|path| {
                fsio::access_ok(
                    &path,
                    AccessFlags::R_OK | AccessFlags::W_OK | AccessFlags::X_OK,
                )
            })
            .unwrap_or(false);
        if !probe_ok {
            debug!(
                controller = controller.name(),
                "detected dir missing or inaccessible, using fallback controller dirs"
            );
            layout.reset_comp_dirs();
            return;
        }
    }
}

/// Parse `/proc/1/cgroup` into one sub-path per controller.
///
/// Line format is `hierarchyId:comma_separated_controllers:path`, e.g.
///
/// ```text
/// 10:cpuset:/
/// 4:cpu,cpuacct:/
/// 1:name=systemd:/init.scope
/// 0::/init.scope
/// ```
///
/// Returns `None` when detection should fall back: a malformed or overlong
/// line, a controller seen twice, or a required controller never seen.
pub(crate) fn parse_proc_cgroup(content: &str) -> Option<[String; Controller::COUNT]> {
    let mut dirs: [Option<String>; Controller::COUNT] = Default::default();

    for line in content.lines() {
        let mut parts = line.splitn(3, ':');
        let (Some(_id), Some(comps), Some(path)) = (parts.next(), parts.next(), parts.next())
        else {
            return None;
        };
        if comps.is_empty() {
            // v2-style entry, not used by us
            continue;
        }
        if path.len() >= MAX_CGROUP_PATHLEN {
            return None;
        }

        // "/" means the hierarchy root, which our path builder spells ""
        let dir = if path == "/" { "" } else { path };

        for comp in comps.split(',') {
            let comp = comp.strip_prefix("name=").unwrap_or(comp);
            let Some(controller) = Controller::from_name(comp) else {
                continue;
            };
            let slot = &mut dirs[controller.index()];
            if slot.is_some() {
                // detected more than once
                return None;
            }
            *slot = Some(dir.to_string());
        }
    }

    let mut out: [String; Controller::COUNT] = Default::default();
    for controller in Controller::ALL {
        out[controller.index()] = dirs[controller.index()].take()?;
    }
    Some(out)
}

/// Fail when `cpu` and `cpuset` share a hierarchy.
///
/// Attaching a pid to the default cpuset group on a shared hierarchy would
/// move it out of its cpu group, silently dropping cpu enforcement.
pub fn check_hierarchy() -> Result<()> {
    let content = fsio::read_str(Path::new(PROC_CGROUP), 1 << 20).map_err(|_| {
        CgroupError::config(format!(
            "can't check controller mount hierarchy, file '{PROC_CGROUP}' doesn't exist"
        ))
    })?;

    if hierarchy_conflict(&content) {
        return Err(CgroupError::config(
            "can't mount 'cpu' and 'cpuset' on the same hierarchy",
        ));
    }
    Ok(())
}

/// Pure core of [`check_hierarchy`]
pub(crate) fn hierarchy_conflict(content: &str) -> bool {
    for line in content.lines() {
        let mut parts = line.splitn(3, ':');
        let (Some(_id), Some(comps), Some(_path)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };

        let mut saw_cpu_or_cpuset = false;
        for comp in comps.split(',') {
            let comp = comp.strip_prefix("name=").unwrap_or(comp);
            match Controller::from_name(comp) {
                Some(Controller::Cpu) | Some(Controller::Cpuset) => {
                    if saw_cpu_or_cpuset {
                        return true;
                    }
                    saw_cpu_or_cpuset = true;
                }
                _ => {}
            }
        }
    }
    false
}
