//! Declarative permission matrix
//!
//! Every interface file the backend touches is listed here with the access
//! bits it needs. Lists are scanned with access(2); optional lists stamp a
//! capability flag instead of failing, so the backend degrades gracefully
//! when swap accounting (or, in legacy mode, memory and cpuset) is absent.
//!
//! These lists are also what the standalone checker validates, so keep them
//! in sync with any new interface file the engine starts using.

use nix::unistd::{access, AccessFlags};

use crate::controller::{Controller, GroupId};
use crate::error::{CgroupError, Result};
use crate::paths::{BaseDir, PathLayout};

/// Memory and cpuset are mandatory on current systems; the legacy-compat
/// feature keeps them optional for hosts provisioned for the old release.
const LEGACY_OPTIONAL: bool = cfg!(feature = "legacy-compat");

/// Capability flags stamped by the root permission scan.
/// Immutable once backend initialization completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub memory: bool,
    pub swap: bool,
    pub cpuset: bool,
}

/// Which capability an optional permission list feeds
#[derive(Debug, Clone, Copy)]
enum CapFlag {
    Memory,
    Swap,
    Cpuset,
}

impl Capabilities {
    fn set(&mut self, flag: CapFlag, value: bool) {
        match flag {
            CapFlag::Memory => self.memory = value,
            CapFlag::Swap => self.swap = value,
            CapFlag::Cpuset => self.cpuset = value,
        }
    }
}

/// One (controller, interface file, required bits) tuple.
/// An empty leaf names the group directory itself.
struct PermItem {
    controller: Controller,
    leaf: &'static str,
    mode: AccessFlags,
}

/// A permission list; optional lists clear their capability flag instead of
/// failing the scan
struct PermList {
    items: &'static [PermItem],
    optional: bool,
    flag: Option<CapFlag>,
}

const RW: AccessFlags = AccessFlags::R_OK.union(AccessFlags::W_OK);
const RWX: AccessFlags = RW.union(AccessFlags::X_OK);

static PERM_ITEMS_CPU: [PermItem; 5] = [
    PermItem { controller: Controller::Cpu, leaf: "", mode: RWX },
    PermItem { controller: Controller::Cpu, leaf: "cgroup.procs", mode: RW },
    PermItem { controller: Controller::Cpu, leaf: "cpu.cfs_period_us", mode: RW },
    PermItem { controller: Controller::Cpu, leaf: "cpu.cfs_quota_us", mode: RW },
    PermItem { controller: Controller::Cpu, leaf: "cpu.shares", mode: RW },
];

static PERM_ITEMS_CPUACCT: [PermItem; 4] = [
    PermItem { controller: Controller::Cpuacct, leaf: "", mode: RWX },
    PermItem { controller: Controller::Cpuacct, leaf: "cgroup.procs", mode: RW },
    PermItem { controller: Controller::Cpuacct, leaf: "cpuacct.usage", mode: AccessFlags::R_OK },
    PermItem { controller: Controller::Cpuacct, leaf: "cpuacct.stat", mode: AccessFlags::R_OK },
];

static PERM_ITEMS_CPUSET: [PermItem; 4] = [
    PermItem { controller: Controller::Cpuset, leaf: "", mode: RWX },
    PermItem { controller: Controller::Cpuset, leaf: "cgroup.procs", mode: RW },
    PermItem { controller: Controller::Cpuset, leaf: "cpuset.cpus", mode: RW },
    PermItem { controller: Controller::Cpuset, leaf: "cpuset.mems", mode: RW },
];

static PERM_ITEMS_MEMORY: [PermItem; 3] = [
    PermItem { controller: Controller::Memory, leaf: "", mode: RWX },
    PermItem { controller: Controller::Memory, leaf: "memory.limit_in_bytes", mode: RW },
    PermItem { controller: Controller::Memory, leaf: "memory.usage_in_bytes", mode: AccessFlags::R_OK },
];

static PERM_ITEMS_SWAP: [PermItem; 3] = [
    PermItem { controller: Controller::Memory, leaf: "", mode: RWX },
    PermItem { controller: Controller::Memory, leaf: "memory.memsw.limit_in_bytes", mode: RW },
    PermItem { controller: Controller::Memory, leaf: "memory.memsw.usage_in_bytes", mode: AccessFlags::R_OK },
];

/// The scan order. Swap first: the memsw interfaces only exist with
/// CONFIG_MEMCG_SWAP_ENABLED (or swapaccount=1 on the kernel cmdline), so
/// that list is always optional.
static PERM_LISTS: [PermList; 5] = [
    PermList { items: &PERM_ITEMS_SWAP, optional: true, flag: Some(CapFlag::Swap) },
    PermList { items: &PERM_ITEMS_MEMORY, optional: LEGACY_OPTIONAL, flag: Some(CapFlag::Memory) },
    PermList { items: &PERM_ITEMS_CPU, optional: false, flag: None },
    PermList { items: &PERM_ITEMS_CPUACCT, optional: false, flag: None },
    PermList { items: &PERM_ITEMS_CPUSET, optional: LEGACY_OPTIONAL, flag: Some(CapFlag::Cpuset) },
];

/// The cpuset list alone, for the default cpuset pseudo-group
static CPUSET_LIST: PermList = PermList {
    items: &PERM_ITEMS_CPUSET,
    optional: LEGACY_OPTIONAL,
    flag: Some(CapFlag::Cpuset),
};

/// Check one permission list on `group`.
///
/// - every item satisfied: `Ok(true)`;
/// - otherwise `Ok(false)`, except that a mandatory list raises when
///   `report` is set.
fn perm_list_check(
    layout: &PathLayout,
    group: GroupId,
    list: &PermList,
    report: bool,
) -> Result<bool> {
    for item in list.items {
        let kind = if item.leaf.is_empty() { "directory" } else { "file" };

        let Some(path) = layout.try_build(group, BaseDir::Managed, item.controller, item.leaf)
        else {
            if report && !list.optional {
                return Err(CgroupError::config(format!(
                    "invalid {kind} name for '{}/{}'",
                    item.controller, item.leaf
                )));
            }
            return Ok(false);
        };

        if let Err(errno) = access(&path, item.mode) {
            // No such file or directory / Permission denied
            if report && !list.optional {
                return Err(CgroupError::config(format!(
                    "can't access {kind} '{}': {}",
                    path.display(),
                    errno.desc()
                )));
            }
            return Ok(false);
        }
    }
    Ok(true)
}

/// Check permissions on `group`'s directories and interface files.
///
/// With `group == ROOT` and `caps` supplied, each capability-backed list
/// stamps its flag with the scan outcome. With `report` set, the first
/// unmet mandatory list raises instead of returning false. Returns true
/// iff every mandatory list is satisfied.
pub fn check_permission(
    layout: &PathLayout,
    group: GroupId,
    report: bool,
    mut caps: Option<&mut Capabilities>,
) -> Result<bool> {
    for list in &PERM_LISTS {
        let ok = perm_list_check(layout, group, list, report)?;

        if group == GroupId::ROOT {
            if let (Some(caps), Some(flag)) = (caps.as_deref_mut(), list.flag) {
                caps.set(flag, ok);
            }
        }

        if !ok && !list.optional {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Same contract as [`check_permission`] for the cpuset list alone.
/// Trivially satisfied when the cpuset capability is off.
pub fn check_cpuset_permission(
    layout: &PathLayout,
    caps: &Capabilities,
    group: GroupId,
    report: bool,
) -> Result<bool> {
    if !caps.cpuset {
        return Ok(true);
    }
    let ok = perm_list_check(layout, group, &CPUSET_LIST, report)?;
    Ok(ok || CPUSET_LIST.optional)
}
