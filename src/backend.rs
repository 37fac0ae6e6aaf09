//! Backend binding: the operation set the database dispatches through
//!
//! One backend is bound per process lifetime. The operations are a trait
//! so the database never knows which kernel interface it is talking to; a
//! unified-hierarchy (v2) backend slots in beside the v1 implementation
//! once its probe succeeds.

use std::cell::Cell;

use tracing::{debug, info};

use crate::config::Tunables;
use crate::controller::{Controller, GroupId};
use crate::error::{CgroupError, Result};
use crate::fsio::DirLock;
use crate::group;
use crate::limits::{self, CfsCalibration};
use crate::mounts;
use crate::paths::{BaseDir, PathLayout};
use crate::perms::{self, Capabilities};

/// Resource-group operations exposed to the database
pub trait ResGroupOps {
    /// Name of the OS group implementation
    fn name(&self) -> &'static str;

    /// Best-effort usability check; never raises. Discovers the controller
    /// layout and stamps capability flags.
    fn probe(&mut self) -> bool;

    /// Strict init-time check; raises `Config` on any unmet requirement
    fn check(&mut self) -> Result<()>;

    /// Create the managed sub-tree settings and the system group, and move
    /// the calling process into it. Must run before any worker forks.
    fn init(&mut self) -> Result<()>;

    /// Adjust database settings to fit this backend
    fn adjust_tunables(&mut self);

    /// Mark this process as a forked worker, enabling the
    /// current-attachment cache. Call once after fork, before any attach.
    fn enter_worker(&self);

    fn tunables(&self) -> &Tunables;
    fn capabilities(&self) -> Capabilities;

    fn create_group(&self, group: GroupId) -> Result<()>;
    fn destroy_group(&self, group: GroupId, migrate: bool) -> Result<()>;
    fn attach(&self, group: GroupId, pid: i32, with_cpuset: bool) -> Result<()>;
    fn detach(&self, group: GroupId, controller: Controller, lock: &DirLock) -> Result<()>;
    fn lock_group(
        &self,
        group: GroupId,
        controller: Controller,
        block: bool,
    ) -> Result<Option<DirLock>>;
    fn unlock_group(&self, lock: DirLock) {
        drop(lock);
    }

    fn set_cpu_limit(&self, group: GroupId, rate: i64) -> Result<()>;
    fn get_cpu_usage(&self, group: GroupId) -> Result<i64>;
    fn convert_cpu_usage(&self, usage_ns: i64, duration_us: i64) -> f64;
    fn get_cpuset(&self, group: GroupId) -> Result<String>;
    fn set_cpuset(&self, group: GroupId, value: &str) -> Result<()>;

    fn get_total_memory(&self) -> Result<u64>;
    fn get_memory_usage(&self, group: GroupId) -> Result<i32>;
    fn get_memory_limit_chunks(&self, group: GroupId) -> Result<i32>;
    fn set_memory_limit(&self, group: GroupId, rate: i64) -> Result<()>;
    fn set_memory_limit_by_chunks(&self, group: GroupId, chunks: i32) -> Result<()>;
}

/// The cgroup v1 backend
pub struct CgroupV1 {
    tunables: Tunables,
    layout: Option<PathLayout>,
    caps: Capabilities,
    cal: Option<CfsCalibration>,
    /// Last group this process wrote itself into; local to this process,
    /// consulted only once `enter_worker` ran
    current_group: Cell<Option<GroupId>>,
    under_postmaster: Cell<bool>,
}

impl CgroupV1 {
    pub fn new(tunables: Tunables) -> CgroupV1 {
        CgroupV1 {
            tunables,
            layout: None,
            caps: Capabilities::default(),
            cal: None,
            current_group: Cell::new(None),
            under_postmaster: Cell::new(false),
        }
    }

    /// The discovered layout, if probe ran
    pub fn path_layout(&self) -> Option<&PathLayout> {
        self.layout.as_ref()
    }

    fn layout(&self) -> Result<&PathLayout> {
        self.layout
            .as_ref()
            .ok_or_else(|| CgroupError::config("can not find cgroup mount point"))
    }

    fn cal(&self) -> Result<&CfsCalibration> {
        self.cal
            .as_ref()
            .ok_or_else(|| CgroupError::config("cgroup backend is not initialized"))
    }
}

/// Apply config overrides on top of the scanned capabilities. Disabling is
/// always allowed; enabling something the scan cleared is a hard error.
fn resolve_capabilities(scanned: Capabilities, tunables: &Tunables) -> Result<Capabilities> {
    Ok(Capabilities {
        memory: resolve_flag("memory", scanned.memory, tunables.enable_cgroup_memory)?,
        swap: resolve_flag("swap", scanned.swap, tunables.enable_cgroup_swap)?,
        cpuset: resolve_flag("cpuset", scanned.cpuset, tunables.enable_cgroup_cpuset)?,
    })
}

fn resolve_flag(name: &str, scanned: bool, requested: Option<bool>) -> Result<bool> {
    match requested {
        None => Ok(scanned),
        Some(false) => {
            if scanned {
                debug!(capability = name, "capability disabled by configuration");
            }
            Ok(false)
        }
        Some(true) if scanned => Ok(true),
        Some(true) => Err(CgroupError::config(format!(
            "enable_cgroup_{name} is on but the {name} interfaces are not usable"
        ))),
    }
}

impl ResGroupOps for CgroupV1 {
    fn name(&self) -> &'static str {
        "cgroup"
    }

    fn probe(&mut self) -> bool {
        let mount_dir = match &self.tunables.mount_point {
            Some(dir) => dir.clone(),
            None => match mounts::discover_mount_dir() {
                Ok(dir) => dir,
                // not an error yet; check() reports it if the backend is
                // actually selected
                Err(_) => return false,
            },
        };

        let mut layout = PathLayout::new(mount_dir);
        mounts::detect_comp_dirs(&mut layout);

        let mut caps = Capabilities::default();
        let usable = matches!(
            perms::check_permission(&layout, GroupId::ROOT, false, Some(&mut caps)),
            Ok(true)
        );
        self.layout = Some(layout);
        self.caps = caps;
        usable
    }

    fn check(&mut self) -> Result<()> {
        self.tunables.validate()?;
        let layout = self.layout()?;

        // same scan as probe, this time failing loudly on unmet requirements
        let mut scanned = Capabilities::default();
        perms::check_permission(layout, GroupId::ROOT, true, Some(&mut scanned))?;
        self.caps = resolve_capabilities(scanned, &self.tunables)?;

        // A shared cpu/cpuset hierarchy would let an attach to the default
        // cpuset group pull the pid out of its cpu group.
        if !cfg!(feature = "legacy-compat") {
            mounts::check_hierarchy()?;
        }

        let layout = self.layout()?;
        for controller in Controller::ALL {
            let dir = layout.build(GroupId::ROOT, BaseDir::Managed, controller, "")?;
            info!(controller = controller.name(), dir = %dir.display(), "managed cgroup dir");
        }

        let cal = CfsCalibration::probe(layout)?;
        self.cal = Some(cal);
        Ok(())
    }

    fn init(&mut self) -> Result<()> {
        let layout = self.layout()?;
        limits::init_cpu(layout, self.cal()?, &self.tunables)?;
        limits::init_cpuset(layout, &self.caps)?;

        // The system group holds the postmaster and auxiliary processes.
        // It must exist, with the postmaster inside, before any worker
        // forks so children start out under its limits.
        group::create_group(layout, &self.caps, GroupId::SYSTEM)?;
        self.attach(GroupId::SYSTEM, std::process::id() as i32, false)
    }

    fn adjust_tunables(&mut self) {
        // cpu bandwidth control behaves best when all processes compete at
        // the same priority; force workers to nice 0
        self.tunables.worker_relative_priority = 0;
    }

    fn enter_worker(&self) {
        self.under_postmaster.set(true);
    }

    fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn create_group(&self, group: GroupId) -> Result<()> {
        group::create_group(self.layout()?, &self.caps, group)
    }

    fn destroy_group(&self, group: GroupId, migrate: bool) -> Result<()> {
        group::destroy_group(self.layout()?, &self.caps, group, migrate)
    }

    fn attach(&self, group: GroupId, pid: i32, with_cpuset: bool) -> Result<()> {
        // A forked worker inherits both its cgroup membership and this
        // cache from the postmaster; a repeat attach to the cached group
        // needs no file writes at all.
        if self.under_postmaster.get() && self.current_group.get() == Some(group) {
            return Ok(());
        }
        group::attach_pid(self.layout()?, &self.caps, group, pid, with_cpuset)?;
        self.current_group.set(Some(group));
        Ok(())
    }

    fn detach(&self, group: GroupId, controller: Controller, lock: &DirLock) -> Result<()> {
        group::detach_group(self.layout()?, group, controller, lock)
    }

    fn lock_group(
        &self,
        group: GroupId,
        controller: Controller,
        block: bool,
    ) -> Result<Option<DirLock>> {
        group::lock_group(self.layout()?, group, controller, block)
    }

    fn set_cpu_limit(&self, group: GroupId, rate: i64) -> Result<()> {
        limits::set_cpu_limit(self.layout()?, self.cal()?, &self.tunables, group, rate)
    }

    fn get_cpu_usage(&self, group: GroupId) -> Result<i64> {
        limits::cpu_usage(self.layout()?, group)
    }

    fn convert_cpu_usage(&self, usage_ns: i64, duration_us: i64) -> f64 {
        debug_assert!(self.cal.is_some(), "convert_cpu_usage before check()");
        match &self.cal {
            Some(cal) => limits::convert_cpu_usage(cal, usage_ns, duration_us),
            None => 0.0,
        }
    }

    fn get_cpuset(&self, group: GroupId) -> Result<String> {
        limits::cpuset(self.layout()?, &self.caps, group)
    }

    fn set_cpuset(&self, group: GroupId, value: &str) -> Result<()> {
        limits::set_cpuset(self.layout()?, &self.caps, group, value)
    }

    fn get_total_memory(&self) -> Result<u64> {
        limits::total_memory_mb(self.layout()?, &self.caps)
    }

    fn get_memory_usage(&self, group: GroupId) -> Result<i32> {
        limits::memory_usage(self.layout()?, &self.caps, &self.tunables, group)
    }

    fn get_memory_limit_chunks(&self, group: GroupId) -> Result<i32> {
        limits::memory_limit_chunks(self.layout()?, &self.caps, &self.tunables, group)
    }

    fn set_memory_limit(&self, group: GroupId, rate: i64) -> Result<()> {
        limits::set_memory_limit(self.layout()?, &self.caps, &self.tunables, group, rate)
    }

    fn set_memory_limit_by_chunks(&self, group: GroupId, chunks: i32) -> Result<()> {
        limits::set_memory_limit_by_chunks(self.layout()?, &self.caps, &self.tunables, group, chunks)
    }
}

/// Probe the known backends and return the first usable one.
/// Today that is cgroup v1; a v2 backend is the natural next entry.
pub fn select_backend(tunables: Tunables) -> Option<Box<dyn ResGroupOps>> {
    let mut backend = CgroupV1::new(tunables);
    if backend.probe() {
        return Some(Box::new(backend));
    }
    None
}
