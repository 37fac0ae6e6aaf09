//! Controller identifiers and resource-group ids
//!
//! A controller is one cgroup v1 subsystem (cpu, cpuacct, cpuset, memory).
//! A group id is the opaque non-zero integer the database uses to name a
//! resource group; a handful of low ids are reserved for the backend.

use std::fmt;

/// The cgroup v1 controllers managed by this backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Controller {
    Cpu,
    Cpuacct,
    Cpuset,
    Memory,
}

impl Controller {
    /// All managed controllers, in creation order
    pub const ALL: [Controller; 4] = [
        Controller::Cpu,
        Controller::Cpuacct,
        Controller::Cpuset,
        Controller::Memory,
    ];

    pub const COUNT: usize = Self::ALL.len();

    /// Canonical kernel subsystem name
    pub fn name(self) -> &'static str {
        match self {
            Controller::Cpu => "cpu",
            Controller::Cpuacct => "cpuacct",
            Controller::Cpuset => "cpuset",
            Controller::Memory => "memory",
        }
    }

    /// Look up a controller by its kernel subsystem name.
    /// Unrecognized subsystems (blkio, devices, name=systemd, ...) yield None.
    pub fn from_name(name: &str) -> Option<Controller> {
        match name {
            "cpu" => Some(Controller::Cpu),
            "cpuacct" => Some(Controller::Cpuacct),
            "cpuset" => Some(Controller::Cpuset),
            "memory" => Some(Controller::Memory),
            _ => None,
        }
    }

    /// Stable index into per-controller tables
    pub fn index(self) -> usize {
        match self {
            Controller::Cpu => 0,
            Controller::Cpuacct => 1,
            Controller::Cpuset => 2,
            Controller::Memory => 3,
        }
    }
}

impl fmt::Display for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opaque resource-group identifier issued by the database.
///
/// Database-allocated ids are non-zero and never collide with the reserved
/// ids below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(u32);

impl GroupId {
    /// The managed sub-tree itself; adds no numeric path component
    pub const ROOT: GroupId = GroupId(0);

    /// Pseudo-group receiving processes whose resource group has no
    /// explicit cpuset binding
    pub const DEFAULT_CPUSET: GroupId = GroupId(1);

    /// Group for the postmaster and auxiliary processes
    pub const SYSTEM: GroupId = GroupId(2);

    /// The database's default resource group; migration target when a
    /// group is destroyed with its processes still attached
    pub const DEFAULT: GroupId = GroupId(6437);

    pub fn new(raw: u32) -> GroupId {
        debug_assert!(raw != 0, "group id 0 is reserved for the managed root");
        GroupId(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

// Group directories are named by the bare id number.
impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Longest path the backend will build under the cgroup mount
pub const MAX_CGROUP_PATHLEN: usize = 256;

/// Upper bound for cpuset.cpus / cpuset.mems values
pub const MAX_CPUSET_LENGTH: usize = 1024;

/// Readiness poll attempts after mkdir (1 ms apart)
pub const MAX_RETRY: u32 = 10;

/// Default CFS period written when the kernel reports 0
pub const DEFAULT_CPU_PERIOD_US: i64 = 100_000;

/// Name of the managed sub-tree under each controller mount
pub const MANAGED_BASEDIR: &str = "resfence";
