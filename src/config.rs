//! Backend tunables
//!
//! The surrounding database owns the authoritative settings; this struct is
//! the slice the cgroup backend consumes, loadable from a YAML file for the
//! standalone checker.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{CgroupError, Result};

/// Tunables consumed by the cgroup backend
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Tunables {
    /// Fraction of the parent CFS quota claimed by the managed sub-tree,
    /// in (0, 1]
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: f64,

    /// Multiplier on the inherited cpu.shares value (>= 1)
    #[serde(default = "default_cpu_priority")]
    pub cpu_priority: i64,

    /// Whether per-group cfs_quota_us ceilings are written
    #[serde(default)]
    pub cpu_ceiling_enforcement: bool,

    /// Capability overrides. `None` means "as probed"; forcing a capability
    /// on that the permission scan cleared is rejected.
    #[serde(default)]
    pub enable_cgroup_memory: Option<bool>,
    #[serde(default)]
    pub enable_cgroup_swap: Option<bool>,
    #[serde(default)]
    pub enable_cgroup_cpuset: Option<bool>,

    /// Per-segment vmem budget in chunks
    #[serde(default = "default_vmem_limit_chunks")]
    pub vmem_limit_chunks: i32,

    /// Primary segments on this host
    #[serde(default = "default_host_primary_count")]
    pub host_primary_count: i32,

    /// Size of one vmem chunk in bytes; must be a power of two
    #[serde(default = "default_chunk_size_bytes")]
    pub chunk_size_bytes: u64,

    /// Worker nice offset; forced to 0 once this backend is bound, since
    /// cpu bandwidth control works best with equal priorities
    #[serde(default)]
    pub worker_relative_priority: i32,

    /// Override for the cgroup mount directory. Normally discovered from
    /// /proc/self/mounts; containers and tests point this elsewhere.
    #[serde(default)]
    pub mount_point: Option<PathBuf>,
}

fn default_cpu_limit() -> f64 {
    0.9
}

fn default_cpu_priority() -> i64 {
    10
}

fn default_vmem_limit_chunks() -> i32 {
    8192
}

fn default_host_primary_count() -> i32 {
    1
}

fn default_chunk_size_bytes() -> u64 {
    1 << 20
}

impl Default for Tunables {
    fn default() -> Self {
        Tunables {
            cpu_limit: default_cpu_limit(),
            cpu_priority: default_cpu_priority(),
            cpu_ceiling_enforcement: false,
            enable_cgroup_memory: None,
            enable_cgroup_swap: None,
            enable_cgroup_cpuset: None,
            vmem_limit_chunks: default_vmem_limit_chunks(),
            host_primary_count: default_host_primary_count(),
            chunk_size_bytes: default_chunk_size_bytes(),
            worker_relative_priority: 0,
            mount_point: None,
        }
    }
}

impl Tunables {
    /// Load tunables from a YAML file
    pub fn load_from_file(path: &str) -> Result<Tunables> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CgroupError::io("read", path, e))?;
        Self::load_from_string(&content)
    }

    /// Load tunables from a YAML string
    pub fn load_from_string(yaml: &str) -> Result<Tunables> {
        let tunables: Tunables = serde_yaml::from_str(yaml)
            .map_err(|e| CgroupError::config(format!("invalid tunables: {e}")))?;
        tunables.validate()?;
        Ok(tunables)
    }

    /// Check value ranges; raised before any kernel state is touched
    pub fn validate(&self) -> Result<()> {
        if !(self.cpu_limit > 0.0 && self.cpu_limit <= 1.0) {
            return Err(CgroupError::config(format!(
                "cpu_limit must be in (0, 1], got {}",
                self.cpu_limit
            )));
        }
        if self.cpu_priority < 1 {
            return Err(CgroupError::config(format!(
                "cpu_priority must be at least 1, got {}",
                self.cpu_priority
            )));
        }
        if self.vmem_limit_chunks < 1 {
            return Err(CgroupError::config(format!(
                "vmem_limit_chunks must be at least 1, got {}",
                self.vmem_limit_chunks
            )));
        }
        if self.host_primary_count < 1 {
            return Err(CgroupError::config(format!(
                "host_primary_count must be at least 1, got {}",
                self.host_primary_count
            )));
        }
        if !self.chunk_size_bytes.is_power_of_two() {
            return Err(CgroupError::config(format!(
                "chunk_size_bytes must be a power of two, got {}",
                self.chunk_size_bytes
            )));
        }
        Ok(())
    }

    /// Convert a chunk count to bytes
    pub fn chunks_to_bytes(&self, chunks: i32) -> i64 {
        (chunks as i64) << self.chunk_shift()
    }

    /// Convert bytes to whole chunks, saturating at i32::MAX
    pub fn bytes_to_chunks(&self, bytes: i64) -> i32 {
        if bytes < 0 {
            return 0;
        }
        (bytes >> self.chunk_shift()).min(i32::MAX as i64) as i32
    }

    fn chunk_shift(&self) -> u32 {
        self.chunk_size_bytes.trailing_zeros()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let t = Tunables::default();
        assert_eq!(t.cpu_limit, 0.9);
        assert_eq!(t.cpu_priority, 10);
        assert!(!t.cpu_ceiling_enforcement);
        assert_eq!(t.chunk_size_bytes, 1 << 20);
        assert!(t.validate().is_ok());
    }

    #[test]
    fn test_load_partial_yaml() {
        let t = Tunables::load_from_string("cpu_limit: 0.5\ncpu_ceiling_enforcement: true\n")
            .unwrap();
        assert_eq!(t.cpu_limit, 0.5);
        assert!(t.cpu_ceiling_enforcement);
        // unspecified fields keep their defaults
        assert_eq!(t.cpu_priority, 10);
        assert_eq!(t.enable_cgroup_swap, None);
    }

    #[test]
    fn test_validate_rejects_bad_ranges() {
        let mut t = Tunables::default();
        t.cpu_limit = 0.0;
        assert!(t.validate().is_err());

        let mut t = Tunables::default();
        t.cpu_limit = 1.5;
        assert!(t.validate().is_err());

        let mut t = Tunables::default();
        t.cpu_priority = 0;
        assert!(t.validate().is_err());

        let mut t = Tunables::default();
        t.chunk_size_bytes = 3 << 20;
        assert!(t.validate().is_err());
    }

    #[test]
    fn test_chunk_conversion() {
        let t = Tunables::default();
        assert_eq!(t.chunks_to_bytes(50), 50 << 20);
        assert_eq!(t.bytes_to_chunks(50 << 20), 50);
        // partial chunks round down
        assert_eq!(t.bytes_to_chunks((1 << 20) + 1), 1);
        // kernel reports huge values for "unlimited"; don't overflow i32
        assert_eq!(t.bytes_to_chunks(i64::MAX), i32::MAX);
        assert_eq!(t.bytes_to_chunks(-1), 0);
    }
}
