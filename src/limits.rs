//! Limit engine: translate database units into kernel units and back
//!
//! CPU rate limits become cpu.shares plus an optional cfs_quota_us
//! ceiling, memory limits become memory(.memsw).limit_in_bytes written in
//! a direction-dependent order, and cumulative cpuacct nanoseconds become
//! a percentage scaled to the parent's quota.

use tracing::debug;

use crate::config::Tunables;
use crate::controller::{Controller, GroupId, DEFAULT_CPU_PERIOD_US, MAX_CPUSET_LENGTH};
use crate::error::{CgroupError, Result};
use crate::fsio;
use crate::group;
use crate::host;
use crate::paths::{BaseDir, PathLayout};
use crate::perms::Capabilities;

const MEMORY_LIMIT: &str = "memory.limit_in_bytes";
const MEMSW_LIMIT: &str = "memory.memsw.limit_in_bytes";

/// CPU bandwidth calibration, read once at startup.
///
/// `system_cfs_quota_us` is the full machine expressed in quota units
/// (period × cores); `parent_cfs_quota_us` is whatever bound a container
/// runtime put on our parent directory, `-1` when unbounded.
#[derive(Debug, Clone, Copy)]
pub struct CfsCalibration {
    pub ncores: i64,
    pub system_cfs_quota_us: i64,
    pub parent_cfs_quota_us: i64,
}

impl CfsCalibration {
    /// Read the calibration from the managed sub-tree and its parent
    pub fn probe(layout: &PathLayout) -> Result<CfsCalibration> {
        let ncores = host::cpu_cores()?;
        let period = cfs_period_us(layout)?;
        let parent_path =
            layout.build(GroupId::ROOT, BaseDir::Parent, Controller::Cpu, "cpu.cfs_quota_us")?;
        Ok(CfsCalibration {
            ncores,
            system_cfs_quota_us: period * ncores,
            parent_cfs_quota_us: fsio::read_i64(&parent_path)?,
        })
    }
}

/// CFS period of the managed sub-tree.
///
/// Read from our own directory rather than the parent: sub-directories
/// inherit the period, and some old kernels (seen on centos6) report 0 in
/// a parent that is not even writable. A zero reading is corrected in our
/// copy and read back; it is unclear whether current kernels still exhibit
/// this, so the defensive write stays.
pub fn cfs_period_us(layout: &PathLayout) -> Result<i64> {
    let path = layout.build(GroupId::ROOT, BaseDir::Managed, Controller::Cpu, "cpu.cfs_period_us")?;
    let mut period = fsio::read_i64(&path)?;

    if period == 0 {
        debug!("cpu.cfs_period_us reads 0, rewriting the default");
        fsio::write_i64(&path, DEFAULT_CPU_PERIOD_US)?;
        period = fsio::read_i64(&path)?;
        if period <= 0 {
            return Err(CgroupError::config(format!(
                "invalid cpu.cfs_period_us value: {period}"
            )));
        }
    }
    Ok(period)
}

/// Set up the managed sub-tree's own CPU bandwidth and weight.
///
/// The quota comes from the parent's quota when the parent is bounded and
/// from the machine size otherwise, scaled by `cpu_limit`. The shares
/// value multiplies the parent's shares rather than using some large
/// absolute number, which behaved badly on 1- and 2-core hosts.
pub fn init_cpu(layout: &PathLayout, cal: &CfsCalibration, tunables: &Tunables) -> Result<()> {
    let base_quota = if cal.parent_cfs_quota_us <= 0 {
        cal.system_cfs_quota_us
    } else {
        cal.parent_cfs_quota_us
    };
    let cfs_quota_us = (base_quota as f64 * tunables.cpu_limit) as i64;

    let path = layout.build(GroupId::ROOT, BaseDir::Managed, Controller::Cpu, "cpu.cfs_quota_us")?;
    fsio::write_i64(&path, cfs_quota_us)?;

    let parent_shares =
        layout.build(GroupId::ROOT, BaseDir::Parent, Controller::Cpu, "cpu.shares")?;
    let shares = fsio::read_i64(&parent_shares)? * tunables.cpu_priority;
    let path = layout.build(GroupId::ROOT, BaseDir::Managed, Controller::Cpu, "cpu.shares")?;
    fsio::write_i64(&path, shares)
}

/// Copy the parent's cpuset configuration into the managed sub-tree and
/// create the default cpuset group under it
pub fn init_cpuset(layout: &PathLayout, caps: &Capabilities) -> Result<()> {
    if !caps.cpuset {
        return Ok(());
    }
    group::copy_cpuset_config(layout, BaseDir::Parent, GroupId::ROOT, GroupId::ROOT)?;
    group::create_default_cpuset_group(layout, caps)
}

/// Set the group's CPU rate limit, `rate` in [0, 100].
///
/// The soft limit is a share of the managed sub-tree's shares. The hard
/// ceiling is only written under ceiling enforcement; otherwise the quota
/// is reset to unlimited so a previously enforced group relaxes again.
pub fn set_cpu_limit(
    layout: &PathLayout,
    cal: &CfsCalibration,
    tunables: &Tunables,
    group: GroupId,
    rate: i64,
) -> Result<()> {
    debug_assert!((0..=100).contains(&rate));

    let managed_shares =
        layout.build(GroupId::ROOT, BaseDir::Managed, Controller::Cpu, "cpu.shares")?;
    let shares = fsio::read_i64(&managed_shares)?;
    let path = layout.build(group, BaseDir::Managed, Controller::Cpu, "cpu.shares")?;
    fsio::write_i64(&path, shares * rate / 100)?;

    let quota_path = layout.build(group, BaseDir::Managed, Controller::Cpu, "cpu.cfs_quota_us")?;
    if tunables.cpu_ceiling_enforcement {
        let period = cfs_period_us(layout)?;
        fsio::write_i64(&quota_path, period * cal.ncores * rate / 100)
    } else {
        fsio::write_i64(&quota_path, -1)
    }
}

/// Cumulative CPU time of the group in nanoseconds
pub fn cpu_usage(layout: &PathLayout, group: GroupId) -> Result<i64> {
    let path = layout.build(group, BaseDir::Managed, Controller::Cpuacct, "cpuacct.usage")?;
    fsio::read_i64(&path)
}

/// Convert a usage delta (ns) over `duration_us` into a percentage.
///
/// One fully busy core reports 100.0. The raw machine-level value is
/// `usage / 1000 / duration / ncores × 100% = usage / 10 / duration /
/// ncores`. When a container runtime bounds our parent, the value is
/// rescaled so that saturating the parent's quota reads as 100%; the
/// multiply comes before the divide or precision is lost.
pub fn convert_cpu_usage(cal: &CfsCalibration, usage_ns: i64, duration_us: i64) -> f64 {
    debug_assert!(usage_ns >= 0);
    debug_assert!(duration_us > 0);
    debug_assert!(cal.ncores > 0);

    let mut percent = usage_ns as f64 / 10.0 / duration_us as f64 / cal.ncores as f64;

    if cal.parent_cfs_quota_us > 0 {
        percent = percent * cal.system_cfs_quota_us as f64 / cal.parent_cfs_quota_us as f64;
    }
    percent
}

/// Decide the write order for a memory limit change.
///
/// The kernel enforces `memory.limit_in_bytes <= memory.memsw.limit_in_bytes`
/// at all times, so raising writes memsw first and lowering writes memory
/// first. An unchanged limit needs no writes at all.
fn plan_memsw_writes(new: i64, old: i64) -> Vec<(&'static str, i64)> {
    match new.cmp(&old) {
        std::cmp::Ordering::Greater => vec![(MEMSW_LIMIT, new), (MEMORY_LIMIT, new)],
        std::cmp::Ordering::Less => vec![(MEMORY_LIMIT, new), (MEMSW_LIMIT, new)],
        std::cmp::Ordering::Equal => Vec::new(),
    }
}

/// Set the group's memory limit to an absolute chunk count.
/// No-op while the memory controller is disabled.
pub fn set_memory_limit_by_chunks(
    layout: &PathLayout,
    caps: &Capabilities,
    tunables: &Tunables,
    group: GroupId,
    chunks: i32,
) -> Result<()> {
    if !caps.memory {
        return Ok(());
    }

    let new = tunables.chunks_to_bytes(chunks);
    let limit_path = layout.build(group, BaseDir::Managed, Controller::Memory, MEMORY_LIMIT)?;

    if !caps.swap {
        return fsio::write_i64(&limit_path, new);
    }

    let old = fsio::read_i64(&limit_path)?;
    for (leaf, value) in plan_memsw_writes(new, old) {
        let path = layout.build(group, BaseDir::Managed, Controller::Memory, leaf)?;
        fsio::write_i64(&path, value)?;
    }
    Ok(())
}

/// Set the group's memory limit as a percentage of the host vmem budget.
///
/// The group's memory directory is locked for the duration so concurrent
/// recomputations of the chunk target cannot interleave.
pub fn set_memory_limit(
    layout: &PathLayout,
    caps: &Capabilities,
    tunables: &Tunables,
    group: GroupId,
    rate: i64,
) -> Result<()> {
    debug_assert!((0..=100).contains(&rate));
    if !caps.memory {
        return Ok(());
    }

    let mut chunks = (tunables.vmem_limit_chunks as i64 * rate / 100) as i32;
    chunks *= tunables.host_primary_count;

    let _lock = group::lock_group_blocking(layout, group, Controller::Memory)?;
    set_memory_limit_by_chunks(layout, caps, tunables, group, chunks)
}

/// Memory usage of the group in chunks; mem+swap when swap accounting is
/// available, 0 while the memory controller is disabled
pub fn memory_usage(
    layout: &PathLayout,
    caps: &Capabilities,
    tunables: &Tunables,
    group: GroupId,
) -> Result<i32> {
    if !caps.memory {
        return Ok(0);
    }
    let leaf = if caps.swap {
        "memory.memsw.usage_in_bytes"
    } else {
        "memory.usage_in_bytes"
    };
    let path = layout.build(group, BaseDir::Managed, Controller::Memory, leaf)?;
    Ok(tunables.bytes_to_chunks(fsio::read_i64(&path)?))
}

/// Memory limit of the group in chunks; unlimited (i32::MAX) while the
/// memory controller is disabled
pub fn memory_limit_chunks(
    layout: &PathLayout,
    caps: &Capabilities,
    tunables: &Tunables,
    group: GroupId,
) -> Result<i32> {
    if !caps.memory {
        return Ok(i32::MAX);
    }
    let path = layout.build(group, BaseDir::Managed, Controller::Memory, MEMORY_LIMIT)?;
    Ok(tunables.bytes_to_chunks(fsio::read_i64(&path)?))
}

/// RAM and mem+swap limits imposed on our parent directory, in bytes.
/// Unlimited reads back as a huge number either way.
fn cgroup_memory_info(layout: &PathLayout, caps: &Capabilities) -> Result<(u64, u64)> {
    let path = layout.build(GroupId::ROOT, BaseDir::Parent, Controller::Memory, MEMORY_LIMIT)?;
    let cgram = fsio::read_i64(&path)? as u64;

    let cgmemsw = if caps.swap {
        let path = layout.build(GroupId::ROOT, BaseDir::Parent, Controller::Memory, MEMSW_LIMIT)?;
        fsio::read_i64(&path)? as u64
    } else {
        debug!("swap memory is unlimited");
        u64::MAX
    };
    Ok((cgram, cgmemsw))
}

/// Usable total memory of the host in MiB, honoring overcommit and any
/// container-imposed cgroup limits
pub fn total_memory_mb(layout: &PathLayout, caps: &Capabilities) -> Result<u64> {
    let ratio = host::overcommit_ratio()?;
    let (ram, swap) = host::memory_info()?;
    let (cgram, cgmemsw) = cgroup_memory_info(layout, caps)?;
    Ok(combine_total_memory(ram, swap, ratio as u64, cgram, cgmemsw))
}

/// Pure core of [`total_memory_mb`]; all byte quantities, result in MiB
fn combine_total_memory(ram: u64, swap: u64, ratio: u64, cgram: u64, cgmemsw: u64) -> u64 {
    let memsw = ram + swap;
    let overcommit_total = swap + ram * ratio / 100;

    let ram = ram.min(cgram);
    // When the cgroup bounds mem+swap below the machine's total, both ram
    // and swap are limited; otherwise sysinfo's swap size is safe to use.
    let swap = if cgmemsw < memsw {
        cgmemsw.saturating_sub(ram)
    } else {
        swap
    };

    overcommit_total.min(ram + swap) >> 20
}

/// Current cpuset of the group (`cpuset.cpus`); empty when the cpuset
/// capability is off
pub fn cpuset(layout: &PathLayout, caps: &Capabilities, group: GroupId) -> Result<String> {
    if !caps.cpuset {
        return Ok(String::new());
    }
    let path = layout.build(group, BaseDir::Managed, Controller::Cpuset, "cpuset.cpus")?;
    fsio::read_str(&path, MAX_CPUSET_LENGTH)
}

/// Pin the group to a set of cores. The value is a comma-separated list of
/// core numbers and closed ranges, e.g. `0,1,2-3`; the kernel validates
/// and canonicalizes the syntax on write.
pub fn set_cpuset(
    layout: &PathLayout,
    caps: &Capabilities,
    group: GroupId,
    value: &str,
) -> Result<()> {
    if !caps.cpuset {
        return Ok(());
    }
    let path = layout.build(group, BaseDir::Managed, Controller::Cpuset, "cpuset.cpus")?;
    fsio::write_str(&path, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::MANAGED_BASEDIR;
    use proptest::prelude::*;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn full_caps() -> Capabilities {
        Capabilities { memory: true, swap: true, cpuset: true }
    }

    /// Minimal cpu layout: parent files plus the managed sub-tree
    fn seed_cpu(mount: &Path) -> PathLayout {
        let parent = mount.join("cpu");
        fs::create_dir_all(parent.join(MANAGED_BASEDIR)).unwrap();
        fs::write(parent.join("cpu.shares"), "1024").unwrap();
        fs::write(parent.join("cpu.cfs_quota_us"), "-1").unwrap();
        for leaf in ["cpu.shares", "cpu.cfs_quota_us", "cpu.cfs_period_us"] {
            fs::write(parent.join(MANAGED_BASEDIR).join(leaf), "100000").unwrap();
        }
        PathLayout::new(mount.to_path_buf())
    }

    fn seed_cpu_group(mount: &Path, group: &str) {
        let dir = mount.join("cpu").join(MANAGED_BASEDIR).join(group);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("cpu.shares"), "0").unwrap();
        fs::write(dir.join("cpu.cfs_quota_us"), "0").unwrap();
    }

    fn seed_memory_group(mount: &Path, group: &str, limit: i64, memsw: i64) {
        let dir = mount.join("memory").join(MANAGED_BASEDIR).join(group);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(MEMORY_LIMIT), limit.to_string()).unwrap();
        fs::write(dir.join(MEMSW_LIMIT), memsw.to_string()).unwrap();
    }

    fn read_i64_at(path: &Path) -> i64 {
        fs::read_to_string(path).unwrap().trim().parse().unwrap()
    }

    #[test]
    fn test_init_cpu_with_unlimited_parent() {
        let dir = tempdir().unwrap();
        let layout = seed_cpu(dir.path());

        // 4 cores, period 100000, parent unbounded, 90% claim
        let cal = CfsCalibration {
            ncores: 4,
            system_cfs_quota_us: 400_000,
            parent_cfs_quota_us: -1,
        };
        let tunables = Tunables::default();
        init_cpu(&layout, &cal, &tunables).unwrap();

        let managed = dir.path().join("cpu").join(MANAGED_BASEDIR);
        assert_eq!(read_i64_at(&managed.join("cpu.cfs_quota_us")), 360_000);
        // shares := parent shares × priority
        assert_eq!(read_i64_at(&managed.join("cpu.shares")), 1024 * 10);
        // the parent's own quota is never touched
        assert_eq!(read_i64_at(&dir.path().join("cpu").join("cpu.cfs_quota_us")), -1);
    }

    #[test]
    fn test_init_cpu_with_bounded_parent() {
        let dir = tempdir().unwrap();
        let layout = seed_cpu(dir.path());

        let cal = CfsCalibration {
            ncores: 4,
            system_cfs_quota_us: 400_000,
            parent_cfs_quota_us: 200_000,
        };
        init_cpu(&layout, &cal, &Tunables::default()).unwrap();

        let managed = dir.path().join("cpu").join(MANAGED_BASEDIR);
        assert_eq!(read_i64_at(&managed.join("cpu.cfs_quota_us")), 180_000);
    }

    #[test]
    fn test_cfs_period_rewrites_zero() {
        let dir = tempdir().unwrap();
        let layout = seed_cpu(dir.path());
        let path = dir
            .path()
            .join("cpu")
            .join(MANAGED_BASEDIR)
            .join("cpu.cfs_period_us");
        fs::write(&path, "0").unwrap();

        assert_eq!(cfs_period_us(&layout).unwrap(), DEFAULT_CPU_PERIOD_US);
        assert_eq!(read_i64_at(&path), DEFAULT_CPU_PERIOD_US);
    }

    #[test]
    fn test_set_cpu_limit_shares_and_ceiling() {
        let dir = tempdir().unwrap();
        let layout = seed_cpu(dir.path());
        seed_cpu_group(dir.path(), "42");
        let managed = dir.path().join("cpu").join(MANAGED_BASEDIR);
        fs::write(managed.join("cpu.shares"), "10240").unwrap();

        let cal = CfsCalibration {
            ncores: 4,
            system_cfs_quota_us: 400_000,
            parent_cfs_quota_us: -1,
        };
        let group = GroupId::new(42);

        // soft limit only: quota is reset to unlimited
        let tunables = Tunables::default();
        set_cpu_limit(&layout, &cal, &tunables, group, 30).unwrap();
        assert_eq!(read_i64_at(&managed.join("42").join("cpu.shares")), 10240 * 30 / 100);
        assert_eq!(read_i64_at(&managed.join("42").join("cpu.cfs_quota_us")), -1);

        // ceiling enforcement adds the hard quota
        let mut tunables = Tunables::default();
        tunables.cpu_ceiling_enforcement = true;
        set_cpu_limit(&layout, &cal, &tunables, group, 30).unwrap();
        assert_eq!(
            read_i64_at(&managed.join("42").join("cpu.cfs_quota_us")),
            100_000 * 4 * 30 / 100
        );

        // boundary rates
        set_cpu_limit(&layout, &cal, &tunables, group, 0).unwrap();
        assert_eq!(read_i64_at(&managed.join("42").join("cpu.shares")), 0);
        set_cpu_limit(&layout, &cal, &tunables, group, 100).unwrap();
        assert_eq!(read_i64_at(&managed.join("42").join("cpu.shares")), 10240);
    }

    #[test]
    fn test_set_cpu_limit_idempotent() {
        let dir = tempdir().unwrap();
        let layout = seed_cpu(dir.path());
        seed_cpu_group(dir.path(), "42");

        let cal = CfsCalibration {
            ncores: 4,
            system_cfs_quota_us: 400_000,
            parent_cfs_quota_us: -1,
        };
        let tunables = Tunables::default();
        let group = GroupId::new(42);
        set_cpu_limit(&layout, &cal, &tunables, group, 55).unwrap();
        let managed = dir.path().join("cpu").join(MANAGED_BASEDIR).join("42");
        let shares = read_i64_at(&managed.join("cpu.shares"));
        let quota = read_i64_at(&managed.join("cpu.cfs_quota_us"));

        set_cpu_limit(&layout, &cal, &tunables, group, 55).unwrap();
        assert_eq!(read_i64_at(&managed.join("cpu.shares")), shares);
        assert_eq!(read_i64_at(&managed.join("cpu.cfs_quota_us")), quota);
    }

    #[test]
    fn test_convert_cpu_usage_scenarios() {
        let cal = CfsCalibration {
            ncores: 8,
            system_cfs_quota_us: 800_000,
            parent_cfs_quota_us: -1,
        };
        // idle group over one second
        assert_eq!(convert_cpu_usage(&cal, 0, 1_000_000), 0.0);
        // one core fully busy for one second on an 8-core box
        assert!((convert_cpu_usage(&cal, 8_000_000_000, 1_000_000) - 12.5).abs() < 1e-9);
    }

    #[test]
    fn test_convert_cpu_usage_rescales_to_parent_quota() {
        // container limited to half a machine: saturating the parent's
        // quota must read as 100%
        let cal = CfsCalibration {
            ncores: 8,
            system_cfs_quota_us: 800_000,
            parent_cfs_quota_us: 400_000,
        };
        // 4 cores busy for 1s = the parent's entire budget
        let percent = convert_cpu_usage(&cal, 4 * 1_000_000_000, 1_000_000);
        assert!((percent - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_memsw_write_order() {
        // raising: memsw first so limit <= memsw holds throughout
        assert_eq!(
            plan_memsw_writes(200, 100),
            vec![(MEMSW_LIMIT, 200), (MEMORY_LIMIT, 200)]
        );
        // lowering: memory first
        assert_eq!(
            plan_memsw_writes(50, 100),
            vec![(MEMORY_LIMIT, 50), (MEMSW_LIMIT, 50)]
        );
        // unchanged: no writes
        assert!(plan_memsw_writes(100, 100).is_empty());
    }

    #[test]
    fn test_set_memory_limit_by_chunks() {
        let dir = tempdir().unwrap();
        let layout = PathLayout::new(dir.path().to_path_buf());
        let tunables = Tunables::default();
        let group = GroupId::new(42);
        seed_memory_group(dir.path(), "42", 100 << 20, 100 << 20);

        // lower 100MB -> 50MB
        set_memory_limit_by_chunks(&layout, &full_caps(), &tunables, group, 50).unwrap();
        let managed = dir.path().join("memory").join(MANAGED_BASEDIR).join("42");
        assert_eq!(read_i64_at(&managed.join(MEMORY_LIMIT)), 50 << 20);
        assert_eq!(read_i64_at(&managed.join(MEMSW_LIMIT)), 50 << 20);

        // raise back up
        set_memory_limit_by_chunks(&layout, &full_caps(), &tunables, group, 200).unwrap();
        assert_eq!(read_i64_at(&managed.join(MEMORY_LIMIT)), 200 << 20);
        assert_eq!(read_i64_at(&managed.join(MEMSW_LIMIT)), 200 << 20);

        // without swap accounting only the memory limit moves
        let caps = Capabilities { memory: true, swap: false, cpuset: false };
        set_memory_limit_by_chunks(&layout, &caps, &tunables, group, 80).unwrap();
        assert_eq!(read_i64_at(&managed.join(MEMORY_LIMIT)), 80 << 20);
        assert_eq!(read_i64_at(&managed.join(MEMSW_LIMIT)), 200 << 20);

        // disabled memory controller: complete no-op
        let caps = Capabilities::default();
        set_memory_limit_by_chunks(&layout, &caps, &tunables, GroupId::new(7), 10).unwrap();
    }

    #[test]
    fn test_set_memory_limit_takes_rate() {
        let dir = tempdir().unwrap();
        let layout = PathLayout::new(dir.path().to_path_buf());
        seed_memory_group(dir.path(), "42", i64::MAX, i64::MAX);

        let mut tunables = Tunables::default();
        tunables.vmem_limit_chunks = 1000;
        tunables.host_primary_count = 2;

        set_memory_limit(&layout, &full_caps(), &tunables, GroupId::new(42), 50).unwrap();
        let managed = dir.path().join("memory").join(MANAGED_BASEDIR).join("42");
        // 1000 × 50% × 2 segments = 1000 chunks
        assert_eq!(read_i64_at(&managed.join(MEMORY_LIMIT)), 1000 << 20);
    }

    #[test]
    fn test_memory_readbacks() {
        let dir = tempdir().unwrap();
        let layout = PathLayout::new(dir.path().to_path_buf());
        let tunables = Tunables::default();
        let group = GroupId::new(42);

        let managed = dir.path().join("memory").join(MANAGED_BASEDIR).join("42");
        seed_memory_group(dir.path(), "42", 100 << 20, 100 << 20);
        fs::write(managed.join("memory.usage_in_bytes"), (30i64 << 20).to_string()).unwrap();
        fs::write(managed.join("memory.memsw.usage_in_bytes"), (40i64 << 20).to_string()).unwrap();

        assert_eq!(memory_usage(&layout, &full_caps(), &tunables, group).unwrap(), 40);
        let no_swap = Capabilities { memory: true, swap: false, cpuset: false };
        assert_eq!(memory_usage(&layout, &no_swap, &tunables, group).unwrap(), 30);
        assert_eq!(
            memory_limit_chunks(&layout, &full_caps(), &tunables, group).unwrap(),
            100
        );

        // disabled controller reports idle usage and an unlimited budget
        let off = Capabilities::default();
        assert_eq!(memory_usage(&layout, &off, &tunables, group).unwrap(), 0);
        assert_eq!(memory_limit_chunks(&layout, &off, &tunables, group).unwrap(), i32::MAX);
    }

    #[test]
    fn test_combine_total_memory() {
        const GIB: u64 = 1 << 30;
        // no cgroup limits: overcommit rules alone
        // 8G ram + 8G swap, ratio 50 -> min(8 + 4, 16) = 12G
        assert_eq!(
            combine_total_memory(8 * GIB, 8 * GIB, 50, u64::MAX, u64::MAX),
            12 * 1024
        );
        // container caps ram at 4G and mem+swap at 6G -> 4G ram + 2G swap
        assert_eq!(
            combine_total_memory(8 * GIB, 8 * GIB, 50, 4 * GIB, 6 * GIB),
            6 * 1024
        );
    }

    #[test]
    fn test_cpuset_roundtrip_and_disabled() {
        let dir = tempdir().unwrap();
        let layout = PathLayout::new(dir.path().to_path_buf());
        let group = GroupId::new(42);
        let cdir = dir.path().join("cpuset").join(MANAGED_BASEDIR).join("42");
        fs::create_dir_all(&cdir).unwrap();
        fs::write(cdir.join("cpuset.cpus"), "").unwrap();

        set_cpuset(&layout, &full_caps(), group, "0,1,2-3").unwrap();
        assert_eq!(cpuset(&layout, &full_caps(), group).unwrap(), "0,1,2-3");

        // capability off: set is a no-op, get reads empty
        let off = Capabilities::default();
        set_cpuset(&layout, &off, group, "4-7").unwrap();
        assert_eq!(cpuset(&layout, &off, group).unwrap(), "");
        assert_eq!(cpuset(&layout, &full_caps(), group).unwrap(), "0,1,2-3");
    }

    proptest! {
        #[test]
        fn prop_convert_monotone_in_usage(u1 in 0i64..1_000_000_000_000, u2 in 0i64..1_000_000_000_000) {
            let cal = CfsCalibration {
                ncores: 8,
                system_cfs_quota_us: 800_000,
                parent_cfs_quota_us: 400_000,
            };
            let (lo, hi) = if u1 <= u2 { (u1, u2) } else { (u2, u1) };
            prop_assert!(convert_cpu_usage(&cal, lo, 1_000_000) <= convert_cpu_usage(&cal, hi, 1_000_000));
        }

        #[test]
        fn prop_convert_linear_in_inverse_cores(usage in 0i64..1_000_000_000_000, ncores in 1i64..128) {
            let cal = CfsCalibration {
                ncores,
                system_cfs_quota_us: 100_000 * ncores,
                parent_cfs_quota_us: -1,
            };
            let doubled = CfsCalibration {
                ncores: ncores * 2,
                system_cfs_quota_us: 100_000 * ncores * 2,
                parent_cfs_quota_us: -1,
            };
            let a = convert_cpu_usage(&cal, usage, 1_000_000);
            let b = convert_cpu_usage(&doubled, usage, 1_000_000);
            prop_assert!((a - 2.0 * b).abs() <= a.abs() * 1e-12 + 1e-12);
        }

        #[test]
        fn prop_memsw_order_never_inverts(old in 0i64..1_000_000, memsw0 in 0i64..1_000_000, new in 0i64..1_000_000) {
            // start from any legal state: limit <= memsw
            prop_assume!(old <= memsw0);
            let mut limit = old;
            let mut memsw = memsw0;
            for (leaf, value) in plan_memsw_writes(new, old) {
                match leaf {
                    MEMORY_LIMIT => limit = value,
                    MEMSW_LIMIT => memsw = value,
                    _ => unreachable!(),
                }
                prop_assert!(limit <= memsw, "limit {limit} > memsw {memsw} mid-update");
            }
        }
    }
}
