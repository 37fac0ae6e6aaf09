//! Host probes: core count, physical memory, overcommit ratio

use std::io;
use std::path::Path;

use crate::error::{CgroupError, Result};
use crate::fsio;

/// Number of online CPU cores
pub fn cpu_cores() -> Result<i64> {
    let cores = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if cores < 1 {
        return Err(CgroupError::config("can't get the number of online cpu cores"));
    }
    Ok(cores)
}

/// Total RAM and total swap in bytes, from sysinfo(2)
pub fn memory_info() -> Result<(u64, u64)> {
    let mut info: libc::sysinfo = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::sysinfo(&mut info) };
    if rc < 0 {
        return Err(CgroupError::io(
            "sysinfo",
            "/proc",
            io::Error::last_os_error(),
        ));
    }
    // totalram/totalswap are counted in mem_unit-sized blocks
    let unit = info.mem_unit as u64;
    Ok((info.totalram * unit, info.totalswap * unit))
}

/// vm.overcommit_ratio, as a percentage
pub fn overcommit_ratio() -> Result<i64> {
    fsio::read_i64(Path::new("/proc/sys/vm/overcommit_ratio"))
}
