pub mod config;
pub mod controller;
pub mod error;
pub mod paths;

// Linux-only cgroup modules
#[cfg(target_os = "linux")]
pub mod backend;
#[cfg(target_os = "linux")]
pub mod fsio;
#[cfg(target_os = "linux")]
pub mod group;
#[cfg(target_os = "linux")]
pub mod host;
#[cfg(target_os = "linux")]
pub mod limits;
#[cfg(target_os = "linux")]
pub mod mounts;
#[cfg(target_os = "linux")]
pub mod perms;

pub use config::Tunables;
pub use controller::{Controller, GroupId};
pub use error::{CgroupError, Result};

#[cfg(target_os = "linux")]
pub use backend::{select_backend, CgroupV1, ResGroupOps};
#[cfg(target_os = "linux")]
pub use perms::Capabilities;
