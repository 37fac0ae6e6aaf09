//! Path construction for the cgroup v1 hierarchy
//!
//! Every path the backend touches has the shape
//! `<mount>/<controller><subpath>[/resfence][/<group>][/<leaf>]` where
//! `<subpath>` is discovered from the init process's cgroup memberships and
//! is empty in the common case.

use std::path::PathBuf;

use crate::controller::{Controller, GroupId, MANAGED_BASEDIR, MAX_CGROUP_PATHLEN};
use crate::error::{CgroupError, Result};

/// Whether a path addresses the controller mount itself or the managed
/// sub-tree all groups live under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseDir {
    /// The top-level mount (or the container-imposed wrapper above us)
    Parent,
    /// The `resfence` sub-tree
    Managed,
}

/// Discovered controller layout: the cgroup mount point plus one sub-path
/// per controller. Populated once during probe, read-only afterwards.
#[derive(Debug, Clone)]
pub struct PathLayout {
    mount_dir: PathBuf,
    comp_dirs: [String; Controller::COUNT],
}

impl PathLayout {
    /// Layout with every controller at its fallback sub-path (directly
    /// under the mount)
    pub fn new(mount_dir: PathBuf) -> PathLayout {
        PathLayout {
            mount_dir,
            comp_dirs: Default::default(),
        }
    }

    pub fn mount_dir(&self) -> &PathBuf {
        &self.mount_dir
    }

    /// Sub-path for one controller, `""` or of the form `/custom/nested`
    pub fn comp_dir(&self, controller: Controller) -> &str {
        &self.comp_dirs[controller.index()]
    }

    pub fn set_comp_dir(&mut self, controller: Controller, dir: impl Into<String>) {
        self.comp_dirs[controller.index()] = dir.into();
    }

    /// Reset every controller to the fallback sub-path. All-or-nothing:
    /// discovery never leaves a mix of detected and fallback entries.
    pub fn reset_comp_dirs(&mut self) {
        self.comp_dirs = Default::default();
    }

    /// Build the path for `leaf` under the given group and base directory.
    ///
    /// `GroupId::ROOT` addresses the base directory itself and appends no
    /// numeric component. An empty `leaf` addresses the directory.
    pub fn build(
        &self,
        group: GroupId,
        base: BaseDir,
        controller: Controller,
        leaf: &str,
    ) -> Result<PathBuf> {
        self.try_build(group, base, controller, leaf).ok_or_else(|| {
            CgroupError::config(format!(
                "invalid {} name under '{}': path exceeds {} bytes",
                if leaf.is_empty() { "directory" } else { "file" },
                self.mount_dir.display(),
                MAX_CGROUP_PATHLEN
            ))
        })
    }

    /// Non-raising variant of [`build`](Self::build); `None` when the
    /// rendered path would exceed `MAX_CGROUP_PATHLEN`.
    pub fn try_build(
        &self,
        group: GroupId,
        base: BaseDir,
        controller: Controller,
        leaf: &str,
    ) -> Option<PathBuf> {
        // Only the managed sub-tree contains per-group directories.
        debug_assert!(
            base == BaseDir::Managed || group == GroupId::ROOT,
            "parent base dir has no group component"
        );

        let mut path = format!(
            "{}/{}{}",
            self.mount_dir.display(),
            controller.name(),
            self.comp_dir(controller)
        );
        if base == BaseDir::Managed {
            path.push('/');
            path.push_str(MANAGED_BASEDIR);
        }
        if group != GroupId::ROOT {
            path.push('/');
            path.push_str(&group.to_string());
        }
        if !leaf.is_empty() {
            path.push('/');
            path.push_str(leaf);
        }

        if path.len() > MAX_CGROUP_PATHLEN {
            return None;
        }
        Some(PathBuf::from(path))
    }
}
