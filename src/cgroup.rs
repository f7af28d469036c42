//! Unified-hierarchy (cgroup v2) writer. A [`Cgroup`] names a directory
//! under the cgroupfs mount; creating it and writing its control files are
//! the only operations this controller performs. The kernel is the
//! authoritative parser for every limit string, so values are written
//! through verbatim -- a malformed limit surfaces as a write error, not a
//! validation error here.

use std::fs::{create_dir_all, read, set_permissions, File};
use std::io::Write as _;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use crate::clone::Pid;
use crate::config::ResourceProfile;
use crate::error::Error;

const PROC_SELF_CGROUP: &str = "/proc/self/cgroup";
const CGROUP_PROCS: &str = "cgroup.procs";
const DIR_MODE: u32 = 0o755;

#[derive(Clone, Debug)]
pub struct Cgroup {
    mount_path: PathBuf,
    path: PathBuf,
}

impl Cgroup {
    pub fn new(mount_path: impl Into<PathBuf>, name: impl AsRef<Path>) -> Result<Self, Error> {
        let name = name.as_ref();
        if name.is_absolute() {
            return Err("cgroup name cannot be absolute".into());
        }
        let mount_path = mount_path.into();
        if !mount_path.is_absolute() {
            return Err("cgroup mount path must be absolute".into());
        }
        let path = mount_path.join(name);
        Ok(Self { mount_path, path })
    }

    pub fn as_path(&self) -> &Path {
        &self.path
    }

    pub fn mount_path(&self) -> &Path {
        &self.mount_path
    }

    pub fn name(&self) -> &Path {
        self.path
            .strip_prefix(&self.mount_path)
            .expect("cgroup path does not start with its own mount path")
    }

    /// Resolves the cgroup the calling process currently belongs to, by
    /// reading its own `/proc/self/cgroup` entry (the unified hierarchy
    /// always has exactly one, empty-named, controller list).
    pub fn current() -> Result<Self, Error> {
        for line in String::from_utf8(read(PROC_SELF_CGROUP)?)?.split('\n') {
            let parts: Vec<_> = line.split(':').collect();
            if let Some(controllers) = parts.get(1) {
                if !controllers.is_empty() {
                    continue;
                }
            }
            let path = parts
                .get(2)
                .ok_or("expected a cgroup path field")?
                .trim_start_matches('/');
            return Cgroup::new("/sys/fs/cgroup", path);
        }
        Err("cannot resolve current cgroup".into())
    }

    pub fn parent(&self) -> Option<Self> {
        let path = self.path.parent()?;
        path.starts_with(&self.mount_path).then(|| Self {
            mount_path: self.mount_path.clone(),
            path: path.to_owned(),
        })
    }

    pub fn child(&self, name: impl AsRef<Path>) -> Result<Self, Error> {
        let name = name.as_ref();
        if name.is_absolute() {
            return Err("child cgroup name cannot be absolute".into());
        }
        Ok(Self {
            mount_path: self.mount_path.clone(),
            path: self.path.join(name),
        })
    }

    /// Creates the cgroup directory with mode 0755 if it does not already
    /// exist. Idempotent: calling this twice on the same path leaves the
    /// directory in the same state both times.
    pub fn create(&self) -> Result<(), Error> {
        create_dir_all(&self.path)?;
        set_permissions(&self.path, std::fs::Permissions::from_mode(DIR_MODE))?;
        Ok(())
    }

    fn write_control_file(&self, name: &str, value: &str) -> Result<(), Error> {
        let mut file = File::options()
            .write(true)
            .custom_flags(nix::libc::O_CLOEXEC)
            .open(self.path.join(name))?;
        file.write_all(value.as_bytes())?;
        Ok(())
    }

    pub fn set_cpu(&self, quota_period: &str) -> Result<(), Error> {
        self.write_control_file("cpu.max", quota_period)
    }

    pub fn set_memory(&self, limit: &str) -> Result<(), Error> {
        self.write_control_file("memory.max", limit)
    }

    pub fn set_pids(&self, max: &str) -> Result<(), Error> {
        self.write_control_file("pids.max", max)
    }

    pub fn set_io(&self, limits: &str) -> Result<(), Error> {
        self.write_control_file("io.max", limits)
    }

    /// Adds `pid` to `cgroup.procs`. Limits must already be written -- the
    /// orchestrator is responsible for that ordering, not this call.
    pub fn attach(&self, pid: Pid) -> Result<(), Error> {
        self.write_control_file(CGROUP_PROCS, &pid.to_string())
    }

    /// Applies the default resource profile and attaches `pid`, in the
    /// order the kernel requires: limits before attachment.
    pub fn init_and_limit(&self, pid: Pid, profile: &ResourceProfile) -> Result<(), Error> {
        self.create()?;
        self.set_cpu(&profile.cpu_max)?;
        self.set_memory(&profile.memory_max)?;
        self.set_pids(&profile.pids_max)?;
        if let Some(io) = &profile.io_max {
            self.set_io(io)?;
        }
        self.attach(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_absolute_names() {
        assert!(Cgroup::new("/sys/fs/cgroup", "/abs").is_err());
        assert!(Cgroup::new("relative", "name").is_err());
    }

    #[test]
    fn child_and_parent_round_trip() {
        let root = Cgroup::new("/sys/fs/cgroup", "isolate_group").unwrap();
        let child = root.child("init").unwrap();
        assert_eq!(child.as_path(), Path::new("/sys/fs/cgroup/isolate_group/init"));
        assert_eq!(child.parent().unwrap().as_path(), root.as_path());
        assert_eq!(child.name(), Path::new("isolate_group/init"));
    }

    #[test]
    fn parent_stops_at_mount_path() {
        let root = Cgroup::new("/sys/fs/cgroup", "isolate_group").unwrap();
        assert!(root.parent().is_none());
    }
}
