use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use isolate::cgroup::Cgroup;
use isolate::error::Error;
use rand::distributions::{Alphanumeric, DistString as _};

pub struct TempDir(PathBuf);

impl TempDir {
    #[allow(unused)]
    pub fn new() -> Result<Self, Error> {
        let tmpdir = Path::new(env!("CARGO_TARGET_TMPDIR"));
        let path = loop {
            let path = tmpdir.join(format!("test-{}", rand_string(32)));
            match std::fs::metadata(&path) {
                Ok(_) => continue,
                Err(v) if v.kind() == ErrorKind::NotFound => break path,
                Err(v) => return Err(v.into()),
            }
        };
        std::fs::create_dir_all(&path)?;
        Ok(Self(path))
    }

    #[allow(unused)]
    pub fn as_path(&self) -> &Path {
        self.0.as_path()
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

#[allow(unused)]
pub fn rand_string(len: usize) -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), len)
}

/// Unpacks a minimal busybox rootfs into `dest` via the system `curl` and
/// `tar`, the way the lineage's own test fixtures avoid vendoring a rootfs
/// image into the repository.
#[allow(unused)]
pub fn fetch_rootfs(dest: &Path) -> Result<(), Error> {
    std::fs::create_dir_all(dest)?;
    let status = std::process::Command::new("/bin/sh")
        .arg("./tests/get_rootfs.sh")
        .arg(dest)
        .status()
        .map_err(|err| format!("cannot run get_rootfs.sh: {err}"))?;
    if !status.success() {
        return Err("get_rootfs.sh failed".into());
    }
    Ok(())
}

#[allow(unused)]
pub fn get_cgroup() -> Result<Cgroup, Error> {
    if let Ok(path) = std::env::var("TEST_CGROUP_PATH") {
        let path = PathBuf::from(path);
        let root = "/sys/fs/cgroup";
        return Cgroup::new(root, path.strip_prefix(root).unwrap_or(&path));
    }
    Cgroup::current()?
        .parent()
        .ok_or_else(|| "current process cannot be in the root cgroup".into())
}

pub struct TempCgroup(Cgroup);

impl TempCgroup {
    #[allow(unused)]
    pub fn new() -> Result<Self, Error> {
        let cgroup = get_cgroup()?.child(format!("test-{}", rand_string(32)))?;
        cgroup.create()?;
        Ok(Self(cgroup))
    }
}

impl std::ops::Deref for TempCgroup {
    type Target = Cgroup;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Drop for TempCgroup {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(self.0.as_path());
    }
}

/// This crate's integration tests create real namespaces and write real
/// cgroupfs files; skip them with a visible message instead of letting them
/// fail opaquely when not run under a privileged runner.
#[allow(unused)]
pub fn require_root() -> bool {
    if nix::unistd::Uid::effective().is_root() {
        true
    } else {
        eprintln!("skipping: this test requires root privileges");
        false
    }
}
