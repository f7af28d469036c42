//! User-namespace identity mapping: writes `uid_map`, `setgroups`, and
//! `gid_map` for a just-cloned child. Ordering is load-bearing -- the
//! kernel refuses an unprivileged `gid_map` write unless `setgroups` was
//! already set to `deny`, so `setgroups` is written strictly between the
//! two ID maps.

use std::fs::File;
use std::io::Write as _;

use crate::clone::Pid;
use crate::error::Error;

fn write_proc_file(pid: Pid, name: &str, value: &str) -> Result<(), Error> {
    let path = format!("/proc/{}/{name}", pid.as_raw());
    File::options()
        .write(true)
        .open(&path)
        .map_err(|err| format!("cannot open {path}: {err}"))?
        .write_all(value.as_bytes())
        .map_err(|err| format!("cannot write {path}: {err}"))?;
    Ok(())
}

/// Maps host UID `host_uid` to container UID/GID 0, and denies `setgroups`
/// so the mapping is accepted by an unprivileged parent.
pub fn map_identity(pid: Pid, host_uid: u32) -> Result<(), Error> {
    let mapping = format!("0 {host_uid} 1");
    write_proc_file(pid, "uid_map", &mapping)?;
    write_proc_file(pid, "setgroups", "deny")?;
    write_proc_file(pid, "gid_map", &mapping)?;
    Ok(())
}
