//! Filesystem setup performed inside the child, after the readiness token
//! arrives: bind-mount the rootfs onto itself, `pivot_root`, remount
//! `/proc`, and detach the old root.

use std::fs::create_dir;
use std::io::ErrorKind;
use std::path::Path;

use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::unistd::{chdir, pivot_root};

use crate::error::{ignore_kind, Error};

const PUT_OLD: &str = ".put_old";

/// Runs the full pivot: on return, the mount table contains only the new
/// rootfs and a fresh `/proc`; the host's original root is unreachable.
pub fn setup_rootfs(rootfs: &Path) -> Result<(), Error> {
    bind_mount_self(rootfs)?;
    chdir(rootfs).map_err(|err| format!("cannot chdir to rootfs: {err}"))?;
    ignore_kind(create_dir(PUT_OLD), ErrorKind::AlreadyExists)
        .map_err(|err| format!("cannot mkdir {PUT_OLD}: {err}"))?;
    pivot_root(".", PUT_OLD).map_err(|err| format!("pivot_root failed: {err}"))?;
    chdir("/").map_err(|err| format!("cannot chdir to new root: {err}"))?;
    mount_proc()?;
    umount2(PUT_OLD, MntFlags::MNT_DETACH).map_err(|err| format!("cannot unmount {PUT_OLD}: {err}"))?;
    Ok(())
}

/// `pivot_root` requires the new root to be a mount point distinct from its
/// parent, so the rootfs is bind-mounted onto itself first. The filesystem
/// type is left empty: the kernel ignores it under `MS_BIND`, and passing
/// one (as the original C implementation did, with `"ext4"`) only invites
/// confusion about what the call actually does.
fn bind_mount_self(rootfs: &Path) -> Result<(), Error> {
    mount(
        Some(rootfs),
        rootfs,
        None::<&str>,
        MsFlags::MS_BIND,
        None::<&str>,
    )
    .map_err(|err| format!("cannot bind-mount {}: {err}", rootfs.display()))?;
    Ok(())
}

fn mount_proc() -> Result<(), Error> {
    ignore_kind(create_dir("/proc"), ErrorKind::AlreadyExists)
        .map_err(|err| format!("cannot mkdir /proc: {err}"))?;
    mount(
        Some("proc"),
        "/proc",
        Some("proc"),
        MsFlags::empty(),
        None::<&str>,
    )
    .map_err(|err| format!("cannot mount /proc: {err}"))?;
    Ok(())
}
