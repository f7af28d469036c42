//! Ties the other controllers together into the parent/child handshake:
//!
//! ```text
//! P: CREATE_PIPE -> CLONE(flags) ───────────────────┐
//!                                                    v
//!                                   C: WAIT_ON_PIPE
//! P: CGROUP_INIT_AND_ATTACH(child_pid)
//! P: USERNS_MAP(child_pid)
//! P: NETNS_WIRE(child_pid)
//! P: WRITE_READY("OK") -> CLOSE_WRITE
//!                                   C: <- READY
//!                                   C: PIVOT_ROOT + MOUNT_PROC
//!                                   C: SETGID(0) + SETUID(0)
//!                                   C: EXECVP(argv)
//! P: WAITPID(child_pid) -> EXIT
//! ```
//!
//! Everything the parent does between `CLONE` and `WRITE_READY` must be
//! visible to the child once it wakes: that line is the crate's only
//! happens-before edge, and it is why cgroup attachment and namespace
//! mapping run before the pipe write rather than after.

use std::ffi::CString;
use std::os::fd::AsRawFd;

use nix::sched::{setns, CloneFlags};
use nix::unistd::{chdir, execvp, setgid, setuid, Gid, Uid};

use crate::cgroup::Cgroup;
use crate::clone::{self, CloneArgs, CloneResult, OwnedPid, ReadyPipe};
use crate::config::Config;
use crate::error::Error;
use crate::mounts::setup_rootfs;
use crate::netlink::{create_veth, get_netns_fd, if_up, move_if_to_netns, RtnlSocket};
use crate::userns::map_identity;

/// Runs one full launch: clones the isolated child, wires its cgroup,
/// identity mapping, and network, releases it, and waits for it to exit.
///
/// Returns once the child has been reaped. Per the observed behavior of
/// this runtime's lineage, the child's own exit status is not reflected in
/// the return value -- a successful `waitpid` is success, regardless of
/// how the child terminated.
pub fn launch(config: &Config, command: &[String]) -> Result<(), Error> {
    let pipe = ReadyPipe::new()?;
    let args = CloneArgs::new_isolated();

    log::debug!("cloning with flags={:#x}", args.flags);
    match unsafe { clone::clone3(&args) }? {
        // Still the same process image, past the syscall that makes
        // getpid() report a new value in a new PID namespace. Dispatches
        // straight into run_child, which never returns.
        CloneResult::Child => run_child(config, command, pipe.rx()),
        CloneResult::Parent { child } => {
            let child = unsafe { OwnedPid::from_raw(child) };
            log::info!("child pid {} assigned", child.as_raw());
            run_parent(config, &child, pipe)?;
            let status = child.wait()?;
            log::info!("child reaped: {status:?}");
            Ok(())
        }
    }
}

fn run_child(config: &Config, command: &[String], rx: impl std::io::Read) -> ! {
    let context = "child setup";
    let result = (|| -> Result<(), Error> {
        arm_parent_death_signal()?;
        clone::wait_ready(rx)?;
        log::debug!("child released from readiness barrier");
        setup_rootfs(&config.rootfs)?;
        setgid(Gid::from_raw(0)).map_err(|err| format!("setgid failed: {err}"))?;
        setuid(Uid::from_raw(0)).map_err(|err| format!("setuid failed: {err}"))?;
        chdir("/").map_err(|err| format!("cannot chdir to /: {err}"))?;
        exec(command)
    })();
    if let Err(err) = result {
        crate::error::die(context, err);
    }
    unreachable!("exec either replaces this process image or returns an Err handled above");
}

fn exec(command: &[String]) -> Result<(), Error> {
    let program = CString::new(command[0].as_str())?;
    let argv: Vec<CString> = command
        .iter()
        .map(|arg| CString::new(arg.as_str()))
        .collect::<Result<_, _>>()?;
    log::debug!("execvp {:?}", command);
    Err(format!("exec {} failed: {}", command[0], execvp(&program, &argv).unwrap_err()).into())
}

fn arm_parent_death_signal() -> Result<(), Error> {
    let res = unsafe { nix::libc::prctl(nix::libc::PR_SET_PDEATHSIG, nix::libc::SIGKILL) };
    if res != 0 {
        return Err(format!("prctl(PR_SET_PDEATHSIG) failed: {}", nix::errno::Errno::last()).into());
    }
    Ok(())
}

/// Everything the parent does while the child sits on the readiness
/// barrier: attach it to its cgroup, map its identity, and wire its
/// network, in that order, then release it.
fn run_parent(config: &Config, child: &OwnedPid, pipe: ReadyPipe) -> Result<(), Error> {
    let pid = child.as_raw();

    let cgroup = Cgroup::new(config.cgroup_mount.clone(), &config.cgroup_name)?;
    cgroup.init_and_limit(pid, &config.resources)?;
    log::debug!("cgroup {} limits applied and child attached", cgroup.as_path().display());

    map_identity(pid, config.host_uid)?;
    log::debug!("identity mapping installed for pid {}", pid);

    wire_network(config, pid)?;

    clone::signal_ready(pipe.tx())?;
    log::info!("readiness token sent to pid {}", pid);
    Ok(())
}

/// Creates the veth pair in the parent's own network namespace, brings up
/// the host side, hands the peer to the child's namespace, then briefly
/// enters that namespace to bring the peer up before restoring its own.
fn wire_network(config: &Config, child_pid: clone::Pid) -> Result<(), Error> {
    let net = &config.network;
    let mut sock = RtnlSocket::open()?;
    create_veth(&mut sock, &net.host.name, &net.peer.name)?;
    log::debug!("veth pair {}/{} created", net.host.name, net.peer.name);

    if_up(&net.host.name, net.host.address, net.netmask)?;
    log::debug!("{} up at {}", net.host.name, net.host.address);

    let parent_netns = std::fs::File::open("/proc/self/ns/net")
        .map_err(|err| format!("cannot open own netns: {err}"))?;
    let child_netns = get_netns_fd(child_pid)?;

    move_if_to_netns(&mut sock, &net.peer.name, child_netns.as_raw_fd())?;
    log::debug!("{} moved into pid {}'s netns", net.peer.name, child_pid);

    setns(&child_netns, CloneFlags::CLONE_NEWNET)
        .map_err(|err| format!("cannot enter child netns: {err}"))?;
    let result = if_up(&net.peer.name, net.peer.address, net.netmask);
    setns(&parent_netns, CloneFlags::CLONE_NEWNET)
        .map_err(|err| format!("cannot restore parent netns: {err}"))?;
    result?;
    log::debug!("{} up at {} inside child netns", net.peer.name, net.peer.address);

    Ok(())
}
