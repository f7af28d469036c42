//! Low-level process-creation primitives: the `clone3` syscall wrapper used
//! to stand up all six namespaces atomically, and the parent/child
//! readiness pipe described in the orchestrator's state machine.

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{FromRawFd, RawFd};

use nix::errno::Errno;
use nix::libc::syscall;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};

use crate::error::Error;

pub type Pid = nix::unistd::Pid;

/// Mirrors `struct clone_args` from `linux/sched.h`. `libc` does not expose
/// `clone3` as a typed call, so the request is built by hand and issued
/// through the raw syscall, the same way `SYS_pidfd_open` is below.
#[repr(C, align(8))]
#[derive(Debug, Default)]
pub(crate) struct CloneArgs {
    pub flags: u64,
    pub pidfd: u64,
    pub child_tid: u64,
    pub parent_tid: u64,
    pub exit_signal: u64,
    pub stack: u64,
    pub stack_size: u64,
    pub tls: u64,
    pub set_tid: u64,
    pub set_tid_size: u64,
    pub cgroup: u64,
}

impl CloneArgs {
    /// The namespace set is all-or-nothing: every flag the isolation
    /// orchestrator needs is set up front on one value.
    pub fn new_isolated() -> Self {
        let mut args = Self {
            exit_signal: nix::libc::SIGCHLD as u64,
            ..Default::default()
        };
        args.flags |= nix::libc::CLONE_NEWUSER as u64;
        args.flags |= nix::libc::CLONE_NEWNS as u64;
        args.flags |= nix::libc::CLONE_NEWPID as u64;
        args.flags |= nix::libc::CLONE_NEWNET as u64;
        args.flags |= nix::libc::CLONE_NEWIPC as u64;
        args.flags |= nix::libc::CLONE_NEWUTS as u64;
        args
    }
}

pub(crate) enum CloneResult {
    Child,
    Parent { child: Pid },
}

/// # Safety
/// Forks the calling thread via `clone3`. The caller must treat the
/// [`CloneResult::Child`] branch the same way `fork`'s child branch is
/// treated: only async-signal-safe and then carefully unwind-guarded code
/// may run before `_exit`/`execve`.
pub(crate) unsafe fn clone3(args: &CloneArgs) -> Result<CloneResult, Errno> {
    let res = syscall(
        nix::libc::SYS_clone3,
        args as *const CloneArgs,
        core::mem::size_of::<CloneArgs>(),
    );
    Errno::result(res).map(|v| match v {
        0 => CloneResult::Child,
        pid => CloneResult::Parent {
            child: Pid::from_raw(pid as nix::libc::pid_t),
        },
    })
}

/// A pipe used exactly once, to carry the two-byte readiness token from the
/// parent to the blocked child.
pub(crate) struct ReadyPipe {
    rx: File,
    tx: File,
}

const READY_TOKEN: [u8; 2] = *b"OK";

impl ReadyPipe {
    pub fn new() -> Result<Self, Error> {
        let (rx, tx) = nix::unistd::pipe()?;
        Ok(Self {
            rx: unsafe { File::from_raw_fd(rx) },
            tx: unsafe { File::from_raw_fd(tx) },
        })
    }

    /// Splits the pipe, dropping the end the caller does not own. The child
    /// keeps only `rx`; the parent keeps only `tx`.
    pub fn rx(self) -> impl Read {
        drop(self.tx);
        self.rx
    }

    pub fn tx(self) -> impl Write {
        drop(self.rx);
        self.tx
    }
}

/// Blocks until the readiness token arrives. This is the sole
/// synchronization primitive between parent and child: the child must not
/// observe any parent-side setup before this call returns.
pub(crate) fn wait_ready(mut rx: impl Read) -> Result<(), Error> {
    let mut buf = [0u8; 2];
    rx.read_exact(&mut buf)?;
    if buf != READY_TOKEN {
        return Err(format!("unexpected readiness token: {buf:?}").into());
    }
    Ok(())
}

/// Sends the readiness token. The caller is expected to drop `tx`
/// immediately afterwards so the child's read observes EOF-free completion.
pub(crate) fn signal_ready(mut tx: impl Write) -> Result<(), Error> {
    tx.write_all(&READY_TOKEN)?;
    Ok(())
}

/// A child PID that the parent is responsible for reaping, so a bug that
/// forgets to `wait` on the success path still reaps on unwind/return.
pub(crate) struct OwnedPid(Option<Pid>);

impl OwnedPid {
    /// # Safety
    /// `pid` must name a child of the current process that has not already
    /// been reaped.
    pub unsafe fn from_raw(pid: Pid) -> Self {
        Self(Some(pid))
    }

    pub fn as_raw(&self) -> Pid {
        self.0.expect("OwnedPid used after into_raw")
    }

    pub fn into_raw(mut self) -> Pid {
        self.0.take().expect("OwnedPid used after into_raw")
    }

    pub fn wait(self) -> Result<WaitStatus, Error> {
        Ok(waitpid(self.into_raw(), Some(WaitPidFlag::__WALL))?)
    }
}

impl Drop for OwnedPid {
    fn drop(&mut self) {
        if let Some(pid) = self.0.take() {
            let _ = waitpid(pid, Some(WaitPidFlag::__WALL));
        }
    }
}
