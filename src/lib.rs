//! Minimal Linux container runtime: clone a process into fresh namespaces,
//! confine it with a cgroup v2 limit set, and wire it to the host through a
//! veth pair. See [`orchestrator::launch`] for the entry point.

pub mod cgroup;
pub mod cli;
pub mod clone;
pub mod config;
pub mod error;
pub mod mounts;
pub mod netlink;
pub mod orchestrator;
pub mod userns;
