//! Runtime configuration: the process-wide constants the orchestrator,
//! cgroup controller, and netlink controller are built around, expressed as
//! a value constructed once at startup instead of literals scattered across
//! the modules that need them. Two paths can be redirected through
//! environment variables so a test harness can point the runtime at a
//! scratch cgroup hierarchy and a scratch rootfs without touching the
//! default profile.

use std::net::Ipv4Addr;
use std::path::PathBuf;

/// Default cgroup v2 mount point, per `mount -t cgroup2`.
const DEFAULT_CGROUP_MOUNT: &str = "/sys/fs/cgroup";
/// Directory name under the mount point that holds this runtime's limits.
const DEFAULT_CGROUP_NAME: &str = "isolate_group";
/// Host-side UID mapped to container root. Arbitrary unprivileged default.
const DEFAULT_HOST_UID: u32 = 1000;

#[derive(Clone, Debug)]
pub struct ResourceProfile {
    /// `cpu.max` value, e.g. `"20000 100000"` for 20% of one CPU.
    pub cpu_max: String,
    /// `memory.max` value, e.g. `"50M"`.
    pub memory_max: String,
    /// `pids.max` value, e.g. `"50"`.
    pub pids_max: String,
    /// `io.max` value. Available but not applied by the default profile --
    /// the original implementation exposes the setter without ever calling
    /// it, and this design keeps that asymmetry rather than guessing at
    /// unstated intent.
    pub io_max: Option<String>,
}

impl Default for ResourceProfile {
    fn default() -> Self {
        Self {
            cpu_max: "20000 100000".to_owned(),
            memory_max: "50M".to_owned(),
            pids_max: "50".to_owned(),
            io_max: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct VethEndpoint {
    pub name: String,
    pub address: Ipv4Addr,
}

#[derive(Clone, Debug)]
pub struct NetworkProfile {
    pub host: VethEndpoint,
    pub peer: VethEndpoint,
    pub netmask: Ipv4Addr,
}

impl Default for NetworkProfile {
    fn default() -> Self {
        Self {
            host: VethEndpoint {
                name: "veth0".to_owned(),
                address: Ipv4Addr::new(10, 1, 1, 1),
            },
            peer: VethEndpoint {
                name: "veth1".to_owned(),
                address: Ipv4Addr::new(10, 1, 1, 2),
            },
            netmask: Ipv4Addr::new(255, 255, 255, 0),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub cgroup_mount: PathBuf,
    pub cgroup_name: String,
    pub rootfs: PathBuf,
    pub host_uid: u32,
    pub resources: ResourceProfile,
    pub network: NetworkProfile,
}

impl Config {
    /// Builds the default profile, then applies the two narrow environment
    /// overrides a test harness needs: `ISOLATE_CGROUP_MOUNT` to redirect
    /// the unified hierarchy to a scratch mount, and `ISOLATE_ROOTFS` to
    /// point at a throwaway root instead of `./rootfs`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(mount) = std::env::var("ISOLATE_CGROUP_MOUNT") {
            config.cgroup_mount = mount.into();
        }
        if let Ok(rootfs) = std::env::var("ISOLATE_ROOTFS") {
            config.rootfs = rootfs.into();
        }
        config
    }

    pub fn cgroup_path(&self) -> PathBuf {
        self.cgroup_mount.join(&self.cgroup_name)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cgroup_mount: DEFAULT_CGROUP_MOUNT.into(),
            cgroup_name: DEFAULT_CGROUP_NAME.to_owned(),
            rootfs: "rootfs".into(),
            host_uid: DEFAULT_HOST_UID,
            resources: ResourceProfile::default(),
            network: NetworkProfile::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_matches_documented_defaults() {
        let config = Config::default();
        assert_eq!(config.cgroup_path(), PathBuf::from("/sys/fs/cgroup/isolate_group"));
        assert_eq!(config.resources.cpu_max, "20000 100000");
        assert_eq!(config.resources.memory_max, "50M");
        assert_eq!(config.resources.pids_max, "50");
        assert_eq!(config.network.host.address, Ipv4Addr::new(10, 1, 1, 1));
        assert_eq!(config.network.peer.address, Ipv4Addr::new(10, 1, 1, 2));
    }
}
