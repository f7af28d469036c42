//! Root-gated end-to-end coverage of the full launch path: real clone with
//! six namespaces, real veth creation, real pivot_root. Each test bails out
//! early (with a visible message) when not run under a privileged runner,
//! per [`common::require_root`].

use isolate::config::Config;
use isolate::orchestrator::launch;

mod common;

use common::{fetch_rootfs, require_root, TempCgroup, TempDir};

fn base_config(rootfs: &std::path::Path, cgroup: &TempCgroup) -> Config {
    let mut config = Config::default();
    config.rootfs = rootfs.to_owned();
    config.cgroup_mount = cgroup.mount_path().to_owned();
    config.cgroup_name = cgroup.name().to_string_lossy().into_owned();
    config
}

#[test]
fn echo_exits_cleanly_under_the_default_memory_cap() {
    if !require_root() {
        return;
    }
    let rootfs = TempDir::new().unwrap();
    fetch_rootfs(rootfs.as_path()).unwrap();
    let cgroup = TempCgroup::new().unwrap();
    let config = base_config(rootfs.as_path(), &cgroup);

    launch(&config, &["/bin/echo".into(), "hello".into()]).unwrap();

    let memory_max = std::fs::read_to_string(cgroup.as_path().join("memory.max")).unwrap();
    assert_eq!(memory_max.trim(), "50M");
}

#[test]
fn veth_peer_is_addressed_inside_the_child_namespace() {
    if !require_root() {
        return;
    }
    let rootfs = TempDir::new().unwrap();
    fetch_rootfs(rootfs.as_path()).unwrap();
    let cgroup = TempCgroup::new().unwrap();
    let config = base_config(rootfs.as_path(), &cgroup);

    let marker = rootfs.join("tmp/veth-addr.txt");
    std::fs::create_dir_all(marker.parent().unwrap()).unwrap();

    launch(
        &config,
        &[
            "/bin/sh".into(),
            "-c".into(),
            format!("ip -4 addr show veth1 > {}", "/tmp/veth-addr.txt"),
        ],
    )
    .unwrap();

    let output = std::fs::read_to_string(&marker).unwrap();
    assert!(output.contains("10.1.1.2/24"), "{output}");
}

#[test]
fn uid_map_reflects_the_configured_host_uid() {
    if !require_root() {
        return;
    }
    let rootfs = TempDir::new().unwrap();
    fetch_rootfs(rootfs.as_path()).unwrap();
    let cgroup = TempCgroup::new().unwrap();
    let config = base_config(rootfs.as_path(), &cgroup);

    let marker = rootfs.join("tmp/uid-map.txt");
    std::fs::create_dir_all(marker.parent().unwrap()).unwrap();

    launch(
        &config,
        &[
            "/bin/sh".into(),
            "-c".into(),
            "cat /proc/self/uid_map > /tmp/uid-map.txt".into(),
        ],
    )
    .unwrap();

    let output = std::fs::read_to_string(&marker).unwrap();
    assert!(output.trim_start().starts_with('0'));
    assert!(output.contains(&config.host_uid.to_string()));
}

#[test]
fn old_root_is_unreachable_after_pivot() {
    if !require_root() {
        return;
    }
    let rootfs = TempDir::new().unwrap();
    fetch_rootfs(rootfs.as_path()).unwrap();
    let cgroup = TempCgroup::new().unwrap();
    let config = base_config(rootfs.as_path(), &cgroup);

    let marker = rootfs.join("tmp/put-old-status.txt");
    std::fs::create_dir_all(marker.parent().unwrap()).unwrap();

    launch(
        &config,
        &[
            "/bin/sh".into(),
            "-c".into(),
            "ls /.put_old >/dev/null 2>&1; echo $? > /tmp/put-old-status.txt".into(),
        ],
    )
    .unwrap();

    let output = std::fs::read_to_string(&marker).unwrap();
    assert_eq!(output.trim(), "2");
}

#[test]
fn oom_kill_under_a_tight_memory_cap_does_not_fail_the_launch() {
    if !require_root() {
        return;
    }
    let rootfs = TempDir::new().unwrap();
    fetch_rootfs(rootfs.as_path()).unwrap();
    let cgroup = TempCgroup::new().unwrap();
    let mut config = base_config(rootfs.as_path(), &cgroup);
    config.resources.memory_max = "8M".into();

    // The parent's wait succeeds regardless of how the child died; the
    // crate does not propagate the child's termination signal.
    launch(
        &config,
        &[
            "/bin/sh".into(),
            "-c".into(),
            "head -c 100M </dev/zero >/tmp/x".into(),
        ],
    )
    .unwrap();
}

#[test]
fn empty_command_prints_the_greeting_without_touching_any_cgroup() {
    let mut child = std::process::Command::new(env!("CARGO_BIN_EXE_isolate"))
        .stdout(std::process::Stdio::piped())
        .spawn()
        .unwrap();
    let status = child.wait().unwrap();
    assert!(status.success());

    let mut stdout = String::new();
    std::io::Read::read_to_string(&mut child.stdout.take().unwrap(), &mut stdout).unwrap();
    assert_eq!(stdout.trim(), "Nothing to do!");
}
