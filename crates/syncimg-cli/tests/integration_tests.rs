//! Integration tests for the syncimg CLI binary.
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use syncimg_core::config::Config;
use syncimg_schema::hash::{HashType, compute_reader};
use tempfile::TempDir;

const MANIFEST: &[u8] = b"ubuntu-minimal 1.0\n";

/// A scratch home with a file mirror and a catalog pointing at it.
struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        Self { temp_dir }
    }

    fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    fn syncimg_cmd(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_syncimg"));
        cmd.env("HOME", self.root());
        cmd.env("SYNCIMG_HOME", self.root().join(".syncimg"));
        cmd.env("RUST_LOG", "info");
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.syncimg_cmd()
            .args(args)
            .output()
            .expect("failed to run syncimg")
    }

    /// Mirror two daily builds of precise/amd64 and write the catalog.
    fn write_catalog(&self) -> PathBuf {
        let mirror = self.root().join("mirror");
        let sha1 = compute_reader(HashType::Sha1, MANIFEST).unwrap();
        let mut builds = Vec::new();
        for serial in ["20240101", "20240102"] {
            let rel = format!("precise/{serial}/amd64.manifest");
            let path = mirror.join(&rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, MANIFEST).unwrap();
            builds.push(serde_json::json!({
                "build_serial": serial,
                "release_tag": "daily",
                "arches": {
                    "amd64": {
                        "build_id": format!("{serial}-amd64"),
                        "file_list": [{"path": rel, "file_type": "manifest", "sha1": sha1}],
                        "cloud_registrations": [{
                            "name": "ec2",
                            "instance_types": [{
                                "name": "ebs",
                                "registrations": [{"region_name": "us-east-1", "published_id": format!("ami-{serial}")}]
                            }]
                        }]
                    }
                }
            }));
        }
        let doc = serde_json::json!({
            "mirrors": {"transfer": [format!("file://{}", mirror.display())]},
            "manifest": {"serial": 1_704_153_600},
            "catalog": [{"distro_code_name": "precise", "build_types": {"server": builds}}]
        });
        let path = self.root().join("catalog.json");
        fs::write(&path, doc.to_string()).unwrap();
        path
    }

    fn write_config(&self, publish_cmd: &str) -> PathBuf {
        let catalog = self.write_catalog();
        let d = self.root().display();
        let yaml = format!(
            "#cloudimg-sync-config:
sync_dir: {d}/data
history_log: {d}/history.log
reg_log: {d}/ledger.bin
process_logs: {d}/logs
download_log: {d}/cache.bin
host_url: {catalog}
gpg_validate: false
arches: [amd64]
publish: [manifest]
check_types: [manifest]
max_dailies: latest
list_cmd: 'true'
check_cmd: 'test -s %(local)s'
publish_cmd: '{publish_cmd}'
unpublish_cmd: 'true'
",
            catalog = catalog.display()
        );
        let path = self.root().join("config.yaml");
        fs::write(&path, yaml).unwrap();
        path
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_help_command() {
    let ctx = TestContext::new();
    let output = ctx.run(&["--help"]);
    assert!(output.status.success());
    let stdout = stdout(&output);
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("sync"));
}

#[test]
fn test_version_command() {
    let ctx = TestContext::new();
    let output = ctx.run(&["--version"]);
    assert!(output.status.success());
}

#[test]
fn test_default_config_loads() {
    let ctx = TestContext::new();
    let output = ctx.run(&["default-config"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.starts_with("#cloudimg-sync-config:"));
    let config = Config::from_yaml(&text).unwrap();
    assert_eq!(config.sync_dir, PathBuf::from("/srv/cloudimgs/data"));
}

#[test]
fn test_files_lists_newest_build() {
    let ctx = TestContext::new();
    let catalog = ctx.write_catalog();
    let output = ctx.run(&["files", "--catalog", catalog.to_str().unwrap(), "--distro", "precise"]);
    assert!(output.status.success());

    let stdout = stdout(&output);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("20240102 amd64 manifest "));
    assert!(lines[0].ends_with("precise/20240102/amd64.manifest"));

    let output = ctx.run(&[
        "files",
        "--catalog",
        catalog.to_str().unwrap(),
        "--distro",
        "precise",
        "--all",
    ]);
    assert_eq!(crate::stdout(&output).lines().count(), 2);
}

#[test]
fn test_files_rejects_unknown_distro() {
    let ctx = TestContext::new();
    let catalog = ctx.write_catalog();
    let output = ctx.run(&["files", "--catalog", catalog.to_str().unwrap(), "--distro", "lucid"]);
    assert!(!output.status.success());
}

#[test]
fn test_regs_json() {
    let ctx = TestContext::new();
    let catalog = ctx.write_catalog();
    let output = ctx.run(&[
        "regs",
        "--catalog",
        catalog.to_str().unwrap(),
        "--distro",
        "precise",
        "--cloud",
        "EC2",
        "--json",
    ]);
    assert!(output.status.success());

    let rows: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["build_serial"], "20240102");
    assert_eq!(rows[0]["region"], "us-east-1");
    assert_eq!(rows[0]["published_id"], "ami-20240102");
}

#[test]
fn test_sync_publishes_and_records() {
    let ctx = TestContext::new();
    let config = ctx.write_config(
        "echo REGISTERED: %(release_tag)s %(build_serial)s %(arch)s ami-%(build_serial)s",
    );
    let status = ctx.root().join("status.json");

    let output = ctx.run(&[
        "sync",
        "--config",
        config.to_str().unwrap(),
        "--status-file",
        status.to_str().unwrap(),
    ]);
    assert!(
        output.status.success(),
        "sync failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    assert_eq!(
        fs::read(ctx.root().join("data/precise/20240102/amd64.manifest")).unwrap(),
        MANIFEST
    );
    assert!(!ctx.root().join("data/precise/20240101").exists());
    assert!(
        ctx.root()
            .join("logs/precise/20240102/amd64.manifest.publish-log.txt")
            .exists()
    );

    let run: serde_json::Value = serde_json::from_str(&fs::read_to_string(&status).unwrap()).unwrap();
    assert_eq!(run["published"], 1);
    assert_eq!(run["errors"], 0);
    assert_eq!(run["passed"], true);

    let history = fs::read_to_string(ctx.root().join("history.log")).unwrap();
    assert!(history.trim_end().ends_with(" 1704153600"));

    let output = ctx.run(&["ledger", "--config", config.to_str().unwrap()]);
    assert!(output.status.success());
    let listing = stdout(&output);
    assert!(listing.contains("precise server daily 20240102"));
    assert!(listing.contains("  amd64 ami-20240102"));

    // Unchanged catalog: nothing runs, the status file is left alone
    fs::remove_file(&status).unwrap();
    let output = ctx.run(&[
        "sync",
        "--config",
        config.to_str().unwrap(),
        "--status-file",
        status.to_str().unwrap(),
    ]);
    assert!(output.status.success());
    assert!(!status.exists());
}

#[test]
fn test_sync_fails_when_publish_fails() {
    let ctx = TestContext::new();
    let config = ctx.write_config("exit 3");

    let output = ctx.run(&["sync", "--config", config.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(!ctx.root().join("history.log").exists());

    let output = ctx.run(&["ledger", "--config", config.to_str().unwrap()]);
    assert!(stdout(&output).starts_with("No builds recorded"));
}

#[test]
fn test_sync_rejects_unknown_placeholder() {
    let ctx = TestContext::new();
    let config = ctx.write_config("publish %(nonsense)s");

    let output = ctx.run(&["sync", "--config", config.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(!ctx.root().join("data").exists());
}
