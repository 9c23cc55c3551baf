//! Integration tests for the ferry CLI binary.

use std::path::PathBuf;
use std::process::Command;

use tempfile::TempDir;

/// A scratch working directory for the `ferry` binary.
struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("failed to create temp dir"),
        }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.temp_dir.path().join(rel)
    }

    fn ferry(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_ferry"));
        cmd.current_dir(self.temp_dir.path());
        cmd.env_remove("RUST_LOG");
        cmd.env_remove("FERRY_NUM_JOBS");
        cmd.env_remove("FERRY_TIMEOUT");
        cmd
    }
}

#[test]
fn test_help_command() {
    let ctx = TestContext::new();
    let output = ctx.ferry().arg("--help").output().expect("failed to run ferry");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"));
    for sub in ["crate", "toolchain", "rustup", "completions"] {
        assert!(stdout.contains(sub), "help lacks {sub}");
    }
}

#[test]
fn test_version_command() {
    let ctx = TestContext::new();
    let output = ctx.ferry().arg("--version").output().expect("failed to run ferry");
    assert!(output.status.success());
}

#[test]
fn test_completions() {
    let ctx = TestContext::new();
    let output = ctx
        .ferry()
        .args(["completions", "bash"])
        .output()
        .expect("failed to run ferry");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("ferry"));
}

#[test]
fn test_unknown_crate_command_is_rejected() {
    let ctx = TestContext::new();
    let output = ctx
        .ferry()
        .args(["crate", "fetch"])
        .output()
        .expect("failed to run ferry");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid crate command"));
}

#[test]
fn test_missing_index_exits_nonzero() {
    let ctx = TestContext::new();
    let output = ctx
        .ferry()
        .args(["crate", "list"])
        .output()
        .expect("failed to run ferry");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error:"), "stderr: {stderr}");
    assert!(output.stdout.is_empty());
}

#[test]
fn test_init_then_config() {
    let ctx = TestContext::new();
    std::fs::create_dir_all(ctx.path("upstream")).unwrap();

    let output = ctx
        .ferry()
        .args(["crate", "init", "--index-url", "upstream"])
        .output()
        .expect("failed to run ferry");
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(ctx.path("git/crates.io-index/.git").is_dir());
    assert!(ctx.path("crates/config.toml").is_file());

    // init refuses to reuse an existing index.
    let output = ctx
        .ferry()
        .args(["crate", "init", "--index-url", "upstream"])
        .output()
        .expect("failed to run ferry");
    assert_eq!(output.status.code(), Some(1));

    let output = ctx
        .ferry()
        .args(["crate", "config", "--server-url", "http://mirror:8000"])
        .output()
        .expect("failed to run ferry");
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let config = std::fs::read_to_string(ctx.path("git/crates.io-index/config.json")).unwrap();
    assert!(
        config.contains("http://mirror:8000/crates/{lowerprefix}/{crate}/{crate}-{version}.crate")
    );
}
