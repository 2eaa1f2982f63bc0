use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

/// A scratch source tree to run the binary in.
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

    fn write(&self, rel: &str, content: &str) {
        let path = self.root().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).expect("failed to create dir");
        std::fs::write(path, content).expect("failed to write file");
    }

    fn relkit_cmd(&self) -> Command {
        let bin_path = env!("CARGO_BIN_EXE_relkit");
        let mut cmd = Command::new(bin_path);
        cmd.current_dir(self.root());
        cmd.env("RELKIT_KEYFILE_PASSWORD", "test-password");
        cmd.env_remove("RUST_LOG");
        cmd
    }
}

#[test]
fn test_help_command() {
    let ctx = TestContext::new();
    let output = ctx
        .relkit_cmd()
        .arg("--help")
        .output()
        .expect("failed to run relkit");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("build"));
    assert!(stdout.contains("verify-manifest"));
}

#[test]
fn test_targets_lists_default_catalog() {
    let ctx = TestContext::new();
    let output = ctx
        .relkit_cmd()
        .arg("targets")
        .output()
        .expect("failed to run relkit");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("x64-win.msi"));
    assert!(stdout.contains("arm7-linux.deb"));
    assert!(stdout.contains("arm64-macos.pkg"));
}

#[test]
fn test_targets_respects_config() {
    let ctx = TestContext::new();
    ctx.write("relkit.toml", "supported_targets = [\"x64-linux.zip\"]\n");
    let output = ctx
        .relkit_cmd()
        .arg("targets")
        .output()
        .expect("failed to run relkit");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("x64-linux.zip"));
    assert!(!stdout.contains("x64-win.msi"));
}

#[test]
fn test_missing_changelog_exits_with_guidance() {
    let ctx = TestContext::new();
    ctx.write("App.sln", "");
    ctx.write("Executables/GUI/App.GUI.TrayIcon.csproj", "<Project/>");
    ctx.write("Executables/CommandLine/App.CommandLine.csproj", "<Project/>");
    ctx.write("ReleaseBuilder/build_version.txt", "1");
    ctx.write("relkit.toml", "supported_targets = [\"x64-linux.zip\"]\n");

    let output = ctx
        .relkit_cmd()
        .args(["build", "beta", "--git-stash-push", "false"])
        .output()
        .expect("failed to run relkit");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("changelog-news.txt"), "stderr: {stderr}");
    assert!(!ctx.root().join("License/VersionTag.txt").exists());
}

#[test]
fn test_missing_solution_fails() {
    let ctx = TestContext::new();
    let output = ctx
        .relkit_cmd()
        .args(["build", "--solution-file", "Nope.sln"])
        .output()
        .expect("failed to run relkit");
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(stderr.matches("Nope.sln").count(), 1, "stderr: {stderr}");
}

#[test]
fn test_missing_changelog_is_reported_before_asking_for_a_password() {
    let ctx = TestContext::new();
    ctx.write("App.sln", "");
    ctx.write("Executables/GUI/App.GUI.TrayIcon.csproj", "<Project/>");
    ctx.write("Executables/CommandLine/App.CommandLine.csproj", "<Project/>");
    ctx.write("ReleaseBuilder/build_version.txt", "1");

    let output = ctx
        .relkit_cmd()
        .env_remove("RELKIT_KEYFILE_PASSWORD")
        .stdin(std::process::Stdio::null())
        .args(["build", "beta", "--git-stash-push", "false"])
        .output()
        .expect("failed to run relkit");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("changelog-news.txt"), "stderr: {stderr}");
    assert!(!stderr.contains("password"), "stderr: {stderr}");
}

#[test]
fn test_keygen_then_verify_rejects_unsigned_manifest() {
    let ctx = TestContext::new();
    let keygen = ctx
        .relkit_cmd()
        .args(["keygen", "--output", "keys/release.key"])
        .output()
        .expect("failed to run relkit");
    assert!(keygen.status.success());
    assert!(ctx.root().join("keys/release.key").is_file());

    ctx.write(
        "latest-v2.manifest",
        r#"{"signature":"AAAA","signed_by":"AAAA","body":"{}"}"#,
    );
    let verify = ctx
        .relkit_cmd()
        .args([
            "verify-manifest",
            "latest-v2.manifest",
            "--keyfile",
            "keys/release.key",
        ])
        .output()
        .expect("failed to run relkit");
    assert!(!verify.status.success());
}
