use async_trait::async_trait;
use chrono::NaiveDate;
use relkit_core::config::{SigningConfig, ToolsConfig};
use relkit_core::manifest::read_manifest;
use relkit_core::toolchain::ToolTemplate;
use relkit_core::{
    BuildConfig, BuildOutcome, BuildRequest, CapabilityError, CommandError, CommandOutput,
    CommandRunner, CommandSpec, Credentials, ErrorKind, HostEnvironment, KeyError, NullReporter,
    PackagePipeline, PasswordPrompt, PipelineError, SigningKey, Stage, VerifyManifest,
};
use relkit_schema::{OperatingSystem, PUBLISHED_MANIFEST_NAME, ReleaseChannel, UrlTemplate};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const PASSWORD: &str = "hunter2";

/// Records every command and imitates the tools' side effects.
///
/// `pack` creates the file named by its second argument (docker images
/// excepted), `gpg` and `productsign` write their output file, and
/// `notarytool` accepts every submission. `failing` exits with code 1.
#[derive(Default)]
struct FakeTools {
    calls: Mutex<Vec<String>>,
    packager_writes_output: bool,
    failing: Option<&'static str>,
}

impl FakeTools {
    fn new() -> Self {
        Self {
            packager_writes_output: true,
            ..Self::default()
        }
    }

    fn failing(program: &'static str) -> Self {
        Self {
            failing: Some(program),
            ..Self::new()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_to(&self, program: &str) -> Vec<String> {
        let prefix = format!("{program} ");
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(&prefix))
            .collect()
    }
}

#[async_trait]
impl CommandRunner for FakeTools {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        self.calls.lock().unwrap().push(spec.to_string());
        if self.failing == Some(spec.program.as_str()) {
            return Ok(CommandOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: format!("{} crashed", spec.program),
            });
        }
        match spec.program.as_str() {
            "pack" if self.packager_writes_output && !spec.args[0].ends_with(".docker") => {
                let output = Path::new(&spec.args[1]);
                std::fs::write(output, format!("package for {}", spec.args[0])).unwrap();
            }
            "gpg" => {
                let at = spec.args.iter().position(|a| a == "--output").unwrap();
                std::fs::write(&spec.args[at + 1], "-----BEGIN PGP SIGNATURE-----").unwrap();
            }
            "productsign" => {
                std::fs::write(spec.args.last().unwrap(), "signed pkg").unwrap();
            }
            "xcrun" if spec.args[0] == "notarytool" => {
                return Ok(CommandOutput::success(r#"{"id":"sub-1","status":"Accepted"}"#));
            }
            _ => {}
        }
        Ok(CommandOutput::default())
    }
}

struct NoPrompt;

impl PasswordPrompt for NoPrompt {
    fn read_password(&self, _: &str) -> Option<String> {
        None
    }
}

/// A minimal source tree with one keyfile.
struct Fixture {
    dir: TempDir,
    config: BuildConfig,
    key: SigningKey,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let root = dir.path();
        for (rel, content) in [
            ("App.sln", ""),
            ("Executables/GUI/App.GUI.TrayIcon.csproj", "<Project/>"),
            ("Executables/CommandLine/App.CommandLine.csproj", "<Project/>"),
            ("ReleaseBuilder/build_version.txt", "4\n"),
            ("changelog-news.txt", "* Faster uploads"),
            ("changelog.txt", "* Initial release\n"),
            ("webroot/index.html", "<script src=\"app.js?v=2.0.0.1\"></script>"),
        ] {
            let path = root.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }

        let key = SigningKey::generate(PASSWORD);
        std::fs::create_dir_all(root.join("keys")).unwrap();
        key.write_keyfile(&root.join("keys/release.key"), PASSWORD, 1_000)
            .unwrap();

        let config = BuildConfig {
            app_name: "app".into(),
            keyfiles: vec![PathBuf::from("keys/release.key")],
            update_urls: vec![
                UrlTemplate::parse("https://updates.example.com/${RELEASE_TYPE}/${FILENAME}")
                    .unwrap(),
            ],
            package_urls: vec![
                UrlTemplate::parse(
                    "https://updates.example.com/${RELEASE_TYPE}/${RELEASE_VERSION}/${FILENAME}",
                )
                .unwrap(),
            ],
            tools: ToolsConfig {
                compiler: ToolTemplate::new("compile", ["{project}", "{output}"]),
                packager: ToolTemplate::new("pack", ["{target}", "{output}"]),
            },
            ..BuildConfig::default()
        };

        Self { dir, config, key }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn request(&self, targets: &[&str]) -> BuildRequest {
        let mut request = BuildRequest::new(self.root().join("App.sln"), self.root().join("build"));
        request.channel = ReleaseChannel::Beta;
        request.targets = targets.iter().map(|t| t.parse().unwrap()).collect();
        request.git_stash_push = true;
        request.password = Some(PASSWORD.into());
        request.today = NaiveDate::from_ymd_opt(2024, 12, 24).unwrap();
        request
    }

    fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.root().join(rel)).unwrap()
    }
}

fn pipeline<'a>(fx: &'a Fixture, tools: &'a FakeTools, env: HostEnvironment) -> PackagePipeline<'a> {
    PackagePipeline::new(&fx.config, tools, Arc::new(NoPrompt), &NullReporter).with_host(env)
}

fn linux_with_docker() -> HostEnvironment {
    HostEnvironment::new(Some(OperatingSystem::Linux))
        .with_tool("docker")
        .with_docker_daemon(true)
}

#[tokio::test]
async fn full_run_publishes_signed_manifest() {
    let fx = Fixture::new();
    let tools = FakeTools::new();
    let pipeline = pipeline(&fx, &tools, linux_with_docker());

    let outcome = pipeline
        .run(&fx.request(&["x64-linux.deb", "x64-win.zip"]))
        .await
        .unwrap();
    let BuildOutcome::Completed(report) = outcome else {
        panic!("expected a completed run");
    };

    assert_eq!(report.release.release_name(), "2.0.0.5_beta_2024-12-24");
    assert_eq!(
        report.stages,
        vec![
            Stage::Validated,
            Stage::SourceStamped,
            Stage::Compiled,
            Stage::Packaged,
            Stage::Signed,
            Stage::ManifestBuilt,
            Stage::PackagesUploaded,
            Stage::Cleaned,
            Stage::Tagged,
        ]
    );
    assert_eq!(
        report.manifest_path,
        fx.root().join("build/packages").join(PUBLISHED_MANIFEST_NAME)
    );

    let signed = read_manifest(&report.manifest_path).await.unwrap();
    let doc = signed.verify(&[fx.key.verifying_key()]).unwrap();
    assert_eq!(doc.packages.len(), 2);
    assert_eq!(doc.change_info, "* Faster uploads");
    let deb = doc
        .packages
        .iter()
        .find(|p| p.package_type_id == "x64-linux.deb")
        .unwrap();
    assert_eq!(
        deb.remote_urls,
        vec![
            "https://updates.example.com/beta/2.0.0.5/app-2.0.0.5_beta_2024-12-24-x64-linux.deb"
                .to_string()
        ]
    );
    assert_eq!(deb.length, "package for x64-linux.deb".len() as u64);

    // Identity files were stamped; the fake git does not restore them.
    assert_eq!(fx.read("License/VersionTag.txt"), "2.0.0.5");
    assert_eq!(fx.read("AutoUpdater/AutoUpdateBuildChannel.txt"), "beta");
    assert_eq!(
        fx.read("AutoUpdater/AutoUpdateSignKeys.txt"),
        format!("{}\n", fx.key.public_key_b64())
    );
    assert!(fx.read("webroot/index.html").contains("app.js?v=2.0.0.5"));
    assert_eq!(fx.read("changelog.txt"), "* Faster uploads\n* Initial release\n");
    assert_eq!(fx.read("ReleaseBuilder/build_version.txt"), "5");
    assert!(report.revert_set.contains(Path::new("webroot/index.html")));

    let calls = tools.calls();
    assert!(calls[0].starts_with("git stash save auto-build-2024-12-24"));
    let checkout = calls.iter().find(|c| c.starts_with("git checkout")).unwrap();
    assert!(checkout.contains("webroot"));
    assert!(calls.iter().any(|c| c == "git tag -a v2.0.0.5-2.0.0.5_beta_2024-12-24 -m v2.0.0.5-2.0.0.5_beta_2024-12-24"));
    assert_eq!(calls.last().unwrap(), "git push --tags");
}

#[tokio::test]
async fn compiles_each_runtime_once_in_project_order() {
    let fx = Fixture::new();
    let tools = FakeTools::new();
    let pipeline = pipeline(&fx, &tools, linux_with_docker());

    let mut request = fx.request(&["x64-linux.zip", "x64-linux.deb"]);
    request.git_stash_push = false;
    pipeline.run(&request).await.unwrap();

    let compiles: Vec<String> = tools
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("compile"))
        .collect();
    assert_eq!(compiles.len(), 2);
    assert!(compiles[0].contains("App.CommandLine.csproj"));
    assert!(compiles[1].contains("App.GUI.TrayIcon.csproj"));
    let git: Vec<String> = tools
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("git "))
        .collect();
    assert_eq!(git.len(), 1, "only the cleanup checkout runs: {git:?}");
    assert!(git[0].starts_with("git checkout"));
}

#[tokio::test]
async fn explicit_msi_without_wix_fails_before_mutation() {
    let fx = Fixture::new();
    let tools = FakeTools::new();
    let pipeline = pipeline(&fx, &tools, linux_with_docker());

    let err = pipeline.run(&fx.request(&["x64-win.msi"])).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Capability(CapabilityError::MsiUnavailable { .. })
    ));
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(tools.calls().is_empty());
    assert!(!fx.root().join("License/VersionTag.txt").exists());
    assert_eq!(fx.read("changelog.txt"), "* Initial release\n");
}

#[tokio::test]
async fn missing_changelog_is_a_soft_stop() {
    let fx = Fixture::new();
    std::fs::remove_file(fx.root().join("changelog-news.txt")).unwrap();
    let tools = FakeTools::new();
    let pipeline = pipeline(&fx, &tools, linux_with_docker());

    let outcome = pipeline.run(&fx.request(&["x64-win.zip"])).await.unwrap();
    match outcome {
        BuildOutcome::MissingChangelog { path } => {
            assert_eq!(path, fx.root().join("changelog-news.txt"));
        }
        BuildOutcome::Completed(_) => panic!("run should stop without a changelog"),
    }
    assert!(tools.calls().is_empty());
}

#[tokio::test]
async fn wrong_password_is_a_credential_error() {
    let fx = Fixture::new();
    let tools = FakeTools::new();
    let pipeline = pipeline(&fx, &tools, linux_with_docker());

    let mut request = fx.request(&["x64-win.zip"]);
    request.password = Some("wrong".into());
    let err = pipeline.run(&request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Credential);
    assert!(tools.calls().is_empty());
}

#[tokio::test]
async fn unsupported_target_is_rejected() {
    let mut fx = Fixture::new();
    fx.config.supported_targets = vec!["x64-linux.zip".parse().unwrap()];
    let tools = FakeTools::new();
    let pipeline = pipeline(&fx, &tools, linux_with_docker());

    let err = pipeline.run(&fx.request(&["x64-win.zip"])).await.unwrap_err();
    assert!(matches!(err, PipelineError::Catalog(_)));
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn packager_without_output_fails() {
    let fx = Fixture::new();
    let tools = FakeTools::default();
    let pipeline = pipeline(&fx, &tools, linux_with_docker());

    let mut request = fx.request(&["x64-win.zip"]);
    request.git_stash_push = false;
    let err = pipeline.run(&request).await.unwrap_err();
    assert!(matches!(err, PipelineError::PackageMissing { .. }));
    assert_eq!(err.kind(), ErrorKind::ExternalTool);
}

#[tokio::test]
async fn explicit_version_skips_the_counter() {
    let fx = Fixture::new();
    std::fs::remove_file(fx.root().join("ReleaseBuilder/build_version.txt")).unwrap();
    let tools = FakeTools::new();
    let pipeline = pipeline(&fx, &tools, linux_with_docker());

    let mut request = fx.request(&["x64-win.zip"]);
    request.version = Some("3.1.0.9".into());
    request.git_stash_push = false;
    let BuildOutcome::Completed(report) = pipeline.run(&request).await.unwrap() else {
        panic!("expected a completed run");
    };
    assert_eq!(report.release.version.to_string(), "3.1.0.9");
    assert!(!report.stages.contains(&Stage::Tagged));
}

#[tokio::test]
async fn version_override_keeps_the_counter() {
    let fx = Fixture::new();
    std::fs::write(fx.root().join("ReleaseBuilder/build_version.txt"), "41").unwrap();
    let tools = FakeTools::new();

    let mut request = fx.request(&["x64-win.zip"]);
    request.version = Some("2.1".into());
    let BuildOutcome::Completed(report) = pipeline(&fx, &tools, linux_with_docker())
        .run(&request)
        .await
        .unwrap()
    else {
        panic!("expected a completed run");
    };
    assert_eq!(report.release.version.to_string(), "2.1.0.0");
    assert!(report.stages.contains(&Stage::Tagged));
    assert_eq!(fx.read("ReleaseBuilder/build_version.txt"), "41");
}

#[tokio::test]
async fn tool_failure_aborts_without_publishing() {
    let fx = Fixture::new();
    let tools = FakeTools::failing("pack");

    let err = pipeline(&fx, &tools, linux_with_docker())
        .run(&fx.request(&["x64-win.zip", "x64-linux.zip"]))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Command(CommandError::Failed { .. })));
    assert_eq!(err.kind(), ErrorKind::ExternalTool);
    assert!(err.to_string().contains("pack crashed"), "{err}");

    // One packager call, then nothing: no signing, manifest, cleanup or tag.
    assert_eq!(tools.calls_to("pack").len(), 1);
    assert!(tools.calls_to("git").iter().all(|c| c.starts_with("git stash")));
    let packages = fx.root().join("build/packages");
    assert!(!packages.join("autoupdate.manifest").exists());
    assert!(!packages.join(PUBLISHED_MANIFEST_NAME).exists());

    // The tree stays stamped for the operator to restore.
    assert_eq!(fx.read("License/VersionTag.txt"), "2.0.0.5");
    assert_eq!(fx.read("ReleaseBuilder/build_version.txt"), "4\n");
}

#[tokio::test]
async fn compiler_failure_stops_before_packaging() {
    let fx = Fixture::new();
    let tools = FakeTools::failing("compile");

    let mut request = fx.request(&["x64-win.zip"]);
    request.git_stash_push = false;
    let err = pipeline(&fx, &tools, linux_with_docker())
        .run(&request)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalTool);
    assert_eq!(tools.calls_to("compile").len(), 1);
    assert!(tools.calls_to("pack").is_empty());
    assert!(tools.calls_to("git").is_empty());
}

#[tokio::test]
async fn windows_run_applies_authenticode_and_gpg() {
    let mut fx = Fixture::new();
    fx.config.signing = SigningConfig {
        authenticode_pfx: Some(PathBuf::from("keys/cert.pfx")),
        gpg_key_id: Some("ABCD1234".into()),
        ..SigningConfig::default()
    };
    let env = HostEnvironment::new(Some(OperatingSystem::Windows))
        .with_tool("wix")
        .with_tool("signtool")
        .with_tool("gpg")
        .with_credentials(Credentials {
            authenticode: true,
            gpg: true,
            ..Credentials::default()
        });
    let tools = FakeTools::new();

    let mut request = fx.request(&["x64-win.msi", "x64-win.zip"]);
    request.git_stash_push = false;
    let BuildOutcome::Completed(report) = pipeline(&fx, &tools, env).run(&request).await.unwrap()
    else {
        panic!("expected a completed run");
    };
    assert!(report.stages.contains(&Stage::Signed));

    let signtool = tools.calls_to("signtool");
    assert_eq!(signtool.len(), 1);
    assert!(signtool[0].ends_with("x64-win.msi"), "{}", signtool[0]);
    assert!(signtool[0].contains("/p ***"));
    assert!(tools.calls().iter().all(|c| !c.contains(PASSWORD)));

    // One signature per package plus one for the manifest.
    assert_eq!(tools.calls_to("gpg").len(), 3);
    let packages = fx.root().join("build/packages");
    assert!(packages.join(format!("{PUBLISHED_MANIFEST_NAME}.sig")).is_file());
    assert!(!packages.join("autoupdate.manifest.sig").exists());
}

#[tokio::test]
async fn macos_run_signs_notarizes_and_staples() {
    let mut fx = Fixture::new();
    fx.config.signing = SigningConfig {
        codesign_identity: Some("Developer ID Application: Example".into()),
        installer_identity: Some("Developer ID Installer: Example".into()),
        notarize_profile: Some("notary".into()),
        ..SigningConfig::default()
    };
    let env = HostEnvironment::new(Some(OperatingSystem::MacOS))
        .with_tool("codesign")
        .with_tool("productsign")
        .with_tool("xcrun")
        .with_credentials(Credentials {
            codesign: true,
            notarize: true,
            ..Credentials::default()
        });
    let tools = FakeTools::new();

    let mut request = fx.request(&["arm64-macos.dmg", "arm64-macos.pkg"]);
    request.git_stash_push = false;
    let BuildOutcome::Completed(report) = pipeline(&fx, &tools, env).run(&request).await.unwrap()
    else {
        panic!("expected a completed run");
    };
    assert_eq!(report.packages.len(), 2);

    assert_eq!(tools.calls_to("codesign").len(), 1);
    assert_eq!(tools.calls_to("productsign").len(), 1);
    let xcrun = tools.calls_to("xcrun");
    assert_eq!(
        xcrun.iter().filter(|c| c.starts_with("xcrun notarytool submit")).count(),
        2
    );
    assert_eq!(
        xcrun.iter().filter(|c| c.starts_with("xcrun stapler staple")).count(),
        2
    );
    let pkg = fx
        .root()
        .join("build/packages/app-2.0.0.5_beta_2024-12-24-arm64-macos.pkg");
    assert_eq!(std::fs::read_to_string(pkg).unwrap(), "signed pkg");
}

#[tokio::test]
async fn docker_images_are_pushed_but_not_listed() {
    let fx = Fixture::new();
    let tools = FakeTools::new();

    let mut request = fx.request(&["x64-linux.docker", "x64-linux.zip"]);
    request.git_stash_push = false;
    request.docker_repo = Some("example/app".into());
    let BuildOutcome::Completed(report) = pipeline(&fx, &tools, linux_with_docker())
        .run(&request)
        .await
        .unwrap()
    else {
        panic!("expected a completed run");
    };

    assert_eq!(
        tools.calls_to("docker"),
        vec!["docker push example/app:2.0.0.5-beta".to_string()]
    );
    let doc = read_manifest(&report.manifest_path)
        .await
        .unwrap()
        .verify(&[fx.key.verifying_key()])
        .unwrap();
    assert_eq!(doc.packages.len(), 1);
    assert_eq!(doc.packages[0].package_type_id, "x64-linux.zip");
}

#[tokio::test]
async fn disabled_docker_push_only_builds_the_image() {
    let fx = Fixture::new();
    let tools = FakeTools::new();

    let mut request = fx.request(&["x64-linux.docker"]);
    request.git_stash_push = false;
    request.disable.docker_push = true;
    pipeline(&fx, &tools, linux_with_docker())
        .run(&request)
        .await
        .unwrap();
    assert!(tools.calls_to("docker").is_empty());
    assert_eq!(tools.calls_to("pack").len(), 1);
}

#[tokio::test]
async fn default_selection_without_docker_is_an_error() {
    let fx = Fixture::new();
    let tools = FakeTools::new();

    let err = pipeline(&fx, &tools, HostEnvironment::new(Some(OperatingSystem::Linux)))
        .run(&fx.request(&[]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Capability(CapabilityError::DockerRequired { .. })
    ));
    assert!(tools.calls().is_empty());
    assert!(!fx.root().join("License/VersionTag.txt").exists());
}

#[tokio::test]
async fn headless_builds_skip_gui_and_its_dependencies() {
    let mut fx = Fixture::new();
    fx.config.projects.headless = true;
    fx.config.tools.packager = ToolTemplate::new("pack", ["{target}", "{output}", "{depends}"]);
    std::fs::remove_file(fx.root().join("Executables/GUI/App.GUI.TrayIcon.csproj")).unwrap();
    let tools = FakeTools::new();

    let mut request = fx.request(&["x64-linux.deb"]);
    request.git_stash_push = false;
    pipeline(&fx, &tools, linux_with_docker())
        .run(&request)
        .await
        .unwrap();

    let compiles = tools.calls_to("compile");
    assert_eq!(compiles.len(), 1);
    assert!(compiles[0].contains("App.CommandLine.csproj"));
    let pack = &tools.calls_to("pack")[0];
    assert!(pack.contains("libssl3"), "{pack}");
    assert!(!pack.contains("libsm6"), "{pack}");
}

#[tokio::test]
async fn missing_password_is_asked_for_after_the_changelog_check() {
    let fx = Fixture::new();
    std::fs::remove_file(fx.root().join("changelog-news.txt")).unwrap();
    let tools = FakeTools::new();

    let mut request = fx.request(&["x64-win.zip"]);
    request.password = None;
    let outcome = pipeline(&fx, &tools, linux_with_docker())
        .run(&request)
        .await
        .unwrap();
    assert!(matches!(outcome, BuildOutcome::MissingChangelog { .. }));

    std::fs::write(fx.root().join("changelog-news.txt"), "").unwrap();
    let err = pipeline(&fx, &tools, linux_with_docker())
        .run(&request)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Key(KeyError::PasswordRequired)));
    assert_eq!(err.kind(), ErrorKind::Credential);
    assert!(tools.calls().is_empty());
}
