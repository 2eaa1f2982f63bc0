//! The release pipeline.
//!
//! A run moves through [`Stage`]s strictly in order:
//!
//! ```text
//! Validated → SourceStamped → Compiled → Packaged → Signed
//!           → ManifestBuilt → PackagesUploaded → Cleaned → Tagged
//! ```
//!
//! Everything that can be checked without touching disk happens in
//! `Validated`, so configuration and credential mistakes never leave a
//! stamped tree behind. Later failures abort the run as-is: the source
//! tree stays stamped until the operator restores it (`git checkout`).

use crate::capability::{
    CapabilityError, CapabilityResolver, DisableFlags, HostEnvironment, RuntimeConfig,
    TargetSelection,
};
use crate::catalog::{CatalogError, TargetCatalog};
use crate::command::{CommandError, CommandRunner, CommandSpec, run_checked};
use crate::config::{BuildConfig, ConfigError, resolve_path};
use crate::keystore::{KeyError, KeyRing, KeyStore, PasswordPrompt, RetryPolicy};
use crate::manifest::{BuiltPackage, ManifestBuilder, ManifestError, ManifestSettings, write_manifest};
use crate::release::{ReleaseError, advance_counter, resolve as resolve_release};
use crate::reporter::Reporter;
use crate::sign::{SignError, Signers};
use crate::source::{RevertSet, SourceError, SourceMutator};
use crate::toolchain::{Runtime, Toolchain, produces_file};
use crate::vcs::{Git, release_tag};
use chrono::NaiveDate;
use futures::future::try_join_all;
use relkit_schema::{
    BUILD_MANIFEST_NAME, OperatingSystem, PUBLISHED_MANIFEST_NAME, PackageFormat, PackageTarget,
    ReleaseChannel, ReleaseDescriptor,
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use zeroize::Zeroizing;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Inputs checked, keys loaded
    Validated,
    /// Release identity written into the tree
    SourceStamped,
    /// Projects compiled per runtime
    Compiled,
    /// One package per target
    Packaged,
    /// Signatures applied
    Signed,
    /// Signed manifest written
    ManifestBuilt,
    /// Upload hook (no-op)
    PackagesUploaded,
    /// Manifest published, tree restored
    Cleaned,
    /// Counter bumped, tagged and pushed
    Tagged,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validated => "validated",
            Self::SourceStamped => "source-stamped",
            Self::Compiled => "compiled",
            Self::Packaged => "packaged",
            Self::Signed => "signed",
            Self::ManifestBuilt => "manifest-built",
            Self::PackagesUploaded => "packages-uploaded",
            Self::Cleaned => "cleaned",
            Self::Tagged => "tagged",
        };
        f.write_str(s)
    }
}

/// Broad class of a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input or configuration; raised before anything is modified
    Configuration,
    /// A signing key could not be unlocked
    Credential,
    /// An external tool failed
    ExternalTool,
    /// Filesystem trouble
    Io,
}

/// Errors that abort a run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The solution file does not exist.
    #[error("Solution file not found: {}", .0.display())]
    SolutionMissing(PathBuf),

    /// A required project file does not exist.
    #[error("Failed to locate project file: {}", .0.display())]
    ProjectMissing(PathBuf),

    /// The packager ran but its output is missing.
    #[error("Packager reported success for {target} but {} does not exist", .path.display())]
    PackageMissing {
        /// Target being packaged
        target: PackageTarget,
        /// Expected output
        path: PathBuf,
    },

    /// Unsupported targets requested.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Targets the host cannot build.
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    /// Version could not be determined.
    #[error(transparent)]
    Release(#[from] ReleaseError),

    /// Bad configuration file.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Signing keys could not be loaded.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// An external tool failed.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// A signing step failed.
    #[error(transparent)]
    Sign(#[from] SignError),

    /// The manifest could not be produced.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// The source tree could not be stamped.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Build directory trouble.
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        /// Path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// Classify the failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SolutionMissing(_)
            | Self::ProjectMissing(_)
            | Self::Catalog(_)
            | Self::Capability(_)
            | Self::Config(_) => ErrorKind::Configuration,
            Self::Release(ReleaseError::Io { .. }) => ErrorKind::Io,
            Self::Release(_) => ErrorKind::Configuration,
            Self::Key(KeyError::Io { .. }) => ErrorKind::Io,
            Self::Key(KeyError::KeyfileUnspecified | KeyError::KeyfileMissing(_)) => {
                ErrorKind::Configuration
            }
            Self::Key(_) => ErrorKind::Credential,
            Self::Sign(SignError::Io { .. }) => ErrorKind::Io,
            Self::Sign(SignError::MissingIdentity(_)) => ErrorKind::Configuration,
            Self::Command(_) | Self::Sign(_) | Self::PackageMissing { .. } => {
                ErrorKind::ExternalTool
            }
            Self::Manifest(_) | Self::Source(_) | Self::Io { .. } => ErrorKind::Io,
        }
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PipelineError + '_ {
    move |source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// What the operator asked for.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Channel to release on
    pub channel: ReleaseChannel,
    /// Explicit version; blank or `None` bumps the counter
    pub version: Option<String>,
    /// Requested targets; empty means every supported target
    pub targets: Vec<PackageTarget>,
    /// Solution file; its directory is the source root
    pub solution_file: PathBuf,
    /// Build output directory
    pub build_path: PathBuf,
    /// Overrides the configured changelog news file
    pub changelog_file: Option<PathBuf>,
    /// Reuse existing build output
    pub keep_builds: bool,
    /// Stash before and commit, tag and push after
    pub git_stash_push: bool,
    /// Stages the operator switched off
    pub disable: DisableFlags,
    /// Overrides the configured docker repository
    pub docker_repo: Option<String>,
    /// Keyfile password; asked for once the inputs check out when `None`
    pub password: Option<String>,
    /// Release date
    pub today: NaiveDate,
}

impl BuildRequest {
    /// A request with defaults for everything but the solution file.
    pub fn new(solution_file: impl Into<PathBuf>, build_path: impl Into<PathBuf>) -> Self {
        Self {
            channel: ReleaseChannel::default(),
            version: None,
            targets: Vec::new(),
            solution_file: solution_file.into(),
            build_path: build_path.into(),
            changelog_file: None,
            keep_builds: false,
            git_stash_push: true,
            disable: DisableFlags::default(),
            docker_repo: None,
            password: None,
            today: chrono::Local::now().date_naive(),
        }
    }
}

/// Result of a finished run.
#[derive(Debug)]
pub enum BuildOutcome {
    /// Every stage ran.
    Completed(BuildReport),
    /// The changelog news file is missing; nothing was modified.
    MissingChangelog {
        /// Where the file was expected
        path: PathBuf,
    },
}

/// Summary of a completed run.
#[derive(Debug)]
pub struct BuildReport {
    /// Release identity
    pub release: ReleaseDescriptor,
    /// Packages listed in the manifest
    pub packages: Vec<BuiltPackage>,
    /// Published manifest
    pub manifest_path: PathBuf,
    /// Web assets restored during cleanup
    pub revert_set: RevertSet,
    /// Stages completed, in order
    pub stages: Vec<Stage>,
}

struct Validated {
    root: PathBuf,
    build_dir: PathBuf,
    counter_file: PathBuf,
    targets: Vec<PackageTarget>,
    env: HostEnvironment,
    rtcfg: RuntimeConfig,
}

/// Drives a release run.
pub struct PackagePipeline<'a> {
    config: &'a BuildConfig,
    runner: &'a dyn CommandRunner,
    prompt: Arc<dyn PasswordPrompt>,
    reporter: &'a dyn Reporter,
    env: Option<HostEnvironment>,
    retry: RetryPolicy,
}

impl fmt::Debug for PackagePipeline<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackagePipeline")
            .field("env", &self.env)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl<'a> PackagePipeline<'a> {
    /// Create a pipeline. The host is probed once the inputs check out.
    pub fn new(
        config: &'a BuildConfig,
        runner: &'a dyn CommandRunner,
        prompt: Arc<dyn PasswordPrompt>,
        reporter: &'a dyn Reporter,
    ) -> Self {
        Self {
            config,
            runner,
            prompt,
            reporter,
            env: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Use `env` instead of probing the host.
    pub fn with_host(mut self, env: HostEnvironment) -> Self {
        self.env = Some(env);
        self
    }

    /// Override how often a wrong password may be re-entered.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn stage_done(&self, stages: &mut Vec<Stage>, stage: Stage) {
        tracing::info!(%stage, "stage complete");
        stages.push(stage);
    }

    /// Execute every stage.
    ///
    /// # Errors
    ///
    /// Returns the first [`PipelineError`]; no stage is retried.
    pub async fn run(&self, request: &BuildRequest) -> Result<BuildOutcome, PipelineError> {
        let started = Instant::now();
        let mut stages = Vec::with_capacity(9);

        self.reporter.section("Validating");
        let v = match self.validate(request).await? {
            Ok(v) => v,
            Err(path) => return Ok(BuildOutcome::MissingChangelog { path }),
        };
        let release = v.rtcfg.release().clone();
        let caps = v.rtcfg.capabilities();
        self.reporter
            .info(&format!("Building {} ...", release.release_name()));
        self.stage_done(&mut stages, Stage::Validated);

        self.prepare_build_dir(request, &v.build_dir).await?;
        let git = Git::new(self.runner, &v.root);
        if request.git_stash_push {
            git.stash(&release).await?;
        }

        self.reporter.section("Stamping source");
        let mutator = SourceMutator::new(&v.root, &self.config.source);
        let revert_set = mutator.stamp(&v.rtcfg, &self.config.update_urls)?;
        mutator
            .build_embedded_manifest(&v.rtcfg, &self.manifest_settings())
            .await?;
        self.stage_done(&mut stages, Stage::SourceStamped);

        self.reporter.section("Compiling");
        let toolchain = Toolchain::new(
            self.runner,
            &self.config.tools.compiler,
            &self.config.tools.packager,
            &v.root,
        );
        self.compile(&toolchain, &v, request.keep_builds).await?;
        self.stage_done(&mut stages, Stage::Compiled);

        self.reporter.section("Packaging");
        let docker_repo = request
            .docker_repo
            .as_deref()
            .unwrap_or(&self.config.docker_repo);
        let packages = self.package(&toolchain, &v, docker_repo).await?;
        self.stage_done(&mut stages, Stage::Packaged);

        self.reporter.section("Signing");
        let packages_dir = v.build_dir.join("packages");
        let password = v.rtcfg.keys().primary().password();
        let signers = Signers::new(
            self.runner,
            &self.config.signing,
            v.env.authenticode_tool(),
            password,
        );
        self.sign(&signers, &v.rtcfg, &packages, &packages_dir).await?;
        self.stage_done(&mut stages, Stage::Signed);

        self.reporter.section("Writing manifest");
        let build_manifest = packages_dir.join(BUILD_MANIFEST_NAME);
        let signed = ManifestBuilder::new(self.manifest_settings())
            .build(
                v.rtcfg.keys().primary(),
                &release,
                v.rtcfg.changelog(),
                &packages,
                &packages_dir,
            )
            .await?;
        write_manifest(&signed, &build_manifest).await?;
        if caps.gpg {
            signers.gpg(&build_manifest).await?;
        }
        self.stage_done(&mut stages, Stage::ManifestBuilt);

        tracing::info!("no upload target configured, skipping upload");
        self.stage_done(&mut stages, Stage::PackagesUploaded);

        self.reporter.section("Cleaning up");
        let manifest_path = publish_manifest(&packages_dir).await?;
        git.checkout(
            self.config
                .source
                .fixed_files()
                .into_iter()
                .chain(revert_set.iter()),
        )
        .await?;
        self.stage_done(&mut stages, Stage::Cleaned);

        if request.git_stash_push {
            self.reporter.section("Tagging");
            advance_counter(&v.counter_file, release.version.revision)?;
            let counter_rel = v
                .counter_file
                .strip_prefix(&v.root)
                .unwrap_or(&v.counter_file);
            git.commit(
                &[self.config.source.changelog.as_path(), counter_rel],
                &format!("Version bump to v{}: {}", release.version, release.release_name()),
            )
            .await?;
            git.tag(&release_tag(&release)).await?;
            git.push_with_tags().await?;
            self.stage_done(&mut stages, Stage::Tagged);
        }

        self.reporter.success(&format!(
            "Released {} to {}",
            release.release_name(),
            manifest_path.display()
        ));
        self.reporter
            .summary(packages.len(), "packaged", started.elapsed().as_secs_f64());

        Ok(BuildOutcome::Completed(BuildReport {
            release,
            packages,
            manifest_path,
            revert_set,
            stages,
        }))
    }

    fn manifest_settings(&self) -> ManifestSettings {
        ManifestSettings {
            package_urls: self.config.package_urls.clone(),
            update_from_v1_url: self.config.update_from_v1_url.clone(),
            generic_update_page_url: self.config.generic_update_page_url.clone(),
        }
    }

    /// Check every input. `Ok(Err(path))` means the changelog is missing.
    ///
    /// The changelog is looked for before the password is asked for or the
    /// host is probed.
    async fn validate(
        &self,
        request: &BuildRequest,
    ) -> Result<Result<Validated, PathBuf>, PipelineError> {
        let solution = &request.solution_file;
        if !solution.is_file() {
            return Err(PipelineError::SolutionMissing(solution.clone()));
        }
        let root = match solution.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let projects = &self.config.projects;
        let primary_cli = projects
            .cli
            .first()
            .ok_or_else(|| PipelineError::ProjectMissing(PathBuf::from("<primary cli>")))?;
        let required = projects
            .has_gui()
            .then_some(&projects.gui)
            .into_iter()
            .chain([primary_cli]);
        for project in required {
            let path = resolve_path(&root, project);
            if !path.is_file() {
                return Err(PipelineError::ProjectMissing(path));
            }
        }

        let counter_file = resolve_path(&root, &self.config.counter_file);
        let release = resolve_release(
            request.channel,
            request.version.as_deref(),
            &counter_file,
            self.config.base_version,
            request.today,
        )?;

        let selection = TargetSelection::from_request(&self.config.catalog(), &request.targets)?;

        let changelog_path = request
            .changelog_file
            .clone()
            .unwrap_or_else(|| resolve_path(&root, &self.config.changelog_file));
        let changelog = match tokio::fs::read_to_string(&changelog_path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %changelog_path.display(), "changelog news file not found");
                return Ok(Err(changelog_path));
            }
            Err(e) => return Err(io_err(&changelog_path)(e)),
        };

        let keyfiles: Vec<PathBuf> = self
            .config
            .keyfiles
            .iter()
            .map(|k| resolve_path(&root, k))
            .collect();
        let keys = self.unlock_keys(keyfiles, request.password.clone()).await?;

        let env = match &self.env {
            Some(env) => env.clone(),
            None => HostEnvironment::probe(&self.config.signing, self.runner).await,
        };
        let caps = CapabilityResolver::capabilities(&env, &request.disable);
        let targets = CapabilityResolver::prune_targets(&selection, &caps, &env)?;

        let rtcfg = CapabilityResolver::resolve(&env, &request.disable, release, keys, changelog);
        tracing::info!(
            release = %rtcfg.release().release_name(),
            targets = targets.len(),
            "validated"
        );

        Ok(Ok(Validated {
            build_dir: request.build_path.clone(),
            root,
            counter_file,
            targets,
            env,
            rtcfg,
        }))
    }

    /// Ask for the password if needed and decrypt every keyfile, off the
    /// async worker threads.
    async fn unlock_keys(
        &self,
        keyfiles: Vec<PathBuf>,
        password: Option<String>,
    ) -> Result<KeyRing, PipelineError> {
        if keyfiles.is_empty() {
            return Err(KeyError::KeyfileUnspecified.into());
        }
        let prompt = Arc::clone(&self.prompt);
        let retry = self.retry;
        let first = keyfiles.first().cloned().unwrap_or_default();
        let keys = tokio::task::spawn_blocking(move || {
            let password = match password {
                Some(p) => Zeroizing::new(p),
                None => Zeroizing::new(
                    prompt
                        .read_password("Enter keyfile password")
                        .ok_or(KeyError::PasswordRequired)?,
                ),
            };
            KeyStore::new(&*prompt)
                .with_policy(retry)
                .load_ring(&keyfiles, &password)
        })
        .await
        .map_err(|e| io_err(&first)(std::io::Error::other(e)))??;
        Ok(keys)
    }

    async fn prepare_build_dir(
        &self,
        request: &BuildRequest,
        build_dir: &Path,
    ) -> Result<(), PipelineError> {
        if !request.keep_builds && build_dir.exists() {
            self.reporter
                .info(&format!("Deleting build folder: {}", build_dir.display()));
            tokio::fs::remove_dir_all(build_dir)
                .await
                .map_err(io_err(build_dir))?;
        }
        let packages = build_dir.join("packages");
        tokio::fs::create_dir_all(&packages)
            .await
            .map_err(io_err(&packages))
    }

    async fn compile(
        &self,
        toolchain: &Toolchain<'_>,
        v: &Validated,
        keep_builds: bool,
    ) -> Result<(), PipelineError> {
        let projects = &self.config.projects;
        let release = v.rtcfg.release();

        for runtime in Runtime::distinct(&v.targets) {
            let output = v.build_dir.join("compiled").join(runtime.id());
            if keep_builds && output.is_dir() {
                tracing::info!(runtime = %runtime.id(), "keeping existing build");
                continue;
            }

            let mut order: Vec<&PathBuf> = projects.cli.iter().skip(1).collect();
            if runtime.os == OperatingSystem::Windows {
                order.extend(&projects.windows_only);
            }
            order.extend(projects.cli.first());
            if projects.has_gui() {
                order.push(&projects.gui);
            }

            for project in order {
                toolchain
                    .compile(&resolve_path(&v.root, project), runtime, &output, release)
                    .await?;
            }
            self.reporter.info(&format!("Compiled {}", runtime.id()));
        }
        Ok(())
    }

    async fn package(
        &self,
        toolchain: &Toolchain<'_>,
        v: &Validated,
        docker_repo: &str,
    ) -> Result<Vec<BuiltPackage>, PipelineError> {
        let release = v.rtcfg.release();
        let caps = v.rtcfg.capabilities();
        let packages_dir = v.build_dir.join("packages");
        let mut built = Vec::new();

        for target in &v.targets {
            let input = v
                .build_dir
                .join("compiled")
                .join(target.runtime_id());
            let depends = TargetCatalog::dependencies_for(target, self.config.projects.has_gui());

            if !produces_file(target.format) {
                let image = format!("{docker_repo}:{}-{}", release.version, release.channel);
                toolchain
                    .package(target, &input, Path::new(&image), release, depends)
                    .await?;
                if caps.docker_push {
                    run_checked(self.runner, &CommandSpec::new("docker").args(["push", image.as_str()]))
                        .await?;
                    self.reporter.artifact(target, "pushed");
                } else {
                    self.reporter.artifact(target, "built");
                }
                continue;
            }

            let file_name = package_file_name(&self.config.app_name, release, target);
            let output = packages_dir.join(&file_name);
            toolchain
                .package(target, &input, &output, release, depends)
                .await?;
            if !output.is_file() {
                return Err(PipelineError::PackageMissing {
                    target: *target,
                    path: output,
                });
            }
            self.reporter.artifact(target, "packaged");
            built.push(BuiltPackage {
                target: *target,
                created_file: PathBuf::from(file_name),
            });
        }
        Ok(built)
    }

    async fn sign(
        &self,
        signers: &Signers<'_>,
        rtcfg: &RuntimeConfig,
        packages: &[BuiltPackage],
        packages_dir: &Path,
    ) -> Result<(), PipelineError> {
        let caps = rtcfg.capabilities();
        let with_format = |formats: &[PackageFormat]| -> Vec<(PackageTarget, PathBuf)> {
            packages
                .iter()
                .filter(|p| formats.contains(&p.target.format))
                .map(|p| (p.target, packages_dir.join(&p.created_file)))
                .collect()
        };

        if caps.authenticode {
            let msi = with_format(&[PackageFormat::Msi]);
            try_join_all(msi.iter().map(|(_, f)| signers.authenticode(f))).await?;
            for (t, _) in &msi {
                self.reporter.artifact(t, "authenticode signed");
            }
        }

        let apple = with_format(&[PackageFormat::Dmg, PackageFormat::MacPkg]);
        if caps.codesign {
            try_join_all(apple.iter().map(|(t, f)| signers.codesign(f, t.format))).await?;
            for (t, _) in &apple {
                self.reporter.artifact(t, "code signed");
            }
        }
        if caps.notarize && !apple.is_empty() {
            self.reporter.info("Performing notarize and staple ...");
            try_join_all(apple.iter().map(|(_, f)| signers.notarize(f))).await?;
            for (t, _) in &apple {
                self.reporter.artifact(t, "notarized");
            }
        }

        if caps.gpg {
            let files: Vec<PathBuf> = packages
                .iter()
                .map(|p| packages_dir.join(&p.created_file))
                .collect();
            try_join_all(files.iter().map(|f| signers.gpg(f))).await?;
            self.reporter
                .info(&format!("Created {} GPG signatures", files.len()));
        }
        Ok(())
    }
}

/// `<app>-<release_name>-<arch>-<os>.<ext>`.
pub fn package_file_name(app: &str, release: &ReleaseDescriptor, target: &PackageTarget) -> String {
    format!(
        "{app}-{}-{}.{}",
        release.release_name(),
        target.platform_id(),
        target.format.extension()
    )
}

/// Rename the build manifest (and its signature) to the published name.
async fn publish_manifest(packages_dir: &Path) -> Result<PathBuf, PipelineError> {
    let from = packages_dir.join(BUILD_MANIFEST_NAME);
    let to = packages_dir.join(PUBLISHED_MANIFEST_NAME);
    tokio::fs::rename(&from, &to).await.map_err(io_err(&from))?;

    let from_sig = packages_dir.join(format!("{BUILD_MANIFEST_NAME}.sig"));
    if from_sig.exists() {
        let to_sig = packages_dir.join(format!("{PUBLISHED_MANIFEST_NAME}.sig"));
        tokio::fs::rename(&from_sig, &to_sig)
            .await
            .map_err(io_err(&from_sig))?;
    }
    Ok(to)
}
