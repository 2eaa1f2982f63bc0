//! Build command

use crate::BuildArgs;
use crate::ui::{ConsoleReporter, TerminalPrompt};
use anyhow::{Context, Result};
use relkit_core::config::resolve_path;
use relkit_core::{
    BuildConfig, BuildOutcome, BuildRequest, CONFIG_FILE_NAME, DisableFlags, ErrorKind, KeyError,
    PackagePipeline, PipelineError, ProcessRunner, Reporter,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

/// Exit code when the changelog news file is missing.
const EXIT_MISSING_CHANGELOG: u8 = 1;

/// Exit code when the pipeline fails.
const EXIT_RELEASE_FAILED: u8 = 2;

/// Run the release pipeline.
pub async fn build(args: BuildArgs) -> Result<ExitCode> {
    let root = match args.solution_file.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| root.join(CONFIG_FILE_NAME));
    let config = BuildConfig::load(&config_path)
        .await
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let runner = ProcessRunner;
    let request = request_from_args(args, &root);

    let reporter = ConsoleReporter::new();
    let pipeline = PackagePipeline::new(&config, &runner, Arc::new(TerminalPrompt), &reporter);

    match pipeline.run(&request).await {
        Ok(BuildOutcome::Completed(report)) => {
            for package in &report.packages {
                reporter.artifact(&package.target, &package.created_file.display().to_string());
            }
            Ok(ExitCode::SUCCESS)
        }
        Ok(BuildOutcome::MissingChangelog { path }) => {
            print_changelog_guidance(&path);
            Ok(ExitCode::from(EXIT_MISSING_CHANGELOG))
        }
        Err(e) => {
            report_failure(&reporter, &e, &root);
            Ok(ExitCode::from(EXIT_RELEASE_FAILED))
        }
    }
}

fn report_failure(reporter: &dyn Reporter, e: &PipelineError, root: &Path) {
    let kind = e.kind();
    reporter.error(&format!("Release failed ({kind:?}): {e}"));
    match (kind, e) {
        (_, PipelineError::Key(KeyError::PasswordRequired)) => reporter.warning(&format!(
            "Pass --password or set {} when running without a terminal",
            crate::PASSWORD_ENV
        )),
        (ErrorKind::ExternalTool | ErrorKind::Io, _) => reporter.warning(&format!(
            "The source tree in {} may still be stamped; restore it with `git checkout .`",
            root.display()
        )),
        _ => {}
    }
}

fn request_from_args(args: BuildArgs, root: &Path) -> BuildRequest {
    let mut request = BuildRequest::new(args.solution_file, args.build_path);
    request.channel = args.channel;
    request.version = args.version;
    request.targets = args.targets;
    request.changelog_file = args.changelog_file.map(|p| resolve_path(root, &p));
    request.keep_builds = args.keep_builds;
    request.git_stash_push = args.git_stash_push;
    request.disable = DisableFlags {
        authenticode: args.disable_authenticode,
        codesign: args.disable_signcode,
        notarize: args.disable_notarize_signing,
        gpg: args.disable_gpg_signing,
        docker_build: args.disable_docker_build,
        docker_push: args.disable_docker_push,
    };
    request.docker_repo = args.docker_repo;
    request.password = args.password;
    request
}

fn print_changelog_guidance(path: &Path) {
    let shown = path.display();
    eprintln!();
    eprintln!("  No changelog news found at {shown}");
    eprintln!("  Write the release notes for this version there and run again.");
    eprintln!("  To release without news, create an empty file:");
    if cfg!(windows) {
        eprintln!("    type nul > \"{shown}\"");
    } else {
        eprintln!("    touch \"{shown}\"");
    }
}
