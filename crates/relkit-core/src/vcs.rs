//! Git operations around a release run.

use crate::command::{CommandError, CommandRunner, CommandSpec, run_checked};
use relkit_schema::ReleaseDescriptor;
use std::path::{Path, PathBuf};

/// Git in one working tree.
pub struct Git<'a> {
    runner: &'a dyn CommandRunner,
    root: PathBuf,
}

impl std::fmt::Debug for Git<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Git").field("root", &self.root).finish_non_exhaustive()
    }
}

impl<'a> Git<'a> {
    /// Run git inside `root`.
    pub fn new(runner: &'a dyn CommandRunner, root: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            root: root.into(),
        }
    }

    fn git(&self) -> CommandSpec {
        CommandSpec::new("git").current_dir(&self.root)
    }

    async fn run(&self, spec: CommandSpec) -> Result<(), CommandError> {
        run_checked(self.runner, &spec).await.map(|_| ())
    }

    /// Stash local changes as `auto-build-<date>`.
    ///
    /// # Errors
    ///
    /// Returns a [`CommandError`] if git fails.
    pub async fn stash(&self, release: &ReleaseDescriptor) -> Result<(), CommandError> {
        let label = format!("auto-build-{}", release.date_string());
        tracing::info!(%label, "stashing local changes");
        self.run(self.git().args(["stash", "save", label.as_str()])).await
    }

    /// Restore `paths` (relative to the root) from the index.
    ///
    /// # Errors
    ///
    /// Returns a [`CommandError`] if git fails.
    pub async fn checkout<'p>(
        &self,
        paths: impl IntoIterator<Item = &'p Path>,
    ) -> Result<(), CommandError> {
        let mut spec = self.git().arg("checkout");
        let before = spec.args.len();
        for p in paths {
            spec = spec.arg_path(p);
        }
        if spec.args.len() == before {
            return Ok(());
        }
        tracing::info!(files = spec.args.len() - before, "restoring stamped files");
        self.run(spec).await
    }

    /// Commit `paths` with `message`.
    ///
    /// # Errors
    ///
    /// Returns a [`CommandError`] if git fails.
    pub async fn commit(&self, paths: &[&Path], message: &str) -> Result<(), CommandError> {
        let mut add = self.git().arg("add");
        for p in paths {
            add = add.arg_path(p);
        }
        self.run(add).await?;
        self.run(self.git().args(["commit", "-m", message])).await
    }

    /// Create an annotated tag.
    ///
    /// # Errors
    ///
    /// Returns a [`CommandError`] if git fails.
    pub async fn tag(&self, name: &str) -> Result<(), CommandError> {
        self.run(self.git().args(["tag", "-a", name, "-m", name])).await
    }

    /// Push the current branch and tags.
    ///
    /// # Errors
    ///
    /// Returns a [`CommandError`] if git fails.
    pub async fn push_with_tags(&self) -> Result<(), CommandError> {
        self.run(self.git().arg("push")).await?;
        self.run(self.git().args(["push", "--tags"])).await
    }
}

/// Tag name for a release: `v<version>-<release_name>`.
pub fn release_tag(release: &ReleaseDescriptor) -> String {
    format!("v{}-{}", release.version, release.release_name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use relkit_schema::{ReleaseChannel, ReleaseVersion};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    #[async_trait]
    impl CommandRunner for Recorder {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
            self.0.lock().unwrap().push(spec.to_string());
            Ok(CommandOutput::default())
        }
    }

    fn release() -> ReleaseDescriptor {
        ReleaseDescriptor::new(
            ReleaseVersion::new(2, 0, 0, 3),
            ReleaseChannel::Stable,
            NaiveDate::from_ymd_opt(2024, 12, 24).unwrap(),
        )
    }

    #[tokio::test]
    async fn stash_uses_dated_label() {
        let rec = Recorder::default();
        Git::new(&rec, "/src").stash(&release()).await.unwrap();
        assert_eq!(rec.0.lock().unwrap()[0], "git stash save auto-build-2024-12-24");
    }

    #[tokio::test]
    async fn empty_checkout_runs_nothing() {
        let rec = Recorder::default();
        Git::new(&rec, "/src").checkout(std::iter::empty()).await.unwrap();
        assert!(rec.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn commit_adds_then_commits() {
        let rec = Recorder::default();
        Git::new(&rec, "/src")
            .commit(&[Path::new("changelog.txt")], "Version bump to v2.0.0.3")
            .await
            .unwrap();
        let calls = rec.0.lock().unwrap();
        assert_eq!(calls[0], "git add changelog.txt");
        assert_eq!(calls[1], "git commit -m \"Version bump to v2.0.0.3\"");
    }

    #[test]
    fn tag_names_include_release_name() {
        assert_eq!(release_tag(&release()), "v2.0.0.3-2.0.0.3_stable_2024-12-24");
    }
}
