//! Compile and package stages, driven by configurable command templates.
//!
//! A template is a program plus arguments that may contain `{name}`
//! placeholders. The compiler and packager are opaque to relkit: it only
//! knows which inputs to pass and which output file must exist afterwards.

use crate::command::{CommandError, CommandRunner, CommandSpec, run_checked};
use regex::Regex;
use relkit_schema::{OperatingSystem, PackageTarget, ReleaseDescriptor};
use relkit_schema::{Architecture, PackageFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Placeholder names a tool template may use.
pub const TOOL_PLACEHOLDERS: &[&str] = &[
    "project", "output", "os", "arch", "runtime", "rid", "format", "target", "input",
    "version", "channel", "depends",
];

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z_]+)\}").expect("static regex"));

/// An external tool invocation with `{name}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolTemplate {
    /// Program to run
    pub program: String,
    /// Arguments, each may contain placeholders
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolTemplate {
    /// Create a template.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// The first placeholder that is not in [`TOOL_PLACEHOLDERS`], if any.
    pub fn unknown_placeholder(&self) -> Option<String> {
        std::iter::once(&self.program)
            .chain(&self.args)
            .flat_map(|s| PLACEHOLDER_RE.captures_iter(s))
            .map(|c| c[1].to_string())
            .find(|name| !TOOL_PLACEHOLDERS.contains(&name.as_str()))
    }

    /// Substitute `vars` into the program and arguments.
    ///
    /// Placeholders without a value render as empty strings; an argument
    /// that renders to nothing is dropped.
    pub fn render(&self, vars: &ToolVars) -> CommandSpec {
        let expand = |s: &str| {
            PLACEHOLDER_RE
                .replace_all(s, |c: &regex::Captures<'_>| {
                    vars.0.get(&c[1]).cloned().unwrap_or_default()
                })
                .into_owned()
        };
        CommandSpec::new(expand(&self.program)).args(
            self.args
                .iter()
                .filter_map(|a| Some(expand(a)).filter(|r| !r.is_empty() || a.is_empty())),
        )
    }
}

/// Values for template placeholders.
#[derive(Debug, Clone, Default)]
pub struct ToolVars(BTreeMap<String, String>);

impl ToolVars {
    /// Set one placeholder.
    pub fn set(mut self, name: &str, value: impl Into<String>) -> Self {
        self.0.insert(name.to_string(), value.into());
        self
    }

    fn path(self, name: &str, value: &Path) -> Self {
        self.set(name, value.to_string_lossy())
    }

    fn release(self, release: &ReleaseDescriptor) -> Self {
        self.set("version", release.version.to_string())
            .set("channel", release.channel.as_str())
    }
}

/// A distinct operating system and architecture to compile for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Runtime {
    /// Operating system
    pub os: OperatingSystem,
    /// CPU architecture
    pub arch: Architecture,
}

impl Runtime {
    /// The runtime a target is built from.
    pub fn of(target: &PackageTarget) -> Self {
        Self {
            os: target.os,
            arch: target.arch,
        }
    }

    /// `os-arch`, also the name of the compiled output directory.
    pub fn id(&self) -> String {
        format!("{}-{}", self.os, self.arch)
    }

    /// The .NET runtime identifier, e.g. `osx-arm64` or `linux-arm`.
    pub fn dotnet_rid(&self) -> String {
        let os = match self.os {
            OperatingSystem::Windows => "win",
            OperatingSystem::Linux => "linux",
            OperatingSystem::MacOS => "osx",
        };
        let arch = match self.arch {
            Architecture::X64 => "x64",
            Architecture::X86 => "x86",
            Architecture::Arm64 => "arm64",
            Architecture::Arm7 => "arm",
        };
        format!("{os}-{arch}")
    }

    /// Distinct runtimes needed by `targets`, in first-seen order.
    pub fn distinct(targets: &[PackageTarget]) -> Vec<Self> {
        let mut out: Vec<Self> = Vec::new();
        for t in targets {
            let rt = Self::of(t);
            if !out.contains(&rt) {
                out.push(rt);
            }
        }
        out
    }
}

/// The configured compiler and packager.
pub struct Toolchain<'a> {
    runner: &'a dyn CommandRunner,
    compiler: &'a ToolTemplate,
    packager: &'a ToolTemplate,
    source_root: PathBuf,
}

impl std::fmt::Debug for Toolchain<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolchain")
            .field("compiler", &self.compiler)
            .field("packager", &self.packager)
            .field("source_root", &self.source_root)
            .finish_non_exhaustive()
    }
}

impl<'a> Toolchain<'a> {
    /// Bind templates to a runner; tools run inside `source_root`.
    pub fn new(
        runner: &'a dyn CommandRunner,
        compiler: &'a ToolTemplate,
        packager: &'a ToolTemplate,
        source_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            compiler,
            packager,
            source_root: source_root.into(),
        }
    }

    /// Compile one project for one runtime into `output`.
    ///
    /// # Errors
    ///
    /// Returns a [`CommandError`] if the compiler fails.
    pub async fn compile(
        &self,
        project: &Path,
        runtime: Runtime,
        output: &Path,
        release: &ReleaseDescriptor,
    ) -> Result<(), CommandError> {
        let vars = ToolVars::default()
            .path("project", project)
            .path("output", output)
            .set("os", runtime.os.as_str())
            .set("arch", runtime.arch.as_str())
            .set("runtime", runtime.id())
            .set("rid", runtime.dotnet_rid())
            .release(release);
        let spec = self.compiler.render(&vars).current_dir(&self.source_root);
        tracing::info!(project = %project.display(), runtime = %runtime.id(), "compiling");
        run_checked(self.runner, &spec).await?;
        Ok(())
    }

    /// Package the compiled `input` directory into `output` for `target`.
    ///
    /// # Errors
    ///
    /// Returns a [`CommandError`] if the packager fails.
    pub async fn package(
        &self,
        target: &PackageTarget,
        input: &Path,
        output: &Path,
        release: &ReleaseDescriptor,
        depends: &[&str],
    ) -> Result<(), CommandError> {
        let vars = ToolVars::default()
            .path("input", input)
            .path("output", output)
            .set("os", target.os.as_str())
            .set("arch", target.arch.as_str())
            .set("runtime", target.runtime_id())
            .set("rid", Runtime::of(target).dotnet_rid())
            .set("format", target.format.as_str())
            .set("target", target.to_string())
            .set("depends", depends.join(", "))
            .release(release);
        let spec = self.packager.render(&vars).current_dir(&self.source_root);
        tracing::info!(package = %target, output = %output.display(), "packaging");
        run_checked(self.runner, &spec).await?;
        Ok(())
    }
}

/// Default compiler: `dotnet publish` per project and runtime.
pub fn default_compiler() -> ToolTemplate {
    ToolTemplate::new(
        "dotnet",
        [
            "publish",
            "{project}",
            "--configuration",
            "Release",
            "--runtime",
            "{rid}",
            "--self-contained",
            "--output",
            "{output}",
            "-p:Version={version}",
        ],
    )
}

/// Default packager: a repository script receiving the target and paths.
pub fn default_packager() -> ToolTemplate {
    ToolTemplate::new(
        "bash",
        [
            "ReleaseBuilder/package.sh",
            "{target}",
            "{input}",
            "{output}",
            "{version}",
            "{channel}",
            "{depends}",
        ],
    )
}

/// Whether packaging `format` produces a file on disk.
pub fn produces_file(format: PackageFormat) -> bool {
    format != PackageFormat::Docker
}
