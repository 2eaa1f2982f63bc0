//! Targets command

use anyhow::{Context, Result};
use crossterm::style::Stylize;
use relkit_core::{
    BuildConfig, Capabilities, CapabilityResolver, DisableFlags, HostEnvironment, ProcessRunner,
};
use relkit_schema::{PackageFormat, PackageTarget};
use std::path::Path;

/// List every supported target and whether this host can build it.
pub async fn targets(config_path: &Path) -> Result<()> {
    let config = BuildConfig::load(config_path)
        .await
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let catalog = config.catalog();

    let env = HostEnvironment::probe(&config.signing, &ProcessRunner).await;
    let caps = CapabilityResolver::capabilities(&env, &DisableFlags::default());

    println!();
    println!("  {}{}", format!("{:<19}", "target").dark_grey(), "on this host".dark_grey());
    let mut buildable = 0;
    for target in catalog.supported() {
        let name = format!("{:<18}", target.to_string());
        match blocker(target, &env, &caps) {
            None => {
                buildable += 1;
                println!("  {} {}", name.cyan(), "ready".green());
            }
            Some(reason) => println!("  {} {}", name.dark_grey(), reason.yellow()),
        }
    }
    println!();
    println!(
        "  {buildable} of {} targets can be built here",
        catalog.supported().count()
    );
    Ok(())
}

/// Why `target` cannot be built on this host, if it cannot.
fn blocker(target: &PackageTarget, env: &HostEnvironment, caps: &Capabilities) -> Option<&'static str> {
    if target.format.is_macos_only() && env.os != Some(relkit_schema::OperatingSystem::MacOS) {
        Some("needs a macOS host")
    } else if target.format == PackageFormat::Msi && !env.has_tool("wix") {
        Some("needs the WiX toolset")
    } else if target.format.requires_docker() && !caps.docker_build {
        Some("needs a running docker daemon")
    } else {
        None
    }
}
