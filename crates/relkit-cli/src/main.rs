//! relkit CLI

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use relkit_cli::cmd;
use relkit_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // RUST_LOG overrides; otherwise relkit's own info-level events.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("relkit=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build(args) => cmd::build::build(*args).await,
        Commands::Keygen {
            output,
            password,
            force,
        } => cmd::keygen::keygen(&output, password, force).map(|()| ExitCode::SUCCESS),
        Commands::VerifyManifest {
            manifest,
            keyfile,
            public_key,
            password,
        } => cmd::verify::verify_manifest(&manifest, &keyfile, &public_key, password)
            .await
            .map(|()| ExitCode::SUCCESS),
        Commands::Targets { config } => cmd::targets::targets(&config)
            .await
            .map(|()| ExitCode::SUCCESS),
    }
}
