//! Package signing: Authenticode, Apple code signing, notarization, GPG.
//!
//! Every scheme shells out through [`CommandRunner`]; the argument shapes
//! here are the only knowledge relkit has of the signing tools.

use crate::command::{CommandError, CommandRunner, CommandSpec, run_checked};
use crate::config::SigningConfig;
use relkit_schema::PackageFormat;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Errors raised by the signing stages.
#[derive(Error, Debug)]
pub enum SignError {
    /// A signing tool failed.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// A signed file could not be moved into place.
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A required identity is not configured.
    #[error("Missing signing configuration: {0}")]
    MissingIdentity(&'static str),

    /// `notarytool` printed something other than the expected JSON.
    #[error("Unexpected notarytool output: {0}")]
    UnexpectedOutput(String),

    /// Apple rejected the submission.
    #[error("Notarization of {} finished with status '{status}' (submission {id})", .file.display())]
    NotarizationFailed {
        /// Submitted file
        file: PathBuf,
        /// Submission id
        id: String,
        /// Final status
        status: String,
    },

    /// The submission did not finish in time.
    #[error("Notarization of {} did not finish within {}s (submission {id})", .file.display(), .timeout.as_secs())]
    NotarizationTimeout {
        /// Submitted file
        file: PathBuf,
        /// Submission id
        id: String,
        /// Configured limit
        timeout: Duration,
    },
}

#[derive(Debug, Deserialize)]
struct NotaryResponse {
    id: String,
    #[serde(default)]
    status: Option<String>,
}

fn parse_notary(stdout: &str) -> Result<NotaryResponse, SignError> {
    serde_json::from_str(stdout.trim()).map_err(|e| SignError::UnexpectedOutput(e.to_string()))
}

async fn replace_with(signed: &Path, original: &Path) -> Result<(), SignError> {
    tokio::fs::rename(signed, original)
        .await
        .map_err(|source| SignError::Io {
            path: original.to_path_buf(),
            source,
        })
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// Signs packages with the configured identities.
pub struct Signers<'a> {
    runner: &'a dyn CommandRunner,
    signing: &'a SigningConfig,
    authenticode_tool: &'a str,
    password: &'a str,
}

impl std::fmt::Debug for Signers<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signers")
            .field("signing", self.signing)
            .field("authenticode_tool", &self.authenticode_tool)
            .finish_non_exhaustive()
    }
}

impl<'a> Signers<'a> {
    /// Create signers. `password` unlocks the Authenticode certificate.
    pub fn new(
        runner: &'a dyn CommandRunner,
        signing: &'a SigningConfig,
        authenticode_tool: &'a str,
        password: &'a str,
    ) -> Self {
        Self {
            runner,
            signing,
            authenticode_tool,
            password,
        }
    }

    /// Authenticode-sign a Windows installer in place.
    ///
    /// # Errors
    ///
    /// Returns [`SignError`] if the certificate is not configured or the
    /// signer fails.
    pub async fn authenticode(&self, file: &Path) -> Result<(), SignError> {
        let pfx = self
            .signing
            .authenticode_pfx
            .as_deref()
            .ok_or(SignError::MissingIdentity("signing.authenticode_pfx"))?;
        let ts = self.signing.timestamp_url.as_str();

        if self.authenticode_tool == "signtool" {
            let spec = CommandSpec::new("signtool")
                .args(["sign", "/f"])
                .arg_path(pfx)
                .arg("/p")
                .secret_arg(self.password)
                .args(["/fd", "SHA256", "/tr", ts, "/td", "SHA256"])
                .arg_path(file);
            run_checked(self.runner, &spec).await?;
        } else {
            let signed = with_suffix(file, ".signed");
            let spec = CommandSpec::new(self.authenticode_tool)
                .args(["sign", "-pkcs12"])
                .arg_path(pfx)
                .arg("-pass")
                .secret_arg(self.password)
                .args(["-h", "sha256", "-ts", ts, "-in"])
                .arg_path(file)
                .arg("-out")
                .arg_path(&signed);
            run_checked(self.runner, &spec).await?;
            replace_with(&signed, file).await?;
        }
        tracing::info!(file = %file.display(), "authenticode signed");
        Ok(())
    }

    /// Apple-sign a disk image (`codesign`) or installer (`productsign`).
    ///
    /// # Errors
    ///
    /// Returns [`SignError`] if the identity is missing or the tool fails.
    pub async fn codesign(&self, file: &Path, format: PackageFormat) -> Result<(), SignError> {
        match format {
            PackageFormat::MacPkg => {
                let identity = self
                    .signing
                    .installer_identity
                    .as_deref()
                    .ok_or(SignError::MissingIdentity("signing.installer_identity"))?;
                let signed = with_suffix(file, ".signed");
                let spec = CommandSpec::new("productsign")
                    .args(["--sign", identity])
                    .arg_path(file)
                    .arg_path(&signed);
                run_checked(self.runner, &spec).await?;
                replace_with(&signed, file).await?;
            }
            _ => {
                let identity = self
                    .signing
                    .codesign_identity
                    .as_deref()
                    .ok_or(SignError::MissingIdentity("signing.codesign_identity"))?;
                let spec = CommandSpec::new("codesign")
                    .args(["--force", "--timestamp", "--sign", identity])
                    .arg_path(file);
                run_checked(self.runner, &spec).await?;
            }
        }
        tracing::info!(file = %file.display(), %format, "code signed");
        Ok(())
    }

    /// Submit to Apple notarization, wait for the verdict, then staple.
    ///
    /// # Errors
    ///
    /// Returns [`SignError::NotarizationFailed`] for `Invalid`/`Rejected`,
    /// [`SignError::NotarizationTimeout`] when the deadline passes, or a
    /// command error.
    pub async fn notarize(&self, file: &Path) -> Result<(), SignError> {
        let profile = self
            .signing
            .notarize_profile
            .as_deref()
            .ok_or(SignError::MissingIdentity("signing.notarize_profile"))?;

        let submit = CommandSpec::new("xcrun")
            .args(["notarytool", "submit"])
            .arg_path(file)
            .args(["--keychain-profile", profile, "--output-format", "json"]);
        let submitted = parse_notary(&run_checked(self.runner, &submit).await?.stdout)?;
        let id = submitted.id;
        tracing::info!(file = %file.display(), %id, "submitted for notarization");

        let deadline = Instant::now() + self.signing.notarize_timeout();
        let mut status = submitted.status.unwrap_or_default();
        loop {
            match status.as_str() {
                "Accepted" => break,
                "Invalid" | "Rejected" => {
                    return Err(SignError::NotarizationFailed {
                        file: file.to_path_buf(),
                        id,
                        status,
                    });
                }
                _ => {}
            }
            if Instant::now() >= deadline {
                return Err(SignError::NotarizationTimeout {
                    file: file.to_path_buf(),
                    id,
                    timeout: self.signing.notarize_timeout(),
                });
            }
            tokio::time::sleep(self.signing.notarize_poll()).await;

            let info = CommandSpec::new("xcrun").args([
                "notarytool",
                "info",
                id.as_str(),
                "--keychain-profile",
                profile,
                "--output-format",
                "json",
            ]);
            status = parse_notary(&run_checked(self.runner, &info).await?.stdout)?
                .status
                .unwrap_or_default();
            tracing::debug!(%id, %status, "notarization status");
        }

        let staple = CommandSpec::new("xcrun")
            .args(["stapler", "staple"])
            .arg_path(file);
        run_checked(self.runner, &staple).await?;
        tracing::info!(file = %file.display(), "notarized and stapled");
        Ok(())
    }

    /// Write an armored detached signature next to `file`.
    ///
    /// Returns the signature path (`<file>.sig`).
    ///
    /// # Errors
    ///
    /// Returns [`SignError`] if no key is configured or `gpg` fails.
    pub async fn gpg(&self, file: &Path) -> Result<PathBuf, SignError> {
        let key = self
            .signing
            .gpg_key_id
            .as_deref()
            .ok_or(SignError::MissingIdentity("signing.gpg_key_id"))?;
        let sig = with_suffix(file, ".sig");
        let spec = CommandSpec::new("gpg")
            .args(["--batch", "--yes", "--local-user", key, "--armor", "--detach-sign", "--output"])
            .arg_path(&sig)
            .arg_path(file);
        run_checked(self.runner, &spec).await?;
        tracing::debug!(file = %file.display(), "gpg signed");
        Ok(sig)
    }
}
