//! Verify-manifest command

use crate::ui::{TerminalPrompt, password_or_prompt};
use anyhow::{Context, Result, bail};
use crossterm::style::Stylize;
use ed25519_dalek::VerifyingKey;
use relkit_core::manifest::{parse_public_key, read_manifest};
use relkit_core::{KeyStore, VerifyManifest};
use relkit_schema::ManifestDocument;
use std::path::{Path, PathBuf};

/// Check a manifest against the given keys and print its contents.
pub async fn verify_manifest(
    manifest: &Path,
    keyfiles: &[PathBuf],
    public_keys: &[String],
    password: Option<String>,
) -> Result<()> {
    let trusted = trusted_keys(keyfiles, public_keys, password)?;
    let signed = read_manifest(manifest)
        .await
        .with_context(|| format!("Failed to read {}", manifest.display()))?;
    let document = signed
        .verify(&trusted)
        .with_context(|| format!("{} is not signed by a trusted key", manifest.display()))?;

    print_document(&document, &signed.signed_by);
    Ok(())
}

fn trusted_keys(
    keyfiles: &[PathBuf],
    public_keys: &[String],
    password: Option<String>,
) -> Result<Vec<VerifyingKey>> {
    let mut trusted = public_keys
        .iter()
        .map(|k| parse_public_key(k.trim()).with_context(|| format!("Invalid public key '{k}'")))
        .collect::<Result<Vec<_>>>()?;

    if !keyfiles.is_empty() {
        let Some(password) = password_or_prompt(password, "Enter keyfile password") else {
            bail!("A password is needed to read the keyfiles");
        };
        let keys = KeyStore::new(&TerminalPrompt).load_additional(keyfiles, &password)?;
        trusted.extend(keys.iter().map(relkit_core::SigningKey::verifying_key));
    }

    if trusted.is_empty() {
        bail!("No trusted keys given");
    }
    Ok(trusted)
}

fn label(text: &str) -> impl std::fmt::Display {
    format!("{text:<10}").dark_grey()
}

fn print_document(doc: &ManifestDocument, signed_by: &str) {
    println!();
    println!("  {} {}", "✓".green().bold(), "signature valid".green());
    println!("  {} {}", label("release"), doc.displayname.as_str().bold());
    println!("  {} {}", label("version"), doc.version);
    println!("  {} {}", label("channel"), doc.release_type);
    println!("  {} {}", label("date"), doc.release_time);
    println!("  {} {signed_by}", label("signed by"));
    println!();
    for package in &doc.packages {
        println!(
            "  {} {:>12} bytes  sha256 {}",
            format!("{:<18}", package.package_type_id).cyan(),
            package.length,
            package.sha256.as_str().dark_grey()
        );
    }
    if doc.packages.is_empty() {
        println!("  (no packages)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_at_least_one_key() {
        assert!(trusted_keys(&[], &[], None).is_err());
    }

    #[test]
    fn rejects_malformed_public_key() {
        assert!(trusted_keys(&[], &["not-a-key".into()], None).is_err());
    }

    #[test]
    fn keyfiles_contribute_their_public_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("release.key");
        let key = relkit_core::SigningKey::generate("pw");
        key.write_keyfile(&path, "pw", 1_000).unwrap();

        let trusted = trusted_keys(&[path], &[], Some("pw".into())).unwrap();
        assert_eq!(trusted, vec![key.verifying_key()]);
    }
}
