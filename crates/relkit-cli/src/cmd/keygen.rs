//! Keygen command

use crate::ui::password_or_prompt;
use anyhow::{Context, Result, bail};
use relkit_core::SigningKey;
use relkit_core::keystore::DEFAULT_KDF_ROUNDS;
use std::path::Path;

/// Generate an Ed25519 signing key and store it in a password-protected keyfile.
pub fn keygen(output: &Path, password: Option<String>, force: bool) -> Result<()> {
    if output.exists() && !force {
        bail!(
            "{} already exists; pass --force to overwrite it",
            output.display()
        );
    }

    let password = match password {
        Some(p) => p,
        None => {
            let first = password_or_prompt(None, "New keyfile password")
                .context("No password entered")?;
            let second = password_or_prompt(None, "Repeat password")
                .context("No password entered")?;
            if first != second {
                bail!("Passwords do not match");
            }
            first
        }
    };
    if password.is_empty() {
        bail!("Refusing to create a keyfile with an empty password");
    }

    println!("  generating ed25519 keypair");
    let key = SigningKey::generate(password.as_str());
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    key.write_keyfile(output, &password, DEFAULT_KDF_ROUNDS)?;

    println!();
    println!("  keyfile written to {}", output.display());
    println!();
    println!("  public key (trusted by update clients):");
    println!("  {}", key.public_key_b64());
    println!();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relkit_core::KeyStore;
    use relkit_core::PasswordPrompt;

    struct NoPrompt;

    impl PasswordPrompt for NoPrompt {
        fn read_password(&self, _: &str) -> Option<String> {
            None
        }
    }

    #[test]
    fn writes_loadable_keyfile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys/release.key");
        keygen(&path, Some("pw".into()), false).unwrap();

        let key = KeyStore::new(&NoPrompt)
            .load_primary(Some(&path), "pw", false)
            .unwrap();
        assert_eq!(key.source(), Some(path.as_path()));
    }

    #[test]
    fn refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("release.key");
        std::fs::write(&path, b"existing").unwrap();

        assert!(keygen(&path, Some("pw".into()), false).is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"existing");
    }

    #[test]
    fn rejects_empty_password() {
        let dir = tempfile::tempdir().unwrap();
        assert!(keygen(&dir.path().join("k"), Some(String::new()), false).is_err());
    }
}
