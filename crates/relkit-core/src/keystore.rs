//! Password-protected signing keys.
//!
//! ## Keyfile layout
//!
//! | bytes | field |
//! |---|---|
//! | 4 | magic `RKEY` |
//! | 1 | format version (`1`) |
//! | 16 | PBKDF2 salt |
//! | 4 | PBKDF2 rounds, big endian |
//! | 32 | password verifier |
//! | 12 | ChaCha20-Poly1305 nonce |
//! | rest | ciphertext + tag of the JSON key payload |
//!
//! PBKDF2-HMAC-SHA256 stretches the password into 64 bytes: the first half
//! is the cipher key, the second half is stored as the verifier. A verifier
//! mismatch is reported as [`KeyError::WrongPassword`]; a matching verifier
//! followed by an authentication failure means the file itself is damaged
//! and is reported as [`KeyError::Malformed`].

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use ed25519_dalek::{Signer, VerifyingKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use zeroize::Zeroizing;

const MAGIC: &[u8; 4] = b"RKEY";
const FORMAT_VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const VERIFIER_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = 4 + 1 + SALT_LEN + 4 + VERIFIER_LEN + NONCE_LEN;

/// PBKDF2 rounds used for newly sealed keyfiles.
pub const DEFAULT_KDF_ROUNDS: u32 = 210_000;

/// Upper bound on PBKDF2 rounds, for sealing and opening alike.
pub const MAX_KDF_ROUNDS: u32 = 10_000_000;

/// Errors raised while loading signing keys.
#[derive(Error, Debug)]
pub enum KeyError {
    /// No keyfile was configured.
    #[error("Unable to load keyfile, no keyfile specified")]
    KeyfileUnspecified,

    /// The configured keyfile does not exist.
    #[error("Keyfile not found: {}", .0.display())]
    KeyfileMissing(PathBuf),

    /// The password does not unlock the keyfile.
    #[error("Wrong password for keyfile {}", .0.display())]
    WrongPassword(PathBuf),

    /// The keyfile is damaged or not a keyfile.
    #[error("Keyfile {} is malformed: {reason}", .path.display())]
    Malformed {
        /// Keyfile path
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// No password was given and none could be asked for.
    #[error("No keyfile password given")]
    PasswordRequired,

    /// The key could not be encrypted.
    #[error("Failed to seal key: {0}")]
    Seal(String),

    /// The operator gave up on entering a password.
    #[error("Password entry for {} was aborted", .0.display())]
    Aborted(PathBuf),

    /// The keyfile could not be read or written.
    #[error("IO error on keyfile {}: {source}", .path.display())]
    Io {
        /// Keyfile path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// Something that can ask the operator for a password.
pub trait PasswordPrompt: Send + Sync {
    /// Ask for a password; `None` means the operator aborted.
    fn read_password(&self, prompt: &str) -> Option<String>;
}

/// How often a wrong primary password may be re-entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total decrypt attempts, the initial password included
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

#[derive(Serialize, Deserialize)]
struct KeyPayload {
    algorithm: String,
    secret: String,
    public: String,
}

/// An unlocked Ed25519 signing key and the password that unlocked it.
pub struct SigningKey {
    key: ed25519_dalek::SigningKey,
    password: Zeroizing<String>,
    source: Option<PathBuf>,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("public", &self.public_key_b64())
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Generate a fresh random key.
    pub fn generate(password: impl Into<String>) -> Self {
        let mut secret = Zeroizing::new([0u8; 32]);
        rand::rng().fill_bytes(secret.as_mut());
        Self {
            key: ed25519_dalek::SigningKey::from_bytes(&secret),
            password: Zeroizing::new(password.into()),
            source: None,
        }
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> ed25519_dalek::Signature {
        self.key.sign(message)
    }

    /// The public half.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Base64 public key, as embedded in built binaries and manifests.
    pub fn public_key_b64(&self) -> String {
        BASE64.encode(self.key.verifying_key().to_bytes())
    }

    /// The password that unlocked this key.
    pub fn password(&self) -> &str {
        &self.password
    }

    /// The keyfile this key was loaded from.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Encrypt this key into the keyfile format.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Seal`] if `rounds` is zero or above
    /// [`MAX_KDF_ROUNDS`], or if encryption fails.
    pub fn seal(&self, password: &str, rounds: u32) -> Result<Vec<u8>, KeyError> {
        if rounds == 0 || rounds > MAX_KDF_ROUNDS {
            return Err(KeyError::Seal(format!(
                "key derivation rounds must be between 1 and {MAX_KDF_ROUNDS}, got {rounds}"
            )));
        }
        let payload = Zeroizing::new(
            serde_json::to_vec(&KeyPayload {
                algorithm: "ed25519".to_string(),
                secret: BASE64.encode(self.key.to_bytes()),
                public: self.public_key_b64(),
            })
            .map_err(|e| KeyError::Seal(e.to_string()))?,
        );

        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut salt);
        rand::rng().fill_bytes(&mut nonce);

        let derived = derive(password, &salt, rounds);
        let mut header = Vec::with_capacity(HEADER_LEN);
        header.extend_from_slice(MAGIC);
        header.push(FORMAT_VERSION);
        header.extend_from_slice(&salt);
        header.extend_from_slice(&rounds.to_be_bytes());
        header.extend_from_slice(&derived[32..]);
        header.extend_from_slice(&nonce);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&derived[..32]));
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &payload,
                    aad: &header,
                },
            )
            .map_err(|e| KeyError::Seal(e.to_string()))?;

        header.extend_from_slice(&ciphertext);
        Ok(header)
    }

    /// Write this key to `path` as an encrypted keyfile.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Seal`] or [`KeyError::Io`].
    pub fn write_keyfile(&self, path: &Path, password: &str, rounds: u32) -> Result<(), KeyError> {
        std::fs::write(path, self.seal(password, rounds)?).map_err(|source| KeyError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Decrypt keyfile bytes.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::WrongPassword`] or [`KeyError::Malformed`].
    pub fn open(bytes: &[u8], password: &str, path: &Path) -> Result<Self, KeyError> {
        let malformed = |reason: &str| KeyError::Malformed {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            return Err(malformed("not a relkit keyfile"));
        }
        if bytes[4] != FORMAT_VERSION {
            return Err(malformed(&format!("unsupported format version {}", bytes[4])));
        }

        let header = &bytes[..HEADER_LEN];
        let salt = &header[5..5 + SALT_LEN];
        let rounds_at = 5 + SALT_LEN;
        let mut rounds_bytes = [0u8; 4];
        rounds_bytes.copy_from_slice(&header[rounds_at..rounds_at + 4]);
        let rounds = u32::from_be_bytes(rounds_bytes);
        if rounds == 0 || rounds > MAX_KDF_ROUNDS {
            return Err(malformed(&format!("unsupported key derivation rounds {rounds}")));
        }
        let verifier_at = rounds_at + 4;
        let verifier = &header[verifier_at..verifier_at + VERIFIER_LEN];
        let nonce = &header[verifier_at + VERIFIER_LEN..HEADER_LEN];

        let derived = derive(password, salt, rounds);
        if !constant_time_eq(&derived[32..], verifier) {
            return Err(KeyError::WrongPassword(path.to_path_buf()));
        }

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&derived[..32]));
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(
                    Nonce::from_slice(nonce),
                    Payload {
                        msg: &bytes[HEADER_LEN..],
                        aad: header,
                    },
                )
                .map_err(|_| malformed("authentication failed"))?,
        );

        let payload: KeyPayload =
            serde_json::from_slice(&plaintext).map_err(|e| malformed(&e.to_string()))?;
        if payload.algorithm != "ed25519" {
            return Err(malformed(&format!(
                "unsupported key algorithm '{}'",
                payload.algorithm
            )));
        }

        let secret = Zeroizing::new(
            BASE64
                .decode(payload.secret.as_bytes())
                .map_err(|_| malformed("secret is not base64"))?,
        );
        let secret: &[u8; 32] = secret
            .as_slice()
            .try_into()
            .map_err(|_| malformed("secret must be 32 bytes"))?;
        let key = ed25519_dalek::SigningKey::from_bytes(secret);

        if BASE64.encode(key.verifying_key().to_bytes()) != payload.public {
            return Err(malformed("public key does not match secret"));
        }

        Ok(Self {
            key,
            password: Zeroizing::new(password.to_string()),
            source: Some(path.to_path_buf()),
        })
    }
}

fn derive(password: &str, salt: &[u8], rounds: u32) -> Zeroizing<[u8; 64]> {
    let mut out = Zeroizing::new([0u8; 64]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, rounds, out.as_mut());
    out
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// The ordered set of keys for a run. Index 0 is the primary key.
#[derive(Debug)]
pub struct KeyRing {
    keys: Vec<SigningKey>,
}

impl KeyRing {
    /// Build a ring from a primary key and optional alternates.
    pub fn new(primary: SigningKey, additional: Vec<SigningKey>) -> Self {
        let mut keys = Vec::with_capacity(additional.len() + 1);
        keys.push(primary);
        keys.extend(additional);
        Self { keys }
    }

    /// The key that signs manifests.
    pub fn primary(&self) -> &SigningKey {
        &self.keys[0]
    }

    /// All keys, primary first.
    pub fn iter(&self) -> impl Iterator<Item = &SigningKey> {
        self.keys.iter()
    }

    /// Number of keys (always at least one).
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Always false; present for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Public keys accepted when verifying manifests.
    pub fn verifying_keys(&self) -> Vec<VerifyingKey> {
        self.keys.iter().map(SigningKey::verifying_key).collect()
    }

    /// Base64 public keys, primary first.
    pub fn public_keys_b64(&self) -> Vec<String> {
        self.keys.iter().map(SigningKey::public_key_b64).collect()
    }
}

/// Loads keyfiles, re-prompting for the primary password when allowed.
pub struct KeyStore<'a> {
    prompt: &'a dyn PasswordPrompt,
    policy: RetryPolicy,
}

impl fmt::Debug for KeyStore<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStore")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<'a> KeyStore<'a> {
    /// Create a store that asks `prompt` for replacement passwords.
    pub fn new(prompt: &'a dyn PasswordPrompt) -> Self {
        Self {
            prompt,
            policy: RetryPolicy::default(),
        }
    }

    /// Override the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Load the primary key.
    ///
    /// With `ask_for_new_password`, a wrong password leads to a prompt and
    /// another attempt, up to the policy's attempt count.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::KeyfileUnspecified`], [`KeyError::KeyfileMissing`],
    /// [`KeyError::WrongPassword`] (immediately without
    /// `ask_for_new_password`, otherwise once attempts run out),
    /// [`KeyError::Aborted`] or [`KeyError::Malformed`].
    pub fn load_primary(
        &self,
        path: Option<&Path>,
        password: &str,
        ask_for_new_password: bool,
    ) -> Result<SigningKey, KeyError> {
        let path = path.ok_or(KeyError::KeyfileUnspecified)?;
        let bytes = read_keyfile(path)?;

        let mut password = Zeroizing::new(password.to_string());
        let mut attempt = 1;
        loop {
            match SigningKey::open(&bytes, &password, path) {
                Err(KeyError::WrongPassword(p))
                    if ask_for_new_password && attempt < self.policy.max_attempts =>
                {
                    tracing::warn!(keyfile = %p.display(), attempt, "wrong keyfile password");
                    attempt += 1;
                    let prompt = format!("Enter password for {}", p.display());
                    password = Zeroizing::new(
                        self.prompt
                            .read_password(&prompt)
                            .ok_or_else(|| KeyError::Aborted(p.clone()))?,
                    );
                }
                other => return other,
            }
        }
    }

    /// Load alternate keys. A wrong password is always fatal here.
    ///
    /// # Errors
    ///
    /// Returns the first [`KeyError`] encountered.
    pub fn load_additional(
        &self,
        paths: &[PathBuf],
        password: &str,
    ) -> Result<Vec<SigningKey>, KeyError> {
        paths
            .iter()
            .map(|path| SigningKey::open(&read_keyfile(path)?, password, path))
            .collect()
    }

    /// Load every configured keyfile: the first is primary, the rest alternates.
    ///
    /// Alternates are tried with the password that finally unlocked the primary.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::KeyfileUnspecified`] for an empty list, otherwise
    /// whatever loading the individual files returns.
    pub fn load_ring(&self, paths: &[PathBuf], password: &str) -> Result<KeyRing, KeyError> {
        let (first, rest) = paths.split_first().ok_or(KeyError::KeyfileUnspecified)?;
        let primary = self.load_primary(Some(first), password, true)?;
        let additional = self.load_additional(rest, primary.password())?;
        tracing::info!(
            primary = %primary.public_key_b64(),
            alternates = additional.len(),
            "signing keys loaded"
        );
        Ok(KeyRing::new(primary, additional))
    }
}

fn read_keyfile(path: &Path) -> Result<Vec<u8>, KeyError> {
    if path.as_os_str().is_empty() {
        return Err(KeyError::KeyfileUnspecified);
    }
    match std::fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(KeyError::KeyfileMissing(path.to_path_buf()))
        }
        Err(source) => Err(KeyError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
