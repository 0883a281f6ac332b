//! Credential bootstrap: first-run template creation, first-time encryption of
//! the signing key, and the canary-verified unlock loop that runs on every
//! later start.
//!
//! The canary is a fixed string encrypted under the same password as the key.
//! A password is accepted only when the canary decrypts back to itself, so the
//! real key is never used as the correctness oracle. The unlock loop has no
//! attempt limit or backoff: it serves a single local operator and ends on
//! success, on closed input, or when the process is interrupted.

use std::fmt;
use std::io;

use thiserror::Error;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::config::{ConfigError, ConfigRecord, ConfigStore};
use crate::console::Console;
use crate::crypto::{CipherError, CredentialCipher, KdfParams};

/// Encrypted next to the key and compared after decryption to verify the
/// password.
pub const CANARY: &str = "jupgrid-credential-canary-v1";

/// Length of an ed25519 keypair as the downstream signer expects it.
pub const SECRET_KEY_LEN: usize = 64;

pub const NEW_PASSWORD_PROMPT: &str =
    "Enter a password to encrypt your private key with (input hidden): ";
pub const UNLOCK_PROMPT: &str =
    "Enter your password to decrypt your private key (input hidden): ";
pub const INVALID_PASSWORD_MESSAGE: &str =
    "Invalid password. Please ensure you are using the correct password.";
const EMPTY_PASSWORD_MESSAGE: &str = "Password cannot be empty. Please try again.";

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("required credential fields are not set: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
    #[error("credential file is malformed: {0}")]
    MalformedConfig(#[source] ConfigError),
    #[error("credential file could not be accessed: {0}")]
    ConfigIo(#[source] ConfigError),
    /// The canary verified but the key payload did not yield a usable key.
    #[error("password verified but the stored private key is corrupt: {0}")]
    CorruptKey(String),
    #[error("credential cipher failed: {0}")]
    Cipher(#[from] CipherError),
    #[error("could not read password: {0}")]
    Prompt(#[source] io::Error),
}

impl BootstrapError {
    pub fn exit_code(&self) -> u8 {
        1
    }

    /// What the operator has to do before starting again.
    pub fn remediation(&self) -> &'static str {
        match self {
            BootstrapError::MissingFields(_) => {
                "Fill in RPC_URL and PRIVATE_KEY in the credential file, then start again."
            }
            BootstrapError::MalformedConfig(_) => {
                "Fix the credential file by hand, or delete it to start over from a fresh template."
            }
            BootstrapError::ConfigIo(_) => {
                "Check that the credential file and its directory are readable and writable."
            }
            BootstrapError::CorruptKey(_) => {
                "The stored key is damaged. Restore the credential file from a backup, or delete it and enter the private key again."
            }
            BootstrapError::Cipher(_) => "Key derivation failed; check the cipher cost settings.",
            BootstrapError::Prompt(_) => {
                "Run from an interactive terminal so the password can be entered."
            }
        }
    }
}

impl From<ConfigError> for BootstrapError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::MissingField(field) => BootstrapError::MissingFields(vec![field]),
            ConfigError::Parse { .. } | ConfigError::Inconsistent(_) => {
                BootstrapError::MalformedConfig(err)
            }
            ConfigError::NotFound(_) | ConfigError::Io { .. } => BootstrapError::ConfigIo(err),
        }
    }
}

/// The decoded signing key and the endpoint it is used against. Only ever
/// held in memory; the key bytes are zeroed on drop.
pub struct UnlockedCredential {
    secret_key_bytes: Zeroizing<Vec<u8>>,
    rpc_url: String,
}

impl UnlockedCredential {
    pub fn secret_key_bytes(&self) -> &[u8] {
        &self.secret_key_bytes
    }

    pub fn into_parts(self) -> (Zeroizing<Vec<u8>>, String) {
        (self.secret_key_bytes, self.rpc_url)
    }
}

impl fmt::Debug for UnlockedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnlockedCredential")
            .field("secret_key_bytes", &"<redacted>")
            .field("rpc_url", &self.rpc_url)
            .finish()
    }
}

/// Terminal results of a bootstrap run.
#[derive(Debug)]
pub enum BootstrapOutcome {
    /// A placeholder file was written; the operator must fill it in.
    TemplateCreated,
    /// The key was encrypted for the first time; the operator must restart.
    Encrypted,
    Unlocked(UnlockedCredential),
}

impl BootstrapOutcome {
    pub fn exit_code(&self) -> u8 {
        0
    }
}

struct LockedRecord {
    rpc_url: String,
    encrypted_key: String,
    verification_tag: String,
}

enum Stage {
    Start,
    Uninitialized,
    Loaded(ConfigRecord),
    NeedsFirstEncryption(ConfigRecord),
    AwaitingPassword(LockedRecord),
}

impl Stage {
    fn name(&self) -> &'static str {
        match self {
            Stage::Start => "start",
            Stage::Uninitialized => "uninitialized",
            Stage::Loaded(_) => "loaded",
            Stage::NeedsFirstEncryption(_) => "needs_first_encryption",
            Stage::AwaitingPassword(_) => "awaiting_password",
        }
    }
}

/// Why an unlock attempt was turned down. Never shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    CanaryMismatch,
    TagAuthentication,
    TagMalformed,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Rejection::CanaryMismatch => "canary mismatch",
            Rejection::TagAuthentication => "verification tag failed authentication",
            Rejection::TagMalformed => "verification tag is malformed",
        })
    }
}

pub struct CredentialBootstrapper<C> {
    store: ConfigStore,
    console: C,
    kdf: KdfParams,
}

impl<C: Console> CredentialBootstrapper<C> {
    pub fn new(store: ConfigStore, console: C) -> Self {
        Self {
            store,
            console,
            kdf: KdfParams::default(),
        }
    }

    pub fn with_kdf_params(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    /// Gives back the console, e.g. to inspect what a scripted run displayed.
    pub fn into_console(self) -> C {
        self.console
    }

    /// Drives the record from whatever state is on disk to a terminal outcome.
    pub fn run(&mut self) -> Result<BootstrapOutcome, BootstrapError> {
        let mut stage = Stage::Start;
        loop {
            debug!(stage = stage.name(), "credential bootstrap stage");
            stage = match stage {
                Stage::Start => {
                    if self.store.exists() {
                        Stage::Loaded(self.store.read()?)
                    } else {
                        Stage::Uninitialized
                    }
                }
                Stage::Uninitialized => return self.create_template(),
                Stage::Loaded(mut record) => match record.verification_tag.take() {
                    Some(verification_tag) => Stage::AwaitingPassword(LockedRecord {
                        rpc_url: record.rpc_url,
                        encrypted_key: record.private_key,
                        verification_tag,
                    }),
                    None => {
                        let placeholders = record.placeholder_fields();
                        if !placeholders.is_empty() {
                            return Err(BootstrapError::MissingFields(placeholders));
                        }
                        Stage::NeedsFirstEncryption(record)
                    }
                },
                Stage::NeedsFirstEncryption(record) => return self.encrypt_first_time(record),
                Stage::AwaitingPassword(locked) => {
                    return self.unlock(locked).map(BootstrapOutcome::Unlocked)
                }
            };
        }
    }

    fn create_template(&mut self) -> Result<BootstrapOutcome, BootstrapError> {
        self.store.write_template()?;
        info!(path = %self.store.path().display(), "credential template created");
        self.console.notice(&format!(
            "{} created. Please fill in your private information, and start JupGrid again.",
            self.store.path().display()
        ));
        Ok(BootstrapOutcome::TemplateCreated)
    }

    fn encrypt_first_time(
        &mut self,
        record: ConfigRecord,
    ) -> Result<BootstrapOutcome, BootstrapError> {
        let password = loop {
            let password = self.read_password(NEW_PASSWORD_PROMPT)?;
            if !password.is_empty() {
                break password;
            }
            self.console.alert(EMPTY_PASSWORD_MESSAGE);
        };

        let plaintext_key = Zeroizing::new(record.private_key);
        if !is_keypair_encoding(&plaintext_key) {
            warn!(
                expected_len = SECRET_KEY_LEN,
                "PRIVATE_KEY is not a base58 keypair of the expected length; encrypting it as entered"
            );
        }

        let cipher = CredentialCipher::with_params(&password, self.kdf)?;
        let encrypted = ConfigRecord {
            rpc_url: record.rpc_url,
            private_key: cipher.encrypt(&plaintext_key)?,
            verification_tag: Some(cipher.encrypt(CANARY)?),
        };
        self.store.write(&encrypted)?;

        info!(path = %self.store.path().display(), "private key encrypted");
        self.console.notice(&format!(
            "Encrypted private key and flag saved to {}. Please restart JupGrid to continue.",
            self.store.path().display()
        ));
        Ok(BootstrapOutcome::Encrypted)
    }

    fn unlock(&mut self, locked: LockedRecord) -> Result<UnlockedCredential, BootstrapError> {
        let mut attempt: u64 = 0;
        let cipher = loop {
            attempt += 1;
            let password = self.read_password(UNLOCK_PROMPT)?;
            match self.verify(&password, &locked.verification_tag)? {
                Ok(cipher) => break cipher,
                Err(rejection) => {
                    debug!(attempt, reason = %rejection, "unlock password rejected");
                    self.console.alert(INVALID_PASSWORD_MESSAGE);
                }
            }
        };
        info!(attempts = attempt, "credential unlocked");

        let secret_key_bytes = decode_secret_key(&cipher, &locked.encrypted_key)?;
        Ok(UnlockedCredential {
            secret_key_bytes,
            rpc_url: locked.rpc_url,
        })
    }

    // Outer error: the cipher could not be built at all. Inner: this password
    // does not open the tag.
    fn verify(
        &self,
        password: &str,
        verification_tag: &str,
    ) -> Result<Result<CredentialCipher, Rejection>, BootstrapError> {
        let cipher = CredentialCipher::with_params(password, self.kdf)?;
        Ok(match cipher.decrypt(verification_tag) {
            Ok(canary) if canary == CANARY => Ok(cipher),
            Ok(_) => Err(Rejection::CanaryMismatch),
            Err(CipherError::Authentication) => Err(Rejection::TagAuthentication),
            Err(_) => Err(Rejection::TagMalformed),
        })
    }

    fn read_password(&mut self, prompt: &str) -> Result<Zeroizing<String>, BootstrapError> {
        self.console
            .read_hidden(prompt)
            .map(Zeroizing::new)
            .map_err(BootstrapError::Prompt)
    }
}

fn decode_secret_key(
    cipher: &CredentialCipher,
    encrypted_key: &str,
) -> Result<Zeroizing<Vec<u8>>, BootstrapError> {
    let encoded = cipher.decrypt(encrypted_key).map(Zeroizing::new).map_err(|e| {
        error!(error = %e, "key payload failed to decrypt after canary verified");
        BootstrapError::CorruptKey(format!("key payload did not decrypt: {e}"))
    })?;
    let bytes = bs58::decode(encoded.trim())
        .into_vec()
        .map(Zeroizing::new)
        .map_err(|_| {
            error!("decrypted key payload is not valid base58");
            BootstrapError::CorruptKey("decrypted key is not valid base58".to_string())
        })?;
    if bytes.len() != SECRET_KEY_LEN {
        error!(len = bytes.len(), "decrypted key has unexpected length");
        return Err(BootstrapError::CorruptKey(format!(
            "expected a {SECRET_KEY_LEN}-byte key, found {} bytes",
            bytes.len()
        )));
    }
    Ok(bytes)
}

fn is_keypair_encoding(value: &str) -> bool {
    bs58::decode(value.trim())
        .into_vec()
        .map(|bytes| Zeroizing::new(bytes).len() == SECRET_KEY_LEN)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::ScriptedConsole;
    use crate::crypto::cipher::tests::FAST_KDF;
    use std::fs;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    const RPC: &str = "https://rpc.example";

    fn raw_key() -> Vec<u8> {
        (0..SECRET_KEY_LEN as u8).map(|b| b.wrapping_mul(7)).collect()
    }

    fn bootstrapper<'a>(
        dir: &TempDir,
        console: &'a mut ScriptedConsole,
    ) -> CredentialBootstrapper<&'a mut ScriptedConsole> {
        CredentialBootstrapper::new(ConfigStore::new(dir.path().join(".env")), console)
            .with_kdf_params(FAST_KDF)
    }

    fn write_plain(dir: &TempDir, key: &str) {
        fs::write(
            dir.path().join(".env"),
            format!("RPC_URL={RPC}\nPRIVATE_KEY={key}\n"),
        )
        .unwrap();
    }

    fn write_locked(dir: &TempDir, password: &str, key: &str, canary: &str) {
        let cipher = CredentialCipher::with_params(password, FAST_KDF).unwrap();
        let record = ConfigRecord {
            rpc_url: RPC.to_string(),
            private_key: cipher.encrypt(key).unwrap(),
            verification_tag: Some(cipher.encrypt(canary).unwrap()),
        };
        ConfigStore::new(dir.path().join(".env")).write(&record).unwrap();
    }

    #[test]
    fn first_run_writes_template_and_halts() {
        let dir = TempDir::new().unwrap();
        let mut console = ScriptedConsole::default();

        let outcome = bootstrapper(&dir, &mut console).run().unwrap();

        assert!(matches!(outcome, BootstrapOutcome::TemplateCreated));
        assert_eq!(outcome.exit_code(), 0);
        let contents = fs::read_to_string(dir.path().join(".env")).unwrap();
        assert_eq!(
            contents.lines().collect::<Vec<_>>(),
            ["RPC_URL=Your_RPC_Here", "PRIVATE_KEY=Your_Private_Key_Here"]
        );
        assert!(!contents.contains("FLAG"));
        assert!(console.prompts.is_empty());
        assert_eq!(console.notices.len(), 1);
    }

    #[test]
    fn untouched_template_reports_missing_fields() {
        let dir = TempDir::new().unwrap();
        let mut console = ScriptedConsole::default();
        bootstrapper(&dir, &mut console).run().unwrap();

        let err = bootstrapper(&dir, &mut console).run().unwrap_err();

        assert!(matches!(
            &err,
            BootstrapError::MissingFields(fields) if fields == &["RPC_URL", "PRIVATE_KEY"]
        ));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn absent_field_reports_missing_fields() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".env"), "RPC_URL=https://rpc.example\n").unwrap();
        let mut console = ScriptedConsole::default();

        let err = bootstrapper(&dir, &mut console).run().unwrap_err();

        assert!(matches!(err, BootstrapError::MissingFields(_)));
    }

    #[test]
    fn first_encryption_persists_key_and_canary() {
        let dir = TempDir::new().unwrap();
        write_plain(&dir, "abc123");
        let mut console = ScriptedConsole::new(["hunter2"]);

        let outcome = bootstrapper(&dir, &mut console).run().unwrap();

        assert!(matches!(outcome, BootstrapOutcome::Encrypted));
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(console.prompts, [NEW_PASSWORD_PROMPT]);

        let record = ConfigStore::new(dir.path().join(".env")).read().unwrap();
        assert!(record.is_encrypted());
        assert_eq!(record.rpc_url, RPC);
        let cipher = CredentialCipher::with_params("hunter2", FAST_KDF).unwrap();
        assert_eq!(cipher.decrypt(&record.private_key).unwrap(), "abc123");
        assert_eq!(
            cipher.decrypt(record.verification_tag.as_deref().unwrap()).unwrap(),
            CANARY
        );
    }

    #[test]
    fn empty_new_password_is_asked_again() {
        let dir = TempDir::new().unwrap();
        write_plain(&dir, "abc123");
        let mut console = ScriptedConsole::new(["", "hunter2"]);

        let outcome = bootstrapper(&dir, &mut console).run().unwrap();

        assert!(matches!(outcome, BootstrapOutcome::Encrypted));
        assert_eq!(console.prompts.len(), 2);
        assert_eq!(console.alerts, [EMPTY_PASSWORD_MESSAGE]);
    }

    #[test]
    fn wrong_passwords_loop_until_correct() {
        let dir = TempDir::new().unwrap();
        let encoded = bs58::encode(raw_key()).into_string();
        write_locked(&dir, "correct", &encoded, CANARY);
        let mut console = ScriptedConsole::new(["wrong", "wrong", "wrong", "correct"]);

        let outcome = bootstrapper(&dir, &mut console).run().unwrap();

        let credential = match outcome {
            BootstrapOutcome::Unlocked(credential) => credential,
            other => panic!("expected unlock, got {other:?}"),
        };
        assert_eq!(credential.secret_key_bytes(), raw_key().as_slice());
        let (bytes, rpc_url) = credential.into_parts();
        assert_eq!(bytes.as_slice(), raw_key().as_slice());
        assert_eq!(rpc_url, RPC);
        assert_eq!(console.prompts.len(), 4);
        assert_eq!(console.alerts, [INVALID_PASSWORD_MESSAGE; 3]);
    }

    // No lockout and no backoff: a long run of failures still ends in unlock.
    #[test]
    fn retries_are_unbounded() {
        let dir = TempDir::new().unwrap();
        write_locked(&dir, "correct", &bs58::encode(raw_key()).into_string(), CANARY);
        let mut answers = vec!["nope".to_string(); 200];
        answers.push("correct".to_string());
        let mut console = ScriptedConsole::new(answers);

        let outcome = bootstrapper(&dir, &mut console).run().unwrap();

        assert!(matches!(outcome, BootstrapOutcome::Unlocked(_)));
        assert_eq!(console.alerts.len(), 200);
    }

    #[test]
    fn closed_input_ends_unlock_loop() {
        let dir = TempDir::new().unwrap();
        write_locked(&dir, "correct", &bs58::encode(raw_key()).into_string(), CANARY);
        let mut console = ScriptedConsole::new(["wrong"]);

        let err = bootstrapper(&dir, &mut console).run().unwrap_err();

        assert!(matches!(err, BootstrapError::Prompt(_)));
        assert_eq!(console.alerts, [INVALID_PASSWORD_MESSAGE]);
    }

    #[test]
    fn corrupt_key_after_verified_canary_is_not_retried() {
        let dir = TempDir::new().unwrap();
        write_locked(&dir, "correct", "0OIl-not-base58", CANARY);
        let mut console = ScriptedConsole::new(["correct", "correct"]);

        let err = bootstrapper(&dir, &mut console).run().unwrap_err();

        assert!(matches!(err, BootstrapError::CorruptKey(_)), "{err}");
        assert!(console.alerts.is_empty());
        assert_eq!(console.remaining(), 1);
    }

    #[test]
    fn short_key_after_verified_canary_is_corrupt() {
        let dir = TempDir::new().unwrap();
        write_locked(&dir, "correct", &bs58::encode([1u8; 32]).into_string(), CANARY);
        let mut console = ScriptedConsole::new(["correct"]);

        let err = bootstrapper(&dir, &mut console).run().unwrap_err();

        assert!(matches!(err, BootstrapError::CorruptKey(msg) if msg.contains("32 bytes")));
    }

    #[test]
    fn inconsistent_record_is_malformed() {
        let dir = TempDir::new().unwrap();
        let cipher = CredentialCipher::with_params("pw", FAST_KDF).unwrap();
        fs::write(
            dir.path().join(".env"),
            format!(
                "RPC_URL={RPC}\nPRIVATE_KEY=abc123\nFLAG={}\n",
                cipher.encrypt(CANARY).unwrap()
            ),
        )
        .unwrap();
        let mut console = ScriptedConsole::new(["pw"]);

        let err = bootstrapper(&dir, &mut console).run().unwrap_err();

        assert!(matches!(err, BootstrapError::MalformedConfig(_)));
        assert!(console.prompts.is_empty());
    }

    #[traced_test]
    #[test]
    fn rejection_reasons_are_logged_but_not_shown() {
        let dir = TempDir::new().unwrap();
        write_locked(&dir, "pw", &bs58::encode(raw_key()).into_string(), "not-the-canary");
        let mut console = ScriptedConsole::new(["pw", "other"]);

        let err = bootstrapper(&dir, &mut console).run().unwrap_err();

        assert!(matches!(err, BootstrapError::Prompt(_)));
        assert_eq!(console.alerts, [INVALID_PASSWORD_MESSAGE; 2]);
        assert!(logs_contain("canary mismatch"));
        assert!(logs_contain("verification tag failed authentication"));
    }

    #[traced_test]
    #[test]
    fn malformed_tag_is_rejected_like_a_wrong_password() {
        let dir = TempDir::new().unwrap();
        let cipher = CredentialCipher::with_params("pw", FAST_KDF).unwrap();
        fs::write(
            dir.path().join(".env"),
            format!(
                "RPC_URL={RPC}\nPRIVATE_KEY={}\nFLAG=enc:v1:AAAA\n",
                cipher.encrypt("abc123").unwrap()
            ),
        )
        .unwrap();
        let mut console = ScriptedConsole::new(["pw"]);

        let err = bootstrapper(&dir, &mut console).run().unwrap_err();

        assert!(matches!(err, BootstrapError::Prompt(_)));
        assert_eq!(console.alerts, [INVALID_PASSWORD_MESSAGE]);
        assert!(logs_contain("verification tag is malformed"));
    }

    #[test]
    fn unlocked_credential_debug_redacts_key() {
        let credential = UnlockedCredential {
            secret_key_bytes: Zeroizing::new(vec![0xAB; SECRET_KEY_LEN]),
            rpc_url: RPC.to_string(),
        };
        let shown = format!("{credential:?}");
        assert!(shown.contains("<redacted>"));
        assert!(!shown.contains("171"));
    }
}
