//! Credential record store. The record is a flat `KEY=VALUE` file holding the
//! RPC endpoint, the signing key (plaintext until the first unlock password is
//! chosen, ciphertext afterwards) and the encrypted canary tag.
//!
//! Parsing goes through `dotenvy`'s iterator so the process environment is
//! never modified; the record is handed to the caller as a plain value.
//! `$` outside single quotes is rejected, since `dotenvy` would otherwise
//! substitute it from earlier lines or from the environment.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::crypto::is_ciphertext;

pub const RPC_URL_KEY: &str = "RPC_URL";
pub const PRIVATE_KEY_KEY: &str = "PRIVATE_KEY";
pub const FLAG_KEY: &str = "FLAG";

pub const RPC_URL_PLACEHOLDER: &str = "Your_RPC_Here";
pub const PRIVATE_KEY_PLACEHOLDER: &str = "Your_Private_Key_Here";

const ENCRYPTED_FIELDS_WARNING: &str =
    "# Do NOT touch these two - you risk breaking encryption!";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("credential file not found at {}", .0.display())]
    NotFound(PathBuf),
    #[error("credential file {} unreadable: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("credential file {} could not be parsed: {reason}", .path.display())]
    Parse { path: PathBuf, reason: String },
    #[error("required field {0} is missing or empty")]
    MissingField(&'static str),
    #[error("credential record is inconsistent: {0}")]
    Inconsistent(&'static str),
}

/// The persisted credential record.
#[derive(Clone, PartialEq, Eq)]
pub struct ConfigRecord {
    pub rpc_url: String,
    pub private_key: String,
    pub verification_tag: Option<String>,
}

impl ConfigRecord {
    /// The record written on first run, before the operator fills it in.
    pub fn template() -> Self {
        Self {
            rpc_url: RPC_URL_PLACEHOLDER.to_string(),
            private_key: PRIVATE_KEY_PLACEHOLDER.to_string(),
            verification_tag: None,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        is_ciphertext(&self.private_key)
    }

    /// Names of the fields that still hold their template placeholder.
    pub fn placeholder_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.rpc_url == RPC_URL_PLACEHOLDER {
            fields.push(RPC_URL_KEY);
        }
        if self.private_key == PRIVATE_KEY_PLACEHOLDER {
            fields.push(PRIVATE_KEY_KEY);
        }
        fields
    }

    /// A tag must be present exactly when the key is ciphertext.
    pub fn check_consistency(&self) -> Result<(), ConfigError> {
        match (self.is_encrypted(), &self.verification_tag) {
            (true, None) => Err(ConfigError::Inconsistent(
                "PRIVATE_KEY is encrypted but FLAG is missing",
            )),
            (false, Some(_)) => Err(ConfigError::Inconsistent(
                "FLAG is present but PRIVATE_KEY is not encrypted",
            )),
            (_, Some(tag)) if !is_ciphertext(tag) => Err(ConfigError::Inconsistent(
                "FLAG is not an encrypted value",
            )),
            _ => Ok(()),
        }
    }

    fn render(&self) -> String {
        let rpc_url = quote_value(&self.rpc_url);
        let private_key = quote_value(&self.private_key);
        match &self.verification_tag {
            None => format!("{RPC_URL_KEY}={rpc_url}\n{PRIVATE_KEY_KEY}={private_key}\n"),
            Some(tag) => format!(
                "{RPC_URL_KEY}={rpc_url}\n{ENCRYPTED_FIELDS_WARNING}\n{PRIVATE_KEY_KEY}={private_key}\n{FLAG_KEY}={}\n",
                quote_value(tag)
            ),
        }
    }
}

impl fmt::Debug for ConfigRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigRecord")
            .field("rpc_url", &self.rpc_url)
            .field("private_key", &"<redacted>")
            .field("encrypted", &self.is_encrypted())
            .field("has_verification_tag", &self.verification_tag.is_some())
            .finish()
    }
}

/// Reads and writes the credential record at a fixed path.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Writes the placeholder record, replacing whatever is at the path.
    pub fn write_template(&self) -> Result<(), ConfigError> {
        self.write_atomic(&ConfigRecord::template().render())
    }

    pub fn read(&self) -> Result<ConfigRecord, ConfigError> {
        let contents = fs::read_to_string(&self.path).map_err(|e| self.classify_io(e))?;
        if let Some(line) = find_substitution(&contents) {
            return Err(ConfigError::Parse {
                path: self.path.clone(),
                reason: format!(
                    "line {line}: `$` outside single quotes would expand a variable; quote the value as '...'"
                ),
            });
        }

        let mut rpc_url = None;
        let mut private_key = None;
        let mut verification_tag = None;
        for entry in dotenvy::from_read_iter(contents.as_bytes()) {
            let (key, value) = entry.map_err(|e| self.classify(e))?;
            match key.as_str() {
                RPC_URL_KEY => rpc_url = Some(value),
                PRIVATE_KEY_KEY => private_key = Some(value),
                FLAG_KEY => verification_tag = Some(value),
                other => debug!(key = other, "ignoring unrecognized credential file entry"),
            }
        }

        let record = ConfigRecord {
            rpc_url: non_empty(rpc_url).ok_or(ConfigError::MissingField(RPC_URL_KEY))?,
            private_key: non_empty(private_key)
                .ok_or(ConfigError::MissingField(PRIVATE_KEY_KEY))?,
            verification_tag: non_empty(verification_tag),
        };
        record.check_consistency()?;
        Ok(record)
    }

    /// Persists `record`, refusing to write one that breaks the tag invariant.
    pub fn write(&self, record: &ConfigRecord) -> Result<(), ConfigError> {
        record.check_consistency()?;
        self.write_atomic(&record.render())
    }

    fn classify_io(&self, source: io::Error) -> ConfigError {
        if source.kind() == io::ErrorKind::NotFound {
            ConfigError::NotFound(self.path.clone())
        } else {
            ConfigError::Io {
                path: self.path.clone(),
                source,
            }
        }
    }

    fn classify(&self, err: dotenvy::Error) -> ConfigError {
        match err {
            dotenvy::Error::Io(source) => self.classify_io(source),
            other => ConfigError::Parse {
                path: self.path.clone(),
                reason: other.to_string(),
            },
        }
    }

    // Write to a sibling temp file and rename over the target.
    fn write_atomic(&self, contents: &str) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: self.path.clone(),
            source,
        };
        let tmp_path = self.path.with_extension("tmp");

        let mut file = open_private(&tmp_path).map_err(io_err)?;
        file.write_all(contents.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);

        fs::rename(&tmp_path, &self.path).map_err(io_err)?;
        debug!(path = %self.path.display(), "credential file written");
        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Renders `value` so `dotenvy` reads it back verbatim. Plain values stay
/// bare; anything else goes in single quotes, with `'`, `\` and newlines
/// written as escapes between quoted runs. `dotenvy`'s line reader treats `\`
/// as an escape even inside single quotes, so it never appears quoted.
fn quote_value(value: &str) -> String {
    let plain = !value.is_empty()
        && !value.chars().any(|c| {
            c.is_whitespace() || c.is_control() || matches!(c, '$' | '\'' | '"' | '\\' | '#')
        });
    if plain {
        return value.to_string();
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        match c {
            '\'' => quoted.push_str("'\\''"),
            '\\' => quoted.push_str("'\\\\'"),
            '\n' => quoted.push_str("'\\n'"),
            c => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

/// 1-based line of the first value with a `$` outside single quotes, if any.
fn find_substitution(contents: &str) -> Option<usize> {
    contents.lines().enumerate().find_map(|(index, line)| {
        let line = line.trim_start();
        if line.starts_with('#') {
            return None;
        }
        let (_, value) = line.split_once('=')?;

        let mut strong_quote = false;
        let mut weak_quote = false;
        let mut escaped = false;
        for c in value.trim_start().chars() {
            if escaped {
                escaped = false;
            } else if strong_quote {
                strong_quote = c != '\'';
            } else if c == '$' {
                return Some(index + 1);
            } else if c == '\\' {
                escaped = true;
            } else if weak_quote {
                weak_quote = c != '"';
            } else if c == '\'' {
                strong_quote = true;
            } else if c == '"' {
                weak_quote = true;
            } else if c.is_whitespace() {
                // The rest is a trailing comment.
                break;
            }
        }
        None
    })
}

#[cfg(unix)]
fn open_private(path: &Path) -> io::Result<fs::File> {
    // Owner read/write only; the file holds key material.
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> io::Result<fs::File> {
    fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)
}
