//! Local credential bootstrap for the JupGrid trading agent. The signing key is
//! kept encrypted at rest under an operator password and only ever decoded in
//! memory after the password has been verified against an encrypted canary.
//!
//! [`bootstrap::CredentialBootstrapper`] is the entry point; it hands an
//! [`bootstrap::UnlockedCredential`] to the caller, which builds the signer and
//! starts the strategy.

pub mod bootstrap;
pub mod config;
pub mod console;
pub mod crypto;
pub mod settings;

pub use bootstrap::{BootstrapError, BootstrapOutcome, CredentialBootstrapper, UnlockedCredential};
pub use config::{ConfigError, ConfigRecord, ConfigStore};
pub use console::{Console, ScriptedConsole, TerminalConsole};
pub use crypto::{CipherError, CredentialCipher, KdfParams};
pub use settings::{SettingsError, SettingsLoad, SettingsStore, UserSettings};
