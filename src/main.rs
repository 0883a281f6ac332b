//! Command-line entry point. Provisions or unlocks the signing key, then reports
//! whether saved grid settings exist for the trading engine to resume from.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use jupgrid_credentials::{
    BootstrapOutcome, ConfigStore, CredentialBootstrapper, SettingsLoad, SettingsStore,
    TerminalConsole,
};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Parser)]
#[command(name = "jupgrid-credentials", version, about = "Unlock or provision the JupGrid signing key")]
struct Args {
    /// Credential file holding RPC_URL, PRIVATE_KEY and FLAG.
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// Grid settings written by the trading engine.
    #[arg(long, default_value = "userSettings.json")]
    settings_file: PathBuf,
}

fn init_logging() {
    // RUST_LOG selects the level; defaults to info. Logs go to stderr so the
    // password prompts stay readable.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Unable to set global default subscriber");
    }
}

fn main() -> ExitCode {
    init_logging();
    let args = Args::parse();

    let store = ConfigStore::new(args.env_file);
    let mut bootstrapper = CredentialBootstrapper::new(store, TerminalConsole);
    let credential = match bootstrapper.run() {
        Ok(BootstrapOutcome::Unlocked(credential)) => credential,
        Ok(outcome) => return ExitCode::from(outcome.exit_code()),
        Err(err) => {
            eprintln!("{err}");
            eprintln!("{}", err.remediation());
            return ExitCode::from(err.exit_code());
        }
    };
    info!(
        key_len = credential.secret_key_bytes().len(),
        "signing key unlocked"
    );

    match SettingsStore::new(args.settings_file).load() {
        SettingsLoad::Loaded(settings) => info!(
            token_a = %settings.selected_token_a,
            token_b = %settings.selected_token_b,
            "resuming with saved grid settings"
        ),
        SettingsLoad::NotFound => println!("No user data found. Starting with fresh inputs."),
    }
    ExitCode::SUCCESS
}
