use clap::{Args, Parser, Subcommand, ValueHint};
use chatlens_core::RuntimeOverrides;

/// Top-level CLI entrypoint.
#[derive(Parser, Debug, Clone)]
#[command(version, about = "Browse accounts exposed by the local chat export service", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Log to stderr as well as the log file.
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Connection overrides layered on top of config.toml.
#[derive(Debug, Clone, Args, Default)]
pub struct ConnectionArgs {
    /// Base URL of the chat service API (e.g. http://localhost:8000/api).
    #[arg(long = "api-base", global = true, value_name = "URL", value_hint = ValueHint::Url)]
    pub api_base: Option<String>,

    /// Request timeout in seconds.
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Preference file to use instead of the default one.
    #[arg(long, global = true, value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub preferences: Option<String>,
}

impl ConnectionArgs {
    pub fn to_runtime_overrides(&self) -> RuntimeOverrides {
        RuntimeOverrides {
            api_base_url: self.api_base.clone(),
            timeout_secs: self.timeout,
            preferences_path: self.preferences.clone(),
        }
    }
}

/// Supported subcommands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    #[command(subcommand)]
    Accounts(AccountsCommand),
    #[command(subcommand)]
    Privacy(PrivacyCommand),
    /// Check that the chat service is reachable.
    Health,
}

#[derive(Debug, Clone, Subcommand)]
pub enum AccountsCommand {
    /// List accounts and mark the selected one.
    #[command(alias = "ls")]
    List,
    /// Print the selected account.
    Show,
    /// Remember an account as the selected one.
    Select {
        #[arg(value_name = "ID")]
        account: String,
    },
    /// Forget the selected account.
    Clear,
}

#[derive(Debug, Clone, Copy, Subcommand)]
pub enum PrivacyCommand {
    Show,
    On,
    Off,
    Toggle,
}
