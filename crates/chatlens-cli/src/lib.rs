pub mod cli_args;

use anyhow::{Context, Result, bail};
use chatlens_core::{
    AccountState, AppConfig, LoggingDestination, Session, apply_runtime_overrides, init_logging,
    load_config,
};
use tracing::warn;

use cli_args::{AccountsCommand, Cli, Command, PrivacyCommand};

pub async fn run(cli: Cli) -> Result<()> {
    let destination = if cli.verbose {
        LoggingDestination::FileAndStderr
    } else {
        LoggingDestination::FileOnly
    };
    if let Err(err) = init_logging(destination) {
        eprintln!("Warning: logging disabled: {err}");
    }

    let config = resolve_config(&cli);
    let session = Session::start(&config).context("failed to start session")?;
    let outcome = dispatch(&session, cli.command).await;
    session.shutdown().await;
    outcome
}

/// Load config.toml and apply command-line overrides, printing any warnings.
pub fn resolve_config(cli: &Cli) -> AppConfig {
    let load = load_config();
    let mut warnings = load.warnings;
    let mut config = load.config;

    let overrides = cli.connection.to_runtime_overrides();
    if !overrides.is_empty() {
        apply_runtime_overrides(&mut config, &overrides, &mut warnings);
    }

    for warning in warnings {
        warn!(%warning, "configuration");
        eprintln!("Warning: {warning}");
    }
    config
}

async fn dispatch(session: &Session, command: Command) -> Result<()> {
    match command {
        Command::Accounts(cmd) => handle_accounts_command(session, cmd).await,
        Command::Privacy(cmd) => {
            handle_privacy_command(session, cmd);
            Ok(())
        }
        Command::Health => {
            let api = session
                .api()
                .context("session has no HTTP client configured")?;
            let health = api.health_check().await?;
            if !health.is_healthy() {
                bail!("chat service at {} reported '{}'", api.base_url(), health.status);
            }
            match health.service {
                Some(service) => println!("{} is healthy ({service})", api.base_url()),
                None => println!("{} is healthy", api.base_url()),
            }
            Ok(())
        }
    }
}

async fn handle_accounts_command(session: &Session, command: AccountsCommand) -> Result<()> {
    let accounts = session.accounts();
    match command {
        AccountsCommand::List => {
            accounts.ensure_loaded(false).await;
            let state = accounts.snapshot();
            if let Some(err) = state.error() {
                bail!("could not load accounts: {err}");
            }
            print!("{}", render_account_list(&state));
            Ok(())
        }
        AccountsCommand::Show => {
            accounts.ensure_loaded(false).await;
            let state = accounts.snapshot();
            if let Some(err) = state.error() {
                bail!("could not load accounts: {err}");
            }
            match state.selected_account {
                Some(account) => println!("{account}"),
                None => println!("No account selected."),
            }
            Ok(())
        }
        AccountsCommand::Select { account } => {
            let trimmed = account.trim();
            if trimmed.is_empty() {
                bail!("account id must not be empty");
            }
            accounts.ensure_loaded(false).await;
            if accounts.error().is_none() && !accounts.accounts().iter().any(|a| a == trimmed) {
                eprintln!("Warning: '{trimmed}' is not reported by the chat service.");
            }
            accounts.set_selected_account(Some(trimmed));
            println!("Selected account '{trimmed}'.");
            Ok(())
        }
        AccountsCommand::Clear => {
            accounts.set_selected_account(None);
            println!("Cleared the selected account.");
            Ok(())
        }
    }
}

fn handle_privacy_command(session: &Session, command: PrivacyCommand) {
    let privacy = session.privacy();
    let enabled = match command {
        PrivacyCommand::Show => privacy.enabled(),
        PrivacyCommand::On => {
            privacy.set(true);
            true
        }
        PrivacyCommand::Off => {
            privacy.set(false);
            false
        }
        PrivacyCommand::Toggle => privacy.toggle(),
    };
    println!("Privacy mode is {}.", if enabled { "on" } else { "off" });
}

/// One line per account, `*` marking the selected one.
pub fn render_account_list(state: &AccountState) -> String {
    if state.accounts.is_empty() {
        return "No accounts available. Decrypt a database first.\n".to_string();
    }

    let selected = state.selected_account.as_deref();
    state
        .accounts
        .iter()
        .map(|account| {
            let marker = if Some(account.as_str()) == selected { '*' } else { ' ' };
            format!("{marker} {account}\n")
        })
        .collect()
}
