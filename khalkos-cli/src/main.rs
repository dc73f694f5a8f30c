//! Developer CLI for the Khalkos wallet core.
//!
//! Usage:
//!   khalkos derive --token <JWT>        # print the address an identity maps to
//!   khalkos login --token <JWT>         # onboard: derive, store, deploy
//!   khalkos status                      # stored wallet, route and deployment state
//!   khalkos balances                    # balances with USD prices
//!   khalkos history --page 1 --limit 20
//!   khalkos logout                      # wipe every slot

mod device;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use eyre::{eyre, WrapErr};
use khalkos_core::{
    derivation::{derive_wallet, DerivationParams},
    history::Transaction,
    tokens::PortfolioSnapshot,
    Environment, SessionState, WalletConfig, WalletSession,
};
use secrecy::SecretString;
use serde::Serialize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use device::{ConsoleAuthenticator, DevKeystore, FileBlobStore};

/// Khalkos non-custodial Starknet wallet, from the terminal.
#[derive(Parser, Debug)]
#[command(name = "khalkos", version, about)]
struct Cli {
    /// Starknet network.
    #[arg(long, env = "KHALKOS_ENV", default_value = "sepolia", global = true)]
    env: Environment,

    /// JSON-RPC endpoint overriding the network default.
    #[arg(long, env = "KHALKOS_RPC_URL", global = true)]
    rpc_url: Option<String>,

    /// Application salt mixed into key derivation.
    #[arg(long, env = "KHALKOS_APP_SALT", hide_env_values = true, global = true)]
    app_salt: Option<String>,

    /// Full JSON configuration; replaces --env, --rpc-url and --app-salt.
    #[arg(long, env = "KHALKOS_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Directory holding the sealed slots and the development device key.
    #[arg(long, env = "KHALKOS_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Approve device authentication prompts without asking.
    #[arg(long, short = 'y', global = true)]
    yes: bool,

    /// Print JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Derive the account for an identity token without storing anything.
    Derive {
        /// Identity token (JWT) from the sign-in provider.
        #[arg(long, env = "KHALKOS_IDENTITY_TOKEN", hide_env_values = true)]
        token: String,
    },
    /// Create the wallet for an identity token and deploy its account.
    Login {
        /// Identity token (JWT) from the sign-in provider.
        #[arg(long, env = "KHALKOS_IDENTITY_TOKEN", hide_env_values = true)]
        token: String,
    },
    /// Show the stored wallet, the session route and the deployment state.
    Status,
    /// Deploy the stored account through the paymaster.
    Deploy,
    /// Show balances of every supported token with USD prices.
    Balances,
    /// Show transaction history.
    History {
        /// Page number, starting at 1.
        #[arg(long, default_value_t = 1)]
        page: u32,
        /// Page size, at most 100.
        #[arg(long, default_value_t = khalkos_core::history::DEFAULT_PAGE_SIZE)]
        limit: u32,
    },
    /// Set or replace the six digit unlock PIN.
    SetPin {
        /// New PIN.
        pin: String,
        /// Current PIN, required when one is already set.
        #[arg(long)]
        current: Option<String>,
    },
    /// Print the private key after confirming device authentication.
    ExportKey,
    /// Delete every stored slot.
    Logout,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    init_tracing()?;
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let Cli {
        command,
        data_dir,
        yes,
        json,
        ..
    } = cli;

    let command = match command {
        Command::Derive { token } => return derive(&config, &token, json),
        command => command,
    };

    let session = open_session(data_dir, yes, config)?;
    let state = session.initialize().await?;
    tracing::debug!(?state, "session initialized");

    match command {
        Command::Derive { .. } => {}
        Command::Login { token } => {
            let info = session.create_from_identity(&token).await?;
            let deployed = session.is_wallet_deployed().await?;
            print(json, &info, || {
                format!(
                    "wallet {}\n  email     {}\n  deployed  {deployed}",
                    info.address, info.email
                )
            })?;
        }
        Command::Status => {
            if state == (SessionState::Initialized { has_wallet: false }) {
                println!("no wallet stored, route: {}", session.route());
                return Ok(());
            }
            let info = session.authenticate_and_unlock().await?;
            let status = session.deployment_status().await?;
            let route = session.route();
            print(json, &info, || {
                format!(
                    "wallet {}\n  email       {}\n  deployment  {status:?}\n  route       {route}",
                    info.address, info.email
                )
            })?;
        }
        Command::Deploy => {
            session.authenticate_and_unlock().await?;
            let receipt = session.deploy_wallet().await?;
            println!(
                "deployment submitted: {}",
                session.explorer_url(&format!("{:#x}", receipt.transaction_hash))
            );
        }
        Command::Balances => {
            session.authenticate_and_unlock().await?;
            let snapshot = session.balances_with_prices().await?;
            print(json, &snapshot, || render_portfolio(&snapshot))?;
        }
        Command::History { page, limit } => {
            session.authenticate_and_unlock().await?;
            let transactions = session.history(page, limit).await?;
            print(json, &transactions, || {
                render_history(&session, &transactions)
            })?;
        }
        Command::SetPin { pin, current } => {
            session.authenticate_and_unlock().await?;
            match current {
                Some(current) => session.change_pin(&current, &pin)?,
                None if session.has_pin()? => {
                    return Err(eyre!("a PIN is already set, pass --current"));
                }
                None => session.setup_pin(&pin)?,
            }
            println!("pin updated");
        }
        Command::ExportKey => {
            session.authenticate_and_unlock().await?;
            let key = session.export_private_key().await?;
            println!("{}", key.as_str());
        }
        Command::Logout => {
            session.logout();
            println!("logged out");
        }
    }

    Ok(())
}

fn init_tracing() -> eyre::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,khalkos_core=info,khalkos=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .wrap_err("failed to install tracing subscriber")?;
    Ok(())
}

fn load_config(cli: &Cli) -> eyre::Result<WalletConfig> {
    if let Some(path) = &cli.config {
        let json = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read {}", path.display()))?;
        return Ok(WalletConfig::from_json(&json)?);
    }
    let salt = cli
        .app_salt
        .clone()
        .ok_or_else(|| eyre!("--app-salt (or KHALKOS_APP_SALT) is required without --config"))?;
    Ok(WalletConfig::from_environment(
        cli.env,
        cli.rpc_url.clone(),
        SecretString::from(salt),
    )?)
}

fn open_session(
    data_dir: Option<PathBuf>,
    auto_approve: bool,
    config: WalletConfig,
) -> eyre::Result<WalletSession> {
    let root = match data_dir {
        Some(dir) => dir,
        None => dirs::data_dir()
            .ok_or_else(|| eyre!("no data directory on this platform, pass --data-dir"))?
            .join("khalkos"),
    }
    .join(config.environment.to_string());

    let blob_store = Arc::new(FileBlobStore::new(&root)?);
    let keystore = Arc::new(DevKeystore::open(&root)?);
    let authenticator = Arc::new(ConsoleAuthenticator::new(auto_approve));
    tracing::debug!(root = %root.display(), "opening device storage");

    Ok(WalletSession::from_config(
        config,
        keystore,
        blob_store,
        authenticator,
    ))
}

fn derive(config: &WalletConfig, token: &str, json: bool) -> eyre::Result<()> {
    let params = DerivationParams {
        app_salt: config.app_salt.clone(),
        account_class_hash: config.account_class_hash,
    };
    let derived = derive_wallet(token, &params)?;

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Derived {
        subject_id: String,
        email: String,
        address: String,
        public_key: String,
    }
    let output = Derived {
        subject_id: derived.claims.subject_id.clone(),
        email: derived.claims.email.clone(),
        address: derived.key_material.address_hex(),
        public_key: khalkos_core::address::felt_to_hex(&derived.key_material.public_key),
    };
    print(json, &output, || {
        format!(
            "address     {}\npublic key  {}\nsubject     {}",
            output.address, output.public_key, output.subject_id
        )
    })
}

fn print<T: Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) -> eyre::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", text());
    }
    Ok(())
}

fn render_portfolio(snapshot: &PortfolioSnapshot) -> String {
    let mut out = String::new();
    for balance in &snapshot.balances {
        out.push_str(&format!(
            "{:<6} {:>20}  ${:>12.2}\n",
            balance.token.symbol,
            balance.formatted_balance,
            balance.usd_value.unwrap_or(0.0)
        ));
    }
    out.push_str(&format!("total  ${:.2}", snapshot.total_usd));
    if snapshot.price_data_failed {
        out.push_str("  (prices unavailable)");
    }
    out
}

fn render_history(session: &WalletSession, transactions: &[Transaction]) -> String {
    if transactions.is_empty() {
        return "no transactions".to_string();
    }
    transactions
        .iter()
        .map(|tx| {
            format!(
                "{:<8} {:>14} {:<6} {:<8} {}",
                tx.kind.to_string(),
                tx.amount,
                tx.token,
                tx.status.to_string(),
                session.explorer_url(&tx.hash)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
