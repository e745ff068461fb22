mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codec::{MetadataCodec, MetadataKey};
use ledger::StatusLedger;
use parcel_track_core::DeliveryStatus;
use service::DeliveryService;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "parcel-tracker")]
#[command(about = "Package delivery status ledger with encrypted shipment metadata", long_about = None)]
struct Cli {
    /// Use a throwaway in-memory ledger instead of the configured one
    #[arg(long, global = true)]
    temporary: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a fresh metadata key
    Keygen {
        /// Save it to the OS keychain instead of printing it
        #[arg(long)]
        store: bool,
    },

    /// Remove the metadata key from the OS keychain
    ForgetKey,

    /// Show persisted settings, or change the ones given
    Settings {
        /// Ledger directory; an empty value selects a temporary store
        #[arg(long)]
        storage_path: Option<String>,
        /// Audit JSONL file; an empty value disables auditing
        #[arg(long)]
        audit_path: Option<String>,
        /// Environment variable holding the metadata key
        #[arg(long)]
        key_env_var: Option<String>,
        /// Keychain entry holding the metadata key
        #[arg(long)]
        keychain_entry: Option<String>,
    },

    /// Register a new package
    Create {
        package_id: String,
        #[arg(long)]
        sender: String,
        #[arg(long)]
        recipient: String,
        /// RFC 3339 timestamp, defaults to now
        #[arg(long)]
        dispatch_time: Option<String>,
        #[arg(long, default_value = "dispatched")]
        initial_status: DeliveryStatus,
    },

    /// Move a package to a new status
    Update {
        package_id: String,
        status: DeliveryStatus,
        #[arg(long)]
        sender: Option<String>,
        #[arg(long)]
        recipient: Option<String>,
        /// RFC 3339 timestamp; stamped with now when moving to delivered
        #[arg(long)]
        delivery_time: Option<String>,
        /// Only apply if the record is still at this version
        #[arg(long)]
        expect_version: Option<u64>,
    },

    /// Print the current status of a package
    Status { package_id: String },

    /// Print a package with its decrypted metadata
    Show { package_id: String },

    /// Print every package
    List,

    /// Print the committed transitions of a package
    History { package_id: String },
}

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(env_filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Durable ledger directory, or `None` for a temporary store. TOML cannot hold a
/// null path, so an empty configured path also means temporary.
fn storage_path(cfg: &config::AppConfig, temporary: bool) -> Option<&str> {
    if temporary {
        return None;
    }
    cfg.storage.path.as_deref().filter(|p| !p.trim().is_empty())
}

fn open_ledger(cfg: &config::AppConfig, temporary: bool) -> Result<StatusLedger> {
    let ledger = match storage_path(cfg, temporary) {
        Some(path) => {
            tracing::debug!(%path, "opening ledger");
            StatusLedger::open(path).with_context(|| format!("Failed to open ledger at {path}"))?
        }
        _ => {
            tracing::info!("Using temporary ledger");
            StatusLedger::temporary().context("Failed to open temporary ledger")?
        }
    };

    Ok(match &cfg.audit.path {
        Some(path) => ledger.with_audit_log(path),
        None => ledger,
    })
}

fn create_service(cfg: &config::AppConfig, temporary: bool) -> Result<DeliveryService> {
    let secret = config::metadata_key_secret(&cfg.key)?;
    let key = MetadataKey::from_base64(&secret).context("Configured metadata key is unusable")?;
    let ledger = open_ledger(cfg, temporary)?;
    Ok(DeliveryService::new(ledger, MetadataCodec::new(&key)))
}

fn run(cli: Cli) -> Result<serde_json::Value> {
    let cfg = config::load().unwrap_or_default();
    let service = || create_service(&cfg, cli.temporary);

    match cli.command {
        Commands::Keygen { store } => commands::keygen(&cfg.key, store),
        Commands::ForgetKey => commands::forget_key(&cfg.key),
        Commands::Settings {
            storage_path,
            audit_path,
            key_env_var,
            keychain_entry,
        } => commands::settings(
            cfg.clone(),
            commands::SettingsUpdate {
                storage_path,
                audit_path,
                key_env_var,
                keychain_entry,
            },
        ),
        Commands::Create {
            package_id,
            sender,
            recipient,
            dispatch_time,
            initial_status,
        } => commands::create(
            &service()?,
            commands::CreateRequest {
                package_id,
                sender,
                recipient,
                dispatch_time,
                initial_status,
            },
        ),
        Commands::Update {
            package_id,
            status,
            sender,
            recipient,
            delivery_time,
            expect_version,
        } => commands::update(
            &service()?,
            commands::UpdateRequest {
                package_id,
                status,
                sender,
                recipient,
                delivery_time,
                expect_version,
            },
        ),
        Commands::Status { package_id } => commands::status(&service()?, &package_id),
        Commands::Show { package_id } => commands::show(&service()?, &package_id),
        Commands::List => commands::list(&service()?),
        Commands::History { package_id } => commands::history(&service()?, &package_id),
    }
}

fn main() -> Result<()> {
    init_tracing();
    let output = run(Cli::parse())?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
