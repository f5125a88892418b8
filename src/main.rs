use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, warn};
use unlock_ledger::application::access::AccessQueryService;
use unlock_ledger::application::gateway::{PaymentGatewayAdapter, UnlockRequest};
use unlock_ledger::application::marketplace::{Marketplace, RetryPolicy};
use unlock_ledger::application::ranking::RankingEngine;
use unlock_ledger::config::{ProviderArgs, StorageArgs};
use unlock_ledger::domain::ledger::{DEFAULT_WINDOW_DAYS, DemandWindow, Target, TargetType};
use unlock_ledger::domain::payment::UnlockKind;
use unlock_ledger::domain::ports::LedgerStoreRef;
use unlock_ledger::infrastructure::clock::SystemClock;
use unlock_ledger::infrastructure::gateway::HttpPaymentProvider;
use unlock_ledger::infrastructure::in_memory::{InMemoryLedgerStore, StaticOnboardingGate};
use unlock_ledger::interfaces::csv::confirmation_reader::ConfirmationReader;
use unlock_ledger::interfaces::csv::report_writer::ReportWriter;
use unlock_ledger::telemetry;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    storage: StorageArgs,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record grants for a CSV of payment confirmations
    Confirm {
        /// CSV with columns subject,target,target_type,payment_reference
        input: PathBuf,

        /// Attempts per confirmation while the payment is still settling
        #[arg(long, default_value = "3")]
        attempts: u32,

        /// Delay before the first retry, doubled on each further attempt
        #[arg(long, default_value = "500")]
        backoff_ms: u64,

        #[command(flatten)]
        provider: ProviderArgs,
    },
    /// Open a payment intent for an unlock and print it as JSON
    Intent {
        /// investor-unlock or project-visibility
        kind: UnlockKind,
        subject: String,
        /// Target id; defaults to the subject's project for project-visibility
        #[arg(long)]
        target: Option<String>,
        #[arg(long, default_value = "investor:platform")]
        target_type: TargetType,
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        score: Option<Decimal>,

        #[command(flatten)]
        provider: ProviderArgs,
    },
    /// Print whether a subject has unlocked a target
    Access {
        subject: String,
        target_type: TargetType,
        target: String,
    },
    /// Print demand stats for a target
    Stats {
        target_type: TargetType,
        target: String,
        #[arg(long, default_value_t = DEFAULT_WINDOW_DAYS)]
        window_days: u32,
    },
    /// Print the investor demand leaderboard
    Leaderboard {
        #[arg(long, default_value = "10")]
        top: usize,
        #[arg(long, default_value_t = DEFAULT_WINDOW_DAYS)]
        window_days: u32,
    },
}

fn open_store(db_path: Option<PathBuf>) -> Result<LedgerStoreRef> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let store = unlock_ledger::infrastructure::rocksdb::RocksDbLedgerStore::open(path)
                .into_diagnostic()?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            warn!(
                "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
            Ok(Arc::new(InMemoryLedgerStore::new()))
        }
        None => Ok(Arc::new(InMemoryLedgerStore::new())),
    }
}

fn marketplace(store: LedgerStoreRef, provider: &ProviderArgs) -> Result<Marketplace> {
    // Credentials are checked before any input is read
    let config = provider.gateway_config().into_diagnostic()?;
    let pricing = provider.pricing().into_diagnostic()?;
    let currency = config.currency.clone();
    let http = HttpPaymentProvider::new(config).into_diagnostic()?;
    let gateway = PaymentGatewayAdapter::new(Arc::new(http), pricing, currency);

    Ok(Marketplace::new(
        store,
        gateway,
        Arc::new(StaticOnboardingGate::all_active()),
        Arc::new(SystemClock),
    )
    .with_verify_timeout(provider.verify_timeout()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(&cli.log_level);

    let store = open_store(cli.storage.db_path)?;
    let mut writer = ReportWriter::new(io::stdout());

    match cli.command {
        Command::Confirm {
            input,
            attempts,
            backoff_ms,
            provider,
        } => {
            let marketplace = marketplace(store, &provider)?;
            let policy = RetryPolicy {
                attempts: attempts.max(1),
                initial_backoff: std::time::Duration::from_millis(backoff_ms),
                ..RetryPolicy::default()
            };

            let file = File::open(input).into_diagnostic()?;
            let reader = ConfirmationReader::new(file);
            let mut written = HashSet::new();
            for confirmation in reader.confirmations() {
                let confirmation = match confirmation {
                    Ok(confirmation) => confirmation,
                    Err(e) => {
                        warn!("Error reading confirmation: {e}");
                        continue;
                    }
                };
                let target = confirmation.target();
                match marketplace
                    .confirm_with_retry(
                        &confirmation.subject,
                        &target,
                        &confirmation.payment_reference,
                        policy,
                    )
                    .await
                {
                    Ok(entry) => {
                        if written.insert(entry.id) {
                            writer.write_entry(&entry).into_diagnostic()?;
                        }
                    }
                    Err(e) => error!("Error confirming {}: {e}", confirmation.payment_reference),
                }
            }
        }
        Command::Intent {
            kind,
            subject,
            target,
            target_type,
            tag,
            score,
            provider,
        } => {
            let marketplace = marketplace(store, &provider)?;
            let request = UnlockRequest {
                subject_id: subject,
                kind,
                target: target.map(|id| Target::new(id, target_type)),
                tag,
                score,
            };
            let intent = marketplace
                .create_unlock_intent(&request)
                .await
                .into_diagnostic()?;
            println!("{}", serde_json::to_string(&intent).into_diagnostic()?);
        }
        Command::Access {
            subject,
            target_type,
            target,
        } => {
            let access = AccessQueryService::new(store, Arc::new(SystemClock));
            let target = Target::new(target, target_type);
            let unlocked = access.has_grant(&subject, &target).await.into_diagnostic()?;
            println!("{unlocked}");
        }
        Command::Stats {
            target_type,
            target,
            window_days,
        } => {
            let access = AccessQueryService::new(store, Arc::new(SystemClock));
            let target = Target::new(target, target_type);
            let stats = access
                .stats_for(&target, DemandWindow::days(window_days))
                .await
                .into_diagnostic()?;
            writer.write_stats(&target, &stats).into_diagnostic()?;
        }
        Command::Leaderboard { top, window_days } => {
            let ranking = RankingEngine::new(store, Arc::new(SystemClock));
            let rows = ranking
                .top_n(top, DemandWindow::days(window_days))
                .await
                .into_diagnostic()?;
            writer.write_leaderboard(&rows).into_diagnostic()?;
        }
    }

    writer.flush().into_diagnostic()?;
    Ok(())
}
