//! Operator CLI for the journal ledger.
//!
//! Every command goes through the same engine and services as the HTTP API
//! and prints its result as JSON.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use uuid::Uuid;

use journal_service::config::LedgerConfig;
use journal_service::models::{ReversalRequest, ValidationScope};
use journal_service::services::{
    CashFlowAggregator, CogsCalculator, Database, JournalEngine, LedgerValidator, PeriodCloser,
    PgSalesSource,
};
use service_core::observability::init_tracing;

#[derive(Parser)]
#[command(name = "ledger-admin", about = "Maintenance commands for the journal ledger")]
struct Cli {
    /// Apply pending migrations before running the command
    #[arg(long, global = true)]
    migrate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check stored balances against journal lines. Exits 1 on any inconsistency.
    Validate {
        #[arg(long, default_value = "all")]
        scope: ValidationScope,
    },
    /// Build the indirect-method cash flow statement
    CashFlow {
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
    },
    /// Post missing COGS entries for eligible sales in a date range
    BackfillCogs {
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
    },
    /// Reverse a posted journal entry
    Reverse {
        #[arg(long)]
        entry_id: Uuid,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Close a period into retained earnings; later entries dated inside it are rejected
    ClosePeriod {
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        #[arg(long)]
        description: Option<String>,
    },
    /// Print the trial balance
    TrialBalance {
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = LedgerConfig::from_env().context("loading configuration")?;
    init_tracing(
        "ledger-admin",
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    let db = Database::new(&config.database.url, 2, 1)
        .await
        .context("connecting to the database")?;
    if cli.migrate {
        db.run_migrations().await.context("running migrations")?;
    }
    let pool = db.pool().clone();
    let engine = JournalEngine::new(pool.clone(), config.policy.clone());

    match cli.command {
        Commands::Validate { scope } => {
            let validator = LedgerValidator::new(pool, config.policy.clone());
            let report = validator.validate(scope).await?;
            print_json(&report)?;
            if !report.is_consistent() {
                return Ok(ExitCode::from(1));
            }
        }
        Commands::CashFlow { start, end } => {
            let aggregator = CashFlowAggregator::new(
                pool,
                config.cash_flow.clone(),
                config.policy.balance_tolerance,
            );
            let statement = aggregator.aggregate(start, end).await?;
            print_json(&statement)?;
        }
        Commands::BackfillCogs { start, end } => {
            let calculator = CogsCalculator::new(
                engine,
                Arc::new(PgSalesSource::new(pool.clone())),
                pool,
                config.accounts.clone(),
            );
            let report = calculator.backfill(start, end).await?;
            print_json(&report)?;
            if !report.failures.is_empty() {
                return Ok(ExitCode::from(1));
            }
        }
        Commands::Reverse {
            entry_id,
            reason,
            date,
        } => {
            let request = ReversalRequest {
                reversal_date: date,
                reason: Some(reason),
            };
            let reversal = engine.reverse(entry_id, &request).await?;
            print_json(&reversal)?;
        }
        Commands::ClosePeriod {
            start,
            end,
            description,
        } => {
            let closer = PeriodCloser::new(engine, pool, config.accounts.clone());
            let closing = closer.close(start, end, description.as_deref()).await?;
            print_json(&closing)?;
        }
        Commands::TrialBalance { as_of } => {
            let as_of = as_of.unwrap_or_else(|| Utc::now().date_naive());
            let tb = db.trial_balance(as_of).await?;
            print_json(&tb)?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("ledger-admin: {:#}", e);
            ExitCode::from(2)
        }
    }
}
