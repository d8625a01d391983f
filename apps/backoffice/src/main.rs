//! # Sorveteria Back-Office CLI
//!
//! Runs migrations, reconciliation jobs and reports against the store.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Cli::parse()                                                           │
//! │      │                                                                  │
//! │  BackofficeConfig::load(--config)   file → SORVETERIA_* env → validate  │
//! │      │                                                                  │
//! │  init_tracing(RUST_LOG or [logging].filter)                             │
//! │      │                                                                  │
//! │  Database::new(db_config)           migrations when enabled             │
//! │      │                                                                  │
//! │  run(command)  ──►  engine service  ──►  text or --json output          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod config;

use anyhow::{bail, Context};
use chrono::{DateTime, Days, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::BackofficeConfig;
use sorveteria_core::reconcile::JobReport;
use sorveteria_db::Database;
use sorveteria_engine::{
    AccountsService, CardFeeJob, CashSessionManager, ReportService, RewardService, SessionBackfill, StatusSyncJob,
};

// =============================================================================
// Command Line
// =============================================================================

#[derive(Debug, Parser)]
#[command(name = "backoffice", version, about = "Sorveteria POS back-office jobs and reports")]
struct Cli {
    /// Config file (defaults to the platform config dir).
    #[arg(long, global = true, env = "SORVETERIA_CONFIG")]
    config: Option<PathBuf>,

    /// Database file, overriding the config.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Open the store and apply pending migrations.
    Migrate,
    /// Write the effective configuration to the config file.
    InitConfig,
    /// Reconciliation jobs.
    #[command(subcommand)]
    Jobs(JobCommand),
    /// Read-only reports.
    #[command(subcommand)]
    Report(ReportCommand),
    /// Consistency checks.
    #[command(subcommand)]
    Audit(AuditCommand),
}

#[derive(Debug, Args)]
struct RunMode {
    /// Compute without writing.
    #[arg(long, conflicts_with = "apply")]
    dry_run: bool,
    /// Write, even when the config defaults to dry runs.
    #[arg(long)]
    apply: bool,
}

impl RunMode {
    fn dry_run(&self, config: &BackofficeConfig) -> bool {
        if self.apply {
            false
        } else {
            self.dry_run || config.jobs.dry_run
        }
    }
}

#[derive(Debug, Args)]
struct Period {
    /// First day, inclusive (YYYY-MM-DD).
    #[arg(long)]
    from: NaiveDate,
    /// Last day, inclusive (YYYY-MM-DD).
    #[arg(long)]
    to: NaiveDate,
}

impl Period {
    /// Half-open UTC range covering both days.
    fn range(&self) -> anyhow::Result<(DateTime<Utc>, DateTime<Utc>)> {
        if self.to < self.from {
            bail!("--to ({}) is before --from ({})", self.to, self.from);
        }
        let end = self
            .to
            .checked_add_days(Days::new(1))
            .context("--to is out of range")?;
        Ok((midnight(self.from)?, midnight(end)?))
    }
}

fn midnight(date: NaiveDate) -> anyhow::Result<DateTime<Utc>> {
    Ok(date.and_hms_opt(0, 0, 0).context("invalid date")?.and_utc())
}

#[derive(Debug, Subcommand)]
enum JobCommand {
    /// Book card-fee expenses for orders settled in the period.
    CardFees {
        #[command(flatten)]
        period: Period,
        #[command(flatten)]
        mode: RunMode,
    },
    /// Create missing revenue rows for closed cash sessions.
    BackfillSessions {
        #[command(flatten)]
        mode: RunMode,
    },
    /// Sync ledger rows with paid or cancelled payables and receivables.
    SyncStatus {
        #[command(flatten)]
        mode: RunMode,
        /// Cancel legacy-keyed duplicates.
        #[arg(long)]
        cancel_duplicates: bool,
    },
    /// Flip obligations past their due date to overdue.
    MarkOverdue {
        /// Reference day (defaults to today, UTC).
        #[arg(long)]
        today: Option<NaiveDate>,
    },
}

#[derive(Debug, Subcommand)]
enum ReportCommand {
    /// Cash session figures, stored against re-derived.
    Session { session_id: String },
    /// Per-channel totals and payments.
    Channels {
        #[command(flatten)]
        period: Period,
    },
    /// Income statement.
    Dre {
        #[command(flatten)]
        period: Period,
    },
    /// Best sellers by revenue.
    TopProducts {
        #[command(flatten)]
        period: Period,
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
}

#[derive(Debug, Subcommand)]
enum AuditCommand {
    /// Customer reward balances against their ledgers.
    Rewards,
    /// Recompute a session's totals from its settled payments.
    Session { session_id: String },
}

// =============================================================================
// Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = BackofficeConfig::load(cli.config.clone()).context("loading configuration")?;
    if let Some(db) = &cli.db {
        config.database.path = db.clone();
    }
    init_tracing(&config.logging.filter);

    if let Command::InitConfig = cli.command {
        let path = config.save(cli.config.clone())?;
        println!("{}", path.display());
        return Ok(());
    }

    let db = Database::new(config.db_config())
        .await
        .with_context(|| format!("opening {}", config.database.path.display()))?;

    let result = run(&cli, &config, &db).await;
    db.close().await;
    result
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: &Cli, config: &BackofficeConfig, db: &Database) -> anyhow::Result<()> {
    match &cli.command {
        Command::Migrate => {
            db.run_migrations().await?;
            info!(path = %config.database.path.display(), "Store is up to date");
            Ok(())
        }
        Command::InitConfig => Ok(()),
        Command::Jobs(job) => run_job(cli, config, db, job).await,
        Command::Report(report) => run_report(cli, db, report).await,
        Command::Audit(audit) => run_audit(cli, db, audit).await,
    }
}

async fn run_job(cli: &Cli, config: &BackofficeConfig, db: &Database, job: &JobCommand) -> anyhow::Result<()> {
    match job {
        JobCommand::CardFees { period, mode } => {
            let (from, to) = period.range()?;
            let report = CardFeeJob::new(db.clone())
                .run_between(from, to, mode.dry_run(config))
                .await?;
            print_job(cli, &report)
        }
        JobCommand::BackfillSessions { mode } => {
            let report = SessionBackfill::new(db.clone()).run(mode.dry_run(config)).await?;
            print_job(cli, &report)
        }
        JobCommand::SyncStatus {
            mode,
            cancel_duplicates,
        } => {
            let report = StatusSyncJob::new(db.clone())
                .cancel_duplicates(*cancel_duplicates || config.jobs.cancel_duplicates)
                .run(mode.dry_run(config))
                .await?;
            print_job(cli, &report)
        }
        JobCommand::MarkOverdue { today } => {
            let today = today.unwrap_or_else(|| Utc::now().date_naive());
            let report = AccountsService::new(db.clone()).mark_overdue(today).await?;
            if cli.json {
                print_json(&report)
            } else {
                println!("payables overdue:    {}", report.payables.len());
                println!("receivables overdue: {}", report.receivables.len());
                Ok(())
            }
        }
    }
}

async fn run_report(cli: &Cli, db: &Database, report: &ReportCommand) -> anyhow::Result<()> {
    let reports = ReportService::new(db.clone());
    match report {
        ReportCommand::Session { session_id } => {
            let report = reports.session_report(session_id).await?;
            if cli.json {
                return print_json(&report);
            }
            let session = &report.session;
            println!("session {} ({}) {}", session.id, session.terminal_id, session.status);
            println!("orders:     {}", report.orders);
            println!("sales:      {}", report.stored.sales);
            println!("cash:       {}", report.stored.cash);
            println!("debit:      {}", report.stored.debit);
            println!("credit:     {}", report.stored.credit);
            println!("pix:        {}", report.stored.pix);
            println!("other:      {}", report.stored.other);
            if report.drift {
                println!("WARNING: stored totals differ from payments ({})", report.from_payments.sales);
            }
            Ok(())
        }
        ReportCommand::Channels { period } => {
            let (from, to) = period.range()?;
            let summary = reports.channel_summary(from, to).await?;
            if cli.json {
                return print_json(&summary);
            }
            for (channel, figures) in &summary.channels {
                println!(
                    "{:<9} orders {:>5}  gross {:>12}  discounts {:>10}  total {:>12}",
                    channel.to_string(),
                    figures.orders,
                    figures.gross.to_string(),
                    figures.discounts.to_string(),
                    figures.total.to_string()
                );
            }
            println!(
                "{:<9} orders {:>5}  gross {:>12}  discounts {:>10}  total {:>12}",
                "all",
                summary.combined.orders,
                summary.combined.gross.to_string(),
                summary.combined.discounts.to_string(),
                summary.combined.total.to_string()
            );
            for (method, amount) in &summary.combined.payments {
                println!("  {:<7} {}", method.to_string(), amount);
            }
            Ok(())
        }
        ReportCommand::Dre { period } => {
            let (from, to) = period.range()?;
            let dre = reports.dre(from, to).await?;
            if cli.json {
                return print_json(&dre);
            }
            println!("gross revenue    {}", dre.gross_revenue);
            println!("(-) discounts    {}", dre.discounts);
            println!("net revenue      {}", dre.net_revenue);
            println!("(-) cost         {}", dre.cost_of_goods);
            println!("gross profit     {}", dre.gross_profit);
            println!("(-) card fees    {}", dre.card_fees);
            for line in &dre.other_revenues {
                println!("(+) {:<12} {}", line.category, line.amount);
            }
            for line in &dre.other_expenses {
                println!("(-) {:<12} {}", line.category, line.amount);
            }
            println!("net result       {}", dre.net_result);
            Ok(())
        }
        ReportCommand::TopProducts { period, limit } => {
            let (from, to) = period.range()?;
            let top = reports.top_products(from, to, *limit).await?;
            if cli.json {
                return print_json(&top);
            }
            for (rank, product) in top.iter().enumerate() {
                println!(
                    "{:>3}. {:<30} qty {:>5}  revenue {}",
                    rank + 1,
                    product.product_name,
                    product.quantity,
                    sorveteria_core::Money::from_cents(product.revenue_cents)
                );
            }
            Ok(())
        }
    }
}

async fn run_audit(cli: &Cli, db: &Database, audit: &AuditCommand) -> anyhow::Result<()> {
    match audit {
        AuditCommand::Rewards => {
            let drifted = RewardService::new(db.clone()).audit_all().await?;
            if cli.json {
                return print_json(&drifted);
            }
            if drifted.is_empty() {
                println!("every reward balance matches its ledger");
            }
            for audit in &drifted {
                println!(
                    "{}: points {} vs ledger {}, cashback {} vs ledger {}",
                    audit.customer_id,
                    audit.stored_points,
                    audit.ledger_points,
                    audit.stored_cashback_cents,
                    audit.ledger_cashback_cents
                );
                if audit.broken_snapshots > 0 {
                    println!("  {} ledger rows with a wrong balance_after", audit.broken_snapshots);
                }
            }
            Ok(())
        }
        AuditCommand::Session { session_id } => {
            let recalculation = CashSessionManager::new(db.clone())
                .recalculate_totals(session_id)
                .await?;
            if cli.json {
                return print_json(&recalculation);
            }
            if recalculation.drifted() {
                println!("sales {} -> {}", recalculation.before.sales, recalculation.after.sales);
            } else {
                println!("session {} is consistent", session_id);
            }
            Ok(())
        }
    }
}

fn print_job(cli: &Cli, report: &JobReport) -> anyhow::Result<()> {
    if cli.json {
        return print_json(report);
    }
    let c = &report.counters;
    println!("{}{}", report.job, if report.dry_run { " (dry run)" } else { "" });
    println!("  created            {}", c.created + c.would_create);
    println!("  updated            {}", c.updated + c.would_update);
    println!("  duplicates         {}", c.cancelled_duplicates);
    println!("  already booked     {}", c.skipped_existing);
    println!("  zero               {}", c.skipped_zero);
    println!("  ambiguous          {}", c.skipped_ambiguous);
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
