//! Operator CLI for paynexus-core.
//! Mission: the handful of actions an operator needs without going through HTTP,
//! provisioning a user, and closing or locking an accounting period.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use paynexus_core::auth::UserStore;
use paynexus_core::config::Config;
use paynexus_core::db;
use paynexus_core::periods::{LockType, PeriodController};
use paynexus_core::principal::Role;

#[derive(Parser, Debug)]
#[command(name = "paynexus-admin")]
#[command(about = "Operator actions for the paynexus-core ledger and period state")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a user in a tenant
    CreateUser {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        /// customer | merchant | ops_admin | platform_admin | finance_admin | compliance_admin
        #[arg(long)]
        role: String,
        #[arg(long)]
        tenant: String,
    },
    /// Soft-close an accounting period
    SoftClosePeriod {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        period_id: String,
    },
    /// Hard-close a previously soft-closed period
    HardClosePeriod {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        period_id: String,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        reconciliation_completed: bool,
    },
    /// Apply an audit or reconciliation lock over a date range
    ApplyLock {
        #[arg(long)]
        tenant: String,
        /// audit | reconciliation
        #[arg(long)]
        lock_type: String,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        actor: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;

    match cli.command {
        Commands::CreateUser { username, password, role, tenant } => {
            let role = Role::from_str(&role).with_context(|| format!("unknown role: {role}"))?;
            let auth_db_path =
                std::env::var("AUTH_DB_PATH").unwrap_or_else(|_| "./paynexus_auth.db".to_string());
            let store = UserStore::new(&auth_db_path)?;
            let user = store.create_user(&username, &password, role, &tenant)?;
            println!("created user {} ({}) in tenant {}", user.username, user.role.as_str(), user.tenant);
        }
        Commands::SoftClosePeriod { tenant, period_id } => {
            let conn = db::open(&config.database_path)?;
            let periods = PeriodController::new(conn);
            periods.soft_close(&tenant, &period_id, Role::FinanceAdmin)?;
            println!("period {period_id} soft-closed");
        }
        Commands::HardClosePeriod { tenant, period_id, actor, reconciliation_completed } => {
            let conn = db::open(&config.database_path)?;
            let periods = PeriodController::new(conn);
            periods.hard_close(&tenant, &period_id, &actor, Role::FinanceAdmin, reconciliation_completed)?;
            println!("period {period_id} hard-closed by {actor}");
        }
        Commands::ApplyLock { tenant, lock_type, start, end, reason, actor } => {
            let lock_type = match lock_type.to_lowercase().as_str() {
                "audit" => LockType::Audit,
                "reconciliation" => LockType::Reconciliation,
                other => bail!("unknown lock type: {other} (expected audit | reconciliation)"),
            };
            let conn = db::open(&config.database_path)?;
            let periods = PeriodController::new(conn);
            let lock_id = periods.apply_lock(&tenant, lock_type, start, end, &reason, None, &actor)?;
            println!("lock {lock_id} applied");
        }
    }

    Ok(())
}
