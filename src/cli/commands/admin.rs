//! Cross-tenant administration commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::adapters::postgres::{create_pool, PgAdminRepository, PoolConfig, PrivilegedExecutor};
use crate::cli::output::{output, table, truncate, CommandOutput};
use crate::domain::models::{Config, PurgeReport, SessionPage, SystemStats, TenantSessionCount};
use crate::domain::ports::AdminRepository;
use crate::infrastructure::logging::AuditLogger;

#[derive(Args, Debug)]
pub struct AdminArgs {
    #[command(subcommand)]
    pub command: AdminCommands,
}

#[derive(Subcommand, Debug)]
pub enum AdminCommands {
    /// System-wide totals across every tenant
    Stats,
    /// List sessions of every tenant
    Sessions {
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// Live session counts per tenant
    Tenants,
    /// Hard-delete rows soft-deleted longer ago than the grace period
    Purge {
        /// Grace period in days (defaults to retention.soft_delete_grace_days)
        #[arg(long)]
        grace_days: Option<u32>,
    },
}

impl CommandOutput for SystemStats {
    fn to_human(&self) -> String {
        let mut t = table(&["Metric", "Value"]);
        t.add_row(vec!["Tenants".to_string(), self.total_tenants.to_string()]);
        t.add_row(vec!["Sessions".to_string(), self.total_sessions.to_string()]);
        t.add_row(vec!["Messages".to_string(), self.total_messages.to_string()]);
        t.add_row(vec!["Tool executions".to_string(), self.total_tool_executions.to_string()]);
        t.add_row(vec!["Tokens".to_string(), self.total_tokens.to_string()]);
        t.add_row(vec!["Cost (USD)".to_string(), format!("{:.4}", self.total_cost_usd)]);
        t.to_string()
    }
}

impl CommandOutput for SessionPage {
    fn to_human(&self) -> String {
        if self.sessions.is_empty() {
            return "No sessions found.".to_string();
        }
        let mut t = table(&["Session", "Tenant", "Agent", "Updated", "Tokens", "Deleted"]);
        for s in &self.sessions {
            t.add_row(vec![
                truncate(&s.id, 36),
                truncate(&s.user_id, 24),
                truncate(&s.agent_id, 24),
                s.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                s.total_tokens.to_string(),
                if s.deleted_at.is_some() { "yes" } else { "" }.to_string(),
            ]);
        }
        let shown_to = self.offset + i64::try_from(self.sessions.len()).unwrap_or(i64::MAX);
        format!("{t}\nShowing {}-{} of {}", self.offset + 1, shown_to, self.total)
    }
}

#[derive(Debug, Serialize)]
pub struct TenantsOutput {
    pub tenants: Vec<TenantSessionCount>,
}

impl CommandOutput for TenantsOutput {
    fn to_human(&self) -> String {
        if self.tenants.is_empty() {
            return "No tenants have live sessions.".to_string();
        }
        let mut t = table(&["Tenant", "Sessions"]);
        for tenant in &self.tenants {
            t.add_row(vec![tenant.user_id.clone(), tenant.session_count.to_string()]);
        }
        t.to_string()
    }
}

impl CommandOutput for PurgeReport {
    fn to_human(&self) -> String {
        format!(
            "Purged {} session(s), {} message(s), {} artifact(s).",
            self.sessions, self.messages, self.artifacts
        )
    }
}

pub async fn execute(args: AdminArgs, config: &Config, json_mode: bool) -> Result<()> {
    let admin_url = config
        .database
        .admin_url
        .as_deref()
        .context("database.admin_url is not configured")?;

    let pool = create_pool(admin_url, Some(PoolConfig::from(&config.database)))
        .await
        .context("Failed to connect with the admin role")?;
    let executor = PrivilegedExecutor::connect(pool.clone()).await?;

    let audit = match &config.logging.audit_log_path {
        Some(path) => Some(AuditLogger::new(path).await?),
        None => None,
    };
    let repo = PgAdminRepository::new(executor).with_audit(audit);

    let result = run(&repo, args.command, config, json_mode).await;
    pool.close().await;
    result
}

async fn run(repo: &dyn AdminRepository, command: AdminCommands, config: &Config, json_mode: bool) -> Result<()> {
    match command {
        AdminCommands::Stats => output(&repo.system_stats().await?, json_mode),
        AdminCommands::Sessions { limit, offset } => output(&repo.list_all_sessions(limit, offset).await?, json_mode),
        AdminCommands::Tenants => output(
            &TenantsOutput {
                tenants: repo.count_sessions_by_tenant().await?,
            },
            json_mode,
        ),
        AdminCommands::Purge { grace_days } => {
            let days = grace_days.unwrap_or(config.retention.soft_delete_grace_days);
            let report = repo
                .purge_soft_deleted(chrono::Duration::days(i64::from(days)))
                .await
                .context("Purge failed")?;
            output(&report, json_mode);
        }
    }
    Ok(())
}
