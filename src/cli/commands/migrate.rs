//! Migration CLI commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::adapters::postgres::{create_pool, AppliedMigration, Migrator, PoolConfig};
use crate::cli::output::{output, table, CommandOutput};
use crate::domain::models::Config;
use crate::infrastructure::logging::AuditLogger;

#[derive(Args, Debug)]
pub struct MigrateArgs {
    #[command(subcommand)]
    pub command: MigrateCommands,
}

#[derive(Subcommand, Debug)]
pub enum MigrateCommands {
    /// Apply every pending migration
    Up,
    /// Revert the most recently applied migrations
    Down {
        /// Number of migrations to revert
        #[arg(long, default_value_t = 1)]
        steps: usize,
    },
    /// Show applied and pending migrations
    Status,
}

#[derive(Debug, Serialize)]
pub struct MigrateOutput {
    pub action: &'static str,
    pub count: usize,
    pub current_version: i64,
}

impl CommandOutput for MigrateOutput {
    fn to_human(&self) -> String {
        let verb = if self.action == "up" { "Applied" } else { "Reverted" };
        format!(
            "{verb} {} migration(s). Schema is at version {}.",
            self.count, self.current_version
        )
    }
}

#[derive(Debug, Serialize)]
pub struct PendingMigration {
    pub version: i64,
    pub description: &'static str,
}

#[derive(Debug, Serialize)]
pub struct StatusOutput {
    pub current_version: i64,
    pub applied: Vec<AppliedMigration>,
    pub pending: Vec<PendingMigration>,
}

impl CommandOutput for StatusOutput {
    fn to_human(&self) -> String {
        let mut t = table(&["Version", "Description", "Applied at"]);
        for m in &self.applied {
            t.add_row(vec![
                m.version.to_string(),
                m.description.clone().unwrap_or_default(),
                m.applied_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            ]);
        }
        for m in &self.pending {
            t.add_row(vec![m.version.to_string(), m.description.to_string(), "pending".to_string()]);
        }
        format!(
            "Schema version: {}\n{t}\n{} applied, {} pending",
            self.current_version,
            self.applied.len(),
            self.pending.len()
        )
    }
}

pub async fn execute(args: MigrateArgs, config: &Config, json_mode: bool) -> Result<()> {
    let pool = create_pool(&config.database.url, Some(PoolConfig::from(&config.database)))
        .await
        .context("Failed to connect to database")?;

    let audit = match &config.logging.audit_log_path {
        Some(path) => Some(AuditLogger::new(path).await?),
        None => None,
    };
    let migrator = Migrator::new(pool.clone()).with_audit(audit);

    let result = run(&migrator, args.command, json_mode).await;
    pool.close().await;
    result
}

async fn run(migrator: &Migrator, command: MigrateCommands, json_mode: bool) -> Result<()> {
    match command {
        MigrateCommands::Up => {
            let count = migrator.migrate_up().await.context("Failed to apply migrations")?;
            let current_version = migrator.current_version().await?;
            output(&MigrateOutput { action: "up", count, current_version }, json_mode);
        }
        MigrateCommands::Down { steps } => {
            let count = migrator
                .migrate_down(steps)
                .await
                .context("Failed to revert migrations")?;
            let current_version = migrator.current_version().await?;
            output(&MigrateOutput { action: "down", count, current_version }, json_mode);
        }
        MigrateCommands::Status => {
            let status = StatusOutput {
                current_version: migrator.current_version().await?,
                applied: migrator.applied_migrations().await?,
                pending: migrator
                    .pending_migrations()
                    .await?
                    .into_iter()
                    .map(|m| PendingMigration {
                        version: m.version,
                        description: m.description,
                    })
                    .collect(),
            };
            output(&status, json_mode);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_migrate_output_human() {
        let out = MigrateOutput { action: "up", count: 4, current_version: 4 };
        assert_eq!(out.to_human(), "Applied 4 migration(s). Schema is at version 4.");
        let out = MigrateOutput { action: "down", count: 1, current_version: 3 };
        assert!(out.to_human().starts_with("Reverted 1"));
    }

    #[test]
    fn test_status_output_lists_pending() {
        let status = StatusOutput {
            current_version: 1,
            applied: vec![AppliedMigration {
                version: 1,
                description: Some("core session tables".to_string()),
                applied_at: Utc::now(),
            }],
            pending: vec![PendingMigration { version: 2, description: "artifacts" }],
        };
        let human = status.to_human();
        assert!(human.contains("core session tables"));
        assert!(human.contains("pending"));
        assert!(human.ends_with("1 applied, 1 pending"));

        let json = status.to_json();
        assert_eq!(json["pending"][0]["version"], 2);
    }
}
