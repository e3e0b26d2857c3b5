use std::ffi::OsString;
use std::fmt;

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::{debug, info};

/// goose subcommands the services use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GooseCommand {
    Up,
    Down,
    Status,
}

impl GooseCommand {
    fn as_str(&self) -> &'static str {
        match self {
            GooseCommand::Up => "up",
            GooseCommand::Down => "down",
            GooseCommand::Status => "status",
        }
    }
}

impl fmt::Display for GooseCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Applies the SQL migrations in a directory by shelling out to the goose
/// binary.
pub struct MigrationRunner {
    goose_binary_path: String,
    migrations_dir: String,
    driver: String,
    dsn: String,
}

impl MigrationRunner {
    pub fn new(
        goose_binary_path: impl Into<String>,
        migrations_dir: impl Into<String>,
        driver: impl Into<String>,
        dsn: impl Into<String>,
    ) -> Self {
        Self {
            goose_binary_path: goose_binary_path.into(),
            migrations_dir: migrations_dir.into(),
            driver: driver.into(),
            dsn: dsn.into(),
        }
    }

    pub fn postgres(
        goose_binary_path: impl Into<String>,
        migrations_dir: impl Into<String>,
        dsn: impl Into<String>,
    ) -> Self {
        Self::new(goose_binary_path, migrations_dir, "postgres", dsn)
    }

    /// Applies every pending migration.
    pub async fn run_migrations(&self) -> Result<()> {
        let stdout = self.exec(GooseCommand::Up).await?;
        info!(migrations_dir = %self.migrations_dir, "migrations applied");
        debug!("goose output:\n{}", stdout);
        Ok(())
    }

    /// Rolls back the most recent migration.
    pub async fn rollback_migration(&self) -> Result<()> {
        let stdout = self.exec(GooseCommand::Down).await?;
        info!(migrations_dir = %self.migrations_dir, "migration rolled back");
        debug!("goose output:\n{}", stdout);
        Ok(())
    }

    pub async fn migration_status(&self) -> Result<String> {
        self.exec(GooseCommand::Status).await
    }

    fn args(&self, command: GooseCommand) -> Vec<OsString> {
        vec![
            "-dir".into(),
            self.migrations_dir.as_str().into(),
            self.driver.as_str().into(),
            self.dsn.as_str().into(),
            command.as_str().into(),
        ]
    }

    async fn exec(&self, command: GooseCommand) -> Result<String> {
        debug!(%command, migrations_dir = %self.migrations_dir, "running goose");

        let output = Command::new(&self.goose_binary_path)
            .args(self.args(command))
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to spawn goose at {}", self.goose_binary_path))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "goose {} failed ({}).\nstdout: {}\nstderr: {}",
                command,
                output.status,
                stdout,
                stderr
            );
        }

        Ok(stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_args() {
        let runner = MigrationRunner::postgres(
            "goose",
            "migrations/postgres",
            "postgres://localhost/lpwan",
        );

        let args = runner.args(GooseCommand::Up);
        assert_eq!(
            args,
            vec![
                OsString::from("-dir"),
                OsString::from("migrations/postgres"),
                OsString::from("postgres"),
                OsString::from("postgres://localhost/lpwan"),
                OsString::from("up"),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let runner = MigrationRunner::postgres(
            "/nonexistent/goose",
            "migrations/postgres",
            "postgres://localhost/lpwan",
        );

        let err = runner.run_migrations().await.unwrap_err();
        assert!(err.to_string().contains("failed to spawn goose"));
    }
}
