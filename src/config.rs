use std::time::Duration;

use anyhow::Context;
use clap::Args;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Settings shared by every subcommand, read from flags or the environment.
#[derive(Debug, Args)]
pub struct Settings {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: String,

    #[arg(long, env = "SEMINAR_GRADING_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,

    /// Abort a grade run after this many seconds; tiers written before the
    /// deadline are kept
    #[arg(long, env = "SEMINAR_GRADING_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Explicit log filter, e.g. `warn` or `seminar_grading=trace`
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

impl Settings {
    pub async fn connect(&self) -> anyhow::Result<PgPool> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.database_url)
            .await
            .context("failed to connect to Postgres")
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}
