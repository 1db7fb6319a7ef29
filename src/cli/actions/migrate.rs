use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::store::postgres::MIGRATOR;

#[derive(Debug)]
pub struct Args {
    pub dsn: String,
}

/// Apply pending migrations.
/// # Errors
/// Returns an error if the database is unreachable or a migration fails.
pub async fn execute(args: Args) -> Result<()> {
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&args.dsn)
        .await
        .context("Failed to connect to database")?;

    MIGRATOR
        .run(&pool)
        .await
        .context("Failed to apply migrations")?;

    info!(
        applied = MIGRATOR.iter().count(),
        "database schema is up to date"
    );
    pool.close().await;
    Ok(())
}
