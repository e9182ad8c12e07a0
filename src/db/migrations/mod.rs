use anyhow::{Context, Result};
use sqlx::{Executor, PgPool};
use tracing::info;

/// Embedded migrations, applied in order of their numeric prefix
const MIGRATIONS: &[(&str, &str)] = &[
    ("001_streams.sql", include_str!("sql/001_streams.sql")),
    ("002_recordings.sql", include_str!("sql/002_recordings.sql")),
    ("003_clips.sql", include_str!("sql/003_clips.sql")),
    ("004_audit_logs.sql", include_str!("sql/004_audit_logs.sql")),
];

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    pool.execute(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            name TEXT PRIMARY KEY,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .await
    .context("Failed to create schema_migrations table")?;

    let mut ordered: Vec<&(&str, &str)> = MIGRATIONS.iter().collect();
    ordered.sort_by_key(|(name, _)| order_value(name));

    for (name, sql) in ordered {
        let applied: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM schema_migrations WHERE name = $1)")
                .bind(name)
                .fetch_one(pool)
                .await
                .with_context(|| format!("Failed to check migration {}", name))?;
        if applied {
            continue;
        }

        let mut tx = pool.begin().await?;
        tx.execute(*sql)
            .await
            .with_context(|| format!("Failed to apply migration {}", name))?;
        sqlx::query("INSERT INTO schema_migrations (name) VALUES ($1)")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!("Applied migration: {}", name);
    }

    Ok(())
}

fn order_value(name: &str) -> usize {
    name.split('_')
        .next()
        .and_then(|prefix| prefix.parse::<usize>().ok())
        .unwrap_or(usize::MAX)
}
