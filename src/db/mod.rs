use crate::config::DatabaseConfig;
use crate::error::Error;
use anyhow::Result;
use repositories::{
    AuditLogRepository, AuditRepository, ClipRepository, ClipsRepository, RecordingRepository,
    RecordingsRepository, StreamRepository, StreamsRepository,
};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub mod migrations;
pub mod models;
pub mod repositories;

/// Database service for handling connections and migrations
pub struct DatabaseService {
    pub pool: Arc<PgPool>,
}

impl DatabaseService {
    /// Create a new database service
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Initializing Database service");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.url)
            .await
            .map_err(|e| Error::Database(format!("Failed to connect to database: {}", e)))?;

        info!("Connected to PostgreSQL database");

        let service = Self {
            pool: Arc::new(pool),
        };

        if config.auto_migrate {
            service.run_migrations().await?;
        }

        Ok(service)
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        migrations::run_migrations(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to run migrations: {}", e)))?;

        info!("Database migrations completed successfully");

        Ok(())
    }

    /// Health check for database
    pub async fn health_check(&self) -> Result<bool> {
        match sqlx::query("SELECT 1").execute(&*self.pool).await {
            Ok(_) => Ok(true),
            Err(e) => {
                error!("Database health check failed: {}", e);
                Ok(false)
            }
        }
    }

    pub fn repositories(&self) -> Repositories {
        Repositories {
            streams: Arc::new(StreamsRepository::new(self.pool.clone())),
            recordings: Arc::new(RecordingsRepository::new(self.pool.clone())),
            clips: Arc::new(ClipsRepository::new(self.pool.clone())),
            audit: Arc::new(AuditLogRepository::new(self.pool.clone())),
        }
    }
}

/// One handle per table, shared by services and workers
#[derive(Clone)]
pub struct Repositories {
    pub streams: Arc<dyn StreamRepository>,
    pub recordings: Arc<dyn RecordingRepository>,
    pub clips: Arc<dyn ClipRepository>,
    pub audit: Arc<dyn AuditRepository>,
}

impl Repositories {
    /// Process-local tables for development and tests
    pub fn in_memory() -> Self {
        Self {
            streams: Arc::new(repositories::InMemoryStreamRepository::new()),
            recordings: Arc::new(repositories::InMemoryRecordingRepository::new()),
            clips: Arc::new(repositories::InMemoryClipRepository::new()),
            audit: Arc::new(repositories::InMemoryAuditRepository::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Recording, RetentionPolicy, Stream};
    use chrono::Utc;
    use uuid::Uuid;

    async fn connect() -> Option<DatabaseService> {
        let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
            println!("Skipping database test. Set TEST_DATABASE_URL to run.");
            return None;
        };
        let config = DatabaseConfig {
            url,
            ..DatabaseConfig::default()
        };
        Some(DatabaseService::new(&config).await.unwrap())
    }

    #[tokio::test]
    async fn unique_index_rejects_a_second_active_recording() {
        let Some(db) = connect().await else { return };
        assert!(db.health_check().await.unwrap());
        let repos = db.repositories();

        let mut stream = Stream::new("it-tenant", Uuid::new_v4(), "rtsp://camera/main").unwrap();
        stream.start(Utc::now()).unwrap();
        repos.streams.insert(&stream.snapshot()).await.unwrap();

        let policy = RetentionPolicy::new(7).unwrap();
        let first = Recording::start(stream.id(), "it-tenant", policy, Utc::now());
        repos.recordings.insert(&first.snapshot()).await.unwrap();

        let second = Recording::start(stream.id(), "it-tenant", policy, Utc::now());
        let err = repos.recordings.insert(&second.snapshot()).await.unwrap_err();
        assert!(matches!(err, crate::error::Error::Conflict(_)), "{err:?}");

        let active = repos.recordings.find_active_by_stream(stream.id()).await.unwrap();
        assert_eq!(active.map(|r| r.id), Some(first.id()));
    }
}
