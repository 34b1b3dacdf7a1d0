use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::database::sqlite::models::{ActivityAction, Document, NewUserActivity};
use crate::database::sqlite::queries::{ActivityQueries, DocumentQueries};


pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    #[inline]
    pub async fn initialize_from_config_dir(config_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        Self::new(config_dir.join("metadata.db")).await
    }

    #[inline]
    pub async fn get_owned_document(&self, id: i64, owner_id: i64) -> Result<Option<Document>> {
        DocumentQueries::get_owned(&self.pool, id, owner_id).await
    }

    /// Append to the activity log. Failures are logged, never returned.
    #[inline]
    pub async fn record_activity(
        &self,
        owner_id: i64,
        action: ActivityAction,
        resource_id: Option<String>,
        details: Value,
    ) {
        let activity = NewUserActivity {
            owner_id,
            action,
            resource_id,
            details: Some(details.to_string()),
        };
        if let Err(e) = ActivityQueries::record(&self.pool, activity).await {
            warn!("Failed to record {} activity: {:#}", action, e);
        }
    }

    /// Reclaim space and refresh planner statistics
    #[inline]
    pub async fn optimize(&self) -> Result<()> {
        info!("Optimizing database");

        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .context("Failed to vacuum database")?;

        sqlx::query("ANALYZE")
            .execute(&self.pool)
            .await
            .context("Failed to analyze database")?;

        debug!("Database optimization completed");
        Ok(())
    }
}
