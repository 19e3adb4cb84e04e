//! Connection pool and scoped transaction sessions.

use std::time::Duration;

use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, Postgres};
use sqlx::Transaction;

use mb_domain::config::DatabaseConfig;
use mb_domain::{Error, Result};

/// One scoped transactional session.
///
/// Owns a pooled connection for the duration of the transaction.
/// Dropping the session without [`Session::commit`] rolls back.
pub struct Session {
    tx: Transaction<'static, Postgres>,
}

impl Session {
    /// Borrow the underlying connection for repository calls.
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await.map_err(Error::store)
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.map_err(Error::store)
    }
}

/// Shared gateway to the relational store: pool, sessions, health.
#[derive(Clone)]
pub struct StoreGateway {
    pool: PgPool,
}

impl StoreGateway {
    /// Connect a pool using the configured URL and sizing.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(Error::store)?;
        tracing::info!(pool_size = config.pool_size, "store pool connected");
        Ok(Self { pool })
    }

    /// Apply pending migrations (ordered; each file header names its
    /// parent revision).
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(Error::store)?;
        tracing::info!("store migrations applied");
        Ok(())
    }

    /// Open a scoped transaction session.
    pub async fn begin(&self) -> Result<Session> {
        let tx = self.pool.begin().await.map_err(Error::store)?;
        Ok(Session { tx })
    }

    /// Cheap health probe.
    pub async fn health_check(&self) -> bool {
        match sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
        {
            Ok(1) => true,
            Ok(_) => false,
            Err(e) => {
                tracing::warn!(error = %e, "store health check failed");
                false
            }
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn pool_size(&self) -> u32 {
        self.pool.size()
    }

    pub fn pool_idle(&self) -> usize {
        self.pool.num_idle()
    }

    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("store pool closed");
    }
}
