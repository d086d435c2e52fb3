use crate::config::AppConfig;
use crate::errors::ServiceError;
use metrics::{counter, gauge, histogram};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for database connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections
    pub max_connections: u32,
    /// Minimum number of connections
    pub min_connections: u32,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// Idle timeout duration
    pub idle_timeout: Duration,
    /// Acquire connection timeout
    pub acquire_timeout: Duration,
    /// Log every statement through sqlx
    pub sqlx_logging: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
            sqlx_logging: true,
        }
    }
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            idle_timeout: Duration::from_secs(cfg.db_idle_timeout_secs),
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
            sqlx_logging: !cfg.is_production(),
        }
    }
}

impl DbConfig {
    pub fn is_sqlite(&self) -> bool {
        self.url.starts_with("sqlite:")
    }

    /// `(min, max)` connections the pool is actually opened with.
    ///
    /// SQLite allows one writer per file and fails a second writer with
    /// `database is locked` instead of queueing it, so SQLite pools hold a single
    /// connection and concurrent transactions wait for it at acquire.
    pub fn pool_bounds(&self) -> (u32, u32) {
        if self.is_sqlite() {
            (1, 1)
        } else {
            let max = self.max_connections.max(1);
            (self.min_connections.min(max), max)
        }
    }
}

/// Establishes a connection pool to the database with custom configuration
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    let (min_connections, max_connections) = config.pool_bounds();
    if max_connections != config.max_connections {
        info!(
            configured = config.max_connections,
            "SQLite pool limited to a single connection"
        );
    }
    debug!(max_connections, min_connections, "Configuring database connection");

    let mut opt = ConnectOptions::new(config.url.clone());

    opt.max_connections(max_connections)
        .min_connections(min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(config.sqlx_logging);

    gauge!("asset_tracker_db.max_connections", max_connections as f64);

    let db_pool = Database::connect(opt).await.map_err(|e| {
        error!(error = %e, "Database connection establishment failed");
        ServiceError::DatabaseError(e)
    })?;

    info!("Database connection pool established successfully");

    Ok(db_pool)
}

/// Establish DB pool using AppConfig tuning
pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    let db_cfg: DbConfig = cfg.into();
    establish_connection_with_config(&db_cfg).await
}

/// Runs the embedded schema migrations
pub async fn run_migrations(pool: &DbPool) -> Result<(), ServiceError> {
    info!("Running database migrations");
    let start = Instant::now();

    let result = crate::migrator::Migrator::up(pool, None)
        .await
        .map_err(ServiceError::DatabaseError);

    let elapsed = start.elapsed();
    match &result {
        Ok(_) => info!(
            "Database migrations completed successfully in {:?}",
            elapsed
        ),
        Err(e) => error!("Database migrations failed after {:?}: {}", elapsed, e),
    }

    result
}

/// Checks if the database connection is active
pub async fn check_connection(pool: &DbPool) -> Result<(), ServiceError> {
    debug!("Checking database connection");
    let start = Instant::now();

    let result = pool.ping().await.map_err(ServiceError::DatabaseError);

    let elapsed = start.elapsed();
    match &result {
        Ok(_) => {
            histogram!("asset_tracker_db.ping_ms", elapsed.as_millis() as f64);
        }
        Err(e) => {
            error!(
                "Database connection check failed after {:?}: {}",
                elapsed, e
            );
            counter!("asset_tracker_db.connection_failures", 1);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_memory() -> DbConfig {
        DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            sqlx_logging: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn connects_and_migrates_an_empty_database() {
        let pool = establish_connection_with_config(&sqlite_memory())
            .await
            .unwrap();
        assert!(check_connection(&pool).await.is_ok());
        assert!(run_migrations(&pool).await.is_ok());
        // Migrations are idempotent.
        assert!(run_migrations(&pool).await.is_ok());
    }

    #[test]
    fn app_config_tuning_flows_into_db_config() {
        let mut app = AppConfig::new(
            "postgres://localhost/assets".into(),
            "127.0.0.1".into(),
            8080,
            "production".into(),
        );
        app.db_max_connections = 7;
        let db: DbConfig = (&app).into();
        assert_eq!(db.max_connections, 7);
        assert!(!db.sqlx_logging);
        assert_eq!(db.pool_bounds(), (app.db_min_connections.min(7), 7));
    }

    #[test]
    fn sqlite_pools_hold_one_connection_whatever_is_configured() {
        let config = DbConfig {
            url: "sqlite://assets.db?mode=rwc".to_string(),
            max_connections: 20,
            min_connections: 5,
            ..Default::default()
        };
        assert!(config.is_sqlite());
        assert_eq!(config.pool_bounds(), (1, 1));

        let postgres = DbConfig {
            url: "postgres://localhost/assets".to_string(),
            max_connections: 20,
            min_connections: 50,
            ..Default::default()
        };
        assert_eq!(postgres.pool_bounds(), (20, 20));
    }
}
