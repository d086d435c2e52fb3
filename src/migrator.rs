//! Schema migrations, embedded so the server can apply them at startup.

pub use migrations::Migrator;

use crate::{config::AppConfig, db, errors::ServiceError};
use sea_orm_migration::MigratorTrait;
use tracing::{error, info};

/// Direction requested from the migration runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationCommand {
    Up,
    /// Roll back the most recent migration
    Down,
    Status,
}

impl std::str::FromStr for MigrationCommand {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            "status" => Ok(Self::Status),
            other => Err(format!("unknown migration command '{}'", other)),
        }
    }
}

// Database migration CLI runner
pub async fn run_migration(cfg: &AppConfig, command: MigrationCommand) -> Result<(), ServiceError> {
    info!("Setting up database connection for migrations");
    let db = db::establish_connection_from_app_config(cfg).await?;

    let result = match command {
        MigrationCommand::Up => Migrator::up(&db, None).await,
        MigrationCommand::Down => Migrator::down(&db, Some(1)).await,
        MigrationCommand::Status => Migrator::status(&db).await,
    };

    match result {
        Ok(_) => {
            info!(?command, "Migration command completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Migration failed: {}", e);
            Err(ServiceError::DatabaseError(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_case_insensitively() {
        assert_eq!("UP".parse::<MigrationCommand>(), Ok(MigrationCommand::Up));
        assert_eq!("down".parse::<MigrationCommand>(), Ok(MigrationCommand::Down));
        assert!("sideways".parse::<MigrationCommand>().is_err());
    }

    #[test]
    fn every_schema_migration_is_registered() {
        assert_eq!(Migrator::migrations().len(), 4);
    }
}
