use asset_tracker_api::{
    config,
    migrator::{run_migration, MigrationCommand},
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_config()?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    let command = match std::env::args().nth(1) {
        Some(arg) => arg.parse::<MigrationCommand>().map_err(anyhow::Error::msg)?,
        None => MigrationCommand::Up,
    };

    info!(?command, "Starting database migration");
    run_migration(&cfg, command).await?;

    Ok(())
}
