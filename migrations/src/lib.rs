pub use sea_orm_migration::prelude::*;

mod m20261019_000001_create_reference_tables;
mod m20261019_000002_create_purchase_orders_table;
mod m20261019_000003_create_assets_table;
mod m20261019_000004_create_serial_sequences_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261019_000001_create_reference_tables::Migration),
            Box::new(m20261019_000002_create_purchase_orders_table::Migration),
            Box::new(m20261019_000003_create_assets_table::Migration),
            Box::new(m20261019_000004_create_serial_sequences_table::Migration),
        ]
    }
}
