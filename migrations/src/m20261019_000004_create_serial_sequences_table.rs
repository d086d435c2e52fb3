use sea_orm_migration::prelude::*;

/// Per-prefix counter row. Allocation locks the row for the lifetime of the
/// supplying transaction.
#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SerialSequences::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SerialSequences::Prefix)
                            .string()
                            .primary_key()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SerialSequences::LastSequence)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SerialSequences::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SerialSequences::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SerialSequences {
    Table,
    Prefix,
    LastSequence,
    UpdatedAt,
}
