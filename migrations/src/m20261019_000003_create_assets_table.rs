use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Assets::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Assets::Id).uuid().primary_key().not_null())
                    .col(ColumnDef::new(Assets::Name).string().not_null())
                    .col(ColumnDef::new(Assets::OrgId).integer().not_null())
                    .col(
                        ColumnDef::new(Assets::SerialNumber)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Assets::CategoryId).integer().null())
                    .col(ColumnDef::new(Assets::LocationId).integer().null())
                    .col(ColumnDef::new(Assets::RoomId).integer().null())
                    .col(ColumnDef::new(Assets::Status).string_len(32).not_null())
                    .col(ColumnDef::new(Assets::AssetType).string_len(16).not_null())
                    .col(ColumnDef::new(Assets::PurchaseDate).date().null())
                    .col(ColumnDef::new(Assets::WarrantyExpiry).date().null())
                    .col(ColumnDef::new(Assets::CreatedBy).uuid().not_null())
                    .col(ColumnDef::new(Assets::AssignedTo).uuid().null())
                    .col(ColumnDef::new(Assets::PurchaseOrderId).uuid().null())
                    .col(
                        ColumnDef::new(Assets::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Template backfill looks up the most recent asset per (org, name).
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_assets_org_name_created_at")
                    .table(Assets::Table)
                    .col(Assets::OrgId)
                    .col(Assets::Name)
                    .col(Assets::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_assets_purchase_order_id")
                    .table(Assets::Table)
                    .col(Assets::PurchaseOrderId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Assets::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Assets {
    Table,
    Id,
    Name,
    OrgId,
    SerialNumber,
    CategoryId,
    LocationId,
    RoomId,
    Status,
    AssetType,
    PurchaseDate,
    WarrantyExpiry,
    CreatedBy,
    AssignedTo,
    PurchaseOrderId,
    CreatedAt,
}
