use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PurchaseOrders::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PurchaseOrders::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PurchaseOrders::CorrelationId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PurchaseOrders::OrgId).integer().not_null())
                    .col(
                        ColumnDef::new(PurchaseOrders::SupervisorId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PurchaseOrders::VendorId).uuid().null())
                    .col(ColumnDef::new(PurchaseOrders::AssetName).string().not_null())
                    .col(ColumnDef::new(PurchaseOrders::Quantity).integer().not_null())
                    .col(
                        ColumnDef::new(PurchaseOrders::Quote)
                            .decimal_len(14, 2)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PurchaseOrders::Status)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(PurchaseOrders::AdminId).uuid().null())
                    .col(
                        ColumnDef::new(PurchaseOrders::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PurchaseOrders::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // One quote row per vendor and requirement. Broadcast rows carry a NULL
        // vendor and never collide.
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .unique()
                    .name("uq_purchase_orders_correlation_vendor")
                    .table(PurchaseOrders::Table)
                    .col(PurchaseOrders::CorrelationId)
                    .col(PurchaseOrders::VendorId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_purchase_orders_supervisor_id")
                    .table(PurchaseOrders::Table)
                    .col(PurchaseOrders::SupervisorId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_purchase_orders_org_status")
                    .table(PurchaseOrders::Table)
                    .col(PurchaseOrders::OrgId)
                    .col(PurchaseOrders::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PurchaseOrders::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PurchaseOrders {
    Table,
    Id,
    CorrelationId,
    OrgId,
    SupervisorId,
    VendorId,
    AssetName,
    Quantity,
    Quote,
    Status,
    AdminId,
    CreatedAt,
    UpdatedAt,
}
