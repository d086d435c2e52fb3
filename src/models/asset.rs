use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum AssetType {
    #[sea_orm(string_value = "Hardware")]
    Hardware,
    #[sea_orm(string_value = "Software")]
    Software,
}

impl AssetType {
    /// Short code embedded in serial prefixes.
    pub fn code(self) -> &'static str {
        match self {
            Self::Hardware => "HW",
            Self::Software => "SW",
        }
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum AssetStatus {
    #[sea_orm(string_value = "Available")]
    Available,
    #[sea_orm(string_value = "Assigned")]
    Assigned,
    #[sea_orm(string_value = "UnderMaintenance")]
    UnderMaintenance,
    #[sea_orm(string_value = "Retired")]
    Retired,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "assets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub org_id: i32,
    #[sea_orm(unique)]
    pub serial_number: String,
    pub category_id: Option<i32>,
    pub location_id: Option<i32>,
    pub room_id: Option<i32>,
    pub status: AssetStatus,
    pub asset_type: AssetType,
    pub purchase_date: Option<NaiveDate>,
    pub warranty_expiry: Option<NaiveDate>,
    pub created_by: Uuid,
    pub assigned_to: Option<Uuid>,
    pub purchase_order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::purchase_order_entity::Entity",
        from = "Column::PurchaseOrderId",
        to = "super::purchase_order_entity::Column::Id"
    )]
    PurchaseOrder,
}

impl Related<super::purchase_order_entity::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PurchaseOrder.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
