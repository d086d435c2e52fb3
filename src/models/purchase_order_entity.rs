use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
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
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum PurchaseOrderStatus {
    #[sea_orm(string_value = "Requested")]
    Requested,
    #[sea_orm(string_value = "Quoted")]
    Quoted,
    #[sea_orm(string_value = "Approved")]
    Approved,
    #[sea_orm(string_value = "Rejected")]
    Rejected,
    #[sea_orm(string_value = "Delivered")]
    Delivered,
}

impl PurchaseOrderStatus {
    /// A row in one of these states has won its requirement.
    pub fn is_won(self) -> bool {
        matches!(self, Self::Approved | Self::Delivered)
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "purchase_orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Shared by the broadcast row and every vendor quote row of one requirement.
    pub correlation_id: Uuid,
    pub org_id: i32,
    pub supervisor_id: Uuid,
    /// `None` marks an open broadcast request.
    pub vendor_id: Option<Uuid>,
    pub asset_name: String,
    pub quantity: i32,
    pub quote: Option<Decimal>,
    pub status: PurchaseOrderStatus,
    pub admin_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::asset::Entity")]
    Assets,
}

impl Related<super::asset::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Assets.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_broadcast(&self) -> bool {
        self.vendor_id.is_none()
    }

    pub fn is_bound_to(&self, vendor_id: Uuid) -> bool {
        self.vendor_id == Some(vendor_id)
    }
}
