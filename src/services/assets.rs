use crate::{
    errors::ServiceError,
    models::asset::{self, AssetStatus, AssetType},
    services::serials::{self, SerialBlock},
};
use chrono::{NaiveDate, Utc};
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, QueryFilter, QueryOrder,
};
use tracing::{info, instrument};
use uuid::Uuid;

/// Rows per INSERT statement. Sixteen columns each keeps a batch far below the
/// bind-parameter limits of SQLite (32766) and Postgres (65535).
pub const INSERT_BATCH_SIZE: usize = 500;

/// Fields shared by every unit produced from one supply.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetTemplate {
    pub name: String,
    pub org_id: i32,
    pub asset_type: AssetType,
    pub category_id: Option<i32>,
    pub location_id: Option<i32>,
    pub room_id: Option<i32>,
    pub purchase_date: NaiveDate,
    pub warranty_expiry: Option<NaiveDate>,
}

impl AssetTemplate {
    pub fn prefix(&self) -> String {
        serials::derive_prefix(
            &self.name,
            self.asset_type,
            self.category_id,
            self.location_id,
        )
    }
}

/// Values the supplier provided explicitly. Anything left `None` falls back to the
/// most recent asset of the same name in the organization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateOverrides {
    pub asset_type: Option<AssetType>,
    pub category_id: Option<i32>,
    pub location_id: Option<i32>,
    pub room_id: Option<i32>,
    pub purchase_date: Option<NaiveDate>,
    pub warranty_expiry: Option<NaiveDate>,
}

/// Most recently created asset sharing `(org_id, name)`.
pub async fn latest_asset_named<C>(
    conn: &C,
    org_id: i32,
    name: &str,
) -> Result<Option<asset::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    Ok(asset::Entity::find()
        .filter(asset::Column::OrgId.eq(org_id))
        .filter(asset::Column::Name.eq(name))
        .order_by_desc(asset::Column::CreatedAt)
        .one(conn)
        .await?)
}

/// Merges explicit overrides with the placement and type of the last asset of
/// this name.
pub fn resolve_template(
    org_id: i32,
    name: &str,
    overrides: TemplateOverrides,
    previous: Option<&asset::Model>,
    today: NaiveDate,
) -> Result<AssetTemplate, ServiceError> {
    let asset_type = overrides
        .asset_type
        .or_else(|| previous.map(|prior| prior.asset_type))
        .ok_or_else(|| {
            ServiceError::InvalidAssetType(format!(
                "no asset type supplied and no prior '{}' asset to inherit it from",
                name
            ))
        })?;

    Ok(AssetTemplate {
        name: name.to_string(),
        org_id,
        asset_type,
        category_id: overrides
            .category_id
            .or_else(|| previous.and_then(|prior| prior.category_id)),
        location_id: overrides
            .location_id
            .or_else(|| previous.and_then(|prior| prior.location_id)),
        room_id: overrides
            .room_id
            .or_else(|| previous.and_then(|prior| prior.room_id)),
        purchase_date: overrides.purchase_date.unwrap_or(today),
        warranty_expiry: overrides.warranty_expiry,
    })
}

/// Builds the rows for a reserved serial block without touching the database.
pub fn assets_for_block(
    template: &AssetTemplate,
    block: &SerialBlock,
    supplier_id: Uuid,
    order_id: Uuid,
) -> Vec<asset::Model> {
    let created_at = Utc::now();
    block
        .serials()
        .map(|serial_number| asset::Model {
            id: Uuid::new_v4(),
            name: template.name.clone(),
            org_id: template.org_id,
            serial_number,
            category_id: template.category_id,
            location_id: template.location_id,
            room_id: template.room_id,
            status: AssetStatus::Available,
            asset_type: template.asset_type,
            purchase_date: Some(template.purchase_date),
            warranty_expiry: template.warranty_expiry,
            created_by: supplier_id,
            assigned_to: None,
            purchase_order_id: Some(order_id),
            created_at,
        })
        .collect()
}

/// Allocates serials and inserts `count` assets. Runs on the caller's transaction.
#[instrument(skip(conn, template), fields(name = %template.name, org_id = template.org_id))]
pub async fn materialize<C>(
    conn: &C,
    template: &AssetTemplate,
    count: u32,
    supplier_id: Uuid,
    order_id: Uuid,
) -> Result<Vec<asset::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    let prefix = template.prefix();
    let block = serials::allocate(conn, &prefix, count).await?;
    let assets = assets_for_block(template, &block, supplier_id, order_id);

    for batch in assets.chunks(INSERT_BATCH_SIZE) {
        asset::Entity::insert_many(batch.iter().cloned().map(IntoActiveModel::into_active_model))
            .exec_without_returning(conn)
            .await?;
    }

    info!(
        prefix = %prefix,
        first = block.start,
        last = ?block.end(),
        "Materialized assets"
    );

    Ok(assets)
}
