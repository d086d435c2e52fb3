use super::common::{
    created_response, success_response, success_with_message, validate_input, PaginationParams,
};
use crate::{
    auth::AuthenticatedActor,
    errors::ServiceError,
    handlers::AppState,
    models::{
        asset::{self, AssetStatus, AssetType},
        purchase_order::{self, PurchaseOrderStatus},
    },
    services::procurement::{CreatePurchaseOrder, PurchaseOrderFilter, SupplyAssets},
    PaginatedResponse,
};
use axum::{
    extract::{Json, Path, Query, State},
    response::Response,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::{Validate, ValidationError};

// Request and response DTOs

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreatePurchaseOrderRequest {
    #[validate(length(min = 1, max = 255))]
    pub asset_name: String,
    #[validate(range(min = 1))]
    pub quantity: i32,
    /// Bind the request to one vendor instead of broadcasting it
    pub vendor_id: Option<Uuid>,
}

fn validate_positive_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if amount.is_sign_positive() && !amount.is_zero() {
        Ok(())
    } else {
        let mut err = ValidationError::new("quote");
        err.message = Some("quote must be a positive amount".into());
        Err(err)
    }
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct SubmitQuoteRequest {
    #[schema(value_type = String, example = "1499.00")]
    #[validate(custom = "validate_positive_amount")]
    pub quote: Decimal,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct SupplyAssetsRequest {
    /// Units delivered now; must not exceed the remaining quantity
    pub quantity: i32,
    /// `Hardware` or `Software`; defaults to the type of earlier assets of this name
    pub asset_type: Option<String>,
    pub category_id: Option<i32>,
    pub location_id: Option<i32>,
    pub room_id: Option<i32>,
    pub purchase_date: Option<NaiveDate>,
    pub warranty_expiry: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListPurchaseOrdersQuery {
    pub status: Option<PurchaseOrderStatus>,
    /// 1-based page number
    pub page: Option<u64>,
    /// Page size, clamped to the configured maximum
    pub per_page: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PurchaseOrderResponse {
    pub id: Uuid,
    pub correlation_id: Uuid,
    pub org_id: i32,
    pub supervisor_id: Uuid,
    pub vendor_id: Option<Uuid>,
    pub asset_name: String,
    pub quantity: i32,
    #[schema(value_type = Option<String>)]
    pub quote: Option<Decimal>,
    pub status: PurchaseOrderStatus,
    pub admin_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<purchase_order::Model> for PurchaseOrderResponse {
    fn from(model: purchase_order::Model) -> Self {
        Self {
            id: model.id,
            correlation_id: model.correlation_id,
            org_id: model.org_id,
            supervisor_id: model.supervisor_id,
            vendor_id: model.vendor_id,
            asset_name: model.asset_name,
            quantity: model.quantity,
            quote: model.quote,
            status: model.status,
            admin_id: model.admin_id,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AssetResponse {
    pub id: Uuid,
    pub name: String,
    pub serial_number: String,
    pub asset_type: AssetType,
    pub status: AssetStatus,
    pub category_id: Option<i32>,
    pub location_id: Option<i32>,
    pub room_id: Option<i32>,
    pub purchase_date: Option<NaiveDate>,
    pub warranty_expiry: Option<NaiveDate>,
    pub created_by: Uuid,
    pub purchase_order_id: Option<Uuid>,
}

impl From<asset::Model> for AssetResponse {
    fn from(model: asset::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            serial_number: model.serial_number,
            asset_type: model.asset_type,
            status: model.status,
            category_id: model.category_id,
            location_id: model.location_id,
            room_id: model.room_id,
            purchase_date: model.purchase_date,
            warranty_expiry: model.warranty_expiry,
            created_by: model.created_by,
            purchase_order_id: model.purchase_order_id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SupplyResponse {
    pub order: PurchaseOrderResponse,
    pub asset_ids: Vec<Uuid>,
    pub serial_numbers: Vec<String>,
    pub remaining: i32,
}

// Handler functions

/// Raise a purchase request
#[utoipa::path(
    post,
    path = "/api/v1/purchase-orders",
    request_body = CreatePurchaseOrderRequest,
    responses(
        (status = 201, description = "Purchase order created", body = crate::ApiResponse<PurchaseOrderResponse>),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 403, description = "Caller is not a supervisor", body = crate::errors::ErrorResponse),
        (status = 404, description = "Bound vendor not found", body = crate::errors::ErrorResponse)
    ),
    tag = "purchase-orders"
)]
pub async fn create_purchase_order(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(payload): Json<CreatePurchaseOrderRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;

    let order = state
        .services
        .procurement
        .create_purchase_order(
            &actor,
            CreatePurchaseOrder {
                asset_name: payload.asset_name,
                quantity: payload.quantity,
                vendor_id: payload.vendor_id,
            },
        )
        .await?;

    info!("Purchase order created: {}", order.id);

    Ok(created_response(PurchaseOrderResponse::from(order)))
}

/// List purchase orders visible to the caller
#[utoipa::path(
    get,
    path = "/api/v1/purchase-orders",
    params(ListPurchaseOrdersQuery),
    responses(
        (status = 200, description = "Purchase orders listed", body = crate::ApiResponse<serde_json::Value>)
    ),
    tag = "purchase-orders"
)]
pub async fn list_purchase_orders(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Query(query): Query<ListPurchaseOrdersQuery>,
) -> Result<Response, ServiceError> {
    let pagination = PaginationParams {
        page: query.page,
        per_page: query.per_page,
    };
    let filter = PurchaseOrderFilter {
        status: query.status,
        page: pagination.page(),
        per_page: u64::from(state.config.page_size(pagination.per_page)),
    };

    let page = state
        .services
        .procurement
        .list_purchase_orders(&actor, filter)
        .await?;

    Ok(success_response(PaginatedResponse {
        items: page
            .items
            .into_iter()
            .map(PurchaseOrderResponse::from)
            .collect(),
        total: page.total,
        page: page.page,
        limit: page.limit,
        total_pages: page.total_pages,
    }))
}

/// Get a purchase order by ID
#[utoipa::path(
    get,
    path = "/api/v1/purchase-orders/{id}",
    params(
        ("id" = Uuid, Path, description = "Purchase order ID")
    ),
    responses(
        (status = 200, description = "Purchase order fetched", body = crate::ApiResponse<PurchaseOrderResponse>),
        (status = 404, description = "Purchase order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "purchase-orders"
)]
pub async fn get_purchase_order(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(po_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let order = state
        .services
        .procurement
        .get_purchase_order(&actor, po_id)
        .await?;

    Ok(success_response(PurchaseOrderResponse::from(order)))
}

/// Quote a purchase order
#[utoipa::path(
    post,
    path = "/api/v1/purchase-orders/{id}/quote",
    request_body = SubmitQuoteRequest,
    params(
        ("id" = Uuid, Path, description = "Purchase order ID")
    ),
    responses(
        (status = 200, description = "Quote recorded on the vendor's own row", body = crate::ApiResponse<PurchaseOrderResponse>),
        (status = 403, description = "Order bound to another vendor or vendor not registered", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order no longer accepts quotes", body = crate::errors::ErrorResponse)
    ),
    tag = "purchase-orders"
)]
pub async fn submit_quote(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(po_id): Path<Uuid>,
    Json(payload): Json<SubmitQuoteRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;

    let quoted = state
        .services
        .procurement
        .submit_quote(&actor, po_id, payload.quote)
        .await?;

    info!("Quote submitted for purchase order {}: {}", po_id, quoted.id);

    Ok(success_response(PurchaseOrderResponse::from(quoted)))
}

/// Approve a quoted purchase order
#[utoipa::path(
    post,
    path = "/api/v1/purchase-orders/{id}/approve",
    params(
        ("id" = Uuid, Path, description = "Purchase order ID")
    ),
    responses(
        (status = 200, description = "Purchase order approved", body = crate::ApiResponse<PurchaseOrderResponse>),
        (status = 403, description = "Caller is not an admin of the order's organization", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order is not quoted or the requirement was already awarded", body = crate::errors::ErrorResponse)
    ),
    tag = "purchase-orders"
)]
pub async fn approve_purchase_order(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(po_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let approved = state
        .services
        .procurement
        .approve_purchase_order(&actor, po_id)
        .await?;

    info!("Purchase order approved: {}", po_id);

    Ok(success_response(PurchaseOrderResponse::from(approved)))
}

/// Reject a purchase order
#[utoipa::path(
    post,
    path = "/api/v1/purchase-orders/{id}/reject",
    params(
        ("id" = Uuid, Path, description = "Purchase order ID")
    ),
    responses(
        (status = 200, description = "Purchase order rejected", body = crate::ApiResponse<PurchaseOrderResponse>),
        (status = 403, description = "Caller is not an admin of the order's organization", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order is already terminal", body = crate::errors::ErrorResponse)
    ),
    tag = "purchase-orders"
)]
pub async fn reject_purchase_order(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(po_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let rejected = state
        .services
        .procurement
        .reject_purchase_order(&actor, po_id)
        .await?;

    info!("Purchase order rejected: {}", po_id);

    Ok(success_response(PurchaseOrderResponse::from(rejected)))
}

/// Supply assets against an approved purchase order
#[utoipa::path(
    post,
    path = "/api/v1/purchase-orders/{id}/supply",
    request_body = SupplyAssetsRequest,
    params(
        ("id" = Uuid, Path, description = "Purchase order ID")
    ),
    responses(
        (status = 200, description = "Assets created; message reports any remaining quantity", body = crate::ApiResponse<SupplyResponse>),
        (status = 403, description = "Caller is not the bound vendor", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order is not approved or changed concurrently", body = crate::errors::ErrorResponse),
        (status = 422, description = "Invalid quantity or asset type", body = crate::errors::ErrorResponse)
    ),
    tag = "purchase-orders"
)]
pub async fn supply_assets(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(po_id): Path<Uuid>,
    Json(payload): Json<SupplyAssetsRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;

    let outcome = state
        .services
        .procurement
        .supply_assets(
            &actor,
            po_id,
            SupplyAssets {
                quantity: payload.quantity,
                asset_type: payload.asset_type,
                category_id: payload.category_id,
                location_id: payload.location_id,
                room_id: payload.room_id,
                purchase_date: payload.purchase_date,
                warranty_expiry: payload.warranty_expiry,
            },
        )
        .await?;

    info!(
        "Supplied {} assets for purchase order {}",
        outcome.assets.len(),
        po_id
    );

    let (asset_ids, serial_numbers) = outcome
        .assets
        .into_iter()
        .map(|asset| (asset.id, asset.serial_number))
        .unzip();

    Ok(success_with_message(
        SupplyResponse {
            order: PurchaseOrderResponse::from(outcome.order),
            asset_ids,
            serial_numbers,
            remaining: outcome.remaining,
        },
        outcome.message,
    ))
}

/// List every quote row of the order's requirement
#[utoipa::path(
    get,
    path = "/api/v1/purchase-orders/{id}/quotes",
    params(
        ("id" = Uuid, Path, description = "Purchase order ID")
    ),
    responses(
        (status = 200, description = "Sibling rows of the requirement", body = crate::ApiResponse<Vec<PurchaseOrderResponse>>),
        (status = 404, description = "Purchase order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "purchase-orders"
)]
pub async fn list_quotes(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(po_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let quotes = state
        .services
        .procurement
        .list_quotes(&actor, po_id)
        .await?;

    Ok(success_response(
        quotes
            .into_iter()
            .map(PurchaseOrderResponse::from)
            .collect::<Vec<_>>(),
    ))
}

/// List assets created by supplying this purchase order
#[utoipa::path(
    get,
    path = "/api/v1/purchase-orders/{id}/assets",
    params(
        ("id" = Uuid, Path, description = "Purchase order ID")
    ),
    responses(
        (status = 200, description = "Supplied assets", body = crate::ApiResponse<Vec<AssetResponse>>),
        (status = 404, description = "Purchase order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "purchase-orders"
)]
pub async fn list_order_assets(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(po_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let assets = state
        .services
        .procurement
        .list_order_assets(&actor, po_id)
        .await?;

    Ok(success_response(
        assets
            .into_iter()
            .map(AssetResponse::from)
            .collect::<Vec<_>>(),
    ))
}

pub fn purchase_order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_purchase_order).get(list_purchase_orders))
        .route("/:id", get(get_purchase_order))
        .route("/:id/quote", post(submit_quote))
        .route("/:id/approve", post(approve_purchase_order))
        .route("/:id/reject", post(reject_purchase_order))
        .route("/:id/supply", post(supply_assets))
        .route("/:id/quotes", get(list_quotes))
        .route("/:id/assets", get(list_order_assets))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn quote_must_be_positive() {
        assert!(SubmitQuoteRequest { quote: dec!(100.00) }.validate().is_ok());
        assert!(SubmitQuoteRequest { quote: dec!(0) }.validate().is_err());
        assert!(SubmitQuoteRequest { quote: dec!(-5) }.validate().is_err());
    }

    #[test]
    fn create_request_requires_name_and_quantity() {
        let request = CreatePurchaseOrderRequest {
            asset_name: String::new(),
            quantity: 0,
            vendor_id: None,
        };
        let errors = request.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("asset_name"));
        assert!(errors.field_errors().contains_key("quantity"));
    }
}
