use axum::{response::Json, routing::get, Router};
use utoipa::OpenApi;

use crate::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Asset Tracker API",
        version = "0.1.0",
        description = r#"
# Asset Tracker Procurement API

Purchase requests raised by supervisors, quoted by vendors, approved by admins
and supplied as serialized assets.

## Identity

Every endpoint under `/api/v1` expects the caller's identity in headers:

```
X-Actor-Id: <uuid>
X-Actor-Role: supervisor | vendor | admin
X-Org-Id: <integer>
```

## Error Handling

Errors share one body shape:

```json
{
  "error": "Conflict",
  "code": "invalid_transition",
  "message": "purchase order is Delivered",
  "request_id": "2c1f...",
  "timestamp": "2026-01-01T00:00:00Z"
}
```

## Pagination

List endpoints accept `page` (default 1) and `per_page` (default 20, capped by configuration).
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "purchase-orders", description = "Procurement workflow endpoints")
    ),
    paths(
        crate::handlers::purchase_orders::create_purchase_order,
        crate::handlers::purchase_orders::list_purchase_orders,
        crate::handlers::purchase_orders::get_purchase_order,
        crate::handlers::purchase_orders::submit_quote,
        crate::handlers::purchase_orders::approve_purchase_order,
        crate::handlers::purchase_orders::reject_purchase_order,
        crate::handlers::purchase_orders::supply_assets,
        crate::handlers::purchase_orders::list_quotes,
        crate::handlers::purchase_orders::list_order_assets,
    ),
    components(
        schemas(
            crate::PaginatedResponse<crate::handlers::purchase_orders::PurchaseOrderResponse>,
            crate::handlers::purchase_orders::CreatePurchaseOrderRequest,
            crate::handlers::purchase_orders::SubmitQuoteRequest,
            crate::handlers::purchase_orders::SupplyAssetsRequest,
            crate::handlers::purchase_orders::PurchaseOrderResponse,
            crate::handlers::purchase_orders::AssetResponse,
            crate::handlers::purchase_orders::SupplyResponse,
            crate::models::purchase_order::PurchaseOrderStatus,
            crate::models::asset::AssetType,
            crate::models::asset::AssetStatus,
            crate::auth::Role,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

/// Serves the generated document at `/api-docs/openapi.json`.
pub fn openapi_routes() -> Router<AppState> {
    Router::new().route(
        "/api-docs/openapi.json",
        get(|| async { Json(ApiDocV1::openapi()) }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_procurement_paths() {
        let json = serde_json::to_string(&ApiDocV1::openapi()).unwrap();
        assert!(json.contains("Asset Tracker API"));
        assert!(json.contains("/api/v1/purchase-orders/{id}/supply"));
        assert!(json.contains("ErrorResponse"));
    }
}
