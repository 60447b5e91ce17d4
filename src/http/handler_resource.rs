//! Handles the protected demo API served by the resource server
//! GET /api/whoami and GET /api/stock/{product_id}

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

use crate::oauth::AuthenticatedPrincipal;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockLevel {
    pub product_id: String,
    pub quantity: u32,
    pub status: String,
}

/// Read-only stock levels keyed by product id.
#[derive(Debug, Default)]
pub struct Inventory {
    items: HashMap<String, StockLevel>,
}

impl Inventory {
    pub fn new(items: impl IntoIterator<Item = (&'static str, u32)>) -> Self {
        let items = items
            .into_iter()
            .map(|(product_id, quantity)| {
                let status = if quantity > 0 { "In Stock" } else { "Out of Stock" };
                (
                    product_id.to_string(),
                    StockLevel {
                        product_id: product_id.to_string(),
                        quantity,
                        status: status.to_string(),
                    },
                )
            })
            .collect();
        Self { items }
    }

    pub fn sample() -> Self {
        Self::new([("laptop-001", 50), ("phone-002", 100), ("tablet-003", 0)])
    }

    pub fn get(&self, product_id: &str) -> Option<&StockLevel> {
        self.items.get(product_id)
    }
}

/// GET /api/whoami - Echoes the authenticated principal
pub async fn handle_whoami(Extension(principal): Extension<AuthenticatedPrincipal>) -> Json<Value> {
    Json(json!({
        "sub": principal.subject,
        "scopes": principal.scopes,
    }))
}

/// GET /api/stock/{product_id} - Stock level for one product, requires `read:inventory`
pub async fn handle_stock(
    State(inventory): State<Arc<Inventory>>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Path(product_id): Path<String>,
) -> Result<Json<StockLevel>, (StatusCode, Json<Value>)> {
    tracing::debug!(sub = %principal.subject, product_id = %product_id, "stock lookup");
    match inventory.get(&product_id) {
        Some(level) => Ok(Json(level.clone())),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "not_found", "product_id": product_id })),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal() -> AuthenticatedPrincipal {
        AuthenticatedPrincipal {
            subject: "order-service".to_string(),
            scopes: vec!["read:inventory".to_string()],
        }
    }

    #[test]
    fn test_sample_inventory() {
        let inventory = Inventory::sample();
        assert_eq!(inventory.get("laptop-001").unwrap().status, "In Stock");
        assert_eq!(inventory.get("tablet-003").unwrap().status, "Out of Stock");
        assert!(inventory.get("watch-004").is_none());
    }

    #[tokio::test]
    async fn test_handle_stock() {
        let inventory = Arc::new(Inventory::sample());
        let Json(level) = handle_stock(
            State(inventory.clone()),
            Extension(principal()),
            Path("phone-002".to_string()),
        )
        .await
        .unwrap();
        assert_eq!(level.quantity, 100);

        let (status, _) = handle_stock(
            State(inventory),
            Extension(principal()),
            Path("watch-004".to_string()),
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_handle_whoami() {
        let Json(body) = handle_whoami(Extension(principal())).await;
        assert_eq!(body["sub"], "order-service");
        assert_eq!(body["scopes"], json!(["read:inventory"]));
    }
}
