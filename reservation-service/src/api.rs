use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use shared::{ErrorResponse, ProductFilter, ProductSummary, ProductsResponse, ReservationError, ReserveResponse};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

use crate::auth::{AuthError, Authenticator};
use crate::reservation::{validate_quantity, ReservationEngine};
use crate::store::InventoryStore;

type ApiError = (StatusCode, Json<ErrorResponse>);

pub struct AppState<S> {
    pub engine: ReservationEngine<S>,
    pub auth: Arc<Authenticator>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            auth: Arc::clone(&self.auth),
        }
    }
}

pub fn create_router<S: InventoryStore>(state: AppState<S>) -> Router {
    let api = Router::new()
        .route("/products", get(list_products::<S>))
        .route("/products/", get(list_products::<S>))
        .route("/reserve", post(reserve::<S>))
        .route("/reserve/", post(reserve::<S>));

    Router::new()
        .nest("/api", api)
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

fn reject(status: StatusCode, message: &str) -> ApiError {
    (status, Json(ErrorResponse::new(message)))
}

fn auth_rejection(err: AuthError) -> ApiError {
    let status = match err {
        AuthError::InternalTokenMismatch => StatusCode::FORBIDDEN,
        _ => StatusCode::UNAUTHORIZED,
    };
    warn!(error = %err, "Rejected caller");
    reject(status, &err.to_string())
}

fn reservation_rejection(err: ReservationError) -> ApiError {
    match err {
        ReservationError::Validation(_) => reject(StatusCode::BAD_REQUEST, "Invalid quantity"),
        ReservationError::NotFound(_) => reject(StatusCode::NOT_FOUND, "Product not found"),
        ReservationError::InsufficientInventory { .. } => reject(StatusCode::BAD_REQUEST, "Not enough inventory"),
        ReservationError::StorageFailure(_) => reject(StatusCode::INTERNAL_SERVER_ERROR, "Server error"),
    }
}

#[derive(Debug, Deserialize)]
pub struct ReserveRequest {
    pub product_id: Option<serde_json::Value>,
    pub quantity: Option<serde_json::Value>,
}

/// Coerces a loosely typed quantity: absent means 1, numbers are truncated
/// toward zero, strings must hold an integer.
pub fn coerce_quantity(raw: Option<&serde_json::Value>) -> Option<i32> {
    use serde_json::Value;

    match raw {
        None | Some(Value::Null) => Some(1),
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                i32::try_from(i).ok()
            } else {
                let f = n.as_f64()?.trunc();
                if f >= i32::MIN as f64 && f <= i32::MAX as f64 {
                    Some(f as i32)
                } else {
                    None
                }
            }
        }
        Some(Value::String(s)) => s.trim().parse::<i32>().ok(),
        Some(_) => None,
    }
}

fn parse_product_id(raw: Option<&serde_json::Value>) -> Option<Uuid> {
    match raw? {
        serde_json::Value::String(s) => Uuid::parse_str(s.trim()).ok(),
        _ => None,
    }
}

pub async fn reserve<S: InventoryStore>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ReserveResponse>, ApiError> {
    let user_id = state.auth.authenticate(&headers).map_err(auth_rejection)?;
    state.auth.verify_internal_token(&headers).map_err(auth_rejection)?;

    let request: ReserveRequest = serde_json::from_slice(&body)
        .map_err(|_| reject(StatusCode::BAD_REQUEST, "Invalid request body"))?;
    let quantity = coerce_quantity(request.quantity.as_ref())
        .ok_or_else(|| reject(StatusCode::BAD_REQUEST, "Invalid quantity"))?;

    validate_quantity(quantity).map_err(reservation_rejection)?;
    let product_id = parse_product_id(request.product_id.as_ref())
        .ok_or_else(|| reject(StatusCode::NOT_FOUND, "Product not found"))?;

    let booking = state
        .engine
        .reserve(product_id, user_id, quantity)
        .await
        .map_err(reservation_rejection)?;

    Ok(Json(ReserveResponse {
        success: true,
        booking_id: booking.id,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductQuery {
    pub category: Option<String>,
    pub min_price: Option<String>,
    pub max_price: Option<String>,
    pub q: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl TryFrom<ProductQuery> for ProductFilter {
    type Error = ApiError;

    fn try_from(query: ProductQuery) -> Result<Self, Self::Error> {
        let price = |raw: Option<String>| -> Result<Option<BigDecimal>, ApiError> {
            non_empty(raw)
                .map(|v| BigDecimal::from_str(v.trim()))
                .transpose()
                .map_err(|_| reject(StatusCode::BAD_REQUEST, "Invalid price filter"))
        };

        Ok(ProductFilter {
            category: non_empty(query.category),
            min_price: price(query.min_price)?,
            max_price: price(query.max_price)?,
            q: non_empty(query.q),
            page: query.page.unwrap_or(1),
            limit: query.limit.unwrap_or(shared::DEFAULT_PAGE_LIMIT),
        })
    }
}

pub async fn list_products<S: InventoryStore>(
    State(state): State<AppState<S>>,
    Query(query): Query<ProductQuery>,
) -> Result<Json<ProductsResponse>, ApiError> {
    let filter = ProductFilter::try_from(query)?;

    let products = state.engine.store().list_products(&filter).await.map_err(|e| {
        error!("Failed to list products: {}", e);
        reject(StatusCode::INTERNAL_SERVER_ERROR, "DB error")
    })?;

    Ok(Json(ProductsResponse {
        success: true,
        products: products.into_iter().map(ProductSummary::from).collect(),
    }))
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}
