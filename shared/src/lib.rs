use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_PAGE_LIMIT: i64 = 50;
pub const MAX_PAGE_LIMIT: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Confirmed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "CONFIRMED",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure outcomes of a reservation attempt.
///
/// Every variant leaves inventory and bookings exactly as they were before the
/// attempt started.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReservationError {
    #[error("invalid quantity: {0}")]
    Validation(String),

    #[error("product {0} not found")]
    NotFound(Uuid),

    #[error("insufficient inventory: requested {requested}, available {available}")]
    InsufficientInventory { requested: i32, available: i32 },

    #[error("storage failure: {0}")]
    StorageFailure(String),
}

impl ReservationError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::StorageFailure(msg.into())
    }

    /// Stable reason code, safe to hand to callers and to log.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::InsufficientInventory { .. } => "insufficient_inventory",
            Self::StorageFailure(_) => "storage_failure",
        }
    }
}

impl From<diesel::result::Error> for ReservationError {
    fn from(err: diesel::result::Error) -> Self {
        Self::StorageFailure(err.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductFilter {
    pub category: Option<String>,
    pub min_price: Option<BigDecimal>,
    pub max_price: Option<BigDecimal>,
    pub q: Option<String>,
    pub page: i64,
    pub limit: i64,
}

impl ProductFilter {
    /// Page size clamped to `1..=MAX_PAGE_LIMIT`; zero or negative falls back
    /// to the default.
    pub fn effective_limit(&self) -> i64 {
        if self.limit < 1 {
            DEFAULT_PAGE_LIMIT
        } else {
            self.limit.min(MAX_PAGE_LIMIT)
        }
    }

    /// Saturates instead of overflowing, so an absurd page is simply empty.
    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1).saturating_mul(self.effective_limit())
    }

    pub fn matches(&self, name: &str, category: &str, price: &BigDecimal) -> bool {
        if let Some(expected) = &self.category {
            if expected != category {
                return false;
            }
        }
        if let Some(min) = &self.min_price {
            if price < min {
                return false;
            }
        }
        if let Some(max) = &self.max_price {
            if price > max {
                return false;
            }
        }
        if let Some(q) = &self.q {
            if !name.to_lowercase().contains(&q.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductSummary {
    pub id: Uuid,
    pub name: String,
    pub category: String,
    pub price: BigDecimal,
    pub available_quantity: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProductsResponse {
    pub success: bool,
    pub products: Vec<ProductSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReserveResponse {
    pub success: bool,
    pub booking_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}
