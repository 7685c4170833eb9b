use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::{BookingStatus, ProductSummary};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::products)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub category: String,
    pub price: BigDecimal,
    pub total_quantity: i32,
    pub available_quantity: i32,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Product {
    /// `0 <= available_quantity <= total_quantity`
    pub fn is_within_bounds(&self) -> bool {
        self.available_quantity >= 0 && self.available_quantity <= self.total_quantity
    }

    pub fn reserved_quantity(&self) -> i32 {
        self.total_quantity - self.available_quantity
    }
}

impl From<Product> for ProductSummary {
    fn from(product: Product) -> Self {
        Self {
            id: product.id,
            name: product.name,
            category: product.category,
            price: product.price,
            available_quantity: product.available_quantity,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::products)]
pub struct NewProduct {
    pub id: Uuid,
    pub name: String,
    pub category: String,
    pub price: BigDecimal,
    pub total_quantity: i32,
    pub available_quantity: i32,
}

impl NewProduct {
    /// A product starts with its whole stock available.
    pub fn new(name: &str, category: &str, price: BigDecimal, total_quantity: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            category: category.to_string(),
            price,
            total_quantity,
            available_quantity: total_quantity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::bookings)]
pub struct Booking {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::bookings)]
pub struct NewBooking {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl NewBooking {
    pub fn confirmed(user_id: Uuid, product_id: Uuid, quantity: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            product_id,
            quantity,
            status: BookingStatus::Confirmed.as_str().to_string(),
            created_at: Utc::now(),
        }
    }
}

impl From<NewBooking> for Booking {
    fn from(new: NewBooking) -> Self {
        Self {
            id: new.id,
            user_id: new.user_id,
            product_id: new.product_id,
            quantity: new.quantity,
            status: new.status,
            created_at: new.created_at,
        }
    }
}
