use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::{Pool, PooledConnection}, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::{ProductFilter, ReservationError};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::{InventoryStore, InventoryTx, TxFuture};
use crate::models::{Booking, NewBooking, Product};
use crate::schema::{bookings, products};

pub type DbPool = Pool<AsyncPgConnection>;

/// PostgreSQL-backed store. Row locks are `SELECT ... FOR UPDATE` inside a
/// diesel-async transaction.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
    lock_timeout: Option<Duration>,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool, lock_timeout: None }
    }

    /// Bounds the wait for a row lock; an expired wait fails the transaction.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    async fn checkout(&self) -> Result<PooledConnection<'_, AsyncPgConnection>, ReservationError> {
        self.pool
            .get()
            .await
            .map_err(|e| ReservationError::storage(format!("failed to check out connection: {}", e)))
    }
}

struct PgInventoryTx<'c> {
    conn: &'c mut AsyncPgConnection,
}

#[async_trait]
impl InventoryTx for PgInventoryTx<'_> {
    async fn get_product_for_update(&mut self, id: Uuid) -> Result<Option<Product>, ReservationError> {
        let product = products::table
            .find(id)
            .for_update()
            .first::<Product>(self.conn)
            .await
            .optional()?;
        Ok(product)
    }

    async fn save_product(&mut self, product: &Product) -> Result<(), ReservationError> {
        let updated = diesel::update(products::table.find(product.id))
            .set((
                products::available_quantity.eq(product.available_quantity),
                products::updated_at.eq(Some(Utc::now())),
            ))
            .execute(self.conn)
            .await?;

        if updated != 1 {
            return Err(ReservationError::storage(format!(
                "expected to update one product row for {}, updated {}",
                product.id, updated
            )));
        }
        Ok(())
    }

    async fn create_booking(&mut self, booking: NewBooking) -> Result<Booking, ReservationError> {
        let booking = diesel::insert_into(bookings::table)
            .values(&booking)
            .get_result::<Booking>(self.conn)
            .await?;
        Ok(booking)
    }
}

#[async_trait]
impl InventoryStore for PgStore {
    async fn transaction<R, F>(&self, work: F) -> Result<R, ReservationError>
    where
        R: Send,
        F: for<'t> FnOnce(&'t mut (dyn InventoryTx + 't)) -> TxFuture<'t, R> + Send,
    {
        let mut pooled = self.checkout().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        let lock_timeout = self.lock_timeout;

        conn.transaction::<R, ReservationError, _>(|conn| {
            Box::pin(async move {
                if let Some(timeout) = lock_timeout {
                    // SET LOCAL does not accept bind parameters.
                    diesel::sql_query(format!("SET LOCAL lock_timeout = '{}ms'", timeout.as_millis()))
                        .execute(conn)
                        .await?;
                }
                let mut tx = PgInventoryTx { conn };
                work(&mut tx).await
            })
        })
        .await
    }

    async fn get_product(&self, id: Uuid) -> Result<Option<Product>, ReservationError> {
        let mut conn = self.checkout().await?;

        let product = products::table
            .find(id)
            .first::<Product>(&mut conn)
            .await
            .optional()?;
        Ok(product)
    }

    async fn list_products(&self, filter: &ProductFilter) -> Result<Vec<Product>, ReservationError> {
        let mut conn = self.checkout().await?;

        let mut query = products::table.into_boxed();
        if let Some(category) = &filter.category {
            query = query.filter(products::category.eq(category.clone()));
        }
        if let Some(min_price) = &filter.min_price {
            query = query.filter(products::price.ge(min_price.clone()));
        }
        if let Some(max_price) = &filter.max_price {
            query = query.filter(products::price.le(max_price.clone()));
        }
        if let Some(q) = &filter.q {
            query = query.filter(products::name.ilike(format!("%{}%", escape_like(q))));
        }

        let rows = query
            .order((products::price.asc(), products::id.asc()))
            .limit(filter.effective_limit())
            .offset(filter.offset())
            .load::<Product>(&mut conn)
            .await?;

        debug!(count = rows.len(), "Loaded products");
        Ok(rows)
    }
}

/// Escapes LIKE wildcards so user input matches literally.
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
