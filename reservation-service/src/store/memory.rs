//! In-memory store with per-product async row locks.
//!
//! Writes made inside a transaction are staged and applied in one step on
//! commit. Row locks are owned mutex guards kept by the transaction, so they
//! are released when it commits, fails, or is dropped mid-flight.

use async_trait::async_trait;
use chrono::Utc;
use shared::{ProductFilter, ReservationError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use uuid::Uuid;

use super::{InventoryStore, InventoryTx, TxFuture};
use crate::models::{Booking, NewBooking, NewProduct, Product};

#[derive(Default)]
struct Inner {
    products: Mutex<HashMap<Uuid, Product>>,
    bookings: Mutex<Vec<Booking>>,
    row_locks: Mutex<HashMap<Uuid, Arc<RowLock<()>>>>,
    failing_booking_inserts: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
    lock_timeout: Option<Duration>,
}

fn poisoned() -> ReservationError {
    ReservationError::storage("in-memory store mutex poisoned")
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    pub fn insert_product(&self, new: NewProduct) -> Result<Product, ReservationError> {
        let now = Utc::now();
        let product = Product {
            id: new.id,
            name: new.name,
            category: new.category,
            price: new.price,
            total_quantity: new.total_quantity,
            available_quantity: new.available_quantity,
            created_at: Some(now),
            updated_at: Some(now),
        };
        if !product.is_within_bounds() {
            return Err(ReservationError::storage(format!(
                "product {} violates quantity bounds",
                product.id
            )));
        }

        self.inner
            .row_locks
            .lock()
            .map_err(|_| poisoned())?
            .entry(product.id)
            .or_default();
        self.inner
            .products
            .lock()
            .map_err(|_| poisoned())?
            .insert(product.id, product.clone());
        Ok(product)
    }

    /// Committed ledger entries, in commit order.
    pub fn bookings(&self) -> Result<Vec<Booking>, ReservationError> {
        Ok(self.inner.bookings.lock().map_err(|_| poisoned())?.clone())
    }

    /// Makes the next `count` booking inserts fail with a storage error.
    pub fn fail_next_booking_inserts(&self, count: usize) {
        self.inner.failing_booking_inserts.store(count, Ordering::SeqCst);
    }

    /// Row locks exist only for inserted products.
    fn row_lock(&self, id: Uuid) -> Result<Option<Arc<RowLock<()>>>, ReservationError> {
        let locks = self.inner.row_locks.lock().map_err(|_| poisoned())?;
        Ok(locks.get(&id).map(Arc::clone))
    }

    fn committed_product(&self, id: Uuid) -> Result<Option<Product>, ReservationError> {
        Ok(self.inner.products.lock().map_err(|_| poisoned())?.get(&id).cloned())
    }
}

struct MemoryTx {
    store: MemoryStore,
    held: HashMap<Uuid, OwnedMutexGuard<()>>,
    staged_products: HashMap<Uuid, Product>,
    staged_bookings: Vec<Booking>,
}

impl MemoryTx {
    fn new(store: MemoryStore) -> Self {
        Self {
            store,
            held: HashMap::new(),
            staged_products: HashMap::new(),
            staged_bookings: Vec::new(),
        }
    }

    /// Applies staged writes, then releases the row locks on drop.
    fn commit(self) -> Result<(), ReservationError> {
        let inner = &self.store.inner;
        let mut products = inner.products.lock().map_err(|_| poisoned())?;
        let mut bookings = inner.bookings.lock().map_err(|_| poisoned())?;

        for (id, product) in self.staged_products {
            products.insert(id, product);
        }
        bookings.extend(self.staged_bookings);
        Ok(())
    }
}

#[async_trait]
impl InventoryTx for MemoryTx {
    async fn get_product_for_update(&mut self, id: Uuid) -> Result<Option<Product>, ReservationError> {
        if !self.held.contains_key(&id) {
            let Some(lock) = self.store.row_lock(id)? else {
                return Ok(None);
            };
            let guard = match self.store.lock_timeout {
                Some(timeout) => tokio::time::timeout(timeout, lock.lock_owned())
                    .await
                    .map_err(|_| ReservationError::storage(format!("timed out waiting for lock on product {}", id)))?,
                None => lock.lock_owned().await,
            };
            self.held.insert(id, guard);
        }

        if let Some(staged) = self.staged_products.get(&id) {
            return Ok(Some(staged.clone()));
        }
        self.store.committed_product(id)
    }

    async fn save_product(&mut self, product: &Product) -> Result<(), ReservationError> {
        if !self.held.contains_key(&product.id) {
            return Err(ReservationError::storage(format!(
                "product {} saved without holding its row lock",
                product.id
            )));
        }
        if !product.is_within_bounds() {
            return Err(ReservationError::storage(format!(
                "product {} violates quantity bounds",
                product.id
            )));
        }

        let mut updated = product.clone();
        updated.updated_at = Some(Utc::now());
        self.staged_products.insert(updated.id, updated);
        Ok(())
    }

    async fn create_booking(&mut self, booking: NewBooking) -> Result<Booking, ReservationError> {
        let injected = self
            .store
            .inner
            .failing_booking_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(ReservationError::storage("injected booking insert failure"));
        }
        if booking.quantity < 1 {
            return Err(ReservationError::storage("booking quantity must be positive"));
        }

        let booking = Booking::from(booking);
        self.staged_bookings.push(booking.clone());
        Ok(booking)
    }
}

#[async_trait]
impl InventoryStore for MemoryStore {
    async fn transaction<R, F>(&self, work: F) -> Result<R, ReservationError>
    where
        R: Send,
        F: for<'t> FnOnce(&'t mut (dyn InventoryTx + 't)) -> TxFuture<'t, R> + Send,
    {
        let mut tx = MemoryTx::new(self.clone());
        let value = work(&mut tx).await?;
        tx.commit()?;
        Ok(value)
    }

    async fn get_product(&self, id: Uuid) -> Result<Option<Product>, ReservationError> {
        self.committed_product(id)
    }

    async fn list_products(&self, filter: &ProductFilter) -> Result<Vec<Product>, ReservationError> {
        let mut matching: Vec<Product> = self
            .inner
            .products
            .lock()
            .map_err(|_| poisoned())?
            .values()
            .filter(|p| filter.matches(&p.name, &p.category, &p.price))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.price.cmp(&b.price).then(a.id.cmp(&b.id)));

        let offset = usize::try_from(filter.offset()).unwrap_or(usize::MAX);
        let limit = usize::try_from(filter.effective_limit()).unwrap_or(usize::MAX);
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }
}
