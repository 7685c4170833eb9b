//! Inventory storage behind the reservation engine.
//!
//! A store hands out transactions. Inside a transaction a product row can be
//! read under an exclusive lock, written back, and a booking appended to the
//! ledger. Nothing becomes visible to other transactions until the closure
//! passed to [`InventoryStore::transaction`] returns `Ok`; an `Err` (or
//! dropping the returned future) discards every write and releases the locks.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use futures::future::BoxFuture;
use shared::{ProductFilter, ReservationError};
use uuid::Uuid;

use crate::models::{Booking, NewBooking, Product};

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type TxFuture<'t, R> = BoxFuture<'t, Result<R, ReservationError>>;

#[async_trait]
pub trait InventoryTx: Send {
    /// Reads a product and holds an exclusive lock on its row until the
    /// transaction ends. Blocks while another transaction holds the lock.
    async fn get_product_for_update(&mut self, id: Uuid) -> Result<Option<Product>, ReservationError>;

    /// Writes back a product previously locked in this transaction.
    async fn save_product(&mut self, product: &Product) -> Result<(), ReservationError>;

    async fn create_booking(&mut self, booking: NewBooking) -> Result<Booking, ReservationError>;
}

#[async_trait]
pub trait InventoryStore: Send + Sync + 'static {
    async fn transaction<R, F>(&self, work: F) -> Result<R, ReservationError>
    where
        R: Send,
        F: for<'t> FnOnce(&'t mut (dyn InventoryTx + 't)) -> TxFuture<'t, R> + Send;

    /// Committed state, no locking.
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>, ReservationError>;

    async fn list_products(&self, filter: &ProductFilter) -> Result<Vec<Product>, ReservationError>;
}
