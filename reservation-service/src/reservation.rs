//! The reservation transaction.
//!
//! A reservation locks the product row, checks the available quantity,
//! decrements it and appends a confirmed booking, all inside one store
//! transaction. The row lock is held from the read until commit, so two
//! reservations of the same product can never interleave their
//! check-then-decrement.

use shared::ReservationError;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::{Booking, NewBooking};
use crate::store::InventoryStore;

pub fn validate_quantity(quantity: i32) -> Result<(), ReservationError> {
    if quantity < 1 {
        return Err(ReservationError::Validation(format!(
            "quantity must be at least 1, got {}",
            quantity
        )));
    }
    Ok(())
}

pub struct ReservationEngine<S> {
    store: Arc<S>,
}

impl<S> Clone for ReservationEngine<S> {
    fn clone(&self) -> Self {
        Self { store: Arc::clone(&self.store) }
    }
}

impl<S: InventoryStore> ReservationEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Reserves `quantity` units of a product for a user.
    ///
    /// Quantity is validated before storage is touched. Waits for the
    /// product's row lock if another reservation holds it.
    pub async fn reserve(&self, product_id: Uuid, user_id: Uuid, quantity: i32) -> Result<Booking, ReservationError> {
        validate_quantity(quantity)?;

        let result = self
            .store
            .transaction(move |tx| {
                Box::pin(async move {
                    let mut product = tx
                        .get_product_for_update(product_id)
                        .await?
                        .ok_or(ReservationError::NotFound(product_id))?;

                    if product.available_quantity < quantity {
                        return Err(ReservationError::InsufficientInventory {
                            requested: quantity,
                            available: product.available_quantity,
                        });
                    }

                    product.available_quantity -= quantity;
                    tx.save_product(&product).await?;

                    tx.create_booking(NewBooking::confirmed(user_id, product_id, quantity))
                        .await
                })
            })
            .await;

        match &result {
            Ok(booking) => info!(
                booking_id = %booking.id,
                %product_id,
                %user_id,
                quantity,
                "Reservation confirmed"
            ),
            Err(e @ ReservationError::StorageFailure(_)) => error!(
                %product_id,
                %user_id,
                quantity,
                error = %e,
                "Reservation rolled back"
            ),
            Err(e) => warn!(
                %product_id,
                %user_id,
                quantity,
                reason = e.kind(),
                "Reservation rejected"
            ),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewProduct, Product};
    use crate::store::MemoryStore;
    use bigdecimal::BigDecimal;
    use futures::future::join_all;
    use std::time::Duration;

    fn engine_with_product(stock: i32) -> (ReservationEngine<MemoryStore>, Arc<MemoryStore>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let product = store
            .insert_product(NewProduct::new("Flight A1", "flight", BigDecimal::from(100), stock))
            .unwrap();
        (ReservationEngine::new(Arc::clone(&store)), store, product.id)
    }

    async fn product(store: &MemoryStore, id: Uuid) -> Product {
        store.get_product(id).await.unwrap().unwrap()
    }

    fn confirmed_total(store: &MemoryStore, product_id: Uuid) -> i32 {
        store
            .bookings()
            .unwrap()
            .iter()
            .filter(|b| b.product_id == product_id && b.status == "CONFIRMED")
            .map(|b| b.quantity)
            .sum()
    }

    #[tokio::test]
    async fn reserve_decrements_and_records_booking() {
        let (engine, store, product_id) = engine_with_product(10);
        let user_id = Uuid::new_v4();

        let booking = engine.reserve(product_id, user_id, 3).await.unwrap();

        assert_eq!(booking.product_id, product_id);
        assert_eq!(booking.user_id, user_id);
        assert_eq!(booking.quantity, 3);
        assert_eq!(booking.status, "CONFIRMED");
        // Visible immediately after the call returns.
        assert_eq!(product(&store, product_id).await.available_quantity, 7);
        assert_eq!(store.bookings().unwrap(), vec![booking]);
    }

    #[tokio::test]
    async fn quantity_is_validated_before_lookup() {
        let (engine, store, _) = engine_with_product(10);

        let err = engine.reserve(Uuid::new_v4(), Uuid::new_v4(), 0).await.unwrap_err();
        assert!(matches!(err, ReservationError::Validation(_)));

        let err = engine.reserve(Uuid::new_v4(), Uuid::new_v4(), -4).await.unwrap_err();
        assert!(matches!(err, ReservationError::Validation(_)));
        assert!(store.bookings().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_product_is_not_found_and_changes_nothing() {
        let (engine, store, product_id) = engine_with_product(10);
        let before = product(&store, product_id).await;
        let missing = Uuid::new_v4();

        let err = engine.reserve(missing, Uuid::new_v4(), 1).await.unwrap_err();

        assert_eq!(err, ReservationError::NotFound(missing));
        assert_eq!(product(&store, product_id).await, before);
        assert!(store.bookings().unwrap().is_empty());
    }

    #[tokio::test]
    async fn insufficient_inventory_leaves_state_untouched() {
        let (engine, store, product_id) = engine_with_product(2);

        let err = engine.reserve(product_id, Uuid::new_v4(), 3).await.unwrap_err();

        assert_eq!(err, ReservationError::InsufficientInventory { requested: 3, available: 2 });
        assert_eq!(product(&store, product_id).await.available_quantity, 2);
        assert!(store.bookings().unwrap().is_empty());
    }

    #[tokio::test]
    async fn last_units_can_be_reserved_exactly() {
        let (engine, store, product_id) = engine_with_product(4);

        engine.reserve(product_id, Uuid::new_v4(), 4).await.unwrap();
        let err = engine.reserve(product_id, Uuid::new_v4(), 1).await.unwrap_err();

        assert_eq!(err.kind(), "insufficient_inventory");
        assert_eq!(product(&store, product_id).await.available_quantity, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn no_oversell_under_contention() {
        let (engine, store, product_id) = engine_with_product(10);

        let attempts = (0..20).map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.reserve(product_id, Uuid::new_v4(), 1).await })
        });
        let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        let rejected = results
            .iter()
            .filter(|r| matches!(r, Err(ReservationError::InsufficientInventory { .. })))
            .count();
        assert_eq!(succeeded, 10);
        assert_eq!(rejected, 10);
        assert_eq!(product(&store, product_id).await.available_quantity, 0);
        assert_eq!(store.bookings().unwrap().len(), 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn invariant_holds_for_mixed_concurrent_quantities() {
        let (engine, store, product_id) = engine_with_product(37);

        let attempts = (0..40).map(|i| {
            let engine = engine.clone();
            let quantity = (i % 5) as i32 + 1;
            tokio::spawn(async move { engine.reserve(product_id, Uuid::new_v4(), quantity).await })
        });
        for outcome in join_all(attempts).await {
            match outcome.unwrap() {
                Ok(_) | Err(ReservationError::InsufficientInventory { .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        let product = product(&store, product_id).await;
        assert!(product.available_quantity >= 0);
        assert_eq!(product.reserved_quantity(), confirmed_total(&store, product_id));
    }

    #[tokio::test]
    async fn storage_failure_after_decrement_rolls_back_everything() {
        let (engine, store, product_id) = engine_with_product(10);
        store.fail_next_booking_inserts(1);

        let err = engine.reserve(product_id, Uuid::new_v4(), 4).await.unwrap_err();

        assert!(matches!(err, ReservationError::StorageFailure(_)));
        assert_eq!(product(&store, product_id).await.available_quantity, 10);
        assert!(store.bookings().unwrap().is_empty());

        // The lock was released and the next attempt goes through.
        engine.reserve(product_id, Uuid::new_v4(), 4).await.unwrap();
        assert_eq!(product(&store, product_id).await.available_quantity, 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn different_products_do_not_block_each_other() {
        let (engine, store, first) = engine_with_product(5);
        let second = store
            .insert_product(NewProduct::new("Flight B2", "flight", BigDecimal::from(150), 5))
            .unwrap()
            .id;

        let (locked_tx, locked_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let holder = tokio::spawn({
            let store = Arc::clone(&store);
            async move {
                store
                    .transaction(move |tx| {
                        Box::pin(async move {
                            tx.get_product_for_update(first).await?;
                            let _ = locked_tx.send(());
                            let _ = release_rx.await;
                            Ok(())
                        })
                    })
                    .await
            }
        });
        locked_rx.await.unwrap();

        let booking = tokio::time::timeout(
            Duration::from_secs(2),
            engine.reserve(second, Uuid::new_v4(), 1),
        )
        .await
        .expect("reservation on an unlocked product must not wait")
        .unwrap();
        assert_eq!(booking.product_id, second);

        release_tx.send(()).unwrap();
        holder.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn same_product_waits_for_lock_holder() {
        let (engine, store, product_id) = engine_with_product(5);

        let (locked_tx, locked_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let holder = tokio::spawn({
            let store = Arc::clone(&store);
            async move {
                store
                    .transaction(move |tx| {
                        Box::pin(async move {
                            let mut product = tx.get_product_for_update(product_id).await?.unwrap();
                            let _ = locked_tx.send(());
                            let _ = release_rx.await;
                            product.available_quantity -= 5;
                            tx.save_product(&product).await
                        })
                    })
                    .await
            }
        });
        locked_rx.await.unwrap();

        let waiting = tokio::spawn({
            let engine = engine.clone();
            async move { engine.reserve(product_id, Uuid::new_v4(), 1).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());

        release_tx.send(()).unwrap();
        holder.await.unwrap().unwrap();

        // Sees the holder's committed write, not the value it read earlier.
        let err = waiting.await.unwrap().unwrap_err();
        assert_eq!(err, ReservationError::InsufficientInventory { requested: 1, available: 0 });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn aborted_reservation_releases_lock_without_writes() {
        let (engine, store, product_id) = engine_with_product(5);

        let (locked_tx, locked_rx) = tokio::sync::oneshot::channel::<()>();
        let stalled = tokio::spawn({
            let store = Arc::clone(&store);
            async move {
                store
                    .transaction(move |tx| {
                        Box::pin(async move {
                            let mut product = tx.get_product_for_update(product_id).await?.unwrap();
                            product.available_quantity -= 2;
                            tx.save_product(&product).await?;
                            let _ = locked_tx.send(());
                            futures::future::pending::<()>().await;
                            Ok(())
                        })
                    })
                    .await
            }
        });
        locked_rx.await.unwrap();
        stalled.abort();
        assert!(stalled.await.unwrap_err().is_cancelled());

        assert_eq!(product(&store, product_id).await.available_quantity, 5);
        let booking = tokio::time::timeout(
            Duration::from_secs(2),
            engine.reserve(product_id, Uuid::new_v4(), 5),
        )
        .await
        .expect("lock must be released by the aborted transaction")
        .unwrap();
        assert_eq!(booking.quantity, 5);
    }
}
