use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::order::{NewOrder, Order, OrderError, OrderId, OrderStatus, Page};
use super::{OrderMutator, OrderStore};

// ============================================================================
// In-Memory Order Store
// ============================================================================
//
// Process-local store used by tests and dry runs. The write lock is taken
// for exactly one insert / compare-and-swap / delete step and released
// before returning; nothing holds it across a caller's read and write.
//
// ============================================================================

#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<OrderId, Order>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.orders.read().await.is_empty()
    }

    async fn scan<P>(&self, page: Page, predicate: P) -> Vec<Order>
    where
        P: Fn(&Order) -> bool,
    {
        let orders = self.orders.read().await;
        let mut matching: Vec<Order> = orders.values().filter(|o| predicate(o)).cloned().collect();
        drop(orders);

        // stable pagination: creation time, then id
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        matching.into_iter().skip(page.offset).take(page.limit).collect()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, new_order: NewOrder) -> Result<Order, OrderError> {
        let new_order = new_order.validated()?;
        let order = Order::from_new(OrderId::generate(), new_order, Utc::now());

        self.orders.write().await.insert(order.id, order.clone());

        tracing::debug!(order_id = %order.id, "Inserted order");
        Ok(order)
    }

    async fn get(&self, id: OrderId) -> Result<Order, OrderError> {
        self.orders
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(OrderError::NotFound(id))
    }

    async fn compare_and_swap(
        &self,
        id: OrderId,
        expected_version: i64,
        mutator: OrderMutator,
    ) -> Result<Order, OrderError> {
        let mut orders = self.orders.write().await;

        let current = orders.get(&id).ok_or(OrderError::NotFound(id))?;
        if current.version != expected_version {
            return Err(OrderError::Conflict {
                id,
                expected: expected_version,
                actual: current.version,
            });
        }

        let next = current.next_version(mutator, Utc::now())?;
        orders.insert(id, next.clone());

        tracing::debug!(order_id = %id, version = next.version, "Compare-and-swap applied");
        Ok(next)
    }

    async fn delete(&self, id: OrderId) -> Result<Order, OrderError> {
        self.orders
            .write()
            .await
            .remove(&id)
            .ok_or(OrderError::NotFound(id))
    }

    async fn query_by_status(&self, status: OrderStatus, page: Page) -> Result<Vec<Order>, OrderError> {
        Ok(self.scan(page, |order| order.status == status).await)
    }

    async fn query_by_customer(&self, name_prefix: &str, page: Page) -> Result<Vec<Order>, OrderError> {
        Ok(self.scan(page, |order| order.matches_customer_prefix(name_prefix)).await)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::set_status;
    use rust_decimal::Decimal;
    use std::sync::Arc;

    fn alice() -> NewOrder {
        NewOrder::new("Alice", Decimal::new(10000, 2))
    }

    #[tokio::test]
    async fn test_insert_assigns_identity_and_version_zero() {
        let store = InMemoryOrderStore::new();
        let order = store.insert(alice()).await.unwrap();

        assert_eq!(order.version, 0);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(store.get(order.id).await.unwrap(), order);
    }

    #[tokio::test]
    async fn test_insert_rejects_invalid_order() {
        let store = InMemoryOrderStore::new();
        let result = store.insert(NewOrder::new("", Decimal::ONE)).await;

        assert!(matches!(result, Err(OrderError::Validation { .. })));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_get_missing_order() {
        let store = InMemoryOrderStore::new();
        let id = OrderId::generate();
        assert_eq!(store.get(id).await, Err(OrderError::NotFound(id)));
    }

    #[tokio::test]
    async fn test_versions_increase_without_gaps() {
        let store = InMemoryOrderStore::new();
        let order = store.insert(alice()).await.unwrap();

        let path = [
            OrderStatus::Confirmed,
            OrderStatus::Preparing,
            OrderStatus::Ready,
            OrderStatus::InTransit,
            OrderStatus::Delivered,
        ];

        let mut versions = vec![order.version];
        for (expected, status) in path.into_iter().enumerate() {
            let updated = store
                .compare_and_swap(order.id, expected as i64, set_status(status))
                .await
                .unwrap();
            versions.push(updated.version);
        }

        assert_eq!(versions, vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_stale_version_is_rejected_and_nothing_changes() {
        let store = InMemoryOrderStore::new();
        let order = store.insert(alice()).await.unwrap();
        store.compare_and_swap(order.id, 0, set_status(OrderStatus::Confirmed)).await.unwrap();

        let result = store
            .compare_and_swap(order.id, 0, set_status(OrderStatus::Cancelled))
            .await;

        assert_eq!(result, Err(OrderError::Conflict { id: order.id, expected: 0, actual: 1 }));
        let stored = store.get(order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Confirmed);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_compare_and_swap_on_missing_order() {
        let store = InMemoryOrderStore::new();
        let id = OrderId::generate();
        let result = store.compare_and_swap(id, 0, set_status(OrderStatus::Confirmed)).await;
        assert_eq!(result, Err(OrderError::NotFound(id)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_on_same_version_exactly_one_wins() {
        let store = Arc::new(InMemoryOrderStore::new());
        let order = store.insert(alice()).await.unwrap();

        let mut handles = Vec::new();
        for status in [OrderStatus::Confirmed, OrderStatus::Cancelled, OrderStatus::Confirmed, OrderStatus::Cancelled] {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.compare_and_swap(order.id, 0, set_status(status)).await
            }));
        }

        let mut winners = Vec::new();
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(updated) => winners.push(updated),
                Err(OrderError::Conflict { expected: 0, actual: 1, .. }) => conflicts += 1,
                Err(other) => panic!("unexpected error: {}", other),
            }
        }

        assert_eq!(winners.len(), 1);
        assert_eq!(conflicts, 3);

        let stored = store.get(order.id).await.unwrap();
        assert_eq!(stored, winners[0]);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_delete_returns_snapshot_and_removes() {
        let store = InMemoryOrderStore::new();
        let order = store.insert(alice()).await.unwrap();

        let snapshot = store.delete(order.id).await.unwrap();
        assert_eq!(snapshot, order);
        assert_eq!(store.get(order.id).await, Err(OrderError::NotFound(order.id)));
        assert_eq!(store.delete(order.id).await, Err(OrderError::NotFound(order.id)));
    }

    #[tokio::test]
    async fn test_queries_filter_and_paginate() {
        let store = InMemoryOrderStore::new();
        let mut ids = Vec::new();
        for name in ["Alice", "alfred", "Bob", "Alina"] {
            ids.push(store.insert(NewOrder::new(name, Decimal::ONE)).await.unwrap().id);
        }
        store.compare_and_swap(ids[2], 0, set_status(OrderStatus::Confirmed)).await.unwrap();

        let al = store.query_by_customer("AL", Page::default()).await.unwrap();
        assert_eq!(al.len(), 3);

        let first_two = store.query_by_customer("al", Page::new(0, 2)).await.unwrap();
        let rest = store.query_by_customer("al", Page::new(2, 2)).await.unwrap();
        assert_eq!(first_two.len(), 2);
        assert_eq!(rest.len(), 1);
        assert!(first_two.iter().all(|o| o.id != rest[0].id));

        let pending = store.query_by_status(OrderStatus::Pending, Page::default()).await.unwrap();
        assert_eq!(pending.len(), 3);
        let confirmed = store.query_by_status(OrderStatus::Confirmed, Page::default()).await.unwrap();
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].customer_name, "Bob");
    }
}
