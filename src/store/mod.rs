// ============================================================================
// Order Store - durable keyed storage with optimistic concurrency
// ============================================================================
//
// Responsibilities:
// 1. Assign identity, version 0 and timestamps on insert
// 2. Compare-and-swap on version for every mutation (the only
//    serialization point between concurrent writers of one order)
// 3. Return the pre-deletion snapshot on delete
// 4. Eventually-consistent scans by status and customer
//
// ============================================================================

use async_trait::async_trait;

use crate::domain::order::{NewOrder, Order, OrderError, OrderId, OrderStatus, Page};

pub mod memory;
pub mod schema;
pub mod scylla_store;

pub use memory::InMemoryOrderStore;
pub use scylla_store::ScyllaOrderStore;

/// Caller-side change applied inside a compare-and-swap
pub type OrderMutator = Box<dyn FnOnce(&mut Order) + Send>;

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, new_order: NewOrder) -> Result<Order, OrderError>;

    async fn get(&self, id: OrderId) -> Result<Order, OrderError>;

    /// Atomically: fail with `Conflict` unless the stored version equals
    /// `expected_version`, otherwise apply `mutator`, bump the version by one,
    /// stamp `updated_at` and persist.
    async fn compare_and_swap(
        &self,
        id: OrderId,
        expected_version: i64,
        mutator: OrderMutator,
    ) -> Result<Order, OrderError>;

    /// Physically remove the order, returning its last state
    async fn delete(&self, id: OrderId) -> Result<Order, OrderError>;

    async fn query_by_status(&self, status: OrderStatus, page: Page) -> Result<Vec<Order>, OrderError>;

    /// Case-insensitive prefix match on customer name
    async fn query_by_customer(&self, name_prefix: &str, page: Page) -> Result<Vec<Order>, OrderError>;
}

/// Convenience for the common "set the status" mutation
pub fn set_status(status: OrderStatus) -> OrderMutator {
    Box::new(move |order: &mut Order| order.status = status)
}
