use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use futures_util::StreamExt;
use rust_decimal::Decimal;
use scylla::client::session::Session;
use scylla::response::query_result::QueryResult;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::order::{NewOrder, Order, OrderError, OrderId, OrderStatus, Page};
use super::{OrderMutator, OrderStore};

// ============================================================================
// ScyllaDB Order Store
// ============================================================================
//
// One row per order, keyed by id. Every mutation is a lightweight
// transaction conditioned on the version column, so two writers holding
// the same version can never both apply.
//
// Timestamps are truncated to milliseconds (CQL timestamp precision) so the
// record returned by a write equals the record read back later.
//
// ============================================================================

const SELECT_ORDER: &str = "SELECT id, version, customer_name, total_amount, description, status, created_at, updated_at FROM orders";

/// Re-reads before a delete gives up on a moving target
const DELETE_ATTEMPTS: u32 = 3;

type OrderRow = (Uuid, i64, String, String, Option<String>, String, DateTime<Utc>, DateTime<Utc>);

pub struct ScyllaOrderStore {
    session: Arc<Session>,
}

impl ScyllaOrderStore {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    async fn scan<P>(&self, statement: String, values: Vec<String>, page: Page, predicate: P) -> Result<Vec<Order>, OrderError>
    where
        P: Fn(&Order) -> bool,
    {
        let mut rows = self
            .session
            .query_iter(statement, values)
            .await
            .map_err(OrderError::internal)?
            .rows_stream::<OrderRow>()
            .map_err(OrderError::internal)?;

        let mut matching = Vec::new();
        while let Some(row) = rows.next().await {
            let order = order_from_row(row.map_err(OrderError::internal)?)?;
            if predicate(&order) {
                matching.push(order);
            }
        }

        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(matching.into_iter().skip(page.offset).take(page.limit).collect())
    }
}

#[async_trait]
impl OrderStore for ScyllaOrderStore {
    async fn insert(&self, new_order: NewOrder) -> Result<Order, OrderError> {
        let new_order = new_order.validated()?;
        let order = Order::from_new(OrderId::generate(), new_order, Utc::now().trunc_subsecs(3));

        self.session
            .query_unpaged(
                "INSERT INTO orders (id, version, customer_name, total_amount, description, status, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    order.id.as_uuid(),
                    order.version,
                    order.customer_name.as_str(),
                    order.total_amount.to_string(),
                    order.description.as_deref(),
                    order.status.as_str(),
                    order.created_at,
                    order.updated_at,
                ),
            )
            .await
            .map_err(OrderError::internal)?;

        tracing::debug!(order_id = %order.id, "Inserted order into ScyllaDB");
        Ok(order)
    }

    async fn get(&self, id: OrderId) -> Result<Order, OrderError> {
        let result = self
            .session
            .query_unpaged(format!("{} WHERE id = ?", SELECT_ORDER), (id.as_uuid(),))
            .await
            .map_err(OrderError::internal)?;

        let rows_result = result.into_rows_result().map_err(OrderError::internal)?;
        match rows_result.maybe_first_row::<OrderRow>().map_err(OrderError::internal)? {
            Some(row) => order_from_row(row),
            None => Err(OrderError::NotFound(id)),
        }
    }

    async fn compare_and_swap(
        &self,
        id: OrderId,
        expected_version: i64,
        mutator: OrderMutator,
    ) -> Result<Order, OrderError> {
        let current = self.get(id).await?;
        if current.version != expected_version {
            return Err(OrderError::Conflict { id, expected: expected_version, actual: current.version });
        }

        let next = current.next_version(mutator, Utc::now().trunc_subsecs(3))?;

        let result = self
            .session
            .query_unpaged(
                "UPDATE orders SET version = ?, customer_name = ?, total_amount = ?, description = ?, status = ?, updated_at = ?
                 WHERE id = ? IF version = ?",
                (
                    next.version,
                    next.customer_name.as_str(),
                    next.total_amount.to_string(),
                    next.description.as_deref(),
                    next.status.as_str(),
                    next.updated_at,
                    id.as_uuid(),
                    expected_version,
                ),
            )
            .await
            .map_err(OrderError::internal)?;

        match lwt_outcome(result)? {
            (true, _) => {
                tracing::debug!(order_id = %id, version = next.version, "Compare-and-swap applied");
                Ok(next)
            }
            (false, Some(actual)) => Err(OrderError::Conflict { id, expected: expected_version, actual }),
            (false, None) => Err(OrderError::NotFound(id)),
        }
    }

    async fn delete(&self, id: OrderId) -> Result<Order, OrderError> {
        let mut last_seen = None;

        for attempt in 1..=DELETE_ATTEMPTS {
            let snapshot = self.get(id).await?;

            let result = self
                .session
                .query_unpaged("DELETE FROM orders WHERE id = ? IF version = ?", (id.as_uuid(), snapshot.version))
                .await
                .map_err(OrderError::internal)?;

            match lwt_outcome(result)? {
                (true, _) => return Ok(snapshot),
                (false, None) => return Err(OrderError::NotFound(id)),
                (false, Some(actual)) => {
                    tracing::debug!(
                        order_id = %id,
                        attempt = attempt,
                        expected = snapshot.version,
                        actual = actual,
                        "Order changed under delete, re-reading"
                    );
                    last_seen = Some((snapshot.version, actual));
                }
            }
        }

        let (expected, actual) = last_seen.unwrap_or_default();
        Err(OrderError::Conflict { id, expected, actual })
    }

    async fn query_by_status(&self, status: OrderStatus, page: Page) -> Result<Vec<Order>, OrderError> {
        self.scan(
            format!("{} WHERE status = ?", SELECT_ORDER),
            vec![status.as_str().to_string()],
            page,
            |_| true,
        )
        .await
    }

    async fn query_by_customer(&self, name_prefix: &str, page: Page) -> Result<Vec<Order>, OrderError> {
        self.scan(SELECT_ORDER.to_string(), Vec::new(), page, |order| order.matches_customer_prefix(name_prefix))
            .await
    }
}

/// `[applied]` plus, when the row exists, the version the condition saw
fn lwt_outcome(result: QueryResult) -> Result<(bool, Option<i64>), OrderError> {
    let rows_result = result.into_rows_result().map_err(OrderError::internal)?;

    if rows_result.column_specs().len() == 1 {
        let (applied,) = rows_result.single_row::<(bool,)>().map_err(OrderError::internal)?;
        Ok((applied, None))
    } else {
        rows_result
            .single_row::<(bool, Option<i64>)>()
            .map_err(OrderError::internal)
    }
}

fn order_from_row(row: OrderRow) -> Result<Order, OrderError> {
    let (id, version, customer_name, total_amount, description, status, created_at, updated_at) = row;

    let total_amount = Decimal::from_str(&total_amount)
        .map_err(|e| OrderError::internal(format!("corrupt amount '{}' on order {}: {}", total_amount, id, e)))?;
    let status = OrderStatus::from_str(&status)
        .map_err(|e| OrderError::internal(format!("corrupt status on order {}: {}", id, e)))?;

    Ok(Order {
        id: OrderId::from_uuid(id),
        version,
        customer_name,
        total_amount,
        description,
        status,
        created_at,
        updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(amount: &str, status: &str) -> OrderRow {
        let now = Utc::now().trunc_subsecs(3);
        (Uuid::now_v7(), 2, "Alice".to_string(), amount.to_string(), None, status.to_string(), now, now)
    }

    #[test]
    fn test_row_decodes_into_order() {
        let order = order_from_row(row("100.00", "IN_TRANSIT")).unwrap();
        assert_eq!(order.version, 2);
        assert_eq!(order.status, OrderStatus::InTransit);
        assert_eq!(order.total_amount.to_string(), "100.00");
    }

    #[test]
    fn test_corrupt_rows_surface_as_internal_errors() {
        assert!(matches!(order_from_row(row("abc", "PENDING")), Err(OrderError::Internal { .. })));
        assert!(matches!(order_from_row(row("1.00", "SHIPPED")), Err(OrderError::Internal { .. })));
    }
}
