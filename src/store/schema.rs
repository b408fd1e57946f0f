use anyhow::{bail, Result};
use scylla::client::session::Session;

// ============================================================================
// Schema Bootstrap
// ============================================================================
//
// Idempotent DDL for the order table, its status index and the
// pending-event outbox. Safe to run on every start.
//
// ============================================================================

const ORDERS_TABLE: &str = "CREATE TABLE IF NOT EXISTS orders (
    id uuid PRIMARY KEY,
    version bigint,
    customer_name text,
    total_amount text,
    description text,
    status text,
    created_at timestamp,
    updated_at timestamp
)";

const ORDERS_STATUS_INDEX: &str = "CREATE INDEX IF NOT EXISTS orders_status_idx ON orders (status)";

// Clustered by enqueue time so one order's backlog reads back in FIFO order
const PENDING_EVENTS_TABLE: &str = "CREATE TABLE IF NOT EXISTS pending_order_events (
    order_id uuid,
    enqueued_at timestamp,
    event_id uuid,
    payload text,
    attempts int,
    last_error text,
    PRIMARY KEY (order_id, enqueued_at, event_id)
) WITH CLUSTERING ORDER BY (enqueued_at ASC, event_id ASC)";

pub async fn ensure_schema(session: &Session, keyspace: &str, replication_factor: u32) -> Result<()> {
    if !is_valid_identifier(keyspace) {
        bail!("Invalid keyspace name '{}'", keyspace);
    }

    tracing::info!(keyspace = %keyspace, "🗄️  Ensuring ScyllaDB schema");

    session
        .query_unpaged(
            format!(
                "CREATE KEYSPACE IF NOT EXISTS {} WITH REPLICATION = \
                 {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
                keyspace, replication_factor
            ),
            &[],
        )
        .await?;

    session.use_keyspace(keyspace, false).await?;

    for statement in [ORDERS_TABLE, ORDERS_STATUS_INDEX, PENDING_EVENTS_TABLE] {
        session.query_unpaged(statement, &[]).await?;
    }

    tracing::info!(keyspace = %keyspace, "✅ Schema ready");
    Ok(())
}

/// Keyspace names are interpolated into DDL, so only plain identifiers pass
fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    name.len() <= 48 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyspace_identifier_validation() {
        assert!(is_valid_identifier("orders_ks"));
        assert!(is_valid_identifier("Orders2"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("2orders"));
        assert!(!is_valid_identifier("orders; DROP TABLE orders"));
        assert!(!is_valid_identifier(&"k".repeat(49)));
    }
}
