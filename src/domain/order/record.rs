use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::errors::OrderError;
use super::value_objects::{
    normalize_description, validate_amount, validate_customer_name, NewOrder, OrderId, OrderStatus,
};

// ============================================================================
// Order Record - the persisted state of one order
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    // Identity (store-assigned, immutable)
    pub id: OrderId,
    pub version: i64,

    // Business state
    pub customer_name: String,
    pub total_amount: Decimal,
    pub description: Option<String>,
    pub status: OrderStatus,

    // Audit trail (store-assigned)
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Build the initial record for a validated new order
    pub fn from_new(id: OrderId, new_order: NewOrder, now: DateTime<Utc>) -> Self {
        Self {
            id,
            version: 0,
            customer_name: new_order.customer_name,
            total_amount: new_order.total_amount,
            description: new_order.description,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a caller mutation on a copy and seal it as the next version.
    ///
    /// Store-owned fields survive whatever the mutator does to them and the
    /// business fields are re-validated.
    pub fn next_version<F>(&self, mutator: F, now: DateTime<Utc>) -> Result<Self, OrderError>
    where
        F: FnOnce(&mut Order),
    {
        let mut next = self.clone();
        mutator(&mut next);

        next.customer_name = validate_customer_name(&next.customer_name)?;
        validate_amount(next.total_amount)?;
        next.description = normalize_description(next.description.take())?;

        next.id = self.id;
        next.created_at = self.created_at;
        next.version = self.version + 1;
        next.updated_at = now;

        Ok(next)
    }

    pub fn matches_customer_prefix(&self, prefix: &str) -> bool {
        self.customer_name
            .to_lowercase()
            .starts_with(&prefix.trim().to_lowercase())
    }
}
