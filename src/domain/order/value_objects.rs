use serde::{Deserialize, Serialize};
use uuid::Uuid;
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

use super::errors::OrderError;

// ============================================================================
// Order Value Objects
// ============================================================================

pub const MAX_CUSTOMER_NAME_LEN: usize = 255;
pub const MAX_DESCRIPTION_LEN: usize = 1000;
pub const AMOUNT_SCALE: u32 = 2;

/// Store-assigned order identity. Time-ordered (UUIDv7) so ids sort by creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(Uuid);

impl OrderId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Stable partition index for routing all events of one order to the same lane
    pub fn partition(&self, partitions: usize) -> usize {
        if partitions <= 1 {
            return 0;
        }
        (self.0.as_u128() % partitions as u128) as usize
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for OrderId {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| OrderError::validation("id", e.to_string()))
    }
}

/// Lifecycle status of an order. See `state_machine` for the allowed edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Preparing,
    Ready,
    InTransit,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 8] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Preparing,
        OrderStatus::Ready,
        OrderStatus::InTransit,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Preparing => "PREPARING",
            OrderStatus::Ready => "READY",
            OrderStatus::InTransit => "IN_TRANSIT",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Refunded => "REFUNDED",
        }
    }

    /// Terminal for fulfilment: no forward progress and no cancellation.
    /// Delivered and Cancelled orders can still be refunded.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        OrderStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| OrderError::validation("status", format!("unknown order status '{}'", s)))
    }
}

/// Caller-supplied fields of a new order. Everything else is assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub customer_name: String,
    pub total_amount: Decimal,
    pub description: Option<String>,
}

impl NewOrder {
    pub fn new(customer_name: impl Into<String>, total_amount: Decimal) -> Self {
        Self {
            customer_name: customer_name.into(),
            total_amount,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Validate and normalize (trim name, drop blank description)
    pub fn validated(self) -> Result<Self, OrderError> {
        let customer_name = validate_customer_name(&self.customer_name)?;
        validate_amount(self.total_amount)?;
        let description = normalize_description(self.description)?;

        Ok(Self {
            customer_name,
            total_amount: self.total_amount.normalize_currency(),
            description,
        })
    }
}

pub fn validate_customer_name(name: &str) -> Result<String, OrderError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(OrderError::validation("customerName", "customer name is required"));
    }
    if trimmed.chars().count() > MAX_CUSTOMER_NAME_LEN {
        return Err(OrderError::validation(
            "customerName",
            format!("must be at most {} characters", MAX_CUSTOMER_NAME_LEN),
        ));
    }
    Ok(trimmed.to_string())
}

pub fn validate_amount(amount: Decimal) -> Result<(), OrderError> {
    if amount <= Decimal::ZERO {
        return Err(OrderError::validation(
            "totalAmount",
            format!("must be greater than 0, got {}", amount),
        ));
    }
    if amount.normalize().scale() > AMOUNT_SCALE {
        return Err(OrderError::validation(
            "totalAmount",
            format!("at most {} decimal places allowed, got {}", AMOUNT_SCALE, amount),
        ));
    }
    Ok(())
}

pub fn normalize_description(description: Option<String>) -> Result<Option<String>, OrderError> {
    match description {
        Some(text) if text.trim().is_empty() => Ok(None),
        Some(text) if text.chars().count() > MAX_DESCRIPTION_LEN => Err(OrderError::validation(
            "description",
            format!("must be at most {} characters", MAX_DESCRIPTION_LEN),
        )),
        other => Ok(other),
    }
}

trait CurrencyScale {
    fn normalize_currency(self) -> Self;
}

impl CurrencyScale for Decimal {
    /// 100 and 100.0 are stored as 100.00
    fn normalize_currency(self) -> Self {
        let mut value = self.normalize();
        value.rescale(AMOUNT_SCALE);
        value
    }
}

/// Offset/limit window for list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub const DEFAULT_LIMIT: usize = 100;

    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    pub fn first(limit: usize) -> Self {
        Self { offset: 0, limit }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::first(Self::DEFAULT_LIMIT)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
