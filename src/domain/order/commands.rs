use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::access::Action;
use super::record::Order;
use super::value_objects::{NewOrder, OrderId, OrderStatus, Page};

// ============================================================================
// Order Commands - inbound requests from the request-handling layer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum OrderCommand {
    CreateOrder(NewOrder),
    UpdateOrderStatus {
        id: OrderId,
        new_status: OrderStatus,
        /// When present, must equal the stored version
        expected_version: Option<i64>,
    },
    DeleteOrder {
        id: OrderId,
    },
    GetOrder {
        id: OrderId,
    },
    ListOrdersByStatus {
        status: OrderStatus,
        page: Page,
    },
    ListOrdersByCustomer {
        name: String,
        page: Page,
    },
}

impl OrderCommand {
    pub fn action(&self) -> Action {
        match self {
            OrderCommand::CreateOrder(_) => Action::Create,
            OrderCommand::UpdateOrderStatus { .. } => Action::UpdateStatus,
            OrderCommand::DeleteOrder { .. } => Action::Delete,
            OrderCommand::GetOrder { .. }
            | OrderCommand::ListOrdersByStatus { .. }
            | OrderCommand::ListOrdersByCustomer { .. } => Action::Read,
        }
    }

    /// Label used for logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            OrderCommand::CreateOrder(_) => "create_order",
            OrderCommand::UpdateOrderStatus { .. } => "update_order_status",
            OrderCommand::DeleteOrder { .. } => "delete_order",
            OrderCommand::GetOrder { .. } => "get_order",
            OrderCommand::ListOrdersByStatus { .. } => "list_orders_by_status",
            OrderCommand::ListOrdersByCustomer { .. } => "list_orders_by_customer",
        }
    }
}

/// What happened to the event of a committed mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Delivered { attempts: u32 },
    /// Committed but not (yet) on the stream; the outbox owns the retry
    Pending { reason: String },
}

/// Result of a mutating command: the mutation is committed regardless of delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Committed {
    pub order: Order,
    pub event_id: Uuid,
    pub delivery: DeliveryStatus,
}

impl Committed {
    /// Order committed, notification still pending
    pub fn is_degraded(&self) -> bool {
        matches!(self.delivery, DeliveryStatus::Pending { .. })
    }

    pub fn warning(&self) -> Option<&str> {
        match &self.delivery {
            DeliveryStatus::Pending { reason } => Some(reason),
            DeliveryStatus::Delivered { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    Committed(Committed),
    Order(Order),
    Orders(Vec<Order>),
}
