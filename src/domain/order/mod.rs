// ============================================================================
// Order Domain
// ============================================================================
//
// - Value objects (OrderId, OrderStatus, NewOrder, Page)
// - Record (Order, the persisted state)
// - State machine (allowed status edges)
// - Events (OrderEvent)
// - Commands and replies
// - Errors (OrderError taxonomy)
// - Access policy (roles and actions)
// - Command handler (OrderLifecycleEngine)
//
// ============================================================================

pub mod value_objects;
pub mod record;
pub mod state_machine;
pub mod events;
pub mod commands;
pub mod errors;
pub mod access;
pub mod command_handler;

pub use value_objects::*;
pub use record::Order;
pub use state_machine::{transition, ALLOWED_TRANSITIONS};
pub use events::*;
pub use commands::*;
pub use errors::*;
pub use access::*;
pub use command_handler::*;
