pub mod actors;
pub mod admission;
pub mod config;
pub mod domain;
pub mod messaging;
pub mod metrics;
pub mod store;
pub mod utils;

pub use domain::order::OrderLifecycleEngine;
