//! State management with actor pattern
//!
//! StateManager owns the LeadStore and processes messages via channels,
//! providing thread-safe access to persistent lead state.

mod manager;
mod messages;

pub use manager::{LeadStorage, StateManager};
pub use messages::{StateCommand, StateError, StateResponse};
