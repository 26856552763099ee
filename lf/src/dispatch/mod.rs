//! Work planning and concurrent dispatch

mod context;
mod dispatcher;
mod planner;

pub use context::WorkerContext;
pub use dispatcher::{Dispatcher, ItemReport, LeadResult};
pub use planner::{BatchPlanner, Plan, WorkItem};
