//! Lead lifecycle
//!
//! Stage contracts, the allowed-move graph, and the transition function that
//! applies a stage outcome to a lead.

mod graph;
mod machine;
mod outcome;
mod stage;

pub use graph::{is_successor, reachable_from, successors};
pub use machine::{LeadStateMachine, TransitionError, ViolationKind, status_for_intent};
pub use outcome::StageOutcome;
pub use stage::Stage;
