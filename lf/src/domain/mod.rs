//! Domain types for LeadFlow
//!
//! Core domain type: Lead, plus the enums and value types around it.
//! Lead implements the Record trait for LeadStore persistence.

mod id;
mod lead;
mod priority;
mod status;

pub use id::{IdResolver, generate_id, slugify};
pub use lead::{
    COMPANY_KEYS, CONTACT_KEYS, Interaction, InteractionKind, Lead, MeetingDetails, RawAttributes, TITLE_KEYS, TimeSlot,
};
pub use priority::Priority;
pub use status::{Intent, LeadStatus, Verdict};

// Re-export leadstore types for convenience
pub use leadstore::{Filter, FilterOp, IndexValue, Record, Store};
