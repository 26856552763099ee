//! Calendar collaborator
//!
//! Finds free meeting slots and books events.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use crate::config::{CalendarConfig, CalendarProvider};
use crate::domain::TimeSlot;

mod dry_run;
mod google;
mod slots;

pub use dry_run::DryRunCalendar;
pub use google::GoogleCalendarClient;
pub use slots::{SlotRules, compute_free_slots};

/// Calendar errors
#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Calendar API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Access token env var {0} is not set")]
    MissingToken(String),

    #[error("Invalid calendar response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait Calendar: Send + Sync {
    /// Bookable slots of `duration_minutes` between `start` and `end`
    async fn find_free_slots(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        duration_minutes: u32,
    ) -> Result<Vec<TimeSlot>, CalendarError>;

    /// Book a meeting; `None` when the provider accepted the call but created nothing
    async fn create_event(
        &self,
        summary: &str,
        slot: TimeSlot,
        attendees: &[String],
    ) -> Result<Option<String>, CalendarError>;
}

/// Create the configured calendar
pub fn create_calendar(config: &CalendarConfig, rules: SlotRules) -> Result<Arc<dyn Calendar>, CalendarError> {
    debug!(provider = ?config.provider, "create_calendar: called");
    match config.provider {
        CalendarProvider::DryRun => Ok(Arc::new(DryRunCalendar::new(rules))),
        CalendarProvider::Google => Ok(Arc::new(GoogleCalendarClient::from_config(config, rules)?)),
    }
}
