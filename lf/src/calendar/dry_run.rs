//! Calendar that is always free and books nothing

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::domain::TimeSlot;

use super::{Calendar, CalendarError, SlotRules, compute_free_slots};

#[derive(Debug)]
pub struct DryRunCalendar {
    rules: SlotRules,
    created: AtomicU64,
}

impl DryRunCalendar {
    pub fn new(rules: SlotRules) -> Self {
        Self {
            rules,
            created: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Calendar for DryRunCalendar {
    async fn find_free_slots(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        duration_minutes: u32,
    ) -> Result<Vec<TimeSlot>, CalendarError> {
        Ok(compute_free_slots(&[], start, end, duration_minutes, &self.rules))
    }

    async fn create_event(
        &self,
        summary: &str,
        slot: TimeSlot,
        attendees: &[String],
    ) -> Result<Option<String>, CalendarError> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let event_id = format!("dry-run-event-{}", n);
        info!(%summary, start = %slot.start, ?attendees, %event_id, "Dry run: would create calendar event");
        Ok(Some(event_id))
    }
}
