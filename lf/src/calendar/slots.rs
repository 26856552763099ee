//! Free-slot search

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, Offset, TimeZone, Utc, Weekday};
use eyre::Result;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::domain::TimeSlot;

/// Where meetings may be placed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRules {
    /// First bookable hour, local time
    pub business_start: u32,
    /// Hour by which a meeting must have ended, local time
    pub business_end: u32,
    pub utc_offset: FixedOffset,
    pub max_slots: usize,
}

impl SlotRules {
    pub fn from_config(pipeline: &PipelineConfig) -> Result<Self> {
        Ok(Self::with_offset(pipeline, pipeline.utc_offset()?))
    }

    fn with_offset(pipeline: &PipelineConfig, utc_offset: FixedOffset) -> Self {
        Self {
            business_start: pipeline.business_hours_start,
            business_end: pipeline.business_hours_end,
            utc_offset,
            max_slots: pipeline.max_slots,
        }
    }
}

impl Default for SlotRules {
    fn default() -> Self {
        Self::with_offset(&PipelineConfig::default(), Utc.fix())
    }
}

/// Weekday business-hour slots in `[window_start, window_end)` that avoid `busy`
///
/// Candidates start on the business-day opening and step by the meeting
/// duration. Returns at most `rules.max_slots`, earliest first.
pub fn compute_free_slots(
    busy: &[TimeSlot],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    duration_minutes: u32,
    rules: &SlotRules,
) -> Vec<TimeSlot> {
    debug!(%window_start, %window_end, duration_minutes, busy = busy.len(), "compute_free_slots: called");
    let mut slots = Vec::new();
    if duration_minutes == 0 || window_end <= window_start || rules.max_slots == 0 {
        return slots;
    }
    let duration = Duration::minutes(i64::from(duration_minutes));
    let Some(open) = NaiveTime::from_hms_opt(rules.business_start, 0, 0) else {
        return slots;
    };
    if rules.business_end <= rules.business_start || rules.business_end > 24 {
        return slots;
    }
    // Hours after local midnight, so 24 closes at the end of the day
    let close = Duration::hours(i64::from(rules.business_end));

    let mut day = window_start.with_timezone(&rules.utc_offset).date_naive();
    let last_day = window_end.with_timezone(&rules.utc_offset).date_naive();
    while day <= last_day && slots.len() < rules.max_slots {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun)
            && let (Some(day_open), Some(day_close)) = (
                rules.utc_offset.from_local_datetime(&day.and_time(open)).single(),
                rules
                    .utc_offset
                    .from_local_datetime(&(day.and_time(NaiveTime::MIN) + close))
                    .single(),
            )
        {
            let day_close = day_close.with_timezone(&Utc);
            let mut start = day_open.with_timezone(&Utc);
            while start + duration <= day_close && slots.len() < rules.max_slots {
                let candidate = TimeSlot::new(start, start + duration);
                if start >= window_start && candidate.end <= window_end && !busy.iter().any(|b| b.overlaps(&candidate)) {
                    slots.push(candidate);
                }
                start += duration;
            }
        }
        let Some(next) = day.succ_opt() else {
            break;
        };
        day = next;
    }

    slots
}
