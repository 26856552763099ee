//! Google Calendar REST client

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::CalendarConfig;
use crate::domain::TimeSlot;

use super::{Calendar, CalendarError, SlotRules, compute_free_slots};

pub struct GoogleCalendarClient {
    http: Client,
    base_url: String,
    calendar_id: String,
    token: String,
    rules: SlotRules,
}

impl GoogleCalendarClient {
    pub fn from_config(config: &CalendarConfig, rules: SlotRules) -> Result<Self, CalendarError> {
        debug!(calendar_id = %config.calendar_id, token_env = %config.token_env, "GoogleCalendarClient::from_config: called");
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| CalendarError::MissingToken(config.token_env.clone()))?;
        Self::new(config, token, rules)
    }

    pub fn new(config: &CalendarConfig, token: String, rules: SlotRules) -> Result<Self, CalendarError> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent("LeadFlow/0.1")
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            calendar_id: config.calendar_id.clone(),
            token,
            rules,
        })
    }

    /// `{base}/calendars/{id}/events`, with the calendar id percent-encoded
    fn events_url(&self) -> Result<Url, CalendarError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| CalendarError::InvalidResponse(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| CalendarError::InvalidResponse(format!("base url cannot have a path: {}", self.base_url)))?
            .pop_if_empty()
            .extend(["calendars", self.calendar_id.as_str(), "events"]);
        Ok(url)
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, CalendarError> {
        let response = request.bearer_auth(&self.token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CalendarError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn busy_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<TimeSlot>, CalendarError> {
        let time_min = start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let time_max = end.to_rfc3339_opts(SecondsFormat::Secs, true);
        let request = self.http.get(self.events_url()?).query(&[
            ("timeMin", time_min.as_str()),
            ("timeMax", time_max.as_str()),
            ("singleEvents", "true"),
            ("orderBy", "startTime"),
        ]);
        let list: EventList = self.execute(request).await?.json().await?;
        Ok(list.items.iter().filter_map(EventItem::busy_slot).collect())
    }
}

#[derive(Debug, Default, Deserialize)]
struct EventList {
    #[serde(default)]
    items: Vec<EventItem>,
}

#[derive(Debug, Deserialize)]
struct EventItem {
    start: Option<EventTime>,
    end: Option<EventTime>,
    #[serde(default)]
    transparency: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventTime {
    date_time: Option<DateTime<Utc>>,
    /// All-day events carry a date only
    date: Option<NaiveDate>,
}

impl EventTime {
    fn instant(&self) -> Option<DateTime<Utc>> {
        self.date_time.or_else(|| {
            self.date
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| Utc.from_utc_datetime(&naive))
        })
    }
}

impl EventItem {
    /// Transparent events do not block time
    fn busy_slot(&self) -> Option<TimeSlot> {
        if self.transparency.as_deref() == Some("transparent") {
            return None;
        }
        let start = self.start.as_ref()?.instant()?;
        let end = self.end.as_ref()?.instant()?;
        (start < end).then(|| TimeSlot::new(start, end))
    }
}

#[derive(Debug, Deserialize)]
struct CreatedEvent {
    id: Option<String>,
}

#[async_trait]
impl Calendar for GoogleCalendarClient {
    async fn find_free_slots(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        duration_minutes: u32,
    ) -> Result<Vec<TimeSlot>, CalendarError> {
        debug!(%start, %end, duration_minutes, "GoogleCalendarClient::find_free_slots: called");
        let busy = self.busy_between(start, end).await?;
        Ok(compute_free_slots(&busy, start, end, duration_minutes, &self.rules))
    }

    async fn create_event(
        &self,
        summary: &str,
        slot: TimeSlot,
        attendees: &[String],
    ) -> Result<Option<String>, CalendarError> {
        debug!(%summary, start = %slot.start, "GoogleCalendarClient::create_event: called");
        let body = json!({
            "summary": summary,
            "start": { "dateTime": slot.start.to_rfc3339_opts(SecondsFormat::Secs, true) },
            "end": { "dateTime": slot.end.to_rfc3339_opts(SecondsFormat::Secs, true) },
            "attendees": attendees.iter().map(|email| json!({ "email": email })).collect::<Vec<_>>(),
        });
        let request = self
            .http
            .post(self.events_url()?)
            .query(&[("sendUpdates", "all")])
            .json(&body);
        let created: CreatedEvent = self.execute(request).await?.json().await?;
        if created.id.is_none() {
            warn!(%summary, "Calendar accepted the event but returned no id");
        }
        Ok(created.id)
    }
}
