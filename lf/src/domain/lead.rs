//! Lead domain type
//!
//! A lead is created once at import time with status `new` and is only
//! mutated through lifecycle transitions afterwards. Identity, status, the
//! qualified flag and the communication history are private: they are
//! written by `crate::lifecycle` and read through accessors everywhere else.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, FixedOffset, Utc};
use leadstore::{IndexValue, Record, now_ms};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::id::generate_id;
use super::priority::Priority;
use super::status::{Intent, LeadStatus};

pub const COMPANY_KEYS: &[&str] = &["company", "company_name"];
pub const CONTACT_KEYS: &[&str] = &["name", "contact_person", "contact"];
pub const TITLE_KEYS: &[&str] = &["job_title", "title"];

/// Opaque key/value bag from import (company, title, email, ...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawAttributes(BTreeMap<String, Value>);

impl RawAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Non-empty string value for a key
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Integer value for a key, accepting numeric strings
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().replace(',', "").parse().ok(),
            _ => None,
        }
    }

    /// First non-empty string among alias keys
    pub fn get_first_str(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| self.get_str(key))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

impl From<serde_json::Map<String, Value>> for RawAttributes {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        Self(map.into_iter().collect())
    }
}

impl FromIterator<(String, Value)> for RawAttributes {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Kind of an entry in the communication history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    OutreachEmail,
    FollowUpEmail,
    InboundReply,
    OutboundScheduling,
}

impl std::fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::OutreachEmail => "outreach_email",
            Self::FollowUpEmail => "follow_up_email",
            Self::InboundReply => "inbound_reply",
            Self::OutboundScheduling => "outbound_scheduling",
        };
        write!(f, "{}", s)
    }
}

/// One entry in a lead's append-only communication history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub kind: InteractionKind,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl Interaction {
    pub fn new(kind: InteractionKind, payload: Value) -> Self {
        Self {
            kind,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// String field from the payload
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

/// A bookable calendar window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeSlot {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Human-readable form in a fixed UTC offset, e.g. `Tuesday, March 4 at 10:00 (UTC+01:00)`
    pub fn describe(&self, offset: FixedOffset) -> String {
        let local = self.start.with_timezone(&offset);
        format!("{} (UTC{})", local.format("%A, %B %-d at %H:%M"), offset)
    }
}

/// Scheduling state attached to a lead
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeetingDetails {
    /// Slots offered to the lead
    #[serde(default)]
    pub proposed_slots: Vec<TimeSlot>,

    /// Time the lead confirmed, as they stated it
    #[serde(default)]
    pub confirmed_time: Option<String>,

    /// Booked slot
    #[serde(default)]
    pub slot: Option<TimeSlot>,

    /// Calendar event reference once booked
    #[serde(default)]
    pub event_id: Option<String>,
}

/// A prospect moving through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    id: String,

    pub attributes: RawAttributes,

    status: LeadStatus,

    score: Option<u8>,

    qualified: bool,

    #[serde(default)]
    pub score_reasoning: Option<String>,

    #[serde(default)]
    pub matched_criteria: BTreeMap<String, bool>,

    #[serde(default)]
    pub message_subject: Option<String>,

    #[serde(default)]
    pub personalized_message: Option<String>,

    #[serde(default)]
    history: Vec<Interaction>,

    #[serde(default)]
    pub intent: Option<Intent>,

    #[serde(default)]
    pub meeting: Option<MeetingDetails>,

    #[serde(default)]
    pub last_outreach_at: Option<DateTime<Utc>>,

    /// Follow-ups sent since the original outreach
    #[serde(default)]
    pub follow_up_count: u32,

    #[serde(default)]
    pub last_error: Option<String>,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,

    /// Last update timestamp (Unix milliseconds)
    pub updated_at: i64,
}

impl Lead {
    /// Create a new lead with a specific ID
    pub fn new(id: impl Into<String>, attributes: RawAttributes) -> Self {
        let id = id.into();
        debug!(%id, "Lead::new: called");
        let now = now_ms();
        Self {
            id,
            attributes,
            status: LeadStatus::New,
            score: None,
            qualified: false,
            score_reasoning: None,
            matched_criteria: BTreeMap::new(),
            message_subject: None,
            personalized_message: None,
            history: Vec::new(),
            intent: None,
            meeting: None,
            last_outreach_at: None,
            follow_up_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a new lead with an ID derived from its company or email
    pub fn from_attributes(attributes: RawAttributes) -> Self {
        let seed = attributes
            .get_first_str(COMPANY_KEYS)
            .or_else(|| attributes.get_str("email"))
            .or_else(|| attributes.get_first_str(CONTACT_KEYS))
            .unwrap_or("")
            .to_string();
        Self::new(generate_id("lead", &seed), attributes)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> LeadStatus {
        self.status
    }

    pub fn score(&self) -> Option<u8> {
        self.score
    }

    pub fn qualified(&self) -> bool {
        self.qualified
    }

    pub fn history(&self) -> &[Interaction] {
        &self.history
    }

    pub fn email(&self) -> Option<&str> {
        self.attributes.get_str("email")
    }

    /// Best human-readable label for logs and output
    pub fn display_name(&self) -> &str {
        self.attributes
            .get_first_str(CONTACT_KEYS)
            .or_else(|| self.attributes.get_first_str(COMPANY_KEYS))
            .or_else(|| self.email())
            .unwrap_or(&self.id)
    }

    /// Most recent history entry of a kind
    pub fn last_interaction(&self, kind: InteractionKind) -> Option<&Interaction> {
        self.history.iter().rev().find(|i| i.kind == kind)
    }

    pub fn company(&self) -> Option<&str> {
        self.attributes.get_first_str(COMPANY_KEYS)
    }

    pub fn contact_name(&self) -> Option<&str> {
        self.attributes.get_first_str(CONTACT_KEYS)
    }

    pub fn job_title(&self) -> Option<&str> {
        self.attributes.get_first_str(TITLE_KEYS)
    }

    pub fn priority(&self, high_threshold: u8) -> Priority {
        Priority::for_score(self.score, high_threshold)
    }

    pub(crate) fn set_status(&mut self, status: LeadStatus) {
        debug!(id = %self.id, from = %self.status, to = %status, "Lead::set_status: called");
        self.status = status;
    }

    pub(crate) fn set_score(&mut self, score: u8, qualified: bool) {
        self.score = Some(score);
        self.qualified = qualified;
    }

    pub(crate) fn push_interaction(&mut self, interaction: Interaction) {
        self.history.push(interaction);
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = now_ms();
    }
}

impl Record for Lead {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "leads"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("status".to_string(), IndexValue::String(self.status.to_string()));
        fields.insert("qualified".to_string(), IndexValue::Bool(self.qualified));
        if let Some(email) = self.email() {
            fields.insert("email".to_string(), IndexValue::String(email.to_lowercase()));
        }
        fields
    }
}
