//! Reasoning service
//!
//! Scoring, reply classification and message drafting. Every call takes the
//! caller's credential; the service itself holds none.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::credentials::Credential;
use crate::domain::{Intent, RawAttributes, TimeSlot, Verdict};
use crate::llm::LlmError;

mod extract;
mod icp;
mod llm;

pub use extract::extract_json;
pub use icp::IcpScorer;
pub use llm::{LlmReasoner, ReasonerProfile};

/// Reasoning errors
#[derive(Debug, Error)]
pub enum ReasoningError {
    #[error("LLM call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Malformed structured output: {0}")]
    Malformed(String),

    #[error("Expected {expected} results, got {got}")]
    CountMismatch { expected: usize, got: usize },

    #[error("Prompt error: {0}")]
    Prompt(String),
}

/// Assessment of one lead
#[derive(Debug, Clone, PartialEq)]
pub struct LeadScore {
    /// 0-100
    pub score: u8,
    pub verdict: Verdict,
    pub reasoning: String,
    pub matched_criteria: BTreeMap<String, bool>,
}

/// Classification of one reply
#[derive(Debug, Clone, PartialEq)]
pub struct IntentResult {
    pub intent: Intent,
    pub summary: String,
    pub confirmed_time: Option<String>,
}

/// Subject and body of a drafted email
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub subject: String,
    pub body: String,
}

/// What a drafted message is for
#[derive(Debug, Clone, PartialEq)]
pub enum DraftContext {
    Outreach {
        attributes: RawAttributes,
        score_reasoning: Option<String>,
    },
    FollowUp {
        original_subject: String,
        original_body: String,
        silent_hours: i64,
        follow_up_number: u32,
    },
    SchedulingOffer {
        /// Conversation so far, oldest first
        history: Vec<String>,
        slots: Vec<TimeSlot>,
    },
}

impl DraftContext {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Outreach { .. } => "outreach",
            Self::FollowUp { .. } => "follow-up",
            Self::SchedulingOffer { .. } => "scheduling",
        }
    }
}

#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// One score per input, in input order
    async fn score(&self, credential: &Credential, leads: &[RawAttributes]) -> Result<Vec<LeadScore>, ReasoningError>;

    async fn classify_intent(
        &self,
        credential: &Credential,
        original_message: &str,
        reply: &str,
    ) -> Result<IntentResult, ReasoningError>;

    async fn draft_message(&self, credential: &Credential, context: &DraftContext) -> Result<Draft, ReasoningError>;
}
