//! ReasoningService backed by an LLM client

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::{Config, IcpConfig, IcpWeights};
use crate::credentials::Credential;
use crate::domain::{Intent, RawAttributes, Verdict};
use crate::llm::{CompletionRequest, LlmClient};
use crate::prompts::PromptLoader;

use super::extract::extract_json;
use super::{Draft, DraftContext, IntentResult, LeadScore, ReasoningError, ReasoningService};

/// Who we are and what we sell, rendered into prompts
#[derive(Debug, Clone)]
pub struct ReasonerProfile {
    pub sender_name: String,
    pub sender_company: String,
    pub offering: String,
    pub qualification_threshold: u8,
    pub utc_offset: FixedOffset,
    pub icp: Option<IcpConfig>,
    pub max_tokens: u32,
}

impl ReasonerProfile {
    pub fn from_config(config: &Config) -> eyre::Result<Self> {
        Ok(Self::with_offset(config, config.pipeline.utc_offset()?))
    }

    fn with_offset(config: &Config, utc_offset: FixedOffset) -> Self {
        let pipeline = &config.pipeline;
        Self {
            sender_name: pipeline.sender_name.clone(),
            sender_company: pipeline.sender_company.clone(),
            offering: pipeline.offering.clone(),
            qualification_threshold: pipeline.qualification_threshold,
            utc_offset,
            icp: config.scoring.icp.clone(),
            max_tokens: config.llm.max_tokens,
        }
    }
}

impl Default for ReasonerProfile {
    fn default() -> Self {
        Self::with_offset(&Config::default(), Utc.fix())
    }
}

/// Prompts an LLM and parses its JSON replies
pub struct LlmReasoner {
    client: Arc<dyn LlmClient>,
    prompts: PromptLoader,
    profile: ReasonerProfile,
}

impl LlmReasoner {
    pub fn new(client: Arc<dyn LlmClient>, prompts: PromptLoader, profile: ReasonerProfile) -> Self {
        debug!(sender = %profile.sender_name, icp = profile.icp.is_some(), "LlmReasoner::new: called");
        Self {
            client,
            prompts,
            profile,
        }
    }

    fn render<C: Serialize>(&self, name: &str, context: &C) -> Result<String, ReasoningError> {
        self.prompts
            .render(name, context)
            .map_err(|e| ReasoningError::Prompt(e.to_string()))
    }

    async fn ask(&self, credential: &Credential, system: String, user: String) -> Result<Value, ReasoningError> {
        let request = CompletionRequest::new(system, user)
            .with_max_tokens(self.profile.max_tokens)
            .json();
        let response = self.client.complete(credential.secret(), request).await?;
        let content = response
            .content
            .ok_or_else(|| ReasoningError::Malformed("empty completion".to_string()))?;
        extract_json(&content)
    }

    fn sender_context(&self) -> Value {
        json!({
            "sender_name": self.profile.sender_name,
            "sender_company": self.profile.sender_company,
            "offering": self.profile.offering,
        })
    }
}

#[derive(Serialize)]
struct IcpView {
    industries: String,
    employee_min: i64,
    employee_max: i64,
    locations: String,
    job_titles: String,
    excluded_titles: String,
    preferred_crms: String,
    weights: WeightsView,
    excluded_penalty: i32,
}

/// Snake-case weight names for templates
#[derive(Serialize)]
struct WeightsView {
    base_score: i32,
    industry_match: i32,
    employee_count_within_range: i32,
    location_match: i32,
    job_title_match: i32,
}

impl From<&IcpWeights> for WeightsView {
    fn from(w: &IcpWeights) -> Self {
        Self {
            base_score: w.base_score,
            industry_match: w.industry_match,
            employee_count_within_range: w.employee_count_within_range,
            location_match: w.location_match,
            job_title_match: w.job_title_match,
        }
    }
}

impl IcpView {
    fn new(icp: &IcpConfig) -> Self {
        Self {
            industries: format_list(&icp.industries),
            employee_min: icp.employee_count.min,
            employee_max: icp.employee_count.max,
            locations: format_list(&icp.locations),
            job_titles: format_list(&icp.job_titles),
            excluded_titles: format_list(&icp.excluded_titles),
            preferred_crms: format_list(&icp.preferred_crms),
            weights: WeightsView::from(&icp.weights),
            excluded_penalty: icp.weights.excluded_title.abs(),
        }
    }
}

fn format_list(items: &[String]) -> String {
    if items.is_empty() {
        return "None specified".to_string();
    }
    items.iter().map(|i| format!("\"{}\"", i)).collect::<Vec<_>>().join(", ")
}

#[derive(Debug, Deserialize)]
struct RawAssessment {
    #[serde(alias = "score")]
    lead_score: f64,
    #[serde(alias = "status")]
    qualification_status: String,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    matched_criteria: BTreeMap<String, bool>,
}

#[derive(Debug, Deserialize)]
struct RawIntent {
    intent: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    confirmed_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDraft {
    #[serde(default)]
    subject: String,
    #[serde(alias = "email_body", alias = "follow_up_body")]
    body: String,
}

/// `"needs review"` / `"Needs-Review"` -> `NEEDS_REVIEW`
fn normalize_token(raw: &str) -> String {
    raw.trim().to_uppercase().replace([' ', '-'], "_")
}

fn parse_verdict(raw: &str) -> Result<Verdict, ReasoningError> {
    serde_json::from_value(Value::String(normalize_token(raw)))
        .map_err(|_| ReasoningError::Malformed(format!("unknown qualification status: {}", raw)))
}

fn parse_intent(raw: &str) -> Intent {
    serde_json::from_value(Value::String(normalize_token(raw))).unwrap_or_else(|_| {
        warn!(intent = %raw, "Unknown intent from model, treating as needs clarification");
        Intent::NeedsClarification
    })
}

/// Batch replies may be a bare array, `{"assessments": [...]}`, or a single
/// object when one lead was sent
fn parse_assessments(value: Value, expected: usize) -> Result<Vec<LeadScore>, ReasoningError> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("assessments") {
            Some(Value::Array(items)) => items,
            Some(other) => return Err(ReasoningError::Malformed(format!("assessments is not an array: {}", other))),
            None => vec![Value::Object(map)],
        },
        other => return Err(ReasoningError::Malformed(format!("unexpected score payload: {}", other))),
    };

    if items.len() != expected {
        return Err(ReasoningError::CountMismatch {
            expected,
            got: items.len(),
        });
    }

    items
        .into_iter()
        .map(|item| {
            let raw: RawAssessment =
                serde_json::from_value(item).map_err(|e| ReasoningError::Malformed(format!("assessment: {}", e)))?;
            Ok(LeadScore {
                score: raw.lead_score.round().clamp(0.0, 100.0) as u8,
                verdict: parse_verdict(&raw.qualification_status)?,
                reasoning: raw.reasoning,
                matched_criteria: raw.matched_criteria,
            })
        })
        .collect()
}

#[async_trait]
impl ReasoningService for LlmReasoner {
    async fn score(&self, credential: &Credential, leads: &[RawAttributes]) -> Result<Vec<LeadScore>, ReasoningError> {
        debug!(%credential, count = leads.len(), "score: called");
        if leads.is_empty() {
            return Ok(Vec::new());
        }

        let system = self.render(
            "score-system",
            &json!({
                "icp": self.profile.icp.as_ref().map(IcpView::new),
                "offering": self.profile.offering,
                "threshold": self.profile.qualification_threshold,
            }),
        )?;
        let entries: Vec<Value> = leads
            .iter()
            .enumerate()
            .map(|(i, attrs)| {
                json!({
                    "position": i + 1,
                    "data": serde_json::to_string_pretty(attrs).unwrap_or_default(),
                })
            })
            .collect();
        let user = self.render("score", &json!({ "count": leads.len(), "leads": entries }))?;

        let value = self.ask(credential, system, user).await?;
        parse_assessments(value, leads.len())
    }

    async fn classify_intent(
        &self,
        credential: &Credential,
        original_message: &str,
        reply: &str,
    ) -> Result<IntentResult, ReasoningError> {
        debug!(%credential, reply_len = reply.len(), "classify_intent: called");
        let system = self.render("classify-system", &json!({}))?;
        let user = self.render("classify", &json!({ "original": original_message, "reply": reply }))?;

        let value = self.ask(credential, system, user).await?;
        let raw: RawIntent = serde_json::from_value(value).map_err(|e| ReasoningError::Malformed(e.to_string()))?;
        let confirmed_time = raw
            .confirmed_time
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case("null"));

        Ok(IntentResult {
            intent: parse_intent(&raw.intent),
            summary: raw.summary,
            confirmed_time,
        })
    }

    async fn draft_message(&self, credential: &Credential, context: &DraftContext) -> Result<Draft, ReasoningError> {
        debug!(%credential, kind = context.kind(), "draft_message: called");
        let mut vars = self.sender_context();
        match context {
            DraftContext::Outreach {
                attributes,
                score_reasoning,
            } => {
                vars["lead"] = json!(serde_json::to_string_pretty(attributes).unwrap_or_default());
                vars["reasoning"] = json!(score_reasoning);
            }
            DraftContext::FollowUp {
                original_subject,
                original_body,
                silent_hours,
                follow_up_number,
            } => {
                vars["original_subject"] = json!(original_subject);
                vars["original_body"] = json!(original_body);
                vars["silent_hours"] = json!(silent_hours);
                vars["follow_up_number"] = json!(follow_up_number);
            }
            DraftContext::SchedulingOffer { history, slots } => {
                let described: Vec<String> = slots.iter().map(|s| s.describe(self.profile.utc_offset)).collect();
                vars["history"] = json!(history.join("\n\n---\n\n"));
                vars["slots"] = json!(described);
                vars["timezone"] = json!(format!("UTC{}", self.profile.utc_offset));
            }
        }

        let system = self.render("draft-system", &vars)?;
        let user = self.render(context.kind(), &vars)?;
        let value = self.ask(credential, system, user).await?;
        let raw: RawDraft = serde_json::from_value(value).map_err(|e| ReasoningError::Malformed(e.to_string()))?;
        if raw.body.trim().is_empty() {
            return Err(ReasoningError::Malformed("draft body is empty".to_string()));
        }

        Ok(Draft {
            subject: raw.subject.trim().to_string(),
            body: raw.body.trim().to_string(),
        })
    }
}
