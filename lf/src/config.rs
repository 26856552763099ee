//! LeadFlow configuration types and loading

use chrono::FixedOffset;
use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::ratelimit::RateLimitScope;

/// Main LeadFlow configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level used when `--log-level` is not given
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Reasoning service (LLM) configuration
    pub llm: LlmConfig,

    /// Where API credentials come from
    pub credentials: CredentialsConfig,

    /// Call pacing per credential
    #[serde(rename = "rate-limit")]
    pub rate_limit: RateLimitConfig,

    /// Worker pool and batching
    pub dispatch: DispatchConfig,

    /// Lifecycle thresholds and timings
    pub pipeline: PipelineConfig,

    /// Mail provider
    pub mail: MailConfig,

    /// Calendar provider
    pub calendar: CalendarConfig,

    /// Storage configuration
    pub storage: StorageConfig,

    /// `serve` loop timing
    pub schedule: ScheduleConfig,

    /// Lead scoring mode and ICP criteria
    pub scoring: ScoringConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    /// Credentials are checked separately when the pool is built.
    pub fn validate(&self) -> Result<()> {
        if self.dispatch.batch_size == 0 {
            return Err(eyre!("dispatch.batch-size must be at least 1"));
        }
        if self.dispatch.max_workers == 0 || self.dispatch.max_workers > 32 {
            return Err(eyre!(
                "dispatch.max-workers must be between 1 and 32 (got {})",
                self.dispatch.max_workers
            ));
        }
        if self.rate_limit.max_per_minute == 0 {
            return Err(eyre!("rate-limit.max-per-minute must be greater than 0"));
        }
        if self.pipeline.qualification_threshold > 100 {
            return Err(eyre!(
                "pipeline.qualification-threshold must be 0-100 (got {})",
                self.pipeline.qualification_threshold
            ));
        }
        if self.pipeline.business_hours_start >= self.pipeline.business_hours_end || self.pipeline.business_hours_end > 24 {
            return Err(eyre!(
                "pipeline business hours must satisfy start < end <= 24 (got {}-{})",
                self.pipeline.business_hours_start,
                self.pipeline.business_hours_end
            ));
        }
        self.pipeline.utc_offset()?;
        if self.pipeline.meeting_duration_minutes == 0 {
            return Err(eyre!("pipeline.meeting-duration-minutes must be at least 1"));
        }
        if self.schedule.interval_minutes == 0 {
            return Err(eyre!("schedule.interval-minutes must be at least 1"));
        }
        if self.scoring.mode == ScoringMode::Icp && self.scoring.icp.is_none() {
            return Err(eyre!("scoring.mode is icp but no scoring.icp section is configured"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .leadflow.yml
        let local_config = PathBuf::from(".leadflow.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/leadflow/leadflow.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("leadflow").join("leadflow.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Just the `log-level` key, read before logging is set up
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|config| config.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// LLM provider configuration (any OpenAI-compatible endpoint)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name, informational
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// API base URL (without `/chat/completions`)
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "groq".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            base_url: "https://api.groq.com/openai/v1".to_string(),
            max_tokens: 2048,
            temperature: 0.2,
            timeout_ms: 60_000,
        }
    }
}

/// Credential discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Prefix scanned as `{prefix}_1`, `{prefix}_2`, ...
    #[serde(rename = "env-prefix")]
    pub env_prefix: String,

    /// Explicit variable names; overrides the prefix scan when non-empty
    #[serde(rename = "env-vars")]
    pub env_vars: Vec<String>,

    /// Highest index probed by the prefix scan
    #[serde(rename = "max-keys")]
    pub max_keys: u32,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            env_prefix: "GROQ_API_KEY".to_string(),
            env_vars: Vec::new(),
            max_keys: 9,
        }
    }
}

/// Rate limiting for reasoning calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum calls per minute per key
    #[serde(rename = "max-per-minute")]
    pub max_per_minute: u32,

    /// `per-credential` or `global`
    pub scope: RateLimitScope,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_minute: 25,
            scope: RateLimitScope::PerCredential,
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum concurrent workers
    #[serde(rename = "max-workers")]
    pub max_workers: usize,

    /// Leads per scoring call
    #[serde(rename = "batch-size")]
    pub batch_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_workers: 3,
            batch_size: 5,
        }
    }
}

/// Lifecycle thresholds and timings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum score for a lead to be qualified
    #[serde(rename = "qualification-threshold")]
    pub qualification_threshold: u8,

    /// Interested leads at or above this score are offered slots first
    #[serde(rename = "high-priority-score")]
    pub high_priority_score: u8,

    /// Silence after outreach before a follow-up is due
    #[serde(rename = "follow-up-after-hours")]
    pub follow_up_after_hours: u64,

    /// Follow-ups sent before a silent lead is no longer chased
    #[serde(rename = "max-follow-ups")]
    pub max_follow_ups: u32,

    /// Meeting length
    #[serde(rename = "meeting-duration-minutes")]
    pub meeting_duration_minutes: u32,

    /// How many days ahead slots are searched
    #[serde(rename = "scheduling-window-days")]
    pub scheduling_window_days: u32,

    /// Slots offered per lead
    #[serde(rename = "max-slots")]
    pub max_slots: usize,

    /// First bookable hour (local)
    #[serde(rename = "business-hours-start")]
    pub business_hours_start: u32,

    /// Hour at which bookable time ends (local)
    #[serde(rename = "business-hours-end")]
    pub business_hours_end: u32,

    /// Offset of local business time from UTC
    #[serde(rename = "utc-offset-hours")]
    pub utc_offset_hours: i32,

    /// Sender name used in drafted messages
    #[serde(rename = "sender-name")]
    pub sender_name: String,

    /// Sender company used in drafted messages
    #[serde(rename = "sender-company")]
    pub sender_company: String,

    /// One-line value proposition given to the drafting prompts
    pub offering: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            qualification_threshold: 70,
            high_priority_score: 80,
            follow_up_after_hours: 48,
            max_follow_ups: 3,
            meeting_duration_minutes: 30,
            scheduling_window_days: 7,
            max_slots: 3,
            business_hours_start: 9,
            business_hours_end: 17,
            utc_offset_hours: 0,
            sender_name: "Alex".to_string(),
            sender_company: "LeadFlow".to_string(),
            offering: "an AI-assisted sales pipeline that books qualified meetings".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Local business-time offset; whole hours within -23..=23
    pub fn utc_offset(&self) -> Result<FixedOffset> {
        if !(-23..=23).contains(&self.utc_offset_hours) {
            return Err(eyre!(
                "pipeline.utc-offset-hours must be between -23 and 23 (got {})",
                self.utc_offset_hours
            ));
        }
        FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .ok_or_else(|| eyre!("pipeline.utc-offset-hours out of range: {}", self.utc_offset_hours))
    }
}

/// Which mail implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MailProvider {
    #[default]
    DryRun,
    Gmail,
}

/// Mail configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub provider: MailProvider,

    /// Environment variable holding a pre-issued OAuth access token
    #[serde(rename = "token-env")]
    pub token_env: String,

    /// Gmail user id
    pub user: String,

    #[serde(rename = "base-url")]
    pub base_url: String,

    /// From header; empty lets the provider fill it in
    #[serde(rename = "from-address")]
    pub from_address: String,

    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            provider: MailProvider::DryRun,
            token_env: "GMAIL_ACCESS_TOKEN".to_string(),
            user: "me".to_string(),
            base_url: "https://gmail.googleapis.com/gmail/v1".to_string(),
            from_address: String::new(),
            timeout_ms: 30_000,
        }
    }
}

/// Which calendar implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CalendarProvider {
    #[default]
    DryRun,
    Google,
}

/// Calendar configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    pub provider: CalendarProvider,

    /// Environment variable holding a pre-issued OAuth access token
    #[serde(rename = "token-env")]
    pub token_env: String,

    #[serde(rename = "calendar-id")]
    pub calendar_id: String,

    #[serde(rename = "base-url")]
    pub base_url: String,

    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            provider: CalendarProvider::DryRun,
            token_env: "GOOGLE_CALENDAR_TOKEN".to_string(),
            calendar_id: "primary".to_string(),
            base_url: "https://www.googleapis.com/calendar/v3".to_string(),
            timeout_ms: 30_000,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for LeadStore data and the run lock
    #[serde(rename = "store-dir")]
    pub store_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // Use XDG data directory (~/.local/share/leadflow on Linux)
        let store_dir = dirs::data_dir()
            .map(|d| d.join("leadflow"))
            .unwrap_or_else(|| PathBuf::from(".leadstore"))
            .to_string_lossy()
            .into_owned();

        Self { store_dir }
    }
}

impl StorageConfig {
    /// Store directory with `~/` expanded
    pub fn expanded_dir(&self) -> PathBuf {
        match self.store_dir.strip_prefix("~/") {
            Some(rest) => dirs::home_dir().map(|home| home.join(rest)).unwrap_or_else(|| PathBuf::from(&self.store_dir)),
            None => PathBuf::from(&self.store_dir),
        }
    }
}

/// Scheduled run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Minutes between scheduled runs
    #[serde(rename = "interval-minutes")]
    pub interval_minutes: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { interval_minutes: 30 }
    }
}

/// How leads are scored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ScoringMode {
    /// Ask the reasoning service
    #[default]
    Llm,
    /// Local heuristic over the ICP criteria
    Icp,
}

/// Scoring configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub mode: ScoringMode,

    /// Ideal customer profile
    pub icp: Option<IcpConfig>,
}

/// Ideal customer profile criteria
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IcpConfig {
    pub industries: Vec<String>,

    #[serde(rename = "employee-count")]
    pub employee_count: EmployeeRange,

    pub locations: Vec<String>,

    #[serde(rename = "job-titles")]
    pub job_titles: Vec<String>,

    #[serde(rename = "excluded-titles")]
    pub excluded_titles: Vec<String>,

    /// CRMs the ideal customer already uses (prompt context only)
    #[serde(rename = "preferred-crms")]
    pub preferred_crms: Vec<String>,

    pub weights: IcpWeights,
}

/// Inclusive employee-count range
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmployeeRange {
    pub min: i64,
    pub max: i64,
}

impl Default for EmployeeRange {
    fn default() -> Self {
        Self { min: 50, max: 1000 }
    }
}

/// Points awarded per ICP criterion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IcpWeights {
    #[serde(rename = "base-score")]
    pub base_score: i32,

    #[serde(rename = "industry-match")]
    pub industry_match: i32,

    #[serde(rename = "employee-count-within-range")]
    pub employee_count_within_range: i32,

    #[serde(rename = "location-match")]
    pub location_match: i32,

    #[serde(rename = "job-title-match")]
    pub job_title_match: i32,

    /// Usually negative
    #[serde(rename = "excluded-title")]
    pub excluded_title: i32,
}

impl Default for IcpWeights {
    fn default() -> Self {
        Self {
            base_score: 10,
            industry_match: 25,
            employee_count_within_range: 20,
            location_match: 15,
            job_title_match: 30,
            excluded_title: -50,
        }
    }
}
