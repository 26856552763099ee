//! CLI command definitions and output rendering

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::debug;

use crate::domain::{Lead, LeadStatus};
use crate::import::ImportReport;
use crate::lifecycle::Stage;
use crate::orchestrator::{RunReport, StageReport};

/// LeadFlow - lead lifecycle orchestrator
#[derive(Parser)]
#[command(
    name = "lf",
    about = "Lead lifecycle orchestrator: scoring, outreach, reply triage and scheduling",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run every stage once, in priority order
    Run {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Run a single stage
    Stage {
        /// Stage name (score, personalize, outreach, interpret-reply, offer-slots,
        /// book-meeting, archive, detect-follow-up, send-follow-up)
        stage: Stage,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Run on the configured schedule until interrupted
    Serve,

    /// Import leads from a JSON array or JSON lines file
    Import {
        /// File to import
        file: PathBuf,
    },

    /// List leads
    Leads {
        /// Filter by status (e.g. new, scored, outreach_sent)
        #[arg(short, long)]
        status: Option<LeadStatus>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show one lead in full
    Show {
        /// Lead ID (or partial match)
        id: String,
    },
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("leadflow")
        .join("logs")
        .join("leadflow.log")
}

/// Output format for report and listing commands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

fn colored_status(status: LeadStatus) -> colored::ColoredString {
    let text = status.as_str();
    match status {
        LeadStatus::MeetingBooked => text.green().bold(),
        LeadStatus::Interested | LeadStatus::MeetingTimeConfirmed | LeadStatus::SchedulingInProgress => text.green(),
        LeadStatus::Failed
        | LeadStatus::SchedulingFailed
        | LeadStatus::BookingFailed
        | LeadStatus::FollowUpFailed => text.red(),
        LeadStatus::NotInterested | LeadStatus::WrongPerson | LeadStatus::Archived => text.dimmed(),
        LeadStatus::NeedsClarification | LeadStatus::FollowUpDue => text.yellow(),
        _ => text.cyan(),
    }
}

/// One line per stage
pub fn render_stage_report(report: &StageReport) -> String {
    let mut line = format!(
        "{:<18} eligible {:>3}  processed {:>3}  qualified {:>3}  failed {:>3}  rejected {:>3}  repeats {:>3}  skipped {:>3}",
        report.stage.as_str().bold(),
        report.eligible,
        report.processed,
        report.qualified,
        report.failed,
        report.rejected,
        report.repeats,
        report.skipped,
    );
    if let Some(error) = &report.error {
        line.push_str(&format!("  {}", error.red()));
    }
    line
}

pub fn render_run_report(report: &RunReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{} at {} ({} ms)\n\n",
        "Run".bold(),
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        report.duration_ms
    ));
    for stage in &report.stages {
        out.push_str(&render_stage_report(stage));
        out.push('\n');
    }

    let m = &report.metrics;
    out.push_str(&format!("\n{}\n", "Metrics".bold()));
    for (name, value) in [
        ("processed", m.processed),
        ("qualified", m.qualified),
        ("messages generated", m.messages_generated),
        ("emails sent", m.emails_sent),
        ("replies processed", m.replies_processed),
        ("interested", m.interested),
        ("not interested", m.not_interested),
        ("wrong person", m.wrong_person),
        ("meetings booked", m.meetings_booked),
        ("follow-ups sent", m.follow_ups_sent),
        ("archived", m.archived),
        ("failed", m.failed),
        ("rejected", m.rejected),
        ("repeats ignored", m.repeats),
    ] {
        out.push_str(&format!("  {:<20} {}\n", name, value));
    }

    if !report.credentials.is_empty() {
        out.push_str(&format!("\n{}\n", "Credentials".bold()));
        for c in &report.credentials {
            out.push_str(&format!(
                "  {:<12} calls {:>4}  errors {:>3}  ({:.1}%)\n",
                c.label,
                c.calls,
                c.errors,
                c.error_rate * 100.0
            ));
        }
    }
    out
}

/// Table of leads, one per line
pub fn render_leads(leads: &[Lead]) -> String {
    if leads.is_empty() {
        return "No leads".dimmed().to_string();
    }
    let mut out = format!(
        "{:<32} {:<24} {:>5}  {}\n",
        "ID".bold(),
        "STATUS".bold(),
        "SCORE".bold(),
        "COMPANY".bold()
    );
    for lead in leads {
        let score = lead.score().map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:<32} {:<24} {:>5}  {}\n",
            lead.id(),
            colored_status(lead.status()),
            score,
            lead.company().unwrap_or("-")
        ));
    }
    out
}

/// Full view of one lead
pub fn render_lead(lead: &Lead) -> String {
    let mut out = format!("{} {}\n", "Lead".bold(), lead.id());
    out.push_str(&format!("  status     {}\n", colored_status(lead.status())));
    out.push_str(&format!("  contact    {}\n", lead.display_name()));
    if let Some(email) = lead.email() {
        out.push_str(&format!("  email      {}\n", email));
    }
    if let Some(company) = lead.company() {
        out.push_str(&format!("  company    {}\n", company));
    }
    if let Some(score) = lead.score() {
        let qualified = if lead.qualified() { "qualified".green() } else { "not qualified".dimmed() };
        out.push_str(&format!("  score      {} ({})\n", score, qualified));
    }
    if let Some(reasoning) = &lead.score_reasoning {
        out.push_str(&format!("  reasoning  {}\n", reasoning));
    }
    if let Some(intent) = lead.intent {
        out.push_str(&format!("  intent     {}\n", intent));
    }
    if let Some(meeting) = &lead.meeting {
        if let Some(slot) = &meeting.slot {
            out.push_str(&format!("  meeting    {} - {}\n", slot.start, slot.end));
        } else if !meeting.proposed_slots.is_empty() {
            out.push_str(&format!("  offered    {} slot(s)\n", meeting.proposed_slots.len()));
        }
    }
    if lead.follow_up_count > 0 {
        out.push_str(&format!("  follow-ups {}\n", lead.follow_up_count));
    }
    if let Some(error) = &lead.last_error {
        out.push_str(&format!("  error      {}\n", error.red()));
    }
    if !lead.history().is_empty() {
        out.push_str(&format!("\n{}\n", "History".bold()));
        for interaction in lead.history() {
            out.push_str(&format!(
                "  {}  {}\n",
                interaction.timestamp.format("%Y-%m-%d %H:%M"),
                interaction.kind
            ));
        }
    }
    out
}

pub fn render_import_report(report: &ImportReport) -> String {
    let mut out = format!("Imported {} lead(s)\n", report.imported.len().to_string().green());
    if !report.duplicates.is_empty() {
        out.push_str(&format!(
            "Skipped {} duplicate(s): {}\n",
            report.duplicates.len().to_string().yellow(),
            report.duplicates.join(", ")
        ));
    }
    out
}
