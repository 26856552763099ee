//! LeadFlow - lead lifecycle orchestrator
//!
//! LeadFlow moves imported sales leads through a fixed lifecycle: scoring,
//! personalized outreach, reply interpretation, meeting scheduling, follow-ups
//! and archiving. Each stage is a batch job over the leads currently at its
//! precondition status.
//!
//! # Core Concepts
//!
//! - **One status per lead**: every change goes through [`lifecycle::LeadStateMachine`]
//! - **Persist per lead**: outcomes are written one lead at a time, so a crash loses little
//! - **Shared credentials**: workers take API keys from a [`credentials::CredentialPool`]
//!   and pace calls through a [`ratelimit::RateLimiter`]
//! - **Swappable collaborators**: reasoning, mail and calendar sit behind traits
//!
//! # Modules
//!
//! - [`orchestrator`] - run order, per-stage dispatch, metrics and the run lock
//! - [`stages`] - the processing function of each stage
//! - [`dispatch`] - batch planning and the bounded worker pool
//! - [`state`] - actor over the lead store
//! - [`reasoning`], [`mail`], [`calendar`] - external collaborators
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod calendar;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod domain;
pub mod import;
pub mod lifecycle;
pub mod llm;
pub mod mail;
pub mod orchestrator;
pub mod prompts;
pub mod ratelimit;
pub mod reasoning;
pub mod stages;
pub mod state;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use config::Config;
pub use credentials::{CredentialPool, CredentialStats};
pub use dispatch::{BatchPlanner, Dispatcher};
pub use domain::{Filter, FilterOp, IndexValue, Intent, Lead, LeadStatus, Priority, Record, Store};
pub use import::{ImportReport, import_file};
pub use lifecycle::{LeadStateMachine, Stage, StageOutcome, TransitionError};
pub use orchestrator::{MetricsSnapshot, Orchestrator, RunReport, RunMetrics, StageReport};
pub use ratelimit::{RateLimitScope, RateLimiter};
pub use stages::{Collaborators, StageWorker};
pub use state::{LeadStorage, StateCommand, StateError, StateManager, StateResponse};
