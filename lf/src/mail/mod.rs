//! Outbound and inbound email
//!
//! `Mailer` is the communication collaborator. `GmailClient` talks to the
//! Gmail REST API; `DryRunMailer` only logs.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::config::{MailConfig, MailProvider};

mod dry_run;
mod gmail;

pub use dry_run::DryRunMailer;
pub use gmail::{GmailClient, build_rfc2822, decode_base64url};

/// Mail errors
#[derive(Debug, Error)]
pub enum MailError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Mail API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Access token env var {0} is not set")]
    MissingToken(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where a sent message landed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: String,
    pub thread_id: String,
}

/// An unread inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyRef {
    pub id: String,
    pub thread_id: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<SendReceipt, MailError>;

    /// Reply inside an existing thread
    async fn reply_in_thread(&self, thread_id: &str, to: &str, subject: &str, body: &str)
    -> Result<SendReceipt, MailError>;

    /// Unread messages from an address, newest first
    async fn search_replies(&self, from_address: &str) -> Result<Vec<ReplyRef>, MailError>;

    /// Plain-text body of a message
    async fn get_message_body(&self, id: &str) -> Result<String, MailError>;

    async fn mark_read(&self, id: &str) -> Result<(), MailError>;
}

/// `Re: ` prefixed subject, without doubling an existing prefix
pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    if trimmed.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("re:")) {
        trimmed.to_string()
    } else {
        format!("Re: {}", trimmed)
    }
}

/// Create the configured mailer
pub fn create_mailer(config: &MailConfig) -> Result<Arc<dyn Mailer>, MailError> {
    debug!(provider = ?config.provider, "create_mailer: called");
    match config.provider {
        MailProvider::DryRun => Ok(Arc::new(DryRunMailer::new())),
        MailProvider::Gmail => Ok(Arc::new(GmailClient::from_config(config)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_subject() {
        assert_eq!(reply_subject("Quick idea"), "Re: Quick idea");
        assert_eq!(reply_subject("RE: Quick idea"), "RE: Quick idea");
        assert_eq!(reply_subject(""), "Re: ");
    }

    #[test]
    fn test_create_mailer_default_is_dry_run() {
        assert!(create_mailer(&MailConfig::default()).is_ok());
    }

    #[test]
    fn test_create_gmail_without_token_fails() {
        let config = MailConfig {
            provider: MailProvider::Gmail,
            token_env: "LEADFLOW_TEST_UNSET_GMAIL_TOKEN".to_string(),
            ..MailConfig::default()
        };
        let err = create_mailer(&config).err().unwrap();
        assert!(matches!(err, MailError::MissingToken(_)));
    }
}
