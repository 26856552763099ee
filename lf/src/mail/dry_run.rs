//! Mailer that logs instead of sending

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::info;

use super::{MailError, Mailer, ReplyRef, SendReceipt};

/// Default mailer: nothing leaves the machine and no replies ever arrive
#[derive(Debug, Default)]
pub struct DryRunMailer {
    sent: AtomicU64,
}

impl DryRunMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }

    fn next_receipt(&self, thread_id: Option<&str>) -> SendReceipt {
        let n = self.sent.fetch_add(1, Ordering::SeqCst) + 1;
        let message_id = format!("dry-run-msg-{}", n);
        SendReceipt {
            thread_id: thread_id.map(str::to_string).unwrap_or_else(|| format!("dry-run-thread-{}", n)),
            message_id,
        }
    }
}

#[async_trait]
impl Mailer for DryRunMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<SendReceipt, MailError> {
        let receipt = self.next_receipt(None);
        info!(%to, %subject, body_len = body.len(), message_id = %receipt.message_id, "Dry run: would send email");
        Ok(receipt)
    }

    async fn reply_in_thread(
        &self,
        thread_id: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<SendReceipt, MailError> {
        let receipt = self.next_receipt(Some(thread_id));
        info!(%to, %thread_id, %subject, body_len = body.len(), "Dry run: would reply in thread");
        Ok(receipt)
    }

    async fn search_replies(&self, _from_address: &str) -> Result<Vec<ReplyRef>, MailError> {
        Ok(Vec::new())
    }

    async fn get_message_body(&self, id: &str) -> Result<String, MailError> {
        Err(MailError::InvalidMessage(format!("dry run has no message {}", id)))
    }

    async fn mark_read(&self, id: &str) -> Result<(), MailError> {
        info!(%id, "Dry run: would mark message read");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dry_run_receipts() {
        let mailer = DryRunMailer::new();
        let first = mailer.send("dana@acme.test", "Hi", "Body").await.unwrap();
        let reply = mailer
            .reply_in_thread(&first.thread_id, "dana@acme.test", "Re: Hi", "Again")
            .await
            .unwrap();
        assert_eq!(reply.thread_id, first.thread_id);
        assert_ne!(reply.message_id, first.message_id);
        assert_eq!(mailer.sent_count(), 2);
        assert!(mailer.search_replies("dana@acme.test").await.unwrap().is_empty());
    }
}
