//! Gmail REST client
//!
//! Messages go out as base64url-encoded RFC 2822. Authentication is a
//! pre-issued OAuth access token read from the environment; refreshing it is
//! left to whatever provisions the token.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::MailConfig;

use super::{MailError, Mailer, ReplyRef, SendReceipt, reply_subject};

pub struct GmailClient {
    http: Client,
    base_url: String,
    user: String,
    from_address: String,
    token: String,
}

impl GmailClient {
    pub fn from_config(config: &MailConfig) -> Result<Self, MailError> {
        debug!(user = %config.user, token_env = %config.token_env, "GmailClient::from_config: called");
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| MailError::MissingToken(config.token_env.clone()))?;
        Self::new(config, token)
    }

    pub fn new(config: &MailConfig, token: String) -> Result<Self, MailError> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent("LeadFlow/0.1")
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            user: config.user.clone(),
            from_address: config.from_address.clone(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/users/{}/{}", self.base_url, self.user, path)
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, MailError> {
        let response = request.bearer_auth(&self.token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            debug!(%status, "GmailClient: API error");
            return Err(MailError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn send_raw(&self, raw: String, thread_id: Option<&str>) -> Result<SendReceipt, MailError> {
        let mut body = json!({ "raw": raw });
        if let Some(thread_id) = thread_id {
            body["threadId"] = json!(thread_id);
        }
        let response = self
            .execute(self.http.post(self.url("messages/send")).json(&body))
            .await?;
        let sent: GmailMessageRef = response.json().await?;
        Ok(SendReceipt {
            message_id: sent.id,
            thread_id: sent.thread_id,
        })
    }
}

/// Render a plain-text RFC 2822 message and base64url-encode it
pub fn build_rfc2822(from: &str, to: &str, subject: &str, body: &str) -> Result<String, MailError> {
    if to.trim().is_empty() || to.contains(['\r', '\n']) {
        return Err(MailError::InvalidMessage(format!("bad recipient: {:?}", to)));
    }
    let subject = subject.replace(['\r', '\n'], " ");

    let mut message = String::new();
    if !from.trim().is_empty() {
        message.push_str(&format!("From: {}\r\n", from.trim()));
    }
    message.push_str(&format!("To: {}\r\n", to.trim()));
    message.push_str(&format!("Subject: {}\r\n", subject));
    message.push_str("MIME-Version: 1.0\r\n");
    message.push_str("Content-Type: text/plain; charset=\"UTF-8\"\r\n\r\n");
    message.push_str(&body.replace("\r\n", "\n").replace('\n', "\r\n"));

    Ok(URL_SAFE.encode(message.as_bytes()))
}

/// Gmail search for unread mail from exactly one sender
pub fn reply_query(from_address: &str) -> Result<String, MailError> {
    let address = from_address.trim();
    if address.is_empty() || address.contains(|c: char| c.is_whitespace() || c == '"') {
        return Err(MailError::InvalidMessage(format!("bad sender address: {:?}", from_address)));
    }
    Ok(format!("from:\"{}\" is:unread", address))
}

/// Decode Gmail's base64url body data, padded or not
pub fn decode_base64url(data: &str) -> Result<String, MailError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(data.trim().trim_end_matches('='))
        .map_err(|e| MailError::InvalidMessage(format!("body is not base64url: {}", e)))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessageRef {
    id: String,
    thread_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct GmailMessageList {
    #[serde(default)]
    messages: Vec<GmailMessageRef>,
}

#[derive(Debug, Deserialize)]
struct GmailMessage {
    #[serde(default)]
    snippet: String,
    payload: Option<GmailPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailPart {
    #[serde(default)]
    mime_type: String,
    body: Option<GmailBody>,
    #[serde(default)]
    parts: Vec<GmailPart>,
}

#[derive(Debug, Deserialize)]
struct GmailBody {
    data: Option<String>,
}

impl GmailPart {
    /// First body of a MIME type, depth first
    fn find(&self, mime_type: &str) -> Option<&str> {
        if self.mime_type.eq_ignore_ascii_case(mime_type)
            && let Some(data) = self.body.as_ref().and_then(|b| b.data.as_deref())
        {
            return Some(data);
        }
        self.parts.iter().find_map(|p| p.find(mime_type))
    }
}

fn extract_text(message: &GmailMessage) -> Result<String, MailError> {
    let Some(payload) = &message.payload else {
        return Ok(message.snippet.clone());
    };
    if let Some(data) = payload.find("text/plain") {
        return decode_base64url(data);
    }
    if let Some(data) = payload.find("text/html") {
        let html = decode_base64url(data)?;
        return Ok(html2md::rewrite_html(&html, false));
    }
    Ok(message.snippet.clone())
}

#[async_trait]
impl Mailer for GmailClient {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<SendReceipt, MailError> {
        debug!(%to, %subject, "GmailClient::send: called");
        let raw = build_rfc2822(&self.from_address, to, subject, body)?;
        self.send_raw(raw, None).await
    }

    async fn reply_in_thread(
        &self,
        thread_id: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<SendReceipt, MailError> {
        debug!(%to, %thread_id, "GmailClient::reply_in_thread: called");
        let raw = build_rfc2822(&self.from_address, to, &reply_subject(subject), body)?;
        self.send_raw(raw, Some(thread_id)).await
    }

    async fn search_replies(&self, from_address: &str) -> Result<Vec<ReplyRef>, MailError> {
        debug!(%from_address, "GmailClient::search_replies: called");
        let query = reply_query(from_address)?;
        let response = self
            .execute(self.http.get(self.url("messages")).query(&[("q", query.as_str())]))
            .await?;
        let list: GmailMessageList = response.json().await?;
        Ok(list
            .messages
            .into_iter()
            .map(|m| ReplyRef {
                id: m.id,
                thread_id: m.thread_id,
            })
            .collect())
    }

    async fn get_message_body(&self, id: &str) -> Result<String, MailError> {
        debug!(%id, "GmailClient::get_message_body: called");
        let response = self
            .execute(
                self.http
                    .get(self.url(&format!("messages/{}", id)))
                    .query(&[("format", "full")]),
            )
            .await?;
        let message: GmailMessage = response.json().await?;
        extract_text(&message)
    }

    async fn mark_read(&self, id: &str) -> Result<(), MailError> {
        debug!(%id, "GmailClient::mark_read: called");
        self.execute(
            self.http
                .post(self.url(&format!("messages/{}/modify", id)))
                .json(&json!({ "removeLabelIds": ["UNREAD"] })),
        )
        .await?;
        Ok(())
    }
}
