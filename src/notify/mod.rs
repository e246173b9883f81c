//! Mail delivery.
//!
//! The job only depends on [`Notifier`]; [`HttpMailer`] talks to a JSON
//! mail API and [`LogNotifier`] stands in during dry runs.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Errors from a single delivery attempt.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("no recipients")]
    NoRecipients,
    #[error("mail request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("mail API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Sends a message to a set of recipients.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipients: &[String], subject: &str, body: &str)
        -> Result<(), NotifyError>;
}

/// Settings for the HTTP mail API.
#[derive(Debug, Clone)]
pub struct MailerConfig {
    pub api_url: String,
    pub api_key: String,
    pub from: String,
    pub timeout_seconds: u64,
}

/// Mail API request body.
#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    html: &'a str,
}

/// Delivers mail through an HTTP API with bearer authentication.
pub struct HttpMailer {
    config: MailerConfig,
    client: Client,
}

impl HttpMailer {
    pub fn new(config: MailerConfig) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl Notifier for HttpMailer {
    async fn notify(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        if recipients.is_empty() {
            return Err(NotifyError::NoRecipients);
        }

        let request = SendRequest {
            from: &self.config.from,
            to: recipients,
            subject,
            html: body,
        };

        debug!("POST {} for {:?}", self.config.api_url, recipients);
        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status {
                status: status.as_u16(),
                body,
            });
        }

        info!("Mail sent: {}", subject);
        Ok(())
    }
}

/// Logs messages instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        if recipients.is_empty() {
            return Err(NotifyError::NoRecipients);
        }
        info!(
            "[dry-run] would mail {:?}: {} ({} bytes)",
            recipients,
            subject,
            body.len()
        );
        Ok(())
    }
}

#[cfg(test)]
pub use recording::{RecordingNotifier, SentMail};

#[cfg(test)]
mod recording {
    use super::{NotifyError, Notifier};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SentMail {
        pub recipients: Vec<String>,
        pub subject: String,
    }

    /// Records every message; fails for configured recipients.
    #[derive(Clone, Default)]
    pub struct RecordingNotifier {
        sent: Arc<Mutex<Vec<SentMail>>>,
        failing: Arc<Mutex<HashSet<String>>>,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_for(&self, recipient: &str) {
            self.failing.lock().unwrap().insert(recipient.to_string());
        }

        pub fn sent(&self) -> Vec<SentMail> {
            self.sent.lock().unwrap().clone()
        }

        pub fn count_subject(&self, needle: &str) -> usize {
            self.sent()
                .iter()
                .filter(|m| m.subject.contains(needle))
                .count()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(
            &self,
            recipients: &[String],
            subject: &str,
            _body: &str,
        ) -> Result<(), NotifyError> {
            let failing = self.failing.lock().unwrap();
            if recipients.iter().any(|r| failing.contains(r)) {
                return Err(NotifyError::Status {
                    status: 500,
                    body: "rejected".to_string(),
                });
            }
            drop(failing);
            self.sent.lock().unwrap().push(SentMail {
                recipients: recipients.to_vec(),
                subject: subject.to_string(),
            });
            Ok(())
        }
    }
}
