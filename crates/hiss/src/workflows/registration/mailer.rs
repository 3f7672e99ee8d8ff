//! Outbound email transports.

use std::future::Future;

use tracing::{debug, info};

use super::email::EmailMessage;

/// Delivery failure for a single message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MailError {
    #[error("mail transport unavailable: {0}")]
    Transport(String),
    #[error("mail provider rejected message (status {status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Transport abstraction so the notifier can be exercised without a provider.
pub trait Mailer: Send + Sync {
    fn send(&self, message: &EmailMessage) -> impl Future<Output = Result<(), MailError>> + Send;

    /// Deliver a batch, returning one result per message in input order.
    fn send_batch(
        &self,
        messages: &[EmailMessage],
    ) -> impl Future<Output = Vec<Result<(), MailError>>> + Send {
        async move {
            let mut results = Vec::with_capacity(messages.len());
            for message in messages {
                results.push(self.send(message).await);
            }
            results
        }
    }
}

/// Mailgun HTTP API transport.
#[derive(Debug, Clone)]
pub struct MailgunMailer {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    from: String,
}

impl MailgunMailer {
    pub fn new(base_url: &str, domain: &str, api_key: String, from: String) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, domain, api_key, from)
    }

    pub fn with_client(
        http: reqwest::Client,
        base_url: &str,
        domain: &str,
        api_key: String,
        from: String,
    ) -> Self {
        let endpoint = format!("{}/v3/{}/messages", base_url.trim_end_matches('/'), domain);
        debug!(%endpoint, "mailgun transport configured");
        Self {
            http,
            endpoint,
            api_key,
            from,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Mailer for MailgunMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        let params = [
            ("from", self.from.as_str()),
            ("to", message.to.as_str()),
            ("subject", message.subject.as_str()),
            ("text", message.text_body.as_str()),
            ("html", message.html_body.as_str()),
            ("o:tag", message.template),
        ];

        let response = self
            .http
            .post(&self.endpoint)
            .basic_auth("api", Some(&self.api_key))
            .form(&params)
            .send()
            .await
            .map_err(|err| MailError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!(to = %message.to, template = message.template, "mail accepted by provider");
        Ok(())
    }
}

/// Development transport that only writes the message to the log.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        info!(
            to = %message.to,
            subject = %message.subject,
            template = message.template,
            "mail delivery skipped (no provider configured)"
        );
        Ok(())
    }
}
