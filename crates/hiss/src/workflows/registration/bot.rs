//! Client for the chat bot that runs event check-in.
//!
//! The bot authenticates the registration service with a shared username and password carried
//! in every JSON request body.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

const BOT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BotError {
    #[error("check-in bot is not configured")]
    NotConfigured,
    #[error("check-in bot unreachable: {0}")]
    Transport(String),
    #[error("check-in bot returned status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Shared secret pair the bot and the registration service both know.
#[derive(Clone, PartialEq, Eq)]
pub struct BotCredentials {
    pub username: String,
    pub password: String,
}

impl BotCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Both halves must match and neither may be blank.
    pub fn matches(&self, username: &str, password: &str) -> bool {
        !self.username.is_empty()
            && !self.password.is_empty()
            && self.username == username
            && self.password == password
    }
}

impl std::fmt::Debug for BotCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Participant details announced to the bot when someone checks in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInNotice {
    pub discord_id: String,
    pub name: String,
    pub team_name: Option<String>,
}

/// Port for the chat bot so flows can be tested without a live server.
pub trait CheckInBot: Send + Sync {
    /// Whether the account has joined the event server.
    fn check_user(&self, discord_id: &str) -> impl Future<Output = Result<bool, BotError>> + Send;

    fn check_in(&self, notice: &CheckInNotice) -> impl Future<Output = Result<(), BotError>> + Send;
}

#[derive(Serialize)]
struct AuthenticatedBody<'a, T: Serialize> {
    #[serde(flatten)]
    payload: T,
    request_user: &'a str,
    request_pass: &'a str,
}

#[derive(Serialize)]
struct Empty {}

#[derive(Deserialize)]
struct CheckUserResponse {
    exists: bool,
}

/// `reqwest` implementation of [`CheckInBot`].
#[derive(Debug, Clone)]
pub struct DiscordBotClient {
    http: reqwest::Client,
    base_url: Option<String>,
    credentials: BotCredentials,
}

impl DiscordBotClient {
    /// `base_url` of `None` leaves check-in disabled; every call then fails with
    /// [`BotError::NotConfigured`].
    pub fn new(base_url: Option<String>, credentials: BotCredentials) -> Result<Self, BotError> {
        let http = reqwest::Client::builder()
            .timeout(BOT_TIMEOUT)
            .build()
            .map_err(|err| BotError::Transport(err.to_string()))?;
        Ok(Self::with_client(http, base_url, credentials))
    }

    pub fn with_client(
        http: reqwest::Client,
        base_url: Option<String>,
        credentials: BotCredentials,
    ) -> Self {
        let base_url = base_url.map(|url| {
            if url.ends_with('/') {
                url
            } else {
                format!("{url}/")
            }
        });
        Self {
            http,
            base_url,
            credentials,
        }
    }

    fn url(&self, path: &str) -> Result<String, BotError> {
        self.base_url
            .as_ref()
            .map(|base| format!("{base}{path}"))
            .ok_or(BotError::NotConfigured)
    }

    fn body<T: Serialize>(&self, payload: T) -> AuthenticatedBody<'_, T> {
        AuthenticatedBody {
            payload,
            request_user: &self.credentials.username,
            request_pass: &self.credentials.password,
        }
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, BotError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BotError::Status {
        status: status.as_u16(),
        body,
    })
}

impl CheckInBot for DiscordBotClient {
    async fn check_user(&self, discord_id: &str) -> Result<bool, BotError> {
        let url = self.url(&format!("check_user/{discord_id}"))?;
        let response = self
            .http
            .get(&url)
            .json(&self.body(Empty {}))
            .send()
            .await
            .map_err(|err| BotError::Transport(err.to_string()))?;
        let response = ensure_success(response).await?;
        let payload: CheckUserResponse = response
            .json()
            .await
            .map_err(|err| BotError::Transport(err.to_string()))?;
        debug!(%discord_id, exists = payload.exists, "bot membership lookup");
        Ok(payload.exists)
    }

    async fn check_in(&self, notice: &CheckInNotice) -> Result<(), BotError> {
        let url = self.url("check_in")?;
        let response = self
            .http
            .put(&url)
            .json(&self.body(notice))
            .send()
            .await
            .map_err(|err| BotError::Transport(err.to_string()))?;
        ensure_success(response).await?;
        debug!(discord_id = %notice.discord_id, "bot acknowledged check-in");
        Ok(())
    }
}
