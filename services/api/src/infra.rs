use chrono::{DateTime, NaiveDate, Utc};
use hiss::config::{AppConfig, MailConfig};
use hiss::error::AppError;
use hiss::workflows::registration::{
    BotCredentials, DiscordBotClient, EmailMessage, LogMailer, MailError, Mailer, MailgunMailer,
    RegistrationService, RegistrationSettings, SqliteRepository,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) type ApiService = RegistrationService<SqliteRepository, MailTransport, DiscordBotClient>;

/// Mail transport picked at startup from the configuration.
pub(crate) enum MailTransport {
    Mailgun(MailgunMailer),
    Log(LogMailer),
}

impl MailTransport {
    pub(crate) fn from_config(config: &MailConfig) -> Self {
        match (&config.mailgun_api_key, &config.mailgun_domain) {
            (Some(api_key), Some(domain)) => MailTransport::Mailgun(MailgunMailer::new(
                &config.mailgun_base_url,
                domain,
                api_key.clone(),
                config.from_address.clone(),
            )),
            (Some(_), None) => {
                warn!("MAILGUN_API_KEY set without MAILGUN_DOMAIN; email will only be logged");
                MailTransport::Log(LogMailer)
            }
            _ => MailTransport::Log(LogMailer),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            MailTransport::Mailgun(_) => "mailgun",
            MailTransport::Log(_) => "log",
        }
    }
}

impl Mailer for MailTransport {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        match self {
            MailTransport::Mailgun(mailer) => mailer.send(message).await,
            MailTransport::Log(mailer) => mailer.send(message).await,
        }
    }
}

pub(crate) fn registration_settings(config: &AppConfig) -> RegistrationSettings {
    RegistrationSettings {
        event_name: config.event.name.clone(),
        bot_credentials: BotCredentials::new(
            config.bot.username.clone(),
            config.bot.password.clone(),
        ),
    }
}

/// Open the configured database and wire the service around it.
pub(crate) async fn build_service(config: &AppConfig) -> Result<Arc<ApiService>, AppError> {
    let repository = Arc::new(SqliteRepository::connect(&config.database.url).await?);
    let settings = registration_settings(config);
    let bot = Arc::new(DiscordBotClient::new(
        config.bot.base_url.clone(),
        settings.bot_credentials.clone(),
    )?);
    let mailer = Arc::new(MailTransport::from_config(&config.mail));

    Ok(Arc::new(RegistrationService::new(
        repository, mailer, bot, settings,
    )))
}

/// Accepts RFC 3339 timestamps or bare `YYYY-MM-DD` dates (midnight UTC).
pub(crate) fn parse_datetime(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|date| date.and_time(chrono::NaiveTime::MIN).and_utc())
        .map_err(|err| {
            format!("failed to parse '{raw}' as an RFC 3339 timestamp or YYYY-MM-DD ({err})")
        })
}
