use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub database: DatabaseConfig,
    pub event: EventConfig,
    pub bot: BotConfig,
    pub mail: MailConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://hiss.db".to_string());

        let event_name = env::var("EVENT_NAME")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "Hacklahoma".to_string());

        let bot = BotConfig {
            base_url: optional_var("DISCORD_BOT_URL"),
            username: env::var("REG_USERNAME").unwrap_or_default(),
            password: env::var("REG_PASSWORD").unwrap_or_default(),
        };

        let from_address = optional_var("MAIL_FROM")
            .unwrap_or_else(|| format!("The {event_name} Team <hello@example.com>"));
        let mail = MailConfig {
            mailgun_api_key: optional_var("MAILGUN_API_KEY"),
            mailgun_domain: optional_var("MAILGUN_DOMAIN"),
            mailgun_base_url: optional_var("MAILGUN_BASE_URL")
                .unwrap_or_else(|| "https://api.mailgun.net".to_string()),
            from_address,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            database: DatabaseConfig { url: database_url },
            event: EventConfig { name: event_name },
            bot,
            mail,
        })
    }
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// SQLite connection target, e.g. `sqlite://hiss.db`.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Branding used in outbound email.
#[derive(Debug, Clone)]
pub struct EventConfig {
    pub name: String,
}

/// Chat bot endpoint and the shared credentials sent with every bot request.
#[derive(Clone)]
pub struct BotConfig {
    pub base_url: Option<String>,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Outbound email delivery. Without an API key mail is only logged.
#[derive(Clone)]
pub struct MailConfig {
    pub mailgun_api_key: Option<String>,
    pub mailgun_domain: Option<String>,
    pub mailgun_base_url: String,
    pub from_address: String,
}

impl fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailConfig")
            .field(
                "mailgun_api_key",
                &self.mailgun_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("mailgun_domain", &self.mailgun_domain)
            .field("mailgun_base_url", &self.mailgun_base_url)
            .field("from_address", &self.from_address)
            .finish()
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for key in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "DATABASE_URL",
            "EVENT_NAME",
            "DISCORD_BOT_URL",
            "REG_USERNAME",
            "REG_PASSWORD",
            "MAILGUN_API_KEY",
            "MAILGUN_DOMAIN",
            "MAILGUN_BASE_URL",
            "MAIL_FROM",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.database.url, "sqlite://hiss.db");
        assert_eq!(config.event.name, "Hacklahoma");
        assert!(config.bot.base_url.is_none());
        assert!(config.mail.mailgun_api_key.is_none());
        assert_eq!(
            config.mail.from_address,
            "The Hacklahoma Team <hello@example.com>"
        );
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
        reset_env();
    }

    #[test]
    fn rejects_invalid_port() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_PORT", "not-a-port");
        assert!(matches!(AppConfig::load(), Err(ConfigError::InvalidPort)));
        reset_env();
    }

    #[test]
    fn bot_credentials_are_redacted_in_debug_output() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("DISCORD_BOT_URL", "http://bot.local/");
        env::set_var("REG_USERNAME", "registration");
        env::set_var("REG_PASSWORD", "hunter2");
        let config = AppConfig::load().expect("config loads");
        assert_eq!(config.bot.base_url.as_deref(), Some("http://bot.local/"));
        let rendered = format!("{:?}", config.bot);
        assert!(!rendered.contains("hunter2"));
        reset_env();
    }
}
