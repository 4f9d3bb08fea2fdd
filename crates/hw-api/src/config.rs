use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use hw_db::Retention;

/// `DATABASE_URL` value selecting the in-process repository.
pub const MEMORY_DATABASE_URL: &str = "memory";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub auth_tokens: Vec<String>,
    pub aws_region: String,
    pub sns_verify: bool,
    pub detach_on_terminate: bool,
    pub retention: Retention,
    pub sweep_interval: Duration,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("listen_addr", &self.listen_addr)
            .field("auth_tokens", &format_args!("[{} redacted]", self.auth_tokens.len()))
            .field("aws_region", &self.aws_region)
            .field("sns_verify", &self.sns_verify)
            .field("detach_on_terminate", &self.detach_on_terminate)
            .field("retention", &self.retention)
            .field("sweep_interval", &self.sweep_interval)
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| get(name).filter(|v| !v.trim().is_empty());

        let database_url = var("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let auth_tokens: Vec<String> = var("AUTH_TOKENS")
            .ok_or(ConfigError::Missing("AUTH_TOKENS"))?
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();
        if auth_tokens.is_empty() {
            return Err(ConfigError::Invalid {
                name: "AUTH_TOKENS",
                reason: "no tokens listed".into(),
            });
        }

        let defaults = Retention::default();
        let ttl = |name: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            Ok(var(name)
                .map(|v| parse::<u64>(name, &v))
                .transpose()?
                .map(Duration::from_secs)
                .unwrap_or(default))
        };

        Ok(Self {
            database_url,
            listen_addr: parse("LISTEN_ADDR", &var("LISTEN_ADDR").unwrap_or_else(|| "127.0.0.1:9753".into()))?,
            auth_tokens,
            aws_region: var("AWS_REGION").unwrap_or_else(|| "us-east-1".into()),
            sns_verify: flag("SNS_VERIFY", var("SNS_VERIFY"), true)?,
            detach_on_terminate: flag("DETACH_ON_TERMINATE", var("DETACH_ON_TERMINATE"), false)?,
            retention: Retention {
                instance_events: ttl("INSTANCE_EVENT_TTL_SECS", defaults.instance_events)?,
                lifecycle_actions: ttl("LIFECYCLE_ACTION_TTL_SECS", defaults.lifecycle_actions)?,
                instance_tokens: ttl("INSTANCE_TOKEN_TTL_SECS", defaults.instance_tokens)?,
                temp_instance_tokens: ttl(
                    "TEMP_INSTANCE_TOKEN_TTL_SECS",
                    defaults.temp_instance_tokens,
                )?,
            },
            sweep_interval: match var("SWEEP_INTERVAL_SECS") {
                Some(v) => match parse::<u64>("SWEEP_INTERVAL_SECS", &v)? {
                    0 => {
                        return Err(ConfigError::Invalid {
                            name: "SWEEP_INTERVAL_SECS",
                            reason: "must be greater than zero".into(),
                        });
                    }
                    secs => Duration::from_secs(secs),
                },
                None => Duration::from_secs(300),
            },
        })
    }

    pub fn uses_memory_storage(&self) -> bool {
        self.database_url == MEMORY_DATABASE_URL
    }
}

fn parse<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: format!("'{value}': {e}"),
    })
}

fn flag(name: &'static str, value: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match value.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::Invalid {
                name,
                reason: format!("'{v}' is not a boolean"),
            }),
        },
    }
}
