use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::dashboard::DEFAULT_CONFIG_PATH;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GithubConfig {
    pub pat: String,
    pub url_default: String,
    pub user: String,
    pub repo_fetch_interval: Duration,
    pub changelog_fetch_interval: Duration,
    pub retry_max_attempts: u32,
    pub retry_min_delay: Duration,
    pub retry_max_delay: Duration,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub default_expiration: Duration,
    pub cleanup_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub github: GithubConfig,
    pub cache: CacheConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub dashboard_config_path: String,
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let github = GithubConfig {
            pat: env.string("GITHUB_PAT", ""),
            url_default: env.string("GITHUB_URL_DEFAULT", "https://api.github.com/"),
            user: env.string("GITHUB_USER", ""),
            repo_fetch_interval: env.seconds("GITHUB_REPO_FETCH_TIMER_SECONDS", 600, false)?,
            changelog_fetch_interval: env.seconds("GITHUB_CHANGELOG_FETCH_TIMER_SECONDS", 60, false)?,
            retry_max_attempts: env.parse_nonzero("GITHUB_RETRY_MAX_ATTEMPTS", 5)?,
            retry_min_delay: env.seconds("GITHUB_RETRY_MIN_DELAY_SECONDS", 5, true)?,
            retry_max_delay: env.seconds("GITHUB_RETRY_MAX_DELAY_SECONDS", 30, true)?,
            request_timeout: env.seconds("GITHUB_REQUEST_TIMEOUT_SECONDS", 30, false)?,
        };

        let cache = CacheConfig {
            default_expiration: env.seconds("CACHE_DEFAULT_EXPIRATION_SECONDS", 0, true)?,
            cleanup_interval: env.seconds("CACHE_CLEANUP_INTERVAL_SECONDS", 120, false)?,
        };

        let server = ServerConfig {
            host: env.string("SERVER_HOST", "0.0.0.0"),
            port: env.parse("SERVER_PORT", 8080)?,
            shutdown_timeout: env.seconds("SERVER_TIMEOUT_SHUTDOWN", 60, true)?,
        };

        let logging = LoggingConfig {
            level: env.string("LOGGING_LEVEL", "info"),
            format: env.parse("LOGGING_FORMAT", LogFormat::Text)?,
        };

        Ok(Config {
            github,
            cache,
            server,
            logging,
            dashboard_config_path: env.string("DASHBOARD_CONFIG_PATH", DEFAULT_CONFIG_PATH),
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, name: &str, default: &str) -> String {
        self.raw(name).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.raw(name) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn parse_nonzero(&self, name: &'static str, default: u32) -> Result<u32, ConfigError> {
        let value = self.parse(name, default)?;
        if value == 0 {
            return Err(ConfigError::Invalid {
                name,
                value: value.to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(value)
    }

    fn seconds(
        &self,
        name: &'static str,
        default: u64,
        allow_zero: bool,
    ) -> Result<Duration, ConfigError> {
        let secs: u64 = self.parse(name, default)?;
        if secs == 0 && !allow_zero {
            return Err(ConfigError::Invalid {
                name,
                value: secs.to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(Duration::from_secs(secs))
    }
}
