// zerogate/zerogate-backend/src/config.rs

//! Environment-driven server configuration.

use std::{env, fmt, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{anyhow, Context, Result};

pub const LISTEN_ADDR_ENV: &str = "ZEROGATE_LISTEN_ADDR";
pub const ENVIRONMENT_ENV: &str = "ZEROGATE_ENV";
pub const JWT_SECRET_ENV: &str = "ZEROGATE_JWT_SECRET";
pub const JWT_EXPIRES_IN_ENV: &str = "ZEROGATE_JWT_EXPIRES_IN";
pub const CIRCUITS_PATH_ENV: &str = "ZEROGATE_CIRCUITS_PATH";
pub const HISTORY_PATH_ENV: &str = "ZEROGATE_HISTORY_PATH";
pub const CORS_ORIGIN_ENV: &str = "ZEROGATE_CORS_ORIGIN";
pub const RATE_LIMIT_WINDOW_ENV: &str = "ZEROGATE_RATE_LIMIT_WINDOW";
pub const RATE_LIMIT_MAX_ENV: &str = "ZEROGATE_RATE_LIMIT_MAX";
pub const LOG_LEVEL_ENV: &str = "ZEROGATE_LOG_LEVEL";

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3001";
const DEFAULT_JWT_EXPIRES_IN: &str = "1h";
const DEFAULT_CIRCUITS_PATH: &str = "circuits";
const DEFAULT_HISTORY_PATH: &str = "data/login_history.json";
const DEFAULT_CORS_ORIGIN: &str = "http://localhost:3000";
const DEFAULT_RATE_LIMIT_WINDOW: &str = "15m";
const DEFAULT_RATE_LIMIT_MAX: u32 = 100;
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            "test" => Ok(Environment::Test),
            other => Err(anyhow!(
                "unknown environment '{other}', expected development, production or test"
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub environment: Environment,
    pub jwt_secret: Option<String>,
    pub jwt_expires_in: Duration,
    /// Expiry as configured, echoed back to clients as `expiresIn`.
    pub jwt_expires_in_label: String,
    pub circuits_path: PathBuf,
    pub history_path: PathBuf,
    pub cors_origin: String,
    pub rate_limit_window: Duration,
    /// Requests allowed per window and client IP; zero disables the limiter.
    pub rate_limit_max: u32,
    pub log_level: String,
}

impl ServerConfig {
    /// Reads the configuration from the process environment.
    ///
    /// Callers that want `.env` support load it first with `dotenvy`.
    pub fn from_env() -> Result<Self> {
        let listen_addr = env_or(LISTEN_ADDR_ENV, DEFAULT_LISTEN_ADDR)
            .parse()
            .with_context(|| format!("invalid {LISTEN_ADDR_ENV}"))?;
        let environment = env_or(ENVIRONMENT_ENV, Environment::Development.as_str())
            .parse()
            .with_context(|| format!("invalid {ENVIRONMENT_ENV}"))?;
        let jwt_secret = env::var(JWT_SECRET_ENV)
            .ok()
            .filter(|secret| !secret.is_empty());
        let jwt_expires_in_label = env_or(JWT_EXPIRES_IN_ENV, DEFAULT_JWT_EXPIRES_IN);
        let jwt_expires_in = humantime::parse_duration(&jwt_expires_in_label)
            .with_context(|| format!("invalid {JWT_EXPIRES_IN_ENV}"))?;
        let rate_limit_window =
            humantime::parse_duration(&env_or(RATE_LIMIT_WINDOW_ENV, DEFAULT_RATE_LIMIT_WINDOW))
                .with_context(|| format!("invalid {RATE_LIMIT_WINDOW_ENV}"))?;
        let rate_limit_max = match env::var(RATE_LIMIT_MAX_ENV) {
            Ok(value) => value
                .trim()
                .parse()
                .with_context(|| format!("invalid {RATE_LIMIT_MAX_ENV}"))?,
            Err(_) => DEFAULT_RATE_LIMIT_MAX,
        };

        Ok(Self {
            listen_addr,
            environment,
            jwt_secret,
            jwt_expires_in,
            jwt_expires_in_label,
            circuits_path: env_or(CIRCUITS_PATH_ENV, DEFAULT_CIRCUITS_PATH).into(),
            history_path: env_or(HISTORY_PATH_ENV, DEFAULT_HISTORY_PATH).into(),
            cors_origin: env_or(CORS_ORIGIN_ENV, DEFAULT_CORS_ORIGIN),
            rate_limit_window,
            rate_limit_max,
            log_level: env_or(LOG_LEVEL_ENV, DEFAULT_LOG_LEVEL),
        })
    }

    pub fn log_summary(&self) {
        tracing::info!(
            listen_addr = %self.listen_addr,
            environment = %self.environment,
            jwt_secret_set = self.jwt_secret.is_some(),
            jwt_expires_in = %self.jwt_expires_in_label,
            circuits_path = %self.circuits_path.display(),
            history_path = %self.history_path.display(),
            cors_origin = %self.cors_origin,
            rate_limit_window = %humantime::format_duration(self.rate_limit_window),
            rate_limit_max = self.rate_limit_max,
            log_level = %self.log_level,
            "zerogate-backend configuration"
        );
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            environment: Environment::Development,
            jwt_secret: None,
            jwt_expires_in: Duration::from_secs(60 * 60),
            jwt_expires_in_label: DEFAULT_JWT_EXPIRES_IN.to_string(),
            circuits_path: DEFAULT_CIRCUITS_PATH.into(),
            history_path: DEFAULT_HISTORY_PATH.into(),
            cors_origin: DEFAULT_CORS_ORIGIN.to_string(),
            rate_limit_window: Duration::from_secs(15 * 60),
            rate_limit_max: DEFAULT_RATE_LIMIT_MAX,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

fn env_or(var: &str, default: &str) -> String {
    env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parses_aliases() {
        assert_eq!(
            "production".parse::<Environment>().unwrap(),
            Environment::Production
        );
        assert_eq!("DEV".parse::<Environment>().unwrap(), Environment::Development);
        assert_eq!("test".parse::<Environment>().unwrap(), Environment::Test);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr.port(), 3001);
        assert_eq!(config.jwt_expires_in, Duration::from_secs(3600));
        assert_eq!(config.jwt_expires_in_label, "1h");
        assert_eq!(config.rate_limit_max, 100);
        assert!(config.jwt_secret.is_none());
        assert_eq!(
            humantime::parse_duration(DEFAULT_RATE_LIMIT_WINDOW).unwrap(),
            config.rate_limit_window
        );
    }
}
