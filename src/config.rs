use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::models::resource::SaveOptions;
use crate::models::tour::Difficulty;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has an invalid value: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub jwt_ttl_days: i64,
    pub bcrypt_cost: u32,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    /// Requests allowed per client IP within `window`.
    pub max_requests: u32,
    pub window: Duration,
}

#[derive(Debug, Clone)]
pub struct StatsSettings {
    pub min_rating: f64,
    /// Difficulty group dropped from the stats report.
    pub exclude_difficulty: Option<Difficulty>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    /// When unset the server runs on the in-memory store.
    pub mongodb_uri: Option<String>,
    pub database_name: String,
    pub auth: AuthSettings,
    pub rate_limit: RateLimitSettings,
    pub stats: StatsSettings,
}

impl Settings {
    /// Defaults for everything but the signing secret.
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Settings {
            host: "127.0.0.1".to_string(),
            port: 8080,
            mongodb_uri: None,
            database_name: "tours".to_string(),
            auth: AuthSettings {
                jwt_secret: jwt_secret.into(),
                jwt_ttl_days: 90,
                bcrypt_cost: 12,
            },
            rate_limit: RateLimitSettings {
                max_requests: 100,
                window: Duration::from_secs(60 * 60),
            },
            stats: StatsSettings {
                min_rating: 4.5,
                exclude_difficulty: Some(Difficulty::Easy),
            },
        }
    }

    /// Loads `.env` when present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Settings::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let secret = lookup("JWT_SECRET")
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::Missing("JWT_SECRET"))?;
        let mut settings = Settings::new(secret);

        if let Some(host) = lookup("HOST") {
            settings.host = host;
        }
        settings.port = parse(&lookup, "PORT", settings.port)?;
        settings.mongodb_uri = lookup("MONGODB_URI").filter(|uri| !uri.trim().is_empty());
        if let Some(name) = lookup("DATABASE_NAME") {
            settings.database_name = name;
        }

        settings.auth.jwt_ttl_days = parse(&lookup, "JWT_EXPIRES_IN_DAYS", settings.auth.jwt_ttl_days)?;
        if settings.auth.jwt_ttl_days <= 0 {
            return Err(invalid("JWT_EXPIRES_IN_DAYS", settings.auth.jwt_ttl_days));
        }
        settings.auth.bcrypt_cost = parse(&lookup, "BCRYPT_COST", settings.auth.bcrypt_cost)?;
        if !(4..=31).contains(&settings.auth.bcrypt_cost) {
            return Err(invalid("BCRYPT_COST", settings.auth.bcrypt_cost));
        }

        settings.rate_limit.max_requests =
            parse(&lookup, "RATE_LIMIT_MAX", settings.rate_limit.max_requests)?;
        if settings.rate_limit.max_requests == 0 {
            return Err(invalid("RATE_LIMIT_MAX", 0));
        }
        let window = parse(&lookup, "RATE_LIMIT_WINDOW_SECS", settings.rate_limit.window.as_secs())?;
        if window == 0 {
            return Err(invalid("RATE_LIMIT_WINDOW_SECS", 0));
        }
        settings.rate_limit.window = Duration::from_secs(window);

        if let Some(raw) = lookup("TOUR_STATS_EXCLUDE_DIFFICULTY") {
            settings.stats.exclude_difficulty = match raw.trim().to_lowercase().as_str() {
                "" | "none" => None,
                other => Some(
                    Difficulty::parse(other)
                        .ok_or_else(|| invalid("TOUR_STATS_EXCLUDE_DIFFICULTY", &raw))?,
                ),
            };
        }

        Ok(settings)
    }

    pub fn bind_address(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }

    pub fn save_options(&self) -> SaveOptions {
        SaveOptions {
            bcrypt_cost: self.auth.bcrypt_cost,
        }
    }
}

fn invalid(key: &'static str, value: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| invalid(key, raw)),
    }
}
