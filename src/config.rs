use crate::auth::password::PasswordPolicy;
use anyhow::{Context, anyhow};
use chrono::{NaiveDateTime, Timelike, Utc};
use chrono_tz::Tz;
use std::env;
use std::str::FromStr;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub jwt_secret: String,
    pub server_addr: String,
    pub access_token_ttl: usize,
    pub refresh_token_ttl: usize,

    // Rate limiting
    pub rate_login_per_min: u32,
    pub rate_refresh_per_min: u32,
    pub rate_protected_per_min: u32,

    pub api_prefix: String,

    /// Zone used to stamp clock entries and audit records.
    pub time_zone: Tz,
    pub latest_entries_limit: u32,
    pub password_policy: PasswordPolicy,

    pub log_dir: String,
    pub log_level: tracing::Level,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| lookup(key).ok_or_else(|| anyhow!("{key} must be set"));

        let time_zone = or_default(&lookup, "TIME_ZONE", "Europe/Madrid");
        let time_zone = Tz::from_str(&time_zone)
            .map_err(|e| anyhow!("TIME_ZONE `{time_zone}` is not a valid zone: {e}"))?;

        let log_level = tracing::Level::from_str(&or_default(&lookup, "LOG_LEVEL", "info"))
            .unwrap_or(tracing::Level::INFO);

        Ok(Self {
            server_addr: required("SERVER_ADDR")?,
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            access_token_ttl: parse_or(&lookup, "ACCESS_TOKEN_TTL", 900)?, // 15 min
            refresh_token_ttl: parse_or(&lookup, "REFRESH_TOKEN_TTL", 604_800)?, // 7 days

            rate_login_per_min: parse_or(&lookup, "RATE_LOGIN_PER_MIN", 60)?,
            rate_refresh_per_min: parse_or(&lookup, "RATE_REFRESH_PER_MIN", 30)?,
            rate_protected_per_min: parse_or(&lookup, "RATE_PROTECTED_PER_MIN", 1000)?,

            api_prefix: or_default(&lookup, "API_PREFIX", "/api/v1"),

            time_zone,
            latest_entries_limit: parse_or(&lookup, "LATEST_ENTRIES_LIMIT", 10)?,
            password_policy: PasswordPolicy {
                min_length: parse_or(&lookup, "PASSWORD_MIN_LENGTH", 8)?,
                require_upper: parse_or(&lookup, "PASSWORD_REQUIRE_UPPER", true)?,
                require_lower: parse_or(&lookup, "PASSWORD_REQUIRE_LOWER", true)?,
                require_digit: parse_or(&lookup, "PASSWORD_REQUIRE_DIGIT", true)?,
                require_symbol: parse_or(&lookup, "PASSWORD_REQUIRE_SYMBOL", true)?,
            },

            log_dir: or_default(&lookup, "LOG_DIR", "logs"),
            log_level,
        })
    }

    /// Wall-clock time in the configured zone, whole seconds.
    pub fn now_local(&self) -> NaiveDateTime {
        let now = Utc::now().with_timezone(&self.time_zone).naive_local();
        now.with_nanosecond(0).unwrap_or(now)
    }
}

fn or_default<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).unwrap_or_else(|| default.to_string())
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value `{raw}`")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const BASE: [(&str, &str); 3] = [
        ("SERVER_ADDR", "127.0.0.1:8080"),
        ("DATABASE_URL", "mysql://u:p@localhost/db"),
        ("JWT_SECRET", "secret"),
    ];

    #[test]
    fn defaults_apply_when_optional_keys_are_missing() {
        let config = Config::from_lookup(lookup_from(&BASE)).unwrap();

        assert_eq!(config.api_prefix, "/api/v1");
        assert_eq!(config.access_token_ttl, 900);
        assert_eq!(config.latest_entries_limit, 10);
        assert_eq!(config.time_zone, chrono_tz::Europe::Madrid);
        assert_eq!(config.log_level, tracing::Level::INFO);
        assert_eq!(config.password_policy.min_length, 8);
        assert!(config.password_policy.require_symbol);
    }

    #[test]
    fn missing_required_key_names_the_variable() {
        let err = Config::from_lookup(lookup_from(&BASE[..2])).unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn invalid_number_is_an_error() {
        let mut pairs = BASE.to_vec();
        pairs.push(("LATEST_ENTRIES_LIMIT", "ten"));
        let err = Config::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(err.to_string().contains("LATEST_ENTRIES_LIMIT"));
    }

    #[test]
    fn invalid_time_zone_is_an_error() {
        let mut pairs = BASE.to_vec();
        pairs.push(("TIME_ZONE", "Mars/Olympus"));
        assert!(Config::from_lookup(lookup_from(&pairs)).is_err());
    }

    #[test]
    fn unknown_log_level_falls_back_to_info() {
        let mut pairs = BASE.to_vec();
        pairs.push(("LOG_LEVEL", "chatty"));
        pairs.push(("PASSWORD_REQUIRE_SYMBOL", "false"));
        let config = Config::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(config.log_level, tracing::Level::INFO);
        assert!(!config.password_policy.require_symbol);
    }
}
