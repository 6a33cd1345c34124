use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};

const PLACEHOLDER_SECRETS: &[&str] = &["secret", "changeme", "change-me", "dev-secret-change-me"];
const MIN_SECRET_LEN: usize = 16;

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub db_busy_timeout: Duration,
    pub request_timeout: Duration,
    pub max_allies: Option<usize>,
    pub feed_max_limit: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = lookup("GUILDHALL_JWT_SECRET").context("GUILDHALL_JWT_SECRET must be set")?;
        if jwt_secret.len() < MIN_SECRET_LEN || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!(
                "GUILDHALL_JWT_SECRET looks like a placeholder; use at least {} random characters",
                MIN_SECRET_LEN
            );
        }

        Ok(Self {
            jwt_secret,
            db_path: PathBuf::from(lookup("GUILDHALL_DB_PATH").unwrap_or_else(|| "guildhall.db".into())),
            host: lookup("GUILDHALL_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&lookup, "GUILDHALL_PORT", 3000)?,
            db_busy_timeout: Duration::from_millis(parse_or(&lookup, "GUILDHALL_DB_BUSY_TIMEOUT_MS", 5000)?),
            request_timeout: Duration::from_secs(parse_or(&lookup, "GUILDHALL_REQUEST_TIMEOUT_SECS", 30)?),
            max_allies: lookup("GUILDHALL_MAX_ALLIES")
                .map(|v| v.parse().with_context(|| format!("GUILDHALL_MAX_ALLIES: invalid value {:?}", v)))
                .transpose()?,
            feed_max_limit: parse_or(&lookup, "GUILDHALL_FEED_MAX_LIMIT", 100)?,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{}: invalid value {:?}", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(env(&[("GUILDHALL_JWT_SECRET", "a-long-enough-random-value")])).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.db_path, PathBuf::from("guildhall.db"));
        assert_eq!(config.db_busy_timeout, Duration::from_millis(5000));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.max_allies, None);
        assert_eq!(config.feed_max_limit, 100);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(env(&[
            ("GUILDHALL_JWT_SECRET", "a-long-enough-random-value"),
            ("GUILDHALL_PORT", "8080"),
            ("GUILDHALL_MAX_ALLIES", "5"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_allies, Some(5));
    }

    #[test]
    fn test_rejects_missing_or_placeholder_secret() {
        assert!(Config::from_lookup(env(&[])).is_err());
        assert!(Config::from_lookup(env(&[("GUILDHALL_JWT_SECRET", "dev-secret-change-me")])).is_err());
        assert!(Config::from_lookup(env(&[("GUILDHALL_JWT_SECRET", "short")])).is_err());
    }

    #[test]
    fn test_rejects_bad_numbers() {
        let result = Config::from_lookup(env(&[
            ("GUILDHALL_JWT_SECRET", "a-long-enough-random-value"),
            ("GUILDHALL_PORT", "not-a-port"),
        ]));
        assert!(result.is_err());
    }
}
