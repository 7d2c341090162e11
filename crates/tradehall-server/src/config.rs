use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl_days: i64,
    pub friend_request_ttl_days: i64,
    pub cleanup_interval_secs: u64,
    /// E-mail of the account promoted to broker at startup.
    pub bootstrap_broker: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = get("TRADEHALL_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("TRADEHALL_JWT_SECRET is unset or still a placeholder; set it in your .env file");
        }

        let token_ttl_days = parse_or(&get, "TRADEHALL_TOKEN_TTL_DAYS", 30)?;
        if token_ttl_days <= 0 {
            bail!("TRADEHALL_TOKEN_TTL_DAYS must be at least 1, got {}", token_ttl_days);
        }
        let friend_request_ttl_days = parse_or(&get, "TRADEHALL_FRIEND_REQUEST_TTL_DAYS", 30)?;
        if friend_request_ttl_days <= 0 {
            bail!(
                "TRADEHALL_FRIEND_REQUEST_TTL_DAYS must be at least 1, got {}",
                friend_request_ttl_days
            );
        }
        // tokio's interval panics on a zero period
        let cleanup_interval_secs = parse_or(&get, "TRADEHALL_CLEANUP_INTERVAL_SECS", 3600)?;
        if cleanup_interval_secs == 0 {
            bail!("TRADEHALL_CLEANUP_INTERVAL_SECS must be at least 1");
        }

        Ok(Self {
            host: get("TRADEHALL_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&get, "TRADEHALL_PORT", 3000)?,
            db_path: get("TRADEHALL_DB_PATH")
                .unwrap_or_else(|| "tradehall.db".into())
                .into(),
            jwt_secret,
            token_ttl_days,
            friend_request_ttl_days,
            cleanup_interval_secs,
            bootstrap_broker: get("TRADEHALL_BOOTSTRAP_BROKER").filter(|v| !v.trim().is_empty()),
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}
