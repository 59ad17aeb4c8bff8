use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub access_secret: String,
    pub access_ttl: Duration,
    pub refresh_secret: String,
    pub refresh_ttl: Duration,
    pub issuer: String,
    pub audience: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub public_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub tokens: TokenConfig,
    pub media: MediaConfig,
    pub cors_origin: Option<String>,
    pub cookie_secure: bool,
    /// Clear the stored refresh token when a password changes.
    pub revoke_sessions_on_password_change: bool,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL")?;

        let tokens = TokenConfig {
            access_secret: std::env::var("ACCESS_TOKEN_SECRET").context("ACCESS_TOKEN_SECRET")?,
            access_ttl: parse_expiry(&env_or("ACCESS_TOKEN_EXPIRY", "15m"))
                .context("ACCESS_TOKEN_EXPIRY")?,
            refresh_secret: std::env::var("REFRESH_TOKEN_SECRET")
                .context("REFRESH_TOKEN_SECRET")?,
            refresh_ttl: parse_expiry(&env_or("REFRESH_TOKEN_EXPIRY", "10d"))
                .context("REFRESH_TOKEN_EXPIRY")?,
            issuer: env_or("JWT_ISSUER", "playtube"),
            audience: env_or("JWT_AUDIENCE", "playtube-users"),
        };

        let endpoint = std::env::var("MEDIA_ENDPOINT").context("MEDIA_ENDPOINT")?;
        let bucket = std::env::var("MEDIA_BUCKET").context("MEDIA_BUCKET")?;
        let public_url = std::env::var("MEDIA_PUBLIC_URL")
            .unwrap_or_else(|_| format!("{}/{}", endpoint.trim_end_matches('/'), bucket));
        let media = MediaConfig {
            access_key: std::env::var("MEDIA_ACCESS_KEY").context("MEDIA_ACCESS_KEY")?,
            secret_key: std::env::var("MEDIA_SECRET_KEY").context("MEDIA_SECRET_KEY")?,
            region: env_or("MEDIA_REGION", "us-east-1"),
            endpoint,
            bucket,
            public_url,
        };

        Ok(Self {
            database_url,
            tokens,
            media,
            cors_origin: std::env::var("CORS_ORIGIN").ok().filter(|v| !v.is_empty()),
            cookie_secure: env_flag("COOKIE_SECURE", true),
            revoke_sessions_on_password_change: env_flag(
                "REVOKE_SESSIONS_ON_PASSWORD_CHANGE",
                false,
            ),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

/// Parses token lifetimes such as `3600`, `90s`, `15m`, `12h` or `10d`.
pub fn parse_expiry(raw: &str) -> anyhow::Result<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    if digits.is_empty() {
        bail!("invalid expiry {:?}", raw);
    }
    let value: u64 = digits
        .parse()
        .with_context(|| format!("invalid expiry {:?}", raw))?;
    let secs = match unit {
        "" | "s" => value,
        "m" => value * 60,
        "h" => value * 60 * 60,
        "d" => value * 60 * 60 * 24,
        other => bail!("unknown expiry unit {:?}", other),
    };
    if secs == 0 {
        bail!("expiry must be positive");
    }
    Ok(Duration::from_secs(secs))
}
