use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use rally_engine::EngineConfig;
use rally_types::models::TravelMode;

/// JWT secrets that must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    /// Empty means no routing provider; travel is estimated in straight lines.
    pub amap_key: Option<String>,
    pub amap_city: String,
    pub engine: EngineConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = var("RALLY_JWT_SECRET", "");
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("RALLY_JWT_SECRET is unset or still a placeholder; set it in your .env file");
        }

        let port: u16 = var("RALLY_PORT", "3000").parse().context("RALLY_PORT")?;
        let route_mode: TravelMode = var("RALLY_ROUTE_MODE", "transit")
            .parse()
            .context("RALLY_ROUTE_MODE")?;
        let reminder_secs: u64 = var("RALLY_REMINDER_INTERVAL_SECS", "30")
            .parse()
            .context("RALLY_REMINDER_INTERVAL_SECS")?;
        let vote_timeout_secs: i64 = var("RALLY_VOTE_TIMEOUT_SECS", "600")
            .parse()
            .context("RALLY_VOTE_TIMEOUT_SECS")?;
        if reminder_secs == 0 || vote_timeout_secs <= 0 {
            bail!("RALLY_REMINDER_INTERVAL_SECS and RALLY_VOTE_TIMEOUT_SECS must be positive");
        }

        let engine = EngineConfig {
            route_mode,
            reminder_interval: std::time::Duration::from_secs(reminder_secs),
            vote_timeout: chrono::Duration::seconds(vote_timeout_secs),
            ..EngineConfig::default()
        };

        Ok(Self {
            host: var("RALLY_HOST", "0.0.0.0"),
            port,
            db_path: var("RALLY_DB_PATH", "rally.db").into(),
            jwt_secret,
            amap_key: get("RALLY_AMAP_KEY").filter(|k| !k.trim().is_empty()),
            amap_city: var("RALLY_AMAP_CITY", "北京"),
            engine,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<ServerConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_with_only_a_secret() {
        let config = load(&[("RALLY_JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.db_path, PathBuf::from("rally.db"));
        assert!(config.amap_key.is_none());
        assert_eq!(config.engine.route_mode, TravelMode::Transit);
        assert_eq!(config.engine.vote_timeout, chrono::Duration::minutes(10));
        assert_eq!(config.engine.participant_cap, 10);
    }

    #[test]
    fn placeholder_secrets_are_refused() {
        assert!(load(&[]).is_err());
        assert!(load(&[("RALLY_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("RALLY_JWT_SECRET", "s3cret"),
            ("RALLY_ROUTE_MODE", "walking"),
            ("RALLY_VOTE_TIMEOUT_SECS", "120"),
            ("RALLY_AMAP_KEY", "abc"),
        ])
        .unwrap();
        assert_eq!(config.engine.route_mode, TravelMode::Walking);
        assert_eq!(config.engine.vote_timeout, chrono::Duration::seconds(120));
        assert_eq!(config.amap_key.as_deref(), Some("abc"));

        assert!(load(&[("RALLY_JWT_SECRET", "s3cret"), ("RALLY_ROUTE_MODE", "teleport")]).is_err());
    }
}
