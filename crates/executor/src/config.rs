use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramConfig {
    pub token: String,
    pub chat_id: i64,
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub telegram: Option<TelegramConfig>,
    pub groq_api_key: Option<String>,
    pub instance_secret: String,
    pub lease_db_path: PathBuf,
    pub settings_path: PathBuf,
    pub scan_interval: Duration,
    pub scheduler_tick: Duration,
    pub auto_threshold: f64,
    pub lease_duration: Duration,
    pub lease_renew: Duration,
    pub standby_retry: Duration,
    pub loop_error_backoff: Duration,
    pub sweep_expired_signals: bool,
    pub worker_pool_size: usize,
}

impl BotConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let token = get("TELEGRAM_BOT_TOKEN");
        let telegram = match (token.clone(), get("TELEGRAM_CHAT_ID")) {
            (Some(token), Some(chat)) => Some(TelegramConfig {
                token,
                chat_id: chat
                    .parse::<i64>()
                    .with_context(|| format!("TELEGRAM_CHAT_ID must be a number, got {chat}"))?,
            }),
            _ => None,
        };

        let auto_threshold: f64 = parse_or(&get, "AUTO_CONFIDENCE_THRESHOLD", 70.0)?;
        if !(0.0..=100.0).contains(&auto_threshold) {
            bail!("AUTO_CONFIDENCE_THRESHOLD must be within 0..=100, got {auto_threshold}");
        }

        Ok(Self {
            telegram,
            groq_api_key: get("GROQ_API_KEY"),
            instance_secret: get("INSTANCE_SECRET").or(token).unwrap_or_default(),
            lease_db_path: get("LEASE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/leader.db")),
            settings_path: get("SETTINGS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("bot_settings.json")),
            scan_interval: secs(&get, "SCAN_INTERVAL_SECS", 300)?,
            scheduler_tick: secs(&get, "SCHEDULER_TICK_SECS", 60)?,
            auto_threshold,
            lease_duration: secs(&get, "LEASE_DURATION_SECS", 300)?,
            lease_renew: secs(&get, "LEASE_RENEW_SECS", 30)?,
            standby_retry: secs(&get, "STANDBY_RETRY_SECS", 60)?,
            loop_error_backoff: secs(&get, "LOOP_ERROR_BACKOFF_SECS", 300)?,
            sweep_expired_signals: parse_or(&get, "SWEEP_EXPIRED_SIGNALS", true)?,
            worker_pool_size: parse_or::<usize, _>(&get, "WORKER_POOL_SIZE", 10)?.max(1),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        None => Ok(default),
    }
}

fn secs<G>(get: &G, key: &str, default: u64) -> anyhow::Result<Duration>
where
    G: Fn(&str) -> Option<String>,
{
    Ok(Duration::from_secs(parse_or(get, key, default)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<BotConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BotConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = config(&[]).unwrap();
        assert!(config.telegram.is_none());
        assert!(config.groq_api_key.is_none());
        assert_eq!(config.lease_db_path, PathBuf::from("data/leader.db"));
        assert_eq!(config.scan_interval, Duration::from_secs(300));
        assert_eq!(config.lease_renew, Duration::from_secs(30));
        assert_eq!(config.auto_threshold, 70.0);
        assert!(config.sweep_expired_signals);
        assert_eq!(config.worker_pool_size, 10);
    }

    #[test]
    fn telegram_needs_both_values() {
        let only_token = config(&[("TELEGRAM_BOT_TOKEN", "123:abc")]).unwrap();
        assert!(only_token.telegram.is_none());
        assert_eq!(only_token.instance_secret, "123:abc");

        let both = config(&[("TELEGRAM_BOT_TOKEN", "123:abc"), ("TELEGRAM_CHAT_ID", "-100")]).unwrap();
        assert_eq!(both.telegram.unwrap().chat_id, -100);
    }

    #[test]
    fn rejects_bad_numbers() {
        assert!(config(&[("TELEGRAM_BOT_TOKEN", "t"), ("TELEGRAM_CHAT_ID", "abc")]).is_err());
        assert!(config(&[("SCAN_INTERVAL_SECS", "soon")]).is_err());
        assert!(config(&[("AUTO_CONFIDENCE_THRESHOLD", "140")]).is_err());
        assert!(config(&[("SWEEP_EXPIRED_SIGNALS", "yes")]).is_err());
    }

    #[test]
    fn blank_values_fall_back() {
        let config = config(&[("GROQ_API_KEY", "  "), ("WORKER_POOL_SIZE", "0")]).unwrap();
        assert!(config.groq_api_key.is_none());
        assert_eq!(config.worker_pool_size, 1);
    }
}
