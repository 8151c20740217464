use chrono::FixedOffset;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// Base URL of the accounting provider's resource API
    pub provider_base_url: String,
    pub provider_timeout_secs: u64,
    /// Minimum interval between two successful refreshes of one section
    pub refresh_cooldown_secs: u64,
    /// How long an in-flight refresh may hold its section before the lease lapses
    pub refresh_lease_ttl_secs: u64,
    pub schedule_enabled: bool,
    /// Offset used to derive "today" and the schedule tick (minutes east of UTC)
    pub schedule_utc_offset_minutes: i32,
    pub webhook_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .set_default("bind_address", "0.0.0.0:8080")?
            .set_default("provider_base_url", "https://whooing.com/api")?
            .set_default("provider_timeout_secs", 10)?
            .set_default("refresh_cooldown_secs", 300)?
            .set_default("refresh_lease_ttl_secs", 60)?
            .set_default("schedule_enabled", true)?
            .set_default("schedule_utc_offset_minutes", 540)?
            .set_default("webhook_timeout_secs", 10)?
            .add_source(config::Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn refresh_cooldown(&self) -> Duration {
        Duration::from_secs(self.refresh_cooldown_secs)
    }

    pub fn refresh_lease_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_lease_ttl_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    pub fn local_offset(&self) -> Result<FixedOffset, config::ConfigError> {
        FixedOffset::east_opt(self.schedule_utc_offset_minutes * 60).ok_or_else(|| {
            config::ConfigError::Message(format!(
                "schedule_utc_offset_minutes out of range: {}",
                self.schedule_utc_offset_minutes
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(offset_minutes: i32) -> Config {
        Config {
            database_url: "postgresql://localhost/test".into(),
            bind_address: "127.0.0.1:0".into(),
            provider_base_url: "https://whooing.com/api".into(),
            provider_timeout_secs: 10,
            refresh_cooldown_secs: 300,
            refresh_lease_ttl_secs: 60,
            schedule_enabled: false,
            schedule_utc_offset_minutes: offset_minutes,
            webhook_timeout_secs: 10,
        }
    }

    #[test]
    fn test_local_offset() {
        assert_eq!(config(540).local_offset().unwrap().local_minus_utc(), 9 * 3600);
        assert_eq!(config(-330).local_offset().unwrap().local_minus_utc(), -330 * 60);
        assert!(config(24 * 60).local_offset().is_err());
    }

    #[test]
    fn test_durations() {
        let config = config(0);
        assert_eq!(config.refresh_cooldown(), Duration::from_secs(300));
        assert_eq!(config.refresh_lease_ttl(), Duration::from_secs(60));
    }
}
