use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // commands registered on one guild during development

    // Providers
    pub youtube_api_key: String,
    pub soundcloud_client_id: String,
    pub provider_timeout_secs: u64,

    // Playback
    pub default_volume: u8, // percent
    pub max_queue_size: usize,
    pub stream_open_timeout_secs: u64,

    // Queue mirror (disabled when unset)
    pub queue_api_url: Option<String>,
    pub queue_api_token: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Builds the configuration from any key/value source.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .with_context(|| format!("{} must be set", key))
        };
        let optional = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let parsed_or = |key: &str, default: &str| {
            optional(key).unwrap_or_else(|| default.to_string())
        };

        Ok(Self {
            // Discord
            discord_token: required("DISCORD_TOKEN")?,
            application_id: required("APPLICATION_ID")?
                .parse()
                .context("APPLICATION_ID must be a number")?,
            guild_id: optional("GUILD_ID").and_then(|s| s.parse().ok()),

            // Providers
            youtube_api_key: required("YOUTUBE_API_KEY")?,
            soundcloud_client_id: required("SOUNDCLOUD_CLIENT_ID")?,
            provider_timeout_secs: parsed_or("PROVIDER_TIMEOUT_SECS", "10")
                .parse()
                .context("PROVIDER_TIMEOUT_SECS must be a number of seconds")?,

            // Playback
            default_volume: parsed_or("DEFAULT_VOLUME", "50")
                .parse()
                .context("DEFAULT_VOLUME must be a percentage")?,
            max_queue_size: parsed_or("MAX_QUEUE_SIZE", "1000")
                .parse()
                .context("MAX_QUEUE_SIZE must be a number")?,
            stream_open_timeout_secs: parsed_or("STREAM_OPEN_TIMEOUT_SECS", "15")
                .parse()
                .context("STREAM_OPEN_TIMEOUT_SECS must be a number of seconds")?,

            // Queue mirror
            queue_api_url: optional("QUEUE_API_URL"),
            queue_api_token: optional("QUEUE_API_TOKEN"),
        })
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Volume must be between 0 and 100
    /// - Queue size and timeouts must be greater than 0
    /// - The queue API URL, when set, must be an http(s) URL
    pub fn validate(&self) -> Result<()> {
        if self.default_volume > 100 {
            anyhow::bail!("Default volume must be between 0 and 100, got: {}", self.default_volume);
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.provider_timeout_secs == 0 || self.stream_open_timeout_secs == 0 {
            anyhow::bail!("Timeouts must be greater than 0 seconds");
        }

        if let Some(url) = &self.queue_api_url {
            if !crate::sources::is_url(url) {
                anyhow::bail!("QUEUE_API_URL must be an http(s) URL, got: {}", url);
            }
        }

        Ok(())
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn stream_open_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_open_timeout_secs)
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Tokens and keys are left out.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Playback: {}% vol, {} queue, {}s stream open timeout\n  \
            Providers: {}s timeout\n  \
            Queue mirror: {}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.default_volume,
            self.max_queue_size,
            self.stream_open_timeout_secs,
            self.provider_timeout_secs,
            self.queue_api_url.as_deref().unwrap_or("disabled"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 4] = [
        ("DISCORD_TOKEN", "token"),
        ("APPLICATION_ID", "1234"),
        ("YOUTUBE_API_KEY", "yt"),
        ("SOUNDCLOUD_CLIENT_ID", "sc"),
    ];

    #[test]
    fn defaults_apply_when_optional_values_are_missing() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();

        assert_eq!(config.application_id, 1234);
        assert_eq!(config.guild_id, None);
        assert_eq!(config.default_volume, 50);
        assert_eq!(config.max_queue_size, 1000);
        assert_eq!(config.provider_timeout(), Duration::from_secs(10));
        assert_eq!(config.stream_open_timeout(), Duration::from_secs(15));
        assert_eq!(config.queue_api_url, None);
        assert!(config.validate().is_ok());
        assert!(config.summary().contains("Queue mirror: disabled"));
    }

    #[test]
    fn missing_token_is_reported_by_name() {
        let err = Config::from_lookup(lookup(&REQUIRED[1..])).unwrap_err();
        assert!(err.to_string().contains("DISCORD_TOKEN"));
    }

    #[test]
    fn validation_rejects_out_of_range_values() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("DEFAULT_VOLUME", "150"));
        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert!(config.validate().is_err());

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("QUEUE_API_URL", "not a url"));
        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn blank_optional_values_count_as_unset() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("QUEUE_API_URL", "  "));
        pairs.push(("GUILD_ID", "987"));

        let config = Config::from_lookup(lookup(&pairs)).unwrap();

        assert_eq!(config.queue_api_url, None);
        assert_eq!(config.guild_id, Some(987));
    }
}
