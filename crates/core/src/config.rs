use serde::{Deserialize, Serialize};

fn default_schema_version() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PollingConfig {
    pub provider: String,
    pub command: String,
    pub args: Vec<String>,
    pub poll_interval_ms: u64,
    pub fetch_timeout_ms: u64,
    pub file_watch_poll_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            provider: "media_control".to_string(),
            command: "media-control".to_string(),
            args: vec!["get".to_string()],
            poll_interval_ms: 2_000,
            fetch_timeout_ms: 5_000,
            file_watch_poll_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PresenceConfig {
    pub api_base: String,
    pub token: Option<String>,
    /// Marker emoji identifying statuses written by this daemon.
    pub status_emoji: String,
    pub status_ttl_secs: u64,
    pub max_text_len: usize,
    pub request_timeout_ms: u64,
    pub refresh_interval_ms: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            api_base: "https://slack.com/api/".to_string(),
            token: None,
            status_emoji: ":musical_note:".to_string(),
            status_ttl_secs: 600,
            max_text_len: 100,
            request_timeout_ms: 10_000,
            refresh_interval_ms: 300_000,
        }
    }
}

/// Runtime-toggleable sync behaviour. Replaced as a whole, never field by
/// field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncSettings {
    pub sync_external_status: bool,
    pub content_filter_enabled: bool,
    pub clear_on_pause: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            sync_external_status: true,
            content_filter_enabled: true,
            clear_on_pause: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FilterConfig {
    pub extra_words: Vec<String>,
    pub allowed_words: Vec<String>,
    pub placeholder: char,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            extra_words: Vec::new(),
            allowed_words: Vec::new(),
            placeholder: '*',
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SubscriberConfig {
    pub bind_addr: String,
    pub queue_capacity: usize,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5001".to_string(),
            queue_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub log_level: String,
    pub polling: PollingConfig,
    pub presence: PresenceConfig,
    pub sync: SyncSettings,
    pub filter: FilterConfig,
    pub subscribers: SubscriberConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            log_level: "info".to_string(),
            polling: PollingConfig::default(),
            presence: PresenceConfig::default(),
            sync: SyncSettings::default(),
            filter: FilterConfig::default(),
            subscribers: SubscriberConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AppConfig;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            log_level = "debug"

            [sync]
            content_filter_enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(cfg.log_level, "debug");
        assert!(!cfg.sync.content_filter_enabled);
        assert!(cfg.sync.sync_external_status);
        assert_eq!(cfg.polling.poll_interval_ms, 2_000);
        assert_eq!(cfg.presence.status_emoji, ":musical_note:");
        assert_eq!(cfg.schema_version, 1);
    }
}
