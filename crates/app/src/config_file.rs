use anyhow::{Context, Result};
use songstatus_core::AppConfig;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub fn default_config_path() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("songstatus").join("config.toml")
}

pub fn init_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {}", parent.display()))?;
    }
    let cfg = AppConfig::default();
    let toml = toml::to_string_pretty(&cfg)?;
    std::fs::write(path, toml)
        .with_context(|| format!("failed to write config file {}", path.display()))?;
    Ok(())
}

pub fn load_or_default(path: &Path) -> Result<AppConfig> {
    let mut cfg = if !path.exists() {
        AppConfig::default()
    } else {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))?
    };
    apply_overrides(&mut cfg, |key| std::env::var(key).ok());
    Ok(cfg)
}

pub fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok()?.modified().ok()
}

fn apply_overrides(cfg: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = non_empty("SONGSTATUS_SLACK_TOKEN") {
        cfg.presence.token = Some(v);
    }
    if let Some(v) = non_empty("SONGSTATUS_LOG_LEVEL") {
        cfg.log_level = v;
    }
    if let Some(v) = non_empty("SONGSTATUS_BIND") {
        cfg.subscribers.bind_addr = v;
    }
    if let Some(parsed) = non_empty("SONGSTATUS_SYNC_STATUS").and_then(|v| v.parse().ok()) {
        cfg.sync.sync_external_status = parsed;
    }
    if let Some(parsed) = non_empty("SONGSTATUS_CONTENT_FILTER").and_then(|v| v.parse().ok()) {
        cfg.sync.content_filter_enabled = parsed;
    }
}

#[cfg(test)]
mod tests {
    use super::{apply_overrides, init_config, load_or_default};
    use songstatus_core::AppConfig;
    use std::collections::HashMap;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_or_default(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(cfg.polling, AppConfig::default().polling);
    }

    #[test]
    fn init_writes_a_loadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        init_config(&path).unwrap();

        let cfg = load_or_default(&path).unwrap();
        assert_eq!(cfg.sync, AppConfig::default().sync);
        assert_eq!(cfg.subscribers.queue_capacity, 64);
    }

    #[test]
    fn parse_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "polling = 3").unwrap();

        let err = load_or_default(&path).unwrap_err();
        assert!(format!("{err:#}").contains("config.toml"));
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SONGSTATUS_SLACK_TOKEN", "xoxp-1"),
            ("SONGSTATUS_SYNC_STATUS", "false"),
            ("SONGSTATUS_CONTENT_FILTER", "maybe"),
            ("SONGSTATUS_LOG_LEVEL", "  "),
        ]);
        let mut cfg = AppConfig::default();
        apply_overrides(&mut cfg, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.presence.token.as_deref(), Some("xoxp-1"));
        assert!(!cfg.sync.sync_external_status);
        assert!(cfg.sync.content_filter_enabled, "unparsable bool is ignored");
        assert_eq!(cfg.log_level, "info");
    }
}
