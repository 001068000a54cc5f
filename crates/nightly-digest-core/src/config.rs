use crate::error::Error;
use config::{Config, File as ConfigFile};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Longest accepted window: ten years.
pub const MAX_HOURS: u32 = 10 * 366 * 24;

/// Which record-producing adapter reads the files under `root_dir`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// Ekos `.analyze` session event logs.
    #[default]
    #[serde(alias = "ekos", alias = "analyze")]
    SessionLog,
    /// FITS frames; metrics come from star detection.
    #[serde(alias = "fits")]
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportLevel {
    Minimal,
    #[default]
    Standard,
    Detailed,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub hfr_warning: f64,
    pub hfr_error: f64,
    /// Pixels per frame.
    pub hfr_drift_warning: f64,
    pub temperature_swing_warning: f64,
    pub success_rate_warning: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            hfr_warning: 4.0,
            hfr_error: 5.0,
            hfr_drift_warning: 0.5,
            temperature_swing_warning: 5.0,
            success_rate_warning: 0.8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(alias = "analyze_dir")]
    pub root_dir: PathBuf,
    #[serde(alias = "webhook")]
    pub webhook_url: String,
    #[serde(default = "default_hours")]
    pub hours: u32,
    #[serde(default)]
    pub input_mode: InputMode,
    #[serde(default = "default_detection_threshold")]
    pub detection_threshold: f64,
    #[serde(default, alias = "discord_report_level")]
    pub report_level: ReportLevel,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    #[serde(default)]
    pub webhook_username: Option<String>,
    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,
    #[serde(default)]
    pub notify_when_empty: bool,
    #[serde(default)]
    pub alert_thresholds: AlertThresholds,
}

fn default_hours() -> u32 {
    24
}

fn default_detection_threshold() -> f64 {
    5.0
}

fn default_webhook_timeout_secs() -> u64 {
    30
}

impl AppConfig {
    /// Minimal configuration with every optional key at its default.
    pub fn new(root_dir: impl Into<PathBuf>, webhook_url: impl Into<String>) -> Self {
        Self {
            root_dir: root_dir.into(),
            webhook_url: webhook_url.into(),
            hours: default_hours(),
            input_mode: InputMode::default(),
            detection_threshold: default_detection_threshold(),
            report_level: ReportLevel::default(),
            extensions: Vec::new(),
            ignore_patterns: Vec::new(),
            webhook_username: None,
            webhook_timeout_secs: default_webhook_timeout_secs(),
            notify_when_empty: false,
            alert_thresholds: AlertThresholds::default(),
        }
    }

    /// Extensions the locator accepts: the configured list, or the input
    /// mode's defaults when none were given.
    pub fn effective_extensions(&self) -> Vec<String> {
        if self.extensions.is_empty() {
            crate::source::default_extensions(self.input_mode)
                .iter()
                .map(|ext| ext.to_string())
                .collect()
        } else {
            self.extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect()
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.hours == 0 {
            return Err(Error::InvalidConfig("hours must be greater than 0".into()));
        }
        if self.hours > MAX_HOURS {
            return Err(Error::InvalidConfig(format!(
                "hours must be at most {}, got {}",
                MAX_HOURS, self.hours
            )));
        }
        if !self.detection_threshold.is_finite() || self.detection_threshold <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "detection_threshold must be a positive number, got {}",
                self.detection_threshold
            )));
        }
        if self.webhook_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "webhook_timeout_secs must be greater than 0".into(),
            ));
        }
        let url = reqwest::Url::parse(&self.webhook_url).map_err(|err| {
            Error::InvalidConfig(format!("webhook_url '{}': {}", self.webhook_url, err))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Error::InvalidConfig(format!(
                "webhook_url must use http or https, got '{}'",
                url.scheme()
            )));
        }
        for pattern in &self.ignore_patterns {
            glob::Pattern::new(pattern).map_err(|err| {
                Error::InvalidConfig(format!("ignore pattern '{}': {}", pattern, err))
            })?;
        }
        Ok(())
    }
}

/// Load and validate the configuration file at `path`. The format follows
/// the file extension (YAML, TOML, JSON, ...).
pub fn load_configuration(path: &Path) -> Result<AppConfig, Error> {
    let builder = Config::builder()
        .add_source(ConfigFile::from(path).required(true))
        .build()?;
    let config = builder.try_deserialize::<AppConfig>()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("digest.yaml");
        fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn test_load_with_defaults() {
        let (_dir, path) = write_config(
            "root_dir: /data/analyze\nwebhook_url: https://example.com/hook\n",
        );
        let config = load_configuration(&path).unwrap();
        assert_eq!(config.root_dir, PathBuf::from("/data/analyze"));
        assert_eq!(config.hours, 24);
        assert_eq!(config.input_mode, InputMode::SessionLog);
        assert_eq!(config.report_level, ReportLevel::Standard);
        assert_eq!(config.detection_threshold, 5.0);
        assert_eq!(config.alert_thresholds, AlertThresholds::default());
        assert_eq!(config.effective_extensions(), vec!["analyze".to_string()]);
    }

    #[test]
    fn test_load_legacy_key_names() {
        let (_dir, path) = write_config(
            "analyze_dir: /data/analyze\nwebhook: https://example.com/hook\nhours: 12\ndiscord_report_level: detailed\ninput_mode: fits\n",
        );
        let config = load_configuration(&path).unwrap();
        assert_eq!(config.hours, 12);
        assert_eq!(config.report_level, ReportLevel::Detailed);
        assert_eq!(config.input_mode, InputMode::Image);
        assert!(config.effective_extensions().contains(&"fits".to_string()));
    }

    #[test]
    fn test_missing_webhook_is_an_error() {
        let (_dir, path) = write_config("root_dir: /data\n");
        let err = load_configuration(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "got {:?}", err);
    }

    #[test]
    fn test_rejects_non_http_webhook() {
        let (_dir, path) = write_config("root_dir: /data\nwebhook_url: ftp://example.com/x\n");
        let err = load_configuration(&path).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)), "got {:?}", err);
    }

    #[test]
    fn test_rejects_zero_hours() {
        let mut config = AppConfig::new("/data", "https://example.com/hook");
        config.hours = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_window_past_upper_bound() {
        let mut config = AppConfig::new("/data", "https://example.com/hook");
        config.hours = MAX_HOURS;
        assert!(config.validate().is_ok());
        config.hours = u32::MAX;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)), "got {:?}", err);

        let (_dir, path) = write_config(
            "root_dir: /data\nwebhook_url: https://example.com/hook\nhours: 4294967295\n",
        );
        assert!(matches!(
            load_configuration(&path),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_configured_extensions_are_normalized() {
        let mut config = AppConfig::new("/data", "https://example.com/hook");
        config.extensions = vec![".FITS".to_string(), "fit".to_string()];
        assert_eq!(
            config.effective_extensions(),
            vec!["fits".to_string(), "fit".to_string()]
        );
    }
}
