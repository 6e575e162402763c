//! Link configuration management
//!
//! ```toml
//! [device]
//! vendor_id = "0x0483"
//! product_id = "0xdf11"
//! interface = 0
//!
//! [transfer]
//! timeout_ms = 500
//! report_size = 42
//! # max_attempts = 20   # absent: retry timed-out reads forever
//! event_poll_ms = 100
//!
//! [logging]
//! log_level = "info"
//! ```

use crate::engine::{
    DEFAULT_EVENT_POLL, DEFAULT_REPORT_SIZE, DEFAULT_TIMEOUT, RetryPolicy, TransferOptions,
};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest report a full-speed interrupt endpoint can carry
pub const MAX_REPORT_SIZE: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub transfer: TransferSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// USB vendor ID, `"0x0483"` or a plain integer
    #[serde(with = "usb_id", default = "DeviceSettings::default_vendor_id")]
    pub vendor_id: u16,
    #[serde(with = "usb_id", default = "DeviceSettings::default_product_id")]
    pub product_id: u16,
    /// HID interface number
    #[serde(default)]
    pub interface: u8,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            vendor_id: Self::default_vendor_id(),
            product_id: Self::default_product_id(),
            interface: 0,
        }
    }
}

impl DeviceSettings {
    fn default_vendor_id() -> u16 {
        0x0483
    }

    fn default_product_id() -> u16 {
        0xdf11
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Receive and control transfer timeout
    #[serde(default = "TransferSettings::default_timeout_ms")]
    pub timeout_ms: u64,
    /// Reply buffer capacity in bytes
    #[serde(default = "TransferSettings::default_report_size")]
    pub report_size: usize,
    /// Give up after this many timed-out reads (absent = never)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// Upper bound on one event loop wait
    #[serde(default = "TransferSettings::default_event_poll_ms")]
    pub event_poll_ms: u64,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            timeout_ms: Self::default_timeout_ms(),
            report_size: Self::default_report_size(),
            max_attempts: None,
            event_poll_ms: Self::default_event_poll_ms(),
        }
    }
}

impl TransferSettings {
    fn default_timeout_ms() -> u64 {
        DEFAULT_TIMEOUT.as_millis() as u64
    }

    fn default_report_size() -> usize {
        DEFAULT_REPORT_SIZE
    }

    fn default_event_poll_ms() -> u64 {
        DEFAULT_EVENT_POLL.as_millis() as u64
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        match self.max_attempts.and_then(NonZeroU32::new) {
            Some(max) => RetryPolicy::bounded(max),
            None => RetryPolicy::unbounded(),
        }
    }

    /// Engine options described by these settings
    pub fn options(&self) -> TransferOptions {
        TransferOptions {
            timeout: Duration::from_millis(self.timeout_ms),
            report_size: self.report_size,
            event_poll: Duration::from_millis(self.event_poll_ms),
            retry: self.retry_policy(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "LoggingSettings::default_log_level")]
    pub log_level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

impl LoggingSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl LinkConfig {
    /// Load configuration from `path`, or from the first standard location
    /// that exists.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            expand_path(&p)
        } else {
            let candidates = vec![Self::default_path(), PathBuf::from("/etc/hidlink/hidlink.toml")];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: LinkConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("hidlink").join("hidlink.toml")
        } else {
            PathBuf::from(".config/hidlink/hidlink.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.transfer.timeout_ms == 0 {
            return Err(anyhow!("timeout_ms must be greater than zero"));
        }

        if self.transfer.event_poll_ms == 0 {
            return Err(anyhow!("event_poll_ms must be greater than zero"));
        }

        if self.transfer.report_size == 0 || self.transfer.report_size > MAX_REPORT_SIZE {
            return Err(anyhow!(
                "report_size {} out of range, must be 1..={}",
                self.transfer.report_size,
                MAX_REPORT_SIZE
            ));
        }

        if self.transfer.max_attempts == Some(0) {
            return Err(anyhow!(
                "max_attempts must be at least 1 (omit it to retry forever)"
            ));
        }

        Ok(())
    }
}

/// Expand `~` and environment variables in a user-supplied path
fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(e) => {
            tracing::warn!("Could not expand path '{}': {}", raw, e);
            path.to_path_buf()
        }
    }
}

/// Parse a USB vendor/product ID such as `0x0483`.
///
/// Bare digits are read as hex, the way `lsusb` prints them.
pub fn parse_usb_id(text: &str) -> std::result::Result<u16, String> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.is_empty() || digits.len() > 4 {
        return Err(format!("Invalid USB ID '{}', expected up to 4 hex digits", text));
    }
    u16::from_str_radix(digits, 16).map_err(|e| format!("Invalid USB ID '{}': {}", text, e))
}

/// Serde helpers storing IDs as `"0x0483"` and accepting strings or integers
mod usb_id {
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(id: &u16, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:#06x}", id))
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u16),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(n),
            Raw::Text(s) => super::parse_usb_id(&s).map_err(de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_usb_id() {
        assert_eq!(parse_usb_id("0x0483"), Ok(0x0483));
        assert_eq!(parse_usb_id("0XDF11"), Ok(0xdf11));
        assert_eq!(parse_usb_id("df11"), Ok(0xdf11));
        assert!(parse_usb_id("").is_err());
        assert!(parse_usb_id("0x").is_err());
        assert!(parse_usb_id("0x12345").is_err());
        assert!(parse_usb_id("zz").is_err());
    }

    #[test]
    fn test_default_is_valid() {
        let config = LinkConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.device.vendor_id, 0x0483);
        assert_eq!(config.device.product_id, 0xdf11);
        assert_eq!(config.transfer.options(), TransferOptions::default());
    }

    #[test]
    fn test_retry_policy_from_settings() {
        let mut settings = TransferSettings::default();
        assert_eq!(settings.retry_policy(), RetryPolicy::unbounded());

        settings.max_attempts = Some(7);
        assert_eq!(
            settings.retry_policy(),
            RetryPolicy::bounded(NonZeroU32::new(7).unwrap())
        );
    }

    #[test]
    fn test_ids_serialize_as_hex_strings() {
        let text = toml::to_string(&LinkConfig::default()).unwrap();
        assert!(text.contains("vendor_id = \"0x0483\""));
        assert!(text.contains("product_id = \"0xdf11\""));
        assert!(!text.contains("max_attempts"));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = LinkConfig::default();
        config.transfer.max_attempts = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_report() {
        let mut config = LinkConfig::default();
        config.transfer.report_size = MAX_REPORT_SIZE + 1;
        assert!(config.validate().is_err());
    }
}
