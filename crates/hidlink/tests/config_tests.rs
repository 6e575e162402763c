//! Integration tests for configuration parsing
//!
//! Tests link configuration loading, including:
//! - Minimal and full configuration files
//! - Hex and integer USB IDs
//! - Invalid configuration handling
//! - Save/load round trip through a temporary directory

use hidlink::config::LinkConfig;
use hidlink::{RetryPolicy, TransferOptions};
use std::num::NonZeroU32;
use std::time::Duration;
use tempfile::tempdir;

const FULL_CONFIG: &str = r#"
[device]
vendor_id = "0x15a2"
product_id = "0x0073"
interface = 1

[transfer]
timeout_ms = 250
report_size = 64
max_attempts = 12
event_poll_ms = 20

[logging]
log_level = "trace"
"#;

#[test]
fn test_empty_config_uses_defaults() {
    let config = LinkConfig::from_toml("").unwrap();
    assert_eq!(config, LinkConfig::default());
}

#[test]
fn test_full_config() {
    let config = LinkConfig::from_toml(FULL_CONFIG).unwrap();

    assert_eq!(config.device.vendor_id, 0x15a2);
    assert_eq!(config.device.product_id, 0x0073);
    assert_eq!(config.device.interface, 1);
    assert_eq!(config.logging.log_level, "trace");

    assert_eq!(
        config.transfer.options(),
        TransferOptions {
            timeout: Duration::from_millis(250),
            report_size: 64,
            event_poll: Duration::from_millis(20),
            retry: RetryPolicy::bounded(NonZeroU32::new(12).unwrap()),
        }
    );
}

#[test]
fn test_integer_ids_accepted() {
    let config = LinkConfig::from_toml(
        r#"
[device]
vendor_id = 1155
product_id = 57105
"#,
    )
    .unwrap();

    assert_eq!(config.device.vendor_id, 0x0483);
    assert_eq!(config.device.product_id, 0xdf11);
}

#[test]
fn test_partial_transfer_table() {
    let config = LinkConfig::from_toml(
        r#"
[transfer]
max_attempts = 3
"#,
    )
    .unwrap();

    assert_eq!(config.transfer.timeout_ms, 500);
    assert_eq!(config.transfer.report_size, 42);
    assert_eq!(config.transfer.max_attempts, Some(3));
}

#[test]
fn test_invalid_configs_rejected() {
    let cases = [
        "[device]\nvendor_id = \"0xzzzz\"\n",
        "[device]\nvendor_id = \"0x123456\"\n",
        "[transfer]\ntimeout_ms = 0\n",
        "[transfer]\nreport_size = 0\n",
        "[transfer]\nreport_size = 65\n",
        "[transfer]\nmax_attempts = 0\n",
        "[logging]\nlog_level = \"loud\"\n",
    ];

    for case in cases {
        assert!(LinkConfig::from_toml(case).is_err(), "accepted: {}", case);
    }
}

#[test]
fn test_save_and_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("hidlink.toml");

    let config = LinkConfig::from_toml(FULL_CONFIG).unwrap();
    config.save(&path).unwrap();
    assert!(path.exists());

    let loaded = LinkConfig::load(Some(path)).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_load_missing_file() {
    let dir = tempdir().unwrap();
    let result = LinkConfig::load(Some(dir.path().join("absent.toml")));
    assert!(result.is_err());
}

#[test]
fn test_load_invalid_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[transfer]\ntimeout_ms = \"soon\"\n").unwrap();

    let err = LinkConfig::load(Some(path)).unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to parse config file"));
}
