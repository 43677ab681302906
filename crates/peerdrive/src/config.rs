//! Tenant configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use peerdrive_core::{DriveType, TargetDrive};
use peerdrive_store::RetryPolicy;
use peerdrive_transit::TransitConfig;

use crate::error::Result;

/// Settings for one tenant. Every field has a default, so a config file only
/// needs the values it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantConfig {
    /// Idle perimeter sessions are swept after this long.
    pub session_ttl_ms: i64,
    pub inbox_retry: RetryPolicy,
    pub outbox_retry: RetryPolicy,
    pub inbox_batch_size: usize,
    pub outbox_batch_size: usize,
    /// A popped item not completed within this window is handed out again.
    pub stale_pop_after_ms: i64,
    pub feed_drive: Option<TargetDrive>,
    pub channel_drive_type: Option<DriveType>,
    /// Largest single part accepted from a peer.
    pub max_part_bytes: u64,
}

impl Default for TenantConfig {
    fn default() -> Self {
        let transit = TransitConfig::default();
        Self {
            session_ttl_ms: transit.session_ttl_ms,
            inbox_retry: RetryPolicy::default(),
            outbox_retry: RetryPolicy::default(),
            inbox_batch_size: 100,
            outbox_batch_size: 50,
            stale_pop_after_ms: 5 * 60 * 1000,
            feed_drive: transit.feed_drive,
            channel_drive_type: transit.channel_drive_type,
            max_part_bytes: transit.max_part_bytes,
        }
    }
}

impl TenantConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The subset the transit layer needs.
    pub fn transit(&self) -> TransitConfig {
        TransitConfig {
            session_ttl_ms: self.session_ttl_ms,
            feed_drive: self.feed_drive,
            channel_drive_type: self.channel_drive_type,
            max_part_bytes: self.max_part_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = TenantConfig::from_json(r#"{ "inbox_batch_size": 7 }"#).unwrap();
        assert_eq!(config.inbox_batch_size, 7);
        assert_eq!(config.outbox_retry.max_attempts, 30);
        assert_eq!(config.session_ttl_ms, 15 * 60 * 1000);
    }

    #[test]
    fn test_nested_retry_policy() {
        let config = TenantConfig::from_json(
            r#"{ "outbox_retry": { "max_attempts": 3 }, "stale_pop_after_ms": 1000 }"#,
        )
        .unwrap();
        assert_eq!(config.outbox_retry.max_attempts, 3);
        assert_eq!(config.outbox_retry.base_delay_ms, 5_000);
        assert_eq!(config.stale_pop_after_ms, 1000);
    }

    #[test]
    fn test_transit_subset() {
        let feed = TargetDrive::random();
        let config = TenantConfig {
            session_ttl_ms: 42,
            feed_drive: Some(feed),
            max_part_bytes: 1024,
            ..Default::default()
        };
        let transit = config.transit();
        assert_eq!(transit.session_ttl_ms, 42);
        assert_eq!(transit.feed_drive, Some(feed));
        assert_eq!(transit.max_part_bytes, 1024);
    }

    #[test]
    fn test_load_from_file() {
        let config = TenantConfig {
            outbox_batch_size: 3,
            ..Default::default()
        };
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_json().unwrap().as_bytes()).unwrap();

        let loaded = TenantConfig::load(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let err = TenantConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, crate::TenantError::Config(_)));
    }

    proptest::proptest! {
        #[test]
        fn test_json_round_trip_and_transit_subset(
            session_ttl_ms in 0i64..86_400_000,
            max_attempts in 1u32..100,
            inbox_batch_size in 1usize..1000,
            max_part_bytes in 1u64..u64::MAX,
            with_feed in proptest::prelude::any::<bool>(),
        ) {
            let config = TenantConfig {
                session_ttl_ms,
                inbox_retry: RetryPolicy { max_attempts, ..RetryPolicy::default() },
                inbox_batch_size,
                max_part_bytes,
                feed_drive: with_feed.then(TargetDrive::random),
                ..Default::default()
            };

            let loaded = TenantConfig::from_json(&config.to_json().unwrap()).unwrap();
            proptest::prop_assert_eq!(&loaded, &config);

            let transit = loaded.transit();
            proptest::prop_assert_eq!(transit.session_ttl_ms, session_ttl_ms);
            proptest::prop_assert_eq!(transit.max_part_bytes, max_part_bytes);
            proptest::prop_assert_eq!(transit.feed_drive, config.feed_drive);
        }
    }
}
