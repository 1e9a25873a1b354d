use bus::{EventSink, NullSink};
use core_types::WindowId;
use serde::Deserialize;
use snapshot::NodePolicy;
use std::fmt;
use std::time::Duration;

use crate::error::ConfigError;

/// Serializable capture settings.
///
/// ```toml
/// record_cross_origin_iframes = true
/// handshake_timeout_ms = 5000
///
/// [policy]
/// block_class = "private"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Track cross-origin iframes through the frame message protocol.
    pub record_cross_origin_iframes: bool,
    pub policy: NodePolicy,
    /// How long a cross-origin context may stay without a snapshot.
    pub handshake_timeout_ms: u64,
    /// Abort a tick on the first invariant violation instead of skipping
    /// the offending record.
    pub strict: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            record_cross_origin_iframes: false,
            policy: NodePolicy::default(),
            handshake_timeout_ms: 10_000,
            strict: cfg!(debug_assertions),
        }
    }
}

impl CaptureConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

/// Everything `start_capture` needs besides the host.
pub struct CaptureOptions {
    pub config: CaptureConfig,
    pub(crate) sink: Box<dyn EventSink>,
    pub(crate) parent_window: Option<WindowId>,
}

impl CaptureOptions {
    pub fn new(sink: impl EventSink + 'static) -> Self {
        Self {
            config: CaptureConfig::default(),
            sink: Box::new(sink),
            parent_window: None,
        }
    }

    /// Options for a session running inside a cross-origin nested document.
    ///
    /// The session answers handshakes from `parent_window` and forwards its
    /// snapshot and batches there instead of to a local sink.
    pub fn cross_origin_child(parent_window: WindowId) -> Self {
        Self {
            config: CaptureConfig::default(),
            sink: Box::new(NullSink),
            parent_window: Some(parent_window),
        }
    }

    pub fn with_config(mut self, config: CaptureConfig) -> Self {
        self.config = config;
        self
    }

    pub fn record_cross_origin_iframes(mut self, enabled: bool) -> Self {
        self.config.record_cross_origin_iframes = enabled;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.config.strict = strict;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout_ms = timeout.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    pub fn policy(mut self, policy: NodePolicy) -> Self {
        self.config.policy = policy;
        self
    }
}

impl fmt::Debug for CaptureOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureOptions")
            .field("config", &self.config)
            .field("parent_window", &self.parent_window)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        assert_eq!(CaptureConfig::from_toml_str("").unwrap(), CaptureConfig::default());
    }

    #[test]
    fn toml_overrides_nested_policy() {
        let config = CaptureConfig::from_toml_str(
            r#"
            record_cross_origin_iframes = true
            handshake_timeout_ms = 250
            strict = false

            [policy]
            block_class = "private"
            slim_comments = true
            "#,
        )
        .unwrap();
        assert!(config.record_cross_origin_iframes);
        assert!(!config.strict);
        assert_eq!(config.handshake_timeout(), Duration::from_millis(250));
        assert_eq!(config.policy.block_class, "private");
        assert_eq!(config.policy.ignore_class, "rr-ignore");
        assert!(config.policy.slim_comments);
    }

    #[test]
    fn bad_toml_is_reported() {
        assert!(CaptureConfig::from_toml_str("handshake_timeout_ms = \"soon\"").is_err());
    }
}
