//! Tracker boot configuration
//!
//! The per-site configuration the collection API serves at
//! `GET /v1/config/:apiKey` (or that a host embeds inline). It is read-only to
//! the engine. Every field except `apiKey` has a default, so a minimal boot
//! object is `{"apiKey": "..."}`.
//!
//! ```
//! use leadtrail_core::client_config::TrackerConfig;
//!
//! let config = TrackerConfig::from_json(r#"{"apiKey": "sk_live_abc"}"#).unwrap();
//! assert_eq!(config.api_url, "http://localhost:5000");
//! assert_eq!(config.widgets.forms.batch_size, 10);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dom::Selector;
use crate::error::{Error, Result};

/// Longest delay (flush interval or debounce) a boot object may ask for: one day
pub const MAX_DELAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Complete boot configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerConfig {
    /// Site key; required
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    /// Raises per-event engine logs from debug to info
    #[serde(default)]
    pub debug_mode: bool,

    #[serde(default)]
    pub widgets: WidgetsConfig,

    #[serde(default)]
    pub theme: ThemeConfig,
}

fn default_api_url() -> String {
    "http://localhost:5000".to_string()
}

impl TrackerConfig {
    /// Minimal configuration for `api_key` with every default applied
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            api_url: default_api_url(),
            client_id: None,
            domain: None,
            app_version: None,
            debug_mode: false,
            widgets: WidgetsConfig::default(),
            theme: ThemeConfig::default(),
        }
    }

    /// Parse and validate a JSON boot object
    pub fn from_json(json: &str) -> Result<Self> {
        let config: TrackerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a boot object from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read tracker config {:?}: {}", path, e))
        })?;
        Self::from_json(&content)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(Error::Config("apiKey is required".to_string()));
        }
        if self.api_url.trim().is_empty() {
            return Err(Error::Config("apiUrl must not be empty".to_string()));
        }
        let forms = &self.widgets.forms;
        if forms.batch_size == 0 {
            return Err(Error::Config(
                "widgets.forms.batchSize must be greater than 0".to_string(),
            ));
        }
        for (key, value) in [
            ("widgets.forms.flushInterval", forms.flush_interval),
            ("widgets.forms.debounceMs", forms.debounce_ms),
            ("widgets.forms.batchCapture.debounceMs", forms.batch_capture.debounce_ms),
        ] {
            if value > MAX_DELAY_MS {
                return Err(Error::Config(format!(
                    "{} must be at most {} ms, got {}",
                    key, MAX_DELAY_MS, value
                )));
            }
        }
        if forms.enabled {
            forms.selector()?;
        }
        Ok(())
    }

    /// `apiUrl` without a trailing slash
    pub fn base_url(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }
}

/// Per-widget sections
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetsConfig {
    #[serde(default)]
    pub forms: FormsConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

/// Theme hints passed through to host rendering
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
}

// ============================================
// Forms
// ============================================

/// Form capture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Capture `form_submission` on submit
    #[serde(default = "default_true")]
    pub auto_capture: bool,

    #[serde(default = "default_capture_selector")]
    pub capture_selector: String,

    /// Field-interaction tracking for partial leads
    #[serde(default = "default_true")]
    pub track_interactions: bool,

    /// Case-insensitive substrings a field name must contain to be tracked
    #[serde(default = "default_track_fields")]
    pub track_fields: Vec<String>,

    /// Case-insensitive substrings that exclude (or redact) a field
    #[serde(default = "default_exclude_fields")]
    pub exclude_fields: Vec<String>,

    #[serde(default)]
    pub triggers: TriggersConfig,

    #[serde(default)]
    pub batch_capture: BatchCaptureConfig,

    /// Debounce for the legacy visibilitychange capture
    #[serde(default = "default_forms_debounce_ms")]
    pub debounce_ms: u64,

    /// Queue length that triggers a flush
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Auto-flush interval in milliseconds; 0 disables it
    #[serde(default = "default_flush_interval")]
    pub flush_interval: u64,
}

impl Default for FormsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_capture: true,
            capture_selector: default_capture_selector(),
            track_interactions: true,
            track_fields: default_track_fields(),
            exclude_fields: default_exclude_fields(),
            triggers: TriggersConfig::default(),
            batch_capture: BatchCaptureConfig::default(),
            debounce_ms: default_forms_debounce_ms(),
            batch_size: default_batch_size(),
            flush_interval: default_flush_interval(),
        }
    }
}

impl FormsConfig {
    /// Parsed capture selector
    pub fn selector(&self) -> Result<Selector> {
        Selector::parse(&self.capture_selector)
    }
}

fn default_true() -> bool {
    true
}

fn default_capture_selector() -> String {
    "form".to_string()
}

fn default_track_fields() -> Vec<String> {
    ["email", "phone", "name", "first_name", "last_name", "company", "organization"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_exclude_fields() -> Vec<String> {
    ["password", "credit_card", "ssn", "cvv"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_forms_debounce_ms() -> u64 {
    2000
}

fn default_batch_size() -> usize {
    10
}

fn default_flush_interval() -> u64 {
    5000
}

/// Which DOM events produce interaction captures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggersConfig {
    #[serde(default = "default_true")]
    pub blur: bool,
    #[serde(default = "default_true")]
    pub beforeunload: bool,
    #[serde(default = "default_true")]
    pub change: bool,
    #[serde(default)]
    pub visibilitychange: bool,
}

impl Default for TriggersConfig {
    fn default() -> Self {
        Self {
            blur: true,
            beforeunload: true,
            change: true,
            visibilitychange: false,
        }
    }
}

/// Batched interaction capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCaptureConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Quiet period after the last qualifying blur/change
    #[serde(default = "default_batch_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_min_fields")]
    pub min_fields_for_capture: usize,
    #[serde(default = "default_true")]
    pub capture_on_visibility_change: bool,
    #[serde(default = "default_true")]
    pub capture_on_before_unload: bool,
}

impl Default for BatchCaptureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            debounce_ms: default_batch_debounce_ms(),
            min_fields_for_capture: default_min_fields(),
            capture_on_visibility_change: true,
            capture_on_before_unload: true,
        }
    }
}

impl BatchCaptureConfig {
    /// Quiet period in ms; 0 means the default
    pub fn effective_debounce_ms(&self) -> u64 {
        if self.debounce_ms == 0 {
            default_batch_debounce_ms()
        } else {
            self.debounce_ms
        }
    }

    /// Minimum tracked fields before a batch goes out; 0 means the default
    pub fn effective_min_fields(&self) -> usize {
        if self.min_fields_for_capture == 0 {
            default_min_fields()
        } else {
            self.min_fields_for_capture
        }
    }
}

fn default_batch_debounce_ms() -> u64 {
    5000
}

fn default_min_fields() -> usize {
    1
}

// ============================================
// Chat & analytics
// ============================================

/// Corner the chat launcher is rendered in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChatPosition {
    #[default]
    BottomRight,
    BottomLeft,
}

impl ChatPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatPosition::BottomRight => "bottom-right",
            ChatPosition::BottomLeft => "bottom-left",
        }
    }
}

/// Chat widget configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub position: ChatPosition,
    #[serde(default = "default_chat_color")]
    pub color: String,
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            position: ChatPosition::default(),
            color: default_chat_color(),
            greeting: default_greeting(),
        }
    }
}

fn default_chat_color() -> String {
    "#0066cc".to_string()
}

fn default_greeting() -> String {
    "Hi! How can we help you today?".to_string()
}

/// Page analytics configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub track_page_views: bool,
    #[serde(default)]
    pub track_clicks: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_defaults() {
        let config = TrackerConfig::from_json(r#"{"apiKey": "sk_test"}"#).unwrap();
        let forms = &config.widgets.forms;

        assert_eq!(config.api_url, "http://localhost:5000");
        assert!(!config.debug_mode);
        assert!(!forms.enabled);
        assert!(forms.auto_capture);
        assert!(forms.track_interactions);
        assert_eq!(forms.capture_selector, "form");
        assert_eq!(forms.track_fields.len(), 7);
        assert_eq!(forms.exclude_fields, vec!["password", "credit_card", "ssn", "cvv"]);
        assert!(forms.triggers.blur && forms.triggers.change && forms.triggers.beforeunload);
        assert!(!forms.triggers.visibilitychange);
        assert!(!forms.batch_capture.enabled);
        assert_eq!(forms.batch_capture.debounce_ms, 5000);
        assert_eq!(forms.batch_capture.min_fields_for_capture, 1);
        assert_eq!(forms.debounce_ms, 2000);
        assert_eq!(forms.batch_size, 10);
        assert_eq!(forms.flush_interval, 5000);
        assert_eq!(config.widgets.chat.color, "#0066cc");
        assert_eq!(config.widgets.chat.position, ChatPosition::BottomRight);
        assert!(!config.widgets.analytics.track_page_views);
    }

    #[test]
    fn test_missing_api_key_is_fatal() {
        let err = TrackerConfig::from_json(r#"{"apiUrl": "https://x.test"}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = TrackerConfig::from_json(r#"{"apiKey": "  "}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_nested_partial_sections() {
        let json = r#"{
            "apiKey": "sk_live_abc123",
            "apiUrl": "https://api.example.com/",
            "widgets": {
                "forms": {
                    "enabled": true,
                    "captureSelector": "form.lead, #contact",
                    "triggers": {"visibilitychange": true},
                    "batchCapture": {"enabled": true, "minFieldsForCapture": 2}
                },
                "chat": {"enabled": true, "position": "bottom-left"}
            }
        }"#;
        let config = TrackerConfig::from_json(json).unwrap();
        let forms = &config.widgets.forms;

        assert_eq!(config.base_url(), "https://api.example.com");
        assert!(forms.triggers.visibilitychange);
        assert!(forms.triggers.blur);
        assert!(forms.batch_capture.enabled);
        assert_eq!(forms.batch_capture.min_fields_for_capture, 2);
        assert_eq!(forms.batch_capture.debounce_ms, 5000);
        assert!(forms.batch_capture.capture_on_before_unload);
        assert_eq!(config.widgets.chat.position, ChatPosition::BottomLeft);
        assert!(forms.selector().is_ok());
    }

    #[test]
    fn test_invalid_selector_rejected_when_forms_enabled() {
        let json = r#"{"apiKey": "k", "widgets": {"forms": {"enabled": true, "captureSelector": "form:hover"}}}"#;
        assert!(matches!(
            TrackerConfig::from_json(json),
            Err(Error::Selector { .. })
        ));
    }

    #[test]
    fn test_delays_above_one_day_rejected() {
        for config in [
            r#"{"apiKey": "k", "widgets": {"forms": {"flushInterval": 9000000000000000000}}}"#,
            r#"{"apiKey": "k", "widgets": {"forms": {"debounceMs": 86400001}}}"#,
            r#"{"apiKey": "k", "widgets": {"forms": {"batchCapture": {"debounceMs": 18446744073709551615}}}}"#,
        ] {
            let err = TrackerConfig::from_json(config).unwrap_err();
            assert!(err.to_string().contains("at most"), "{config}: {err}");
        }

        let one_day = r#"{"apiKey": "k", "widgets": {"forms": {"flushInterval": 86400000}}}"#;
        assert!(TrackerConfig::from_json(one_day).is_ok());
    }

    #[test]
    fn test_zero_batch_settings_fall_back_to_defaults() {
        let config = TrackerConfig::from_json(
            r#"{"apiKey": "k", "widgets": {"forms": {"batchCapture": {"debounceMs": 0, "minFieldsForCapture": 0}}}}"#,
        )
        .unwrap();
        let batch = &config.widgets.forms.batch_capture;

        assert_eq!(batch.effective_debounce_ms(), 5000);
        assert_eq!(batch.effective_min_fields(), 1);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let json = r#"{"apiKey": "k", "widgets": {"forms": {"batchSize": 0}}}"#;
        assert!(TrackerConfig::from_json(json).is_err());
    }
}
