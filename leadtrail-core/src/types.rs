//! Core domain types for leadtrail
//!
//! These types are the wire shape the collection endpoint accepts at
//! `POST /v1/track/events`. Field names are camelCase on the wire; the session
//! context (url, ids, duration...) is flattened into the event object.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Visitor** | A browser profile, identified durably across visits |
//! | **Session** | One browsing session of a visitor (ephemeral scope) |
//! | **Tracked form** | A form matching the capture selector that has seen activity |
//! | **Tracked field** | A control whose name passes the track/exclude lists |
//! | **Batch capture** | One `form_interaction` carrying every tracked field of a form |
//!
//! Events are immutable once built and consumed exactly once by a queue flush.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Event envelope
// ============================================

/// Kind of tracking event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Pageview,
    FormSubmission,
    FormInteraction,
    ChatOpened,
    ChatClosed,
    ChatMessageSent,
    WidgetShown,
    TrackerInitialized,
    Identify,
    Custom,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Pageview => "pageview",
            EventType::FormSubmission => "form_submission",
            EventType::FormInteraction => "form_interaction",
            EventType::ChatOpened => "chat_opened",
            EventType::ChatClosed => "chat_closed",
            EventType::ChatMessageSent => "chat_message_sent",
            EventType::WidgetShown => "widget_shown",
            EventType::TrackerInitialized => "tracker_initialized",
            EventType::Identify => "identify",
            EventType::Custom => "custom",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pageview" => Ok(EventType::Pageview),
            "form_submission" => Ok(EventType::FormSubmission),
            "form_interaction" => Ok(EventType::FormInteraction),
            "chat_opened" => Ok(EventType::ChatOpened),
            "chat_closed" => Ok(EventType::ChatClosed),
            "chat_message_sent" => Ok(EventType::ChatMessageSent),
            "widget_shown" => Ok(EventType::WidgetShown),
            "tracker_initialized" => Ok(EventType::TrackerInitialized),
            "identify" => Ok(EventType::Identify),
            "custom" => Ok(EventType::Custom),
            _ => Err(format!("unknown event type: {}", s)),
        }
    }
}

/// Context attached to every event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    /// When the event was created (ISO-8601, millisecond precision, `Z`)
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
    /// Absolute http(s) URL of the page
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    pub user_agent: String,
    /// `"<width>x<height>"`
    pub screen_resolution: String,
    pub session_id: String,
    pub visitor_id: String,
    /// Milliseconds since the session started
    pub duration: i64,
}

/// A single tracking event as sent to the collection endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub api_key: String,
    #[serde(flatten)]
    pub context: SessionContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<PageProperties>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form: Option<FormPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget: Option<WidgetPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traits: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

impl TrackEvent {
    /// Interaction payload, if this is a `form_interaction`
    pub fn interaction(&self) -> Option<&FormInteraction> {
        match &self.form {
            Some(FormPayload::Interaction(interaction)) => Some(interaction),
            _ => None,
        }
    }

    /// Submission payload, if this is a `form_submission`
    pub fn submission(&self) -> Option<&FormSubmission> {
        match &self.form {
            Some(FormPayload::Submission(submission)) => Some(submission),
            _ => None,
        }
    }
}

// ============================================
// Page environment
// ============================================

/// Facts about the page the engine is embedded in, supplied by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageEnvironment {
    /// Location as the host reports it; normalized before it goes on the wire
    pub url: String,
    pub title: String,
    pub referrer: Option<String>,
    pub user_agent: String,
    pub screen_width: u32,
    pub screen_height: u32,
}

impl Default for PageEnvironment {
    fn default() -> Self {
        Self {
            url: "https://localhost/".to_string(),
            title: String::new(),
            referrer: None,
            user_agent: concat!("leadtrail/", env!("CARGO_PKG_VERSION")).to_string(),
            screen_width: 0,
            screen_height: 0,
        }
    }
}

impl PageEnvironment {
    pub fn screen_resolution(&self) -> String {
        format!("{}x{}", self.screen_width, self.screen_height)
    }
}

/// `page` block of an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageProperties {
    pub title: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
}

// ============================================
// Form payloads
// ============================================

/// `form` block: shape depends on the event type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormPayload {
    Submission(FormSubmission),
    Interaction(FormInteraction),
}

/// Payload of a `form_submission`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSubmission {
    pub form_id: String,
    pub form_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_action: Option<String>,
    pub fields: BTreeMap<String, FieldValue>,
    /// When the submit happened; distinct from the event timestamp
    #[serde(with = "iso_millis")]
    pub submitted_at: DateTime<Utc>,
}

/// A submitted control value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    File(FileField),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

/// File input metadata; file contents are never captured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "file", rename_all = "camelCase")]
pub struct FileField {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

/// What caused a `form_interaction`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InteractionTrigger {
    #[serde(rename = "blur")]
    Blur,
    #[serde(rename = "change")]
    Change,
    #[serde(rename = "beforeunload")]
    BeforeUnload,
    #[serde(rename = "visibilitychange")]
    VisibilityChange,
    #[serde(rename = "batch_capture")]
    BatchCapture,
}

impl InteractionTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionTrigger::Blur => "blur",
            InteractionTrigger::Change => "change",
            InteractionTrigger::BeforeUnload => "beforeunload",
            InteractionTrigger::VisibilityChange => "visibilitychange",
            InteractionTrigger::BatchCapture => "batch_capture",
        }
    }
}

/// Payload of a `form_interaction`
///
/// Single-field events carry `fieldName`/`fieldValue`/`fieldType`; batch and
/// abandonment events carry `fields` instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormInteraction {
    pub form_id: String,
    pub trigger: InteractionTrigger,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_progress: Option<FormProgress>,
}

/// Completion of a form at the moment of an interaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormProgress {
    pub completed_fields: Vec<String>,
    pub total_fields: usize,
    pub percent_complete: u32,
}

// ============================================
// Widget payloads
// ============================================

/// `widget` block of chat events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetPayload {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl WidgetPayload {
    pub fn chat() -> Self {
        Self {
            kind: "chat".to_string(),
            position: None,
            message: None,
        }
    }
}

/// Serde adapter for `2025-01-01T00:00:00.000Z` timestamps
pub mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(value: &DateTime<Utc>) -> String {
        value.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
