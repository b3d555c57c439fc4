//! Event construction for the collection endpoint
//!
//! [`EventFactory`] stamps every event with the session context: a fresh
//! event id, the creation timestamp, the normalized page URL and the visitor
//! and session identity. Payload blocks (`form`, `widget`, ...) are attached
//! by the caller.
//!
//! ## URL Semantics
//!
//! The endpoint validates `url` as an absolute http(s) URL. Pages served from
//! other schemes (`file:`, `about:`, app shells) are reported as
//! `https://localhost` plus their real path, and anything unparsable becomes
//! `https://localhost/`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::identity::IdentityStore;
use crate::types::{EventType, PageEnvironment, PageProperties, SessionContext, TrackEvent};

const FALLBACK_URL: &str = "https://localhost/";

/// Body of `POST /v1/track/events`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventBatch {
    /// Events in enqueue order
    pub events: Vec<TrackEvent>,
}

impl EventBatch {
    pub fn new(events: Vec<TrackEvent>) -> Self {
        Self { events }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Serialized request body
    pub fn to_body(&self) -> crate::error::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Coerce a page location into an absolute http(s) URL
pub fn normalize_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => url.to_string(),
        Ok(url) => {
            let path = url.path();
            let path = if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{}", path)
            };
            Url::parse(&format!("https://localhost{}", path))
                .map(|u| u.to_string())
                .unwrap_or_else(|_| FALLBACK_URL.to_string())
        }
        Err(e) => {
            tracing::debug!(url = %raw, error = %e, "Unparsable page URL, using fallback");
            FALLBACK_URL.to_string()
        }
    }
}

/// Builds events stamped with the current session context
#[derive(Debug, Clone)]
pub struct EventFactory {
    api_key: String,
    environment: PageEnvironment,
    url: String,
}

impl EventFactory {
    pub fn new(api_key: &str, environment: PageEnvironment) -> Self {
        let url = normalize_url(&environment.url);
        Self {
            api_key: api_key.to_string(),
            environment,
            url,
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn environment(&self) -> &PageEnvironment {
        &self.environment
    }

    /// Normalized page URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Replace the page environment (client-side navigation)
    pub fn set_environment(&mut self, environment: PageEnvironment) {
        self.url = normalize_url(&environment.url);
        self.environment = environment;
    }

    /// `page` block for the current location
    pub fn page(&self) -> PageProperties {
        let parsed = Url::parse(&self.url).ok();
        let title = if self.environment.title.trim().is_empty() {
            "Untitled".to_string()
        } else {
            self.environment.title.clone()
        };

        PageProperties {
            title,
            path: parsed
                .as_ref()
                .map(|u| u.path().to_string())
                .unwrap_or_else(|| "/".to_string()),
            search: parsed
                .as_ref()
                .and_then(|u| u.query())
                .map(|q| format!("?{}", q)),
            hash: parsed
                .as_ref()
                .and_then(|u| u.fragment())
                .map(|f| format!("#{}", f)),
            referrer: None,
        }
    }

    /// New event of `event_type` with the context filled in and no payload
    pub fn build(
        &self,
        event_type: EventType,
        identity: &mut IdentityStore,
        now: DateTime<Utc>,
    ) -> TrackEvent {
        let context = SessionContext {
            timestamp: now,
            url: self.url.clone(),
            referrer: self
                .environment
                .referrer
                .clone()
                .filter(|r| !r.is_empty()),
            user_agent: self.environment.user_agent.clone(),
            screen_resolution: self.environment.screen_resolution(),
            session_id: identity.session_id(),
            visitor_id: identity.visitor_id(),
            duration: identity.session_duration_ms(),
        };

        TrackEvent {
            id: uuid::Uuid::new_v4().to_string(),
            event_type,
            api_key: self.api_key.clone(),
            context,
            page: None,
            form: None,
            widget: None,
            traits: None,
            name: None,
            properties: None,
            config: None,
        }
    }
}
