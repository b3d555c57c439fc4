//! Chat widget lifecycle
//!
//! The host renders the launcher and panel; the widget only tracks whether it
//! is shown and open, and reports the lifecycle as events.

use crate::client_config::{ChatConfig, ChatPosition};
use crate::types::{EventType, WidgetPayload};

/// An event the widget wants recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetEvent {
    pub event_type: EventType,
    pub payload: WidgetPayload,
}

impl WidgetEvent {
    fn new(event_type: EventType, payload: WidgetPayload) -> Self {
        Self {
            event_type,
            payload,
        }
    }
}

/// State of the chat launcher
#[derive(Debug, Clone)]
pub struct ChatWidget {
    position: ChatPosition,
    color: String,
    greeting: String,
    shown: bool,
    open: bool,
}

impl ChatWidget {
    pub fn new(config: &ChatConfig) -> Self {
        Self {
            position: config.position,
            color: config.color.clone(),
            greeting: config.greeting.clone(),
            shown: false,
            open: false,
        }
    }

    pub fn position(&self) -> ChatPosition {
        self.position
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    pub fn greeting(&self) -> &str {
        &self.greeting
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn is_shown(&self) -> bool {
        self.shown
    }

    /// Render the launcher; `widget_shown` the first time only
    pub fn show(&mut self) -> Option<WidgetEvent> {
        if self.shown {
            return None;
        }
        self.shown = true;

        let mut payload = WidgetPayload::chat();
        payload.position = Some(self.position.as_str().to_string());
        Some(WidgetEvent::new(EventType::WidgetShown, payload))
    }

    /// Open or close the panel
    pub fn toggle(&mut self) -> WidgetEvent {
        self.open = !self.open;
        let event_type = if self.open {
            EventType::ChatOpened
        } else {
            EventType::ChatClosed
        };
        WidgetEvent::new(event_type, WidgetPayload::chat())
    }

    /// Send a visitor message; blank messages are dropped
    pub fn send(&mut self, message: &str) -> Option<WidgetEvent> {
        let message = message.trim();
        if message.is_empty() {
            return None;
        }

        let mut payload = WidgetPayload::chat();
        payload.message = Some(message.to_string());
        Some(WidgetEvent::new(EventType::ChatMessageSent, payload))
    }
}
