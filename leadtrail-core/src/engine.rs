//! The tracking engine
//!
//! [`Engine`] is the single owner of every piece of mutable tracker state:
//! the page mirror, the form registry, field state and debounce timers, the
//! chat widget and the event queue. Hosts drive it with three calls:
//!
//! - [`Engine::handle`] for DOM mutations and DOM events ([`HostEvent`])
//! - [`Engine::command`] for the public tracker API ([`Command`])
//! - [`Engine::tick`] whenever [`Engine::next_deadline`] has passed
//!
//! Capture components only return payloads; the engine stamps them with the
//! session context and queues them.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::capture::{
    DomWatcher, Emission, FieldFilter, FieldInteractionTracker, FormSubmissionCapture,
};
use crate::client_config::TrackerConfig;
use crate::clock::Clock;
use crate::collector::{Deliver, EventFactory, EventQueue, QueueStats};
use crate::dom::{ElementNode, FileInfo, NodeId, Page};
use crate::error::{Error, Result};
use crate::identity::{Identity, IdentityStore};
use crate::types::{
    EventType, FieldValue, FormPayload, FormSubmission, PageEnvironment, TrackEvent,
};
use crate::widget::{ChatWidget, WidgetEvent};

/// Tracker version reported in `tracker_initialized`
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================
// Host API
// ============================================

/// Something that happened on the page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    /// Subtrees added under `parent` (document root when `None`) and
    /// nodes removed, in the same mutation record
    Mutation {
        #[serde(default)]
        parent: Option<NodeId>,
        #[serde(default)]
        added: Vec<ElementNode>,
        #[serde(default)]
        removed: Vec<NodeId>,
    },
    /// The visitor edited a control
    Input {
        node: NodeId,
        #[serde(default)]
        value: Option<String>,
        #[serde(default)]
        checked: Option<bool>,
        #[serde(default)]
        files: Option<Vec<FileInfo>>,
    },
    Blur {
        node: NodeId,
    },
    /// `change` on a control, with its new state
    Change {
        node: NodeId,
        #[serde(default)]
        value: Option<String>,
        #[serde(default)]
        checked: Option<bool>,
    },
    /// A form (or a control inside it) was submitted
    Submit {
        form: NodeId,
    },
    VisibilityChange {
        hidden: bool,
    },
    BeforeUnload,
    /// Client-side navigation to a new location
    Navigate {
        environment: PageEnvironment,
    },
    Chat {
        action: ChatAction,
    },
}

/// Visitor action on the chat widget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatAction {
    Toggle,
    Send { message: String },
}

/// Public tracker API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Record a submission the host collected itself
    #[serde(rename_all = "camelCase")]
    TrackForm {
        form_id: String,
        form_name: String,
        #[serde(default)]
        fields: BTreeMap<String, FieldValue>,
    },
    /// Attach traits to the current visitor
    Identify(serde_json::Map<String, serde_json::Value>),
    /// Custom event
    Track {
        name: String,
        #[serde(default)]
        properties: Option<serde_json::Value>,
    },
}

/// Collaborators supplied by the host
pub struct EngineDeps {
    pub clock: Arc<dyn Clock>,
    pub identity: IdentityStore,
    pub transport: Box<dyn Deliver>,
    pub environment: PageEnvironment,
}

impl EngineDeps {
    /// Volatile identity and a default page environment
    pub fn in_memory(clock: Arc<dyn Clock>, transport: Box<dyn Deliver>) -> Self {
        Self {
            identity: IdentityStore::in_memory(clock.clone()),
            clock,
            transport,
            environment: PageEnvironment::default(),
        }
    }
}

// ============================================
// Engine
// ============================================

/// Capture-and-delivery engine for one page
pub struct Engine {
    config: TrackerConfig,
    clock: Arc<dyn Clock>,
    identity: IdentityStore,
    factory: EventFactory,
    queue: EventQueue,
    page: Page,
    /// Present when form capture is enabled
    watcher: Option<DomWatcher>,
    /// Present when interaction tracking is enabled
    tracker: Option<FieldInteractionTracker>,
    submissions: FormSubmissionCapture,
    chat: Option<ChatWidget>,
    started: bool,
    hidden: bool,
    /// Commands received before `start`
    pending_commands: Vec<Command>,
}

impl Engine {
    /// Create an engine; fails if the configuration is unusable
    pub fn new(config: TrackerConfig, deps: EngineDeps) -> Result<Self> {
        config.validate()?;

        let forms = &config.widgets.forms;
        let watcher = if forms.enabled {
            Some(DomWatcher::new(forms.selector()?))
        } else {
            None
        };
        let tracker = (forms.enabled && forms.track_interactions)
            .then(|| FieldInteractionTracker::new(forms));
        let submissions = FormSubmissionCapture::new(FieldFilter::from_config(forms));
        let queue = EventQueue::new(deps.transport, forms.batch_size);
        let factory = EventFactory::new(&config.api_key, deps.environment);

        Ok(Self {
            clock: deps.clock,
            identity: deps.identity,
            factory,
            queue,
            page: Page::new(),
            watcher,
            tracker,
            submissions,
            chat: None,
            started: false,
            hidden: false,
            pending_commands: Vec::new(),
            config,
        })
    }

    /// Initialize identity, attach capture and replay queued commands
    ///
    /// Calling it again is a no-op.
    pub fn start(&mut self) {
        if self.started {
            tracing::debug!("Tracker already started");
            return;
        }
        self.started = true;
        let now = self.clock.now();

        let identity = self.identity.snapshot();
        tracing::info!(
            visitor_id = %identity.visitor_id,
            session_id = %identity.session_id,
            strategy = self.strategy(),
            "Starting tracker"
        );

        self.queue
            .start_auto_flush(self.config.widgets.forms.flush_interval, now);

        let analytics = &self.config.widgets.analytics;
        if analytics.enabled && analytics.track_page_views {
            self.track_pageview(now);
        }

        if let Some(watcher) = self.watcher.as_mut() {
            let attached = watcher.scan(&self.page);
            tracing::debug!(forms = attached.len(), "Attached form capture");
        }

        if self.config.widgets.chat.enabled {
            let mut chat = ChatWidget::new(&self.config.widgets.chat);
            let shown = chat.show();
            self.chat = Some(chat);
            if let Some(event) = shown {
                self.record_widget(event, now);
            }
        }

        let mut initialized = self.build(EventType::TrackerInitialized, now);
        initialized.config = Some(self.features());
        self.record(initialized);

        let pending = std::mem::take(&mut self.pending_commands);
        if !pending.is_empty() {
            tracing::debug!(commands = pending.len(), "Replaying queued commands");
        }
        for command in pending {
            self.run_command(command);
        }
    }

    /// Process one host event; failures are logged, never returned
    pub fn handle(&mut self, event: HostEvent) {
        if let Err(e) = self.dispatch(event) {
            tracing::debug!(error = %e, "Skipped host event");
        }
    }

    /// Run a public API command, queueing it until `start`
    pub fn command(&mut self, command: Command) {
        if !self.started {
            tracing::debug!("Tracker not started, queueing command");
            self.pending_commands.push(command);
            return;
        }
        self.run_command(command);
    }

    /// Fire due debounce timers and the auto flush
    pub fn tick(&mut self) {
        if !self.started {
            return;
        }
        let now = self.clock.now();

        if let Some(tracker) = self.tracker.as_mut() {
            let attached = self
                .watcher
                .as_ref()
                .map(|w| w.attached().to_vec())
                .unwrap_or_default();
            let emission = tracker.tick(&self.page, &attached, now);
            self.apply(emission, now);
        }

        self.queue.tick(now);
    }

    /// Earliest instant at which [`Engine::tick`] has work to do
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        let tracker = self.tracker.as_ref().and_then(|t| t.next_deadline());
        match (tracker, self.queue.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Stop the auto flush and deliver whatever is pending
    pub fn shutdown(&mut self) -> QueueStats {
        self.queue.stop_auto_flush();
        self.queue.flush();
        let stats = self.queue.stats().clone();
        tracing::info!(
            batches = stats.batches_flushed,
            events = stats.events_flushed,
            failed = stats.failed_deliveries,
            "Tracker shut down"
        );
        stats
    }

    // ============================================
    // Accessors
    // ============================================

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Current time on the engine's clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn identity(&mut self) -> Identity {
        self.identity.snapshot()
    }

    pub fn watcher(&self) -> Option<&DomWatcher> {
        self.watcher.as_ref()
    }

    pub fn tracker(&self) -> Option<&FieldInteractionTracker> {
        self.tracker.as_ref()
    }

    pub fn chat(&self) -> Option<&ChatWidget> {
        self.chat.as_ref()
    }

    /// Events waiting for the next flush
    pub fn pending_events(&self) -> &[TrackEvent] {
        self.queue.pending()
    }

    pub fn pending_commands(&self) -> usize {
        self.pending_commands.len()
    }

    pub fn stats(&self) -> &QueueStats {
        self.queue.stats()
    }

    /// Deliver pending events now
    pub fn flush(&mut self) {
        self.queue.flush();
    }

    // ============================================
    // Host events
    // ============================================

    fn dispatch(&mut self, event: HostEvent) -> Result<()> {
        match event {
            HostEvent::Mutation {
                parent,
                added,
                removed,
            } => {
                self.on_mutation(parent, added, removed);
                Ok(())
            }
            // Controls are edited before start; capture waits for it
            HostEvent::Input {
                node,
                value,
                checked,
                files,
            } => self.on_input(node, value, checked, files),
            _ if !self.started => {
                tracing::debug!("Tracker not started, ignoring host event");
                Ok(())
            }
            HostEvent::Blur { node } => self.on_blur(node),
            HostEvent::Change {
                node,
                value,
                checked,
            } => self.on_change(node, value, checked),
            HostEvent::Submit { form } => self.on_submit(form),
            HostEvent::VisibilityChange { hidden } => {
                self.on_visibility_change(hidden);
                Ok(())
            }
            HostEvent::BeforeUnload => {
                self.on_before_unload();
                Ok(())
            }
            HostEvent::Navigate { environment } => {
                self.on_navigate(environment);
                Ok(())
            }
            HostEvent::Chat { action } => {
                self.on_chat(action);
                Ok(())
            }
        }
    }

    fn on_mutation(&mut self, parent: Option<NodeId>, added: Vec<ElementNode>, removed: Vec<NodeId>) {
        let now = self.clock.now();

        for node in removed {
            if !self.page.contains(node) {
                tracing::debug!(node = %node, "Removed node is not on the page");
                continue;
            }

            for form in self.attached_within(node) {
                self.detach_form(form, now);
            }
            if let Err(e) = self.page.remove(node) {
                tracing::debug!(node = %node, error = %e, "Could not remove node");
            }
        }

        let mut roots = Vec::with_capacity(added.len());
        for node in added {
            let root = node.id;
            // re-registering a subtree replaces it; forms it no longer holds are gone
            let previous = self.attached_within(root);
            match self.page.insert(parent, node) {
                Ok(_) => roots.push(root),
                Err(e) => tracing::debug!(node = %root, error = %e, "Could not add node"),
            }
            for form in previous {
                if !self.page.contains(form) {
                    self.detach_form(form, now);
                }
            }
        }

        if self.started && !roots.is_empty() {
            if let Some(watcher) = self.watcher.as_mut() {
                let attached = watcher.on_added(&self.page, &roots);
                if !attached.is_empty() {
                    tracing::debug!(forms = attached.len(), "Attached forms added after load");
                }
            }
        }
    }

    /// Attached forms at or below `root`; empty when `root` is not on the page
    fn attached_within(&self, root: NodeId) -> Vec<NodeId> {
        match self.watcher.as_ref() {
            Some(watcher) if self.page.contains(root) => watcher.attached_within(&self.page, root),
            _ => Vec::new(),
        }
    }

    /// Emit what `form` still owes and forget it
    fn detach_form(&mut self, form: NodeId, now: DateTime<Utc>) {
        if let Some(tracker) = self.tracker.as_mut() {
            let emission = tracker.detach_form(&self.page, form, now);
            self.apply(emission, now);
        }
        if let Some(watcher) = self.watcher.as_mut() {
            watcher.detach(form);
        }
    }

    fn on_input(
        &mut self,
        node: NodeId,
        value: Option<String>,
        checked: Option<bool>,
        files: Option<Vec<FileInfo>>,
    ) -> Result<()> {
        if let Some(value) = value {
            self.page.set_value(node, &value)?;
        }
        if let Some(checked) = checked {
            self.page.set_checked(node, checked)?;
        }
        if let Some(files) = files {
            self.page.set_files(node, files)?;
        }
        Ok(())
    }

    fn on_blur(&mut self, node: NodeId) -> Result<()> {
        let Some(form) = self.captured_form_of(node)? else {
            return Ok(());
        };
        let now = self.clock.now();
        if let Some(tracker) = self.tracker.as_mut() {
            let emission = tracker.on_blur(&self.page, form, node, now);
            self.apply(emission, now);
        }
        Ok(())
    }

    fn on_change(&mut self, node: NodeId, value: Option<String>, checked: Option<bool>) -> Result<()> {
        self.on_input(node, value, checked, None)?;

        let Some(form) = self.captured_form_of(node)? else {
            return Ok(());
        };
        let now = self.clock.now();
        if let Some(tracker) = self.tracker.as_mut() {
            let emission = tracker.on_change(&self.page, form, node, now);
            self.apply(emission, now);
        }
        Ok(())
    }

    fn on_submit(&mut self, node: NodeId) -> Result<()> {
        if !self.config.widgets.forms.auto_capture {
            return Ok(());
        }
        let form = match self.page.element(node) {
            Some(element) if element.is_form() => node,
            Some(_) => match self.page.form_of(node) {
                Some(form) => form,
                None => return Ok(()),
            },
            None => return Err(Error::UnknownNode(node.0)),
        };
        if !self.watcher.as_ref().is_some_and(|w| w.is_attached(form)) {
            return Ok(());
        }

        let now = self.clock.now();
        let Some(mut submission) = self.submissions.extract(&self.page, form, now) else {
            return Ok(());
        };
        submission.form_action = self.resolve_action(submission.form_action.take());

        self.log_event("Form submitted", &submission.form_id);
        let mut event = self.build(EventType::FormSubmission, now);
        event.form = Some(FormPayload::Submission(submission));
        self.record(event);
        Ok(())
    }

    fn on_visibility_change(&mut self, hidden: bool) {
        self.hidden = hidden;
        let now = self.clock.now();
        if let Some(tracker) = self.tracker.as_mut() {
            let emission = tracker.on_visibility_change(&self.page, hidden, now);
            self.apply(emission, now);
        }
    }

    fn on_before_unload(&mut self) {
        let now = self.clock.now();
        if let Some(tracker) = self.tracker.as_mut() {
            let attached = self
                .watcher
                .as_ref()
                .map(|w| w.attached().to_vec())
                .unwrap_or_default();
            let emission = tracker.on_before_unload(&self.page, &attached, now);
            self.apply(emission, now);
        }
        self.queue.flush();
    }

    fn on_navigate(&mut self, environment: PageEnvironment) {
        self.factory.set_environment(environment);
        let analytics = &self.config.widgets.analytics;
        if analytics.enabled && analytics.track_page_views {
            let now = self.clock.now();
            self.track_pageview(now);
        }
    }

    fn on_chat(&mut self, action: ChatAction) {
        let now = self.clock.now();
        let Some(chat) = self.chat.as_mut() else {
            tracing::debug!("Chat widget is disabled");
            return;
        };
        let event = match action {
            ChatAction::Toggle => Some(chat.toggle()),
            ChatAction::Send { message } => chat.send(&message),
        };
        if let Some(event) = event {
            self.record_widget(event, now);
        }
    }

    // ============================================
    // Commands
    // ============================================

    fn run_command(&mut self, command: Command) {
        let now = self.clock.now();
        match command {
            Command::TrackForm {
                form_id,
                form_name,
                fields,
            } => {
                if !self.config.widgets.forms.enabled {
                    tracing::warn!(form_id = %form_id, "Form tracking is disabled, ignoring trackForm");
                    return;
                }
                let submission = FormSubmission {
                    form_id,
                    form_name,
                    form_action: None,
                    fields: self.submissions.redact(fields),
                    submitted_at: now,
                };
                let mut event = self.build(EventType::FormSubmission, now);
                event.form = Some(FormPayload::Submission(submission));
                self.record(event);
            }
            Command::Identify(traits) => {
                let mut event = self.build(EventType::Identify, now);
                event.traits = Some(traits);
                self.record(event);
            }
            Command::Track { name, properties } => {
                let mut event = self.build(EventType::Custom, now);
                event.name = Some(name);
                event.properties = properties;
                self.record(event);
            }
        }
    }

    // ============================================
    // Event plumbing
    // ============================================

    /// Attached form containing `node`, if any
    fn captured_form_of(&self, node: NodeId) -> Result<Option<NodeId>> {
        if !self.page.contains(node) {
            return Err(Error::UnknownNode(node.0));
        }
        let Some(watcher) = self.watcher.as_ref() else {
            return Ok(None);
        };
        Ok(self.page.form_of(node).filter(|form| watcher.is_attached(*form)))
    }

    /// Absolute form action, resolved against the page URL
    fn resolve_action(&self, action: Option<String>) -> Option<String> {
        let Ok(base) = Url::parse(self.factory.url()) else {
            return action;
        };
        match action {
            Some(action) => Some(base.join(&action).map(|u| u.to_string()).unwrap_or(action)),
            None => Some(base.to_string()),
        }
    }

    fn apply(&mut self, emission: Emission, now: DateTime<Utc>) {
        for interaction in emission.interactions {
            self.log_event("Form interaction", &interaction.form_id);
            let mut event = self.build(EventType::FormInteraction, now);
            event.form = Some(FormPayload::Interaction(interaction));
            self.record(event);
        }
        if emission.flush {
            self.queue.flush();
        }
    }

    fn track_pageview(&mut self, now: DateTime<Utc>) {
        let mut page = self.factory.page();
        page.referrer = self
            .factory
            .environment()
            .referrer
            .clone()
            .filter(|r| !r.is_empty());
        let mut event = self.build(EventType::Pageview, now);
        event.page = Some(page);
        self.record(event);
    }

    fn record_widget(&mut self, widget: WidgetEvent, now: DateTime<Utc>) {
        let mut event = self.build(widget.event_type, now);
        event.widget = Some(widget.payload);
        self.record(event);
    }

    fn build(&mut self, event_type: EventType, now: DateTime<Utc>) -> TrackEvent {
        self.factory.build(event_type, &mut self.identity, now)
    }

    fn record(&mut self, event: TrackEvent) {
        if self.config.debug_mode {
            tracing::info!(event_type = %event.event_type, id = %event.id, "Tracked event");
        } else {
            tracing::debug!(event_type = %event.event_type, id = %event.id, "Tracked event");
        }
        self.queue.enqueue(event);
    }

    fn log_event(&self, message: &str, form_id: &str) {
        if self.config.debug_mode {
            tracing::info!(form_id = %form_id, "{}", message);
        } else {
            tracing::debug!(form_id = %form_id, "{}", message);
        }
    }

    fn strategy(&self) -> &'static str {
        self.tracker
            .as_ref()
            .map(|t| t.strategy().as_str())
            .unwrap_or("disabled")
    }

    /// `config` block of `tracker_initialized`
    fn features(&self) -> serde_json::Value {
        let widgets = &self.config.widgets;
        let analytics = &widgets.analytics;
        serde_json::json!({
            "clientId": self.config.client_id,
            "version": VERSION,
            "strategy": self.strategy(),
            "features": {
                "formSubmissions": widgets.forms.enabled,
                "formInteractions": self.tracker.is_some(),
                "fieldTriggers": widgets.forms.triggers,
                "batchCapture": widgets.forms.batch_capture.enabled,
                "chatWidget": widgets.chat.enabled,
                "pageViews": analytics.enabled && analytics.track_page_views,
                "clickTracking": analytics.enabled && analytics.track_clicks,
            }
        })
    }
}
