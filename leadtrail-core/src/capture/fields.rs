//! Field interaction tracking
//!
//! Per form and per field, a value moves through
//!
//! ```text
//! untouched ──blur/change──► has value (debounced) ──timer/hide/unload──► sent
//!                                  ▲                                       │
//!                                  └─────────────── new activity ──────────┘
//! ```
//!
//! Two strategies share the same eligibility rules:
//!
//! - [`CaptureStrategy::Batched`]: qualifying blur/change activity is kept in
//!   memory and resets the form's debounce timer. When the timer fires, one
//!   `form_interaction` carries every tracked field of the form. Hiding the
//!   page or unloading it force-sends every form with unsent activity.
//! - [`CaptureStrategy::Legacy`]: each qualifying blur/change is sent as its
//!   own event. Unload (and, optionally, a debounced hide) captures the
//!   non-blank tracked values still sitting in the forms.
//!
//! The tracker returns payloads in an [`Emission`]; it never queues events
//! itself.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};

use crate::client_config::{BatchCaptureConfig, FormsConfig, TriggersConfig};
use crate::dom::{NodeId, Page};
use crate::timers::TimerArena;
use crate::types::{FormInteraction, InteractionTrigger};
use crate::utils;

use super::filter::FieldFilter;
use super::progress::form_progress;

/// A form sent more recently than this is not sent again
const RESEND_GUARD_MS: i64 = 1000;

/// Control types whose `change` event counts as an interaction
const CHANGE_TYPES: [&str; 4] = ["select-one", "select-multiple", "checkbox", "radio"];

/// How interactions become events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStrategy {
    /// One debounced event per form with every tracked field
    Batched,
    /// One event per qualifying blur/change
    Legacy,
}

impl CaptureStrategy {
    pub fn from_config(forms: &FormsConfig) -> Self {
        if forms.batch_capture.enabled {
            CaptureStrategy::Batched
        } else {
            CaptureStrategy::Legacy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureStrategy::Batched => "batched",
            CaptureStrategy::Legacy => "legacy",
        }
    }
}

/// Last known state of one tracked field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldState {
    pub last_value: String,
    pub last_activity_at: DateTime<Utc>,
    pub last_sent_at: Option<DateTime<Utc>>,
}

/// A form that has seen qualifying activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedForm {
    pub form_id: String,
    pub node: NodeId,
    pub fields: BTreeMap<String, FieldState>,
    pub last_activity_at: DateTime<Utc>,
    pub last_sent_at: Option<DateTime<Utc>>,
}

impl TrackedForm {
    fn new(form_id: String, node: NodeId, now: DateTime<Utc>) -> Self {
        Self {
            form_id,
            node,
            fields: BTreeMap::new(),
            last_activity_at: now,
            last_sent_at: None,
        }
    }

    /// Never sent, or active since the last send
    pub fn has_unsent_activity(&self) -> bool {
        match self.last_sent_at {
            None => true,
            Some(sent) => self.last_activity_at > sent,
        }
    }

    /// Field name to latest value
    pub fn values(&self) -> BTreeMap<String, String> {
        self.fields
            .iter()
            .map(|(name, state)| (name.clone(), state.last_value.clone()))
            .collect()
    }
}

/// Payloads produced by one tracker step
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Emission {
    /// `form_interaction` payloads, in emission order
    pub interactions: Vec<FormInteraction>,
    /// The queue must be flushed right after these are enqueued
    pub flush: bool,
}

impl Emission {
    fn one(interaction: FormInteraction) -> Self {
        Self {
            interactions: vec![interaction],
            flush: false,
        }
    }

    fn flushing() -> Self {
        Self {
            interactions: Vec::new(),
            flush: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty() && !self.flush
    }

    pub fn extend(&mut self, other: Emission) {
        self.interactions.extend(other.interactions);
        self.flush |= other.flush;
    }
}

/// Per-form, per-field interaction state machine
#[derive(Debug)]
pub struct FieldInteractionTracker {
    strategy: CaptureStrategy,
    filter: FieldFilter,
    triggers: TriggersConfig,
    batch: BatchCaptureConfig,
    /// Legacy hide capture delay
    visibility_debounce: Duration,
    forms: HashMap<NodeId, TrackedForm>,
    timers: TimerArena<NodeId>,
    visibility_timer: Option<DateTime<Utc>>,
    hidden: bool,
}

impl FieldInteractionTracker {
    pub fn new(config: &FormsConfig) -> Self {
        Self {
            strategy: CaptureStrategy::from_config(config),
            filter: FieldFilter::from_config(config),
            triggers: config.triggers.clone(),
            batch: config.batch_capture.clone(),
            visibility_debounce: utils::millis(config.debounce_ms),
            forms: HashMap::new(),
            timers: TimerArena::new(),
            visibility_timer: None,
            hidden: false,
        }
    }

    pub fn strategy(&self) -> CaptureStrategy {
        self.strategy
    }

    pub fn filter(&self) -> &FieldFilter {
        &self.filter
    }

    pub fn tracked_form(&self, form: NodeId) -> Option<&TrackedForm> {
        self.forms.get(&form)
    }

    pub fn tracked_count(&self) -> usize {
        self.forms.len()
    }

    /// Is a debounce pending for `form`?
    pub fn is_pending(&self, form: NodeId) -> bool {
        self.timers.is_scheduled(&form)
    }

    // ============================================
    // DOM events
    // ============================================

    /// A control of `form` lost focus
    pub fn on_blur(&mut self, page: &Page, form: NodeId, control: NodeId, now: DateTime<Utc>) -> Emission {
        if !self.triggers.blur {
            return Emission::default();
        }
        let Some((name, field_type, value)) = self.eligible(page, control) else {
            return Emission::default();
        };
        if !utils::is_filled(&value) {
            tracing::trace!(field = %name, "Blur on empty field ignored");
            return Emission::default();
        }
        self.capture(page, form, name, field_type, value, InteractionTrigger::Blur, now)
    }

    /// A control of `form` reported `change`
    pub fn on_change(&mut self, page: &Page, form: NodeId, control: NodeId, now: DateTime<Utc>) -> Emission {
        if !self.triggers.change {
            return Emission::default();
        }
        let Some((name, field_type, value)) = self.eligible(page, control) else {
            return Emission::default();
        };
        if !CHANGE_TYPES.contains(&field_type.as_str()) || value.is_empty() {
            return Emission::default();
        }
        self.capture(page, form, name, field_type, value, InteractionTrigger::Change, now)
    }

    /// Page visibility changed
    pub fn on_visibility_change(
        &mut self,
        page: &Page,
        hidden: bool,
        now: DateTime<Utc>,
    ) -> Emission {
        self.hidden = hidden;
        if !hidden {
            return Emission::default();
        }

        match self.strategy {
            CaptureStrategy::Batched if self.batch.capture_on_visibility_change => {
                tracing::debug!("Page hidden, sending batched form data");
                self.force_send_unsent(page, now)
            }
            CaptureStrategy::Legacy if self.triggers.visibilitychange => {
                self.visibility_timer = now.checked_add_signed(self.visibility_debounce);
                Emission::default()
            }
            _ => Emission::default(),
        }
    }

    /// Page is about to unload; the returned emission always asks for a flush
    pub fn on_before_unload(&mut self, page: &Page, attached: &[NodeId], now: DateTime<Utc>) -> Emission {
        match self.strategy {
            CaptureStrategy::Batched if self.batch.capture_on_before_unload => {
                tracing::debug!("Page closing, sending batched form data");
                self.force_send_unsent(page, now)
            }
            CaptureStrategy::Legacy if self.triggers.beforeunload => {
                let mut emission =
                    self.capture_abandoned(page, attached, InteractionTrigger::BeforeUnload);
                emission.flush = true;
                emission
            }
            _ => Emission::flushing(),
        }
    }

    /// A captured form is leaving the page; emit what it still owes
    ///
    /// Call before the page mirror drops the form.
    pub fn detach_form(&mut self, page: &Page, form: NodeId, now: DateTime<Utc>) -> Emission {
        self.timers.cancel(&form);
        let mut emission = Emission::default();

        if self.strategy == CaptureStrategy::Batched
            && self.forms.get(&form).is_some_and(|f| f.has_unsent_activity())
        {
            if let Some(interaction) = self.send_batch(page, form, now) {
                emission.interactions.push(interaction);
            }
        }

        self.forms.remove(&form);
        emission
    }

    // ============================================
    // Timers
    // ============================================

    /// Fire due debounce timers
    pub fn tick(&mut self, page: &Page, attached: &[NodeId], now: DateTime<Utc>) -> Emission {
        let mut emission = Emission::default();

        for form in self.timers.take_due(now) {
            tracing::debug!(form = %form, "Debounce timer fired");
            if let Some(interaction) = self.send_batch(page, form, now) {
                emission.interactions.push(interaction);
            }
        }

        if self.visibility_timer.is_some_and(|deadline| deadline <= now) {
            self.visibility_timer = None;
            if self.hidden {
                let mut hidden =
                    self.capture_abandoned(page, attached, InteractionTrigger::VisibilityChange);
                hidden.flush = true;
                emission.extend(hidden);
            }
        }

        emission
    }

    /// Earliest pending timer
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        match (self.timers.next_deadline(), self.visibility_timer) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // ============================================
    // Internals
    // ============================================

    /// (name, type, value) of a control whose name passes the filter
    fn eligible(&self, page: &Page, control: NodeId) -> Option<(String, String, String)> {
        let element = page.element(control)?;
        let name = element.name()?;
        let field_type = element.input_type();
        if !self.filter.should_track_field(name, &field_type) {
            return None;
        }
        Some((name.to_string(), field_type, element.value().to_string()))
    }

    #[allow(clippy::too_many_arguments)]
    fn capture(
        &mut self,
        page: &Page,
        form: NodeId,
        name: String,
        field_type: String,
        value: String,
        trigger: InteractionTrigger,
        now: DateTime<Utc>,
    ) -> Emission {
        let Some(element) = page.element(form) else {
            return Emission::default();
        };
        let form_id = super::form_id(&element);
        self.record(form, form_id.clone(), &name, &value, now);

        match self.strategy {
            CaptureStrategy::Batched => {
                let debounce = utils::millis(self.batch.effective_debounce_ms());
                match now.checked_add_signed(debounce) {
                    Some(deadline) => {
                        self.timers.schedule(form, deadline);
                    }
                    None => {
                        tracing::warn!(form_id = %form_id, "Debounce deadline out of range, not scheduled");
                    }
                }
                tracing::debug!(form_id = %form_id, field = %name, "Tracked field in memory");
                Emission::default()
            }
            CaptureStrategy::Legacy => {
                self.mark_sent(form, now);
                Emission::one(FormInteraction {
                    form_id,
                    trigger,
                    field_name: Some(name),
                    field_value: Some(value),
                    field_type: Some(field_type),
                    fields: None,
                    field_count: None,
                    form_progress: Some(form_progress(page, form)),
                })
            }
        }
    }

    fn record(&mut self, form: NodeId, form_id: String, name: &str, value: &str, now: DateTime<Utc>) {
        let state = self
            .forms
            .entry(form)
            .or_insert_with(|| TrackedForm::new(form_id, form, now));

        let last_sent_at = state.fields.get(name).and_then(|f| f.last_sent_at);
        state.fields.insert(
            name.to_string(),
            FieldState {
                last_value: value.to_string(),
                last_activity_at: now,
                last_sent_at,
            },
        );
        state.last_activity_at = now;
    }

    fn mark_sent(&mut self, form: NodeId, now: DateTime<Utc>) {
        if let Some(state) = self.forms.get_mut(&form) {
            state.last_sent_at = Some(now);
            for field in state.fields.values_mut() {
                field.last_sent_at = Some(now);
            }
        }
    }

    /// Batch payload for `form`, honoring the minimum-fields gate and the
    /// resend guard
    fn send_batch(&mut self, page: &Page, form: NodeId, now: DateTime<Utc>) -> Option<FormInteraction> {
        let state = self.forms.get(&form)?;

        if state.fields.len() < self.batch.effective_min_fields() {
            tracing::debug!(form_id = %state.form_id, fields = state.fields.len(), "Not enough fields to send");
            return None;
        }
        if let Some(sent) = state.last_sent_at {
            if now - sent < Duration::milliseconds(RESEND_GUARD_MS) {
                tracing::debug!(form_id = %state.form_id, "Already sent recently, skipping");
                return None;
            }
        }

        let fields = state.values();
        let interaction = FormInteraction {
            form_id: state.form_id.clone(),
            trigger: InteractionTrigger::BatchCapture,
            field_name: None,
            field_value: None,
            field_type: None,
            field_count: Some(fields.len()),
            fields: Some(fields),
            form_progress: page
                .element(form)
                .map(|_| form_progress(page, form)),
        };

        self.mark_sent(form, now);
        Some(interaction)
    }

    /// Send every form with unsent activity now
    ///
    /// A form's debounce is cancelled only when its batch goes out; a form held
    /// back by the resend guard or the minimum-fields gate keeps its timer.
    fn force_send_unsent(&mut self, page: &Page, now: DateTime<Utc>) -> Emission {
        let mut pending: Vec<NodeId> = self
            .forms
            .values()
            .filter(|f| f.has_unsent_activity())
            .map(|f| f.node)
            .collect();
        pending.sort();

        let mut emission = Emission::flushing();
        for form in pending {
            if let Some(interaction) = self.send_batch(page, form, now) {
                self.timers.cancel(&form);
                emission.interactions.push(interaction);
            }
        }
        emission
    }

    /// Non-blank tracked values still in the attached forms
    fn capture_abandoned(&self, page: &Page, attached: &[NodeId], trigger: InteractionTrigger) -> Emission {
        let mut emission = Emission::default();

        for &form in attached {
            let Some(element) = page.element(form) else {
                continue;
            };

            let mut fields = BTreeMap::new();
            for control in page.form_controls(form) {
                if control.tag() == "button" {
                    continue;
                }
                let Some(name) = control.name() else {
                    continue;
                };
                let field_type = control.input_type();
                if !self.filter.should_track_field(name, &field_type) {
                    continue;
                }
                if matches!(field_type.as_str(), "checkbox" | "radio") && !control.is_checked() {
                    continue;
                }
                if utils::is_filled(control.value()) {
                    fields.insert(name.to_string(), control.value().to_string());
                }
            }

            if fields.is_empty() {
                continue;
            }

            let form_id = super::form_id(&element);
            tracing::debug!(form_id = %form_id, fields = fields.len(), trigger = trigger.as_str(), "Capturing abandoned fields");
            emission.interactions.push(FormInteraction {
                form_id,
                trigger,
                field_name: None,
                field_value: None,
                field_type: None,
                fields: Some(fields),
                field_count: None,
                form_progress: Some(form_progress(page, form)),
            });
        }

        emission
    }
}
