//! # leadtrail-core
//!
//! Core library for leadtrail - a website visitor tracker that captures form
//! activity and reports it to a collection endpoint.
//!
//! This library provides:
//! - Visitor and session identity over pluggable storage
//! - Field interaction tracking with debounced batching
//! - Form submission capture with redaction
//! - An event queue with two-tier (beacon, then fetch) delivery
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! A host (browser binding, test harness, or the `leadtrail replay` CLI)
//! mirrors the page into the engine and reports DOM events:
//! - **Page mirror:** forms and controls registered through [`HostEvent::Mutation`]
//! - **Capture:** the engine turns blur/change/submit/visibility events into
//!   [`TrackEvent`]s
//! - **Delivery:** events are queued and flushed in batches to
//!   `POST {apiUrl}/v1/track/events`
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use leadtrail_core::{Engine, EngineDeps, HostEvent, TrackerConfig};
//! use leadtrail_core::clock::SystemClock;
//! use leadtrail_core::collector::MemoryTransport;
//! use leadtrail_core::dom::ElementNode;
//!
//! let config = TrackerConfig::from_json(
//!     r#"{"apiKey": "sk_test", "widgets": {"forms": {"enabled": true}}}"#,
//! ).expect("valid config");
//! let transport = MemoryTransport::new();
//! let deps = EngineDeps::in_memory(Arc::new(SystemClock), Box::new(transport.clone()));
//!
//! let mut engine = Engine::new(config, deps).expect("engine");
//! engine.handle(HostEvent::Mutation {
//!     parent: None,
//!     added: vec![ElementNode::new(1, "form").child(ElementNode::input(2, "email", "email"))],
//!     removed: vec![],
//! });
//! engine.start();
//! engine.shutdown();
//!
//! assert_eq!(transport.events().len(), 1);
//! ```

// Re-export commonly used items at the crate root
pub use client_config::TrackerConfig;
pub use config::Config;
pub use engine::{ChatAction, Command, Engine, EngineDeps, HostEvent};
pub use error::{Error, Result};
pub use types::*;

// Public modules
pub mod capture;
pub mod client_config;
pub mod clock;
pub mod collector;
pub mod config;
pub mod dom;
pub mod engine;
pub mod error;
pub mod identity;
pub mod logging;
pub mod runtime;
pub mod timers;
pub mod types;
pub mod utils;
pub mod widget;
