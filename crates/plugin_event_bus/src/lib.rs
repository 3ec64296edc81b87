//! # Plugin Event Bus
//!
//! A typed, synchronous event bus for game-server plugin frameworks. Plugins
//! declare event *contracts* (a set of slot-indexed getters, optionally
//! cancellable or generic over one type), register listener objects, and post
//! events that are dispatched in a deterministic order on the posting thread.
//!
//! ## Core Features
//!
//! - **Contract Synthesis**: contracts are turned into concrete event classes
//!   at most once per descriptor, with a validated constructor layout
//! - **Deterministic Ordering**: subscribers run by ascending order, ties
//!   broken by registration sequence
//! - **Cancellation**: cancellable events skip later subscribers unless they
//!   opt in to cancelled events
//! - **Failure Isolation**: a failing or panicking subscriber never stops the
//!   dispatch pass and never reaches the poster
//! - **Plugin Partitions**: all subscriptions of a plugin instance are removed
//!   in one call when the plugin unloads
//! - **Lifecycle Bridges**: per-platform unload detection wired to the bus
//!
//! ## Quick Start Example
//!
//! ```rust
//! use plugin_event_bus::*;
//! use std::sync::Arc;
//!
//! event_contract! {
//!     pub contract PlayerChat(cancellable) {
//!         #[slot(0)] message: String
//!     }
//! }
//!
//! struct ChatFilter;
//!
//! impl Listener for ChatFilter {
//!     fn subscribers(self: Arc<Self>) -> Vec<SubscriberMethod> {
//!         vec![SubscriberMethod::on::<PlayerChat, _>("filter", |event| {
//!             if PlayerChat::message(event)?.contains("spam") {
//!                 event.set_cancelled(true)?;
//!             }
//!             Ok(())
//!         })
//!         .order(PostOrder::EARLY)]
//!     }
//! }
//!
//! let (bus, _synthesizer) = create_event_bus(BusConfig::default());
//! let plugin = PluginKey::new("chat-filter");
//! bus.register(&plugin, Arc::new(ChatFilter)).unwrap();
//!
//! let event = bus
//!     .post_new(&PlayerChat::descriptor(), field_values!["buy spam now".to_string()])
//!     .unwrap();
//! assert!(event.is_cancelled());
//!
//! bus.unregister(&plugin);
//! assert!(!bus.has_subscriptions());
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod lifecycle;
mod macros;
pub mod subscriber;
pub mod synthesis;
pub mod system;
pub mod types;

pub use config::BusConfig;
pub use error::{ConstructionError, DefinitionError, EventError};
pub use events::{
    ContractBuilder, ContractSchema, EventContract, EventDescriptor, EventTarget, GetterSpec,
    PostOrder, CANCEL_FLAG_SLOT, GENERIC_TOKEN_SLOT,
};
pub use lifecycle::{
    create_lifecycle_bridge, HostPlatform, LifecycleBridge, LogLevel, PluginHandle,
    PluginLogSink, PluginRegistry, SentinelBridge, ShutdownHookBridge, UnloadDetection,
    SENTINEL_HOOK,
};
pub use subscriber::{
    scan, validate_method, HandlerFn, Listener, ScanReport, ScannedSubscriber, SubscriberMethod,
    SubscriberParam,
};
pub use synthesis::{
    CancelCell, EventClass, EventInstance, EventSynthesizer, FieldValue, Slot, SlotKind,
};
pub use system::{
    create_event_bus, BusStats, BusStatsSnapshot, EventBus, RegistrationReport,
    SubscriptionHandle, SubscriptionInfo,
};
pub use types::{PluginId, PluginKey, PluginState, TypeToken};
