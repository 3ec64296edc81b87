//! Core EventBus state
use super::stats::BusStats;
use crate::config::BusConfig;
use crate::events::EventTarget;
use crate::subscriber::{HandlerFn, Listener};
use crate::synthesis::EventSynthesizer;
use crate::types::PluginKey;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identity of a registered listener object (its allocation address).
pub(super) type ListenerId = usize;

pub(super) fn listener_id<L: ?Sized>(listener: &Arc<L>) -> ListenerId {
    Arc::as_ptr(listener) as *const () as usize
}

/// One live binding from a subscriber method to an event target.
pub(crate) struct Subscription {
    pub(super) plugin: PluginKey,
    pub(super) listener: Option<ListenerId>,
    pub(super) listener_name: String,
    pub(super) method: String,
    pub(super) target: EventTarget,
    pub(super) order: i32,
    pub(super) ignore_cancelled: bool,
    pub(super) sequence: u64,
    pub(super) handler: Arc<HandlerFn>,
}

impl Subscription {
    pub(super) fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            plugin: self.plugin.to_string(),
            listener: self.listener_name.clone(),
            method: self.method.clone(),
            target: self.target.to_string(),
            order: self.order,
            ignore_cancelled: self.ignore_cancelled,
            sequence: self.sequence,
        }
    }
}

/// Read-only view of a live subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionInfo {
    pub plugin: String,
    pub listener: String,
    pub method: String,
    pub target: String,
    pub order: i32,
    pub ignore_cancelled: bool,
    pub sequence: u64,
}

#[derive(Clone, Default)]
pub(super) struct PluginSubscriptions {
    pub(super) listeners: HashMap<ListenerId, Arc<dyn Listener>>,
    pub(super) subscriptions: Vec<Arc<Subscription>>,
}

/// Immutable snapshot of every live subscription, grouped by plugin.
///
/// Writers clone the current snapshot, modify the clone and swap it in, so a
/// dispatch pass always works on one consistent index.
#[derive(Clone, Default)]
pub(super) struct SubscriptionIndex {
    pub(super) plugins: HashMap<PluginKey, PluginSubscriptions>,
    pub(super) torn_down: HashSet<PluginKey>,
}

impl SubscriptionIndex {
    pub(super) fn iter(&self) -> impl Iterator<Item = &Arc<Subscription>> {
        self.plugins.values().flat_map(|p| p.subscriptions.iter())
    }

    pub(super) fn contains(&self, plugin: &PluginKey, sequence: u64) -> bool {
        self.plugins
            .get(plugin)
            .is_some_and(|p| p.subscriptions.iter().any(|s| s.sequence == sequence))
    }
}

pub(crate) struct BusShared {
    pub(super) index: RwLock<Arc<SubscriptionIndex>>,
    pub(super) sequence: AtomicU64,
    pub(super) synthesizer: Arc<EventSynthesizer>,
    pub(super) stats: BusStats,
    pub(super) config: BusConfig,
}

/// The plugin event bus.
///
/// Owns the live set of subscriptions grouped by plugin, matches posted
/// events against them and invokes the matching handlers synchronously on the
/// posting thread. Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct EventBus {
    pub(super) shared: Arc<BusShared>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let index = self.snapshot();
        f.debug_struct("EventBus")
            .field("plugins", &index.plugins.len())
            .field("subscriptions", &index.iter().count())
            .field("config", &self.shared.config)
            .finish()
    }
}

impl EventBus {
    /// Creates a bus with default configuration and its own synthesizer.
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    pub fn with_config(config: BusConfig) -> Self {
        Self::with_synthesizer(Arc::new(EventSynthesizer::new()), config)
    }

    /// Creates a bus sharing an existing synthesizer.
    pub fn with_synthesizer(synthesizer: Arc<EventSynthesizer>, config: BusConfig) -> Self {
        Self {
            shared: Arc::new(BusShared {
                index: RwLock::new(Arc::new(SubscriptionIndex::default())),
                sequence: AtomicU64::new(0),
                synthesizer,
                stats: BusStats::default(),
                config,
            }),
        }
    }

    pub fn synthesizer(&self) -> &Arc<EventSynthesizer> {
        &self.shared.synthesizer
    }

    pub fn config(&self) -> &BusConfig {
        &self.shared.config
    }

    pub(super) fn snapshot(&self) -> Arc<SubscriptionIndex> {
        Arc::clone(&self.shared.index.read())
    }

    pub(super) fn next_sequence(&self) -> u64 {
        self.shared.sequence.fetch_add(1, Ordering::Relaxed)
    }

    pub(super) fn from_shared(shared: Arc<BusShared>) -> Self {
        Self { shared }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
