//! Event bus statistics.
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated without locking from every bus operation.
#[derive(Debug, Default)]
pub struct BusStats {
    pub(super) events_posted: AtomicU64,
    pub(super) unhandled_posts: AtomicU64,
    pub(super) handlers_invoked: AtomicU64,
    pub(super) handler_failures: AtomicU64,
    pub(super) handler_panics: AtomicU64,
    pub(super) cancelled_skips: AtomicU64,
    pub(super) slow_handlers: AtomicU64,
    pub(super) subscriptions_registered: AtomicU64,
    pub(super) subscriptions_removed: AtomicU64,
    pub(super) plugins_torn_down: AtomicU64,
}

impl BusStats {
    pub(super) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn add(counter: &AtomicU64, amount: usize) {
        counter.fetch_add(amount as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BusStatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        BusStatsSnapshot {
            events_posted: load(&self.events_posted),
            unhandled_posts: load(&self.unhandled_posts),
            handlers_invoked: load(&self.handlers_invoked),
            handler_failures: load(&self.handler_failures),
            handler_panics: load(&self.handler_panics),
            cancelled_skips: load(&self.cancelled_skips),
            slow_handlers: load(&self.slow_handlers),
            subscriptions_registered: load(&self.subscriptions_registered),
            subscriptions_removed: load(&self.subscriptions_removed),
            plugins_torn_down: load(&self.plugins_torn_down),
        }
    }
}

/// Point-in-time copy of [`BusStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BusStatsSnapshot {
    /// Total number of `post` calls
    pub events_posted: u64,
    /// Posts that matched no subscription
    pub unhandled_posts: u64,
    pub handlers_invoked: u64,
    /// Handlers that returned an error
    pub handler_failures: u64,
    /// Handlers that panicked
    pub handler_panics: u64,
    /// Subscriptions skipped because the event was already cancelled
    pub cancelled_skips: u64,
    pub slow_handlers: u64,
    pub subscriptions_registered: u64,
    pub subscriptions_removed: u64,
    pub plugins_torn_down: u64,
}

impl BusStatsSnapshot {
    /// Number of subscriptions currently live according to the counters.
    pub fn live_subscriptions(&self) -> u64 {
        self.subscriptions_registered
            .saturating_sub(self.subscriptions_removed)
    }
}
