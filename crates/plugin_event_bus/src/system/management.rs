//! Event bus management and introspection
use super::core::{EventBus, SubscriptionInfo};
use super::stats::BusStatsSnapshot;
use crate::events::EventDescriptor;
use crate::types::{PluginKey, PluginState};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{error, info};

impl EventBus {
    /// Live subscriptions that events of `descriptor` would be delivered to,
    /// in dispatch order.
    pub fn subscriptions_for(&self, descriptor: &EventDescriptor) -> Vec<SubscriptionInfo> {
        let index = self.snapshot();
        let mut matching: Vec<_> = index
            .iter()
            .filter(|s| s.target.accepts(descriptor))
            .collect();
        matching.sort_by_key(|s| (s.order, s.sequence));
        matching.into_iter().map(|s| s.info()).collect()
    }

    /// True if any plugin has at least one live subscription.
    pub fn has_subscriptions(&self) -> bool {
        self.snapshot().iter().next().is_some()
    }

    pub fn subscription_count(&self) -> usize {
        self.snapshot().iter().count()
    }

    /// Number of live subscriptions per active plugin.
    pub fn subscription_counts(&self) -> HashMap<PluginKey, usize> {
        self.snapshot()
            .plugins
            .iter()
            .map(|(key, p)| (key.clone(), p.subscriptions.len()))
            .collect()
    }

    pub fn plugin_state(&self, plugin: &PluginKey) -> PluginState {
        let index = self.snapshot();
        if index.torn_down.contains(plugin) {
            PluginState::TornDown
        } else if index.plugins.contains_key(plugin) {
            PluginState::Active
        } else {
            PluginState::Unregistered
        }
    }

    /// Plugins that currently own a subscription partition.
    pub fn registered_plugins(&self) -> Vec<PluginKey> {
        self.snapshot().plugins.keys().cloned().collect()
    }

    /// Tears down every active plugin.
    ///
    /// Each plugin is handled on its own; a failure is logged and the rest
    /// are still torn down.
    pub fn close(&self) -> usize {
        let plugins = self.registered_plugins();
        let mut removed = 0;
        for plugin in &plugins {
            match catch_unwind(AssertUnwindSafe(|| self.unregister(plugin))) {
                Ok(count) => removed += count,
                Err(_) => error!("❌ Failed to unregister plugin {} during close", plugin),
            }
        }
        info!(
            "🛑 Event bus closed: {} plugins, {} subscriptions removed",
            plugins.len(),
            removed
        );
        removed
    }

    pub fn stats(&self) -> BusStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Reports suspicious bus state.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        let index = self.snapshot();

        for (plugin, partition) in &index.plugins {
            if partition.subscriptions.is_empty() {
                issues.push(format!("Plugin {} has no subscriptions", plugin));
            }
            if partition.subscriptions.len() > 100 {
                issues.push(format!(
                    "Plugin {} has excessive subscriptions: {}",
                    plugin,
                    partition.subscriptions.len()
                ));
            }
        }

        let stats = self.stats();
        if stats.handler_panics > 0 {
            issues.push(format!("{} subscriber panics recorded", stats.handler_panics));
        }

        issues
    }
}
