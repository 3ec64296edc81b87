//! Subscription registration and removal
use super::core::{listener_id, BusShared, EventBus, Subscription, SubscriptionIndex};
use super::stats::BusStats;
use crate::subscriber::{scan, validate_method, Listener, ScannedSubscriber, SubscriberMethod};
use crate::types::PluginKey;
use crate::{DefinitionError, EventError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Outcome of registering one listener.
#[derive(Debug)]
pub struct RegistrationReport {
    pub plugin: PluginKey,
    pub listener: String,
    /// Number of subscriptions added to the bus
    pub registered: usize,
    /// Subscriber methods that failed validation and were skipped
    pub rejected: Vec<DefinitionError>,
}

/// Handle to a single subscription created by [`EventBus::subscribe`].
#[derive(Debug)]
pub struct SubscriptionHandle {
    bus: Weak<BusShared>,
    plugin: PluginKey,
    sequence: u64,
    active: AtomicBool,
}

impl SubscriptionHandle {
    pub fn plugin(&self) -> &PluginKey {
        &self.plugin
    }

    /// False once closed, or once the owning plugin was unregistered.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
            && self
                .bus
                .upgrade()
                .is_some_and(|shared| shared.index.read().contains(&self.plugin, self.sequence))
    }

    /// Removes the subscription. Calling this more than once is harmless.
    pub fn close(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(shared) = self.bus.upgrade() {
            EventBus::from_shared(shared).remove_subscription(&self.plugin, self.sequence);
        }
    }
}

impl EventBus {
    /// Registers every valid subscriber method of `listener` for `plugin`.
    ///
    /// Invalid methods are reported in [`RegistrationReport::rejected`] and do
    /// not affect the rest. Registering the same listener object twice for one
    /// plugin is an error, as is registering for a torn-down plugin.
    pub fn register(
        &self,
        plugin: &PluginKey,
        listener: Arc<dyn Listener>,
    ) -> Result<RegistrationReport, EventError> {
        let report = scan(&listener);
        let id = listener_id(&listener);
        let registered = report.subscribers.len();

        {
            let mut index = self.shared.index.write();
            self.check_can_add(&index, plugin, registered)?;

            let entry = index.plugins.get(plugin);
            if entry.is_some_and(|p| p.listeners.contains_key(&id)) {
                warn!(
                    "⚠️ Listener {} is already registered for plugin {}",
                    report.listener, plugin
                );
                return Err(EventError::ListenerAlreadyRegistered {
                    plugin: plugin.to_string(),
                    listener: report.listener,
                });
            }

            let mut next = SubscriptionIndex::clone(&index);
            let partition = next.plugins.entry(plugin.clone()).or_default();
            partition.listeners.insert(id, Arc::clone(&listener));
            for subscriber in report.subscribers {
                partition.subscriptions.push(Arc::new(self.new_subscription(
                    plugin,
                    Some(id),
                    &report.listener,
                    subscriber,
                )));
            }
            *index = Arc::new(next);
        }

        BusStats::add(&self.shared.stats.subscriptions_registered, registered);
        info!(
            "📝 Registered {} subscribers from {} for plugin {}",
            registered, report.listener, plugin
        );

        Ok(RegistrationReport {
            plugin: plugin.clone(),
            listener: report.listener,
            registered,
            rejected: report.rejected,
        })
    }

    /// Subscribes a single method without a listener object.
    pub fn subscribe(
        &self,
        plugin: &PluginKey,
        method: SubscriberMethod,
    ) -> Result<SubscriptionHandle, EventError> {
        let listener = plugin.id().to_string();
        let subscriber = validate_method(&listener, method).inspect_err(|e| {
            warn!("⚠️ Rejected subscription for plugin {}: {}", plugin, e);
        })?;
        let target = subscriber.target.to_string();

        let sequence = {
            let mut index = self.shared.index.write();
            self.check_can_add(&index, plugin, 1)?;

            let subscription = self.new_subscription(plugin, None, &listener, subscriber);
            let sequence = subscription.sequence;
            let mut next = SubscriptionIndex::clone(&index);
            next.plugins
                .entry(plugin.clone())
                .or_default()
                .subscriptions
                .push(Arc::new(subscription));
            *index = Arc::new(next);
            sequence
        };

        BusStats::bump(&self.shared.stats.subscriptions_registered);
        debug!("📝 Subscribed plugin {} to {}", plugin, target);

        Ok(SubscriptionHandle {
            bus: Arc::downgrade(&self.shared),
            plugin: plugin.clone(),
            sequence,
            active: AtomicBool::new(true),
        })
    }

    /// Removes every subscription owned by `plugin` and marks it torn down.
    ///
    /// Never fails; returns the number of subscriptions removed.
    pub fn unregister(&self, plugin: &PluginKey) -> usize {
        let (removed, newly_torn_down) = {
            let mut index = self.shared.index.write();
            if index.torn_down.contains(plugin) && !index.plugins.contains_key(plugin) {
                (0, false)
            } else {
                let mut next = SubscriptionIndex::clone(&index);
                let removed = next
                    .plugins
                    .remove(plugin)
                    .map_or(0, |p| p.subscriptions.len());
                let newly_torn_down = next.torn_down.insert(plugin.clone());
                *index = Arc::new(next);
                (removed, newly_torn_down)
            }
        };

        if newly_torn_down {
            BusStats::add(&self.shared.stats.subscriptions_removed, removed);
            BusStats::bump(&self.shared.stats.plugins_torn_down);
            info!(
                "🗑️ Unregistered {} subscriptions for plugin {}",
                removed, plugin
            );
        } else {
            debug!("Plugin {} was already torn down", plugin);
        }
        removed
    }

    /// Removes the subscriptions that came from one listener object.
    ///
    /// Never fails; returns the number of subscriptions removed.
    pub fn unregister_listener<L: Listener + ?Sized>(
        &self,
        plugin: &PluginKey,
        listener: &Arc<L>,
    ) -> usize {
        let id = listener_id(listener);
        let removed = {
            let mut index = self.shared.index.write();
            let known = index
                .plugins
                .get(plugin)
                .is_some_and(|p| p.listeners.contains_key(&id));
            if !known {
                0
            } else {
                let mut next = SubscriptionIndex::clone(&index);
                let mut removed = 0;
                if let Some(partition) = next.plugins.get_mut(plugin) {
                    partition.listeners.remove(&id);
                    let before = partition.subscriptions.len();
                    partition.subscriptions.retain(|s| s.listener != Some(id));
                    removed = before - partition.subscriptions.len();
                }
                *index = Arc::new(next);
                removed
            }
        };

        if removed == 0 {
            debug!(
                "Listener {} had no subscriptions for plugin {}",
                listener.listener_name(),
                plugin
            );
        } else {
            BusStats::add(&self.shared.stats.subscriptions_removed, removed);
            info!(
                "🗑️ Removed {} subscriptions of {} for plugin {}",
                removed,
                listener.listener_name(),
                plugin
            );
        }
        removed
    }

    pub(super) fn remove_subscription(&self, plugin: &PluginKey, sequence: u64) -> bool {
        let removed = {
            let mut index = self.shared.index.write();
            if !index.contains(plugin, sequence) {
                false
            } else {
                let mut next = SubscriptionIndex::clone(&index);
                if let Some(partition) = next.plugins.get_mut(plugin) {
                    partition.subscriptions.retain(|s| s.sequence != sequence);
                }
                *index = Arc::new(next);
                true
            }
        };

        if removed {
            BusStats::bump(&self.shared.stats.subscriptions_removed);
            debug!("🗑️ Closed subscription #{} of plugin {}", sequence, plugin);
        }
        removed
    }

    fn check_can_add(
        &self,
        index: &SubscriptionIndex,
        plugin: &PluginKey,
        adding: usize,
    ) -> Result<(), EventError> {
        if index.torn_down.contains(plugin) {
            warn!("⚠️ Refusing registration for torn-down plugin {}", plugin);
            return Err(EventError::PluginTornDown(plugin.to_string()));
        }

        let limit = self.shared.config.max_subscriptions_per_plugin;
        let existing = index
            .plugins
            .get(plugin)
            .map_or(0, |p| p.subscriptions.len());
        if limit > 0 && existing + adding > limit {
            warn!(
                "⚠️ Plugin {} would exceed {} subscriptions",
                plugin, limit
            );
            return Err(EventError::SubscriptionLimit {
                plugin: plugin.to_string(),
                limit,
            });
        }
        Ok(())
    }

    fn new_subscription(
        &self,
        plugin: &PluginKey,
        listener: Option<usize>,
        listener_name: &str,
        subscriber: ScannedSubscriber,
    ) -> Subscription {
        Subscription {
            plugin: plugin.clone(),
            listener,
            listener_name: listener_name.to_string(),
            method: subscriber.method,
            target: subscriber.target,
            order: subscriber.order,
            ignore_cancelled: subscriber.ignore_cancelled,
            sequence: self.next_sequence(),
            handler: subscriber.handler,
        }
    }
}
