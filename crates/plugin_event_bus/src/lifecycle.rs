//! Plugin lifecycle integration.
//!
//! The bus only knows plugins as [`PluginKey`]s. This module holds the host
//! side: a [`PluginHandle`] per loaded plugin instance, the [`PluginRegistry`]
//! that maps plugin ids to their current handle, and the
//! [`LifecycleBridge`]s that notice when a plugin goes away and drop its
//! subscriptions.
//!
//! Two unload detection strategies exist:
//!
//! - [`ShutdownHookBridge`] registers an explicit teardown hook on the plugin
//!   handle. Used on every platform that reports plugin disables.
//! - [`SentinelBridge`] installs a close hook on the plugin's log sink and
//!   treats the sink being closed as the unload signal. Only used for hosts
//!   with no disable notification (BungeeCord).

use crate::system::EventBus;
use crate::types::{PluginId, PluginKey};
use crate::EventError;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// Name of the close hook installed by [`SentinelBridge`].
pub const SENTINEL_HOOK: &str = "unload-sentinel";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn run_isolated(what: &str, owner: &PluginKey, hook: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(hook)).is_err() {
        error!("❌ {} hook of plugin {} panicked", what, owner);
    }
}

// ============================================================================
// Log sink
// ============================================================================

type CloseHook = Box<dyn FnOnce() + Send>;

/// Per-plugin log output, routed through `tracing`.
///
/// The host closes the sink when the plugin is unloaded. Close hooks run
/// exactly once, on [`close`](Self::close) or on drop.
pub struct PluginLogSink {
    plugin: PluginKey,
    hooks: Mutex<Vec<(String, CloseHook)>>,
    closed: AtomicBool,
}

impl PluginLogSink {
    pub fn new(plugin: PluginKey) -> Self {
        Self {
            plugin,
            hooks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        if self.is_closed() {
            return;
        }
        let plugin = self.plugin.id();
        match level {
            LogLevel::Error => error!(plugin = %plugin, "{}", message),
            LogLevel::Warn => warn!(plugin = %plugin, "{}", message),
            LogLevel::Info => info!(plugin = %plugin, "{}", message),
            LogLevel::Debug => debug!(plugin = %plugin, "{}", message),
            LogLevel::Trace => tracing::trace!(plugin = %plugin, "{}", message),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn has_hook(&self, name: &str) -> bool {
        self.hooks.lock().iter().any(|(n, _)| n == name)
    }

    /// Adds a hook that runs when the sink closes. Returns false if the sink
    /// is already closed; the hook is dropped without running.
    pub fn add_close_hook<F>(&self, name: impl Into<String>, hook: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut hooks = self.hooks.lock();
        if self.is_closed() {
            return false;
        }
        hooks.push((name.into(), Box::new(hook)));
        true
    }

    /// Removes every hook called `name` and returns how many were removed.
    pub fn remove_hooks(&self, name: &str) -> usize {
        let mut hooks = self.hooks.lock();
        let before = hooks.len();
        hooks.retain(|(n, _)| n != name);
        before - hooks.len()
    }

    pub fn close(&self) {
        let hooks = {
            let mut hooks = self.hooks.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *hooks)
        };

        debug!("Closing log sink of plugin {}", self.plugin);
        for (name, hook) in hooks {
            run_isolated(&name, &self.plugin, hook);
        }
    }
}

impl Drop for PluginLogSink {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for PluginLogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLogSink")
            .field("plugin", &self.plugin)
            .field("hooks", &self.hooks.lock().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// Plugin handle
// ============================================================================

type TeardownHook = Box<dyn FnOnce(&PluginKey) + Send>;

/// One loaded plugin instance.
///
/// The torn-down flag only ever goes from false to true.
pub struct PluginHandle {
    key: PluginKey,
    version: String,
    torn_down: AtomicBool,
    teardown_hooks: Mutex<Vec<TeardownHook>>,
    log_sink: Arc<PluginLogSink>,
}

impl PluginHandle {
    pub fn new(id: impl Into<PluginId>, version: impl Into<String>) -> Arc<Self> {
        let key = PluginKey::new(id);
        Arc::new(Self {
            log_sink: Arc::new(PluginLogSink::new(key.clone())),
            key,
            version: version.into(),
            torn_down: AtomicBool::new(false),
            teardown_hooks: Mutex::new(Vec::new()),
        })
    }

    pub fn key(&self) -> &PluginKey {
        &self.key
    }

    pub fn id(&self) -> &PluginId {
        self.key.id()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    pub fn log_sink(&self) -> &Arc<PluginLogSink> {
        &self.log_sink
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        self.log_sink.log(level, message);
    }

    /// Registers a hook to run on teardown. Runs it right away if the plugin
    /// is already torn down.
    pub fn on_teardown<F>(&self, hook: F)
    where
        F: FnOnce(&PluginKey) + Send + 'static,
    {
        let mut hooks = self.teardown_hooks.lock();
        if self.is_torn_down() {
            drop(hooks);
            run_isolated("teardown", &self.key, || hook(&self.key));
            return;
        }
        hooks.push(Box::new(hook));
    }

    /// Marks the plugin torn down and runs its teardown hooks.
    ///
    /// Returns false if it was already torn down.
    pub fn tear_down(&self) -> bool {
        let hooks = {
            let mut hooks = self.teardown_hooks.lock();
            if self.torn_down.swap(true, Ordering::AcqRel) {
                return false;
            }
            std::mem::take(&mut *hooks)
        };

        info!("🔌 Tearing down plugin {} v{}", self.key, self.version);
        for hook in hooks {
            run_isolated("teardown", &self.key, || hook(&self.key));
        }
        true
    }
}

impl fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginHandle")
            .field("key", &self.key)
            .field("version", &self.version)
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Maps plugin ids to the handle of their current instance.
///
/// Entries are replaced when a plugin is loaded again and are never removed,
/// so a lookup may return a handle that has already been torn down.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: DashMap<PluginId, Arc<PluginHandle>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `handle` as the current instance, returning the one it replaces.
    pub fn register(&self, handle: Arc<PluginHandle>) -> Option<Arc<PluginHandle>> {
        let previous = self.plugins.insert(handle.id().clone(), Arc::clone(&handle));
        debug!("📋 Plugin {} recorded in registry", handle.key());
        previous
    }

    pub fn resolve(&self, id: &PluginId) -> Option<Arc<PluginHandle>> {
        self.plugins.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Resolves `key` only if it still names the current instance.
    pub fn resolve_key(&self, key: &PluginKey) -> Option<Arc<PluginHandle>> {
        self.resolve(key.id()).filter(|handle| handle.key() == key)
    }

    pub fn handles(&self) -> Vec<Arc<PluginHandle>> {
        self.plugins.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn ids(&self) -> Vec<PluginId> {
        self.plugins.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

// ============================================================================
// Platforms
// ============================================================================

/// How a host platform tells us a plugin went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloadDetection {
    /// The platform fires a disable event; we hook the plugin teardown.
    DisableEvent,
    /// No disable event; we watch the plugin's log sink being closed.
    LogSinkSentinel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostPlatform {
    Sponge,
    Velocity,
    Bukkit,
    Forge,
    Fabric,
    BungeeCord,
}

impl HostPlatform {
    pub const ALL: [HostPlatform; 6] = [
        HostPlatform::Sponge,
        HostPlatform::Velocity,
        HostPlatform::Bukkit,
        HostPlatform::Forge,
        HostPlatform::Fabric,
        HostPlatform::BungeeCord,
    ];

    pub fn unload_detection(self) -> UnloadDetection {
        match self {
            HostPlatform::BungeeCord => UnloadDetection::LogSinkSentinel,
            _ => UnloadDetection::DisableEvent,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HostPlatform::Sponge => "sponge",
            HostPlatform::Velocity => "velocity",
            HostPlatform::Bukkit => "bukkit",
            HostPlatform::Forge => "forge",
            HostPlatform::Fabric => "fabric",
            HostPlatform::BungeeCord => "bungeecord",
        }
    }
}

impl fmt::Display for HostPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostPlatform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.to_ascii_lowercase();
        HostPlatform::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| format!("Unknown platform '{}'", s))
    }
}

// ============================================================================
// Bridges
// ============================================================================

/// Connects plugin unloads to bulk unregistration on the bus.
pub trait LifecycleBridge: Send + Sync {
    fn platform(&self) -> HostPlatform;

    /// Starts watching `handle`.
    fn attach(&self, handle: &Arc<PluginHandle>) -> Result<(), EventError>;

    /// Stops watching every plugin. Called when the bus itself shuts down.
    fn detach_all(&self);
}

/// Unregisters a plugin from an explicit teardown hook on its handle.
pub struct ShutdownHookBridge {
    bus: EventBus,
    platform: HostPlatform,
    attached: Arc<Mutex<HashSet<PluginKey>>>,
    detached: Arc<AtomicBool>,
}

impl ShutdownHookBridge {
    pub fn new(bus: EventBus, platform: HostPlatform) -> Self {
        Self {
            bus,
            platform,
            attached: Arc::new(Mutex::new(HashSet::new())),
            detached: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Number of plugin instances whose teardown hook has not fired yet.
    pub fn attached_count(&self) -> usize {
        self.attached.lock().len()
    }
}

impl LifecycleBridge for ShutdownHookBridge {
    fn platform(&self) -> HostPlatform {
        self.platform
    }

    fn attach(&self, handle: &Arc<PluginHandle>) -> Result<(), EventError> {
        if !self.attached.lock().insert(handle.key().clone()) {
            debug!("Plugin {} is already attached", handle.key());
            return Ok(());
        }

        let bus = self.bus.clone();
        let attached = Arc::clone(&self.attached);
        let detached = Arc::clone(&self.detached);
        handle.on_teardown(move |key| {
            attached.lock().remove(key);
            if detached.load(Ordering::Acquire) {
                return;
            }
            bus.unregister(key);
        });
        debug!("🔗 Attached shutdown hook to plugin {}", handle.key());
        Ok(())
    }

    fn detach_all(&self) {
        self.detached.store(true, Ordering::Release);
        let count = {
            let mut attached = self.attached.lock();
            let count = attached.len();
            attached.clear();
            count
        };
        info!("🔗 Detached shutdown hooks from {} plugins", count);
    }
}

/// Unregisters a plugin when its log sink is closed.
///
/// Installs at most one sentinel per sink.
pub struct SentinelBridge {
    bus: EventBus,
    registry: Arc<PluginRegistry>,
    platform: HostPlatform,
}

impl SentinelBridge {
    pub fn new(bus: EventBus, registry: Arc<PluginRegistry>, platform: HostPlatform) -> Self {
        Self {
            bus,
            registry,
            platform,
        }
    }
}

impl LifecycleBridge for SentinelBridge {
    fn platform(&self) -> HostPlatform {
        self.platform
    }

    fn attach(&self, handle: &Arc<PluginHandle>) -> Result<(), EventError> {
        let sink = handle.log_sink();
        if sink.has_hook(SENTINEL_HOOK) {
            debug!("Plugin {} already has an unload sentinel", handle.key());
            return Ok(());
        }

        let bus = self.bus.clone();
        let key = handle.key().clone();
        let weak: Weak<PluginHandle> = Arc::downgrade(handle);
        let installed = sink.add_close_hook(SENTINEL_HOOK, move || {
            if let Some(handle) = weak.upgrade() {
                handle.tear_down();
            }
            bus.unregister(&key);
        });

        if !installed {
            warn!(
                "⚠️ Log sink of plugin {} is already closed; unregistering now",
                handle.key()
            );
            self.bus.unregister(handle.key());
            return Err(EventError::PluginTornDown(handle.key().to_string()));
        }

        debug!("🔗 Installed unload sentinel on plugin {}", handle.key());
        Ok(())
    }

    fn detach_all(&self) {
        let removed: usize = self
            .registry
            .handles()
            .iter()
            .map(|handle| handle.log_sink().remove_hooks(SENTINEL_HOOK))
            .sum();
        info!("🔗 Removed {} unload sentinels", removed);
    }
}

/// Builds the bridge suited to `platform`.
pub fn create_lifecycle_bridge(
    platform: HostPlatform,
    bus: EventBus,
    registry: Arc<PluginRegistry>,
) -> Arc<dyn LifecycleBridge> {
    match platform.unload_detection() {
        UnloadDetection::DisableEvent => Arc::new(ShutdownHookBridge::new(bus, platform)),
        UnloadDetection::LogSinkSentinel => Arc::new(SentinelBridge::new(bus, registry, platform)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{event_contract, Listener, PluginState, SubscriberMethod};
    use std::sync::atomic::AtomicUsize;

    event_contract! {
        contract Tick {
            #[slot(0)] count: u64
        }
    }

    struct TickListener;

    impl Listener for TickListener {
        fn subscribers(self: Arc<Self>) -> Vec<SubscriberMethod> {
            vec![SubscriberMethod::on::<Tick, _>("on_tick", |_| Ok(()))]
        }
    }

    fn registered(bus: &EventBus, handle: &Arc<PluginHandle>) {
        bus.register(handle.key(), Arc::new(TickListener)).unwrap();
        assert_eq!(bus.plugin_state(handle.key()), PluginState::Active);
    }

    #[test]
    fn teardown_hooks_run_once() {
        let handle = PluginHandle::new("economy", "1.0.0");
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        handle.on_teardown(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(handle.tear_down());
        assert!(!handle.tear_down());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(handle.is_torn_down());
    }

    #[test]
    fn late_teardown_hook_runs_immediately() {
        let handle = PluginHandle::new("economy", "1.0.0");
        handle.tear_down();

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        handle.on_teardown(move |_| flag.store(true, Ordering::SeqCst));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn panicking_teardown_hook_does_not_stop_the_others() {
        let handle = PluginHandle::new("economy", "1.0.0");
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        handle.on_teardown(|_| panic!("hook exploded"));
        handle.on_teardown(move |_| flag.store(true, Ordering::SeqCst));

        handle.tear_down();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn log_sink_hooks_run_on_close_and_drop() {
        let runs = Arc::new(AtomicUsize::new(0));

        let sink = PluginLogSink::new(PluginKey::new("chat"));
        let counter = Arc::clone(&runs);
        assert!(sink.add_close_hook("count", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        sink.close();
        sink.close();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!sink.add_close_hook("late", || {}));

        let dropped = PluginLogSink::new(PluginKey::new("chat"));
        let counter = Arc::clone(&runs);
        dropped.add_close_hook("count", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(dropped);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn registry_keeps_the_latest_instance() {
        let registry = PluginRegistry::new();
        let first = PluginHandle::new("economy", "1.0.0");
        let second = PluginHandle::new("economy", "1.1.0");

        assert!(registry.register(Arc::clone(&first)).is_none());
        assert!(registry.register(Arc::clone(&second)).is_some());

        assert_eq!(registry.len(), 1);
        assert!(registry.resolve_key(first.key()).is_none());
        assert_eq!(
            registry.resolve(&PluginId::new("economy")).unwrap().version(),
            "1.1.0"
        );
    }

    #[test]
    fn shutdown_bridge_unregisters_on_teardown() {
        let bus = EventBus::new();
        let registry = Arc::new(PluginRegistry::new());
        let bridge = create_lifecycle_bridge(HostPlatform::Sponge, bus.clone(), registry);
        let handle = PluginHandle::new("economy", "1.0.0");

        registered(&bus, &handle);
        bridge.attach(&handle).unwrap();
        handle.tear_down();

        assert_eq!(bus.plugin_state(handle.key()), PluginState::TornDown);
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn shutdown_bridge_forgets_torn_down_instances() {
        let bus = EventBus::new();
        let bridge = ShutdownHookBridge::new(bus.clone(), HostPlatform::Forge);

        for _ in 0..3 {
            let handle = PluginHandle::new("economy", "1.0.0");
            registered(&bus, &handle);
            bridge.attach(&handle).unwrap();
            assert_eq!(bridge.attached_count(), 1);
            handle.tear_down();
            assert_eq!(bridge.attached_count(), 0);
        }
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn detached_shutdown_bridge_ignores_teardown() {
        let bus = EventBus::new();
        let bridge = ShutdownHookBridge::new(bus.clone(), HostPlatform::Velocity);
        let handle = PluginHandle::new("economy", "1.0.0");

        registered(&bus, &handle);
        bridge.attach(&handle).unwrap();
        bridge.detach_all();
        handle.tear_down();

        assert_eq!(bus.plugin_state(handle.key()), PluginState::Active);
    }

    #[test]
    fn sentinel_is_installed_once_and_fires_on_close() {
        let bus = EventBus::new();
        let registry = Arc::new(PluginRegistry::new());
        let bridge =
            create_lifecycle_bridge(HostPlatform::BungeeCord, bus.clone(), Arc::clone(&registry));
        let handle = PluginHandle::new("proxy-chat", "2.0.0");
        registry.register(Arc::clone(&handle));

        registered(&bus, &handle);
        bridge.attach(&handle).unwrap();
        bridge.attach(&handle).unwrap();
        assert_eq!(handle.log_sink().remove_hooks("other"), 0);

        handle.log_sink().close();

        assert!(handle.is_torn_down());
        assert_eq!(bus.plugin_state(handle.key()), PluginState::TornDown);
    }

    #[test]
    fn sentinel_bridge_detach_removes_sentinels() {
        let bus = EventBus::new();
        let registry = Arc::new(PluginRegistry::new());
        let bridge = SentinelBridge::new(bus.clone(), Arc::clone(&registry), HostPlatform::BungeeCord);
        let handle = PluginHandle::new("proxy-chat", "2.0.0");
        registry.register(Arc::clone(&handle));

        bridge.attach(&handle).unwrap();
        assert!(handle.log_sink().has_hook(SENTINEL_HOOK));

        bridge.detach_all();
        assert!(!handle.log_sink().has_hook(SENTINEL_HOOK));
    }

    #[test]
    fn sentinel_on_closed_sink_unregisters_immediately() {
        let bus = EventBus::new();
        let bridge = SentinelBridge::new(
            bus.clone(),
            Arc::new(PluginRegistry::new()),
            HostPlatform::BungeeCord,
        );
        let handle = PluginHandle::new("proxy-chat", "2.0.0");
        registered(&bus, &handle);
        handle.log_sink().close();

        assert!(matches!(
            bridge.attach(&handle),
            Err(EventError::PluginTornDown(_))
        ));
        assert_eq!(bus.plugin_state(handle.key()), PluginState::TornDown);
    }

    #[test]
    fn platforms_pick_their_unload_detection() {
        for platform in HostPlatform::ALL {
            let expected = if platform == HostPlatform::BungeeCord {
                UnloadDetection::LogSinkSentinel
            } else {
                UnloadDetection::DisableEvent
            };
            assert_eq!(platform.unload_detection(), expected);
            assert_eq!(platform.as_str().parse::<HostPlatform>(), Ok(platform));
        }
        assert!("spigot".parse::<HostPlatform>().is_err());
    }
}
