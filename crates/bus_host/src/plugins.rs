//! Plugin hosting on top of the event bus.
//!
//! The [`PluginHost`] creates plugin instances from registered factories and
//! enables them in two phases: every plugin registers its listeners first,
//! then every plugin is enabled. Listeners of one plugin are therefore in
//! place before any other plugin starts posting events.
//!
//! Each enabled plugin gets a fresh [`PluginHandle`] attached to the
//! platform's [`LifecycleBridge`], so disabling a plugin (or a failed enable)
//! drops all of its subscriptions through the same path a real host unload
//! would take.

use async_trait::async_trait;
use plugin_event_bus::{
    create_lifecycle_bridge, EventBus, EventError, HostPlatform, LifecycleBridge, Listener,
    LogLevel, PluginHandle, PluginKey, PluginRegistry, PluginState, RegistrationReport,
    SubscriberMethod, SubscriptionHandle,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Plugin initialization failed: {0}")]
    InitializationFailed(String),
    #[error("Plugin execution error: {0}")]
    ExecutionError(String),
    #[error("Plugin not found: {0}")]
    NotFound(String),
    #[error("Event bus error: {0}")]
    Event(#[from] EventError),
}

/// What a plugin sees of the host.
pub struct PluginContext {
    bus: EventBus,
    handle: Arc<PluginHandle>,
}

impl PluginContext {
    pub fn key(&self) -> &PluginKey {
        self.handle.key()
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        self.handle.log(level, message);
    }

    /// Registers a listener for this plugin. Methods the bus rejected are
    /// logged and skipped.
    pub fn register(&self, listener: Arc<dyn Listener>) -> Result<RegistrationReport, PluginError> {
        let report = self.bus.register(self.key(), listener)?;
        for rejected in &report.rejected {
            self.log(
                LogLevel::Warn,
                &format!("Skipped subscriber of {}: {}", report.listener, rejected),
            );
        }
        Ok(report)
    }

    pub fn subscribe(&self, method: SubscriberMethod) -> Result<SubscriptionHandle, PluginError> {
        Ok(self.bus.subscribe(self.key(), method)?)
    }
}

#[async_trait]
pub trait HostPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// First phase: register listeners. Must not post events yet.
    async fn register_listeners(&mut self, context: Arc<PluginContext>)
        -> Result<(), PluginError>;

    /// Second phase: runs once every plugin has registered its listeners.
    async fn on_enable(&mut self, _context: Arc<PluginContext>) -> Result<(), PluginError> {
        Ok(())
    }

    async fn on_disable(&mut self, _context: Arc<PluginContext>) -> Result<(), PluginError> {
        Ok(())
    }
}

pub type PluginFactory = Box<dyn Fn() -> Box<dyn HostPlugin> + Send + Sync>;

struct LoadedPlugin {
    plugin: Box<dyn HostPlugin>,
    context: Arc<PluginContext>,
}

struct PendingPlugin {
    name: String,
    plugin: Box<dyn HostPlugin>,
    context: Arc<PluginContext>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PluginSummary {
    pub name: String,
    pub version: String,
    pub instance: String,
    pub subscriptions: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostSummary {
    pub platform: HostPlatform,
    pub plugins: Vec<PluginSummary>,
}

pub struct PluginHost {
    bus: EventBus,
    platform: HostPlatform,
    registry: Arc<PluginRegistry>,
    bridge: Arc<dyn LifecycleBridge>,
    factories: HashMap<String, PluginFactory>,
    plugins: RwLock<HashMap<String, LoadedPlugin>>,
}

impl PluginHost {
    pub fn new(bus: EventBus, platform: HostPlatform) -> Self {
        let registry = Arc::new(PluginRegistry::new());
        let bridge = create_lifecycle_bridge(platform, bus.clone(), Arc::clone(&registry));
        info!(
            "🔌 Plugin host running as {} ({:?})",
            platform,
            platform.unload_detection()
        );

        Self {
            bus,
            platform,
            registry,
            bridge,
            factories: HashMap::new(),
            plugins: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_factory(&mut self, name: impl Into<String>, factory: PluginFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Enables the named plugins with two-phase initialization.
    ///
    /// Plugins that fail are logged, fully unregistered and left out of the
    /// returned list; the rest are still enabled.
    pub async fn enable_all(&self, names: &[String]) -> Vec<String> {
        info!("Starting two-phase enable for {} plugins", names.len());
        let mut failed: Vec<(String, PluginError)> = Vec::new();

        // Phase 1: instances, handles and unload detection
        let mut pending = Vec::new();
        let mut seen = HashSet::new();
        for name in names {
            if !seen.insert(name.as_str()) {
                let e = PluginError::InitializationFailed(format!(
                    "{} is listed more than once",
                    name
                ));
                error!("❌ Failed to create plugin {}: {}", name, e);
                failed.push((name.clone(), e));
                continue;
            }
            match self.instantiate(name).await {
                Ok(plugin) => pending.push(plugin),
                Err(e) => {
                    error!("❌ Failed to create plugin {}: {}", name, e);
                    failed.push((name.clone(), e));
                }
            }
        }

        // Phase 2: every plugin registers its listeners
        let mut registered = Vec::new();
        for mut partial in pending {
            let before = self.live_subscriptions(partial.context.key());
            match partial
                .plugin
                .register_listeners(Arc::clone(&partial.context))
                .await
            {
                Ok(()) => {
                    let count = self.live_subscriptions(partial.context.key()) - before;
                    info!(
                        "Plugin {} registered {} subscriptions",
                        partial.name, count
                    );
                    registered.push(partial);
                }
                Err(e) => {
                    error!("❌ Plugin {} failed to register listeners: {}", partial.name, e);
                    self.release(&partial.context);
                    failed.push((partial.name, e));
                }
            }
        }

        // Phase 3: enable
        let mut enabled = Vec::new();
        for mut partial in registered {
            match partial.plugin.on_enable(Arc::clone(&partial.context)).await {
                Ok(()) => {
                    let mut plugins = self.plugins.write().await;
                    if plugins.contains_key(&partial.name) {
                        drop(plugins);
                        let e = PluginError::InitializationFailed(format!(
                            "{} was enabled concurrently",
                            partial.name
                        ));
                        error!("❌ Plugin {} failed to enable: {}", partial.name, e);
                        self.release(&partial.context);
                        failed.push((partial.name, e));
                        continue;
                    }
                    info!(
                        "✅ Plugin {} v{} enabled",
                        partial.name,
                        partial.plugin.version()
                    );
                    plugins.insert(
                        partial.name.clone(),
                        LoadedPlugin {
                            plugin: partial.plugin,
                            context: partial.context,
                        },
                    );
                    enabled.push(partial.name);
                }
                Err(e) => {
                    error!("❌ Plugin {} failed to enable: {}", partial.name, e);
                    self.release(&partial.context);
                    failed.push((partial.name, e));
                }
            }
        }

        if !failed.is_empty() {
            warn!("⚠️ Failed to enable {} plugins", failed.len());
            for (name, error) in &failed {
                warn!("  {}: {}", name, error);
            }
        }
        info!(
            "Two-phase enable complete: {} of {} plugins enabled",
            enabled.len(),
            names.len()
        );
        enabled
    }

    async fn instantiate(&self, name: &str) -> Result<PendingPlugin, PluginError> {
        if self.plugins.read().await.contains_key(name) {
            return Err(PluginError::InitializationFailed(format!(
                "{} is already enabled",
                name
            )));
        }
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;

        let plugin = factory();
        if plugin.name() != name {
            warn!(
                "⚠️ Factory {} produced a plugin calling itself {}",
                name,
                plugin.name()
            );
        }
        let handle = PluginHandle::new(name, plugin.version());
        self.registry.register(Arc::clone(&handle));
        self.bridge.attach(&handle)?;

        debug!("Created plugin instance {}", handle.key());
        Ok(PendingPlugin {
            name: name.to_string(),
            plugin,
            context: Arc::new(PluginContext {
                bus: self.bus.clone(),
                handle,
            }),
        })
    }

    fn live_subscriptions(&self, key: &PluginKey) -> usize {
        self.bus
            .subscription_counts()
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Unloads one plugin instance the way the host platform would.
    fn release(&self, context: &PluginContext) {
        let handle = &context.handle;
        handle.tear_down();
        handle.log_sink().close();

        if self.bus.plugin_state(handle.key()) != PluginState::TornDown {
            warn!(
                "⚠️ Unload of {} was not picked up by the lifecycle bridge",
                handle.key()
            );
            self.bus.unregister(handle.key());
        }
    }

    /// Disables a plugin and drops all of its subscriptions.
    pub async fn disable(&self, name: &str) -> Result<(), PluginError> {
        let loaded = self
            .plugins
            .write()
            .await
            .remove(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        self.shut_down(name, loaded).await;
        Ok(())
    }

    async fn shut_down(&self, name: &str, mut loaded: LoadedPlugin) {
        info!("Disabling plugin: {}", name);
        if let Err(e) = loaded.plugin.on_disable(Arc::clone(&loaded.context)).await {
            error!("❌ Error disabling plugin {}: {}", name, e);
        }
        self.release(&loaded.context);
    }

    /// Disables a plugin and enables a fresh instance of it.
    pub async fn reload(&self, name: &str) -> Result<PluginKey, PluginError> {
        self.disable(name).await?;
        let enabled = self.enable_all(&[name.to_string()]).await;
        if enabled.is_empty() {
            return Err(PluginError::InitializationFailed(format!(
                "{} did not come back after reload",
                name
            )));
        }

        let plugins = self.plugins.read().await;
        plugins
            .get(name)
            .map(|loaded| loaded.context.key().clone())
            .ok_or_else(|| PluginError::NotFound(name.to_string()))
    }

    /// Disables every plugin, detaches the lifecycle bridge and closes the bus.
    pub async fn shutdown_all(&self) {
        let drained: Vec<(String, LoadedPlugin)> =
            self.plugins.write().await.drain().collect();
        info!("Shutting down {} plugins", drained.len());

        for (name, loaded) in drained {
            self.shut_down(&name, loaded).await;
        }

        self.bridge.detach_all();
        self.bus.close();
        info!("All plugins shut down");
    }

    pub async fn loaded_plugins(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn plugin_key(&self, name: &str) -> Option<PluginKey> {
        self.plugins
            .read()
            .await
            .get(name)
            .map(|loaded| loaded.context.key().clone())
    }

    pub async fn summary(&self) -> HostSummary {
        let counts = self.bus.subscription_counts();
        let plugins = self.plugins.read().await;
        let mut summaries: Vec<PluginSummary> = plugins
            .iter()
            .map(|(name, loaded)| PluginSummary {
                name: name.clone(),
                version: loaded.plugin.version().to_string(),
                instance: loaded.context.key().to_string(),
                subscriptions: counts.get(loaded.context.key()).copied().unwrap_or(0),
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));

        HostSummary {
            platform: self.platform,
            plugins: summaries,
        }
    }
}
