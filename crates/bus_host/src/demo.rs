//! Built-in demo plugins and the event traffic the host runs through them.

use crate::plugins::{HostPlugin, PluginContext, PluginError, PluginFactory, PluginHost};
use async_trait::async_trait;
use plugin_event_bus::{
    event_contract, field_values, BusConfig, EventContract, EventDescriptor, EventError,
    FieldValue, Listener, LogLevel, PostOrder, SubscriberMethod, SubscriptionHandle,
};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

event_contract! {
    /// Money about to move into or out of an account.
    pub contract EconomyTransaction(cancellable) {
        #[slot(0)] account: String,
        #[slot(1)] amount: f64,
    }
}

event_contract! {
    pub contract PlayerChat(cancellable) {
        #[slot(0)] player: String,
        #[slot(1)] message: String,
    }
}

event_contract! {
    /// A configuration section was reloaded; the type argument names the
    /// settings type that section deserializes into.
    pub contract ConfigReloaded(generic) {
        #[slot(0)] section: String,
    }
}

const TRANSFER_LIMIT: f64 = 1_000.0;

// ============================================================================
// economy-audit
// ============================================================================

struct EconomyAuditListener {
    limit: f64,
    audited: AtomicUsize,
}

impl Listener for EconomyAuditListener {
    fn subscribers(self: Arc<Self>) -> Vec<SubscriberMethod> {
        let limit = self.limit;
        let audit = Arc::clone(&self);
        vec![
            SubscriberMethod::on::<EconomyTransaction, _>("block_large_transfers", move |event| {
                let amount = *EconomyTransaction::amount(event)?;
                if amount.abs() > limit {
                    event.set_cancelled(true)?;
                    warn!(
                        plugin = "economy-audit",
                        "💸 Blocked transfer of {:.2} on {}",
                        amount,
                        EconomyTransaction::account(event)?
                    );
                }
                Ok(())
            })
            .order(PostOrder::EARLY),
            SubscriberMethod::on::<EconomyTransaction, _>("reject_negative", |event| {
                if *EconomyTransaction::amount(event)? < 0.0 {
                    return Err(EventError::handler("negative transaction amount"));
                }
                Ok(())
            }),
            SubscriberMethod::on::<EconomyTransaction, _>("audit_trail", move |event| {
                let entry = audit.audited.fetch_add(1, Ordering::Relaxed) + 1;
                info!(
                    plugin = "economy-audit",
                    "🧾 #{} {} {:.2} cancelled={}",
                    entry,
                    EconomyTransaction::account(event)?,
                    EconomyTransaction::amount(event)?,
                    event.is_cancelled()
                );
                Ok(())
            })
            .order(PostOrder::LAST)
            .ignore_cancelled(),
        ]
    }
}

#[derive(Default)]
pub struct EconomyAudit;

#[async_trait]
impl HostPlugin for EconomyAudit {
    fn name(&self) -> &str {
        "economy-audit"
    }

    fn version(&self) -> &str {
        "1.2.0"
    }

    async fn register_listeners(
        &mut self,
        context: Arc<PluginContext>,
    ) -> Result<(), PluginError> {
        context.register(Arc::new(EconomyAuditListener {
            limit: TRANSFER_LIMIT,
            audited: AtomicUsize::new(0),
        }))?;
        Ok(())
    }

    async fn on_enable(&mut self, context: Arc<PluginContext>) -> Result<(), PluginError> {
        context.log(
            LogLevel::Info,
            &format!("Auditing transfers above {:.0}", TRANSFER_LIMIT),
        );
        Ok(())
    }
}

// ============================================================================
// chat-filter
// ============================================================================

struct ChatFilterListener {
    blocked: Vec<String>,
}

impl Listener for ChatFilterListener {
    fn subscribers(self: Arc<Self>) -> Vec<SubscriberMethod> {
        let filter = Arc::clone(&self);
        vec![
            SubscriberMethod::on::<PlayerChat, _>("filter_blocked_words", move |event| {
                let message = PlayerChat::message(event)?.to_lowercase();
                if filter.blocked.iter().any(|word| message.contains(word)) {
                    event.set_cancelled(true)?;
                    info!(
                        plugin = "chat-filter",
                        "🚫 Filtered message from {}",
                        PlayerChat::player(event)?
                    );
                }
                Ok(())
            })
            .order(PostOrder::FIRST),
            SubscriberMethod::on::<PlayerChat, _>("relay", |event| {
                info!(
                    plugin = "chat-filter",
                    "💬 <{}> {}",
                    PlayerChat::player(event)?,
                    PlayerChat::message(event)?
                );
                Ok(())
            }),
        ]
    }
}

pub struct ChatFilter {
    blocked: Vec<String>,
}

impl Default for ChatFilter {
    fn default() -> Self {
        Self {
            blocked: vec!["spam".to_string(), "free gold".to_string()],
        }
    }
}

#[async_trait]
impl HostPlugin for ChatFilter {
    fn name(&self) -> &str {
        "chat-filter"
    }

    fn version(&self) -> &str {
        "0.4.1"
    }

    async fn register_listeners(
        &mut self,
        context: Arc<PluginContext>,
    ) -> Result<(), PluginError> {
        context.register(Arc::new(ChatFilterListener {
            blocked: self.blocked.clone(),
        }))?;
        Ok(())
    }
}

// ============================================================================
// config-watcher
// ============================================================================

/// Follows reloads of the `[bus]` section through a single subscription.
#[derive(Default)]
pub struct ConfigWatcher {
    subscription: Option<SubscriptionHandle>,
}

#[async_trait]
impl HostPlugin for ConfigWatcher {
    fn name(&self) -> &str {
        "config-watcher"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn register_listeners(
        &mut self,
        context: Arc<PluginContext>,
    ) -> Result<(), PluginError> {
        let handle = context.subscribe(
            SubscriberMethod::on_generic::<ConfigReloaded, BusConfig, _>(
                "on_bus_config_reloaded",
                |event| {
                    info!(
                        plugin = "config-watcher",
                        "🔄 Section [{}] reloaded as {}",
                        ConfigReloaded::section(event)?,
                        event.descriptor()
                    );
                    Ok(())
                },
            )
            .order(PostOrder::LATE),
        )?;
        self.subscription = Some(handle);
        Ok(())
    }

    async fn on_disable(&mut self, context: Arc<PluginContext>) -> Result<(), PluginError> {
        if let Some(handle) = self.subscription.take() {
            handle.close();
            context.log(LogLevel::Debug, "Closed config subscription");
        }
        Ok(())
    }
}

fn factory<P: HostPlugin + Default + 'static>() -> PluginFactory {
    Box::new(|| Box::new(P::default()))
}

/// Factories for every built-in plugin, keyed by plugin name.
pub fn builtin_plugins() -> Vec<(&'static str, PluginFactory)> {
    vec![
        ("economy-audit", factory::<EconomyAudit>()),
        ("chat-filter", factory::<ChatFilter>()),
        ("config-watcher", factory::<ConfigWatcher>()),
    ]
}

// ============================================================================
// Demo traffic
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DemoReport {
    pub transactions_posted: usize,
    pub transactions_cancelled: usize,
    pub chats_posted: usize,
    pub chats_cancelled: usize,
    pub config_reloads_posted: usize,
    /// Posts skipped because nothing subscribed to them
    pub posts_skipped: usize,
    pub chat_filter_reloaded: bool,
}

fn post(
    host: &PluginHost,
    descriptor: &EventDescriptor,
    values: Vec<FieldValue>,
    report: &mut DemoReport,
) -> anyhow::Result<Option<bool>> {
    if !host.bus().has_subscribers(descriptor) {
        debug!("Nobody listens to {}, skipping", descriptor);
        report.posts_skipped += 1;
        return Ok(None);
    }
    let event = host.bus().post_new(descriptor, values)?;
    Ok(Some(event.is_cancelled()))
}

/// Sends a fixed batch of events through the enabled plugins.
pub async fn run_demo(host: &PluginHost) -> anyhow::Result<DemoReport> {
    let mut report = DemoReport::default();

    let transactions = [("alice", 25.0), ("bob", 5_000.0), ("carol", -3.0)];
    for (account, amount) in transactions {
        let values = field_values![account.to_string(), amount];
        if let Some(cancelled) =
            post(host, &EconomyTransaction::descriptor(), values, &mut report)?
        {
            report.transactions_posted += 1;
            report.transactions_cancelled += usize::from(cancelled);
        }
    }

    let chats = [
        ("steve", "hello there"),
        ("griefer", "FREE GOLD at spam.example"),
    ];
    for (player, message) in chats {
        post_chat(host, player, message, &mut report)?;
    }

    for descriptor in [
        ConfigReloaded::descriptor_of::<BusConfig>(),
        ConfigReloaded::descriptor_of::<String>(),
    ] {
        let values = field_values!["bus".to_string()];
        if post(host, &descriptor, values, &mut report)?.is_some() {
            report.config_reloads_posted += 1;
        }
    }

    if host.loaded_plugins().await.iter().any(|p| p == "chat-filter") {
        let key = host.reload("chat-filter").await?;
        info!("🔁 chat-filter reloaded as {}", key);
        report.chat_filter_reloaded = true;
        post_chat(host, "griefer", "still spam", &mut report)?;
    }

    Ok(report)
}

fn post_chat(
    host: &PluginHost,
    player: &str,
    message: &str,
    report: &mut DemoReport,
) -> anyhow::Result<()> {
    let values = field_values![player.to_string(), message.to_string()];
    if let Some(cancelled) = post(host, &PlayerChat::descriptor(), values, report)? {
        report.chats_posted += 1;
        report.chats_cancelled += usize::from(cancelled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugin_event_bus::{EventBus, HostPlatform};

    fn demo_host(platform: HostPlatform) -> PluginHost {
        let mut host = PluginHost::new(EventBus::new(), platform);
        for (name, factory) in builtin_plugins() {
            host.add_factory(name, factory);
        }
        host
    }

    fn all_plugins() -> Vec<String> {
        builtin_plugins()
            .into_iter()
            .map(|(name, _)| name.to_string())
            .collect()
    }

    #[tokio::test]
    async fn demo_runs_against_all_plugins() {
        let host = demo_host(HostPlatform::Sponge);
        assert_eq!(host.enable_all(&all_plugins()).await.len(), 3);

        let report = run_demo(&host).await.unwrap();

        assert_eq!(report.transactions_posted, 3);
        assert_eq!(report.transactions_cancelled, 1);
        assert_eq!(report.chats_posted, 3);
        assert_eq!(report.chats_cancelled, 2);
        assert_eq!(report.config_reloads_posted, 1);
        assert_eq!(report.posts_skipped, 1);
        assert!(report.chat_filter_reloaded);

        let stats = host.bus().stats();
        assert_eq!(stats.handler_failures, 1);
        assert_eq!(stats.handler_panics, 0);
        assert_eq!(stats.plugins_torn_down, 1);
    }

    #[tokio::test]
    async fn demo_skips_events_without_listeners() {
        let host = demo_host(HostPlatform::BungeeCord);
        host.enable_all(&["config-watcher".to_string()]).await;

        let report = run_demo(&host).await.unwrap();

        assert_eq!(report.transactions_posted, 0);
        assert_eq!(report.chats_posted, 0);
        assert_eq!(report.config_reloads_posted, 1);
        assert_eq!(report.posts_skipped, 6);
        assert!(!report.chat_filter_reloaded);
    }

    #[tokio::test]
    async fn config_watcher_closes_its_subscription_on_disable() {
        let host = demo_host(HostPlatform::Velocity);
        host.enable_all(&["config-watcher".to_string()]).await;
        let descriptor = ConfigReloaded::descriptor_of::<BusConfig>();
        assert!(host.bus().has_subscribers(&descriptor));
        assert!(!host
            .bus()
            .has_subscribers(&ConfigReloaded::descriptor_of::<String>()));

        host.disable("config-watcher").await.unwrap();

        assert!(!host.bus().has_subscribers(&descriptor));
    }

    #[tokio::test]
    async fn chat_filter_runs_before_relay() {
        let host = demo_host(HostPlatform::Bukkit);
        host.enable_all(&["chat-filter".to_string()]).await;

        let order: Vec<String> = host
            .bus()
            .subscriptions_for(&PlayerChat::descriptor())
            .into_iter()
            .map(|info| info.method)
            .collect();

        assert_eq!(order, vec!["filter_blocked_words", "relay"]);
    }
}
