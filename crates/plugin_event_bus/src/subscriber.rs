//! Listener declarations and the subscriber scanner.
//!
//! A listener is any object that exposes a list of [`SubscriberMethod`]s. Each
//! method declares the event it observes as its single parameter, an order
//! and whether it still wants events that an earlier subscriber cancelled.
//! [`scan`] validates those declarations before the bus stores them; bad
//! methods are rejected one by one and never affect their siblings.

use crate::events::{EventContract, EventTarget, PostOrder};
use crate::synthesis::EventInstance;
use crate::types::TypeToken;
use crate::{DefinitionError, EventError};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Handler invoked for every matching event.
pub type HandlerFn = dyn Fn(&EventInstance) -> Result<(), EventError> + Send + Sync;

/// One declared parameter of a subscriber method.
#[derive(Debug, Clone)]
pub enum SubscriberParam {
    /// An event contract, optionally narrowed to one reification.
    Event(EventTarget),
    /// Anything that is not an event contract.
    Value(TypeToken),
}

impl SubscriberParam {
    pub fn event<C: EventContract>() -> Self {
        Self::Event(C::target())
    }

    pub fn event_of<C: EventContract, T: ?Sized + 'static>() -> Self {
        Self::Event(C::target_of::<T>())
    }

    pub fn value<T: ?Sized + 'static>() -> Self {
        Self::Value(TypeToken::of::<T>())
    }
}

/// Declaration of one subscriber method.
///
/// ```rust
/// use plugin_event_bus::{event_contract, PostOrder, SubscriberMethod};
///
/// event_contract! {
///     pub contract PlayerJoined {
///         #[slot(0)] name: String
///     }
/// }
///
/// let method = SubscriberMethod::on::<PlayerJoined, _>("greet", |event| {
///     println!("welcome {}", PlayerJoined::name(event)?);
///     Ok(())
/// })
/// .order(PostOrder::LATE);
/// assert_eq!(method.get_order(), PostOrder::LATE);
/// ```
pub struct SubscriberMethod {
    name: String,
    params: Vec<SubscriberParam>,
    order: i32,
    ignore_cancelled: bool,
    handler: Option<Arc<HandlerFn>>,
}

impl SubscriberMethod {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            order: PostOrder::NORMAL,
            ignore_cancelled: false,
            handler: None,
        }
    }

    /// Subscribes `handler` to the non-generic contract `C`.
    pub fn on<C, F>(name: impl Into<String>, handler: F) -> Self
    where
        C: EventContract,
        F: Fn(&EventInstance) -> Result<(), EventError> + Send + Sync + 'static,
    {
        Self::new(name).param(SubscriberParam::event::<C>()).handler(handler)
    }

    /// Subscribes `handler` to the generic contract `C` reified over `T`.
    pub fn on_generic<C, T, F>(name: impl Into<String>, handler: F) -> Self
    where
        C: EventContract,
        T: ?Sized + 'static,
        F: Fn(&EventInstance) -> Result<(), EventError> + Send + Sync + 'static,
    {
        Self::new(name)
            .param(SubscriberParam::event_of::<C, T>())
            .handler(handler)
    }

    pub fn param(mut self, param: SubscriberParam) -> Self {
        self.params.push(param);
        self
    }

    /// Lower orders run first. Defaults to [`PostOrder::NORMAL`].
    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Keep receiving the event after an earlier subscriber cancelled it.
    pub fn ignore_cancelled(mut self) -> Self {
        self.ignore_cancelled = true;
        self
    }

    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&EventInstance) -> Result<(), EventError> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[SubscriberParam] {
        &self.params
    }

    pub fn get_order(&self) -> i32 {
        self.order
    }

    pub fn receives_cancelled(&self) -> bool {
        self.ignore_cancelled
    }
}

impl fmt::Debug for SubscriberMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberMethod")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("order", &self.order)
            .field("ignore_cancelled", &self.ignore_cancelled)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// An object whose subscriber methods can be registered on the bus.
pub trait Listener: Send + Sync + 'static {
    /// Name used in diagnostics. Defaults to the type name.
    fn listener_name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Declares this listener's subscriber methods.
    ///
    /// Handlers usually capture a clone of `self`.
    fn subscribers(self: Arc<Self>) -> Vec<SubscriberMethod>;
}

/// A subscriber method that passed validation.
#[derive(Clone)]
pub struct ScannedSubscriber {
    pub method: String,
    pub target: EventTarget,
    pub order: i32,
    pub ignore_cancelled: bool,
    pub handler: Arc<HandlerFn>,
}

impl fmt::Debug for ScannedSubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScannedSubscriber")
            .field("method", &self.method)
            .field("target", &self.target.to_string())
            .field("order", &self.order)
            .field("ignore_cancelled", &self.ignore_cancelled)
            .finish()
    }
}

/// Result of scanning one listener.
#[derive(Debug)]
pub struct ScanReport {
    pub listener: String,
    pub subscribers: Vec<ScannedSubscriber>,
    pub rejected: Vec<DefinitionError>,
}

/// Validates every subscriber method `listener` declares.
pub fn scan(listener: &Arc<dyn Listener>) -> ScanReport {
    let listener_name = listener.listener_name().to_string();
    let mut subscribers = Vec::new();
    let mut rejected = Vec::new();

    for method in Arc::clone(listener).subscribers() {
        match validate_method(&listener_name, method) {
            Ok(subscriber) => subscribers.push(subscriber),
            Err(e) => {
                warn!("⚠️ Skipping subscriber: {}", e);
                rejected.push(e);
            }
        }
    }

    ScanReport {
        listener: listener_name,
        subscribers,
        rejected,
    }
}

/// Validates a single method declared by `listener`.
pub fn validate_method(
    listener: &str,
    method: SubscriberMethod,
) -> Result<ScannedSubscriber, DefinitionError> {
    let SubscriberMethod {
        name,
        mut params,
        order,
        ignore_cancelled,
        handler,
    } = method;

    if params.len() != 1 {
        return Err(DefinitionError::SubscriberArity {
            listener: listener.to_string(),
            method: name,
            count: params.len(),
        });
    }

    let target = match params.remove(0) {
        SubscriberParam::Event(target) => target,
        SubscriberParam::Value(token) => {
            return Err(DefinitionError::NotAnEvent {
                listener: listener.to_string(),
                method: name,
                type_name: token.name(),
            })
        }
    };

    match (target.contract().is_generic(), target.generic()) {
        (true, None) => {
            return Err(DefinitionError::RawGenericSubscriber {
                listener: listener.to_string(),
                method: name,
                contract: target.contract().name().to_string(),
            })
        }
        (false, Some(token)) => {
            return Err(DefinitionError::UnexpectedTypeArgument {
                contract: target.contract().name().to_string(),
                type_name: token.name(),
            })
        }
        _ => {}
    }

    let Some(handler) = handler else {
        return Err(DefinitionError::MissingHandler {
            listener: listener.to_string(),
            method: name,
        });
    };

    Ok(ScannedSubscriber {
        method: name,
        target,
        order,
        ignore_cancelled,
        handler,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_contract;

    event_contract! {
        contract Ping {
            #[slot(0)] payload: String
        }
    }

    event_contract! {
        contract Reading(generic) {
            #[slot(0)] sensor: String
        }
    }

    struct Mixed;

    impl Listener for Mixed {
        fn listener_name(&self) -> &str {
            "Mixed"
        }

        fn subscribers(self: Arc<Self>) -> Vec<SubscriberMethod> {
            vec![
                SubscriberMethod::on::<Ping, _>("good", |_| Ok(())),
                SubscriberMethod::new("no_params").handler(|_| Ok(())),
                SubscriberMethod::new("two_params")
                    .param(SubscriberParam::event::<Ping>())
                    .param(SubscriberParam::event::<Ping>())
                    .handler(|_| Ok(())),
                SubscriberMethod::new("plain_value")
                    .param(SubscriberParam::value::<String>())
                    .handler(|_| Ok(())),
                SubscriberMethod::new("raw_generic")
                    .param(SubscriberParam::event::<Reading>())
                    .handler(|_| Ok(())),
                SubscriberMethod::on_generic::<Reading, f64, _>("typed_generic", |_| Ok(()))
                    .order(PostOrder::EARLY)
                    .ignore_cancelled(),
                SubscriberMethod::new("unbound").param(SubscriberParam::event::<Ping>()),
            ]
        }
    }

    #[test]
    fn scan_keeps_valid_methods_and_rejects_the_rest() {
        let listener: Arc<dyn Listener> = Arc::new(Mixed);
        let report = scan(&listener);

        let accepted: Vec<_> = report.subscribers.iter().map(|s| s.method.as_str()).collect();
        assert_eq!(accepted, vec!["good", "typed_generic"]);
        assert_eq!(report.rejected.len(), 5);
        assert_eq!(report.listener, "Mixed");
    }

    #[test]
    fn scan_reports_the_reason_for_each_rejection() {
        let listener: Arc<dyn Listener> = Arc::new(Mixed);
        let report = scan(&listener);

        assert!(matches!(
            &report.rejected[0],
            DefinitionError::SubscriberArity { count: 0, .. }
        ));
        assert!(matches!(
            &report.rejected[1],
            DefinitionError::SubscriberArity { count: 2, .. }
        ));
        assert!(matches!(&report.rejected[2], DefinitionError::NotAnEvent { .. }));
        assert!(matches!(
            &report.rejected[3],
            DefinitionError::RawGenericSubscriber { .. }
        ));
        assert!(matches!(&report.rejected[4], DefinitionError::MissingHandler { .. }));
    }

    #[test]
    fn scanned_subscribers_keep_order_and_cancel_policy() {
        let listener: Arc<dyn Listener> = Arc::new(Mixed);
        let report = scan(&listener);
        let typed = &report.subscribers[1];

        assert_eq!(typed.order, PostOrder::EARLY);
        assert!(typed.ignore_cancelled);
        assert_eq!(typed.target.generic(), Some(TypeToken::of::<f64>()));

        let good = &report.subscribers[0];
        assert_eq!(good.order, PostOrder::NORMAL);
        assert!(!good.ignore_cancelled);
    }

    #[test]
    fn type_argument_on_plain_contract_is_rejected() {
        let method = SubscriberMethod::on_generic::<Ping, u8, _>("odd", |_| Ok(()));
        assert!(matches!(
            validate_method("Solo", method),
            Err(DefinitionError::UnexpectedTypeArgument { .. })
        ));
    }
}
