//! Error types for the event bus.
//!
//! Errors fall into four groups. Definition errors come from malformed
//! contracts or subscriber declarations and only affect the offending contract
//! or method. Construction errors are returned from a single instantiation.
//! Dispatch and lifecycle failures are logged and recovered inside the bus and
//! never reach the poster.

/// A malformed event contract or subscriber declaration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    #[error("contract {contract}: getter '{getter}' uses reserved slot index {slot}")]
    ReservedSlot {
        contract: String,
        getter: String,
        slot: i32,
    },
    #[error("contract {contract}: getters '{first}' and '{second}' both use slot index {slot}")]
    DuplicateSlot {
        contract: String,
        first: String,
        second: String,
        slot: i32,
    },
    #[error("contract {contract}: slot index {slot} is missing ({declared} getters declared)")]
    MissingSlot {
        contract: String,
        slot: usize,
        declared: usize,
    },
    #[error("contract {contract}: getter '{getter}' is declared more than once with different types or slots")]
    ConflictingGetter { contract: String, getter: String },
    #[error("contract {contract} was already synthesized from a different definition")]
    ConflictingContract { contract: String },
    #[error("contract {contract} is generic but no type argument was supplied")]
    MissingTypeArgument { contract: String },
    #[error("contract {contract} is not generic but was given type argument {type_name}")]
    UnexpectedTypeArgument {
        contract: String,
        type_name: &'static str,
    },
    #[error("subscriber {listener}::{method} must take exactly one parameter, found {count}")]
    SubscriberArity {
        listener: String,
        method: String,
        count: usize,
    },
    #[error("subscriber {listener}::{method} takes {type_name}, which is not an event contract")]
    NotAnEvent {
        listener: String,
        method: String,
        type_name: &'static str,
    },
    #[error("subscriber {listener}::{method} observes generic contract {contract} without a type argument")]
    RawGenericSubscriber {
        listener: String,
        method: String,
        contract: String,
    },
    #[error("subscriber {listener}::{method} has no handler bound")]
    MissingHandler { listener: String, method: String },
}

/// Why a constructor call was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConstructionError {
    #[error("expected {expected} arguments, got {given}")]
    ArgumentCount { expected: usize, given: usize },
    #[error("argument {position} ({slot}) expects {expected}, got {actual}")]
    ArgumentType {
        position: usize,
        slot: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("generic token argument {actual} does not match the class type argument {expected}")]
    TokenMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Event definition error: {0}")]
    Definition(#[from] DefinitionError),
    #[error("Failed to construct event {contract}: {source}")]
    Construction {
        contract: String,
        #[source]
        source: ConstructionError,
    },
    #[error("Event {contract} has no getter named '{getter}'")]
    UnknownGetter { contract: String, getter: String },
    #[error("Getter {contract}::{getter} holds {actual}, not {expected}")]
    FieldType {
        contract: String,
        getter: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("Event {0} is not cancellable")]
    NotCancellable(String),
    #[error("Plugin {0} has been torn down")]
    PluginTornDown(String),
    #[error("Listener {listener} is already registered for plugin {plugin}")]
    ListenerAlreadyRegistered { plugin: String, listener: String },
    #[error("Plugin {plugin} reached the limit of {limit} subscriptions")]
    SubscriptionLimit { plugin: String, limit: usize },
    #[error("Handler execution error: {0}")]
    HandlerExecution(String),
}

impl EventError {
    /// Shorthand for handler code reporting a failure.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::HandlerExecution(message.into())
    }
}
