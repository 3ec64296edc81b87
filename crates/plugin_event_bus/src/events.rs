//! Event contract model.
//!
//! A contract describes the *shape* of an event: a set of getters, each bound
//! to a constructor slot index, plus two optional capabilities:
//!
//! - **cancellable**: instances carry a shared cancellation cell that
//!   subscribers may flip during a dispatch pass
//! - **generic**: instances carry one reified [`TypeToken`], and subscribers
//!   can ask for a single reification
//!
//! Contracts have no implementation. The [`EventSynthesizer`](crate::EventSynthesizer)
//! turns a contract (plus an optional type argument) into a concrete
//! [`EventClass`](crate::EventClass).
//!
//! Contracts are normally declared with the [`event_contract!`](crate::event_contract)
//! macro, which builds the schema once and generates typed getters. Hosts that
//! need to define contracts at runtime can use [`ContractSchema::builder`].

use crate::types::TypeToken;
use crate::DefinitionError;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Constructor slot reserved for the cancellation cell.
pub const CANCEL_FLAG_SLOT: i32 = -2;

/// Constructor slot reserved for the generic type token.
pub const GENERIC_TOKEN_SLOT: i32 = -1;

/// Well-known subscriber orders. Lower values run first.
pub struct PostOrder;

impl PostOrder {
    pub const FIRST: i32 = -100;
    pub const EARLY: i32 = -50;
    pub const NORMAL: i32 = 0;
    pub const LATE: i32 = 50;
    pub const LAST: i32 = 100;
}

/// One abstract getter on a contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetterSpec {
    name: String,
    slot: i32,
    value_type: TypeToken,
}

impl GetterSpec {
    pub fn new(name: impl Into<String>, slot: i32, value_type: TypeToken) -> Self {
        Self {
            name: name.into(),
            slot,
            value_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slot(&self) -> i32 {
        self.slot
    }

    pub fn value_type(&self) -> TypeToken {
        self.value_type
    }
}

/// Declarative description of an event contract.
#[derive(Debug, PartialEq)]
pub struct ContractSchema {
    name: String,
    cancellable: bool,
    generic: bool,
    parents: Vec<Arc<ContractSchema>>,
    getters: Vec<GetterSpec>,
}

impl ContractSchema {
    /// Starts a new contract definition. `name` is the contract identity and
    /// should be fully qualified.
    pub fn builder(name: impl Into<String>) -> ContractBuilder {
        ContractBuilder {
            schema: ContractSchema {
                name: name.into(),
                cancellable: false,
                generic: false,
                parents: Vec::new(),
                getters: Vec::new(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Getters declared directly on this contract.
    pub fn getters(&self) -> &[GetterSpec] {
        &self.getters
    }

    pub fn parents(&self) -> &[Arc<ContractSchema>] {
        &self.parents
    }

    /// True if this contract or any parent is cancellable.
    pub fn is_cancellable(&self) -> bool {
        self.cancellable || self.parents.iter().any(|p| p.is_cancellable())
    }

    /// True if this contract or any parent is generic.
    pub fn is_generic(&self) -> bool {
        self.generic || self.parents.iter().any(|p| p.is_generic())
    }

    /// True if an instance of `self` can be observed as `other`.
    pub fn is_subtype_of(&self, other: &ContractSchema) -> bool {
        self.name == other.name || self.parents.iter().any(|p| p.is_subtype_of(other))
    }

    /// Every getter visible on this contract, inherited ones first.
    ///
    /// A getter reachable through several parents is listed once; the same
    /// name with a different type or slot is a definition error.
    pub fn resolved_getters(&self) -> Result<Vec<GetterSpec>, DefinitionError> {
        let mut resolved: Vec<GetterSpec> = Vec::new();
        for parent in &self.parents {
            for getter in parent.resolved_getters()? {
                self.merge_getter(&mut resolved, getter)?;
            }
        }
        for getter in &self.getters {
            self.merge_getter(&mut resolved, getter.clone())?;
        }
        Ok(resolved)
    }

    fn merge_getter(
        &self,
        resolved: &mut Vec<GetterSpec>,
        getter: GetterSpec,
    ) -> Result<(), DefinitionError> {
        match resolved.iter().find(|g| g.name == getter.name) {
            Some(existing) if *existing == getter => Ok(()),
            Some(_) => Err(DefinitionError::ConflictingGetter {
                contract: self.name.clone(),
                getter: getter.name,
            }),
            None => {
                resolved.push(getter);
                Ok(())
            }
        }
    }
}

impl fmt::Display for ContractSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Builder returned by [`ContractSchema::builder`].
pub struct ContractBuilder {
    schema: ContractSchema,
}

impl ContractBuilder {
    pub fn cancellable(mut self) -> Self {
        self.schema.cancellable = true;
        self
    }

    pub fn generic(mut self) -> Self {
        self.schema.generic = true;
        self
    }

    /// Declares `parent` as a supertype of this contract.
    pub fn extends(mut self, parent: Arc<ContractSchema>) -> Self {
        self.schema.parents.push(parent);
        self
    }

    /// Declares a getter returning `T`, bound to constructor slot `slot`.
    pub fn getter<T: 'static>(mut self, name: impl Into<String>, slot: i32) -> Self {
        self.schema
            .getters
            .push(GetterSpec::new(name, slot, TypeToken::of::<T>()));
        self
    }

    /// Finishes the definition. Slot layout is validated on synthesis, not here.
    pub fn build(self) -> Arc<ContractSchema> {
        Arc::new(self.schema)
    }
}

/// A statically declared contract. See [`event_contract!`](crate::event_contract).
pub trait EventContract: 'static {
    fn schema() -> Arc<ContractSchema>;

    /// Descriptor for a non-generic use of this contract.
    fn descriptor() -> EventDescriptor {
        EventDescriptor::new(Self::schema())
    }

    /// Descriptor for this contract reified over `T`.
    fn descriptor_of<T: ?Sized + 'static>() -> EventDescriptor {
        EventDescriptor::with_type(Self::schema(), TypeToken::of::<T>())
    }

    fn target() -> EventTarget {
        EventTarget::new(Self::schema())
    }

    fn target_of<T: ?Sized + 'static>() -> EventTarget {
        EventTarget::with_type(Self::schema(), TypeToken::of::<T>())
    }
}

/// Identity of one synthesizable event shape: a contract plus an optional
/// type argument. This is the synthesis cache key.
#[derive(Debug, Clone)]
pub struct EventDescriptor {
    contract: Arc<ContractSchema>,
    generic: Option<TypeToken>,
}

impl EventDescriptor {
    pub fn new(contract: Arc<ContractSchema>) -> Self {
        Self {
            contract,
            generic: None,
        }
    }

    pub fn with_type(contract: Arc<ContractSchema>, generic: TypeToken) -> Self {
        Self {
            contract,
            generic: Some(generic),
        }
    }

    pub fn contract(&self) -> &Arc<ContractSchema> {
        &self.contract
    }

    pub fn generic(&self) -> Option<TypeToken> {
        self.generic
    }
}

impl PartialEq for EventDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.contract.name == other.contract.name && self.generic == other.generic
    }
}

impl Eq for EventDescriptor {}

impl Hash for EventDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.contract.name.hash(state);
        self.generic.hash(state);
    }
}

impl fmt::Display for EventDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.generic {
            Some(token) => write!(f, "{}<{}>", self.contract.name, token),
            None => f.write_str(&self.contract.name),
        }
    }
}

/// What a subscriber wants to observe.
#[derive(Debug, Clone)]
pub struct EventTarget {
    contract: Arc<ContractSchema>,
    generic: Option<TypeToken>,
}

impl EventTarget {
    pub fn new(contract: Arc<ContractSchema>) -> Self {
        Self {
            contract,
            generic: None,
        }
    }

    pub fn with_type(contract: Arc<ContractSchema>, generic: TypeToken) -> Self {
        Self {
            contract,
            generic: Some(generic),
        }
    }

    pub fn contract(&self) -> &Arc<ContractSchema> {
        &self.contract
    }

    pub fn generic(&self) -> Option<TypeToken> {
        self.generic
    }

    /// True if events of `descriptor` should be delivered to this target.
    ///
    /// The event contract must be assignable to the target contract. When the
    /// target contract is generic, the type arguments must be equal as well.
    pub fn accepts(&self, descriptor: &EventDescriptor) -> bool {
        if !descriptor.contract.is_subtype_of(&self.contract) {
            return false;
        }
        if self.contract.is_generic() {
            return self.generic.is_some() && self.generic == descriptor.generic;
        }
        true
    }
}

impl fmt::Display for EventTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.generic {
            Some(token) => write!(f, "{}<{}>", self.contract.name, token),
            None => f.write_str(&self.contract.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Arc<ContractSchema> {
        ContractSchema::builder("test::Base")
            .getter::<String>("source", 0)
            .build()
    }

    #[test]
    fn capabilities_are_inherited() {
        let parent = ContractSchema::builder("test::Parent").cancellable().build();
        let child = ContractSchema::builder("test::Child").extends(parent).build();

        assert!(child.is_cancellable());
        assert!(!child.is_generic());
    }

    #[test]
    fn subtype_checks_follow_parents() {
        let base = base();
        let child = ContractSchema::builder("test::Child")
            .extends(base.clone())
            .build();

        assert!(child.is_subtype_of(&base));
        assert!(child.is_subtype_of(&child));
        assert!(!base.is_subtype_of(&child));
    }

    #[test]
    fn resolved_getters_put_inherited_first() {
        let child = ContractSchema::builder("test::Child")
            .extends(base())
            .getter::<u32>("amount", 1)
            .build();

        let names: Vec<_> = child
            .resolved_getters()
            .unwrap()
            .iter()
            .map(|g| g.name().to_string())
            .collect();
        assert_eq!(names, vec!["source", "amount"]);
    }

    #[test]
    fn conflicting_inherited_getter_is_rejected() {
        let child = ContractSchema::builder("test::Child")
            .extends(base())
            .getter::<u32>("source", 0)
            .build();

        assert!(matches!(
            child.resolved_getters(),
            Err(DefinitionError::ConflictingGetter { .. })
        ));
    }

    #[test]
    fn descriptors_differ_by_type_argument() {
        let generic = ContractSchema::builder("test::Generic").generic().build();
        let strings = EventDescriptor::with_type(generic.clone(), TypeToken::of::<String>());
        let ints = EventDescriptor::with_type(generic.clone(), TypeToken::of::<i32>());

        assert_ne!(strings, ints);
        assert_eq!(strings, EventDescriptor::with_type(generic, TypeToken::of::<String>()));
        assert_eq!(strings.to_string(), "test::Generic<String>");
    }

    #[test]
    fn generic_targets_require_matching_tokens() {
        let generic = ContractSchema::builder("test::Generic").generic().build();
        let event = EventDescriptor::with_type(generic.clone(), TypeToken::of::<i32>());

        assert!(EventTarget::with_type(generic.clone(), TypeToken::of::<i32>()).accepts(&event));
        assert!(!EventTarget::with_type(generic.clone(), TypeToken::of::<String>()).accepts(&event));
        assert!(!EventTarget::new(generic).accepts(&event));
    }

    #[test]
    fn non_generic_parent_sees_every_reification() {
        let root = ContractSchema::builder("test::Root").build();
        let generic = ContractSchema::builder("test::Generic")
            .generic()
            .extends(root.clone())
            .build();
        let event = EventDescriptor::with_type(generic, TypeToken::of::<String>());

        assert!(EventTarget::new(root).accepts(&event));
    }
}
