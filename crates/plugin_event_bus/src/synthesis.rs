//! Event class synthesis.
//!
//! The synthesizer turns an [`EventDescriptor`] into an [`EventClass`]: a
//! validated constructor layout plus getter bindings. Classes are built at most
//! once per descriptor and live as long as the synthesizer. Instances are
//! produced from ordered [`FieldValue`]s.
//!
//! Constructor layout of a class:
//!
//! 1. cancel flag ([`CancelCell`]), present iff the contract is cancellable
//! 2. generic token ([`TypeToken`]), present iff the contract is generic
//! 3. user getters, ascending by slot index

use crate::events::{EventDescriptor, CANCEL_FLAG_SLOT, GENERIC_TOKEN_SLOT};
use crate::types::TypeToken;
use crate::{ConstructionError, DefinitionError, EventError};
use dashmap::DashMap;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

// ============================================================================
// Constructor values
// ============================================================================

type DebugFn = fn(&(dyn Any + Send + Sync), &mut fmt::Formatter<'_>) -> fmt::Result;

fn debug_value<T: Any + fmt::Debug>(
    value: &(dyn Any + Send + Sync),
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    match value.downcast_ref::<T>() {
        Some(value) => fmt::Debug::fmt(value, f),
        None => f.write_str("<?>"),
    }
}

/// A type-erased constructor argument.
pub struct FieldValue {
    value: Box<dyn Any + Send + Sync>,
    value_type: TypeToken,
    debug: DebugFn,
}

impl FieldValue {
    pub fn new<T: Any + Send + Sync + fmt::Debug>(value: T) -> Self {
        Self {
            value: Box::new(value),
            value_type: TypeToken::of::<T>(),
            debug: debug_value::<T>,
        }
    }

    pub fn value_type(&self) -> TypeToken {
        self.value_type
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl fmt::Debug for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (self.debug)(&*self.value, f)
    }
}

/// Shared cancellation state of one cancellable event instance.
#[derive(Debug, Clone, Default)]
pub struct CancelCell(Arc<AtomicBool>);

impl CancelCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set_cancelled(&self, cancelled: bool) {
        self.0.store(cancelled, Ordering::Release);
    }
}

// ============================================================================
// Generated classes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotKind {
    CancelFlag,
    GenericToken,
    Field(String),
}

/// One constructor argument position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    index: i32,
    kind: SlotKind,
    value_type: TypeToken,
}

impl Slot {
    pub fn index(&self) -> i32 {
        self.index
    }

    pub fn kind(&self) -> &SlotKind {
        &self.kind
    }

    pub fn value_type(&self) -> TypeToken {
        self.value_type
    }

    fn label(&self) -> String {
        match &self.kind {
            SlotKind::CancelFlag => "cancel flag".to_string(),
            SlotKind::GenericToken => "generic token".to_string(),
            SlotKind::Field(getter) => format!("'{}'", getter),
        }
    }
}

/// The concrete implementation of one event descriptor.
#[derive(Debug)]
pub struct EventClass {
    name: String,
    descriptor: EventDescriptor,
    slots: Vec<Slot>,
    getters: HashMap<String, usize>,
}

impl EventClass {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &EventDescriptor {
        &self.descriptor
    }

    /// The full constructor parameter list, synthetic slots included.
    pub fn constructor_slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn is_cancellable(&self) -> bool {
        self.slots.iter().any(|s| s.kind == SlotKind::CancelFlag)
    }

    pub fn generic_type(&self) -> Option<TypeToken> {
        self.descriptor.generic()
    }

    /// Number of user-supplied fields.
    pub fn field_count(&self) -> usize {
        self.getters.len()
    }

    /// Calls the constructor with the full slot list, including the cancel
    /// cell and generic token when the class declares them.
    pub fn construct(self: &Arc<Self>, args: Vec<FieldValue>) -> Result<EventInstance, EventError> {
        if args.len() != self.slots.len() {
            return Err(self.construction_error(ConstructionError::ArgumentCount {
                expected: self.slots.len(),
                given: args.len(),
            }));
        }

        let mut cancel = None;
        let mut fields = Vec::with_capacity(self.getters.len());
        for (position, (slot, arg)) in self.slots.iter().zip(args).enumerate() {
            if arg.value_type() != slot.value_type {
                return Err(self.construction_error(ConstructionError::ArgumentType {
                    position,
                    slot: slot.label(),
                    expected: slot.value_type.name(),
                    actual: arg.value_type().name(),
                }));
            }

            match slot.kind {
                SlotKind::CancelFlag => cancel = arg.downcast_ref::<CancelCell>().cloned(),
                SlotKind::GenericToken => {
                    let given = arg.downcast_ref::<TypeToken>().copied();
                    if given != self.descriptor.generic() {
                        return Err(self.construction_error(ConstructionError::TokenMismatch {
                            expected: self.descriptor.generic().map_or("<none>", |t| t.name()),
                            actual: given.map_or("<none>", |t| t.name()),
                        }));
                    }
                }
                SlotKind::Field(_) => fields.push(arg),
            }
        }

        Ok(EventInstance {
            class: Arc::clone(self),
            cancel,
            fields,
        })
    }

    /// Builds an instance from user fields only; the cancel cell starts out
    /// not cancelled and the generic token comes from the descriptor.
    pub fn instantiate(self: &Arc<Self>, values: Vec<FieldValue>) -> Result<EventInstance, EventError> {
        if values.len() != self.field_count() {
            return Err(self.construction_error(ConstructionError::ArgumentCount {
                expected: self.field_count(),
                given: values.len(),
            }));
        }

        let mut args = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            match slot.kind {
                SlotKind::CancelFlag => args.push(FieldValue::new(CancelCell::new())),
                SlotKind::GenericToken => {
                    if let Some(token) = self.descriptor.generic() {
                        args.push(FieldValue::new(token));
                    }
                }
                SlotKind::Field(_) => break,
            }
        }
        args.extend(values);

        self.construct(args)
    }

    fn construction_error(&self, source: ConstructionError) -> EventError {
        EventError::Construction {
            contract: self.name.clone(),
            source,
        }
    }
}

/// Validates `descriptor` and derives its class layout.
fn synthesize(descriptor: &EventDescriptor) -> Result<EventClass, DefinitionError> {
    let contract = descriptor.contract();
    let contract_name = contract.name().to_string();

    match (contract.is_generic(), descriptor.generic()) {
        (true, None) => {
            return Err(DefinitionError::MissingTypeArgument {
                contract: contract_name,
            })
        }
        (false, Some(token)) => {
            return Err(DefinitionError::UnexpectedTypeArgument {
                contract: contract_name,
                type_name: token.name(),
            })
        }
        _ => {}
    }

    let mut getters = contract.resolved_getters()?;
    if let Some(reserved) = getters.iter().find(|g| g.slot() < 0) {
        return Err(DefinitionError::ReservedSlot {
            contract: contract_name,
            getter: reserved.name().to_string(),
            slot: reserved.slot(),
        });
    }

    getters.sort_by_key(|g| g.slot());
    if let Some(pair) = getters.windows(2).find(|pair| pair[0].slot() == pair[1].slot()) {
        return Err(DefinitionError::DuplicateSlot {
            contract: contract_name,
            first: pair[0].name().to_string(),
            second: pair[1].name().to_string(),
            slot: pair[0].slot(),
        });
    }
    for (expected, getter) in getters.iter().enumerate() {
        if getter.slot() as usize != expected {
            return Err(DefinitionError::MissingSlot {
                contract: contract_name,
                slot: expected,
                declared: getters.len(),
            });
        }
    }

    let mut slots = Vec::with_capacity(getters.len() + 2);
    if contract.is_cancellable() {
        slots.push(Slot {
            index: CANCEL_FLAG_SLOT,
            kind: SlotKind::CancelFlag,
            value_type: TypeToken::of::<CancelCell>(),
        });
    }
    if contract.is_generic() {
        slots.push(Slot {
            index: GENERIC_TOKEN_SLOT,
            kind: SlotKind::GenericToken,
            value_type: TypeToken::of::<TypeToken>(),
        });
    }

    let mut getter_index = HashMap::with_capacity(getters.len());
    for (position, getter) in getters.into_iter().enumerate() {
        getter_index.insert(getter.name().to_string(), position);
        slots.push(Slot {
            index: getter.slot(),
            kind: SlotKind::Field(getter.name().to_string()),
            value_type: getter.value_type(),
        });
    }

    Ok(EventClass {
        name: descriptor.to_string(),
        descriptor: descriptor.clone(),
        slots,
        getters: getter_index,
    })
}

// ============================================================================
// Synthesizer
// ============================================================================

/// Memoizing factory for [`EventClass`]es.
///
/// Owned explicitly by the host (usually one per process, shared through an
/// `Arc`). Each descriptor is synthesized at most once, even when several
/// threads ask for it at the same time; a failed synthesis is remembered and
/// returned on every later request.
#[derive(Default)]
pub struct EventSynthesizer {
    classes: DashMap<EventDescriptor, Result<Arc<EventClass>, DefinitionError>>,
    contracts: DashMap<String, Arc<crate::ContractSchema>>,
    synthesized: AtomicUsize,
}

impl EventSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the class for `descriptor`, synthesizing it on first use.
    ///
    /// Equal descriptors always yield the same `Arc`.
    pub fn class_for(&self, descriptor: &EventDescriptor) -> Result<Arc<EventClass>, EventError> {
        self.check_contract(descriptor)?;

        if let Some(entry) = self.classes.get(descriptor) {
            return entry.value().clone().map_err(EventError::from);
        }

        let entry = self.classes.entry(descriptor.clone()).or_insert_with(|| {
            self.synthesized.fetch_add(1, Ordering::Relaxed);
            match synthesize(descriptor) {
                Ok(class) => {
                    debug!(
                        "🧬 Synthesized event class {} ({} constructor slots)",
                        class.name(),
                        class.constructor_slots().len()
                    );
                    Ok(Arc::new(class))
                }
                Err(e) => {
                    error!("❌ Failed to synthesize event class {}: {}", descriptor, e);
                    Err(e)
                }
            }
        });

        entry.value().clone().map_err(EventError::from)
    }

    /// Creates an event from user field values, in slot order.
    pub fn instantiate(
        &self,
        descriptor: &EventDescriptor,
        values: Vec<FieldValue>,
    ) -> Result<EventInstance, EventError> {
        self.class_for(descriptor)?.instantiate(values)
    }

    /// Number of synthesis attempts made so far, failed ones included.
    pub fn synthesis_count(&self) -> usize {
        self.synthesized.load(Ordering::Relaxed)
    }

    /// Number of cached class entries, failed ones included.
    pub fn cached_classes(&self) -> usize {
        self.classes.len()
    }

    /// Rejects a descriptor whose contract name was first seen with a
    /// different definition.
    fn check_contract(&self, descriptor: &EventDescriptor) -> Result<(), DefinitionError> {
        let contract = descriptor.contract();
        let known = self
            .contracts
            .entry(contract.name().to_string())
            .or_insert_with(|| Arc::clone(contract))
            .value()
            .clone();

        if Arc::ptr_eq(&known, contract) || *known == **contract {
            Ok(())
        } else {
            Err(DefinitionError::ConflictingContract {
                contract: contract.name().to_string(),
            })
        }
    }
}

// ============================================================================
// Instances
// ============================================================================

/// One event, produced by a class constructor and consumed by a post.
pub struct EventInstance {
    class: Arc<EventClass>,
    cancel: Option<CancelCell>,
    fields: Vec<FieldValue>,
}

impl EventInstance {
    pub fn class(&self) -> &Arc<EventClass> {
        &self.class
    }

    pub fn descriptor(&self) -> &EventDescriptor {
        &self.class.descriptor
    }

    pub fn contract_name(&self) -> &str {
        self.class.descriptor.contract().name()
    }

    /// The reified type argument this event carries, if its contract is generic.
    pub fn generic_type(&self) -> Option<TypeToken> {
        self.class.generic_type()
    }

    pub fn value(&self, getter: &str) -> Option<&FieldValue> {
        self.class.getters.get(getter).map(|&i| &self.fields[i])
    }

    /// Typed getter access.
    pub fn get<T: 'static>(&self, getter: &str) -> Result<&T, EventError> {
        let value = self.value(getter).ok_or_else(|| EventError::UnknownGetter {
            contract: self.class.name.clone(),
            getter: getter.to_string(),
        })?;

        value.downcast_ref::<T>().ok_or_else(|| EventError::FieldType {
            contract: self.class.name.clone(),
            getter: getter.to_string(),
            expected: std::any::type_name::<T>(),
            actual: value.value_type().name(),
        })
    }

    pub fn is_cancellable(&self) -> bool {
        self.cancel.is_some()
    }

    /// Always false for events that are not cancellable.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelCell::is_cancelled)
    }

    pub fn set_cancelled(&self, cancelled: bool) -> Result<(), EventError> {
        match &self.cancel {
            Some(cell) => {
                cell.set_cancelled(cancelled);
                Ok(())
            }
            None => Err(EventError::NotCancellable(self.class.name.clone())),
        }
    }

    pub fn cancellation(&self) -> Option<&CancelCell> {
        self.cancel.as_ref()
    }
}

impl fmt::Debug for EventInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct(&self.class.name);
        if let Some(cell) = &self.cancel {
            out.field("cancelled", &cell.is_cancelled());
        }
        for slot in &self.class.slots {
            if let SlotKind::Field(getter) = &slot.kind {
                if let Some(value) = self.value(getter) {
                    out.field(getter, value);
                }
            }
        }
        out.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{field_values, ContractSchema};

    fn chat() -> Arc<crate::ContractSchema> {
        ContractSchema::builder("test::Chat")
            .cancellable()
            .getter::<String>("sender", 1)
            .getter::<String>("message", 0)
            .build()
    }

    fn balance() -> Arc<crate::ContractSchema> {
        ContractSchema::builder("test::Balance")
            .generic()
            .getter::<String>("account", 0)
            .build()
    }

    #[test]
    fn equal_descriptors_share_one_class() {
        let synthesizer = EventSynthesizer::new();
        let descriptor = EventDescriptor::new(chat());

        let first = synthesizer.class_for(&descriptor).unwrap();
        let second = synthesizer.class_for(&EventDescriptor::new(chat())).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(synthesizer.synthesis_count(), 1);
    }

    #[test]
    fn reifications_get_distinct_classes() {
        let synthesizer = EventSynthesizer::new();
        let contract = balance();

        let strings = synthesizer
            .class_for(&EventDescriptor::with_type(contract.clone(), TypeToken::of::<String>()))
            .unwrap();
        let ints = synthesizer
            .class_for(&EventDescriptor::with_type(contract, TypeToken::of::<i32>()))
            .unwrap();

        assert!(!Arc::ptr_eq(&strings, &ints));
        assert_eq!(strings.name(), "test::Balance<String>");
    }

    #[test]
    fn slot_layout_puts_synthetic_slots_first() {
        let synthesizer = EventSynthesizer::new();
        let contract = ContractSchema::builder("test::Both")
            .cancellable()
            .generic()
            .getter::<u64>("amount", 1)
            .getter::<String>("account", 0)
            .build();
        let class = synthesizer
            .class_for(&EventDescriptor::with_type(contract, TypeToken::of::<f64>()))
            .unwrap();

        let indices: Vec<i32> = class.constructor_slots().iter().map(Slot::index).collect();
        assert_eq!(indices, vec![CANCEL_FLAG_SLOT, GENERIC_TOKEN_SLOT, 0, 1]);
        assert_eq!(
            class.constructor_slots()[2].kind(),
            &SlotKind::Field("account".to_string())
        );
    }

    #[test]
    fn failed_synthesis_is_cached_and_not_retried() {
        let synthesizer = EventSynthesizer::new();
        let broken = ContractSchema::builder("test::Broken")
            .getter::<String>("a", 0)
            .getter::<String>("b", 0)
            .build();
        let descriptor = EventDescriptor::new(broken);

        for _ in 0..3 {
            let err = synthesizer.class_for(&descriptor).unwrap_err();
            assert!(matches!(
                err,
                EventError::Definition(DefinitionError::DuplicateSlot { slot: 0, .. })
            ));
        }
        assert_eq!(synthesizer.synthesis_count(), 1);
    }

    #[test]
    fn gaps_and_reserved_slots_are_rejected() {
        let synthesizer = EventSynthesizer::new();
        let gap = ContractSchema::builder("test::Gap")
            .getter::<String>("a", 0)
            .getter::<String>("b", 2)
            .build();
        let reserved = ContractSchema::builder("test::Reserved")
            .getter::<String>("a", -1)
            .build();

        assert!(matches!(
            synthesizer.class_for(&EventDescriptor::new(gap)),
            Err(EventError::Definition(DefinitionError::MissingSlot { slot: 1, declared: 2, .. }))
        ));
        assert!(matches!(
            synthesizer.class_for(&EventDescriptor::new(reserved)),
            Err(EventError::Definition(DefinitionError::ReservedSlot { slot: -1, .. }))
        ));
    }

    #[test]
    fn type_arguments_must_match_capability() {
        let synthesizer = EventSynthesizer::new();

        assert!(matches!(
            synthesizer.class_for(&EventDescriptor::new(balance())),
            Err(EventError::Definition(DefinitionError::MissingTypeArgument { .. }))
        ));
        assert!(matches!(
            synthesizer.class_for(&EventDescriptor::with_type(chat(), TypeToken::of::<i32>())),
            Err(EventError::Definition(DefinitionError::UnexpectedTypeArgument { .. }))
        ));
    }

    #[test]
    fn redefining_a_contract_name_is_rejected() {
        let synthesizer = EventSynthesizer::new();
        synthesizer.class_for(&EventDescriptor::new(chat())).unwrap();

        let impostor = ContractSchema::builder("test::Chat")
            .getter::<u32>("message", 0)
            .build();
        assert!(matches!(
            synthesizer.class_for(&EventDescriptor::new(impostor)),
            Err(EventError::Definition(DefinitionError::ConflictingContract { .. }))
        ));
    }

    #[test]
    fn instantiate_injects_cancel_cell_and_binds_getters() {
        let synthesizer = EventSynthesizer::new();
        let event = synthesizer
            .instantiate(
                &EventDescriptor::new(chat()),
                field_values!["hello".to_string(), "steve".to_string()],
            )
            .unwrap();

        assert_eq!(event.get::<String>("message").unwrap(), "hello");
        assert_eq!(event.get::<String>("sender").unwrap(), "steve");
        assert!(event.is_cancellable());
        assert!(!event.is_cancelled());

        event.set_cancelled(true).unwrap();
        assert!(event.is_cancelled());
    }

    #[test]
    fn instantiate_injects_generic_token() {
        let synthesizer = EventSynthesizer::new();
        let event = synthesizer
            .instantiate(
                &EventDescriptor::with_type(balance(), TypeToken::of::<i64>()),
                field_values!["alice".to_string()],
            )
            .unwrap();

        assert_eq!(event.generic_type(), Some(TypeToken::of::<i64>()));
        assert!(!event.is_cancellable());
        assert!(matches!(
            event.set_cancelled(true),
            Err(EventError::NotCancellable(_))
        ));
    }

    #[test]
    fn argument_count_mismatch_names_the_contract() {
        let synthesizer = EventSynthesizer::new();
        let err = synthesizer
            .instantiate(&EventDescriptor::new(chat()), field_values!["only one".to_string()])
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Failed to construct event test::Chat: expected 2 arguments, got 1"
        );
    }

    #[test]
    fn argument_type_mismatch_is_reported() {
        let synthesizer = EventSynthesizer::new();
        let err = synthesizer
            .instantiate(&EventDescriptor::new(chat()), field_values![42u32, "steve".to_string()])
            .unwrap_err();

        assert!(matches!(
            err,
            EventError::Construction {
                source: ConstructionError::ArgumentType { position: 1, .. },
                ..
            }
        ));
    }

    #[test]
    fn construct_checks_the_generic_token() {
        let synthesizer = EventSynthesizer::new();
        let class = synthesizer
            .class_for(&EventDescriptor::with_type(balance(), TypeToken::of::<i64>()))
            .unwrap();

        let err = class
            .construct(field_values![TypeToken::of::<String>(), "bob".to_string()])
            .unwrap_err();
        assert!(matches!(
            err,
            EventError::Construction {
                source: ConstructionError::TokenMismatch { .. },
                ..
            }
        ));

        let event = class
            .construct(field_values![TypeToken::of::<i64>(), "bob".to_string()])
            .unwrap();
        assert_eq!(event.get::<String>("account").unwrap(), "bob");
    }

    #[test]
    fn getter_errors_are_descriptive() {
        let synthesizer = EventSynthesizer::new();
        let event = synthesizer
            .instantiate(
                &EventDescriptor::new(chat()),
                field_values!["hi".to_string(), "steve".to_string()],
            )
            .unwrap();

        assert!(matches!(
            event.get::<String>("missing"),
            Err(EventError::UnknownGetter { .. })
        ));
        assert!(matches!(
            event.get::<u32>("message"),
            Err(EventError::FieldType { .. })
        ));
    }

    #[test]
    fn debug_output_lists_fields_in_slot_order() {
        let synthesizer = EventSynthesizer::new();
        let event = synthesizer
            .instantiate(
                &EventDescriptor::new(chat()),
                field_values!["hi".to_string(), "steve".to_string()],
            )
            .unwrap();

        assert_eq!(
            format!("{:?}", event),
            r#"test::Chat { cancelled: false, message: "hi", sender: "steve" }"#
        );
    }
}
