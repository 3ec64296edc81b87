//! Declarative contract macros.

/// Declares an event contract.
///
/// Generates a marker type implementing [`EventContract`](crate::EventContract)
/// whose schema is built once, plus one typed accessor per getter.
///
/// Capabilities go in parentheses after the name (`cancellable`, `generic`),
/// parent contracts after a colon.
///
/// ```rust
/// use plugin_event_bus::{event_contract, field_values, EventContract, EventSynthesizer};
///
/// event_contract! {
///     /// Fired before money moves between accounts.
///     pub contract EconomyTransaction(cancellable) {
///         #[slot(0)] account: String,
///         #[slot(1)] amount: f64,
///     }
/// }
///
/// event_contract! {
///     pub contract BalanceChanged(generic): EconomyTransaction {}
/// }
///
/// let synthesizer = EventSynthesizer::new();
/// let event = synthesizer
///     .instantiate(
///         &EconomyTransaction::descriptor(),
///         field_values!["alice".to_string(), 12.5f64],
///     )
///     .unwrap();
///
/// assert_eq!(EconomyTransaction::amount(&event).unwrap(), &12.5);
/// assert!(event.is_cancellable());
/// assert!(BalanceChanged::schema().is_cancellable());
/// ```
#[macro_export]
macro_rules! event_contract {
    (
        $(#[$meta:meta])*
        $vis:vis contract $name:ident $(($($cap:ident),* $(,)?))? $(: $($parent:path),+)? {
            $(#[slot($slot:literal)] $getter:ident : $ty:ty),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        $vis struct $name;

        impl $crate::EventContract for $name {
            fn schema() -> ::std::sync::Arc<$crate::ContractSchema> {
                static SCHEMA: ::std::sync::OnceLock<::std::sync::Arc<$crate::ContractSchema>> =
                    ::std::sync::OnceLock::new();
                ::std::sync::Arc::clone(SCHEMA.get_or_init(|| {
                    $crate::ContractSchema::builder(concat!(module_path!(), "::", stringify!($name)))
                        $($(.$cap())*)?
                        $($(.extends(<$parent as $crate::EventContract>::schema()))+)?
                        $(.getter::<$ty>(stringify!($getter), $slot))*
                        .build()
                }))
            }
        }

        impl $name {
            $(
                #[allow(dead_code)]
                $vis fn $getter(
                    event: &$crate::EventInstance,
                ) -> ::std::result::Result<&$ty, $crate::EventError> {
                    event.get::<$ty>(stringify!($getter))
                }
            )*
        }
    };
}

/// Builds the `Vec<FieldValue>` passed to constructors, in slot order.
#[macro_export]
macro_rules! field_values {
    ($($value:expr),* $(,)?) => {
        vec![$($crate::FieldValue::new($value)),*]
    };
}
