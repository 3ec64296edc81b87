//! Core identifier types shared by every part of the event bus.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use uuid::Uuid;

/// Runtime handle for a reified type.
///
/// Generic event contracts carry one of these so subscribers can ask for a
/// specific reification (`Balance<f64>` vs `Balance<i64>`) instead of just the
/// erased contract. Equality and hashing only look at the [`TypeId`]; the name
/// is kept for diagnostics.
#[derive(Clone, Copy)]
pub struct TypeToken {
    id: TypeId,
    name: &'static str,
}

impl TypeToken {
    /// Creates the token for `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name, e.g. `alloc::string::String`.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Last path segment of the type name, keeping any generic arguments.
    ///
    /// ```rust
    /// use plugin_event_bus::TypeToken;
    ///
    /// assert_eq!(TypeToken::of::<String>().short_name(), "String");
    /// assert_eq!(TypeToken::of::<u64>().short_name(), "u64");
    /// ```
    pub fn short_name(&self) -> &'static str {
        let head = self.name.split('<').next().unwrap_or(self.name);
        match head.rfind("::") {
            Some(pos) => &self.name[pos + 2..],
            None => self.name,
        }
    }

    /// Returns true if this token describes `T`.
    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl PartialEq for TypeToken {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeToken {}

impl Hash for TypeToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeToken({})", self.name)
    }
}

impl fmt::Display for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Stable, human-readable plugin identifier (e.g. `"impactor-economy"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginId(Arc<str>);

impl PluginId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for PluginId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PluginId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(PluginId::from)
    }
}

impl From<&str> for PluginId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PluginId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

/// Partition key for subscriptions.
///
/// A key names one *instance* of a plugin: reloading a plugin produces a new
/// key with the same [`PluginId`], so a torn-down partition never comes back
/// to life.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PluginKey {
    id: PluginId,
    instance: Uuid,
}

impl PluginKey {
    /// Creates a key for a fresh plugin instance.
    pub fn new(id: impl Into<PluginId>) -> Self {
        Self {
            id: id.into(),
            instance: Uuid::new_v4(),
        }
    }

    pub fn id(&self) -> &PluginId {
        &self.id
    }

    pub fn instance(&self) -> Uuid {
        self.instance
    }
}

impl fmt::Display for PluginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let instance = self.instance.simple().to_string();
        write!(f, "{}#{}", self.id, &instance[..8])
    }
}

/// Lifecycle of a plugin partition inside the bus.
///
/// `Unregistered -> Active -> TornDown`; the last state is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginState {
    Unregistered,
    Active,
    TornDown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tokens_compare_by_type() {
        assert_eq!(TypeToken::of::<String>(), TypeToken::of::<String>());
        assert_ne!(TypeToken::of::<String>(), TypeToken::of::<i32>());
        assert!(TypeToken::of::<Vec<u8>>().is::<Vec<u8>>());
    }

    #[test]
    fn short_name_keeps_generic_arguments() {
        let token = TypeToken::of::<Vec<String>>();
        assert_eq!(token.short_name(), "Vec<alloc::string::String>");
    }

    #[test]
    fn plugin_keys_are_unique_per_instance() {
        let first = PluginKey::new("economy");
        let second = PluginKey::new("economy");

        assert_eq!(first.id(), second.id());
        assert_ne!(first, second);
        assert!(first.to_string().starts_with("economy#"));
    }

    #[test]
    fn plugin_ids_serialize_as_plain_strings() {
        let id = PluginId::new("impactor-economy");

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"impactor-economy\"");

        let back: PluginId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<PluginId>("42").is_err());
    }
}
