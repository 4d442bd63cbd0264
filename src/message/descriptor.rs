//! Stable wire identity for payload types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Error returned when a string is not a valid `namespace:name` descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("descriptor `{0}` has no `:` separating namespace and name")]
    MissingSeparator(String),
    #[error("descriptor `{0}` has an empty name")]
    EmptyName(String),
}

/// Identifies a payload type on the wire as `{namespace}:{name}`.
///
/// The descriptor is what crosses process boundaries, not the Rust type path,
/// so two processes can agree on a message even when their local types live in
/// different crates or carry different names:
///
/// ```
/// use nybus::MessageDescriptor;
///
/// let descriptor: MessageDescriptor = "MyApp:OrderPlaced".parse().unwrap();
/// assert_eq!(descriptor.namespace(), "MyApp");
/// assert_eq!(descriptor.name(), "OrderPlaced");
/// assert_eq!(descriptor.to_string(), "MyApp:OrderPlaced");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageDescriptor {
    namespace: String,
    name: String,
}

impl MessageDescriptor {
    /// Create a descriptor from its parts. `name` must not contain `:`.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Derive a descriptor from the Rust type path of `T`.
    ///
    /// `my_app::orders::OrderPlaced<u32>` becomes `my_app.orders:OrderPlaced`.
    pub fn of<T: ?Sized>() -> Self {
        Self::from_type_name(std::any::type_name::<T>())
    }

    pub(crate) fn from_type_name(type_name: &str) -> Self {
        let path = match type_name.find('<') {
            Some(index) => &type_name[..index],
            None => type_name,
        };
        match path.rsplit_once("::") {
            Some((module, name)) => Self::new(module.replace("::", "."), name),
            None => Self::new("", path),
        }
    }

    /// Parse a `namespace:name` string.
    pub fn parse(value: &str) -> Result<Self, DescriptorError> {
        let (namespace, name) = value
            .rsplit_once(':')
            .ok_or_else(|| DescriptorError::MissingSeparator(value.to_string()))?;
        if name.is_empty() {
            return Err(DescriptorError::EmptyName(value.to_string()));
        }
        Ok(Self::new(namespace, name))
    }

    /// Parse a `namespace:name` string, discarding the error.
    pub fn try_parse(value: &str) -> Option<Self> {
        Self::parse(value).ok()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for MessageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

impl FromStr for MessageDescriptor {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for MessageDescriptor {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MessageDescriptor {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::parse(&value).map_err(serde::de::Error::custom)
    }
}
