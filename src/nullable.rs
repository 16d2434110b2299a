//! A field that can be left out, sent as `null`, or sent with a value.
//!
//! Update endpoints treat a missing field ("leave as is") differently from
//! an explicit `null` ("clear it"). `Option<T>` cannot express both, so
//! request bodies use [`Nullable<T>`]:
//!
//! ```
//! use cirrus::Nullable;
//! use serde::Serialize;
//!
//! #[derive(Serialize)]
//! struct UpdateVolume {
//!     #[serde(skip_serializing_if = "Nullable::is_omitted")]
//!     label: Nullable<String>,
//!     #[serde(skip_serializing_if = "Nullable::is_omitted")]
//!     linode_id: Nullable<u64>,
//! }
//!
//! let detach = UpdateVolume { label: Nullable::Omitted, linode_id: Nullable::Null };
//! assert_eq!(serde_json::to_string(&detach).unwrap(), r#"{"linode_id":null}"#);
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Three-state optional value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Nullable<T> {
    /// Not sent at all.
    Omitted,
    /// Sent as `null`.
    Null,
    /// Sent with a value.
    Value(T),
}

impl<T> Nullable<T> {
    /// Returns `true` for [`Nullable::Omitted`]; use with
    /// `skip_serializing_if`.
    pub fn is_omitted(&self) -> bool {
        matches!(self, Nullable::Omitted)
    }

    /// Returns `true` for [`Nullable::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Nullable::Null)
    }

    /// The value, if there is one.
    pub fn as_value(&self) -> Option<&T> {
        match self {
            Nullable::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Collapses to `Option`, losing the omitted/null distinction.
    pub fn into_option(self) -> Option<T> {
        match self {
            Nullable::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl<T> Default for Nullable<T> {
    fn default() -> Self {
        Nullable::Omitted
    }
}

impl<T> From<Option<T>> for Nullable<T> {
    /// `None` becomes an explicit [`Nullable::Null`].
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Nullable::Value(v),
            None => Nullable::Null,
        }
    }
}

impl<T: Serialize> Serialize for Nullable<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Nullable::Value(v) => v.serialize(serializer),
            Nullable::Omitted | Nullable::Null => serializer.serialize_none(),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Nullable<T> {
    /// A present field decodes to `Null` or `Value`; pair with
    /// `#[serde(default)]` so a missing field becomes `Omitted`.
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<T>::deserialize(deserializer)?.into())
    }
}
