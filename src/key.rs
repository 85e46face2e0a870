//! Canonical lookup keys.
//!
//! Every argument passed to [`BatchLoader::load`][crate::BatchLoader::load] is
//! converted into a [`LookupKey`] before it joins a batch. Two arguments that
//! describe the same backend call produce equal keys, regardless of how their
//! fields happen to be ordered, so that they can share a single request.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use serde::Serialize;
use serde_json::Value as Json;
use thiserror::Error;

/// A deterministic, hashable representation of a lookup argument. Maps are
/// stored with sorted field names, so `{page, pageSize}` and
/// `{pageSize, page}` are the same key.
///
/// Numbers keep their canonical textual form, which means that `1` and `1.0`
/// are different keys (they serialize differently, and a backend may well
/// treat them differently).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LookupKey {
    Null,
    Bool(bool),
    Number(String),
    String(String),
    List(Vec<LookupKey>),
    Map(BTreeMap<String, LookupKey>),
}

/// An argument couldn't be turned into a [`LookupKey`]. This only happens for
/// arguments whose `Serialize` implementation fails, or which contain maps
/// with non-string keys.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("argument cannot be used as a lookup key: {reason}")]
pub struct EncodingError {
    reason: String,
}

/// Encode an argument into its canonical [`LookupKey`].
pub fn encode<T: Serialize + ?Sized>(argument: &T) -> Result<LookupKey, EncodingError> {
    serde_json::to_value(argument)
        .map(LookupKey::from)
        .map_err(|err| EncodingError {
            reason: err.to_string(),
        })
}

impl From<Json> for LookupKey {
    fn from(value: Json) -> Self {
        match value {
            Json::Null => LookupKey::Null,
            Json::Bool(b) => LookupKey::Bool(b),
            Json::Number(n) => LookupKey::Number(n.to_string()),
            Json::String(s) => LookupKey::String(s),
            Json::Array(items) => LookupKey::List(items.into_iter().map(LookupKey::from).collect()),
            // Collecting into a BTreeMap sorts the fields even if serde_json
            // has been built with preserve_order somewhere in the dependency
            // graph.
            Json::Object(fields) => LookupKey::Map(
                fields
                    .into_iter()
                    .map(|(name, value)| (name, LookupKey::from(value)))
                    .collect(),
            ),
        }
    }
}

impl Display for LookupKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LookupKey::Null => f.write_str("null"),
            LookupKey::Bool(b) => write!(f, "{}", b),
            LookupKey::Number(n) => f.write_str(n),
            LookupKey::String(s) => write!(f, "{:?}", s),
            LookupKey::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            LookupKey::Map(fields) => {
                f.write_str("{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}:{}", name, value)?;
                }
                f.write_str("}")
            }
        }
    }
}
