//! Key System - Scalar keys stored in association tables
//!
//! Owner and related records are identified by a single scalar column. Integer,
//! UUID and text keys are supported; composite keys are not.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backends::DatabaseValue;
use crate::error::PivotError;

/// Set of related keys; order carries no meaning, duplicates collapse
pub type KeySet = BTreeSet<RelatedKey>;

/// Scalar key of an owner or related record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelatedKey {
    /// Integer key (any integer column width)
    Integer(i64),
    /// UUID key
    Uuid(Uuid),
    /// Text key
    Text(String),
}

impl std::fmt::Display for RelatedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelatedKey::Integer(id) => write!(f, "{}", id),
            RelatedKey::Uuid(id) => write!(f, "{}", id),
            RelatedKey::Text(id) => write!(f, "{}", id),
        }
    }
}

impl RelatedKey {
    /// Convert into a value for parameter binding
    pub fn to_value(&self) -> DatabaseValue {
        match self {
            RelatedKey::Integer(id) => DatabaseValue::Int64(*id),
            RelatedKey::Uuid(id) => DatabaseValue::Uuid(*id),
            RelatedKey::Text(id) => DatabaseValue::String(id.clone()),
        }
    }
}

impl From<i64> for RelatedKey {
    fn from(value: i64) -> Self {
        RelatedKey::Integer(value)
    }
}

impl From<i32> for RelatedKey {
    fn from(value: i32) -> Self {
        RelatedKey::Integer(value as i64)
    }
}

impl From<Uuid> for RelatedKey {
    fn from(value: Uuid) -> Self {
        RelatedKey::Uuid(value)
    }
}

impl From<String> for RelatedKey {
    fn from(value: String) -> Self {
        RelatedKey::Text(value)
    }
}

impl From<&str> for RelatedKey {
    fn from(value: &str) -> Self {
        RelatedKey::Text(value.to_string())
    }
}

impl From<RelatedKey> for DatabaseValue {
    fn from(key: RelatedKey) -> Self {
        key.to_value()
    }
}

impl TryFrom<DatabaseValue> for RelatedKey {
    type Error = PivotError;

    fn try_from(value: DatabaseValue) -> Result<Self, Self::Error> {
        match value {
            DatabaseValue::Int32(i) => Ok(RelatedKey::Integer(i as i64)),
            DatabaseValue::Int64(i) => Ok(RelatedKey::Integer(i)),
            DatabaseValue::Uuid(u) => Ok(RelatedKey::Uuid(u)),
            DatabaseValue::String(s) => Ok(RelatedKey::Text(s)),
            other => Err(PivotError::InvalidKey(format!(
                "{:?} cannot be used as a relation key",
                other
            ))),
        }
    }
}

/// Collect anything key-like into a `KeySet`
pub fn key_set<I, K>(keys: I) -> KeySet
where
    I: IntoIterator<Item = K>,
    K: Into<RelatedKey>,
{
    keys.into_iter().map(Into::into).collect()
}
