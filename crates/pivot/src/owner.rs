//! Owner contract
//!
//! The reconciliation engine only needs two things from the record that owns a
//! relation: its primary key and read/write access to the list of related keys
//! the application wants persisted.

use crate::key::RelatedKey;

/// A record that owns one or more many-to-many relations
pub trait RelationOwner: Send + Sync {
    /// Name of the owner's primary key attribute
    fn primary_key_name() -> &'static str {
        "id"
    }

    /// Primary key of this record, `None` until it has been saved
    fn primary_key(&self) -> Option<RelatedKey>;

    /// Desired related keys held in `attribute`, `None` when unset
    fn related_keys(&self, attribute: &str) -> Option<Vec<RelatedKey>>;

    /// Replace the desired related keys held in `attribute`
    fn set_related_keys(&mut self, attribute: &str, keys: Vec<RelatedKey>);
}
