//! # elif-pivot: Many-to-Many Relation Reconciliation for elif.rs
//!
//! A record (the owner) holds a plain list of related keys per relation. When
//! the owner is saved, the list is compared against the rows of the
//! association table and only the difference is written: missing pairs are
//! inserted inside one transaction, stale pairs are removed with a single
//! batch delete.
//!
//! ```ignore
//! let binding = RelationBinding::<Post>::define(
//!     RelationDefinition::new("post_tag", "post_id", "tag_id", "tag_ids"),
//!     Arc::new(PostgresStore::connect(&url, DatabasePoolConfig::default()).await?),
//! )?;
//!
//! let mut post = ManyToManyLifecycle::constructed(post, &[binding]);
//! post.loaded().await?;
//! post.owner_mut().tag_ids = Some(vec![2.into(), 3.into(), 4.into()]);
//! post.updated().await?;
//! ```

pub mod backends;
pub mod binding;
pub mod config;
pub mod engine;
pub mod error;
pub mod key;
pub mod lifecycle;
pub mod owner;
pub mod sql;

// Re-export core traits and types
pub use backends::{
    AssociationStore, DatabasePoolConfig, DatabaseValue, InFilter, MemoryStore, MemoryStoreStats,
    PostgresStore, Row, StoreTransaction,
};
pub use binding::{AutoFillPolicy, OwnerPredicate, RelationBinding};
pub use config::{AutoFillMode, RelationDefinition};
pub use engine::{additions, removals, EngineState, ReconciliationEngine, SyncReport};
pub use error::{PivotError, PivotResult};
pub use key::{key_set, KeySet, RelatedKey};
pub use lifecycle::ManyToManyLifecycle;
pub use owner::RelationOwner;
