//! Reconciliation Engine
//!
//! Diffs the desired related keys held on an owner against the keys persisted
//! in the association table and applies the difference.
//!
//! The persisted keys are loaded lazily, at most once per engine, and the
//! snapshot is never refreshed afterwards, not even after the engine's own
//! writes. An engine therefore lives exactly as long as the owner instance it
//! was bound for.

use std::ops::AddAssign;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::backends::{row, DatabaseValue, InFilter};
use crate::binding::RelationBinding;
use crate::error::{PivotError, PivotResult};
use crate::key::{KeySet, RelatedKey};
use crate::owner::RelationOwner;

/// Keys present in `desired` but not in `persisted`
pub fn additions(desired: &KeySet, persisted: &KeySet) -> KeySet {
    desired.difference(persisted).cloned().collect()
}

/// Keys present in `persisted` but not in `desired`
pub fn removals(desired: &KeySet, persisted: &KeySet) -> KeySet {
    persisted.difference(desired).cloned().collect()
}

/// Where an engine is in its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Persisted keys not loaded yet
    Unloaded,
    /// Persisted keys loaded, desired list never filled from them
    Unfilled,
    /// Desired list filled from the persisted keys at least once
    Filled,
}

/// Row counts written by an apply operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub inserted: u64,
    pub deleted: u64,
}

impl SyncReport {
    /// True when nothing was written
    pub fn is_empty(&self) -> bool {
        self.inserted == 0 && self.deleted == 0
    }
}

impl AddAssign for SyncReport {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.deleted += other.deleted;
    }
}

/// Per-owner diff-and-apply state for one relation
#[derive(Debug)]
pub struct ReconciliationEngine<O> {
    binding: RelationBinding<O>,
    persisted: Option<KeySet>,
    filled: bool,
}

impl<O: RelationOwner> ReconciliationEngine<O> {
    pub(crate) fn new(binding: RelationBinding<O>) -> Self {
        Self {
            binding,
            persisted: None,
            filled: false,
        }
    }

    pub fn binding(&self) -> &RelationBinding<O> {
        &self.binding
    }

    pub fn is_loaded(&self) -> bool {
        self.persisted.is_some()
    }

    pub fn is_filled(&self) -> bool {
        self.filled
    }

    pub fn state(&self) -> EngineState {
        match (&self.persisted, self.filled) {
            (_, true) => EngineState::Filled,
            (Some(_), false) => EngineState::Unfilled,
            (None, false) => EngineState::Unloaded,
        }
    }

    /// Persisted-keys snapshot, if it has been loaded
    pub fn persisted_keys(&self) -> Option<&KeySet> {
        self.persisted.as_ref()
    }

    /// Desired keys currently held on the owner; an unset attribute is empty
    pub fn desired_keys(&self, owner: &O) -> KeySet {
        owner
            .related_keys(&self.binding.definition().attribute)
            .unwrap_or_default()
            .into_iter()
            .collect()
    }

    /// Load the related keys persisted for `owner`, querying storage only once
    ///
    /// An owner without a primary key has nothing persisted yet and yields an
    /// empty set.
    pub async fn load_persisted_keys(&mut self, owner: &O) -> PivotResult<&KeySet> {
        let keys = match self.persisted.take() {
            Some(keys) => keys,
            None => self.fetch_persisted(owner).await?,
        };
        let keys: &KeySet = self.persisted.insert(keys);
        Ok(keys)
    }

    async fn fetch_persisted(&self, owner: &O) -> PivotResult<KeySet> {
        let definition = self.binding.definition();

        let owner_key = match owner.primary_key() {
            Some(key) => key,
            None => {
                debug!(
                    "Owner of '{}' has no primary key yet, nothing persisted",
                    definition.relation_name()
                );
                return Ok(KeySet::new());
            }
        };

        let where_equals = row([(definition.owner_key_column.as_str(), owner_key.to_value())]);
        let rows = self
            .binding
            .store()
            .query_rows(&definition.table, &[definition.related_key_column.as_str()], &where_equals)
            .await?;

        let row_count = rows.len();
        // Rows whose related key is NULL link nothing and are left out
        let keys = rows
            .into_iter()
            .filter_map(|mut r| r.remove(&definition.related_key_column))
            .filter(|value| *value != DatabaseValue::Null)
            .map(RelatedKey::try_from)
            .collect::<PivotResult<KeySet>>()?;

        debug!(
            "Loaded {} persisted keys from {} rows of {} for owner {}",
            keys.len(),
            row_count,
            definition.table,
            owner_key
        );
        Ok(keys)
    }

    /// Fill the desired list after the owner was loaded, if the policy allows
    ///
    /// Returns whether the list was filled.
    pub async fn auto_fill(&mut self, owner: &mut O) -> PivotResult<bool> {
        if !self.binding.policy().allows(owner) {
            debug!(
                "Auto-fill of '{}' skipped by {:?} policy",
                self.binding.name(),
                self.binding.policy()
            );
            return Ok(false);
        }

        self.fill(owner).await?;
        Ok(true)
    }

    /// Set the owner's desired list to the persisted-keys snapshot
    pub async fn fill(&mut self, owner: &mut O) -> PivotResult<()> {
        let keys: Vec<RelatedKey> = self.load_persisted_keys(owner).await?.iter().cloned().collect();

        debug!("Filling '{}' with {} keys", self.binding.name(), keys.len());
        owner.set_related_keys(&self.binding.definition().attribute, keys);
        self.filled = true;
        Ok(())
    }

    /// Desired keys not yet persisted
    pub async fn compute_additions(&mut self, owner: &O) -> PivotResult<KeySet> {
        let desired = self.desired_keys(owner);
        let persisted = self.load_persisted_keys(owner).await?;
        Ok(additions(&desired, persisted))
    }

    /// Persisted keys no longer desired
    pub async fn compute_removals(&mut self, owner: &O) -> PivotResult<KeySet> {
        let desired = self.desired_keys(owner);
        let persisted = self.load_persisted_keys(owner).await?;
        Ok(removals(&desired, persisted))
    }

    /// Insert one association row per addition inside a single transaction
    ///
    /// Nothing is committed unless every row insert succeeds. No transaction is
    /// opened when there is nothing to add.
    pub async fn apply_insert(&mut self, owner: &O) -> PivotResult<SyncReport> {
        let added = self.compute_additions(owner).await?;
        if added.is_empty() {
            return Ok(SyncReport::default());
        }

        let owner_key = owner.primary_key().ok_or(PivotError::MissingPrimaryKey)?;
        let definition = self.binding.definition();
        let store = Arc::clone(self.binding.store());

        debug!(
            "Inserting {} rows into {} for owner {}",
            added.len(),
            definition.table,
            owner_key
        );

        let mut tx = store.begin_transaction().await?;
        for key in &added {
            let values = row([
                (definition.owner_key_column.as_str(), owner_key.to_value()),
                (definition.related_key_column.as_str(), key.to_value()),
            ]);

            if let Err(err) = tx.insert_row(&definition.table, &values).await {
                warn!(
                    "Insert of {} into {} failed, rolling back: {}",
                    key, definition.table, err
                );
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback on {} failed: {}", definition.table, rollback_err);
                }
                return Err(err);
            }
        }
        tx.commit().await?;

        Ok(SyncReport {
            inserted: added.len() as u64,
            deleted: 0,
        })
    }

    /// Delete the association rows of every removal in one statement
    pub async fn apply_delete(&mut self, owner: &O) -> PivotResult<SyncReport> {
        let removed = self.compute_removals(owner).await?;
        if removed.is_empty() {
            return Ok(SyncReport::default());
        }

        let owner_key = owner.primary_key().ok_or(PivotError::MissingPrimaryKey)?;
        let definition = self.binding.definition();

        let where_equals = row([(definition.owner_key_column.as_str(), owner_key.to_value())]);
        let values: Vec<DatabaseValue> = removed.iter().map(RelatedKey::to_value).collect();

        let deleted = self
            .binding
            .store()
            .delete_rows(
                &definition.table,
                &where_equals,
                InFilter::new(&definition.related_key_column, &values),
            )
            .await?;

        debug!(
            "Deleted {} rows from {} for owner {} ({} keys removed)",
            deleted,
            definition.table,
            owner_key,
            removed.len()
        );

        Ok(SyncReport { inserted: 0, deleted })
    }

    /// Reconcile after the owner was updated: delete, then insert
    ///
    /// Skipped entirely unless the desired list was filled from storage at
    /// least once; otherwise an untouched, empty desired list would remove
    /// every persisted row.
    pub async fn apply_update(&mut self, owner: &O) -> PivotResult<SyncReport> {
        if !self.filled {
            debug!("Update of '{}' skipped, relation never filled", self.binding.name());
            return Ok(SyncReport::default());
        }

        let mut report = self.apply_delete(owner).await?;
        report += self.apply_insert(owner).await?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{AssociationStore, MemoryStore, Row};
    use crate::config::{AutoFillMode, RelationDefinition};
    use crate::key::key_set;
    use proptest::prelude::*;

    #[derive(Debug, Default)]
    struct Post {
        id: Option<i64>,
        tag_ids: Option<Vec<RelatedKey>>,
    }

    impl Post {
        fn saved(id: i64) -> Self {
            Self { id: Some(id), tag_ids: None }
        }

        fn want(&mut self, keys: &[i64]) {
            self.tag_ids = Some(keys.iter().copied().map(RelatedKey::from).collect());
        }
    }

    impl RelationOwner for Post {
        fn primary_key(&self) -> Option<RelatedKey> {
            self.id.map(RelatedKey::from)
        }

        fn related_keys(&self, _attribute: &str) -> Option<Vec<RelatedKey>> {
            self.tag_ids.clone()
        }

        fn set_related_keys(&mut self, _attribute: &str, keys: Vec<RelatedKey>) {
            self.tag_ids = Some(keys);
        }
    }

    fn link(post: i64, tag: i64) -> Row {
        row([("post_id", post), ("tag_id", tag)])
    }

    fn engine_with(store: &MemoryStore, mode: AutoFillMode) -> ReconciliationEngine<Post> {
        let def = RelationDefinition::new("post_tag", "post_id", "tag_id", "tag_ids").with_auto_fill(mode);
        let store: Arc<dyn AssociationStore> = Arc::new(store.clone());
        RelationBinding::define(def, store).unwrap().bind()
    }

    #[tokio::test]
    async fn test_load_is_cached() {
        let store = MemoryStore::new();
        store.seed("post_tag", vec![link(1, 10), link(1, 11), link(2, 12)]);
        let mut engine = engine_with(&store, AutoFillMode::Always);
        let post = Post::saved(1);

        assert_eq!(engine.state(), EngineState::Unloaded);
        let keys = engine.load_persisted_keys(&post).await.unwrap().clone();
        assert_eq!(keys, key_set([10, 11]));

        store.seed("post_tag", vec![link(1, 13)]);
        let again = engine.load_persisted_keys(&post).await.unwrap();
        assert_eq!(again, &keys);
        assert_eq!(store.stats().queries, 1);
        assert_eq!(engine.state(), EngineState::Unfilled);
    }

    #[tokio::test]
    async fn test_load_without_primary_key_is_empty() {
        let store = MemoryStore::new();
        store.seed("post_tag", vec![link(1, 10)]);
        let mut engine = engine_with(&store, AutoFillMode::Always);

        let keys = engine.load_persisted_keys(&Post::default()).await.unwrap();
        assert!(keys.is_empty());
        assert_eq!(store.stats().queries, 0);
    }

    #[tokio::test]
    async fn test_null_related_keys_are_skipped() {
        let store = MemoryStore::new();
        store.seed(
            "post_tag",
            vec![
                link(1, 2),
                row([("post_id", Some(1i64)), ("tag_id", None)]),
                row([("post_id", 1i64)]),
            ],
        );
        let mut engine = engine_with(&store, AutoFillMode::Always);
        let mut post = Post::saved(1);

        engine.fill(&mut post).await.unwrap();
        assert_eq!(post.tag_ids, Some(vec![RelatedKey::from(2)]));
        assert_eq!(engine.persisted_keys(), Some(&key_set([2])));
    }

    #[tokio::test]
    async fn test_fill_is_idempotent() {
        let store = MemoryStore::new();
        store.seed("post_tag", vec![link(1, 10), link(1, 11)]);
        let mut engine = engine_with(&store, AutoFillMode::Always);
        let mut post = Post::saved(1);

        engine.fill(&mut post).await.unwrap();
        let first = post.tag_ids.clone();
        engine.fill(&mut post).await.unwrap();

        assert_eq!(post.tag_ids, first);
        assert_eq!(engine.desired_keys(&post), key_set([10, 11]));
        assert_eq!(engine.state(), EngineState::Filled);
    }

    #[tokio::test]
    async fn test_auto_fill_respects_never() {
        let store = MemoryStore::new();
        store.seed("post_tag", vec![link(1, 10)]);
        let mut engine = engine_with(&store, AutoFillMode::Never);
        let mut post = Post::saved(1);

        assert!(!engine.auto_fill(&mut post).await.unwrap());
        assert!(post.tag_ids.is_none());
        assert!(!engine.is_filled());
    }

    #[tokio::test]
    async fn test_auto_fill_respects_predicate() {
        let store = MemoryStore::new();
        store.seed("post_tag", vec![link(1, 10), link(2, 20)]);
        let def = RelationDefinition::new("post_tag", "post_id", "tag_id", "tag_ids");
        let shared: Arc<dyn AssociationStore> = Arc::new(store.clone());
        let binding =
            RelationBinding::<Post>::define_with_predicate(def, shared, |post: &Post| post.id == Some(2)).unwrap();

        let mut first = Post::saved(1);
        let mut engine = binding.bind();
        assert!(!engine.auto_fill(&mut first).await.unwrap());
        assert!(first.tag_ids.is_none());

        let mut second = Post::saved(2);
        let mut engine = binding.bind();
        assert!(engine.auto_fill(&mut second).await.unwrap());
        assert_eq!(second.tag_ids, Some(vec![RelatedKey::from(20)]));
    }

    #[tokio::test]
    async fn test_desired_list_read_fresh() {
        let store = MemoryStore::new();
        store.seed("post_tag", vec![link(1, 1), link(1, 2), link(1, 3)]);
        let mut engine = engine_with(&store, AutoFillMode::Always);
        let mut post = Post::saved(1);
        engine.fill(&mut post).await.unwrap();

        assert!(engine.compute_additions(&post).await.unwrap().is_empty());

        post.want(&[2, 3, 4]);
        assert_eq!(engine.compute_additions(&post).await.unwrap(), key_set([4]));
        assert_eq!(engine.compute_removals(&post).await.unwrap(), key_set([1]));
    }

    #[tokio::test]
    async fn test_unset_desired_list_removes_everything() {
        let store = MemoryStore::new();
        store.seed("post_tag", vec![link(1, 1), link(1, 2)]);
        let mut engine = engine_with(&store, AutoFillMode::Always);
        let post = Post::saved(1);

        assert_eq!(engine.compute_removals(&post).await.unwrap(), key_set([1, 2]));
    }

    #[tokio::test]
    async fn test_apply_insert_without_additions_opens_no_transaction() {
        let store = MemoryStore::new();
        let mut engine = engine_with(&store, AutoFillMode::Always);

        let report = engine.apply_insert(&Post::saved(1)).await.unwrap();
        assert!(report.is_empty());
        assert_eq!(store.stats().transactions_begun, 0);
    }

    #[tokio::test]
    async fn test_apply_insert_needs_primary_key() {
        let store = MemoryStore::new();
        let mut engine = engine_with(&store, AutoFillMode::Always);
        let mut post = Post::default();
        post.want(&[1]);

        let err = engine.apply_insert(&post).await.unwrap_err();
        assert_eq!(err, PivotError::MissingPrimaryKey);
        assert_eq!(store.count("post_tag"), 0);
    }

    #[tokio::test]
    async fn test_apply_insert_rolls_back_on_failure() {
        let store = MemoryStore::new();
        store.fail_insert_when(|_, values| values.get("tag_id") == Some(&DatabaseValue::Int64(8)));
        let mut engine = engine_with(&store, AutoFillMode::Always);
        let mut post = Post::saved(1);
        post.want(&[7, 8, 9]);

        let err = engine.apply_insert(&post).await.unwrap_err();
        assert!(err.is_persistence());
        assert_eq!(store.count("post_tag"), 0);

        let stats = store.stats();
        assert_eq!(stats.rollbacks, 1);
        assert_eq!(stats.commits, 0);
    }

    #[tokio::test]
    async fn test_apply_delete_surfaces_errors() {
        let store = MemoryStore::new();
        store.seed("post_tag", vec![link(1, 1)]);
        store.fail_deletes(true);
        let mut engine = engine_with(&store, AutoFillMode::Always);
        let mut post = Post::saved(1);
        engine.fill(&mut post).await.unwrap();
        post.want(&[]);

        assert!(engine.apply_delete(&post).await.is_err());
        assert_eq!(store.count("post_tag"), 1);
    }

    #[tokio::test]
    async fn test_apply_update_requires_fill() {
        let store = MemoryStore::new();
        store.seed("post_tag", vec![link(1, 1), link(1, 2)]);
        let mut engine = engine_with(&store, AutoFillMode::Never);
        let mut post = Post::saved(1);
        post.want(&[5]);

        let report = engine.apply_update(&post).await.unwrap();
        assert!(report.is_empty());

        let stats = store.stats();
        assert_eq!(stats.delete_statements, 0);
        assert_eq!(stats.inserts, 0);
        assert_eq!(store.count("post_tag"), 2);
    }

    #[tokio::test]
    async fn test_apply_update_deletes_then_inserts() {
        let store = MemoryStore::new();
        store.seed("post_tag", vec![link(1, 1), link(1, 2), link(1, 3), link(2, 1)]);
        let mut engine = engine_with(&store, AutoFillMode::Always);
        let mut post = Post::saved(1);
        engine.auto_fill(&mut post).await.unwrap();
        post.want(&[2, 3, 4]);

        let report = engine.apply_update(&post).await.unwrap();
        assert_eq!(report, SyncReport { inserted: 1, deleted: 1 });

        let mut fresh = engine_with(&store, AutoFillMode::Always);
        assert_eq!(fresh.load_persisted_keys(&post).await.unwrap(), &key_set([2, 3, 4]));
        assert!(store.rows("post_tag").contains(&link(2, 1)));
    }

    fn arb_keys() -> impl Strategy<Value = KeySet> {
        prop::collection::btree_set((0i64..12).prop_map(RelatedKey::from), 0..8)
    }

    proptest! {
        #[test]
        fn diff_sets_are_disjoint(desired in arb_keys(), persisted in arb_keys()) {
            let added = additions(&desired, &persisted);
            let removed = removals(&desired, &persisted);
            prop_assert!(added.is_disjoint(&removed));
        }

        #[test]
        fn diff_sets_decompose(desired in arb_keys(), persisted in arb_keys()) {
            let added = additions(&desired, &persisted);
            let removed = removals(&desired, &persisted);

            let left: KeySet = persisted.union(&added).cloned().collect();
            let right: KeySet = desired.union(&removed).cloned().collect();
            prop_assert_eq!(left, right);
        }

        #[test]
        fn applying_diff_reaches_desired(desired in arb_keys(), persisted in arb_keys()) {
            let added = additions(&desired, &persisted);
            let removed = removals(&desired, &persisted);

            let result: KeySet = persisted
                .difference(&removed)
                .cloned()
                .chain(added)
                .collect();
            prop_assert_eq!(result, desired);
        }
    }
}
