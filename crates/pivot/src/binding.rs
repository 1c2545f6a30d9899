//! Relation bindings
//!
//! A `RelationBinding` ties a validated `RelationDefinition` to an owner type
//! and a storage collaborator. It is defined once per relation and then bound
//! once per owner instance, producing a fresh `ReconciliationEngine`.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::backends::AssociationStore;
use crate::config::{AutoFillMode, RelationDefinition};
use crate::engine::ReconciliationEngine;
use crate::error::{PivotError, PivotResult};
use crate::owner::RelationOwner;

/// Predicate deciding whether a loaded owner gets auto-filled
pub type OwnerPredicate<O> = Arc<dyn Fn(&O) -> bool + Send + Sync>;

/// Auto-fill policy resolved for an owner type
pub enum AutoFillPolicy<O> {
    Always,
    Never,
    Conditional(OwnerPredicate<O>),
}

impl<O> AutoFillPolicy<O> {
    /// Decide whether `owner` should be filled after load
    pub fn allows(&self, owner: &O) -> bool {
        match self {
            AutoFillPolicy::Always => true,
            AutoFillPolicy::Never => false,
            AutoFillPolicy::Conditional(predicate) => predicate(owner),
        }
    }

    pub fn mode(&self) -> AutoFillMode {
        match self {
            AutoFillPolicy::Always => AutoFillMode::Always,
            AutoFillPolicy::Never => AutoFillMode::Never,
            AutoFillPolicy::Conditional(_) => AutoFillMode::Conditional,
        }
    }
}

impl<O> Clone for AutoFillPolicy<O> {
    fn clone(&self) -> Self {
        match self {
            AutoFillPolicy::Always => AutoFillPolicy::Always,
            AutoFillPolicy::Never => AutoFillPolicy::Never,
            AutoFillPolicy::Conditional(predicate) => AutoFillPolicy::Conditional(Arc::clone(predicate)),
        }
    }
}

impl<O> fmt::Debug for AutoFillPolicy<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.mode())
    }
}

/// A validated relation definition bound to an owner type and a store
pub struct RelationBinding<O> {
    definition: Arc<RelationDefinition>,
    policy: AutoFillPolicy<O>,
    store: Arc<dyn AssociationStore>,
}

impl<O: RelationOwner> RelationBinding<O> {
    /// Define a binding whose auto-fill mode is `always` or `never`
    ///
    /// Fails with a configuration error if the definition is incomplete or
    /// asks for conditional auto-fill without a predicate.
    pub fn define(definition: RelationDefinition, store: Arc<dyn AssociationStore>) -> PivotResult<Self> {
        let policy = match definition.auto_fill {
            AutoFillMode::Always => AutoFillPolicy::Always,
            AutoFillMode::Never => AutoFillPolicy::Never,
            AutoFillMode::Conditional => {
                return Err(PivotError::Configuration(format!(
                    "Relation '{}' uses conditional auto-fill but no predicate was supplied",
                    definition.relation_name()
                )))
            }
        };

        Self::build(definition, policy, store)
    }

    /// Define a binding that auto-fills only owners accepted by `predicate`
    pub fn define_with_predicate<F>(
        definition: RelationDefinition,
        store: Arc<dyn AssociationStore>,
        predicate: F,
    ) -> PivotResult<Self>
    where
        F: Fn(&O) -> bool + Send + Sync + 'static,
    {
        let definition = definition.with_auto_fill(AutoFillMode::Conditional);
        Self::build(definition, AutoFillPolicy::Conditional(Arc::new(predicate)), store)
    }

    fn build(
        definition: RelationDefinition,
        policy: AutoFillPolicy<O>,
        store: Arc<dyn AssociationStore>,
    ) -> PivotResult<Self> {
        definition.validate()?;

        if O::primary_key_name().trim().is_empty() {
            return Err(PivotError::missing("owner primary key name"));
        }

        debug!(
            "Defined relation '{}' on {} ({} -> {})",
            definition.relation_name(),
            definition.table,
            definition.owner_key_column,
            definition.related_key_column
        );

        Ok(Self {
            definition: Arc::new(definition),
            policy,
            store,
        })
    }

    /// Create a reconciliation engine for one owner instance
    pub fn bind(&self) -> ReconciliationEngine<O> {
        ReconciliationEngine::new(self.clone())
    }
}

impl<O> RelationBinding<O> {
    pub fn definition(&self) -> &RelationDefinition {
        &self.definition
    }

    pub fn policy(&self) -> &AutoFillPolicy<O> {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn AssociationStore> {
        &self.store
    }

    pub fn name(&self) -> &str {
        self.definition.relation_name()
    }
}

impl<O> Clone for RelationBinding<O> {
    fn clone(&self) -> Self {
        Self {
            definition: Arc::clone(&self.definition),
            policy: self.policy.clone(),
            store: Arc::clone(&self.store),
        }
    }
}

impl<O> fmt::Debug for RelationBinding<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationBinding")
            .field("definition", &self.definition)
            .field("policy", &self.policy)
            .finish()
    }
}
