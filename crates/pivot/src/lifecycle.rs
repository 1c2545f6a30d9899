//! Owner lifecycle driver
//!
//! `ManyToManyLifecycle` owns one record together with one reconciliation
//! engine per relation binding, and turns the four lifecycle transitions of
//! the record into explicit calls:
//!
//! - `constructed` binds a fresh engine per relation
//! - `loaded` auto-fills the desired lists (when enabled)
//! - `inserted` persists the desired lists of a new record
//! - `updated` reconciles the desired lists of an existing record
//!
//! Relations are processed in declaration order; the first error stops the
//! dispatch and is returned.

use tracing::debug;

use crate::binding::RelationBinding;
use crate::engine::{ReconciliationEngine, SyncReport};
use crate::error::PivotResult;
use crate::owner::RelationOwner;

pub struct ManyToManyLifecycle<O> {
    owner: O,
    relations: Vec<ReconciliationEngine<O>>,
    auto_fill: bool,
}

impl<O: RelationOwner> ManyToManyLifecycle<O> {
    /// The owner was constructed: bind one engine per relation
    pub fn constructed(owner: O, bindings: &[RelationBinding<O>]) -> Self {
        Self {
            owner,
            relations: bindings.iter().map(RelationBinding::bind).collect(),
            auto_fill: true,
        }
    }

    /// Enable or disable auto-fill on `loaded`; disabled means callers `fill` manually
    pub fn with_auto_fill(mut self, enabled: bool) -> Self {
        self.auto_fill = enabled;
        self
    }

    pub fn auto_fill_enabled(&self) -> bool {
        self.auto_fill
    }

    /// The owner was read from storage
    pub async fn loaded(&mut self) -> PivotResult<()> {
        if !self.auto_fill {
            debug!("Auto-fill disabled, {} relations left unfilled", self.relations.len());
            return Ok(());
        }
        self.fill().await
    }

    /// Fill every relation its policy allows
    pub async fn fill(&mut self) -> PivotResult<()> {
        for engine in &mut self.relations {
            engine.auto_fill(&mut self.owner).await?;
        }
        Ok(())
    }

    /// The owner was persisted for the first time
    pub async fn inserted(&mut self) -> PivotResult<SyncReport> {
        let mut report = SyncReport::default();
        for engine in &mut self.relations {
            report += engine.apply_insert(&self.owner).await?;
        }
        Ok(report)
    }

    /// An existing owner was saved again
    pub async fn updated(&mut self) -> PivotResult<SyncReport> {
        let mut report = SyncReport::default();
        for engine in &mut self.relations {
            report += engine.apply_update(&self.owner).await?;
        }
        Ok(report)
    }

    /// Look up a relation engine by relation name or association table
    pub fn relation(&self, name: &str) -> Option<&ReconciliationEngine<O>> {
        self.relations.iter().find(|engine| matches_name(engine, name))
    }

    /// Mutable lookup, for driving a single relation by hand
    ///
    /// Returns the owner alongside the engine since every engine operation
    /// needs both.
    pub fn relation_mut(&mut self, name: &str) -> Option<(&mut ReconciliationEngine<O>, &mut O)> {
        let owner = &mut self.owner;
        self.relations
            .iter_mut()
            .find(|engine| matches_name(engine, name))
            .map(|engine| (engine, owner))
    }

    pub fn relations(&self) -> &[ReconciliationEngine<O>] {
        &self.relations
    }

    pub fn owner(&self) -> &O {
        &self.owner
    }

    pub fn owner_mut(&mut self) -> &mut O {
        &mut self.owner
    }

    /// Discard the engines and hand the owner back
    pub fn into_owner(self) -> O {
        self.owner
    }
}

fn matches_name<O>(engine: &ReconciliationEngine<O>, name: &str) -> bool
where
    O: RelationOwner,
{
    let binding = engine.binding();
    binding.name() == name || binding.definition().table == name
}
