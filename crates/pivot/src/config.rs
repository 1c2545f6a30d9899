//! Relation definitions
//!
//! A `RelationDefinition` is plain data: which association table, which two
//! columns, which owner attribute holds the desired keys and how auto-fill
//! behaves. It can be built in code or deserialized from JSON.

use serde::{Deserialize, Serialize};

use crate::error::{PivotError, PivotResult};
use crate::sql::validate_identifier;

/// When the desired list is populated from storage after the owner is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoFillMode {
    /// Always fill after load
    #[default]
    Always,
    /// Never fill automatically; callers fill explicitly
    Never,
    /// Fill when the binding's owner predicate returns true
    Conditional,
}

/// Definition of one many-to-many relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDefinition {
    /// Relation name used for lookups; defaults to the attribute name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Association (pivot) table
    pub table: String,

    /// Column holding the owner's key
    pub owner_key_column: String,

    /// Column holding the related record's key
    pub related_key_column: String,

    /// Owner attribute holding the desired related keys
    pub attribute: String,

    #[serde(default)]
    pub auto_fill: AutoFillMode,
}

impl RelationDefinition {
    /// Create a definition with auto-fill enabled
    pub fn new(
        table: impl Into<String>,
        owner_key_column: impl Into<String>,
        related_key_column: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        Self {
            name: None,
            table: table.into(),
            owner_key_column: owner_key_column.into(),
            related_key_column: related_key_column.into(),
            attribute: attribute.into(),
            auto_fill: AutoFillMode::Always,
        }
    }

    /// Set an explicit relation name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the auto-fill mode
    pub fn with_auto_fill(mut self, mode: AutoFillMode) -> Self {
        self.auto_fill = mode;
        self
    }

    /// Parse a single definition from JSON
    pub fn from_json(json: &str) -> PivotResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse a list of definitions from a JSON array
    pub fn list_from_json(json: &str) -> PivotResult<Vec<Self>> {
        Ok(serde_json::from_str(json)?)
    }

    /// Effective relation name
    pub fn relation_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.attribute)
    }

    /// Validate the definition for completeness and consistency
    pub fn validate(&self) -> PivotResult<()> {
        let required = [
            ("table", &self.table),
            ("owner_key_column", &self.owner_key_column),
            ("related_key_column", &self.related_key_column),
            ("attribute", &self.attribute),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(PivotError::missing(field));
            }
        }

        validate_identifier(&self.table)?;
        validate_identifier(&self.owner_key_column)?;
        validate_identifier(&self.related_key_column)?;

        if self.owner_key_column == self.related_key_column {
            return Err(PivotError::Configuration(format!(
                "Relation '{}' uses '{}' for both owner and related keys",
                self.relation_name(),
                self.owner_key_column
            )));
        }

        Ok(())
    }
}
