//! Declarative schema mapping columns to semantic roles.
//!
//! A [`SchemaModel`] records which columns of a tabular dataset carry the
//! timestamp, the model's predicted and actual labels, and which column
//! pairs form embedding features (a fixed-length vector column plus an
//! optional raw-data column used only for inspection and export). Columns
//! not claimed by any declared role resolve to the generic feature role
//! through [`SchemaModel::resolve_roles`], a pure function over the column
//! set. Validation is side-effect free.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::core::errors::{DriftError, Result};

/// Semantic role a column plays within a dataset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    /// Event timestamp for the row
    Timestamp,
    /// Label predicted by the monitored model
    PredictionLabel,
    /// Ground-truth label
    ActualLabel,
    /// Vector column of the named embedding feature
    EmbeddingVector(String),
    /// Raw-data column of the named embedding feature
    EmbeddingRawData(String),
    /// Plain tabular feature (default for unclaimed columns)
    Feature,
}

/// An embedding feature: a vector column plus an optional raw-data column
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbeddingFeature {
    /// Logical name of the feature
    pub name: String,

    /// Column holding fixed-length numeric vectors
    pub vector_column: String,

    /// Optional column holding the associated raw value (e.g. source text)
    pub raw_data_column: Option<String>,
}

impl EmbeddingFeature {
    /// Declare an embedding feature backed by a vector column
    pub fn new(name: impl Into<String>, vector_column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vector_column: vector_column.into(),
            raw_data_column: None,
        }
    }

    /// Attach a raw-data column to this feature
    pub fn with_raw_data(mut self, column: impl Into<String>) -> Self {
        self.raw_data_column = Some(column.into());
        self
    }
}

/// Declarative mapping from semantic roles to column identifiers.
///
/// Built once, validated against each dataset it is applied to. Two schemas
/// are structurally identical when their role declarations are equal, which
/// is what session open requires of the reference/primary pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaModel {
    /// Column carrying the event timestamp
    pub timestamp_column: Option<String>,

    /// Column carrying the predicted label
    pub prediction_label_column: Option<String>,

    /// Column carrying the ground-truth label
    pub actual_label_column: Option<String>,

    /// Declared embedding features, keyed by feature name
    embedding_features: IndexMap<String, EmbeddingFeature>,
}

impl SchemaModel {
    /// Create an empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the timestamp column
    pub fn with_timestamp(mut self, column: impl Into<String>) -> Self {
        self.timestamp_column = Some(column.into());
        self
    }

    /// Set the prediction label column
    pub fn with_prediction_label(mut self, column: impl Into<String>) -> Self {
        self.prediction_label_column = Some(column.into());
        self
    }

    /// Set the actual label column
    pub fn with_actual_label(mut self, column: impl Into<String>) -> Self {
        self.actual_label_column = Some(column.into());
        self
    }

    /// Declare an embedding feature
    pub fn with_embedding_feature(mut self, feature: EmbeddingFeature) -> Self {
        self.embedding_features.insert(feature.name.clone(), feature);
        self
    }

    /// Declared embedding features in declaration order
    pub fn embedding_features(&self) -> impl Iterator<Item = &EmbeddingFeature> {
        self.embedding_features.values()
    }

    /// Look up a declared embedding feature by name
    pub fn embedding_feature(&self, name: &str) -> Option<&EmbeddingFeature> {
        self.embedding_features.get(name)
    }

    /// Names of all declared embedding features
    pub fn feature_names(&self) -> Vec<String> {
        self.embedding_features.keys().cloned().collect()
    }

    /// All column identifiers declared by any role
    pub fn declared_columns(&self) -> Vec<&str> {
        let mut columns = Vec::new();
        if let Some(c) = &self.timestamp_column {
            columns.push(c.as_str());
        }
        if let Some(c) = &self.prediction_label_column {
            columns.push(c.as_str());
        }
        if let Some(c) = &self.actual_label_column {
            columns.push(c.as_str());
        }
        for feature in self.embedding_features.values() {
            columns.push(feature.vector_column.as_str());
            if let Some(raw) = &feature.raw_data_column {
                columns.push(raw.as_str());
            }
        }
        columns
    }

    /// Validate this schema against a dataset's column set.
    ///
    /// Fails when a declared role references an absent column, when an
    /// embedding feature's raw-data column is declared but absent, or when
    /// one column is claimed by conflicting roles.
    pub fn validate(&self, dataset_columns: &HashSet<String>) -> Result<()> {
        self.check_conflicting_roles()?;

        for column in self.declared_columns() {
            if !dataset_columns.contains(column) {
                return Err(DriftError::schema_column(
                    format!("declared column '{column}' is absent from the dataset"),
                    column,
                ));
            }
        }
        Ok(())
    }

    /// Resolve the complete role assignment for a column set.
    ///
    /// Two phases: user-declared roles claim their columns first, then every
    /// unclaimed column falls through to the generic [`ColumnRole::Feature`]
    /// role. Pure function of (schema, columns); does not validate presence,
    /// call [`SchemaModel::validate`] for that.
    pub fn resolve_roles(&self, all_columns: &[String]) -> IndexMap<String, ColumnRole> {
        let mut roles = IndexMap::with_capacity(all_columns.len());

        for column in all_columns {
            let role = self.declared_role(column).unwrap_or(ColumnRole::Feature);
            roles.insert(column.clone(), role);
        }
        roles
    }

    /// Role this schema declares for a column, if any
    pub fn declared_role(&self, column: &str) -> Option<ColumnRole> {
        if self.timestamp_column.as_deref() == Some(column) {
            return Some(ColumnRole::Timestamp);
        }
        if self.prediction_label_column.as_deref() == Some(column) {
            return Some(ColumnRole::PredictionLabel);
        }
        if self.actual_label_column.as_deref() == Some(column) {
            return Some(ColumnRole::ActualLabel);
        }
        for feature in self.embedding_features.values() {
            if feature.vector_column == column {
                return Some(ColumnRole::EmbeddingVector(feature.name.clone()));
            }
            if feature.raw_data_column.as_deref() == Some(column) {
                return Some(ColumnRole::EmbeddingRawData(feature.name.clone()));
            }
        }
        None
    }

    /// Reject schemas that assign one column to conflicting roles
    fn check_conflicting_roles(&self) -> Result<()> {
        let mut seen: HashSet<&str> = HashSet::new();
        for column in self.declared_columns() {
            if !seen.insert(column) {
                return Err(DriftError::schema_column(
                    format!("column '{column}' is assigned to more than one role"),
                    column,
                ));
            }
        }
        Ok(())
    }
}
