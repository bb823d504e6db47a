//! Schema-bound, immutable tabular datasets.
//!
//! The core never performs file or network I/O: callers hand it an already
//! materialized table through the [`TableSource`] trait, and construction
//! validates the table against a [`SchemaModel`] and extracts each embedding
//! feature's vector column into a dense matrix up front. After that the
//! dataset is read-only; row identity is the stable in-dataset index and is
//! what cluster and drift results are correlated back to.

use std::collections::HashSet;
use std::sync::Arc;

use ahash::AHashMap;
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::core::errors::{DriftError, Result};
use crate::core::schema::SchemaModel;

/// Typed cell value supplied by the table collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellValue {
    /// Floating point value
    Float(f64),
    /// Integer value
    Int(i64),
    /// Text value
    Text(String),
    /// Fixed-length numeric vector
    Vector(Vec<f64>),
    /// Timestamp as epoch milliseconds
    Timestamp(i64),
    /// Missing value
    Null,
}

impl CellValue {
    /// Numeric view of this cell, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Timestamp(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Vector view of this cell, if it is one
    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            Self::Vector(v) => Some(v.as_slice()),
            _ => None,
        }
    }
}

/// Materialized table abstraction supplied by the data-loading collaborator.
///
/// The core only needs a row count, the column identifiers, and typed cell
/// access; loading from files, object stores, or dataframes is the
/// collaborator's concern.
pub trait TableSource: Send + Sync {
    /// Number of rows in the table
    fn row_count(&self) -> usize;

    /// Column identifiers, in table order
    fn column_names(&self) -> Vec<String>;

    /// Typed value of one cell; `None` when the column does not exist
    fn cell(&self, row: usize, column: &str) -> Option<CellValue>;
}

/// Simple columnar in-memory table, usable by callers and tests
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    columns: AHashMap<String, Vec<CellValue>>,
    column_order: Vec<String>,
    rows: usize,
}

impl MemoryTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column; all columns must have equal length
    pub fn with_column(mut self, name: impl Into<String>, values: Vec<CellValue>) -> Self {
        let name = name.into();
        if self.column_order.is_empty() {
            self.rows = values.len();
        }
        self.column_order.push(name.clone());
        self.columns.insert(name, values);
        self
    }
}

impl TableSource for MemoryTable {
    fn row_count(&self) -> usize {
        self.rows
    }

    fn column_names(&self) -> Vec<String> {
        self.column_order.clone()
    }

    fn cell(&self, row: usize, column: &str) -> Option<CellValue> {
        self.columns.get(column).and_then(|c| c.get(row)).cloned()
    }
}

/// Stable row identity within a single dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId(pub usize);

/// Which population a dataset represents in the comparison. Ordered so
/// reference sorts before primary, matching the pooled row order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetRole {
    /// Baseline population (e.g. training-time data)
    Reference,
    /// Current population (e.g. production traffic)
    Primary,
}

/// A named, schema-bound, immutable dataset.
///
/// Embedding vector columns are extracted into dense matrices at
/// construction; everything else stays behind the table source and is read
/// lazily for inspection and export.
pub struct Dataset {
    name: String,
    role: DatasetRole,
    schema: SchemaModel,
    table: Arc<dyn TableSource>,
    /// Dense vector matrix per embedding feature, rows aligned to RowId
    vectors: AHashMap<String, Array2<f64>>,
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("rows", &self.table.row_count())
            .field("features", &self.vectors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Dataset {
    /// Construct a dataset from a materialized table and a schema.
    ///
    /// Validates the schema against the table's columns, then extracts the
    /// vector column of every declared embedding feature. Rows with
    /// differing vector lengths within one column fail with a dimension
    /// mismatch; a non-vector cell in a vector column is a schema error.
    pub fn from_table(
        table: Arc<dyn TableSource>,
        schema: SchemaModel,
        role: DatasetRole,
        name: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        let columns: HashSet<String> = table.column_names().into_iter().collect();
        schema.validate(&columns)?;

        let row_count = table.row_count();
        let mut vectors = AHashMap::new();

        for feature in schema.embedding_features() {
            let matrix = extract_vectors(table.as_ref(), &feature.name, &feature.vector_column, row_count)?;
            vectors.insert(feature.name.clone(), matrix);
        }

        tracing::debug!(
            dataset = %name,
            rows = row_count,
            features = vectors.len(),
            "dataset constructed"
        );

        Ok(Self {
            name,
            role,
            schema,
            table,
            vectors,
        })
    }

    /// Dataset name tag
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Population role of this dataset
    pub fn role(&self) -> DatasetRole {
        self.role
    }

    /// Schema this dataset was validated against
    pub fn schema(&self) -> &SchemaModel {
        &self.schema
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.table.row_count()
    }

    /// True when the dataset has no rows
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Restartable iterator over the dataset's rows
    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> + '_ {
        (0..self.len()).map(move |index| Row {
            id: RowId(index),
            dataset: self,
        })
    }

    /// Vector matrix for an embedding feature, rows aligned to row identity
    pub fn vectors(&self, feature_name: &str) -> Result<&Array2<f64>> {
        self.vectors.get(feature_name).ok_or_else(|| {
            DriftError::schema(format!(
                "embedding feature '{feature_name}' is not declared by the schema of dataset '{}'",
                self.name
            ))
        })
    }

    /// Vector dimensionality of an embedding feature
    pub fn vector_dims(&self, feature_name: &str) -> Result<usize> {
        Ok(self.vectors(feature_name)?.ncols())
    }

    /// Raw cell access, used for inspection and export joins
    pub fn cell(&self, row: RowId, column: &str) -> Option<CellValue> {
        self.table.cell(row.0, column)
    }
}

/// Read-only view of one dataset row
#[derive(Clone, Copy)]
pub struct Row<'a> {
    id: RowId,
    dataset: &'a Dataset,
}

impl<'a> Row<'a> {
    /// Stable identity of this row
    pub fn id(&self) -> RowId {
        self.id
    }

    /// Typed value of one cell in this row
    pub fn cell(&self, column: &str) -> Option<CellValue> {
        self.dataset.cell(self.id, column)
    }

    /// Embedding vector of this row for a feature
    pub fn vector(&self, feature_name: &str) -> Option<ArrayView1<'a, f64>> {
        self.dataset
            .vectors
            .get(feature_name)
            .map(|m| m.row(self.id.0))
    }
}

/// Extract a vector column into a dense matrix, checking dimensionality
fn extract_vectors(
    table: &dyn TableSource,
    feature_name: &str,
    vector_column: &str,
    row_count: usize,
) -> Result<Array2<f64>> {
    if row_count == 0 {
        return Ok(Array2::zeros((0, 0)));
    }

    let first = table
        .cell(0, vector_column)
        .ok_or_else(|| DriftError::schema_column("vector column unreadable", vector_column))?;
    let dims = first
        .as_vector()
        .ok_or_else(|| {
            DriftError::schema_column(
                format!("column '{vector_column}' does not hold numeric vectors"),
                vector_column,
            )
        })?
        .len();

    if dims == 0 {
        return Err(DriftError::schema_column(
            format!("column '{vector_column}' holds zero-length vectors"),
            vector_column,
        ));
    }

    let mut matrix = Array2::zeros((row_count, dims));
    for row in 0..row_count {
        let cell = table
            .cell(row, vector_column)
            .ok_or_else(|| DriftError::schema_column("vector column unreadable", vector_column))?;
        let vector = cell.as_vector().ok_or_else(|| {
            DriftError::schema_column(
                format!("row {row} of column '{vector_column}' is not a numeric vector"),
                vector_column,
            )
        })?;
        if vector.len() != dims {
            return Err(DriftError::dimension_mismatch(
                feature_name,
                dims,
                vector.len(),
                Some(row),
            ));
        }
        for (col, &value) in vector.iter().enumerate() {
            matrix[(row, col)] = value;
        }
    }

    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::EmbeddingFeature;

    fn schema() -> SchemaModel {
        SchemaModel::new()
            .with_timestamp("ts")
            .with_embedding_feature(
                EmbeddingFeature::new("text", "text_vector").with_raw_data("text_raw"),
            )
    }

    fn table(vectors: Vec<Vec<f64>>) -> Arc<MemoryTable> {
        let n = vectors.len();
        Arc::new(
            MemoryTable::new()
                .with_column("ts", (0..n).map(|i| CellValue::Timestamp(i as i64)).collect())
                .with_column(
                    "text_vector",
                    vectors.into_iter().map(CellValue::Vector).collect(),
                )
                .with_column(
                    "text_raw",
                    (0..n)
                        .map(|i| CellValue::Text(format!("review {i}")))
                        .collect(),
                ),
        )
    }

    #[test]
    fn test_construction_extracts_vectors() {
        let dataset = Dataset::from_table(
            table(vec![vec![1.0, 2.0], vec![3.0, 4.0]]),
            schema(),
            DatasetRole::Reference,
            "train",
        )
        .unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.vector_dims("text").unwrap(), 2);
        let matrix = dataset.vectors("text").unwrap();
        assert_eq!(matrix[(1, 0)], 3.0);
    }

    #[test]
    fn test_ragged_vectors_fail_with_dimension_mismatch() {
        let result = Dataset::from_table(
            table(vec![vec![1.0, 2.0], vec![3.0]]),
            schema(),
            DatasetRole::Reference,
            "train",
        );

        match result.unwrap_err() {
            DriftError::DimensionMismatch {
                feature,
                expected,
                found,
                row,
            } => {
                assert_eq!(feature, "text");
                assert_eq!(expected, 2);
                assert_eq!(found, 1);
                assert_eq!(row, Some(1));
            }
            other => panic!("Expected DimensionMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_declared_column_fails_schema() {
        let bare = Arc::new(
            MemoryTable::new().with_column("ts", vec![CellValue::Timestamp(0)]),
        );
        let result = Dataset::from_table(bare, schema(), DatasetRole::Primary, "prod");
        assert!(matches!(result.unwrap_err(), DriftError::Schema { .. }));
    }

    #[test]
    fn test_non_vector_cell_in_vector_column() {
        let bad = Arc::new(
            MemoryTable::new()
                .with_column("ts", vec![CellValue::Timestamp(0)])
                .with_column("text_vector", vec![CellValue::Text("oops".into())])
                .with_column("text_raw", vec![CellValue::Text("raw".into())]),
        );
        let result = Dataset::from_table(bad, schema(), DatasetRole::Primary, "prod");
        assert!(matches!(result.unwrap_err(), DriftError::Schema { .. }));
    }

    #[test]
    fn test_rows_iterator_is_restartable() {
        let dataset = Dataset::from_table(
            table(vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]),
            schema(),
            DatasetRole::Primary,
            "prod",
        )
        .unwrap();

        let first: Vec<RowId> = dataset.rows().map(|r| r.id()).collect();
        let second: Vec<RowId> = dataset.rows().map(|r| r.id()).collect();
        assert_eq!(first, second);
        assert_eq!(first, vec![RowId(0), RowId(1), RowId(2)]);
    }

    #[test]
    fn test_row_access_joins_raw_data() {
        let dataset = Dataset::from_table(
            table(vec![vec![1.0, 2.0]]),
            schema(),
            DatasetRole::Primary,
            "prod",
        )
        .unwrap();

        let row = dataset.rows().next().unwrap();
        assert_eq!(row.cell("text_raw"), Some(CellValue::Text("review 0".into())));
        assert_eq!(row.vector("text").unwrap().to_vec(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_role_order_matches_pool_order() {
        assert!(DatasetRole::Reference < DatasetRole::Primary);

        let mut keys = [
            (DatasetRole::Primary, RowId(0)),
            (DatasetRole::Reference, RowId(1)),
            (DatasetRole::Reference, RowId(0)),
        ];
        keys.sort();
        assert_eq!(keys[0], (DatasetRole::Reference, RowId(0)));
        assert_eq!(keys[2], (DatasetRole::Primary, RowId(0)));
    }

    #[test]
    fn test_unknown_feature_rejected() {
        let dataset = Dataset::from_table(
            table(vec![vec![1.0, 2.0]]),
            schema(),
            DatasetRole::Reference,
            "train",
        )
        .unwrap();

        assert!(dataset.vectors("nonexistent").is_err());
    }
}
