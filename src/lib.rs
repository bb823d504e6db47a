//! # Driftlens: Embedding Drift Analysis Engine
//!
//! A batch-compute core for model monitoring. Given a reference dataset
//! (e.g. training-time data) and a primary dataset (e.g. production
//! traffic) sharing a declared schema, driftlens:
//!
//! - **Validates and indexes** heterogeneous tabular data against the schema
//! - **Projects** each embedding feature's high-dimensional vectors into a
//!   shared low-dimensional space, fit jointly over both populations
//! - **Clusters** the projected points with a density-based algorithm,
//!   assigning low-density points to an explicit noise bucket
//! - **Scores** every cluster and the dataset as a whole for distributional
//!   drift, surfacing the clusters most responsible for degradation
//!
//! The core performs no file or network I/O: callers supply materialized
//! tables through the [`core::dataset::TableSource`] trait and query results
//! through an [`AnalysisSession`].
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                    AnalysisSession                        │
//! ├───────────────────────────────────────────────────────────┤
//! │   Core          │          Analysis                       │
//! │ • Schema        │ • Projection (kNN graph + layout)       │
//! │ • Dataset       │ • Clustering (density-based + noise)    │
//! │ • Config        │ • Drift scoring (PSI / Jensen-Shannon)  │
//! │ • Errors        │                                         │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use driftlens::{AnalysisSession, DriftlensConfig};
//! use driftlens::core::dataset::{Dataset, DatasetRole, MemoryTable};
//! use driftlens::core::schema::{EmbeddingFeature, SchemaModel};
//!
//! fn main() -> driftlens::Result<()> {
//!     let schema = SchemaModel::new()
//!         .with_timestamp("ts")
//!         .with_prediction_label("pred")
//!         .with_embedding_feature(
//!             EmbeddingFeature::new("review", "review_vector").with_raw_data("review_text"),
//!         );
//!
//!     let table: Arc<MemoryTable> = unimplemented!("loaded by the data collaborator");
//!     let reference = Arc::new(Dataset::from_table(
//!         table.clone(), schema.clone(), DatasetRole::Reference, "train",
//!     )?);
//!     let primary = Arc::new(Dataset::from_table(
//!         table, schema, DatasetRole::Primary, "prod",
//!     )?);
//!
//!     let session = AnalysisSession::open(reference, primary, DriftlensConfig::default())?;
//!     let artifact = session.compute("review")?;
//!     for drift in &artifact.ranked_drift {
//!         println!("{:?}: {:?}", drift.scope, drift.value);
//!     }
//!     session.close();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]

// Core data model and configuration
pub mod core {
    //! Schema, dataset, configuration, and error types.

    pub mod config;
    pub mod dataset;
    pub mod errors;
    pub mod schema;
}

// Analysis pipeline stages
pub mod analysis {
    //! Projection, clustering, and drift scoring stages.

    pub mod clustering;
    pub mod drift;
    pub mod projection;
}

// Session orchestration and artifacts
pub mod session {
    //! Analysis sessions and their computed artifacts.

    pub mod artifact;
    pub mod handle;
}

// Re-export primary types for convenience
pub use crate::analysis::clustering::{ClusterAnalyzer, ClusterId, Membership};
pub use crate::analysis::drift::{DriftResult, DriftScope, DriftScorer, DriftValue};
pub use crate::analysis::projection::{EmbeddingProjector, PointKey, Projection};
pub use crate::core::config::DriftlensConfig;
pub use crate::core::dataset::{Dataset, DatasetRole, RowId, TableSource};
pub use crate::core::errors::{DriftError, Result, ResultExt};
pub use crate::core::schema::SchemaModel;
pub use crate::session::artifact::AnalysisArtifact;
pub use crate::session::handle::{AnalysisSession, CancelToken};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
