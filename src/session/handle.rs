//! Analysis session lifecycle and orchestration.
//!
//! An [`AnalysisSession`] owns a validated reference/primary dataset pair and
//! a cache of computed artifacts, one per embedding feature. Each session is
//! an independently owned value; there is no process-wide current session.
//!
//! `compute` runs projection → clustering → drift scoring synchronously from
//! the caller's perspective. Computations for different features may run
//! concurrently on the same session; computations for the same feature are
//! serialized through a per-feature guard so at most one is in flight and
//! the cache slot is never raced. A long-running compute can be cancelled
//! cooperatively between stages through a [`CancelToken`]; on cancellation
//! nothing is published and the previously cached artifact stays visible.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use tracing::{debug, info};
use uuid::Uuid;

use crate::analysis::clustering::ClusterAnalyzer;
use crate::analysis::drift::{DriftScope, DriftScorer};
use crate::analysis::projection::{EmbeddingProjector, PointKey};
use crate::core::config::DriftlensConfig;
use crate::core::dataset::{CellValue, Dataset, DatasetRole};
use crate::core::errors::{DriftError, Result};
use crate::session::artifact::AnalysisArtifact;

/// Cooperative cancellation flag checked between pipeline stages
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; observed at the next stage boundary
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// True once cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn checkpoint(&self, stage: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(DriftError::cancelled(stage))
        } else {
            Ok(())
        }
    }
}

/// One row selected for export, joined to its raw-data value
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedRow {
    /// Source dataset and row identity
    pub key: PointKey,
    /// Value of the feature's raw-data column, when the schema declares one
    pub raw_data: Option<CellValue>,
}

/// Datasets and artifact cache; dropped wholesale on close
struct SessionInner {
    reference: Arc<Dataset>,
    primary: Arc<Dataset>,
    artifacts: AHashMap<String, Arc<AnalysisArtifact>>,
}

/// An open analysis session over one reference/primary dataset pair.
pub struct AnalysisSession {
    id: Uuid,
    config: DriftlensConfig,
    /// Dedicated worker pool when `performance.num_threads` is set;
    /// otherwise parallel stages run on the rayon default pool
    pool: Option<rayon::ThreadPool>,
    /// `None` once the session is closed (terminal)
    inner: RwLock<Option<SessionInner>>,
    /// Per-feature guards serializing same-feature computations
    in_flight: Mutex<AHashMap<String, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for AnalysisSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisSession")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}

impl AnalysisSession {
    /// Open a session over a validated dataset pair.
    ///
    /// The two datasets must carry structurally identical schemas and agree
    /// on the vector dimensionality of every declared embedding feature;
    /// violations surface before any computation starts.
    pub fn open(
        reference: Arc<Dataset>,
        primary: Arc<Dataset>,
        config: DriftlensConfig,
    ) -> Result<Self> {
        config.validate()?;

        if reference.role() != DatasetRole::Reference {
            return Err(DriftError::schema(format!(
                "dataset '{}' opened in the reference slot carries role {:?}",
                reference.name(),
                reference.role()
            )));
        }
        if primary.role() != DatasetRole::Primary {
            return Err(DriftError::schema(format!(
                "dataset '{}' opened in the primary slot carries role {:?}",
                primary.name(),
                primary.role()
            )));
        }

        if reference.schema() != primary.schema() {
            return Err(DriftError::schema(
                "reference and primary datasets must share a structurally identical schema",
            ));
        }

        for feature in reference.schema().embedding_features() {
            let ref_dims = reference.vector_dims(&feature.name)?;
            let pri_dims = primary.vector_dims(&feature.name)?;
            if ref_dims != pri_dims {
                return Err(DriftError::dimension_mismatch(
                    &feature.name,
                    ref_dims,
                    pri_dims,
                    None,
                ));
            }
        }

        let pool = match config.performance.num_threads {
            Some(threads) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| {
                        DriftError::internal(format!("failed to build worker pool: {e}"))
                    })?,
            ),
            None => None,
        };

        let id = Uuid::new_v4();
        info!(
            session = %id,
            reference = reference.name(),
            primary = primary.name(),
            "analysis session opened"
        );

        Ok(Self {
            id,
            config,
            pool,
            inner: RwLock::new(Some(SessionInner {
                reference,
                primary,
                artifacts: AHashMap::new(),
            })),
            in_flight: Mutex::new(AHashMap::new()),
        })
    }

    /// Session identifier
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// True until `close` is called
    pub fn is_open(&self) -> bool {
        self.inner.read().is_some()
    }

    /// Run the full pipeline for one embedding feature and cache the result.
    ///
    /// Idempotent: recomputation over unchanged inputs produces an equal
    /// artifact and overwrites the cache slot.
    pub fn compute(&self, feature_name: &str) -> Result<Arc<AnalysisArtifact>> {
        self.compute_cancellable(feature_name, &CancelToken::new())
    }

    /// [`AnalysisSession::compute`] with cooperative cancellation between
    /// pipeline stages. On cancellation no artifact is published.
    pub fn compute_cancellable(
        &self,
        feature_name: &str,
        cancel: &CancelToken,
    ) -> Result<Arc<AnalysisArtifact>> {
        let (reference, primary) = {
            let guard = self.inner.read();
            let inner = guard
                .as_ref()
                .ok_or_else(|| DriftError::session_closed("compute called after close"))?;
            (Arc::clone(&inner.reference), Arc::clone(&inner.primary))
        };

        // At most one computation per feature in flight.
        let feature_guard = {
            let mut map = self.in_flight.lock();
            Arc::clone(map.entry(feature_name.to_string()).or_default())
        };
        let _serialized = feature_guard.lock();

        debug!(session = %self.id, feature = feature_name, "compute started");

        cancel.checkpoint("projection")?;
        let projector = EmbeddingProjector::new(
            self.config.projection.clone(),
            self.config.performance.clone(),
        );
        let projection = self.run_on_pool(|| {
            projector.project(
                feature_name,
                reference.vectors(feature_name)?.view(),
                primary.vectors(feature_name)?.view(),
                self.config.projection.seed,
            )
        })?;

        cancel.checkpoint("clustering")?;
        let analyzer = ClusterAnalyzer::new(self.config.clustering.clone());
        let assignment = self.run_on_pool(|| analyzer.cluster(&projection))?;

        cancel.checkpoint("drift scoring")?;
        let scorer = DriftScorer::new(self.config.drift.clone());
        let drift_results = self.run_on_pool(|| scorer.score(&projection, &assignment));

        cancel.checkpoint("publish")?;
        let artifact = Arc::new(AnalysisArtifact::assemble(
            feature_name,
            &projection,
            &assignment,
            drift_results,
            self.config.clone(),
        ));

        // Publish atomically; a close that raced us wins.
        let mut guard = self.inner.write();
        let inner = guard
            .as_mut()
            .ok_or_else(|| DriftError::session_closed("session closed during compute"))?;
        inner
            .artifacts
            .insert(feature_name.to_string(), Arc::clone(&artifact));

        info!(
            session = %self.id,
            feature = feature_name,
            points = artifact.point_count(),
            clusters = artifact.clusters.len(),
            "artifact published"
        );
        Ok(artifact)
    }

    /// Compute artifacts for every declared embedding feature, independent
    /// features in parallel on the worker pool.
    pub fn compute_all(&self, cancel: &CancelToken) -> Result<Vec<Arc<AnalysisArtifact>>> {
        let features = {
            let guard = self.inner.read();
            let inner = guard
                .as_ref()
                .ok_or_else(|| DriftError::session_closed("compute_all called after close"))?;
            inner.reference.schema().feature_names()
        };

        features
            .par_iter()
            .map(|feature| self.compute_cancellable(feature, cancel))
            .collect()
    }

    /// Run a pipeline stage on the session's worker pool, when one is
    /// configured
    fn run_on_pool<T: Send>(&self, f: impl FnOnce() -> T + Send) -> T {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }

    /// Feature names with a cached artifact
    pub fn list_features(&self) -> Result<Vec<String>> {
        let guard = self.inner.read();
        let inner = guard
            .as_ref()
            .ok_or_else(|| DriftError::session_closed("list_features called after close"))?;
        let mut names: Vec<String> = inner.artifacts.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Cached artifact for a feature, if one has been computed
    pub fn artifact(&self, feature_name: &str) -> Result<Option<Arc<AnalysisArtifact>>> {
        let guard = self.inner.read();
        let inner = guard
            .as_ref()
            .ok_or_else(|| DriftError::session_closed("artifact called after close"))?;
        Ok(inner.artifacts.get(feature_name).cloned())
    }

    /// Row identities in a scope, joined back to the feature's raw-data
    /// column for downstream labeling/re-training workflows. `scope` selects
    /// the whole projection or one cluster; `filter` optionally restricts to
    /// one dataset.
    pub fn export_rows(
        &self,
        feature_name: &str,
        scope: DriftScope,
        filter: Option<DatasetRole>,
    ) -> Result<Vec<ExportedRow>> {
        let guard = self.inner.read();
        let inner = guard
            .as_ref()
            .ok_or_else(|| DriftError::session_closed("export_rows called after close"))?;
        let artifact = inner.artifacts.get(feature_name).ok_or_else(|| {
            DriftError::internal(format!(
                "no artifact cached for feature '{feature_name}'; compute it first"
            ))
        })?;

        let raw_column = inner
            .reference
            .schema()
            .embedding_feature(feature_name)
            .and_then(|f| f.raw_data_column.clone());

        let rows = artifact
            .points
            .iter()
            .filter(|point| match scope {
                DriftScope::Global => true,
                DriftScope::Cluster(id) => point.membership.cluster_id() == Some(id),
            })
            .filter(|point| filter.map_or(true, |role| point.key.role == role))
            .map(|point| {
                let dataset = match point.key.role {
                    DatasetRole::Reference => &inner.reference,
                    DatasetRole::Primary => &inner.primary,
                };
                ExportedRow {
                    key: point.key,
                    raw_data: raw_column
                        .as_deref()
                        .and_then(|column| dataset.cell(point.key.row, column)),
                }
            })
            .collect();

        Ok(rows)
    }

    /// Release datasets and cached artifacts. Terminal and idempotent; any
    /// later compute or query fails with a session-closed error.
    pub fn close(&self) {
        let was_open = self.inner.write().take().is_some();
        if was_open {
            info!(session = %self.id, "analysis session closed");
        }
    }
}
