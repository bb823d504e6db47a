//! Computed analysis artifacts.
//!
//! An [`AnalysisArtifact`] is the complete, immutable output of one
//! projection → clustering → drift scoring run for a single embedding
//! feature: a coordinate and cluster membership per pooled row, cluster
//! summaries, and the drift results with the ranked degradation view. It is
//! serde-serializable so UI/export collaborators can ship it in whatever
//! format they choose; [`AnalysisArtifact::to_json`] is the convenience path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::clustering::{ClusterAssignment, ClusterSummary, Membership};
use crate::analysis::drift::{rank_clusters, DriftResult, DriftScope};
use crate::analysis::projection::{PointKey, Projection};
use crate::core::config::DriftlensConfig;
use crate::core::errors::{Result, ResultExt};

/// One projected point: identity, coordinate, and cluster membership
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedPoint {
    /// Source dataset and row identity
    pub key: PointKey,
    /// Low-dimensional coordinate
    pub coordinate: Vec<f64>,
    /// Cluster membership (or noise)
    pub membership: Membership,
}

/// Immutable artifact of one analysis run for one embedding feature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisArtifact {
    /// Embedding feature this artifact was computed for
    pub feature_name: String,

    /// Seed the projection ran with
    pub seed: u64,

    /// When the computation finished
    pub computed_at: DateTime<Utc>,

    /// Projected points with cluster membership, in pooled order
    /// (reference rows first, then primary rows)
    pub points: Vec<ProjectedPoint>,

    /// Cluster summaries ordered by id (decreasing size)
    pub clusters: Vec<ClusterSummary>,

    /// Number of noise points
    pub noise_count: usize,

    /// Drift over the whole projection
    pub global_drift: DriftResult,

    /// Cluster drift results, ranked by descending magnitude
    pub ranked_drift: Vec<DriftResult>,

    /// Configuration snapshot the run used
    pub config: DriftlensConfig,
}

impl AnalysisArtifact {
    /// Assemble an artifact from the three stage outputs
    pub(crate) fn assemble(
        feature_name: impl Into<String>,
        projection: &Projection,
        assignment: &ClusterAssignment,
        drift_results: Vec<DriftResult>,
        config: DriftlensConfig,
    ) -> Self {
        let points: Vec<ProjectedPoint> = projection
            .keys()
            .iter()
            .enumerate()
            .map(|(i, &key)| ProjectedPoint {
                key,
                coordinate: projection.coordinate(i).to_vec(),
                membership: assignment.membership(i),
            })
            .collect();

        let global_drift = drift_results
            .iter()
            .find(|r| r.scope == DriftScope::Global)
            .cloned()
            .unwrap_or(DriftResult {
                scope: DriftScope::Global,
                value: crate::analysis::drift::DriftValue::Undefined,
                count_reference: 0,
                count_primary: 0,
            });

        Self {
            feature_name: feature_name.into(),
            seed: config.projection.seed,
            computed_at: Utc::now(),
            points,
            clusters: assignment.clusters().to_vec(),
            noise_count: assignment.noise_count(),
            global_drift,
            ranked_drift: rank_clusters(&drift_results),
            config,
        }
    }

    /// Number of projected points
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// The most drift-responsible cluster, if any cluster was scored
    pub fn top_drift(&self) -> Option<&DriftResult> {
        self.ranked_drift.first()
    }

    /// Serialize the artifact to a JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("serializing analysis artifact")
    }

    /// Result-equality ignoring the computation timestamp; used to verify
    /// that recomputation over unchanged inputs is idempotent.
    pub fn same_results(&self, other: &Self) -> bool {
        self.feature_name == other.feature_name
            && self.seed == other.seed
            && self.points == other.points
            && self.clusters == other.clusters
            && self.noise_count == other.noise_count
            && self.global_drift == other.global_drift
            && self.ranked_drift == other.ranked_drift
            && self.config == other.config
    }
}
