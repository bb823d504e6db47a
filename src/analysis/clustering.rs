//! Density-based clustering of projected points.
//!
//! Clusters are discovered with DBSCAN over the low-dimensional projection:
//! cluster count is not specified in advance, non-convex shapes are
//! supported, and points in low-density regions land in an explicit noise
//! bucket instead of being forced into a cluster. Region queries go through
//! a uniform grid index sized to the neighborhood radius, so no pairwise
//! distance matrix is ever materialized.
//!
//! The neighborhood radius can be configured directly; when it is not, it is
//! estimated from the k-distance curve of the input. Cluster ids are
//! assigned in decreasing order of cluster size (ties broken by smallest
//! member index) so repeated runs over identical input label identically.

use ahash::AHashMap;
use ndarray::ArrayView2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::projection::{PointKey, Projection};
use crate::core::config::ClusteringConfig;
use crate::core::dataset::DatasetRole;
use crate::core::errors::{DriftError, Result};

/// Identifier of a discovered cluster; `0` is the largest cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterId(pub usize);

/// Cluster membership of one projected point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Membership {
    /// Member of the identified cluster
    Cluster(ClusterId),
    /// Low-density point outside every cluster
    Noise,
}

impl Membership {
    /// Cluster id if this point is clustered
    pub fn cluster_id(&self) -> Option<ClusterId> {
        match self {
            Self::Cluster(id) => Some(*id),
            Self::Noise => None,
        }
    }
}

/// Population counts of one cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSummary {
    /// Cluster identifier
    pub id: ClusterId,
    /// Total member count
    pub size: usize,
    /// Members drawn from the reference dataset
    pub count_reference: usize,
    /// Members drawn from the primary dataset
    pub count_primary: usize,
}

/// Complete cluster assignment over a projection: every point is a member of
/// exactly one cluster or of the noise bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    memberships: Vec<Membership>,
    clusters: Vec<ClusterSummary>,
    noise_count: usize,
    /// Neighborhood radius actually used (configured or estimated)
    pub eps: f64,
}

impl ClusterAssignment {
    /// Membership per point, aligned to the projection's pooled order
    pub fn memberships(&self) -> &[Membership] {
        &self.memberships
    }

    /// Cluster summaries ordered by id (i.e. by decreasing size)
    pub fn clusters(&self) -> &[ClusterSummary] {
        &self.clusters
    }

    /// Membership of the point at pooled index `i`
    pub fn membership(&self, i: usize) -> Membership {
        self.memberships[i]
    }

    /// Number of noise points
    pub fn noise_count(&self) -> usize {
        self.noise_count
    }

    /// Pooled indexes of one cluster's members
    pub fn members(&self, id: ClusterId) -> Vec<usize> {
        self.memberships
            .iter()
            .enumerate()
            .filter(|(_, m)| m.cluster_id() == Some(id))
            .map(|(i, _)| i)
            .collect()
    }
}

/// Partitions projected points into density-based clusters.
#[derive(Debug, Clone)]
pub struct ClusterAnalyzer {
    config: ClusteringConfig,
}

impl ClusterAnalyzer {
    /// Create an analyzer with the given configuration
    pub fn new(config: ClusteringConfig) -> Self {
        Self { config }
    }

    /// Cluster a projection's points.
    ///
    /// Fails with `InsufficientData` when fewer than one minimum cluster
    /// size's worth of points are present.
    pub fn cluster(&self, projection: &Projection) -> Result<ClusterAssignment> {
        let n = projection.len();
        if n < self.config.min_cluster_size {
            return Err(DriftError::insufficient_data(
                "clustering",
                n,
                self.config.min_cluster_size,
            ));
        }

        let coords = projection.coordinates();
        let eps = match self.config.eps {
            Some(eps) => eps,
            None => estimate_eps(coords, self.config.min_samples, self.config.eps_quantile),
        };
        debug!(points = n, eps, "running density clustering");

        let raw_labels = dbscan(coords, eps, self.config.min_samples);
        Ok(self.relabel(projection.keys(), raw_labels, eps))
    }

    /// Fold undersized clusters into noise and relabel by decreasing size
    fn relabel(
        &self,
        keys: &[PointKey],
        raw_labels: Vec<Option<usize>>,
        eps: f64,
    ) -> ClusterAssignment {
        // size + smallest member index per raw label
        let mut stats: AHashMap<usize, (usize, usize)> = AHashMap::new();
        for (i, label) in raw_labels.iter().enumerate() {
            if let Some(raw) = label {
                let entry = stats.entry(*raw).or_insert((0, i));
                entry.0 += 1;
            }
        }

        let mut order: Vec<(usize, usize, usize)> = stats
            .iter()
            .filter(|(_, (size, _))| *size >= self.config.min_cluster_size)
            .map(|(&raw, &(size, first))| (raw, size, first))
            .collect();
        order.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

        let remap: AHashMap<usize, ClusterId> = order
            .iter()
            .enumerate()
            .map(|(new, &(raw, _, _))| (raw, ClusterId(new)))
            .collect();

        let memberships: Vec<Membership> = raw_labels
            .iter()
            .map(|label| match label.and_then(|raw| remap.get(&raw)) {
                Some(&id) => Membership::Cluster(id),
                None => Membership::Noise,
            })
            .collect();

        let mut clusters: Vec<ClusterSummary> = order
            .iter()
            .map(|&(raw, size, _)| {
                let id = remap[&raw];
                ClusterSummary {
                    id,
                    size,
                    count_reference: 0,
                    count_primary: 0,
                }
            })
            .collect();

        for (i, membership) in memberships.iter().enumerate() {
            if let Some(id) = membership.cluster_id() {
                let summary = &mut clusters[id.0];
                match keys[i].role {
                    DatasetRole::Reference => summary.count_reference += 1,
                    DatasetRole::Primary => summary.count_primary += 1,
                }
            }
        }

        let noise_count = memberships
            .iter()
            .filter(|m| matches!(m, Membership::Noise))
            .count();

        debug!(
            clusters = clusters.len(),
            noise = noise_count,
            "clustering complete"
        );

        ClusterAssignment {
            memberships,
            clusters,
            noise_count,
            eps,
        }
    }
}

/// Uniform grid over the projected space with cell size `eps`. A point's
/// eps-neighborhood is fully contained in its own and adjacent cells.
struct GridIndex {
    cells: AHashMap<Vec<i64>, Vec<usize>>,
    eps: f64,
    dims: usize,
}

impl GridIndex {
    fn build(coords: ArrayView2<'_, f64>, eps: f64) -> Self {
        let dims = coords.ncols();
        let mut cells: AHashMap<Vec<i64>, Vec<usize>> = AHashMap::new();
        for i in 0..coords.nrows() {
            let key: Vec<i64> = (0..dims)
                .map(|d| (coords[(i, d)] / eps).floor() as i64)
                .collect();
            cells.entry(key).or_default().push(i);
        }
        Self { cells, eps, dims }
    }

    /// Indexes of all points within `eps` of point `i`, including `i` itself
    fn neighbors(&self, coords: ArrayView2<'_, f64>, i: usize) -> Vec<usize> {
        let base: Vec<i64> = (0..self.dims)
            .map(|d| (coords[(i, d)] / self.eps).floor() as i64)
            .collect();
        let eps_sq = self.eps * self.eps;

        let mut result = Vec::new();
        let mut offsets = vec![-1i64; self.dims];
        loop {
            let key: Vec<i64> = base
                .iter()
                .zip(offsets.iter())
                .map(|(b, o)| b + o)
                .collect();
            if let Some(cell) = self.cells.get(&key) {
                for &j in cell {
                    let dist_sq: f64 = (0..self.dims)
                        .map(|d| (coords[(i, d)] - coords[(j, d)]).powi(2))
                        .sum();
                    if dist_sq <= eps_sq {
                        result.push(j);
                    }
                }
            }

            // Advance the offset odometer over {-1, 0, 1}^dims.
            let mut carry = 0;
            loop {
                if carry == self.dims {
                    result.sort_unstable();
                    return result;
                }
                offsets[carry] += 1;
                if offsets[carry] > 1 {
                    offsets[carry] = -1;
                    carry += 1;
                } else {
                    break;
                }
            }
        }
    }
}

/// Classic DBSCAN with breadth-first cluster expansion; sequential so labels
/// depend only on the input.
fn dbscan(coords: ArrayView2<'_, f64>, eps: f64, min_samples: usize) -> Vec<Option<usize>> {
    let n = coords.nrows();
    let index = GridIndex::build(coords, eps);

    let mut labels: Vec<Option<usize>> = vec![None; n];
    let mut visited = vec![false; n];
    let mut next_label = 0;

    for i in 0..n {
        if visited[i] {
            continue;
        }
        visited[i] = true;

        let neighborhood = index.neighbors(coords, i);
        if neighborhood.len() < min_samples {
            continue; // stays noise unless later reached from a core point
        }

        let label = next_label;
        next_label += 1;
        labels[i] = Some(label);

        let mut frontier: std::collections::VecDeque<usize> = neighborhood.into();
        while let Some(j) = frontier.pop_front() {
            if labels[j].is_none() {
                labels[j] = Some(label);
            }
            if visited[j] {
                continue;
            }
            visited[j] = true;

            let reachable = index.neighbors(coords, j);
            if reachable.len() >= min_samples {
                for r in reachable {
                    if !visited[r] || labels[r].is_none() {
                        frontier.push_back(r);
                    }
                }
            }
        }
    }

    labels
}

/// Estimate the neighborhood radius from the k-distance curve.
///
/// Computes each sampled point's distance to its k-th nearest neighbor and
/// takes the configured quantile. A stride sample bounds the cost on large
/// pools while staying deterministic.
fn estimate_eps(coords: ArrayView2<'_, f64>, k: usize, quantile: f64) -> f64 {
    let n = coords.nrows();
    const MAX_SAMPLE: usize = 1024;
    let stride = (n / MAX_SAMPLE).max(1);
    let sample: Vec<usize> = (0..n).step_by(stride).collect();

    let mut k_distances: Vec<f64> = sample
        .par_iter()
        .map(|&i| {
            let mut dists: Vec<f64> = (0..n)
                .filter(|&j| j != i)
                .map(|j| {
                    (0..coords.ncols())
                        .map(|d| (coords[(i, d)] - coords[(j, d)]).powi(2))
                        .sum::<f64>()
                })
                .collect();
            let kth = k.min(dists.len().saturating_sub(1));
            dists.select_nth_unstable_by(kth, |a, b| {
                a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)
            });
            dists[kth].sqrt()
        })
        .collect();

    k_distances.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = ((k_distances.len() - 1) as f64 * quantile).round() as usize;
    let eps = k_distances[idx];

    // Degenerate inputs (all points identical) still need a usable radius.
    if eps <= 0.0 || !eps.is_finite() {
        1e-3
    } else {
        eps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Build a projection-shaped fixture directly from coordinates.
    fn projection_from(coords: Array2<f64>, n_ref: usize) -> Projection {
        let n = coords.nrows();
        let keys: Vec<PointKey> = (0..n_ref)
            .map(PointKey::reference)
            .chain((0..n - n_ref).map(PointKey::primary))
            .collect();
        Projection::from_parts(keys, coords)
    }

    fn blob(center: (f64, f64), count: usize, spread: f64, seed: u64) -> Vec<(f64, f64)> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| {
                (
                    center.0 + rng.gen_range(-spread..spread),
                    center.1 + rng.gen_range(-spread..spread),
                )
            })
            .collect()
    }

    fn coords_of(points: &[(f64, f64)]) -> Array2<f64> {
        let mut coords = Array2::zeros((points.len(), 2));
        for (i, &(x, y)) in points.iter().enumerate() {
            coords[(i, 0)] = x;
            coords[(i, 1)] = y;
        }
        coords
    }

    fn analyzer() -> ClusterAnalyzer {
        ClusterAnalyzer::new(ClusteringConfig {
            min_cluster_size: 10,
            min_samples: 4,
            eps: Some(0.6),
            ..ClusteringConfig::default()
        })
    }

    #[test]
    fn test_two_blobs_two_clusters() {
        let mut points = blob((0.0, 0.0), 50, 1.0, 1);
        points.extend(blob((10.0, 10.0), 30, 1.0, 2));
        let projection = projection_from(coords_of(&points), 40);

        let assignment = analyzer().cluster(&projection).unwrap();
        assert_eq!(assignment.clusters().len(), 2);

        // Largest cluster gets id 0.
        assert_eq!(assignment.clusters()[0].size, 50);
        assert_eq!(assignment.clusters()[1].size, 30);
        assert_eq!(assignment.clusters()[0].id, ClusterId(0));
    }

    #[test]
    fn test_isolated_points_are_noise() {
        let mut points = blob((0.0, 0.0), 40, 1.0, 3);
        points.push((100.0, 100.0));
        points.push((-100.0, 50.0));
        let projection = projection_from(coords_of(&points), 42);

        let assignment = analyzer().cluster(&projection).unwrap();
        assert_eq!(assignment.noise_count(), 2);
        assert_eq!(assignment.membership(40), Membership::Noise);
        assert_eq!(assignment.membership(41), Membership::Noise);
    }

    #[test]
    fn test_undersized_groups_fold_into_noise() {
        let mut points = blob((0.0, 0.0), 40, 1.0, 4);
        // A tight clump below min_cluster_size.
        points.extend(blob((50.0, 50.0), 5, 0.2, 5));
        let projection = projection_from(coords_of(&points), 45);

        let assignment = analyzer().cluster(&projection).unwrap();
        assert_eq!(assignment.clusters().len(), 1);
        assert_eq!(assignment.noise_count(), 5);
    }

    #[test]
    fn test_insufficient_data() {
        let points = blob((0.0, 0.0), 5, 1.0, 6);
        let projection = projection_from(coords_of(&points), 5);

        let err = analyzer().cluster(&projection).unwrap_err();
        assert!(matches!(err, DriftError::InsufficientData { .. }));
    }

    #[test]
    fn test_population_counts_split_by_role() {
        let mut points = blob((0.0, 0.0), 20, 0.3, 7);
        points.extend(blob((0.5, 0.5), 15, 0.3, 8));
        // Single blob overall: 20 reference rows then 15 primary rows.
        let projection = projection_from(coords_of(&points), 20);

        let assignment = analyzer().cluster(&projection).unwrap();
        assert_eq!(assignment.clusters().len(), 1);
        let summary = &assignment.clusters()[0];
        assert_eq!(summary.count_reference, 20);
        assert_eq!(summary.count_primary, 15);
        assert_eq!(summary.size, 35);
    }

    #[test]
    fn test_eps_estimation_runs_without_config() {
        let analyzer = ClusterAnalyzer::new(ClusteringConfig {
            min_cluster_size: 10,
            min_samples: 4,
            eps: None,
            ..ClusteringConfig::default()
        });
        let mut points = blob((0.0, 0.0), 60, 1.0, 9);
        points.extend(blob((30.0, 30.0), 40, 1.0, 10));
        let projection = projection_from(coords_of(&points), 60);

        let assignment = analyzer.cluster(&projection).unwrap();
        assert!(assignment.eps > 0.0);
        assert!(assignment.clusters().len() >= 2);
    }

    #[test]
    fn test_determinism() {
        let mut points = blob((0.0, 0.0), 50, 1.0, 11);
        points.extend(blob((8.0, 8.0), 50, 1.0, 12));
        let projection = projection_from(coords_of(&points), 50);

        let first = analyzer().cluster(&projection).unwrap();
        let second = analyzer().cluster(&projection).unwrap();
        assert_eq!(first, second);
    }

    proptest! {
        /// Every point lands in exactly one cluster or in noise, never
        /// omitted: the assignment is a partition of the point set.
        #[test]
        fn prop_assignment_is_partition(
            xs in proptest::collection::vec((-50.0f64..50.0, -50.0f64..50.0), 15..120)
        ) {
            let projection = projection_from(coords_of(&xs), xs.len() / 2);
            let analyzer = ClusterAnalyzer::new(ClusteringConfig {
                min_cluster_size: 5,
                min_samples: 3,
                eps: Some(2.0),
                ..ClusteringConfig::default()
            });

            let assignment = analyzer.cluster(&projection).unwrap();
            prop_assert_eq!(assignment.memberships().len(), xs.len());

            let clustered: usize = assignment.clusters().iter().map(|c| c.size).sum();
            prop_assert_eq!(clustered + assignment.noise_count(), xs.len());

            // Per-cluster member lists are disjoint and sized consistently.
            let mut seen = vec![false; xs.len()];
            for cluster in assignment.clusters() {
                let members = assignment.members(cluster.id);
                prop_assert_eq!(members.len(), cluster.size);
                for m in members {
                    prop_assert!(!seen[m]);
                    seen[m] = true;
                }
            }
        }
    }
}
