//! Joint low-dimensional projection of embedding vectors.
//!
//! Reference and primary vectors are pooled and fit together into one shared
//! coordinate space; fitting the two populations separately would make
//! spatial comparison between them meaningless, so the pooled fit is the
//! contract here, not an optimization. The reduction is a
//! neighborhood-preserving nonlinear layout in the UMAP family: an
//! approximate kNN graph built with NN-descent (never a full pairwise
//! distance matrix), converted to symmetric affinity weights, then optimized
//! with stochastic gradient descent.
//!
//! Determinism: every randomized step draws from a single `StdRng` seeded by
//! the caller, candidate scoring is a pure parallel map, and the layout loop
//! runs sequentially, so identical seed and input produce bitwise identical
//! coordinates. Across *different* seeds the layout is locally
//! non-deterministic, which is inherent to the algorithm.

use ahash::AHashSet;
use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::config::{PerformanceConfig, ProjectionConfig};
use crate::core::dataset::{DatasetRole, RowId};
use crate::core::errors::{DriftError, Result};

/// Identity of a projected point across the pooled dataset pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PointKey {
    /// Which dataset the point came from
    pub role: DatasetRole,
    /// Row identity within that dataset
    pub row: RowId,
}

impl PointKey {
    /// Key for a reference-dataset row
    pub fn reference(row: usize) -> Self {
        Self {
            role: DatasetRole::Reference,
            row: RowId(row),
        }
    }

    /// Key for a primary-dataset row
    pub fn primary(row: usize) -> Self {
        Self {
            role: DatasetRole::Primary,
            row: RowId(row),
        }
    }
}

/// Output of a joint projection: one low-dimensional coordinate per pooled
/// row, tagged by source dataset. Row order is all reference rows followed
/// by all primary rows.
#[derive(Debug, Clone)]
pub struct Projection {
    keys: Vec<PointKey>,
    coordinates: Array2<f64>,
}

impl Projection {
    /// Assemble a projection from aligned keys and coordinates
    pub(crate) fn from_parts(keys: Vec<PointKey>, coordinates: Array2<f64>) -> Self {
        debug_assert_eq!(keys.len(), coordinates.nrows());
        Self { keys, coordinates }
    }

    /// Number of projected points
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when the projection holds no points
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Output dimensionality
    pub fn dims(&self) -> usize {
        self.coordinates.ncols()
    }

    /// Point keys aligned to coordinate rows
    pub fn keys(&self) -> &[PointKey] {
        &self.keys
    }

    /// Coordinate matrix, rows aligned to [`Projection::keys`]
    pub fn coordinates(&self) -> ArrayView2<'_, f64> {
        self.coordinates.view()
    }

    /// Coordinate of the point at pooled index `i`
    pub fn coordinate(&self, i: usize) -> ArrayView1<'_, f64> {
        self.coordinates.row(i)
    }
}

/// Projects pooled embedding vectors into a low-dimensional space.
#[derive(Debug, Clone)]
pub struct EmbeddingProjector {
    config: ProjectionConfig,
    performance: PerformanceConfig,
}

/// Pool size below which exact brute-force kNN is cheaper than NN-descent
const BRUTE_FORCE_LIMIT: usize = 2048;

/// Gradient clamp keeping single SGD steps bounded
const GRAD_CLIP: f64 = 4.0;

impl EmbeddingProjector {
    /// Create a projector with the given configuration
    pub fn new(config: ProjectionConfig, performance: PerformanceConfig) -> Self {
        Self {
            config,
            performance,
        }
    }

    /// Project reference and primary vectors jointly into one shared space.
    ///
    /// `feature` is only used to label errors. Fails with
    /// `DimensionMismatch` when the two matrices disagree on vector width,
    /// `InsufficientData` when the pooled count is below
    /// `n_neighbors + 1`, and `ResourceExhausted` when the pooled matrix
    /// would exceed the configured memory budget.
    pub fn project(
        &self,
        feature: &str,
        reference: ArrayView2<'_, f64>,
        primary: ArrayView2<'_, f64>,
        seed: u64,
    ) -> Result<Projection> {
        if reference.ncols() != primary.ncols() {
            return Err(DriftError::dimension_mismatch(
                feature,
                reference.ncols(),
                primary.ncols(),
                None,
            ));
        }

        let n_ref = reference.nrows();
        let n_pri = primary.nrows();
        let n = n_ref + n_pri;
        let min_points = self.config.min_points();
        if n < min_points {
            return Err(DriftError::insufficient_data("projection", n, min_points));
        }

        self.check_pool_budget(n, reference.ncols())?;

        // Pool: reference rows first, then primary rows.
        let dims = reference.ncols();
        let mut pooled = Array2::zeros((n, dims));
        pooled.slice_mut(ndarray::s![..n_ref, ..]).assign(&reference);
        pooled.slice_mut(ndarray::s![n_ref.., ..]).assign(&primary);

        let keys: Vec<PointKey> = (0..n_ref)
            .map(PointKey::reference)
            .chain((0..n_pri).map(PointKey::primary))
            .collect();

        let mut rng = StdRng::seed_from_u64(seed);

        debug!(feature, points = n, dims, "building kNN graph");
        let k = self.config.n_neighbors.min(n - 1);
        let neighbors = if n <= BRUTE_FORCE_LIMIT {
            brute_force_knn(pooled.view(), k)
        } else {
            nn_descent(pooled.view(), k, self.config.graph_iterations, &mut rng)
        };

        debug!(feature, "computing affinity weights");
        let edges = affinity_edges(&neighbors);

        debug!(feature, edges = edges.len(), "optimizing layout");
        let coordinates = self.optimize_layout(n, &edges, &mut rng);

        Ok(Projection { keys, coordinates })
    }

    /// Refuse pools whose dense working set exceeds the configured budget
    fn check_pool_budget(&self, rows: usize, dims: usize) -> Result<()> {
        let pool_bytes = rows * dims * std::mem::size_of::<f64>();
        let graph_bytes = rows * self.config.n_neighbors * 16;
        let budget = self.performance.max_pool_mb * 1024 * 1024;
        if pool_bytes + graph_bytes > budget {
            return Err(DriftError::ResourceExhausted {
                message: format!(
                    "pooled vector matrix of {rows} x {dims} needs {} MB",
                    (pool_bytes + graph_bytes) / (1024 * 1024)
                ),
                resource: "memory".to_string(),
                limit: Some(format!("{} MB", self.performance.max_pool_mb)),
            });
        }
        Ok(())
    }

    /// Stochastic gradient descent over the affinity edges.
    ///
    /// Sequential on purpose: the per-edge updates share coordinate state,
    /// and running them on a worker pool would make the result depend on
    /// scheduling rather than on the seed.
    fn optimize_layout(&self, n: usize, edges: &[AffinityEdge], rng: &mut StdRng) -> Array2<f64> {
        let dims = self.config.output_dims;
        let (a, b) = fit_curve_params(self.config.min_dist);

        let mut coords = Array2::zeros((n, dims));
        for value in coords.iter_mut() {
            *value = rng.gen_range(-10.0..10.0);
        }

        let max_weight = edges
            .iter()
            .map(|e| e.weight)
            .fold(f64::MIN, f64::max)
            .max(f64::EPSILON);

        for epoch in 0..self.config.n_epochs {
            let alpha =
                self.config.learning_rate * (1.0 - epoch as f64 / self.config.n_epochs as f64);

            for edge in edges {
                // Stronger edges are applied in more epochs, mirroring the
                // epochs-per-sample schedule of UMAP-family layouts.
                if rng.gen::<f64>() > edge.weight / max_weight {
                    continue;
                }

                apply_attraction(&mut coords, edge.i, edge.j, a, b, alpha);

                for _ in 0..self.config.negative_samples {
                    let other = rng.gen_range(0..n);
                    if other == edge.i || other == edge.j {
                        continue;
                    }
                    apply_repulsion(&mut coords, edge.i, other, a, b, alpha);
                }
            }
        }

        coords
    }
}

/// One symmetric affinity edge of the neighborhood graph
struct AffinityEdge {
    i: usize,
    j: usize,
    weight: f64,
}

/// Exact kNN for small pools; distances evaluated in parallel per query row
fn brute_force_knn(pooled: ArrayView2<'_, f64>, k: usize) -> Vec<Vec<(usize, f64)>> {
    let n = pooled.nrows();
    (0..n)
        .into_par_iter()
        .map(|i| {
            let mut candidates: Vec<(usize, f64)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| (j, squared_distance(pooled.row(i), pooled.row(j))))
                .collect();
            candidates
                .sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
            candidates.truncate(k);
            candidates
        })
        .collect()
}

/// Approximate kNN graph by NN-descent: initialize with random neighbors,
/// then repeatedly promote neighbors-of-neighbors that are closer. Candidate
/// generation is sequential (it consumes the seeded RNG); candidate scoring
/// per node is a pure parallel map, so the result is seed-deterministic.
fn nn_descent(
    pooled: ArrayView2<'_, f64>,
    k: usize,
    iterations: usize,
    rng: &mut StdRng,
) -> Vec<Vec<(usize, f64)>> {
    let n = pooled.nrows();

    // Random initialization.
    let mut neighbors: Vec<Vec<(usize, f64)>> = Vec::with_capacity(n);
    for i in 0..n {
        let mut picked = AHashSet::with_capacity(k);
        while picked.len() < k {
            let j = rng.gen_range(0..n);
            if j != i {
                picked.insert(j);
            }
        }
        let mut list: Vec<(usize, f64)> = picked
            .into_iter()
            .map(|j| (j, squared_distance(pooled.row(i), pooled.row(j))))
            .collect();
        list.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        neighbors.push(list);
    }

    for iteration in 0..iterations {
        // Forward + reverse neighborhood per node, assembled sequentially.
        let mut candidates: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, list) in neighbors.iter().enumerate() {
            for &(j, _) in list {
                candidates[i].push(j);
                candidates[j].push(i);
            }
        }

        // Score candidate unions in parallel; pure per-node computation.
        let updated: Vec<Vec<(usize, f64)>> = (0..n)
            .into_par_iter()
            .map(|i| {
                let mut pool: AHashSet<usize> = AHashSet::new();
                for &c in &candidates[i] {
                    pool.insert(c);
                    // Neighbors of my neighbors are likely my neighbors.
                    for &(jj, _) in &neighbors[c] {
                        if jj != i {
                            pool.insert(jj);
                        }
                    }
                }
                pool.remove(&i);

                let mut list: Vec<(usize, f64)> = pool
                    .into_iter()
                    .map(|j| (j, squared_distance(pooled.row(i), pooled.row(j))))
                    .collect();
                list.sort_by(|a, b| {
                    a.1.partial_cmp(&b.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.0.cmp(&b.0))
                });
                list.truncate(k);
                list
            })
            .collect();

        let changes: usize = neighbors
            .iter()
            .zip(updated.iter())
            .map(|(old, new)| {
                let old_ids: AHashSet<usize> = old.iter().map(|&(j, _)| j).collect();
                new.iter().filter(|(j, _)| !old_ids.contains(j)).count()
            })
            .sum();

        neighbors = updated;

        let change_rate = changes as f64 / (n * k) as f64;
        debug!(iteration, change_rate, "nn-descent iteration");
        if change_rate < 0.001 {
            break;
        }
    }

    neighbors
}

/// Convert raw kNN distances into symmetric affinity edges.
///
/// Per node, distances are rescaled against the nearest-neighbor distance
/// (local connectivity) and a smooth bandwidth chosen so the neighbor
/// weights sum to roughly log2(k). Directed weights are then symmetrized
/// with the probabilistic union w + w' - w*w'.
fn affinity_edges(neighbors: &[Vec<(usize, f64)>]) -> Vec<AffinityEdge> {
    let n = neighbors.len();

    let directed: Vec<Vec<(usize, f64)>> = neighbors
        .par_iter()
        .map(|list| {
            if list.is_empty() {
                return Vec::new();
            }
            let rho = list
                .iter()
                .map(|&(_, d)| d.sqrt())
                .filter(|&d| d > 0.0)
                .fold(f64::INFINITY, f64::min);
            let rho = if rho.is_finite() { rho } else { 0.0 };
            let sigma = smooth_bandwidth(list, rho);

            list.iter()
                .map(|&(j, d)| {
                    let dist = d.sqrt();
                    let weight = if dist <= rho {
                        1.0
                    } else {
                        (-(dist - rho) / sigma).exp()
                    };
                    (j, weight)
                })
                .collect()
        })
        .collect();

    // Symmetrize into an undirected edge list with i < j.
    let mut weight_of: ahash::AHashMap<(usize, usize), (f64, f64)> = ahash::AHashMap::new();
    for (i, list) in directed.iter().enumerate() {
        for &(j, w) in list {
            let (lo, hi) = if i < j { (i, j) } else { (j, i) };
            let entry = weight_of.entry((lo, hi)).or_insert((0.0, 0.0));
            if i < j {
                entry.0 = entry.0.max(w);
            } else {
                entry.1 = entry.1.max(w);
            }
        }
    }

    let mut edges: Vec<AffinityEdge> = weight_of
        .into_iter()
        .map(|((i, j), (w_ij, w_ji))| AffinityEdge {
            i,
            j,
            weight: w_ij + w_ji - w_ij * w_ji,
        })
        .collect();

    // Fixed edge order keeps the layout loop deterministic.
    edges.sort_by(|a, b| (a.i, a.j).cmp(&(b.i, b.j)));
    debug_assert!(edges.iter().all(|e| e.i < e.j && e.i < n));
    edges
}

/// Binary search for the bandwidth making neighbor weights sum to log2(k)
fn smooth_bandwidth(list: &[(usize, f64)], rho: f64) -> f64 {
    let target = (list.len() as f64).log2().max(1.0);
    let mut lo = 1e-4;
    let mut hi = 1e4;
    let mut sigma = 1.0;

    for _ in 0..64 {
        sigma = 0.5 * (lo + hi);
        let sum: f64 = list
            .iter()
            .map(|&(_, d)| {
                let dist = d.sqrt();
                if dist <= rho {
                    1.0
                } else {
                    (-(dist - rho) / sigma).exp()
                }
            })
            .sum();
        if (sum - target).abs() < 1e-5 {
            break;
        }
        if sum > target {
            hi = sigma;
        } else {
            lo = sigma;
        }
    }
    sigma.max(1e-4)
}

/// Fit the attraction curve 1 / (1 + a * x^(2b)) to the min_dist profile.
///
/// Coarse grid search followed by local refinement; deterministic and close
/// enough to the reference least-squares fit for layout purposes.
fn fit_curve_params(min_dist: f64) -> (f64, f64) {
    let xs: Vec<f64> = (1..=300).map(|i| i as f64 * 3.0 / 300.0).collect();
    let target = |x: f64| {
        if x <= min_dist {
            1.0
        } else {
            (-(x - min_dist)).exp()
        }
    };

    let mut best = (1.577, 0.895);
    let mut best_err = f64::INFINITY;
    let mut a = 0.1;
    while a <= 10.0 {
        let mut b = 0.2;
        while b <= 2.0 {
            let err: f64 = xs
                .iter()
                .map(|&x| {
                    let fitted = 1.0 / (1.0 + a * x.powf(2.0 * b));
                    (fitted - target(x)).powi(2)
                })
                .sum();
            if err < best_err {
                best_err = err;
                best = (a, b);
            }
            b += 0.01;
        }
        a += 0.05;
    }
    best
}

/// Pull edge endpoints together along the fitted attraction curve
fn apply_attraction(coords: &mut Array2<f64>, i: usize, j: usize, a: f64, b: f64, alpha: f64) {
    let dims = coords.ncols();
    let dist_sq: f64 = (0..dims)
        .map(|d| (coords[(i, d)] - coords[(j, d)]).powi(2))
        .sum();
    if dist_sq <= 0.0 {
        return;
    }

    let coeff = (-2.0 * a * b * dist_sq.powf(b - 1.0)) / (1.0 + a * dist_sq.powf(b));
    for d in 0..dims {
        let grad = (coeff * (coords[(i, d)] - coords[(j, d)])).clamp(-GRAD_CLIP, GRAD_CLIP);
        coords[(i, d)] += alpha * grad;
        coords[(j, d)] -= alpha * grad;
    }
}

/// Push a sampled non-neighbor away from an edge endpoint
fn apply_repulsion(coords: &mut Array2<f64>, i: usize, other: usize, a: f64, b: f64, alpha: f64) {
    let dims = coords.ncols();
    let dist_sq: f64 = (0..dims)
        .map(|d| (coords[(i, d)] - coords[(other, d)]).powi(2))
        .sum();

    let coeff = (2.0 * b) / ((0.001 + dist_sq) * (1.0 + a * dist_sq.powf(b)));
    for d in 0..dims {
        let grad = (coeff * (coords[(i, d)] - coords[(other, d)])).clamp(-GRAD_CLIP, GRAD_CLIP);
        coords[(i, d)] += alpha * grad;
    }
}

#[inline]
fn squared_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}
