//! Configuration types and management for driftlens.
//!
//! The analysis pipeline is configuration-driven: projection, clustering,
//! and drift scoring each take their thresholds from here rather than from
//! hard-coded constants. Defaults are chosen to behave reasonably on
//! embedding pools in the tens of thousands of points and are documented
//! per field, since the underlying algorithms do not prescribe them.

use serde::{Deserialize, Serialize};

use crate::core::errors::{DriftError, Result, ResultExt};

/// Main configuration for the driftlens analysis engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriftlensConfig {
    /// Embedding projection settings
    #[serde(default)]
    pub projection: ProjectionConfig,

    /// Density clustering settings
    #[serde(default)]
    pub clustering: ClusteringConfig,

    /// Drift scoring settings
    #[serde(default)]
    pub drift: DriftConfig,

    /// Performance and resource limits
    #[serde(default)]
    pub performance: PerformanceConfig,
}

impl Default for DriftlensConfig {
    fn default() -> Self {
        Self {
            projection: ProjectionConfig::default(),
            clustering: ClusteringConfig::default(),
            drift: DriftConfig::default(),
            performance: PerformanceConfig::default(),
        }
    }
}

impl DriftlensConfig {
    /// Load configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content).context("parsing configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to a YAML string
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("serializing configuration")
    }

    /// Validate the full configuration
    pub fn validate(&self) -> Result<()> {
        self.projection.validate()?;
        self.clustering.validate()?;
        self.drift.validate()?;
        self.performance.validate()?;
        Ok(())
    }
}

/// Configuration for the embedding projection stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProjectionConfig {
    /// Seed for every randomized projection step; identical seed and input
    /// reproduce the layout exactly
    pub seed: u64,

    /// Neighborhood size for the kNN graph. Also the minimum pooled point
    /// count (plus one) the projector will accept.
    pub n_neighbors: usize,

    /// Output dimensionality of the projected space (2 or 3)
    pub output_dims: usize,

    /// Number of layout optimization epochs
    pub n_epochs: usize,

    /// Minimum spacing between points in the layout; larger values spread
    /// clusters apart at the cost of local detail
    pub min_dist: f64,

    /// Learning rate for the layout optimizer
    pub learning_rate: f64,

    /// Negative samples drawn per positive edge during layout
    pub negative_samples: usize,

    /// NN-descent refinement iterations for the approximate kNN graph
    pub graph_iterations: usize,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            n_neighbors: 15,
            output_dims: 2,
            n_epochs: 200,
            min_dist: 0.1,
            learning_rate: 1.0,
            negative_samples: 5,
            graph_iterations: 10,
        }
    }
}

impl ProjectionConfig {
    /// Validate projection parameters
    pub fn validate(&self) -> Result<()> {
        if self.n_neighbors < 2 {
            return Err(DriftError::config_field(
                "n_neighbors must be at least 2",
                "projection.n_neighbors",
            ));
        }
        if !(2..=3).contains(&self.output_dims) {
            return Err(DriftError::config_field(
                "output_dims must be 2 or 3",
                "projection.output_dims",
            ));
        }
        if self.n_epochs == 0 {
            return Err(DriftError::config_field(
                "n_epochs must be positive",
                "projection.n_epochs",
            ));
        }
        if self.min_dist < 0.0 || !self.min_dist.is_finite() {
            return Err(DriftError::config_field(
                "min_dist must be a non-negative finite value",
                "projection.min_dist",
            ));
        }
        if self.learning_rate <= 0.0 || !self.learning_rate.is_finite() {
            return Err(DriftError::config_field(
                "learning_rate must be positive",
                "projection.learning_rate",
            ));
        }
        Ok(())
    }

    /// Minimum pooled point count the projector accepts
    pub fn min_points(&self) -> usize {
        self.n_neighbors + 1
    }
}

/// Configuration for the density clustering stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Smallest group of points reported as a cluster; smaller groups are
    /// folded into the noise bucket
    pub min_cluster_size: usize,

    /// Core-point neighbor threshold for density reachability
    pub min_samples: usize,

    /// Neighborhood radius in projected space. `None` estimates it from the
    /// k-distance curve of the input.
    pub eps: Option<f64>,

    /// Percentile of the k-distance curve used for eps estimation (0..1)
    pub eps_quantile: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: 15,
            min_samples: 5,
            eps: None,
            eps_quantile: 0.90,
        }
    }
}

impl ClusteringConfig {
    /// Validate clustering parameters
    pub fn validate(&self) -> Result<()> {
        if self.min_cluster_size < 2 {
            return Err(DriftError::config_field(
                "min_cluster_size must be at least 2",
                "clustering.min_cluster_size",
            ));
        }
        if self.min_samples == 0 {
            return Err(DriftError::config_field(
                "min_samples must be positive",
                "clustering.min_samples",
            ));
        }
        if let Some(eps) = self.eps {
            if eps <= 0.0 || !eps.is_finite() {
                return Err(DriftError::config_field(
                    "eps must be positive when set",
                    "clustering.eps",
                ));
            }
        }
        if !(0.0..=1.0).contains(&self.eps_quantile) {
            return Err(DriftError::config_field(
                "eps_quantile must be within [0, 1]",
                "clustering.eps_quantile",
            ));
        }
        Ok(())
    }
}

/// Distributional distance statistic used for drift scoring
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriftMetric {
    /// Population stability index
    PopulationStability,
    /// Jensen-Shannon divergence (symmetric, bounded)
    JensenShannon,
}

/// Configuration for the drift scoring stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DriftConfig {
    /// Statistic used to compare reference and primary densities
    pub metric: DriftMetric,

    /// Number of histogram bins per projected axis
    pub bins_per_axis: usize,

    /// Smoothing constant guarding log-of-zero in sparse bins
    pub epsilon: f64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            metric: DriftMetric::PopulationStability,
            bins_per_axis: 10,
            epsilon: 1e-6,
        }
    }
}

impl DriftConfig {
    /// Validate drift scoring parameters
    pub fn validate(&self) -> Result<()> {
        if self.bins_per_axis < 2 {
            return Err(DriftError::config_field(
                "bins_per_axis must be at least 2",
                "drift.bins_per_axis",
            ));
        }
        if self.epsilon <= 0.0 || !self.epsilon.is_finite() {
            return Err(DriftError::config_field(
                "epsilon must be a small positive value",
                "drift.epsilon",
            ));
        }
        Ok(())
    }
}

/// Performance and resource limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Upper bound on pooled vector matrix size in megabytes before the
    /// projector refuses with a resource exhaustion error
    pub max_pool_mb: usize,

    /// Worker threads for parallel stages; `None` uses the rayon default
    pub num_threads: Option<usize>,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_pool_mb: 2048,
            num_threads: None,
        }
    }
}

impl PerformanceConfig {
    /// Validate performance parameters
    pub fn validate(&self) -> Result<()> {
        if self.max_pool_mb == 0 {
            return Err(DriftError::config_field(
                "max_pool_mb must be positive",
                "performance.max_pool_mb",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DriftlensConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = DriftlensConfig::default();
        let yaml = config.to_yaml().unwrap();
        let restored = DriftlensConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config, restored);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
projection:
  n_neighbors: 30
  output_dims: 3
  n_epochs: 200
  min_dist: 0.1
  learning_rate: 1.0
  negative_samples: 5
  graph_iterations: 10
"#;
        let config = DriftlensConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.projection.n_neighbors, 30);
        assert_eq!(config.projection.output_dims, 3);
        assert_eq!(config.clustering, ClusteringConfig::default());
    }

    #[test]
    fn test_invalid_output_dims_rejected() {
        let mut config = DriftlensConfig::default();
        config.projection.output_dims = 5;

        let err = config.validate().unwrap_err();
        assert!(matches!(err, DriftError::Config { .. }));
    }

    #[test]
    fn test_invalid_eps_rejected() {
        let mut config = DriftlensConfig::default();
        config.clustering.eps = Some(-0.5);
        assert!(config.validate().is_err());

        config.clustering.eps = Some(f64::NAN);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_min_points_tracks_neighbors() {
        let config = ProjectionConfig {
            n_neighbors: 20,
            ..ProjectionConfig::default()
        };
        assert_eq!(config.min_points(), 21);
    }

    #[test]
    fn test_drift_metric_serde_names() {
        let yaml = serde_yaml::to_string(&DriftMetric::JensenShannon).unwrap();
        assert!(yaml.contains("jensen_shannon"));
    }
}
