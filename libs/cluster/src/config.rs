//! Simulator configuration

/// Configuration for a simulated cluster
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Number of nodes created by `initialize`
    ///
    /// Node ids run from `node-1` to `node-<cluster_size>`. Already persisted
    /// clusters keep the size they were created with.
    pub cluster_size: usize,

    /// How many times a request is re-run after losing a compare-and-swap race
    ///
    /// Each attempt reloads the state and rebuilds the trace from scratch.
    pub max_commit_attempts: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            cluster_size: 3,
            max_commit_attempts: 5,
        }
    }
}

/// Builder for ClusterConfig
pub struct ClusterConfigBuilder {
    config: ClusterConfig,
}

impl ClusterConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ClusterConfig::default(),
        }
    }

    pub fn cluster_size(mut self, size: usize) -> Self {
        self.config.cluster_size = size;
        self
    }

    pub fn max_commit_attempts(mut self, attempts: u32) -> Self {
        self.config.max_commit_attempts = attempts;
        self
    }

    pub fn build(self) -> ClusterConfig {
        assert!(
            self.config.cluster_size > 0,
            "cluster_size must be greater than 0"
        );
        assert!(
            self.config.max_commit_attempts > 0,
            "max_commit_attempts must be greater than 0"
        );

        self.config
    }
}

impl Default for ClusterConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
