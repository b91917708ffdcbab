//! Configuration management for SimpleSpark
//!
//! Settings are resolved in this order (later wins):
//! 1. Default values
//! 2. Configuration file (TOML format)
//! 3. Environment variables
//! 4. Command-line flags (applied by the CLI)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration struct for SimpleSpark
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SimpleSparkConfig {
    /// AWS placement settings
    pub aws: AwsConfig,
    /// Cluster shape defaults
    pub cluster: ClusterConfig,
    /// Consul service-discovery box
    pub consul: ConsulConfig,
    /// Spark runtime settings
    pub spark: SparkConfig,
    /// Health verification settings
    pub health: HealthConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// AWS placement settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    /// Region; `None` leaves it to the AWS CLI / docker-machine defaults
    pub region: Option<String>,
    /// Security group for cluster machines
    pub security_group: String,
}

/// Cluster shape defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Prefix for machine names
    pub prefix: String,
    /// Instance type of the master node
    pub master_instance_type: String,
    /// Instance type of worker nodes
    pub worker_instance_type: String,
    /// Spot price bid for workers
    pub worker_spot_price: String,
    /// Interface the engines advertise on inside the swarm
    pub network_interface: String,
    /// docker-compose file; the bundled one is used when unset
    pub compose_file: Option<PathBuf>,
    /// Directory for generated files (bundled compose file)
    pub work_dir: PathBuf,
    /// Maximum number of machines created concurrently
    pub max_parallel_provisioning: usize,
}

/// Consul service-discovery box
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsulConfig {
    /// Machine name, or an IP address of an existing Consul server
    pub box_name: String,
    /// Instance type for the Consul box
    pub instance_type: String,
    /// Security group for the Consul box
    pub security_group: String,
    /// Consul container image
    pub image: String,
    /// Consul datacenter
    pub datacenter: String,
    /// ACL master token; ACLs stay disabled when unset
    pub acl_master_token: Option<String>,
}

/// Spark runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SparkConfig {
    /// Spark image used to submit jobs
    pub image: String,
    /// Name of the master container / compose service
    pub master_service: String,
    /// Name of the worker compose service
    pub worker_service: String,
    /// Spark master RPC port
    pub master_port: u16,
    /// Spark master web UI port
    pub ui_port: u16,
    /// Jar with the Spark examples inside the image
    pub examples_jar: String,
}

/// Health verification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// How long to wait for the cluster to become healthy
    pub timeout_secs: u64,
    /// Delay between probes
    pub interval_secs: u64,
    /// Timeout of a single HTTP probe
    pub request_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Directory for JSON log files; console only when unset
    pub log_dir: Option<PathBuf>,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: None,
            security_group: "simplespark".to_string(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            prefix: "spark".to_string(),
            master_instance_type: "m4.large".to_string(),
            worker_instance_type: "m4.2xlarge".to_string(),
            worker_spot_price: "0.074".to_string(),
            network_interface: "eth0".to_string(),
            compose_file: None,
            work_dir: default_work_dir(),
            max_parallel_provisioning: 8,
        }
    }
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            box_name: "consul".to_string(),
            instance_type: "t2.nano".to_string(),
            security_group: "simplespark-consul".to_string(),
            image: "consul:0.7.2".to_string(),
            datacenter: "dc1".to_string(),
            acl_master_token: None,
        }
    }
}

impl Default for SparkConfig {
    fn default() -> Self {
        Self {
            image: "gettyimages/spark:2.0.2-hadoop-2.7".to_string(),
            master_service: "master".to_string(),
            worker_service: "worker".to_string(),
            master_port: 7077,
            ui_port: 8080,
            examples_jar: "/usr/spark/lib/spark-examples-2.0.2-hadoop2.7.0.jar".to_string(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            interval_secs: 10,
            request_timeout_secs: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
        }
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

fn default_work_dir() -> PathBuf {
    home_dir()
        .map(|home| home.join(".local/share/simplespark"))
        .unwrap_or_else(|| std::env::temp_dir().join("simplespark"))
}

impl HealthConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl SimpleSparkConfig {
    /// Load configuration from an explicit file, or from the standard
    /// locations, then apply environment overrides
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::find_config_file() {
                Some(path) => Self::load_from_file(&path)?,
                None => Self::default(),
            },
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            std::env::var("SIMPLESPARK_CONFIG").ok().map(PathBuf::from),
            home_dir().map(|home| home.join(".config/simplespark/config.toml")),
            Some(PathBuf::from("./simplespark.toml")),
        ];

        paths.into_iter().flatten().find(|p| p.exists())
    }

    /// Apply `SIMPLESPARK_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // AWS
        if let Some(region) = lookup("SIMPLESPARK_REGION").or_else(|| lookup("AWS_DEFAULT_REGION")) {
            self.aws.region = Some(region);
        }
        if let Some(group) = lookup("SIMPLESPARK_SECURITY_GROUP") {
            self.aws.security_group = group;
        }

        // Cluster
        if let Some(prefix) = lookup("SIMPLESPARK_CLUSTER_PREFIX") {
            self.cluster.prefix = prefix;
        }
        if let Some(instance_type) = lookup("SIMPLESPARK_MASTER_INSTANCE_TYPE") {
            self.cluster.master_instance_type = instance_type;
        }
        if let Some(instance_type) = lookup("SIMPLESPARK_WORKER_INSTANCE_TYPE") {
            self.cluster.worker_instance_type = instance_type;
        }
        if let Some(price) = lookup("SIMPLESPARK_WORKER_SPOT_PRICE") {
            self.cluster.worker_spot_price = price;
        }
        if let Some(path) = lookup("SIMPLESPARK_COMPOSE_FILE") {
            self.cluster.compose_file = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("SIMPLESPARK_WORK_DIR") {
            self.cluster.work_dir = PathBuf::from(path);
        }
        if let Some(parallel) = lookup("SIMPLESPARK_MAX_PARALLEL") {
            if let Ok(parallel) = parallel.parse() {
                self.cluster.max_parallel_provisioning = parallel;
            }
        }

        // Consul
        if let Some(consul) = lookup("SIMPLESPARK_CONSUL") {
            self.consul.box_name = consul;
        }
        if let Some(token) = lookup("SIMPLESPARK_CONSUL_ACL_TOKEN") {
            self.consul.acl_master_token = Some(token);
        }

        // Health
        if let Some(timeout) = lookup("SIMPLESPARK_HEALTH_TIMEOUT") {
            if let Ok(timeout) = timeout.parse() {
                self.health.timeout_secs = timeout;
            }
        }

        // Logging
        if let Some(level) = lookup("SIMPLESPARK_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(path) = lookup("SIMPLESPARK_LOG_DIR") {
            self.logging.log_dir = Some(PathBuf::from(path));
        }
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        simplespark_common::validate_prefix(&self.cluster.prefix)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        match self.cluster.worker_spot_price.parse::<f64>() {
            Ok(price) if price.is_finite() && price > 0.0 => {}
            _ => {
                return Err(ConfigError::Validation(format!(
                    "worker_spot_price must be a positive number (got {})",
                    self.cluster.worker_spot_price
                )))
            }
        }

        if self.cluster.max_parallel_provisioning == 0 {
            return Err(ConfigError::Validation(
                "max_parallel_provisioning cannot be 0".to_string(),
            ));
        }

        if self.health.timeout_secs == 0 || self.health.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "Health timeout and interval must be non-zero".to_string(),
            ));
        }

        if self.spark.master_port == 0 || self.spark.ui_port == 0 {
            return Err(ConfigError::Validation("Spark ports cannot be 0".to_string()));
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("Failed to read config file {0:?}: {1}")]
    FileRead(PathBuf, String),
    /// Failed to parse configuration
    #[error("Failed to parse config: {0}")]
    Parse(String),
    /// Configuration validation failed
    #[error("Config validation failed: {0}")]
    Validation(String),
}

impl From<ConfigError> for simplespark_common::Error {
    fn from(err: ConfigError) -> Self {
        simplespark_common::Error::InvalidConfig(err.to_string())
    }
}
