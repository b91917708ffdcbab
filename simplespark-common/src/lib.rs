//! Common types and utilities shared between simplespark-core and simplespark-cli

pub mod naming;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use naming::{validate_prefix, ClusterNames};

/// Role a machine plays inside a Spark cluster
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Master,
    Worker,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Worker => write!(f, "worker"),
        }
    }
}

/// Machine state as reported by docker-machine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MachineState {
    Running,
    Starting,
    Stopped,
    Stopping,
    Timeout,
    Error,
    #[default]
    Unknown,
}

impl MachineState {
    /// Parse the `{{.State}}` column of `docker-machine ls`
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "running" => Self::Running,
            "starting" => Self::Starting,
            "stopped" => Self::Stopped,
            "stopping" => Self::Stopping,
            "timeout" => Self::Timeout,
            "error" => Self::Error,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for MachineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Starting => write!(f, "starting"),
            Self::Stopped => write!(f, "stopped"),
            Self::Stopping => write!(f, "stopping"),
            Self::Timeout => write!(f, "timeout"),
            Self::Error => write!(f, "error"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A machine that belongs to a cluster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Machine {
    pub name: String,
    pub role: NodeRole,
    pub state: MachineState,
    pub url: Option<String>, // Docker engine URL, empty while provisioning
}

/// Orchestration phase, in execution order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Preflight,
    ResolveDiscovery,
    ProvisionMaster,
    DeployMaster,
    ProvisionWorkers,
    ScaleWorkers,
    VerifyHealth,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Preflight => "preflight",
            Self::ResolveDiscovery => "resolve discovery",
            Self::ProvisionMaster => "provision master",
            Self::DeployMaster => "deploy master",
            Self::ProvisionWorkers => "provision workers",
            Self::ScaleWorkers => "scale workers",
            Self::VerifyHealth => "verify health",
        };
        write!(f, "{}", name)
    }
}

/// Everything needed to bring up one cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterRequest {
    pub prefix: String,
    pub num_workers: usize,
    /// Minimum number of workers that must come up; defaults to all of them
    pub min_workers: Option<usize>,
    pub security_group: String,
    /// Name or IP address of the Consul box
    pub consul: String,
    pub network_interface: String,
    pub master_instance_type: String,
    pub worker_instance_type: String,
    pub worker_spot_price: String,
    pub compose_file: PathBuf,
    pub skip_health_check: bool,
    pub keep_on_failure: bool,
}

impl ClusterRequest {
    /// Number of workers that must succeed for the cluster to be kept
    pub fn required_workers(&self) -> usize {
        self.min_workers.unwrap_or(self.num_workers)
    }

    pub fn validate(&self) -> Result<()> {
        validate_prefix(&self.prefix)?;

        if self.num_workers == 0 {
            return Err(Error::Validation(
                "A cluster needs at least one worker".to_string(),
            ));
        }

        if let Some(min) = self.min_workers {
            if min == 0 || min > self.num_workers {
                return Err(Error::Validation(format!(
                    "min_workers must be between 1 and {} (got {})",
                    self.num_workers, min
                )));
            }
        }

        match self.worker_spot_price.parse::<f64>() {
            Ok(price) if price.is_finite() && price > 0.0 => {}
            _ => {
                return Err(Error::Validation(format!(
                    "Invalid spot price: {}",
                    self.worker_spot_price
                )))
            }
        }

        if self.consul.trim().is_empty() {
            return Err(Error::Validation("Consul address cannot be empty".to_string()));
        }

        Ok(())
    }
}

/// Condensed view of the Spark master web UI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MasterSummary {
    pub status: String,
    pub alive_workers: usize,
    pub cores: u32,
    pub memory_mb: u64,
}

/// Result of a successful `create`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterReport {
    pub prefix: String,
    pub master: String,
    pub master_ui: String,
    pub consul_address: String,
    pub workers: Vec<String>,
    /// Workers that failed to come up; non-empty means degraded
    pub failed_workers: Vec<String>,
    /// Failed workers whose machines could not be removed
    #[serde(default)]
    pub leaked_workers: Vec<String>,
    pub spark: Option<MasterSummary>,
    pub created_at: DateTime<Utc>,
}

impl ClusterReport {
    pub fn is_degraded(&self) -> bool {
        !self.failed_workers.is_empty()
    }
}

/// Current state of a cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub prefix: String,
    pub machines: Vec<Machine>,
    pub master_ui: Option<String>,
    pub spark: Option<MasterSummary>,
}

impl ClusterStatus {
    pub fn worker_count(&self) -> usize {
        self.machines
            .iter()
            .filter(|m| m.role == NodeRole::Worker)
            .count()
    }

    pub fn has_master(&self) -> bool {
        self.machines.iter().any(|m| m.role == NodeRole::Master)
    }
}

/// A machine that could not be removed during teardown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeardownFailure {
    pub name: String,
    pub reason: String,
}

/// Result of a `destroy`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TeardownReport {
    pub prefix: String,
    pub removed: Vec<String>,
    pub failed: Vec<TeardownFailure>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Result of running the SparkPi smoke test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmokeTestReport {
    pub prefix: String,
    pub master: String,
    pub pi_estimate: f64,
    pub duration_ms: u64,
}

/// Shared error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Required tool not available: {0}")]
    ToolUnavailable(String),

    #[error("`{program} {args}` exited with status {code}: {stderr}")]
    CommandFailed {
        program: String,
        args: String,
        code: i32,
        stderr: String,
    },

    #[error("Failed to parse {what}: {message}")]
    Parse { what: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Instance {name} is not running (state: {state})")]
    InstanceNotRunning { name: String, state: String },

    #[error("Cluster '{0}' already has machines, destroy it first")]
    ClusterExists(String),

    #[error("Provisioning failed during {phase}: {cause}")]
    ProvisioningFailed {
        phase: LifecyclePhase,
        cause: Box<Error>,
        rolled_back: Vec<String>,
        leaked: Vec<String>,
    },

    #[error("Health check timed out: expected {expected} alive workers, observed {observed}")]
    HealthCheckTimeout { expected: usize, observed: usize },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("System error: {0}")]
    System(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Machines left behind by a failed run, if any
    pub fn leaked_machines(&self) -> &[String] {
        match self {
            Error::ProvisioningFailed { leaked, .. } => leaked,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ClusterRequest {
        ClusterRequest {
            prefix: "spark".to_string(),
            num_workers: 3,
            min_workers: None,
            security_group: "spark-cluster".to_string(),
            consul: "10.0.0.5".to_string(),
            network_interface: "eth0".to_string(),
            master_instance_type: "m4.large".to_string(),
            worker_instance_type: "m4.2xlarge".to_string(),
            worker_spot_price: "0.074".to_string(),
            compose_file: PathBuf::from("docker-compose.yml"),
            skip_health_check: false,
            keep_on_failure: false,
        }
    }

    #[test]
    fn test_request_validation() {
        assert!(request().validate().is_ok());

        let mut no_workers = request();
        no_workers.num_workers = 0;
        assert!(no_workers.validate().is_err());

        let mut too_many = request();
        too_many.min_workers = Some(4);
        assert!(too_many.validate().is_err());

        let mut bad_price = request();
        bad_price.worker_spot_price = "free".to_string();
        assert!(bad_price.validate().is_err());

        let mut negative_price = request();
        negative_price.worker_spot_price = "-0.1".to_string();
        assert!(negative_price.validate().is_err());

        for unbounded in ["inf", "NaN", "1e309"] {
            let mut req = request();
            req.worker_spot_price = unbounded.to_string();
            assert!(req.validate().is_err(), "{} accepted", unbounded);
        }
    }

    #[test]
    fn test_required_workers_defaults_to_all() {
        let mut req = request();
        assert_eq!(req.required_workers(), 3);
        req.min_workers = Some(2);
        assert_eq!(req.required_workers(), 2);
    }

    #[test]
    fn test_machine_state_parsing() {
        assert_eq!(MachineState::parse("Running"), MachineState::Running);
        assert_eq!(MachineState::parse(" Stopped\n"), MachineState::Stopped);
        assert_eq!(MachineState::parse(""), MachineState::Unknown);
        assert_eq!(MachineState::parse("Error"), MachineState::Error);
    }

    #[test]
    fn test_phase_ordering() {
        assert!(LifecyclePhase::ProvisionMaster < LifecyclePhase::ProvisionWorkers);
        assert!(LifecyclePhase::ScaleWorkers < LifecyclePhase::VerifyHealth);
        assert_eq!(LifecyclePhase::DeployMaster.to_string(), "deploy master");
    }

    #[test]
    fn test_leaked_machines() {
        let err = Error::ProvisioningFailed {
            phase: LifecyclePhase::ProvisionWorkers,
            cause: Box::new(Error::System("boom".to_string())),
            rolled_back: vec!["spark-worker-0".to_string()],
            leaked: vec!["spark-master".to_string()],
        };
        assert_eq!(err.leaked_machines(), &["spark-master".to_string()]);
        assert!(Error::NotFound("x".to_string()).leaked_machines().is_empty());
    }
}
