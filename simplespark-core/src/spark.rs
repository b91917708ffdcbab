//! Spark runtime interaction: master status and job submission

use crate::config::SparkConfig;
use crate::machine::DockerEnv;
use crate::process::{run_checked, CommandRunner, CommandSpec};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use simplespark_common::{Error, MasterSummary, Result};
use std::time::Duration;
use tracing::debug;

static PI_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Pi is roughly\s+([0-9]+(?:\.[0-9]+)?)").expect("pi regex is valid"));

const SPARK_PI_CLASS: &str = "org.apache.spark.examples.SparkPi";

/// A worker as listed by the master web UI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SparkWorker {
    pub id: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub cores: u32,
    #[serde(default)]
    pub memory: u64,
    pub state: String,
}

/// `GET /json/` on the Spark master web UI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SparkMasterStatus {
    #[serde(default)]
    pub url: String,
    pub status: String,
    #[serde(default)]
    pub workers: Vec<SparkWorker>,
    /// Only reported by newer Spark versions
    #[serde(default)]
    pub aliveworkers: Option<usize>,
    #[serde(default)]
    pub cores: u32,
    #[serde(default)]
    pub memory: u64,
}

impl SparkMasterStatus {
    pub fn is_alive(&self) -> bool {
        self.status.eq_ignore_ascii_case("ALIVE")
    }

    pub fn alive_workers(&self) -> usize {
        self.aliveworkers.unwrap_or_else(|| {
            self.workers
                .iter()
                .filter(|w| w.state.eq_ignore_ascii_case("ALIVE"))
                .count()
        })
    }

    pub fn summary(&self) -> MasterSummary {
        MasterSummary {
            status: self.status.clone(),
            alive_workers: self.alive_workers(),
            cores: self.cores,
            memory_mb: self.memory,
        }
    }
}

/// Source of master status, polled during health verification
#[async_trait]
pub trait MasterProbe: Send + Sync {
    async fn status(&self) -> Result<SparkMasterStatus>;
}

/// Reads the master web UI over HTTP
pub struct HttpMasterProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpMasterProbe {
    pub fn new(host: &str, ui_port: u16, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!("{}/json/", master_ui_url(host, ui_port)),
        })
    }
}

#[async_trait]
impl MasterProbe for HttpMasterProbe {
    async fn status(&self) -> Result<SparkMasterStatus> {
        debug!("Probing Spark master at {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::Http(format!("GET {}: {}", self.url, e)))?;

        if !response.status().is_success() {
            return Err(Error::Http(format!(
                "GET {} returned {}",
                self.url,
                response.status()
            )));
        }

        response
            .json::<SparkMasterStatus>()
            .await
            .map_err(|e| Error::Parse {
                what: "Spark master status".to_string(),
                message: e.to_string(),
            })
    }
}

/// Web UI address of the master
pub fn master_ui_url(host: &str, ui_port: u16) -> String {
    format!("http://{}:{}", host, ui_port)
}

/// Arguments for `docker run` submitting SparkPi next to the master container
pub fn spark_pi_args(config: &SparkConfig, partitions: Option<u32>) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--rm".to_string(),
        format!("--net=container:{}", config.master_service),
        "--entrypoint".to_string(),
        "spark-submit".to_string(),
        config.image.clone(),
        "--master".to_string(),
        format!("spark://{}:{}", config.master_service, config.master_port),
        "--class".to_string(),
        SPARK_PI_CLASS.to_string(),
        config.examples_jar.clone(),
    ];

    if let Some(partitions) = partitions {
        args.push(partitions.to_string());
    }

    args
}

/// Extract the estimate from SparkPi output
pub fn parse_pi(output: &str) -> Option<f64> {
    PI_LINE
        .captures(output)
        .and_then(|cap| cap[1].parse::<f64>().ok())
}

/// Submit SparkPi through the swarm and return the estimate
pub async fn submit_pi(
    runner: &dyn CommandRunner,
    config: &SparkConfig,
    env: &DockerEnv,
    partitions: Option<u32>,
) -> Result<f64> {
    let cmd = CommandSpec::new("docker")
        .args(spark_pi_args(config, partitions))
        .envs(env);
    let output = run_checked(runner, &cmd).await?;

    // spark-submit logs to stderr, the result line goes to stdout
    parse_pi(&output.stdout)
        .or_else(|| parse_pi(&output.stderr))
        .ok_or_else(|| Error::Parse {
            what: "SparkPi output".to_string(),
            message: "no 'Pi is roughly' line found".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER_JSON: &str = r#"{
        "url": "spark://master:7077",
        "workers": [
            {"id": "worker-1", "host": "10.0.1.4", "port": 8881, "cores": 2, "memory": 1024, "state": "ALIVE"},
            {"id": "worker-2", "host": "10.0.1.5", "port": 8881, "cores": 2, "memory": 1024, "state": "DEAD"}
        ],
        "cores": 4,
        "coresused": 0,
        "memory": 2048,
        "memoryused": 0,
        "activeapps": [],
        "completedapps": [],
        "status": "ALIVE"
    }"#;

    #[test]
    fn test_master_status_counts_alive_workers() {
        let status: SparkMasterStatus = serde_json::from_str(MASTER_JSON).unwrap();
        assert!(status.is_alive());
        assert_eq!(status.alive_workers(), 1);

        let summary = status.summary();
        assert_eq!(summary.cores, 4);
        assert_eq!(summary.memory_mb, 2048);
        assert_eq!(summary.alive_workers, 1);
    }

    #[test]
    fn test_reported_alive_workers_take_precedence() {
        let status: SparkMasterStatus =
            serde_json::from_str(r#"{"status": "ALIVE", "aliveworkers": 5}"#).unwrap();
        assert_eq!(status.alive_workers(), 5);
    }

    #[test]
    fn test_spark_pi_args() {
        let args = spark_pi_args(&SparkConfig::default(), Some(100));
        assert_eq!(args[0], "run");
        assert!(args.contains(&"--net=container:master".to_string()));
        assert!(args.contains(&"spark://master:7077".to_string()));
        assert!(args.contains(&SPARK_PI_CLASS.to_string()));
        assert_eq!(args.last().map(String::as_str), Some("100"));
    }

    #[test]
    fn test_parse_pi() {
        assert_eq!(parse_pi("17/01/01 INFO ...\nPi is roughly 3.14158\n"), Some(3.14158));
        assert_eq!(parse_pi("Pi is roughly 3"), Some(3.0));
        assert_eq!(parse_pi("Exception in thread main"), None);
    }

    #[test]
    fn test_master_ui_url() {
        assert_eq!(
            master_ui_url("ec2-52-1-2-3.compute-1.amazonaws.com", 8080),
            "http://ec2-52-1-2-3.compute-1.amazonaws.com:8080"
        );
    }
}
