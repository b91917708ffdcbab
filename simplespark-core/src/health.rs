//! Cluster health verification

use crate::spark::{MasterProbe, SparkMasterStatus};
use simplespark_common::{Error, Result};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// When to consider the cluster healthy, and how long to wait for it
#[derive(Debug, Clone)]
pub struct HealthPolicy {
    pub timeout: Duration,
    pub interval: Duration,
    pub required_workers: usize,
}

/// Health of the master at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Master UI not reachable yet
    Unreachable,
    /// Master up, waiting for workers to register
    Registering { alive: usize, required: usize },
    Ready,
}

impl HealthPolicy {
    pub fn evaluate(&self, status: &SparkMasterStatus) -> Readiness {
        if !status.is_alive() {
            return Readiness::Unreachable;
        }

        let alive = status.alive_workers();
        if alive >= self.required_workers {
            Readiness::Ready
        } else {
            Readiness::Registering {
                alive,
                required: self.required_workers,
            }
        }
    }
}

/// Poll the master until it is alive with enough registered workers.
/// Probe errors count as "not ready yet" until the timeout.
pub async fn wait_for_master(
    probe: &dyn MasterProbe,
    policy: &HealthPolicy,
) -> Result<SparkMasterStatus> {
    let deadline = Instant::now() + policy.timeout;
    let mut observed = 0;
    let mut attempt = 0u32;

    info!(
        "Waiting up to {:?} for Spark master with {} workers",
        policy.timeout, policy.required_workers
    );

    loop {
        attempt += 1;

        match probe.status().await {
            Ok(status) => match policy.evaluate(&status) {
                Readiness::Ready => {
                    info!(
                        "Spark master healthy with {} alive workers after {} probes",
                        status.alive_workers(),
                        attempt
                    );
                    return Ok(status);
                }
                Readiness::Registering { alive, required } => {
                    observed = alive;
                    debug!("{}/{} workers registered", alive, required);
                }
                Readiness::Unreachable => {
                    debug!("Spark master reports status {}", status.status);
                }
            },
            Err(e) => {
                debug!("Health probe {} failed: {}", attempt, e);
            }
        }

        if Instant::now() + policy.interval > deadline {
            warn!(
                "Health check gave up after {} probes with {}/{} workers",
                attempt, observed, policy.required_workers
            );
            return Err(Error::HealthCheckTimeout {
                expected: policy.required_workers,
                observed,
            });
        }

        sleep(policy.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays a fixed sequence of probe results, repeating the last one
    struct ScriptedProbe {
        results: Mutex<Vec<Result<SparkMasterStatus>>>,
    }

    impl ScriptedProbe {
        fn new(mut results: Vec<Result<SparkMasterStatus>>) -> Self {
            results.reverse();
            Self {
                results: Mutex::new(results),
            }
        }
    }

    #[async_trait]
    impl MasterProbe for ScriptedProbe {
        async fn status(&self) -> Result<SparkMasterStatus> {
            let mut results = self.results.lock().unwrap();
            if results.len() > 1 {
                results.pop().unwrap()
            } else {
                match results.last().unwrap() {
                    Ok(status) => Ok(status.clone()),
                    Err(_) => Err(Error::Http("connection refused".to_string())),
                }
            }
        }
    }

    fn status(alive: usize) -> SparkMasterStatus {
        SparkMasterStatus {
            url: "spark://master:7077".to_string(),
            status: "ALIVE".to_string(),
            workers: Vec::new(),
            aliveworkers: Some(alive),
            cores: 0,
            memory: 0,
        }
    }

    fn policy(required_workers: usize) -> HealthPolicy {
        HealthPolicy {
            timeout: Duration::from_millis(200),
            interval: Duration::from_millis(5),
            required_workers,
        }
    }

    #[test]
    fn test_evaluate() {
        let policy = policy(2);
        assert_eq!(policy.evaluate(&status(2)), Readiness::Ready);
        assert_eq!(
            policy.evaluate(&status(1)),
            Readiness::Registering { alive: 1, required: 2 }
        );

        let mut standby = status(3);
        standby.status = "STANDBY".to_string();
        assert_eq!(policy.evaluate(&standby), Readiness::Unreachable);
    }

    #[tokio::test]
    async fn test_waits_through_errors_and_registration() {
        let probe = ScriptedProbe::new(vec![
            Err(Error::Http("connection refused".to_string())),
            Ok(status(0)),
            Ok(status(1)),
            Ok(status(2)),
        ]);

        let result = wait_for_master(&probe, &policy(2)).await.unwrap();
        assert_eq!(result.alive_workers(), 2);
    }

    #[tokio::test]
    async fn test_times_out_with_observed_count() {
        let probe = ScriptedProbe::new(vec![Ok(status(1))]);

        match wait_for_master(&probe, &policy(3)).await {
            Err(Error::HealthCheckTimeout { expected, observed }) => {
                assert_eq!(expected, 3);
                assert_eq!(observed, 1);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
