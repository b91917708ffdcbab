use crate::commands::{confirm, orchestrator};
use crate::output::{self, OutputFormat};
use crate::progress::Progress;
use anyhow::Result;
use clap::Args;
use simplespark_common::{ClusterReport, ClusterRequest, Error, Machine, MasterSummary};
use simplespark_core::compose::resolve_compose_file;
use simplespark_core::SimpleSparkConfig;
use std::path::PathBuf;
use tabled::Tabled;

/// Flags of `simplespark create`; unset flags fall back to the config
#[derive(Args, Debug, Default)]
pub struct CreateArgs {
    /// Number of worker nodes
    pub num_workers: usize,
    /// Prefix for machine names
    #[arg(short, long)]
    pub prefix: Option<String>,
    /// Accept a degraded cluster with at least this many workers
    #[arg(long)]
    pub min_workers: Option<usize>,
    /// Consul machine name or IP address
    #[arg(short = 'c', long)]
    pub consul: Option<String>,
    /// EC2 security group
    #[arg(short = 'g', long)]
    pub security_group: Option<String>,
    /// Network interface the engines advertise on
    #[arg(short = 'i', long)]
    pub network_interface: Option<String>,
    /// Instance type of the master
    #[arg(short = 'm', long)]
    pub master_instance_type: Option<String>,
    /// Instance type of the workers
    #[arg(short = 'w', long)]
    pub worker_instance_type: Option<String>,
    /// Spot price bid for workers
    #[arg(short = 's', long)]
    pub spot_price: Option<String>,
    /// docker-compose file (defaults to the bundled one)
    #[arg(short = 'f', long)]
    pub compose_file: Option<PathBuf>,
    /// Do not wait for workers to register with the master
    #[arg(long)]
    pub skip_health_check: bool,
    /// Leave machines in place when provisioning fails
    #[arg(long)]
    pub keep_on_failure: bool,
}

/// Merge flags over config into a request
pub fn build_request(config: &SimpleSparkConfig, args: CreateArgs) -> Result<ClusterRequest> {
    let cluster = &config.cluster;
    let compose_file = resolve_compose_file(
        args.compose_file.as_deref().or(cluster.compose_file.as_deref()),
        &cluster.work_dir,
    )?;

    Ok(ClusterRequest {
        prefix: args.prefix.unwrap_or_else(|| cluster.prefix.clone()),
        num_workers: args.num_workers,
        min_workers: args.min_workers,
        security_group: args
            .security_group
            .unwrap_or_else(|| config.aws.security_group.clone()),
        consul: args.consul.unwrap_or_else(|| config.consul.box_name.clone()),
        network_interface: args
            .network_interface
            .unwrap_or_else(|| cluster.network_interface.clone()),
        master_instance_type: args
            .master_instance_type
            .unwrap_or_else(|| cluster.master_instance_type.clone()),
        worker_instance_type: args
            .worker_instance_type
            .unwrap_or_else(|| cluster.worker_instance_type.clone()),
        worker_spot_price: args
            .spot_price
            .unwrap_or_else(|| cluster.worker_spot_price.clone()),
        compose_file,
        skip_health_check: args.skip_health_check,
        keep_on_failure: args.keep_on_failure,
    })
}

#[derive(Tabled)]
struct MachineRow {
    name: String,
    role: String,
    state: String,
    url: String,
}

impl From<&Machine> for MachineRow {
    fn from(machine: &Machine) -> Self {
        Self {
            name: machine.name.clone(),
            role: machine.role.to_string(),
            state: machine.state.to_string(),
            url: machine.url.clone().unwrap_or_else(|| "-".to_string()),
        }
    }
}

fn print_spark_summary(spark: &MasterSummary) {
    output::print_info(&format!(
        "Spark master {} with {} alive workers ({} cores, {})",
        spark.status,
        spark.alive_workers,
        spark.cores,
        output::format_memory_mb(spark.memory_mb)
    ));
}

fn print_report(report: &ClusterReport) {
    output::print_success(&format!(
        "Cluster '{}' is up with {} workers",
        report.prefix,
        report.workers.len()
    ));
    output::print_info(&format!("Master: {}", report.master));
    output::print_info(&format!("Master UI: {}", report.master_ui));
    output::print_info(&format!("Consul: {}", report.consul_address));
    if let Some(spark) = &report.spark {
        print_spark_summary(spark);
    }
    if report.is_degraded() {
        output::print_warning(&format!(
            "Degraded cluster, these workers failed: {}",
            report.failed_workers.join(", ")
        ));
    }
    if !report.leaked_workers.is_empty() {
        output::print_warning(&leak_hint(&report.leaked_workers));
    }
    output::print_info(&format!("Run a test job: simplespark test -p {}", report.prefix));
}

fn leak_hint(leaked: &[String]) -> String {
    format!(
        "Machines left running: {}. Remove them with `docker-machine rm -y {}`",
        leaked.join(", "),
        leaked.join(" ")
    )
}

/// Explain what a failed run left behind
fn report_failure(err: &Error) {
    if let Error::ProvisioningFailed {
        phase,
        rolled_back,
        leaked,
        ..
    } = err
    {
        output::print_error(&format!("Provisioning failed during {}", phase));
        if !rolled_back.is_empty() {
            output::print_info(&format!("Rolled back: {}", rolled_back.join(", ")));
        }
        if !leaked.is_empty() {
            output::print_warning(&leak_hint(leaked));
        }
    }
}

pub async fn create(config: &SimpleSparkConfig, args: CreateArgs, format: OutputFormat) -> Result<()> {
    let request = build_request(config, args)?;

    let progress = Progress::start(
        &format!(
            "Creating cluster '{}' with {} workers",
            request.prefix, request.num_workers
        ),
        format.is_interactive(),
    );
    let orch = orchestrator(config, Some(&progress));
    let result = orch.create_cluster(&request).await;
    drop(orch);
    progress.finish().await;

    match result {
        Ok(report) => {
            if !output::print_structured(&report, format)? {
                print_report(&report);
            }
            Ok(())
        }
        Err(e) => {
            report_failure(&e);
            Err(e.into())
        }
    }
}

pub async fn destroy(
    config: &SimpleSparkConfig,
    prefix: Option<String>,
    compose_file: Option<PathBuf>,
    yes: bool,
    format: OutputFormat,
) -> Result<()> {
    let prefix = prefix.unwrap_or_else(|| config.cluster.prefix.clone());

    if !confirm(
        &format!("Destroy every machine of cluster '{}'?", prefix),
        yes,
    )? {
        output::print_info("Teardown aborted");
        return Ok(());
    }

    let progress = Progress::start(
        &format!("Destroying cluster '{}'", prefix),
        format.is_interactive(),
    );
    let orch = orchestrator(config, Some(&progress));
    let result = orch.destroy_cluster(&prefix, compose_file.as_deref()).await;
    drop(orch);
    progress.finish().await;
    let report = result?;

    if !output::print_structured(&report, format)? {
        if report.removed.is_empty() && report.failed.is_empty() {
            output::print_info(&format!("No machines found for cluster '{}'", prefix));
        } else if !report.removed.is_empty() {
            output::print_success(&format!(
                "Removed {} machines of cluster '{}': {}",
                report.removed.len(),
                prefix,
                report.removed.join(", ")
            ));
        }
        for failure in &report.failed {
            output::print_error(&format!("{}: {}", failure.name, failure.reason));
        }
    }

    if !report.is_clean() {
        anyhow::bail!(
            "{} machines of cluster '{}' could not be removed",
            report.failed.len(),
            prefix
        );
    }

    Ok(())
}

pub async fn status(config: &SimpleSparkConfig, prefix: Option<String>, format: OutputFormat) -> Result<()> {
    let prefix = prefix.unwrap_or_else(|| config.cluster.prefix.clone());
    let status = orchestrator(config, None).cluster_status(&prefix).await?;

    let rows: Vec<MachineRow> = status.machines.iter().map(MachineRow::from).collect();
    output::print_output(&status, rows, format)?;

    if format == OutputFormat::Table {
        if let Some(ui) = &status.master_ui {
            output::print_info(&format!("Master UI: {}", ui));
        }
        match &status.spark {
            Some(spark) => print_spark_summary(spark),
            None if status.has_master() => {
                output::print_warning("Spark master is not reachable")
            }
            None => {}
        }
    }

    Ok(())
}

pub async fn test(
    config: &SimpleSparkConfig,
    prefix: Option<String>,
    partitions: Option<u32>,
    format: OutputFormat,
) -> Result<()> {
    let prefix = prefix.unwrap_or_else(|| config.cluster.prefix.clone());

    let progress = Progress::start(
        &format!("Computing Pi on cluster '{}'", prefix),
        format.is_interactive(),
    );
    let result = orchestrator(config, None).test_cluster(&prefix, partitions).await;
    progress.finish().await;
    let report = result?;

    if !output::print_structured(&report, format)? {
        output::print_success(&format!(
            "Pi is roughly {} (took {})",
            report.pi_estimate,
            output::format_duration_ms(report.duration_ms)
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &std::path::Path) -> SimpleSparkConfig {
        let mut config = SimpleSparkConfig::default();
        config.cluster.work_dir = dir.to_path_buf();
        config
    }

    #[test]
    fn test_request_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let request = build_request(
            &config,
            CreateArgs {
                num_workers: 4,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(request.prefix, "spark");
        assert_eq!(request.consul, "consul");
        assert_eq!(request.worker_spot_price, "0.074");
        assert_eq!(request.compose_file, dir.path().join("docker-compose.yml"));
        assert!(request.compose_file.is_file());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_flags_override_config() {
        let dir = tempfile::tempdir().unwrap();
        let compose = dir.path().join("custom.yml");
        std::fs::write(&compose, "version: \"2\"\n").unwrap();
        let config = config_in(dir.path());

        let request = build_request(
            &config,
            CreateArgs {
                num_workers: 2,
                prefix: Some("etl".to_string()),
                min_workers: Some(1),
                consul: Some("10.0.0.5".to_string()),
                spot_price: Some("0.2".to_string()),
                compose_file: Some(compose.clone()),
                keep_on_failure: true,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(request.prefix, "etl");
        assert_eq!(request.min_workers, Some(1));
        assert_eq!(request.consul, "10.0.0.5");
        assert_eq!(request.worker_spot_price, "0.2");
        assert_eq!(request.compose_file, compose);
        assert!(request.keep_on_failure);
        assert_eq!(request.master_instance_type, "m4.large");
    }

    #[test]
    fn test_leak_hint_lists_rm_command() {
        let hint = leak_hint(&["spark-worker-1".to_string(), "spark-worker-3".to_string()]);
        assert!(hint.contains("spark-worker-1, spark-worker-3"));
        assert!(hint.contains("docker-machine rm -y spark-worker-1 spark-worker-3"));
    }

    #[test]
    fn test_missing_compose_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let result = build_request(
            &config,
            CreateArgs {
                num_workers: 1,
                compose_file: Some(dir.path().join("missing.yml")),
                ..Default::default()
            },
        );
        assert!(result.is_err());
    }
}
