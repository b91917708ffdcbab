//! Cluster lifecycle orchestration
//!
//! Sequences machine provisioning, role assignment, Spark deployment, health
//! verification and teardown. Every machine a run touches is recorded in a
//! `ProvisionLedger`, and a failed run unwinds the ledger so no half-built
//! cluster is left behind (unless asked to keep it for debugging).

use crate::aws::{AddressKind, InstanceDirectory};
use crate::compose::{resolve_compose_file, Compose};
use crate::config::SimpleSparkConfig;
use crate::discovery::{self, ConsulBox, ConsulBoxOptions};
use crate::health::{wait_for_master, HealthPolicy};
use crate::machine::{DockerEnv, DockerMachine, Ec2Options, MachineSpec, SwarmOptions};
use crate::process::{check_tools, ensure_available, CommandRunner, ToolCheck, REQUIRED_TOOLS};
use crate::spark::{self, master_ui_url, HttpMasterProbe, MasterProbe};
use futures::stream::{self, StreamExt};
use simplespark_common::{
    ClusterNames, ClusterReport, ClusterRequest, ClusterStatus, Error, LifecyclePhase, NodeRole,
    Result, SmokeTestReport, TeardownFailure, TeardownReport,
};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, info_span, warn, Instrument};

/// Progress notifications for interactive front-ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    PhaseStarted(LifecyclePhase),
    MachineCreated(String),
    MachineFailed { name: String, error: String },
    MachineRemoved(String),
    RollbackStarted,
}

/// A machine this run has attempted to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub name: String,
    pub role: NodeRole,
}

/// Machines touched by one provisioning run, in creation order
#[derive(Debug, Clone, Default)]
pub struct ProvisionLedger {
    entries: Vec<LedgerEntry>,
}

impl ProvisionLedger {
    /// Record a machine before creating it; a failed create can leave a
    /// half-built machine behind that still needs removing
    pub fn record(&mut self, name: impl Into<String>, role: NodeRole) {
        let name = name.into();
        if !self.entries.iter().any(|e| e.name == name) {
            self.entries.push(LedgerEntry { name, role });
        }
    }

    /// Drop a machine that has already been cleaned up
    pub fn forget(&mut self, name: &str) {
        self.entries.retain(|e| e.name != name);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    /// Removal order: workers newest first, then the master
    pub fn unwind_order(&self) -> Vec<LedgerEntry> {
        let mut order: Vec<LedgerEntry> = self
            .entries
            .iter()
            .rev()
            .filter(|e| e.role == NodeRole::Worker)
            .cloned()
            .collect();
        order.extend(
            self.entries
                .iter()
                .rev()
                .filter(|e| e.role == NodeRole::Master)
                .cloned(),
        );
        order
    }
}

/// Builds a master probe once the master's address is known
pub trait ProbeFactory: Send + Sync {
    fn probe_for(&self, host: &str) -> Result<Box<dyn MasterProbe>>;
}

/// Probes the Spark master web UI over HTTP
pub struct HttpProbeFactory {
    ui_port: u16,
    timeout: Duration,
}

impl HttpProbeFactory {
    pub fn new(ui_port: u16, timeout: Duration) -> Self {
        Self { ui_port, timeout }
    }
}

impl ProbeFactory for HttpProbeFactory {
    fn probe_for(&self, host: &str) -> Result<Box<dyn MasterProbe>> {
        Ok(Box::new(HttpMasterProbe::new(host, self.ui_port, self.timeout)?))
    }
}

struct PhaseError {
    phase: LifecyclePhase,
    cause: Error,
}

/// Outcome of the worker provisioning phase
struct WorkerOutcome {
    provisioned: Vec<String>,
    failed: Vec<String>,
    leaked: Vec<String>,
}

/// Cluster lifecycle orchestrator
pub struct Orchestrator {
    config: SimpleSparkConfig,
    runner: Arc<dyn CommandRunner>,
    machines: DockerMachine,
    directory: InstanceDirectory,
    probes: Arc<dyn ProbeFactory>,
    events: Option<UnboundedSender<LifecycleEvent>>,
}

impl Orchestrator {
    pub fn new(config: SimpleSparkConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let probes = Arc::new(HttpProbeFactory::new(
            config.spark.ui_port,
            config.health.request_timeout(),
        ));

        Self {
            machines: DockerMachine::new(runner.clone()),
            directory: InstanceDirectory::new(runner.clone(), config.aws.region.clone()),
            config,
            runner,
            probes,
            events: None,
        }
    }

    pub fn with_probe_factory(mut self, probes: Arc<dyn ProbeFactory>) -> Self {
        self.probes = probes;
        self
    }

    pub fn with_events(mut self, events: UnboundedSender<LifecycleEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &SimpleSparkConfig {
        &self.config
    }

    fn emit(&self, event: LifecycleEvent) {
        if let Some(events) = &self.events {
            // Receiver gone just means nobody is watching
            let _ = events.send(event);
        }
    }

    async fn run_phase<T, F>(&self, phase: LifecyclePhase, fut: F) -> std::result::Result<T, PhaseError>
    where
        F: Future<Output = Result<T>>,
    {
        info!("Phase: {}", phase);
        self.emit(LifecycleEvent::PhaseStarted(phase));

        fut.instrument(info_span!("phase", phase = %phase))
            .await
            .map_err(|cause| PhaseError { phase, cause })
    }

    /// Check that every external tool is installed
    pub async fn preflight(&self) -> Vec<ToolCheck> {
        check_tools(self.runner.as_ref(), REQUIRED_TOOLS).await
    }

    /// Bring up a cluster: master, workers, Spark services, health check
    pub async fn create_cluster(&self, request: &ClusterRequest) -> Result<ClusterReport> {
        request.validate()?;
        let names = ClusterNames::new(&request.prefix);

        info!(
            "Creating Spark cluster {} with {} workers",
            request.prefix, request.num_workers
        );

        let mut ledger = ProvisionLedger::default();
        let started = Instant::now();

        match self.provision(request, &names, &mut ledger).await {
            Ok(report) => {
                crate::log_performance!("create_cluster", started.elapsed().as_millis() as u64);
                Ok(report)
            }
            Err(PhaseError { phase, cause }) => {
                error!("Cluster creation failed during {}: {}", phase, cause);
                Err(self.fail(phase, cause, &ledger, request.keep_on_failure).await)
            }
        }
    }

    async fn provision(
        &self,
        request: &ClusterRequest,
        names: &ClusterNames,
        ledger: &mut ProvisionLedger,
    ) -> std::result::Result<ClusterReport, PhaseError> {
        self.run_phase(LifecyclePhase::Preflight, self.preflight_checks(request, names))
            .await?;

        let consul = self
            .run_phase(
                LifecyclePhase::ResolveDiscovery,
                discovery::resolve_consul(&request.consul, &self.directory),
            )
            .await?;

        let master = names.master_name();
        ledger.record(&master, NodeRole::Master);
        self.run_phase(
            LifecyclePhase::ProvisionMaster,
            self.create_machine(self.master_spec(request, &consul, &master)),
        )
        .await?;

        let compose = Compose::new(self.runner.clone(), &request.compose_file);
        let (swarm_env, master_host) = self
            .run_phase(
                LifecyclePhase::DeployMaster,
                self.deploy_master(&compose, &master),
            )
            .await?;
        let master_ui = master_ui_url(&master_host, self.config.spark.ui_port);
        info!("Master node up. You can test by going to {}", master_ui);

        let workers = self
            .run_phase(
                LifecyclePhase::ProvisionWorkers,
                self.provision_workers(request, names, &consul, ledger),
            )
            .await?;

        let worker_count = workers.provisioned.len();
        self.run_phase(
            LifecyclePhase::ScaleWorkers,
            compose.scale(
                &[
                    (self.config.spark.master_service.as_str(), 1),
                    (self.config.spark.worker_service.as_str(), worker_count),
                ],
                &swarm_env,
            ),
        )
        .await?;

        let spark = if request.skip_health_check {
            info!("Skipping health verification");
            None
        } else {
            let status = self
                .run_phase(
                    LifecyclePhase::VerifyHealth,
                    self.verify_health(&master_host, worker_count),
                )
                .await?;
            Some(status.summary())
        };

        Ok(ClusterReport {
            prefix: request.prefix.clone(),
            master,
            master_ui,
            consul_address: consul,
            workers: workers.provisioned,
            failed_workers: workers.failed,
            leaked_workers: workers.leaked,
            spark,
            created_at: chrono::Utc::now(),
        })
    }

    async fn preflight_checks(&self, request: &ClusterRequest, names: &ClusterNames) -> Result<()> {
        ensure_available(&self.preflight().await)?;

        if !request.compose_file.is_file() {
            return Err(Error::NotFound(format!(
                "compose file {:?}",
                request.compose_file
            )));
        }

        let existing = self.machines.list_cluster(names).await?;
        if !existing.is_empty() {
            return Err(Error::ClusterExists(names.prefix().to_string()));
        }

        Ok(())
    }

    fn swarm_options(&self, request: &ClusterRequest, consul: &str, master: bool) -> SwarmOptions {
        SwarmOptions {
            discovery: consul.to_string(),
            network_interface: request.network_interface.clone(),
            master,
        }
    }

    fn master_spec(&self, request: &ClusterRequest, consul: &str, name: &str) -> MachineSpec {
        MachineSpec {
            name: name.to_string(),
            ec2: Ec2Options {
                security_group: request.security_group.clone(),
                instance_type: request.master_instance_type.clone(),
                region: self.config.aws.region.clone(),
                spot_price: None,
            },
            swarm: Some(self.swarm_options(request, consul, true)),
            engine_labels: vec![("role".to_string(), NodeRole::Master.to_string())],
        }
    }

    fn worker_spec(&self, request: &ClusterRequest, consul: &str, name: &str) -> MachineSpec {
        MachineSpec {
            name: name.to_string(),
            ec2: Ec2Options {
                security_group: request.security_group.clone(),
                instance_type: request.worker_instance_type.clone(),
                region: self.config.aws.region.clone(),
                spot_price: Some(request.worker_spot_price.clone()),
            },
            swarm: Some(self.swarm_options(request, consul, false)),
            engine_labels: vec![("role".to_string(), NodeRole::Worker.to_string())],
        }
    }

    async fn create_machine(&self, spec: MachineSpec) -> Result<()> {
        match self.machines.create(&spec).await {
            Ok(()) => {
                crate::log_machine_operation!("create", spec.name.as_str());
                self.emit(LifecycleEvent::MachineCreated(spec.name));
                Ok(())
            }
            Err(e) => {
                self.emit(LifecycleEvent::MachineFailed {
                    name: spec.name,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Start the master service and find the address its UI is served on
    async fn deploy_master(&self, compose: &Compose, master: &str) -> Result<(DockerEnv, String)> {
        let swarm_env = self.machines.env(master, true).await?;
        compose
            .up(&self.config.spark.master_service, &swarm_env)
            .await?;

        let host = match self.directory.address_of(master, AddressKind::Public).await {
            Ok(dns) => dns,
            Err(e) => {
                warn!("Public DNS lookup for {} failed ({}), using machine IP", master, e);
                self.machines.ip(master).await?
            }
        };

        Ok((swarm_env, host))
    }

    async fn provision_workers(
        &self,
        request: &ClusterRequest,
        names: &ClusterNames,
        consul: &str,
        ledger: &mut ProvisionLedger,
    ) -> Result<WorkerOutcome> {
        let worker_names: Vec<String> = (0..request.num_workers)
            .map(|i| names.worker_name(i))
            .collect();
        for name in &worker_names {
            ledger.record(name, NodeRole::Worker);
        }

        info!(
            "Bringing up {} workers ({} at a time)...",
            worker_names.len(),
            self.config.cluster.max_parallel_provisioning
        );

        let results: Vec<(String, Result<()>)> = stream::iter(worker_names)
            .map(|name| async move {
                let spec = self.worker_spec(request, consul, &name);
                let result = self.create_machine(spec).await;
                (name, result)
            })
            .buffer_unordered(self.config.cluster.max_parallel_provisioning)
            .collect()
            .await;

        let mut provisioned = Vec::new();
        let mut failures = Vec::new();
        for (name, result) in results {
            match result {
                Ok(()) => provisioned.push(name),
                Err(e) => {
                    warn!("Worker {} failed: {}", name, e);
                    failures.push((name, e));
                }
            }
        }
        provisioned.sort_by_key(|name| worker_index(name));

        let failed: Vec<String> = failures.iter().map(|(name, _)| name.clone()).collect();
        let mut leaked = Vec::new();
        if !failed.is_empty() {
            // Leftovers of failed workers go now; whatever cannot be removed
            // stays in the ledger for the rollback to retry
            for (name, result) in self.remove_many(failed.clone()).await {
                match result {
                    Ok(_) => ledger.forget(&name),
                    Err(e) => {
                        warn!("Could not remove failed worker {}: {}", name, e);
                        leaked.push(name);
                    }
                }
            }
            leaked.sort_by_key(|name| worker_index(name));
        }

        let required = request.required_workers();
        if provisioned.len() < required {
            let first = failures
                .into_iter()
                .next()
                .map(|(_, e)| e.to_string())
                .unwrap_or_default();
            return Err(Error::System(format!(
                "only {}/{} workers provisioned, {} required (first failure: {})",
                provisioned.len(),
                request.num_workers,
                required,
                first
            )));
        }

        if !failed.is_empty() {
            warn!(
                "Continuing with a degraded cluster: {}/{} workers",
                provisioned.len(),
                request.num_workers
            );
        }

        Ok(WorkerOutcome {
            provisioned,
            failed,
            leaked,
        })
    }

    async fn verify_health(
        &self,
        master_host: &str,
        required_workers: usize,
    ) -> Result<spark::SparkMasterStatus> {
        let probe = self.probes.probe_for(master_host)?;
        let policy = HealthPolicy {
            timeout: self.config.health.timeout(),
            interval: self.config.health.interval(),
            required_workers,
        };
        wait_for_master(probe.as_ref(), &policy).await
    }

    /// Remove machines concurrently, reporting each outcome
    async fn remove_many(&self, names: Vec<String>) -> Vec<(String, Result<bool>)> {
        stream::iter(names)
            .map(|name| async move {
                let result = self.machines.remove(&name).await;
                if result.is_ok() {
                    crate::log_machine_operation!("remove", name.as_str());
                    self.emit(LifecycleEvent::MachineRemoved(name.clone()));
                }
                (name, result)
            })
            .buffer_unordered(self.config.cluster.max_parallel_provisioning)
            .collect()
            .await
    }

    /// Unwind the ledger: workers first, the master last
    pub async fn rollback(&self, ledger: &ProvisionLedger) -> (Vec<String>, Vec<String>) {
        info!("Rolling back {} machines", ledger.names().len());
        self.emit(LifecycleEvent::RollbackStarted);

        let order = ledger.unwind_order();
        let workers: Vec<String> = order
            .iter()
            .filter(|e| e.role == NodeRole::Worker)
            .map(|e| e.name.clone())
            .collect();
        let masters: Vec<String> = order
            .iter()
            .filter(|e| e.role == NodeRole::Master)
            .map(|e| e.name.clone())
            .collect();

        let mut rolled_back = Vec::new();
        let mut leaked = Vec::new();

        let mut outcomes = self.remove_many(workers).await;
        for master in masters {
            let result = self.machines.remove(&master).await;
            if result.is_ok() {
                self.emit(LifecycleEvent::MachineRemoved(master.clone()));
            }
            outcomes.push((master, result));
        }

        for (name, result) in outcomes {
            match result {
                Ok(_) => rolled_back.push(name),
                Err(e) => {
                    error!("Rollback could not remove {}: {}", name, e);
                    leaked.push(name);
                }
            }
        }

        (rolled_back, leaked)
    }

    async fn fail(
        &self,
        phase: LifecyclePhase,
        cause: Error,
        ledger: &ProvisionLedger,
        keep_on_failure: bool,
    ) -> Error {
        if ledger.is_empty() {
            return cause;
        }

        let (rolled_back, leaked) = if keep_on_failure {
            warn!(
                "Keeping {} machines for inspection: {}",
                ledger.names().len(),
                ledger.names().join(", ")
            );
            (Vec::new(), ledger.names())
        } else {
            self.rollback(ledger).await
        };

        Error::ProvisioningFailed {
            phase,
            cause: Box::new(cause),
            rolled_back,
            leaked,
        }
    }

    /// Remove every machine of a cluster, workers first. `compose_file` should
    /// be the file the cluster was created with; `None` falls back to the
    /// configured or bundled one.
    pub async fn destroy_cluster(
        &self,
        prefix: &str,
        compose_file: Option<&Path>,
    ) -> Result<TeardownReport> {
        simplespark_common::validate_prefix(prefix)?;
        let names = ClusterNames::new(prefix);
        let machines = self.machines.list_cluster(&names).await?;

        let mut report = TeardownReport {
            prefix: prefix.to_string(),
            ..Default::default()
        };

        if machines.is_empty() {
            info!("No machines found for cluster {}", prefix);
            return Ok(report);
        }

        info!("Tearing down {} machines of cluster {}", machines.len(), prefix);

        let (masters, workers): (Vec<_>, Vec<_>) = machines
            .into_iter()
            .partition(|m| m.role == NodeRole::Master);

        if !masters.is_empty() {
            if let Err(e) = self.stop_services(&names.master_name(), compose_file).await {
                warn!("Could not stop Spark services, removing machines anyway: {}", e);
            }
        }

        let mut outcomes = self
            .remove_many(workers.into_iter().map(|m| m.name).collect())
            .await;
        for master in masters {
            let result = self.machines.remove(&master.name).await;
            if result.is_ok() {
                self.emit(LifecycleEvent::MachineRemoved(master.name.clone()));
            }
            outcomes.push((master.name, result));
        }

        for (name, result) in outcomes {
            match result {
                Ok(_) => report.removed.push(name),
                Err(e) => {
                    error!("Failed to remove {}: {}", name, e);
                    report.failed.push(TeardownFailure {
                        name,
                        reason: e.to_string(),
                    });
                }
            }
        }
        report.removed.sort_by_key(|name| worker_index(name));

        Ok(report)
    }

    /// `docker-compose down` against the swarm of `master`
    async fn stop_services(&self, master: &str, compose_file: Option<&Path>) -> Result<()> {
        let file = resolve_compose_file(
            compose_file.or(self.config.cluster.compose_file.as_deref()),
            &self.config.cluster.work_dir,
        )?;
        let swarm_env = self.machines.env(master, true).await?;
        Compose::new(self.runner.clone(), file).down(&swarm_env).await
    }

    /// Machines, master UI and (best effort) Spark status of a cluster
    pub async fn cluster_status(&self, prefix: &str) -> Result<ClusterStatus> {
        simplespark_common::validate_prefix(prefix)?;
        let names = ClusterNames::new(prefix);
        let machines = self.machines.list_cluster(&names).await?;

        let mut status = ClusterStatus {
            prefix: prefix.to_string(),
            machines,
            master_ui: None,
            spark: None,
        };

        if !status.has_master() {
            return Ok(status);
        }

        let master = names.master_name();
        let host = match self.directory.address_of(&master, AddressKind::Public).await {
            Ok(host) => host,
            Err(e) => {
                warn!("Cannot resolve master address: {}", e);
                return Ok(status);
            }
        };
        status.master_ui = Some(master_ui_url(&host, self.config.spark.ui_port));

        match self.probes.probe_for(&host) {
            Ok(probe) => match probe.status().await {
                Ok(spark) => status.spark = Some(spark.summary()),
                Err(e) => warn!("Spark master not reachable: {}", e),
            },
            Err(e) => warn!("Cannot probe Spark master: {}", e),
        }

        Ok(status)
    }

    /// Compute a few digits of Pi on the cluster
    pub async fn test_cluster(&self, prefix: &str, partitions: Option<u32>) -> Result<SmokeTestReport> {
        simplespark_common::validate_prefix(prefix)?;
        let master = ClusterNames::new(prefix).master_name();
        let swarm_env = self.machines.env(&master, true).await?;

        info!("Submitting job to {}", master);
        let started = Instant::now();
        let pi_estimate =
            spark::submit_pi(self.runner.as_ref(), &self.config.spark, &swarm_env, partitions)
                .await?;
        let duration_ms = started.elapsed().as_millis() as u64;
        crate::log_performance!("spark_pi", duration_ms);

        Ok(SmokeTestReport {
            prefix: prefix.to_string(),
            master,
            pi_estimate,
            duration_ms,
        })
    }

    /// Create the Consul service-discovery box
    pub async fn create_consul(&self, options: &ConsulBoxOptions) -> Result<ConsulBox> {
        discovery::create_consul_box(
            &self.machines,
            self.runner.as_ref(),
            options,
            &self.config.consul,
        )
        .await
    }

    /// Destroy the Consul service-discovery box
    pub async fn destroy_consul(&self, name: &str) -> Result<()> {
        discovery::destroy_consul_box(&self.machines, name).await
    }
}

/// Sort key putting the master first and workers in index order
fn worker_index(name: &str) -> usize {
    name.rsplit_once("-worker-")
        .and_then(|(_, index)| index.parse::<usize>().ok())
        .map(|i| i + 1)
        .unwrap_or(0)
}
