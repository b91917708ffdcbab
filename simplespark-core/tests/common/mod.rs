//! Common test utilities and helpers
//!
//! `FakeCloud` stands in for docker-machine, docker, docker-compose and the
//! AWS CLI. It keeps a set of machines so tests can assert on what a
//! lifecycle operation left behind.

#![allow(dead_code)]

use async_trait::async_trait;
use simplespark_common::{ClusterRequest, Error, Result};
use simplespark_core::config::SimpleSparkConfig;
use simplespark_core::orchestrator::ProbeFactory;
use simplespark_core::process::{CommandOutput, CommandRunner, CommandSpec};
use simplespark_core::spark::{MasterProbe, SparkMasterStatus};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PRIVATE_IP: &str = "172.31.0.10";
pub const MACHINE_IP: &str = "52.0.0.1";

#[derive(Default)]
struct CloudState {
    machines: BTreeMap<String, &'static str>,
    fail_create: HashSet<String>,
    fail_remove: HashSet<String>,
    missing_tools: HashSet<String>,
    fail_compose: bool,
    fail_docker_run: bool,
    create_delay: Option<Duration>,
    calls: Vec<CommandSpec>,
}

/// In-memory stand-in for the external tools
#[derive(Default)]
pub struct FakeCloud {
    state: Mutex<CloudState>,
    creating: AtomicUsize,
    peak_creating: AtomicUsize,
}

fn ok(stdout: impl Into<String>) -> Result<CommandOutput> {
    Ok(CommandOutput {
        status_code: 0,
        stdout: stdout.into(),
        stderr: String::new(),
    })
}

fn failed(stderr: impl Into<String>) -> Result<CommandOutput> {
    Ok(CommandOutput {
        status_code: 1,
        stdout: String::new(),
        stderr: stderr.into(),
    })
}

impl FakeCloud {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_machine(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .machines
            .insert(name.to_string(), "Running");
    }

    pub fn fail_create(&self, name: &str) {
        self.state.lock().unwrap().fail_create.insert(name.to_string());
    }

    pub fn fail_remove(&self, name: &str) {
        self.state.lock().unwrap().fail_remove.insert(name.to_string());
    }

    pub fn missing_tool(&self, tool: &str) {
        self.state.lock().unwrap().missing_tools.insert(tool.to_string());
    }

    pub fn fail_compose(&self) {
        self.state.lock().unwrap().fail_compose = true;
    }

    pub fn fail_docker_run(&self) {
        self.state.lock().unwrap().fail_docker_run = true;
    }

    /// Make every `docker-machine create` take `delay`
    pub fn slow_create(&self, delay: Duration) {
        self.state.lock().unwrap().create_delay = Some(delay);
    }

    /// Most `docker-machine create` calls seen in flight at once
    pub fn peak_creating(&self) -> usize {
        self.peak_creating.load(Ordering::SeqCst)
    }

    pub fn machines(&self) -> Vec<String> {
        self.state.lock().unwrap().machines.keys().cloned().collect()
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls to `program` whose first argument is `subcommand`
    pub fn calls_to(&self, program: &str, subcommand: &str) -> Vec<CommandSpec> {
        self.calls()
            .into_iter()
            .filter(|c| c.program == program && c.args.first().map(String::as_str) == Some(subcommand))
            .collect()
    }

    /// Names passed to `docker-machine create`, in call order
    pub fn created(&self) -> Vec<String> {
        self.calls_to("docker-machine", "create")
            .into_iter()
            .filter_map(|c| c.args.last().cloned())
            .collect()
    }

    fn docker_machine(&self, state: &mut CloudState, args: &[String]) -> Result<CommandOutput> {
        let sub = args.first().map(String::as_str).unwrap_or_default();
        let name = args.last().cloned().unwrap_or_default();

        match sub {
            "create" => {
                if state.fail_create.contains(&name) {
                    // docker-machine keeps half-created hosts around
                    state.machines.insert(name, "Error");
                    return failed("Error creating machine: Error with pre-create check: spot request failed");
                }
                state.machines.insert(name, "Running");
                ok("Docker is up and running!")
            }
            "rm" => {
                if state.fail_remove.contains(&name) {
                    return failed("Error removing host: UnauthorizedOperation");
                }
                if state.machines.remove(&name).is_none() {
                    return failed(format!("Host does not exist: \"{}\"", name));
                }
                ok(format!("Successfully removed {}", name))
            }
            "ls" => {
                let lines: Vec<String> = state
                    .machines
                    .iter()
                    .map(|(name, st)| format!("{}\t{}\ttcp://{}:2376", name, st, MACHINE_IP))
                    .collect();
                ok(lines.join("\n"))
            }
            "env" => {
                if !state.machines.contains_key(&name) {
                    return failed(format!("Host does not exist: \"{}\"", name));
                }
                ok(format!(
                    "export DOCKER_TLS_VERIFY=\"1\"\nexport DOCKER_HOST=\"tcp://{}:3376\"\nexport DOCKER_MACHINE_NAME=\"{}\"\n# eval $(docker-machine env --swarm {})\n",
                    MACHINE_IP, name, name
                ))
            }
            "ip" => ok(format!("{}\n", MACHINE_IP)),
            "config" => ok(format!(
                "--tlsverify\n--tlscacert=\"/certs/ca.pem\"\n-H=tcp://{}:2376\n",
                MACHINE_IP
            )),
            _ => ok(""),
        }
    }

    fn aws(&self, state: &CloudState, args: &[String]) -> Result<CommandOutput> {
        let name = args
            .iter()
            .find_map(|a| a.strip_prefix("Name=tag:Name,Values="))
            .unwrap_or_default();

        if !state.machines.contains_key(name) {
            return ok(r#"{"Reservations": []}"#);
        }

        ok(serde_json::json!({
            "Reservations": [{
                "Instances": [{
                    "InstanceId": format!("i-{}", name),
                    "State": {"Code": 16, "Name": "running"},
                    "PrivateIpAddress": PRIVATE_IP,
                    "PublicDnsName": format!("{}.compute.amazonaws.com", name),
                    "Tags": [{"Key": "Name", "Value": name}]
                }]
            }]
        })
        .to_string())
    }
}

#[async_trait]
impl CommandRunner for FakeCloud {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let is_create = spec.program == "docker-machine"
            && spec.args.first().map(String::as_str) == Some("create");
        let delay = self.state.lock().unwrap().create_delay;
        if let (true, Some(delay)) = (is_create, delay) {
            let now = self.creating.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_creating.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            self.creating.fetch_sub(1, Ordering::SeqCst);
        }

        let mut state = self.state.lock().unwrap();
        state.calls.push(spec.clone());

        if spec.args == ["--version"] {
            if state.missing_tools.contains(&spec.program) {
                return Err(Error::ToolUnavailable(spec.program.clone()));
            }
            return ok(format!("{} version 1.0.0", spec.program));
        }

        match spec.program.as_str() {
            "docker-machine" => self.docker_machine(&mut state, &spec.args),
            "aws" => self.aws(&state, &spec.args),
            "docker-compose" if state.fail_compose => failed("ERROR: Couldn't connect to Docker daemon"),
            "docker" if spec.args.iter().any(|a| a == "spark-submit") => {
                ok("Pi is roughly 3.14159\n")
            }
            "docker" if state.fail_docker_run => failed("docker: Error response from daemon: port is already allocated."),
            _ => ok(""),
        }
    }
}

struct FixedProbe {
    alive_workers: Option<usize>,
}

#[async_trait]
impl MasterProbe for FixedProbe {
    async fn status(&self) -> Result<SparkMasterStatus> {
        match self.alive_workers {
            Some(alive) => Ok(SparkMasterStatus {
                url: "spark://master:7077".to_string(),
                status: "ALIVE".to_string(),
                workers: Vec::new(),
                aliveworkers: Some(alive),
                cores: (alive * 2) as u32,
                memory: (alive * 1024) as u64,
            }),
            None => Err(Error::Http("connection refused".to_string())),
        }
    }
}

/// Probes that always report the same number of alive workers
pub struct FixedProbes {
    alive_workers: Mutex<Option<usize>>,
    hosts: Mutex<Vec<String>>,
}

impl FixedProbes {
    pub fn alive(workers: usize) -> Arc<Self> {
        Arc::new(Self {
            alive_workers: Mutex::new(Some(workers)),
            hosts: Mutex::new(Vec::new()),
        })
    }

    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            alive_workers: Mutex::new(None),
            hosts: Mutex::new(Vec::new()),
        })
    }

    pub fn hosts(&self) -> Vec<String> {
        self.hosts.lock().unwrap().clone()
    }
}

impl ProbeFactory for FixedProbes {
    fn probe_for(&self, host: &str) -> Result<Box<dyn MasterProbe>> {
        self.hosts.lock().unwrap().push(host.to_string());
        Ok(Box::new(FixedProbe {
            alive_workers: *self.alive_workers.lock().unwrap(),
        }))
    }
}

/// Config tuned for fast tests
pub fn test_config(work_dir: &Path) -> SimpleSparkConfig {
    let mut config = SimpleSparkConfig::default();
    config.cluster.work_dir = work_dir.to_path_buf();
    config.cluster.max_parallel_provisioning = 4;
    config.health.timeout_secs = 1;
    config.health.interval_secs = 1;
    config
}

/// A request for `workers` workers using a compose file inside `work_dir`
pub fn test_request(work_dir: &Path, workers: usize) -> ClusterRequest {
    let compose_file = work_dir.join("docker-compose.yml");
    std::fs::write(&compose_file, "version: \"2\"\n").unwrap();

    ClusterRequest {
        prefix: "spark".to_string(),
        num_workers: workers,
        min_workers: None,
        security_group: "simplespark".to_string(),
        consul: "10.0.0.5".to_string(),
        network_interface: "eth0".to_string(),
        master_instance_type: "m4.large".to_string(),
        worker_instance_type: "m4.2xlarge".to_string(),
        worker_spot_price: "0.074".to_string(),
        compose_file,
        skip_health_check: false,
        keep_on_failure: false,
    }
}
