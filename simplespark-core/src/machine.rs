//! docker-machine integration
//!
//! Machines are created on EC2 through the `amazonec2` driver. Swarm membership
//! and Consul-backed discovery are configured at creation time.

use crate::process::{run_checked, CommandRunner, CommandSpec};
use once_cell::sync::Lazy;
use regex::Regex;
use simplespark_common::{ClusterNames, Error, Machine, MachineState, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

const DOCKER_MACHINE: &str = "docker-machine";

/// Port Consul serves its HTTP API on
pub const CONSUL_HTTP_PORT: u16 = 8500;

/// Port the Docker engine advertises itself on inside the swarm
pub const ENGINE_ADVERTISE_PORT: u16 = 2376;

/// Environment handed to docker / docker-compose to reach a machine or swarm
pub type DockerEnv = Vec<(String, String)>;

static EXPORT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^\s*export\s+([A-Za-z_][A-Za-z0-9_]*)="?([^"\r\n]*)"?\s*$"#)
        .expect("export regex is valid")
});

/// EC2 driver settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ec2Options {
    pub security_group: String,
    pub instance_type: String,
    pub region: Option<String>,
    /// Bid price; `Some` requests a spot instance
    pub spot_price: Option<String>,
}

/// Swarm membership settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwarmOptions {
    /// Address of the Consul box used for discovery and as cluster store
    pub discovery: String,
    pub network_interface: String,
    pub master: bool,
}

/// Everything needed for one `docker-machine create`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineSpec {
    pub name: String,
    pub ec2: Ec2Options,
    pub swarm: Option<SwarmOptions>,
    pub engine_labels: Vec<(String, String)>,
}

impl MachineSpec {
    /// Arguments for `docker-machine create`
    pub fn create_args(&self) -> Vec<String> {
        let mut args = vec![
            "create".to_string(),
            "--driver".to_string(),
            "amazonec2".to_string(),
            format!("--amazonec2-security-group={}", self.ec2.security_group),
            format!("--amazonec2-instance-type={}", self.ec2.instance_type),
        ];

        if let Some(region) = &self.ec2.region {
            args.push(format!("--amazonec2-region={}", region));
        }

        if let Some(price) = &self.ec2.spot_price {
            args.push("--amazonec2-request-spot-instance".to_string());
            args.push(format!("--amazonec2-spot-price={}", price));
        }

        if let Some(swarm) = &self.swarm {
            let store = format!("consul://{}:{}", swarm.discovery, CONSUL_HTTP_PORT);
            args.push("--swarm".to_string());
            if swarm.master {
                args.push("--swarm-master".to_string());
            }
            args.push(format!("--swarm-discovery={}", store));
            args.push(format!("--engine-opt=cluster-store={}", store));
            args.push(format!(
                "--engine-opt=cluster-advertise={}:{}",
                swarm.network_interface, ENGINE_ADVERTISE_PORT
            ));
        }

        for (key, value) in &self.engine_labels {
            args.push("--engine-label".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.push(self.name.clone());
        args
    }
}

/// One row of `docker-machine ls`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineEntry {
    pub name: String,
    pub state: MachineState,
    pub url: Option<String>,
}

/// Parse `docker-machine ls --format '{{.Name}}\t{{.State}}\t{{.URL}}'`
pub fn parse_machine_list(output: &str) -> Vec<MachineEntry> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let mut cols = line.split('\t');
            let name = cols.next().unwrap_or_default().trim().to_string();
            let state = MachineState::parse(cols.next().unwrap_or_default());
            let url = cols
                .next()
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string);
            MachineEntry { name, state, url }
        })
        .filter(|entry| !entry.name.is_empty())
        .collect()
}

/// Parse the `export KEY="value"` lines of `docker-machine env --shell sh`
pub fn parse_env_exports(output: &str) -> DockerEnv {
    EXPORT_LINE
        .captures_iter(output)
        .map(|cap| (cap[1].to_string(), cap[2].to_string()))
        .collect()
}

fn is_missing_machine(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("does not exist") || stderr.contains("not found")
}

/// docker-machine manager
pub struct DockerMachine {
    runner: Arc<dyn CommandRunner>,
}

impl DockerMachine {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Create and boot a machine
    pub async fn create(&self, spec: &MachineSpec) -> Result<()> {
        info!(
            "Creating machine {} ({}{})",
            spec.name,
            spec.ec2.instance_type,
            if spec.ec2.spot_price.is_some() { ", spot" } else { "" }
        );

        let cmd = CommandSpec::new(DOCKER_MACHINE).args(spec.create_args());
        run_checked(self.runner.as_ref(), &cmd).await?;

        info!("Machine {} created successfully", spec.name);
        Ok(())
    }

    /// Remove a machine. Returns `false` if it did not exist.
    pub async fn remove(&self, name: &str) -> Result<bool> {
        info!("Removing machine {}", name);

        let cmd = CommandSpec::new(DOCKER_MACHINE).args(["rm", "-y", name]);
        let output = self.runner.run(&cmd).await?;

        if output.success() {
            info!("Machine {} removed", name);
            return Ok(true);
        }

        if is_missing_machine(&output.stderr) {
            debug!("Machine {} does not exist, nothing to remove", name);
            return Ok(false);
        }

        Err(Error::CommandFailed {
            program: cmd.program,
            args: cmd.args.join(" "),
            code: output.status_code,
            stderr: output.stderr.trim().to_string(),
        })
    }

    /// Connection flags for `docker` (`--tlsverify --tlscacert=... -H=...`)
    pub async fn connection_flags(&self, name: &str) -> Result<Vec<String>> {
        let cmd = CommandSpec::new(DOCKER_MACHINE).args(["config", name]);
        let output = run_checked(self.runner.as_ref(), &cmd).await?;

        let flags: Vec<String> = output
            .stdout
            .split_whitespace()
            .map(|flag| flag.replace('"', ""))
            .collect();

        if flags.is_empty() {
            return Err(Error::Parse {
                what: format!("docker-machine config for {}", name),
                message: "empty output".to_string(),
            });
        }

        Ok(flags)
    }

    /// Environment pointing docker at the machine, or at its swarm when `swarm` is set
    pub async fn env(&self, name: &str, swarm: bool) -> Result<DockerEnv> {
        let mut cmd = CommandSpec::new(DOCKER_MACHINE).args(["env", "--shell", "sh"]);
        if swarm {
            cmd = cmd.arg("--swarm");
        }
        cmd = cmd.arg(name);

        let output = run_checked(self.runner.as_ref(), &cmd).await?;
        let env = parse_env_exports(&output.stdout);

        if !env.iter().any(|(key, _)| key == "DOCKER_HOST") {
            return Err(Error::Parse {
                what: format!("docker-machine env for {}", name),
                message: "no DOCKER_HOST export found".to_string(),
            });
        }

        Ok(env)
    }

    /// Public IP of a machine
    pub async fn ip(&self, name: &str) -> Result<String> {
        let cmd = CommandSpec::new(DOCKER_MACHINE).args(["ip", name]);
        let output = run_checked(self.runner.as_ref(), &cmd).await?;
        Ok(output.stdout.trim().to_string())
    }

    /// Every machine docker-machine knows about
    pub async fn list_all(&self) -> Result<Vec<MachineEntry>> {
        let cmd = CommandSpec::new(DOCKER_MACHINE).args([
            "ls",
            "--format",
            "{{.Name}}\t{{.State}}\t{{.URL}}",
        ]);
        let output = run_checked(self.runner.as_ref(), &cmd).await?;
        Ok(parse_machine_list(&output.stdout))
    }

    /// Machines belonging to a cluster, master first, workers by index
    pub async fn list_cluster(&self, names: &ClusterNames) -> Result<Vec<Machine>> {
        let mut machines: Vec<Machine> = self
            .list_all()
            .await?
            .into_iter()
            .filter_map(|entry| {
                names.role_of(&entry.name).map(|role| Machine {
                    name: entry.name,
                    role,
                    state: entry.state,
                    url: entry.url,
                })
            })
            .collect();

        let worker_prefix = names.worker_prefix();
        machines.sort_by_key(|m| {
            m.name
                .strip_prefix(&worker_prefix)
                .and_then(|i| i.parse::<usize>().ok())
                .map(|i| i + 1)
                .unwrap_or(0)
        });

        if machines.iter().any(|m| m.state == MachineState::Error) {
            warn!("Cluster {} has machines in error state", names.prefix());
        }

        Ok(machines)
    }
}
