//! Consul service-discovery box
//!
//! Swarm discovery and the engines' cluster store live on a small, long-lived
//! Consul server. It is created once and normally left running between clusters.

use crate::aws::{AddressKind, InstanceDirectory};
use crate::config::ConsulConfig;
use crate::machine::{DockerMachine, Ec2Options, MachineSpec};
use crate::process::{run_checked, CommandRunner, CommandSpec};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use simplespark_common::{Error, Result};
use tracing::{error, info, warn};

static IPV4: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}(:\d{1,5})?$").expect("ipv4 regex is valid")
});

/// Check if a value looks like an IPv4 address with an optional port
pub fn looks_like_ip(value: &str) -> bool {
    IPV4.is_match(value.trim())
}

/// Settings for creating the Consul box
#[derive(Debug, Clone)]
pub struct ConsulBoxOptions {
    pub name: String,
    pub instance_type: String,
    pub security_group: String,
    pub region: Option<String>,
}

impl ConsulBoxOptions {
    pub fn from_config(config: &ConsulConfig, region: Option<String>) -> Self {
        Self {
            name: config.box_name.clone(),
            instance_type: config.instance_type.clone(),
            security_group: config.security_group.clone(),
            region,
        }
    }
}

/// A running Consul box
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConsulBox {
    pub name: String,
    pub address: String,
}

/// `CONSUL_LOCAL_CONFIG` for a single-node server
pub fn consul_local_config(config: &ConsulConfig) -> serde_json::Value {
    let mut local = json!({
        "bootstrap_expect": 1,
        "datacenter": config.datacenter,
        "data_dir": "/usr/local/bin/consul.d/data",
        "server": true,
    });

    if let Some(token) = &config.acl_master_token {
        local["acl_datacenter"] = json!(config.datacenter);
        local["acl_default_policy"] = json!("deny");
        local["acl_down_policy"] = json!("extend-cache");
        local["acl_master_token"] = json!(token);
    }

    local
}

/// Arguments for `docker <connection flags> run ...` starting the Consul agent
pub fn consul_run_args(connection_flags: &[String], config: &ConsulConfig) -> Vec<String> {
    let mut args: Vec<String> = connection_flags.to_vec();
    args.extend(
        [
            "run",
            "-d",
            "--name",
            "consul",
            "--restart",
            "unless-stopped",
            "-p",
            "8400:8400",
            "-p",
            "8500:8500/tcp",
            "-p",
            "8600:53/udp",
            "-e",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args.push(format!("CONSUL_LOCAL_CONFIG={}", consul_local_config(config)));
    args.push(config.image.clone());
    args.extend(
        ["agent", "-server", "-bind=127.0.0.1", "-client=0.0.0.0"]
            .iter()
            .map(|s| s.to_string()),
    );
    args
}

/// Resolve the Consul box to an address reachable from cluster machines.
/// IP addresses are used as given (minus any port), names are looked up as
/// EC2 instances and resolved to their private IP.
pub async fn resolve_consul(value: &str, directory: &InstanceDirectory) -> Result<String> {
    let value = value.trim();

    if looks_like_ip(value) {
        let host = value.split(':').next().unwrap_or(value);
        if host != value {
            warn!("Ignoring port in Consul address {}, Consul HTTP port is fixed", value);
        }
        return Ok(host.to_string());
    }

    let address = directory.address_of(value, AddressKind::Private).await?;
    info!("Found Consul at {}", address);
    Ok(address)
}

/// Create the Consul box and start the Consul server on it.
/// The machine is removed again if the server cannot be started.
pub async fn create_consul_box(
    machines: &DockerMachine,
    runner: &dyn CommandRunner,
    options: &ConsulBoxOptions,
    config: &ConsulConfig,
) -> Result<ConsulBox> {
    info!("Creating Consul box {}", options.name);

    let spec = MachineSpec {
        name: options.name.clone(),
        ec2: Ec2Options {
            security_group: options.security_group.clone(),
            instance_type: options.instance_type.clone(),
            region: options.region.clone(),
            spot_price: None,
        },
        swarm: None,
        engine_labels: vec![("role".to_string(), "consul".to_string())],
    };
    machines.create(&spec).await?;

    match start_consul(machines, runner, &options.name, config).await {
        Ok(address) => {
            info!("Consul box successfully created at {}", address);
            Ok(ConsulBox {
                name: options.name.clone(),
                address,
            })
        }
        Err(e) => {
            error!("Failed to start Consul on {}: {}", options.name, e);
            if let Err(cleanup) = machines.remove(&options.name).await {
                error!("Failed to remove Consul box {}: {}", options.name, cleanup);
            }
            Err(e)
        }
    }
}

async fn start_consul(
    machines: &DockerMachine,
    runner: &dyn CommandRunner,
    name: &str,
    config: &ConsulConfig,
) -> Result<String> {
    let flags = machines.connection_flags(name).await?;
    let cmd = CommandSpec::new("docker").args(consul_run_args(&flags, config));
    run_checked(runner, &cmd).await?;
    machines.ip(name).await
}

/// Destroy the Consul box
pub async fn destroy_consul_box(machines: &DockerMachine, name: &str) -> Result<()> {
    if looks_like_ip(name) {
        return Err(Error::Validation(format!(
            "{} is an address, not a machine name",
            name
        )));
    }

    if !machines.remove(name).await? {
        return Err(Error::NotFound(format!("Consul box {}", name)));
    }

    Ok(())
}
