//! EC2 instance lookup through the AWS CLI

use crate::process::{run_checked, CommandRunner, CommandSpec};
use serde::Deserialize;
use simplespark_common::{Error, Result};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstancesOutput {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    #[serde(default)]
    instances: Vec<RawInstance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawInstance {
    instance_id: String,
    state: RawState,
    private_ip_address: Option<String>,
    public_dns_name: Option<String>,
    #[serde(default)]
    tags: Vec<RawTag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawState {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawTag {
    key: String,
    value: String,
}

/// An EC2 instance as seen by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    pub instance_id: String,
    pub name: Option<String>,
    pub state: String,
    pub private_ip: Option<String>,
    pub public_dns: Option<String>,
}

impl InstanceInfo {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// Which address of an instance to return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Private,
    Public,
}

/// Flatten `aws ec2 describe-instances` JSON
pub fn parse_instances(raw: &str) -> Result<Vec<InstanceInfo>> {
    let parsed: DescribeInstancesOutput = serde_json::from_str(raw).map_err(|e| Error::Parse {
        what: "describe-instances output".to_string(),
        message: e.to_string(),
    })?;

    Ok(parsed
        .reservations
        .into_iter()
        .flat_map(|r| r.instances)
        .map(|i| InstanceInfo {
            name: i
                .tags
                .into_iter()
                .find(|t| t.key == "Name")
                .map(|t| t.value),
            instance_id: i.instance_id,
            state: i.state.name,
            private_ip: i.private_ip_address.filter(|ip| !ip.is_empty()),
            public_dns: i.public_dns_name.filter(|dns| !dns.is_empty()),
        })
        .collect())
}

/// Instance lookups keyed by `Name` tag (docker-machine tags instances with the machine name)
pub struct InstanceDirectory {
    runner: Arc<dyn CommandRunner>,
    region: Option<String>,
}

impl InstanceDirectory {
    pub fn new(runner: Arc<dyn CommandRunner>, region: Option<String>) -> Self {
        Self { runner, region }
    }

    /// Find an instance by its `Name` tag. Prefers a running instance when
    /// terminated ones with the same name are still listed.
    pub async fn find_instance(&self, name: &str) -> Result<InstanceInfo> {
        let mut cmd = CommandSpec::new("aws").args([
            "ec2".to_string(),
            "describe-instances".to_string(),
            "--filters".to_string(),
            format!("Name=tag:Name,Values={}", name),
            "--output".to_string(),
            "json".to_string(),
        ]);
        if let Some(region) = &self.region {
            cmd = cmd.args(["--region", region.as_str()]);
        }

        let output = run_checked(self.runner.as_ref(), &cmd).await?;
        let instances = parse_instances(&output.stdout)?;
        debug!("describe-instances for {} returned {} instances", name, instances.len());

        let mut matching: Vec<InstanceInfo> = instances
            .into_iter()
            .filter(|i| i.name.as_deref() == Some(name))
            .collect();

        if let Some(pos) = matching.iter().position(InstanceInfo::is_running) {
            return Ok(matching.swap_remove(pos));
        }

        matching
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("EC2 instance named {}", name)))
    }

    /// Private IP or public DNS name of a running instance
    pub async fn address_of(&self, name: &str, kind: AddressKind) -> Result<String> {
        let instance = self.find_instance(name).await?;

        if !instance.is_running() {
            return Err(Error::InstanceNotRunning {
                name: name.to_string(),
                state: instance.state,
            });
        }

        let address = match kind {
            AddressKind::Private => instance.private_ip,
            AddressKind::Public => instance.public_dns,
        };

        address.ok_or_else(|| {
            Error::NotFound(format!(
                "{} address for instance {}",
                match kind {
                    AddressKind::Private => "private",
                    AddressKind::Public => "public",
                },
                name
            ))
        })
    }
}
