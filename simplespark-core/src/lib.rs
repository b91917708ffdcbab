//! SimpleSpark core library
//!
//! Spins Spark clusters up and down on EC2 by driving docker-machine,
//! docker-compose, docker and the AWS CLI.

pub mod aws;
pub mod compose;
pub mod config;
pub mod discovery;
pub mod health;
pub mod logging;
pub mod machine;
pub mod orchestrator;
pub mod process;
pub mod spark;

pub use config::{ConfigError, SimpleSparkConfig};
pub use orchestrator::{LifecycleEvent, Orchestrator, ProbeFactory, ProvisionLedger};
pub use process::{CommandOutput, CommandRunner, CommandSpec, SystemRunner};
