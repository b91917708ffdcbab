use crate::commands::{confirm, orchestrator};
use crate::output::{self, OutputFormat};
use crate::progress::Progress;
use anyhow::Result;
use clap::Subcommand;
use simplespark_core::discovery::ConsulBoxOptions;
use simplespark_core::SimpleSparkConfig;

#[derive(Subcommand, Debug)]
pub enum ConsulCommands {
    /// Create the Consul box used for swarm discovery
    Create {
        /// Machine name
        #[arg(short, long)]
        name: Option<String>,
        /// EC2 instance type
        #[arg(short = 't', long)]
        instance_type: Option<String>,
        /// EC2 security group
        #[arg(short = 'g', long)]
        security_group: Option<String>,
    },
    /// Destroy the Consul box
    Destroy {
        /// Machine name
        #[arg(short, long)]
        name: Option<String>,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

pub async fn handle_consul_command(
    command: ConsulCommands,
    config: &SimpleSparkConfig,
    format: OutputFormat,
) -> Result<()> {
    match command {
        ConsulCommands::Create {
            name,
            instance_type,
            security_group,
        } => {
            let mut options = ConsulBoxOptions::from_config(&config.consul, config.aws.region.clone());
            if let Some(name) = name {
                options.name = name;
            }
            if let Some(instance_type) = instance_type {
                options.instance_type = instance_type;
            }
            if let Some(security_group) = security_group {
                options.security_group = security_group;
            }

            let progress = Progress::start(
                &format!("Creating Consul box '{}'", options.name),
                format.is_interactive(),
            );
            let result = orchestrator(config, None).create_consul(&options).await;
            progress.finish().await;
            let consul = result?;

            if !output::print_structured(&consul, format)? {
                output::print_success(&format!(
                    "Consul box '{}' running at {}",
                    consul.name, consul.address
                ));
                output::print_info(&format!(
                    "Create clusters with: simplespark create <NUM_WORKERS> --consul {}",
                    consul.name
                ));
            }
        }

        ConsulCommands::Destroy { name, yes } => {
            let name = name.unwrap_or_else(|| config.consul.box_name.clone());

            if !confirm(&format!("Destroy Consul box '{}'?", name), yes)? {
                output::print_info("Teardown aborted");
                return Ok(());
            }

            orchestrator(config, None).destroy_consul(&name).await?;
            output::print_success(&format!("Consul box '{}' destroyed", name));
        }
    }

    Ok(())
}
