//! SimpleSpark CLI
//!
//! Command-line interface for spinning Spark clusters up and down on EC2

mod commands;
mod output;
mod progress;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use commands::cluster::CreateArgs;
use commands::config::ConfigCommands;
use commands::consul::ConsulCommands;
use output::OutputFormat;
use simplespark_core::logging::LogOptions;
use simplespark_core::SimpleSparkConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(short = 'C', long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table", global = true)]
    output: OutputFormat,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a Spark cluster
    Create(CreateArgs),
    /// Destroy a Spark cluster
    Destroy {
        /// Cluster prefix
        #[arg(short, long)]
        prefix: Option<String>,
        /// docker-compose file the cluster was created with
        #[arg(short = 'f', long)]
        compose_file: Option<PathBuf>,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Show the machines and Spark status of a cluster
    Status {
        /// Cluster prefix
        #[arg(short, long)]
        prefix: Option<String>,
    },
    /// Run a Spark Pi job on a cluster
    Test {
        /// Cluster prefix
        #[arg(short, long)]
        prefix: Option<String>,
        /// Number of partitions (slices) for the job
        #[arg(long)]
        partitions: Option<u32>,
    },
    /// Manage the Consul discovery box
    Consul {
        #[command(subcommand)]
        command: ConsulCommands,
    },
    /// Check that docker-machine, docker, docker-compose and aws are installed
    Preflight,
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Commands that do not need a valid configuration
    match &cli.command {
        Commands::Completions { shell } => {
            generate_completions(*shell);
            return Ok(());
        }
        Commands::Config {
            command: ConfigCommands::Sample,
        } => {
            commands::config::sample();
            return Ok(());
        }
        _ => {}
    }

    let config = SimpleSparkConfig::load(cli.config.as_deref())?;

    let _guard = LogOptions::from_config(&config.logging)
        .with_verbosity(cli.verbose)
        .init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    tracing::debug!("Loaded configuration: {:?}", config);

    let format = cli.output;
    match cli.command {
        Commands::Create(args) => commands::cluster::create(&config, args, format).await,
        Commands::Destroy {
            prefix,
            compose_file,
            yes,
        } => commands::cluster::destroy(&config, prefix, compose_file, yes, format).await,
        Commands::Status { prefix } => commands::cluster::status(&config, prefix, format).await,
        Commands::Test { prefix, partitions } => {
            commands::cluster::test(&config, prefix, partitions, format).await
        }
        Commands::Consul { command } => {
            commands::consul::handle_consul_command(command, &config, format).await
        }
        Commands::Preflight => commands::preflight::handle_preflight_command(&config, format).await,
        Commands::Config { command } => match command {
            ConfigCommands::Show => commands::config::show(&config, format),
            ConfigCommands::Sample => {
                commands::config::sample();
                Ok(())
            }
        },
        Commands::Completions { shell } => {
            generate_completions(shell);
            Ok(())
        }
    }
}

/// Generate shell completions
fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();

    generate(shell, &mut cmd, name, &mut io::stdout());
}
