use crate::output::{self, OutputFormat};
use anyhow::Result;
use clap::Subcommand;
use simplespark_core::SimpleSparkConfig;

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Print a sample configuration file
    Sample,
}

pub fn show(config: &SimpleSparkConfig, format: OutputFormat) -> Result<()> {
    if !output::print_structured(config, format)? {
        println!("{}", toml::to_string_pretty(config)?);
    }
    Ok(())
}

pub fn sample() {
    println!("# SimpleSpark configuration");
    println!("# Save as ~/.config/simplespark/config.toml or ./simplespark.toml");
    println!();
    println!("{}", SimpleSparkConfig::generate_sample());
}
