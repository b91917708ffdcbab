pub mod cluster;
pub mod config;
pub mod consul;
pub mod preflight;

use crate::progress::Progress;
use simplespark_core::{Orchestrator, SimpleSparkConfig, SystemRunner};
use std::sync::Arc;

/// Orchestrator running real tools, reporting to `progress` when given
pub fn orchestrator(config: &SimpleSparkConfig, progress: Option<&Progress>) -> Orchestrator {
    let orchestrator = Orchestrator::new(config.clone(), Arc::new(SystemRunner::new()));
    match progress.and_then(Progress::events) {
        Some(events) => orchestrator.with_events(events),
        None => orchestrator,
    }
}

/// Ask before doing something destructive, unless `assume_yes`
pub fn confirm(prompt: &str, assume_yes: bool) -> anyhow::Result<bool> {
    if assume_yes {
        return Ok(true);
    }

    let confirmed = dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?;
    Ok(confirmed)
}
