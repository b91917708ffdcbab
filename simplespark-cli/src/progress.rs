//! Spinner fed by orchestrator lifecycle events

use indicatif::{ProgressBar, ProgressStyle};
use simplespark_core::LifecycleEvent;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// Spinner that follows a running lifecycle operation
pub struct Progress {
    sender: Option<UnboundedSender<LifecycleEvent>>,
    task: JoinHandle<()>,
}

impl Progress {
    /// Start a spinner; hidden for non-interactive output
    pub fn start(message: &str, visible: bool) -> Self {
        let spinner = if visible {
            ProgressBar::new_spinner()
        } else {
            ProgressBar::hidden()
        };
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(100));

        let (sender, receiver) = unbounded_channel();
        let task = tokio::spawn(follow(spinner, receiver));

        Self {
            sender: Some(sender),
            task,
        }
    }

    /// Sender to hand to the orchestrator
    pub fn events(&self) -> Option<UnboundedSender<LifecycleEvent>> {
        self.sender.clone()
    }

    /// Stop the spinner once every sender is gone
    pub async fn finish(mut self) {
        self.sender.take();
        let _ = self.task.await;
    }
}

async fn follow(spinner: ProgressBar, mut events: UnboundedReceiver<LifecycleEvent>) {
    let mut removed = 0usize;

    while let Some(event) = events.recv().await {
        match event {
            LifecycleEvent::PhaseStarted(phase) => {
                spinner.set_message(format!("{}...", capitalize(&phase.to_string())));
            }
            LifecycleEvent::MachineCreated(name) => {
                spinner.println(format!("  + {}", name));
            }
            LifecycleEvent::MachineFailed { name, error } => {
                spinner.println(format!("  ! {}: {}", name, error));
            }
            LifecycleEvent::MachineRemoved(name) => {
                removed += 1;
                spinner.println(format!("  - {}", name));
                spinner.set_message(format!("Removed {} machines...", removed));
            }
            LifecycleEvent::RollbackStarted => {
                spinner.set_message("Rolling back...".to_string());
            }
        }
    }

    spinner.finish_and_clear();
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("provision workers"), "Provision workers");
        assert_eq!(capitalize(""), "");
    }

    #[tokio::test]
    async fn test_finish_after_senders_dropped() {
        let progress = Progress::start("Working", false);
        let events = progress.events().unwrap();
        events.send(LifecycleEvent::RollbackStarted).unwrap();
        drop(events);
        progress.finish().await;
    }
}
