//! External command execution
//!
//! Every tool the orchestrator drives (docker-machine, docker, docker-compose,
//! aws) goes through a `CommandRunner`, so the whole lifecycle can be
//! exercised against a scripted runner in tests.

use async_trait::async_trait;
use simplespark_common::{Error, Result};
use tokio::process::Command;
use tracing::{debug, error};

/// A single external invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Extra variables layered over the parent environment
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs(mut self, env: &[(String, String)]) -> Self {
        self.env.extend(env.iter().cloned());
        self
    }

    /// Rendered command line, for logs and error messages
    pub fn display_args(&self) -> String {
        self.args.join(" ")
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; -1 when the process was killed by a signal
    pub status_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion. Only spawn failures are errors here,
    /// a non-zero exit is reported through `CommandOutput::status_code`.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runs commands on the local system
#[derive(Debug, Default, Clone)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!("Running: {} {}", spec.program, spec.display_args());

        let output = Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::ToolUnavailable(spec.program.clone())
                } else {
                    Error::System(format!("Failed to run {}: {}", spec.program, e))
                }
            })?;

        Ok(CommandOutput {
            status_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Run a command and turn a non-zero exit into `Error::CommandFailed`
pub async fn run_checked(runner: &dyn CommandRunner, spec: &CommandSpec) -> Result<CommandOutput> {
    let output = runner.run(spec).await?;

    if !output.success() {
        let stderr = output.stderr.trim().to_string();
        error!(
            "{} {} failed (status {}): {}",
            spec.program,
            spec.display_args(),
            output.status_code,
            stderr
        );
        return Err(Error::CommandFailed {
            program: spec.program.clone(),
            args: spec.display_args(),
            code: output.status_code,
            stderr,
        });
    }

    Ok(output)
}

/// Availability of one required tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCheck {
    pub tool: String,
    pub version: Option<String>,
}

impl ToolCheck {
    pub fn available(&self) -> bool {
        self.version.is_some()
    }
}

/// Tools the cluster lifecycle depends on
pub const REQUIRED_TOOLS: &[&str] = &["docker-machine", "docker", "docker-compose", "aws"];

/// Run `<tool> --version` for each tool
pub async fn check_tools(runner: &dyn CommandRunner, tools: &[&str]) -> Vec<ToolCheck> {
    let mut checks = Vec::with_capacity(tools.len());

    for tool in tools {
        let spec = CommandSpec::new(*tool).arg("--version");
        let version = match runner.run(&spec).await {
            Ok(output) if output.success() => {
                let text = if output.stdout.trim().is_empty() {
                    output.stderr
                } else {
                    output.stdout
                };
                Some(text.lines().next().unwrap_or_default().trim().to_string())
            }
            Ok(_) | Err(_) => None,
        };

        checks.push(ToolCheck {
            tool: tool.to_string(),
            version,
        });
    }

    checks
}

/// Fail with `ToolUnavailable` naming every missing tool
pub fn ensure_available(checks: &[ToolCheck]) -> Result<()> {
    let missing: Vec<&str> = checks
        .iter()
        .filter(|c| !c.available())
        .map(|c| c.tool.as_str())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::ToolUnavailable(missing.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_builder() {
        let env = vec![("DOCKER_HOST".to_string(), "tcp://1.2.3.4:3376".to_string())];
        let spec = CommandSpec::new("docker-compose")
            .arg("-f")
            .arg("compose.yml")
            .args(["up", "-d", "master"])
            .envs(&env);

        assert_eq!(spec.program, "docker-compose");
        assert_eq!(spec.display_args(), "-f compose.yml up -d master");
        assert_eq!(spec.env, env);
    }

    #[test]
    fn test_ensure_available_lists_missing_tools() {
        let checks = vec![
            ToolCheck {
                tool: "docker".to_string(),
                version: Some("Docker version 1.13.0".to_string()),
            },
            ToolCheck {
                tool: "aws".to_string(),
                version: None,
            },
            ToolCheck {
                tool: "docker-machine".to_string(),
                version: None,
            },
        ];

        match ensure_available(&checks) {
            Err(Error::ToolUnavailable(missing)) => assert_eq!(missing, "aws, docker-machine"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_system_runner_reports_missing_binary() {
        let runner = SystemRunner::new();
        let spec = CommandSpec::new("simplespark-definitely-not-installed");
        let result = runner.run(&spec).await;
        assert!(matches!(result, Err(Error::ToolUnavailable(_))));
    }
}
