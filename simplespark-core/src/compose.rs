//! docker-compose integration
//!
//! All compose commands run against the swarm master, so services are
//! scheduled across the whole cluster.

use crate::machine::DockerEnv;
use crate::process::{run_checked, CommandRunner, CommandSpec};
use simplespark_common::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Compose file shipped with simplespark, used when none is configured
pub const BUNDLED_COMPOSE_FILE: &str = include_str!("../assets/docker-compose.yml");

const BUNDLED_FILE_NAME: &str = "docker-compose.yml";

/// Write the bundled compose file into `work_dir` (if missing or outdated)
pub fn materialize_bundled(work_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(work_dir)?;
    let path = work_dir.join(BUNDLED_FILE_NAME);

    let current = std::fs::read_to_string(&path).ok();
    if current.as_deref() != Some(BUNDLED_COMPOSE_FILE) {
        std::fs::write(&path, BUNDLED_COMPOSE_FILE)?;
        debug!("Wrote bundled compose file to {:?}", path);
    }

    Ok(path)
}

/// The configured compose file, or the bundled one
pub fn resolve_compose_file(configured: Option<&Path>, work_dir: &Path) -> Result<PathBuf> {
    match configured {
        Some(path) if path.is_file() => Ok(path.to_path_buf()),
        Some(path) => Err(Error::NotFound(format!("compose file {:?}", path))),
        None => materialize_bundled(work_dir),
    }
}

/// docker-compose bound to one compose file
pub struct Compose {
    runner: Arc<dyn CommandRunner>,
    file: PathBuf,
}

impl Compose {
    pub fn new(runner: Arc<dyn CommandRunner>, file: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            file: file.into(),
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    fn command(&self, env: &DockerEnv) -> CommandSpec {
        CommandSpec::new("docker-compose")
            .arg("-f")
            .arg(self.file.to_string_lossy())
            .envs(env)
    }

    /// `docker-compose up -d <service>`
    pub async fn up(&self, service: &str, env: &DockerEnv) -> Result<()> {
        info!("Starting compose service {}", service);
        let cmd = self.command(env).args(["up", "-d", service]);
        run_checked(self.runner.as_ref(), &cmd).await?;
        Ok(())
    }

    /// `docker-compose scale svc=n ...`
    pub async fn scale(&self, services: &[(&str, usize)], env: &DockerEnv) -> Result<()> {
        let targets: Vec<String> = services
            .iter()
            .map(|(service, count)| format!("{}={}", service, count))
            .collect();

        info!("Scaling compose services: {}", targets.join(" "));
        let cmd = self.command(env).arg("scale").args(targets);
        run_checked(self.runner.as_ref(), &cmd).await?;
        Ok(())
    }

    /// `docker-compose down`
    pub async fn down(&self, env: &DockerEnv) -> Result<()> {
        info!("Stopping compose services");
        let cmd = self.command(env).arg("down");
        run_checked(self.runner.as_ref(), &cmd).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_file_defines_services() {
        assert!(BUNDLED_COMPOSE_FILE.contains("master:"));
        assert!(BUNDLED_COMPOSE_FILE.contains("worker:"));
        assert!(BUNDLED_COMPOSE_FILE.contains("8080:8080"));
    }

    #[test]
    fn test_materialize_bundled() {
        let dir = tempfile::tempdir().unwrap();
        let path = materialize_bundled(dir.path()).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), BUNDLED_COMPOSE_FILE);

        // Outdated copies are replaced
        std::fs::write(&path, "version: \"1\"").unwrap();
        materialize_bundled(dir.path()).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), BUNDLED_COMPOSE_FILE);
    }

    #[test]
    fn test_resolve_compose_file() {
        let dir = tempfile::tempdir().unwrap();
        let custom = dir.path().join("custom.yml");
        std::fs::write(&custom, "version: \"2\"").unwrap();

        assert_eq!(resolve_compose_file(Some(&custom), dir.path()).unwrap(), custom);
        assert!(resolve_compose_file(Some(&dir.path().join("missing.yml")), dir.path()).is_err());
        assert_eq!(
            resolve_compose_file(None, dir.path()).unwrap(),
            dir.path().join("docker-compose.yml")
        );
    }
}
