//! Docker management via the `docker` CLI

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;
use tokio::time::timeout;

use crate::{Error, Result};

/// A running container as reported by `docker ps`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerSummary {
    /// Container name
    pub name: String,
    /// Human-readable status ("Up 3 hours")
    pub status: String,
}

/// Lifecycle state of one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    /// Running (or restarting)
    Running,
    /// Created, exited, paused or dead
    Stopped(String),
}

impl ContainerState {
    /// Map `docker inspect` `.State.Status`
    #[must_use]
    pub fn from_status(status: &str) -> Self {
        match status.trim() {
            "running" | "restarting" => Self::Running,
            other => Self::Stopped(other.to_string()),
        }
    }

    /// Whether the container is up
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Docker management boundary
///
/// Container names are matched case-sensitively by the daemon.
#[async_trait]
pub trait ContainerManager: Send + Sync {
    /// Running containers
    async fn list_running(&self) -> Result<Vec<ContainerSummary>>;

    /// Current state of a container
    ///
    /// # Errors
    ///
    /// Returns [`Error::ContainerNotFound`] if no container has this name
    async fn inspect(&self, name: &str) -> Result<ContainerState>;

    /// Start a container
    async fn start(&self, name: &str) -> Result<()>;

    /// Stop a container
    async fn stop(&self, name: &str) -> Result<()>;

    /// Restart a container
    async fn restart(&self, name: &str) -> Result<()>;

    /// Daemon version string
    async fn version(&self) -> Result<String>;
}

/// Talks to the daemon through the docker CLI
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    timeout: Duration,
}

impl DockerCli {
    /// Create a client using `binary` with a per-call timeout
    #[must_use]
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Run a docker subcommand, returning trimmed stdout
    async fn run(&self, args: &[&str], container: Option<&str>) -> Result<String> {
        let child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Error::DockerUnavailable(format!("{} not installed", self.binary)),
                _ => Error::DockerUnavailable(format!("failed to run {}: {e}", self.binary)),
            })?;

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::Timeout(self.timeout))??;

        if !output.stderr.is_empty() {
            tracing::debug!(args = ?args, stderr = %String::from_utf8_lossy(&output.stderr).trim(), "docker stderr");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr, container));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl ContainerManager for DockerCli {
    async fn list_running(&self) -> Result<Vec<ContainerSummary>> {
        let stdout = self.run(&["ps", "--format", "{{.Names}}\t{{.Status}}"], None).await?;
        Ok(parse_ps(&stdout))
    }

    async fn inspect(&self, name: &str) -> Result<ContainerState> {
        let stdout = self
            .run(&["inspect", "--type", "container", "--format", "{{.State.Status}}", name], Some(name))
            .await?;
        Ok(ContainerState::from_status(&stdout))
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.run(&["start", name], Some(name)).await.map(|_| ())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.run(&["stop", name], Some(name)).await.map(|_| ())
    }

    async fn restart(&self, name: &str) -> Result<()> {
        self.run(&["restart", name], Some(name)).await.map(|_| ())
    }

    async fn version(&self) -> Result<String> {
        self.run(&["version", "--format", "{{.Server.Version}}"], None).await
    }
}

/// Turn docker's stderr into a typed error
fn classify_failure(stderr: &str, container: Option<&str>) -> Error {
    let lower = stderr.to_lowercase();

    if lower.contains("cannot connect to the docker daemon")
        || lower.contains("is the docker daemon running")
        || lower.contains("permission denied")
        || lower.contains("error during connect")
    {
        return Error::DockerUnavailable(stderr.trim().to_string());
    }

    if let Some(name) = container
        && (lower.contains("no such container") || lower.contains("no such object"))
    {
        return Error::ContainerNotFound(name.to_string());
    }

    Error::Docker(stderr.trim().to_string())
}

/// Parse `docker ps --format '{{.Names}}\t{{.Status}}'`
fn parse_ps(stdout: &str) -> Vec<ContainerSummary> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let (name, status) = line.split_once('\t').unwrap_or((line, ""));
            ContainerSummary {
                name: name.to_string(),
                status: status.trim().to_string(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ps() {
        let containers = parse_ps("web\tUp 3 hours\ndb\tUp 2 days (healthy)\n\n");
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].name, "web");
        assert_eq!(containers[1].status, "Up 2 days (healthy)");
        assert!(parse_ps("").is_empty());
    }

    #[test]
    fn test_classify_not_found() {
        let err = classify_failure("Error: No such container: web", Some("web"));
        assert!(matches!(err, Error::ContainerNotFound(ref n) if n == "web"));
        assert_eq!(err.to_string(), "container web not found");
    }

    #[test]
    fn test_classify_daemon_down() {
        let err = classify_failure(
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock. Is the docker daemon running?",
            Some("web"),
        );
        assert!(matches!(err, Error::DockerUnavailable(_)));
    }

    #[test]
    fn test_classify_other_failure() {
        let err = classify_failure("Error response from daemon: port is already allocated", Some("web"));
        assert!(matches!(err, Error::Docker(_)));
    }

    #[test]
    fn test_state_from_status() {
        assert!(ContainerState::from_status("running\n").is_running());
        assert_eq!(ContainerState::from_status("exited"), ContainerState::Stopped("exited".to_string()));
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let cli = DockerCli::new("definitely-not-docker-binary", Duration::from_secs(5));
        assert!(matches!(cli.list_running().await, Err(Error::DockerUnavailable(_))));
    }
}
