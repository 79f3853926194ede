//! Docker container executors

use std::sync::Arc;

use async_trait::async_trait;

use super::{ActionExecutor, ActionResult};
use crate::Error;
use crate::docker::ContainerManager;

/// Spoken when the daemon cannot be reached
const DOCKER_UNAVAILABLE: &str = "Docker is not available.";

/// How many names to read out when listing
const LISTED_NAMES: usize = 3;

/// Lifecycle operation on one container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerOp {
    Start,
    Stop,
    Restart,
}

impl ContainerOp {
    const fn verb(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
        }
    }

    const fn past(self) -> &'static str {
        match self {
            Self::Start => "started",
            Self::Stop => "stopped",
            Self::Restart => "restarted",
        }
    }
}

/// Start, stop or restart a named container
///
/// Starting a running container or stopping a stopped one succeeds without
/// touching the daemon.
pub struct ContainerAction {
    op: ContainerOp,
    docker: Arc<dyn ContainerManager>,
}

impl ContainerAction {
    /// Create an executor for `op`
    #[must_use]
    pub fn new(op: ContainerOp, docker: Arc<dyn ContainerManager>) -> Self {
        Self { op, docker }
    }

    async fn apply(&self, name: &str) -> crate::Result<ActionResult> {
        let state = self.docker.inspect(name).await?;

        let already = match self.op {
            ContainerOp::Start => state.is_running().then_some("running"),
            ContainerOp::Stop => (!state.is_running()).then_some("stopped"),
            ContainerOp::Restart => None,
        };

        if let Some(current) = already {
            tracing::info!(container = name, op = self.op.verb(), "container already {current}, nothing to do");
            return Ok(ActionResult::ok(format!("Container {name} is already {current}."))
                .with_data(serde_json::json!({ "container": name, "changed": false })));
        }

        match self.op {
            ContainerOp::Start => self.docker.start(name).await?,
            ContainerOp::Stop => self.docker.stop(name).await?,
            ContainerOp::Restart => self.docker.restart(name).await?,
        }

        tracing::info!(container = name, op = self.op.verb(), "container updated");
        Ok(ActionResult::ok(format!("Container {name} {}.", self.op.past()))
            .with_data(serde_json::json!({ "container": name, "changed": true })))
    }
}

#[async_trait]
impl ActionExecutor for ContainerAction {
    async fn execute(&self, argument: Option<&str>) -> ActionResult {
        let Some(name) = argument.filter(|n| !n.is_empty()) else {
            return ActionResult::failure(format!("Please specify which container to {}.", self.op.verb()));
        };

        match self.apply(name).await {
            Ok(result) => result,
            Err(e @ Error::ContainerNotFound(_)) => ActionResult::failure(e.to_string()),
            Err(Error::DockerUnavailable(reason)) => {
                tracing::warn!(container = name, %reason, "docker unavailable");
                ActionResult::failure(DOCKER_UNAVAILABLE)
            }
            Err(e) => {
                tracing::warn!(container = name, op = self.op.verb(), error = %e, "container operation failed");
                ActionResult::failure(format!("Failed to {} container {name}.", self.op.verb()))
            }
        }
    }
}

/// List running containers
pub struct ListContainersAction {
    docker: Arc<dyn ContainerManager>,
}

impl ListContainersAction {
    /// Create the executor
    #[must_use]
    pub fn new(docker: Arc<dyn ContainerManager>) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl ActionExecutor for ListContainersAction {
    async fn execute(&self, _argument: Option<&str>) -> ActionResult {
        match self.docker.list_running().await {
            Ok(containers) if containers.is_empty() => ActionResult::ok("No active Docker containers."),
            Ok(containers) => {
                let names: Vec<&str> = containers
                    .iter()
                    .take(LISTED_NAMES)
                    .map(|c| c.name.as_str())
                    .collect();
                let data = serde_json::to_value(&containers).unwrap_or_default();
                ActionResult::ok(format!("Running containers: {}. {}", containers.len(), names.join(", ")))
                    .with_data(data)
            }
            Err(Error::DockerUnavailable(reason)) => {
                tracing::warn!(%reason, "docker unavailable");
                ActionResult::failure(DOCKER_UNAVAILABLE)
            }
            Err(e) => {
                tracing::warn!(error = %e, "container listing failed");
                ActionResult::failure("Unable to query Docker containers.")
            }
        }
    }
}
