//! Action executors
//!
//! Each command tag maps to one executor behind the [`ActionExecutor`]
//! capability. Executors never return errors: every failure is folded into an
//! [`ActionResult`] with `success = false` and a sentence worth speaking.

mod containers;
mod diagnostics;
mod system;
mod utility;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

pub use containers::{ContainerAction, ContainerOp, ListContainersAction};
pub use diagnostics::{DiagnosticsAction, DiagnosticsReport};
pub use system::{NetworkCheckAction, SystemStatusAction};
pub use utility::{
    BrowserAction, DateAction, FAREWELL, HelpAction, ShutdownAction, TimeAction, format_date, format_time,
};

use crate::commands::{CommandKind, CommandMatch, CommandRegistry};
use crate::config::ActionsConfig;
use crate::docker::ContainerManager;
use crate::system::SystemProbe;

/// Spoken when an executor exceeds its time budget
pub const TIMEOUT_RESPONSE: &str = "Sorry, that took too long.";

/// Spoken when an executor crashes
pub const FAILURE_RESPONSE: &str = "Sorry, something went wrong with that command.";

/// Outcome of one action
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResult {
    /// Text to speak
    pub response: String,
    /// Whether the action did what was asked
    pub success: bool,
    /// Structured detail for the session log
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// The assistant should stop after speaking
    pub shutdown: bool,
}

impl ActionResult {
    /// Successful result
    #[must_use]
    pub fn ok(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            success: true,
            data: None,
            shutdown: false,
        }
    }

    /// Failed result
    #[must_use]
    pub fn failure(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            success: false,
            data: None,
            shutdown: false,
        }
    }

    /// Executor ran out of time
    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        Self::failure(TIMEOUT_RESPONSE).with_data(serde_json::json!({ "timeout_ms": after.as_millis() }))
    }

    /// Acknowledge and stop the assistant
    #[must_use]
    pub fn shutdown(response: impl Into<String>) -> Self {
        Self {
            shutdown: true,
            ..Self::ok(response)
        }
    }

    /// Attach structured data
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A handler performing the real-world effect of a command
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Run the action with its extracted argument
    async fn execute(&self, argument: Option<&str>) -> ActionResult;
}

struct Registered {
    executor: Arc<dyn ActionExecutor>,
    timeout: Duration,
}

/// Routes matched commands to executors under a time budget
#[derive(Default)]
pub struct ActionDispatcher {
    executors: HashMap<CommandKind, Registered>,
}

impl ActionDispatcher {
    /// Empty dispatcher
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher with every built-in executor for commands in `registry`
    #[must_use]
    pub fn standard(
        config: &ActionsConfig,
        registry: &CommandRegistry,
        probe: Arc<dyn SystemProbe>,
        docker: Arc<dyn ContainerManager>,
    ) -> Self {
        let mut dispatcher = Self::new();

        for kind in CommandKind::ALL {
            if !registry.contains(kind) {
                continue;
            }

            let (executor, timeout): (Arc<dyn ActionExecutor>, Duration) = match kind {
                CommandKind::RestartContainer => (
                    Arc::new(ContainerAction::new(ContainerOp::Restart, Arc::clone(&docker))),
                    config.container_timeout,
                ),
                CommandKind::StopContainer => (
                    Arc::new(ContainerAction::new(ContainerOp::Stop, Arc::clone(&docker))),
                    config.container_timeout,
                ),
                CommandKind::StartContainer => (
                    Arc::new(ContainerAction::new(ContainerOp::Start, Arc::clone(&docker))),
                    config.container_timeout,
                ),
                CommandKind::ListContainers => {
                    (Arc::new(ListContainersAction::new(Arc::clone(&docker))), config.timeout)
                }
                CommandKind::SystemStatus => (Arc::new(SystemStatusAction::new(Arc::clone(&probe))), config.timeout),
                CommandKind::NetworkCheck => (
                    Arc::new(NetworkCheckAction::new(
                        Arc::clone(&probe),
                        config.connectivity_target.clone(),
                        config.connectivity_timeout,
                    )),
                    config.timeout,
                ),
                CommandKind::Diagnostics => (
                    Arc::new(DiagnosticsAction::new(Arc::clone(&probe), Arc::clone(&docker), config)),
                    config.diagnostics_timeout,
                ),
                CommandKind::Time => (Arc::new(TimeAction), config.timeout),
                CommandKind::Date => (Arc::new(DateAction), config.timeout),
                CommandKind::OpenBrowser => (
                    Arc::new(BrowserAction::new(&config.browser_command, &config.browser_url)),
                    config.timeout,
                ),
                CommandKind::Help => (Arc::new(HelpAction::new(registry)), config.timeout),
                CommandKind::Shutdown => (Arc::new(ShutdownAction), config.timeout),
            };

            dispatcher.register(kind, executor, timeout);
        }

        tracing::debug!(executors = dispatcher.executors.len(), "action dispatcher ready");
        dispatcher
    }

    /// Register (or replace) the executor for a command
    pub fn register(&mut self, kind: CommandKind, executor: Arc<dyn ActionExecutor>, timeout: Duration) {
        self.executors.insert(kind, Registered { executor, timeout });
    }

    /// Whether a command has an executor
    #[must_use]
    pub fn handles(&self, kind: CommandKind) -> bool {
        self.executors.contains_key(&kind)
    }

    /// Run the executor for `command`
    ///
    /// The executor runs on its own task so a panic or a hang cannot take the
    /// session loop down with it. Returns `None` only when `cancel` fires.
    pub async fn dispatch(&self, command: &CommandMatch, cancel: &CancellationToken) -> Option<ActionResult> {
        let Some(registered) = self.executors.get(&command.kind) else {
            tracing::warn!(command = %command.kind, "no executor registered");
            return Some(ActionResult::failure("That command is not available."));
        };

        let executor = Arc::clone(&registered.executor);
        let argument = command.argument.clone();
        let mut task = tokio::spawn(async move { executor.execute(argument.as_deref()).await });

        let started = std::time::Instant::now();
        let result = tokio::select! {
            () = cancel.cancelled() => {
                task.abort();
                tracing::info!(command = %command.kind, "action cancelled by shutdown");
                return None;
            }
            joined = tokio::time::timeout(registered.timeout, &mut task) => match joined {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    tracing::error!(command = %command.kind, error = %e, "action executor crashed");
                    ActionResult::failure(FAILURE_RESPONSE)
                }
                Err(_) => {
                    task.abort();
                    tracing::warn!(command = %command.kind, timeout = ?registered.timeout, "action timed out");
                    ActionResult::timeout(registered.timeout)
                }
            },
        };

        tracing::debug!(
            command = %command.kind,
            success = result.success,
            elapsed_ms = started.elapsed().as_millis(),
            "action finished"
        );

        Some(result)
    }
}
