//! Time, date, browser, help and shutdown executors

use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};

use super::{ActionExecutor, ActionResult};
use crate::commands::{CommandKind, CommandRegistry};

/// Spoken by the shutdown command and on termination signals
pub const FAREWELL: &str = "Shutting down. Goodbye.";

/// "The time is 03:07 PM"
#[must_use]
pub fn format_time<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    now.format("The time is %I:%M %p").to_string()
}

/// "Today is Friday, October 16, 2026"
#[must_use]
pub fn format_date<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    now.format("Today is %A, %B %d, %Y").to_string()
}

/// Current local time
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeAction;

#[async_trait]
impl ActionExecutor for TimeAction {
    async fn execute(&self, _argument: Option<&str>) -> ActionResult {
        ActionResult::ok(format_time(&Local::now()))
    }
}

/// Current local date
#[derive(Debug, Clone, Copy, Default)]
pub struct DateAction;

#[async_trait]
impl ActionExecutor for DateAction {
    async fn execute(&self, _argument: Option<&str>) -> ActionResult {
        ActionResult::ok(format_date(&Local::now()))
    }
}

/// Launch the browser, detached
#[derive(Debug, Clone)]
pub struct BrowserAction {
    command: String,
    url: String,
}

impl BrowserAction {
    /// Create the executor
    #[must_use]
    pub fn new(command: &str, url: &str) -> Self {
        Self {
            command: command.to_string(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl ActionExecutor for BrowserAction {
    async fn execute(&self, _argument: Option<&str>) -> ActionResult {
        let launched = tokio::process::Command::new(&self.command)
            .arg(&self.url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        // The opener outlives this call; launch failures are only logged
        match launched {
            Ok(child) => tracing::info!(command = %self.command, url = %self.url, pid = ?child.id(), "browser launched"),
            Err(e) => tracing::warn!(command = %self.command, error = %e, "failed to launch browser"),
        }

        ActionResult::ok("Opening browser.")
    }
}

/// Describe what the assistant can do
#[derive(Debug, Clone)]
pub struct HelpAction {
    response: String,
}

impl HelpAction {
    /// Build the help text from the commands actually registered
    #[must_use]
    pub fn new(registry: &CommandRegistry) -> Self {
        let has = |kind| registry.contains(kind);

        let capabilities: Vec<&str> = [
            (has(CommandKind::SystemStatus), "check system status"),
            (has(CommandKind::NetworkCheck), "check network status"),
            (has(CommandKind::ListContainers), "list Docker containers"),
            (
                has(CommandKind::StartContainer) || has(CommandKind::StopContainer) || has(CommandKind::RestartContainer),
                "manage containers",
            ),
            (has(CommandKind::Diagnostics), "run diagnostics"),
            (has(CommandKind::Time) || has(CommandKind::Date), "tell time and date"),
            (has(CommandKind::OpenBrowser), "open a browser"),
        ]
        .into_iter()
        .filter_map(|(enabled, text)| enabled.then_some(text))
        .collect();

        let response = match capabilities.as_slice() {
            [] => "I can only shut down right now.".to_string(),
            [only] => format!("I can {only}."),
            [rest @ .., last] => format!("I can {}, or {last}.", rest.join(", ")),
        };

        Self { response }
    }
}

#[async_trait]
impl ActionExecutor for HelpAction {
    async fn execute(&self, _argument: Option<&str>) -> ActionResult {
        ActionResult::ok(self.response.clone())
    }
}

/// Stop the assistant after the farewell
#[derive(Debug, Clone, Copy, Default)]
pub struct ShutdownAction;

#[async_trait]
impl ActionExecutor for ShutdownAction {
    async fn execute(&self, _argument: Option<&str>) -> ActionResult {
        ActionResult::shutdown(FAREWELL)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::config::{FeatureToggles, InterpreterConfig};

    #[test]
    fn test_time_and_date_phrasing() {
        let moment = Utc.with_ymd_and_hms(2026, 10, 16, 15, 7, 0).single().unwrap();
        assert_eq!(format_time(&moment), "The time is 03:07 PM");
        assert_eq!(format_date(&moment), "Today is Friday, October 16, 2026");
    }

    #[tokio::test]
    async fn test_help_lists_everything_by_default() {
        let help = HelpAction::new(&CommandRegistry::standard());
        assert_eq!(
            help.execute(None).await.response,
            "I can check system status, check network status, list Docker containers, manage containers, \
             run diagnostics, tell time and date, or open a browser."
        );
    }

    #[tokio::test]
    async fn test_help_follows_feature_toggles() {
        let features = FeatureToggles {
            docker: false,
            browser: false,
            diagnostics: false,
        };
        let registry = CommandRegistry::from_config(&InterpreterConfig::default(), features);
        let help = HelpAction::new(&registry);
        assert_eq!(
            help.execute(None).await.response,
            "I can check system status, check network status, or tell time and date."
        );
    }

    #[tokio::test]
    async fn test_shutdown_requests_stop() {
        let result = ShutdownAction.execute(None).await;
        assert!(result.shutdown);
        assert!(result.success);
        assert_eq!(result.response, FAREWELL);
    }

    #[tokio::test]
    async fn test_browser_always_succeeds() {
        let action = BrowserAction::new("definitely-not-a-browser-opener", "https://example.com");
        let result = action.execute(None).await;
        assert!(result.success);
        assert_eq!(result.response, "Opening browser.");
    }
}
