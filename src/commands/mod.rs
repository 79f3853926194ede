//! Voice command registry and interpreter
//!
//! Every command is a data record: trigger phrases, a handler tag and an
//! argument rule. The interpreter scans records in registry order and the first
//! match wins, so more specific phrases are registered ahead of generic ones.

mod registry;

pub use registry::{CommandRegistry, UNRECOGNIZED_RESPONSE};

/// Handler tag for a registry entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommandKind {
    /// Restart a named container
    RestartContainer,
    /// Stop a named container
    StopContainer,
    /// Start a named container
    StartContainer,
    /// List running containers
    ListContainers,
    /// CPU, memory, disk summary
    SystemStatus,
    /// Interface and reachability check
    NetworkCheck,
    /// Full diagnostics report
    Diagnostics,
    /// Current local time
    Time,
    /// Current local date
    Date,
    /// Launch the web browser
    OpenBrowser,
    /// List capabilities
    Help,
    /// Stop the assistant
    Shutdown,
}

impl CommandKind {
    /// Every command, in default registry order
    pub const ALL: [Self; 12] = [
        Self::RestartContainer,
        Self::StopContainer,
        Self::StartContainer,
        Self::ListContainers,
        Self::SystemStatus,
        Self::NetworkCheck,
        Self::Diagnostics,
        Self::Time,
        Self::Date,
        Self::OpenBrowser,
        Self::Help,
        Self::Shutdown,
    ];

    /// Configuration name (snake case)
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::RestartContainer => "restart_container",
            Self::StopContainer => "stop_container",
            Self::StartContainer => "start_container",
            Self::ListContainers => "list_containers",
            Self::SystemStatus => "system_status",
            Self::NetworkCheck => "network_check",
            Self::Diagnostics => "diagnostics",
            Self::Time => "time",
            Self::Date => "date",
            Self::OpenBrowser => "open_browser",
            Self::Help => "help",
            Self::Shutdown => "shutdown",
        }
    }

    /// Look up a command by configuration name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase().replace('-', "_");
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Whether the command talks to the Docker daemon
    #[must_use]
    pub const fn uses_docker(self) -> bool {
        matches!(
            self,
            Self::RestartContainer | Self::StopContainer | Self::StartContainer | Self::ListContainers
        )
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How a command extracts its argument from the utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentRule {
    /// Command takes no argument
    None,
    /// First word after the trigger (filler words skipped) names a container
    ContainerName {
        /// Spoken when the name is missing
        missing_hint: String,
    },
}

/// A registry entry
#[derive(Debug, Clone)]
pub struct CommandDefinition {
    /// Handler tag
    pub kind: CommandKind,
    /// Normalized trigger phrases, tested in order
    pub triggers: Vec<String>,
    /// Argument extraction rule
    pub argument: ArgumentRule,
}

/// A successful interpretation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandMatch {
    /// Matched handler
    pub kind: CommandKind,
    /// Trigger phrase that matched
    pub trigger: String,
    /// Extracted argument, original case preserved
    pub argument: Option<String>,
}

impl CommandMatch {
    /// Match without an argument
    #[must_use]
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            trigger: kind.name().replace('_', " "),
            argument: None,
        }
    }

    /// Attach an argument
    #[must_use]
    pub fn with_argument(mut self, argument: impl Into<String>) -> Self {
        self.argument = Some(argument.into());
        self
    }
}

/// Result of interpreting an utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interpretation {
    /// A command matched and its argument (if any) was extracted
    Matched(CommandMatch),
    /// Nothing matched, or a required argument was missing
    Unrecognized {
        /// What to say back
        hint: String,
        /// Command that matched but lacked its argument
        partial: Option<CommandKind>,
    },
}

impl Interpretation {
    /// Matched command, if any
    #[must_use]
    pub const fn command(&self) -> Option<&CommandMatch> {
        match self {
            Self::Matched(m) => Some(m),
            Self::Unrecognized { .. } => None,
        }
    }
}
