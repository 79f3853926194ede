//! Default command table and interpreter

use std::sync::LazyLock;

use regex::Regex;

use super::{ArgumentRule, CommandDefinition, CommandKind, CommandMatch, Interpretation};
use crate::config::{FeatureToggles, InterpreterConfig};
use crate::matching::{self, MatchStrategy, PhraseMatch};

/// Spoken when no command matches
pub const UNRECOGNIZED_RESPONSE: &str = "Command not recognized. Say help for available commands.";

/// Words skipped between a trigger and its argument
const FILLER_WORDS: &[&str] = &["the", "a", "named", "called", "container", "please", "for", "me"];

/// Docker's own container name rule
static CONTAINER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").unwrap_or_else(|e| unreachable!("{e}"))
});

/// Ordered, immutable set of command definitions
#[derive(Debug, Clone)]
pub struct CommandRegistry {
    definitions: Vec<CommandDefinition>,
    strategy: MatchStrategy,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl CommandRegistry {
    /// The built-in table with exact matching
    ///
    /// Container verbs come first so "restart container db" never reaches a
    /// generic phrase, and shutdown sits last so "stop container" is never read
    /// as "stop listening".
    #[must_use]
    pub fn standard() -> Self {
        let container = |kind, verb: &str, triggers: &[&str]| CommandDefinition {
            kind,
            triggers: triggers.iter().map(ToString::to_string).collect(),
            argument: ArgumentRule::ContainerName {
                missing_hint: format!("Please specify which container to {verb}."),
            },
        };
        let plain = |kind, triggers: &[&str]| CommandDefinition {
            kind,
            triggers: triggers.iter().map(ToString::to_string).collect(),
            argument: ArgumentRule::None,
        };

        let definitions = vec![
            container(CommandKind::RestartContainer, "restart", &["restart container", "reboot container"]),
            container(CommandKind::StopContainer, "stop", &["stop container", "kill container"]),
            container(CommandKind::StartContainer, "start", &["start container", "launch container"]),
            plain(
                CommandKind::ListContainers,
                &["list containers", "list container", "docker status", "show containers", "running containers"],
            ),
            plain(CommandKind::SystemStatus, &["system status", "check system", "system health"]),
            plain(CommandKind::NetworkCheck, &["network status", "check network", "network check", "am i online"]),
            plain(CommandKind::Diagnostics, &["run diagnostics", "run diagnostic", "diagnose", "diagnostics"]),
            plain(CommandKind::Time, &["what time", "current time", "whats the time", "time is it"]),
            plain(CommandKind::Date, &["what date", "todays date", "what day", "current date"]),
            plain(CommandKind::OpenBrowser, &["open browser", "open the browser", "launch browser"]),
            plain(CommandKind::Help, &["help", "what can you do"]),
            plain(
                CommandKind::Shutdown,
                &["shutdown opencode", "shutdown", "shut down", "stop listening", "exit", "goodbye"],
            ),
        ];

        Self {
            definitions,
            strategy: MatchStrategy::Exact,
        }
    }

    /// Build the registry from configuration
    ///
    /// Trigger overrides replace a command's phrases in place; disabled
    /// features remove their commands entirely.
    #[must_use]
    pub fn from_config(config: &InterpreterConfig, features: FeatureToggles) -> Self {
        let mut registry = Self::standard().with_strategy(config.strategy);

        for (kind, triggers) in &config.trigger_overrides {
            registry.override_triggers(*kind, triggers);
        }

        registry
            .definitions
            .retain(|def| match def.kind {
                k if k.uses_docker() => features.docker,
                CommandKind::OpenBrowser => features.browser,
                CommandKind::Diagnostics => features.diagnostics,
                _ => true,
            });

        tracing::debug!(
            commands = registry.definitions.len(),
            strategy = ?registry.strategy,
            "command registry loaded"
        );

        registry
    }

    /// Use a different matching strategy
    #[must_use]
    pub const fn with_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Replace the trigger phrases of one command, keeping its position
    pub fn override_triggers(&mut self, kind: CommandKind, triggers: &[String]) {
        if let Some(def) = self.definitions.iter_mut().find(|d| d.kind == kind) {
            def.triggers = triggers
                .iter()
                .map(|t| matching::normalize(t))
                .filter(|t| !t.is_empty())
                .collect();
        }
    }

    /// Definitions in match order
    #[must_use]
    pub fn definitions(&self) -> &[CommandDefinition] {
        &self.definitions
    }

    /// Whether a command is registered
    #[must_use]
    pub fn contains(&self, kind: CommandKind) -> bool {
        self.definitions.iter().any(|d| d.kind == kind)
    }

    /// Map transcribed text to a command
    #[must_use]
    pub fn interpret(&self, text: &str) -> Interpretation {
        let lower = matching::normalize(text);
        if lower.is_empty() {
            return unrecognized(None, UNRECOGNIZED_RESPONSE);
        }

        // Fewest edits wins; registry order only breaks ties
        let mut best: Option<(&CommandDefinition, &String, PhraseMatch)> = None;
        'scan: for def in &self.definitions {
            for trigger in &def.triggers {
                let Some(found) = self.strategy.find(&lower, trigger) else {
                    continue;
                };
                if best.is_none_or(|(_, _, b)| found.edits < b.edits) {
                    best = Some((def, trigger, found));
                    if found.edits == 0 {
                        break 'scan;
                    }
                }
            }
        }

        if let Some((def, trigger, found)) = best {
            if found.edits > 0 {
                tracing::debug!(command = %def.kind, trigger = %trigger, edits = found.edits, "approximate trigger match");
            }

            let matched = CommandMatch {
                kind: def.kind,
                trigger: trigger.clone(),
                argument: None,
            };

            return match &def.argument {
                ArgumentRule::None => Interpretation::Matched(matched),
                ArgumentRule::ContainerName { missing_hint } => match extract_container(text, &lower, found.end) {
                    Some(name) => Interpretation::Matched(matched.with_argument(name)),
                    None => unrecognized(Some(def.kind), missing_hint),
                },
            };
        }

        unrecognized(None, UNRECOGNIZED_RESPONSE)
    }
}

fn unrecognized(partial: Option<CommandKind>, hint: &str) -> Interpretation {
    Interpretation::Unrecognized {
        hint: hint.to_string(),
        partial,
    }
}

/// First non-filler word after the trigger, read from the case-preserved text
fn extract_container(original: &str, lower: &str, trigger_end: usize) -> Option<String> {
    let first = matching::word_index_at(lower, trigger_end);
    let cased = matching::normalize_preserving_case(original);

    cased
        .split(' ')
        .skip(first)
        .find(|word| !FILLER_WORDS.contains(&word.to_lowercase().as_str()))
        .filter(|word| CONTAINER_NAME.is_match(word))
        .map(ToString::to_string)
}
