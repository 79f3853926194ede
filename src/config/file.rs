//! TOML configuration file loading
//!
//! Supports `~/.config/opencode/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct OpenCodeConfigFile {
    /// Name the assistant uses in log lines (e.g. "OpenCode")
    pub name: Option<String>,

    /// Wake phrase configuration
    #[serde(default)]
    pub wake: WakeFileConfig,

    /// Microphone and segmentation configuration
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Command capture after wake
    #[serde(default)]
    pub capture: CaptureFileConfig,

    /// Speech-to-text engine
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Text-to-speech engine
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Command interpreter
    #[serde(default)]
    pub interpreter: InterpreterFileConfig,

    /// Action executor settings
    #[serde(default)]
    pub actions: ActionsFileConfig,

    /// Feature toggles
    #[serde(default)]
    pub features: FeaturesFileConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingFileConfig,

    /// Server configuration (reserved)
    #[serde(default)]
    pub server: ServerFileConfig,
}

/// Wake phrase configuration
#[derive(Debug, Default, Deserialize)]
pub struct WakeFileConfig {
    /// Phrases that activate the assistant
    pub phrases: Option<Vec<String>>,

    /// "exact" or "fuzzy"
    pub matching: Option<String>,

    /// Edit budget for fuzzy matching
    pub max_edits: Option<usize>,

    /// Spoken right after the wake phrase; empty string disables
    pub acknowledgement: Option<String>,
}

/// Audio configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    pub sample_rate: Option<u32>,
    pub frame_ms: Option<u32>,
    pub queue_capacity: Option<usize>,
    pub energy_threshold: Option<f32>,
    pub min_speech_ms: Option<u32>,
    pub end_silence_ms: Option<u32>,
    pub max_wake_segment_ms: Option<u32>,
}

/// Command capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    /// Abort if nothing is said within this many milliseconds
    pub silence_timeout_ms: Option<u64>,

    /// Hard cap on a command utterance
    pub max_duration_ms: Option<u64>,

    /// Trailing silence that ends a command utterance
    pub end_silence_ms: Option<u32>,

    /// Spoken when the capture times out; empty string disables
    pub no_command_prompt: Option<String>,
}

/// STT configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// "whisper" or "deepgram"
    pub provider: Option<String>,
    pub model: Option<String>,
    /// Lighter model used for wake phrase spotting
    pub wake_model: Option<String>,
    /// OpenAI-compatible endpoint for self-hosted Whisper servers
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// TTS configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// "piper", "openai" or "console"
    pub provider: Option<String>,
    pub piper_binary: Option<String>,
    pub piper_model: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub speed: Option<f64>,
    pub api_key: Option<String>,
    pub timeout_ms: Option<u64>,
    pub fallback_phrase: Option<String>,
}

/// Interpreter configuration
#[derive(Debug, Default, Deserialize)]
pub struct InterpreterFileConfig {
    /// "exact" or "fuzzy"
    pub matching: Option<String>,
    pub max_edits: Option<usize>,

    /// Trigger phrase overrides keyed by command name (e.g. `system_status`)
    #[serde(default)]
    pub triggers: BTreeMap<String, Vec<String>>,
}

/// Action configuration
#[derive(Debug, Default, Deserialize)]
pub struct ActionsFileConfig {
    pub timeout_ms: Option<u64>,
    pub container_timeout_ms: Option<u64>,
    pub diagnostics_timeout_ms: Option<u64>,
    pub browser_command: Option<String>,
    pub browser_url: Option<String>,
    pub docker_binary: Option<String>,
    pub connectivity_target: Option<String>,
    pub connectivity_timeout_ms: Option<u64>,
    pub report_dir: Option<String>,
    pub disk_warn_percent: Option<f32>,
    pub memory_warn_percent: Option<f32>,
    pub cpu_sample_ms: Option<u64>,
}

/// Feature toggles
#[derive(Debug, Default, Deserialize)]
pub struct FeaturesFileConfig {
    pub docker: Option<bool>,
    pub browser: Option<bool>,
    pub diagnostics: Option<bool>,
}

/// Logging configuration
#[derive(Debug, Default, Deserialize)]
pub struct LoggingFileConfig {
    /// Directory for the rolling log file
    pub dir: Option<String>,
}

/// Server configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Reserved control port, not bound
    pub port: Option<u16>,
}

/// Load the TOML config file
///
/// An explicit path must exist. The standard path is optional and yields
/// defaults when absent. A file that exists but fails to parse is an error
/// either way.
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed
pub fn load_config_file(explicit: Option<&Path>) -> Result<OpenCodeConfigFile> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match config_file_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(OpenCodeConfigFile::default()),
        },
    };

    let content = std::fs::read_to_string(&path).map_err(|e| {
        Error::Config(format!("failed to read {}: {e}", path.display()))
    })?;

    let config = parse_config(&content)
        .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))?;

    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error on invalid TOML or mistyped fields
pub fn parse_config(content: &str) -> Result<OpenCodeConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `~/.config/opencode/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("opencode").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_all_defaults() {
        let fc = parse_config("").unwrap();
        assert!(fc.wake.phrases.is_none());
        assert!(fc.interpreter.triggers.is_empty());
    }

    #[test]
    fn test_partial_overlay() {
        let fc = parse_config(
            r#"
            [wake]
            phrases = ["hey computer"]
            matching = "fuzzy"

            [interpreter.triggers]
            system_status = ["how are you"]
            "#,
        )
        .unwrap();

        assert_eq!(fc.wake.phrases.unwrap(), vec!["hey computer"]);
        assert_eq!(fc.wake.matching.as_deref(), Some("fuzzy"));
        assert_eq!(fc.interpreter.triggers["system_status"], vec!["how are you"]);
        assert!(fc.audio.sample_rate.is_none());
    }

    #[test]
    fn test_mistyped_field_is_rejected() {
        assert!(parse_config("[audio]\nsample_rate = \"fast\"").is_err());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(load_config_file(Some(&missing)).is_err());
    }

    #[test]
    fn test_explicit_file_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "name = \"Jarvis\"\n[server]\nport = 8080\n").unwrap();

        let fc = load_config_file(Some(&path)).unwrap();
        assert_eq!(fc.name.as_deref(), Some("Jarvis"));
        assert_eq!(fc.server.port, Some(8080));
    }
}
