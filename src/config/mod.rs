//! Configuration management for the OpenCode assistant
//!
//! Values resolve env > TOML file > built-in default. The resulting [`Config`]
//! is immutable for the lifetime of the process.

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::commands::CommandKind;
use crate::matching::MatchStrategy;
use crate::{Error, Result};

use file::OpenCodeConfigFile;

/// Default wake phrases (the recognizer often splits the product name)
pub const DEFAULT_WAKE_PHRASES: &[&str] = &["hey opencode", "hey open code"];

/// OpenCode assistant configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Name used in response log lines
    pub name: String,

    /// Wake phrase configuration
    pub wake: WakeConfig,

    /// Audio capture and segmentation
    pub audio: AudioConfig,

    /// Command capture after wake
    pub capture: CaptureConfig,

    /// Speech-to-text engine
    pub stt: SttConfig,

    /// Text-to-speech engine
    pub tts: TtsConfig,

    /// Command interpreter
    pub interpreter: InterpreterConfig,

    /// Action executors
    pub actions: ActionsConfig,

    /// Feature toggles
    pub features: FeatureToggles,

    /// Directory for the rolling log file
    pub log_dir: Option<PathBuf>,

    /// Control port reserved for a future API; never bound
    pub reserved_port: Option<u16>,
}

/// Wake phrase configuration
#[derive(Debug, Clone)]
pub struct WakeConfig {
    /// Phrases that start a session (normalized)
    pub phrases: Vec<String>,

    /// Matching strategy for wake phrases
    pub strategy: MatchStrategy,

    /// Spoken right after detection
    pub acknowledgement: Option<String>,
}

/// Audio capture and segmentation configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Capture sample rate in Hz
    pub sample_rate: u32,

    /// Frame length in milliseconds
    pub frame_ms: u32,

    /// Frames buffered between capture and processing
    pub queue_capacity: usize,

    /// RMS energy above which a frame counts as speech
    pub energy_threshold: f32,

    /// Shortest speech burst worth spotting
    pub min_speech_ms: u32,

    /// Trailing silence that closes a wake segment
    pub end_silence_ms: u32,

    /// Longest wake segment handed to the spotter
    pub max_wake_segment_ms: u32,
}

/// Command capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Abort when no speech starts within this window
    pub silence_timeout: Duration,

    /// Hard cap on utterance length
    pub max_duration: Duration,

    /// Trailing silence that ends the utterance
    pub end_silence_ms: u32,

    /// Spoken on capture timeout; `None` aborts silently
    pub no_command_prompt: Option<String>,
}

/// STT provider backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttProvider {
    /// `OpenAI` Whisper or a compatible server
    Whisper,
    /// Deepgram
    Deepgram,
}

impl std::fmt::Display for SttProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Whisper => "whisper",
            Self::Deepgram => "deepgram",
        })
    }
}

/// Speech-to-text configuration
#[derive(Debug, Clone)]
pub struct SttConfig {
    pub provider: SttProvider,
    pub model: String,
    pub wake_model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

/// TTS provider backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsProvider {
    /// Local Piper binary
    Piper,
    /// `OpenAI` speech API
    OpenAi,
    /// Log only, no audio
    Console,
}

impl std::fmt::Display for TtsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Piper => "piper",
            Self::OpenAi => "openai",
            Self::Console => "console",
        })
    }
}

/// Text-to-speech configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub provider: TtsProvider,
    pub piper_binary: String,
    pub piper_model: PathBuf,
    pub model: String,
    pub voice: String,
    pub speed: f64,
    pub api_key: Option<String>,
    pub timeout: Duration,
    /// Shorter phrase tried once when synthesis fails
    pub fallback_phrase: String,
}

/// Command interpreter configuration
#[derive(Debug, Clone, Default)]
pub struct InterpreterConfig {
    /// Matching strategy for trigger phrases
    pub strategy: MatchStrategy,

    /// Replacement trigger phrases per command
    pub trigger_overrides: Vec<(CommandKind, Vec<String>)>,
}

/// Action executor configuration
#[derive(Debug, Clone)]
pub struct ActionsConfig {
    /// Budget for quick actions
    pub timeout: Duration,
    /// Budget for container start/stop/restart
    pub container_timeout: Duration,
    /// Budget for the diagnostics report
    pub diagnostics_timeout: Duration,
    pub browser_command: String,
    pub browser_url: String,
    pub docker_binary: String,
    /// `host:port` used for the reachability probe
    pub connectivity_target: String,
    pub connectivity_timeout: Duration,
    /// Where diagnostics reports are written
    pub report_dir: Option<PathBuf>,
    pub disk_warn_percent: f32,
    pub memory_warn_percent: f32,
    /// Interval between the two CPU counter samples
    pub cpu_sample: Duration,
}

/// Feature toggles
#[derive(Debug, Clone, Copy)]
pub struct FeatureToggles {
    pub docker: bool,
    pub browser: bool,
    pub diagnostics: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            docker: true,
            browser: true,
            diagnostics: true,
        }
    }
}

impl AudioConfig {
    /// Samples per frame
    #[must_use]
    pub const fn frame_samples(&self) -> usize {
        self.ms_to_samples(self.frame_ms)
    }

    /// Convert a duration in milliseconds to a sample count
    #[must_use]
    pub const fn ms_to_samples(&self, ms: u32) -> usize {
        (self.sample_rate as usize * ms as usize) / 1000
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_sources(OpenCodeConfigFile::default(), |_| None)
            .unwrap_or_else(|_| unreachable!("built-in defaults always resolve"))
    }
}

impl Config {
    /// Load configuration from the environment and an optional TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file is unreadable or the result fails validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = Self::resolve(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration without validating it
    ///
    /// Used by tools that never reach the speech engines.
    ///
    /// # Errors
    ///
    /// Returns error if the file is unreadable or names unknown values
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(path)?;
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Resolve a config from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error on unknown provider, strategy, or command names
    #[allow(clippy::too_many_lines)]
    pub fn from_sources(fc: OpenCodeConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let ms = Duration::from_millis;

        // Wake (env > toml > default)
        let phrases: Vec<String> = env("OPENCODE_WAKE_PHRASES")
            .map(|s| s.split(',').map(str::to_string).collect())
            .or(fc.wake.phrases)
            .unwrap_or_else(|| DEFAULT_WAKE_PHRASES.iter().map(ToString::to_string).collect())
            .iter()
            .map(|p| crate::matching::normalize(p))
            .filter(|p| !p.is_empty())
            .collect();
        let wake = WakeConfig {
            phrases,
            strategy: parse_strategy(fc.wake.matching.as_deref(), fc.wake.max_edits)?,
            acknowledgement: non_empty(fc.wake.acknowledgement, "Yes?"),
        };

        let audio = AudioConfig {
            sample_rate: fc.audio.sample_rate.unwrap_or(crate::voice::SAMPLE_RATE),
            frame_ms: fc.audio.frame_ms.unwrap_or(100),
            queue_capacity: fc.audio.queue_capacity.unwrap_or(100),
            energy_threshold: fc.audio.energy_threshold.unwrap_or(0.03),
            min_speech_ms: fc.audio.min_speech_ms.unwrap_or(300),
            end_silence_ms: fc.audio.end_silence_ms.unwrap_or(500),
            max_wake_segment_ms: fc.audio.max_wake_segment_ms.unwrap_or(4000),
        };

        let capture = CaptureConfig {
            silence_timeout: ms(fc.capture.silence_timeout_ms.unwrap_or(5000)),
            max_duration: ms(fc.capture.max_duration_ms.unwrap_or(10_000)),
            end_silence_ms: fc.capture.end_silence_ms.unwrap_or(800),
            no_command_prompt: non_empty(fc.capture.no_command_prompt, "I didn't catch that."),
        };

        // STT (env > toml > default)
        let stt_provider = match env("OPENCODE_STT_PROVIDER")
            .or(fc.stt.provider)
            .as_deref()
            .map(str::to_lowercase)
            .as_deref()
        {
            None | Some("whisper" | "openai") => SttProvider::Whisper,
            Some("deepgram") => SttProvider::Deepgram,
            Some(other) => return Err(Error::Config(format!("unknown stt provider: {other}"))),
        };
        let stt_model = env("OPENCODE_STT_MODEL").or(fc.stt.model).unwrap_or_else(|| {
            match stt_provider {
                SttProvider::Whisper => "whisper-1".to_string(),
                SttProvider::Deepgram => "nova-2".to_string(),
            }
        });
        let stt_key = match stt_provider {
            SttProvider::Whisper => env("OPENAI_API_KEY"),
            SttProvider::Deepgram => env("DEEPGRAM_API_KEY"),
        }
        .or(fc.stt.api_key);
        let stt = SttConfig {
            provider: stt_provider,
            wake_model: fc.stt.wake_model.unwrap_or_else(|| stt_model.clone()),
            model: stt_model,
            base_url: env("OPENCODE_STT_URL").or(fc.stt.base_url),
            api_key: stt_key,
            timeout: ms(fc.stt.timeout_ms.unwrap_or(15_000)),
        };

        // TTS (env > toml > default)
        let tts_provider = match env("OPENCODE_TTS_PROVIDER")
            .or(fc.tts.provider)
            .as_deref()
            .map(str::to_lowercase)
            .as_deref()
        {
            None | Some("piper") => TtsProvider::Piper,
            Some("openai") => TtsProvider::OpenAi,
            Some("console" | "none") => TtsProvider::Console,
            Some(other) => return Err(Error::Config(format!("unknown tts provider: {other}"))),
        };
        let tts = TtsConfig {
            provider: tts_provider,
            piper_binary: fc.tts.piper_binary.unwrap_or_else(|| "piper".to_string()),
            piper_model: env("OPENCODE_PIPER_MODEL")
                .or(fc.tts.piper_model)
                .map_or_else(
                    || PathBuf::from("/models/en_US-libritts_r-medium.onnx"),
                    PathBuf::from,
                ),
            model: fc.tts.model.unwrap_or_else(|| "tts-1".to_string()),
            voice: fc.tts.voice.unwrap_or_else(|| "alloy".to_string()),
            speed: fc.tts.speed.unwrap_or(1.0),
            api_key: env("OPENAI_API_KEY").or(fc.tts.api_key),
            timeout: ms(fc.tts.timeout_ms.unwrap_or(10_000)),
            fallback_phrase: fc
                .tts
                .fallback_phrase
                .unwrap_or_else(|| "Sorry, something went wrong.".to_string()),
        };

        let mut trigger_overrides = Vec::new();
        for (name, triggers) in fc.interpreter.triggers {
            let kind = CommandKind::from_name(&name)
                .ok_or_else(|| Error::Config(format!("unknown command in triggers: {name}")))?;
            trigger_overrides.push((kind, triggers));
        }
        let interpreter = InterpreterConfig {
            strategy: parse_strategy(fc.interpreter.matching.as_deref(), fc.interpreter.max_edits)?,
            trigger_overrides,
        };

        let data_dir = directories::BaseDirs::new()
            .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("opencode"));

        let actions = ActionsConfig {
            timeout: ms(fc.actions.timeout_ms.unwrap_or(15_000)),
            container_timeout: ms(fc.actions.container_timeout_ms.unwrap_or(30_000)),
            diagnostics_timeout: ms(fc.actions.diagnostics_timeout_ms.unwrap_or(60_000)),
            browser_command: fc
                .actions
                .browser_command
                .unwrap_or_else(|| "xdg-open".to_string()),
            browser_url: fc
                .actions
                .browser_url
                .unwrap_or_else(|| "https://google.com".to_string()),
            docker_binary: fc.actions.docker_binary.unwrap_or_else(|| "docker".to_string()),
            connectivity_target: fc
                .actions
                .connectivity_target
                .unwrap_or_else(|| "1.1.1.1:53".to_string()),
            connectivity_timeout: ms(fc.actions.connectivity_timeout_ms.unwrap_or(3000)),
            report_dir: Some(
                fc.actions
                    .report_dir
                    .map_or_else(|| data_dir.join("diagnostics"), PathBuf::from),
            ),
            disk_warn_percent: fc.actions.disk_warn_percent.unwrap_or(90.0),
            memory_warn_percent: fc.actions.memory_warn_percent.unwrap_or(90.0),
            cpu_sample: ms(fc.actions.cpu_sample_ms.unwrap_or(500)),
        };

        let defaults = FeatureToggles::default();
        let features = FeatureToggles {
            docker: fc.features.docker.unwrap_or(defaults.docker),
            browser: fc.features.browser.unwrap_or(defaults.browser),
            diagnostics: fc.features.diagnostics.unwrap_or(defaults.diagnostics),
        };

        Ok(Self {
            name: fc.name.unwrap_or_else(|| "OpenCode".to_string()),
            wake,
            audio,
            capture,
            stt,
            tts,
            interpreter,
            actions,
            features,
            log_dir: env("OPENCODE_LOG_DIR").or(fc.logging.dir).map(PathBuf::from),
            reserved_port: fc.server.port,
        })
    }

    /// Check required fields and value ranges
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first invalid field
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(Error::Config(msg.to_string()));

        if self.wake.phrases.is_empty() {
            return fail("wake.phrases must contain at least one phrase");
        }
        if self.audio.sample_rate == 0 || self.audio.frame_ms == 0 {
            return fail("audio.sample_rate and audio.frame_ms must be positive");
        }
        if self.audio.queue_capacity == 0 {
            return fail("audio.queue_capacity must be positive");
        }
        if self.capture.silence_timeout.is_zero() || self.capture.max_duration.is_zero() {
            return fail("capture timeouts must be positive");
        }
        if self.capture.max_duration < self.capture.silence_timeout {
            return fail("capture.max_duration_ms must not be shorter than silence_timeout_ms");
        }
        if self.stt.timeout.is_zero() || self.tts.timeout.is_zero() || self.actions.timeout.is_zero() {
            return fail("stt, tts and action timeouts must be positive");
        }
        if let Some((kind, _)) = self
            .interpreter
            .trigger_overrides
            .iter()
            .find(|(_, triggers)| triggers.iter().all(|t| crate::matching::normalize(t).is_empty()))
        {
            return Err(Error::Config(format!(
                "interpreter.triggers.{} must not be empty",
                kind.name()
            )));
        }

        // A self-hosted Whisper server may not need a key; the public APIs do
        let needs_key = match self.stt.provider {
            SttProvider::Whisper => self.stt.base_url.is_none(),
            SttProvider::Deepgram => true,
        };
        if needs_key && self.stt.api_key.as_deref().is_none_or(str::is_empty) {
            return fail("stt api key required (set OPENAI_API_KEY, DEEPGRAM_API_KEY or stt.api_key)");
        }
        if self.tts.provider == TtsProvider::OpenAi
            && self.tts.api_key.as_deref().is_none_or(str::is_empty)
        {
            return fail("tts.provider = \"openai\" requires OPENAI_API_KEY or tts.api_key");
        }

        Ok(())
    }
}

fn parse_strategy(name: Option<&str>, max_edits: Option<usize>) -> Result<MatchStrategy> {
    let Some(name) = name else {
        return Ok(MatchStrategy::Exact);
    };
    MatchStrategy::from_name(name, max_edits.unwrap_or(2))
        .ok_or_else(|| Error::Config(format!("unknown matching strategy: {name}")))
}

/// Empty string disables an optional phrase; absence selects the default
fn non_empty(value: Option<String>, default: &str) -> Option<String> {
    match value {
        Some(v) if v.trim().is_empty() => None,
        Some(v) => Some(v),
        None => Some(default.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_with<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v).to_string())
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.wake.phrases, vec!["hey opencode", "hey open code"]);
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.frame_samples(), 1600);
        assert_eq!(config.capture.silence_timeout, Duration::from_secs(5));
        assert_eq!(config.stt.provider, SttProvider::Whisper);
        assert_eq!(config.tts.provider, TtsProvider::Piper);
        assert_eq!(config.wake.acknowledgement.as_deref(), Some("Yes?"));
    }

    #[test]
    fn test_env_overrides_file() {
        let fc = file::parse_config("[wake]\nphrases = [\"computer\"]\n[stt]\nmodel = \"from-file\"").unwrap();
        let env = env_with(&[("OPENCODE_WAKE_PHRASES", "Hey Jarvis, jarvis"), ("OPENCODE_STT_MODEL", "from-env")]);
        let config = Config::from_sources(fc, env).unwrap();

        assert_eq!(config.wake.phrases, vec!["hey jarvis", "jarvis"]);
        assert_eq!(config.stt.model, "from-env");
    }

    #[test]
    fn test_file_overrides_default() {
        let fc = file::parse_config("[capture]\nsilence_timeout_ms = 2000\nno_command_prompt = \"\"").unwrap();
        let config = Config::from_sources(fc, |_| None).unwrap();

        assert_eq!(config.capture.silence_timeout, Duration::from_secs(2));
        assert!(config.capture.no_command_prompt.is_none());
    }

    #[test]
    fn test_unknown_command_override_rejected() {
        let fc = file::parse_config("[interpreter.triggers]\nmake_coffee = [\"coffee\"]").unwrap();
        assert!(matches!(Config::from_sources(fc, |_| None), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_requires_stt_key() {
        let config = Config::default();
        assert!(config.validate().is_err());

        let fc = file::parse_config("").unwrap();
        let config = Config::from_sources(fc, env_with(&[("OPENAI_API_KEY", "sk-test")])).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_self_hosted_whisper_needs_no_key() {
        let fc = file::parse_config("[stt]\nbase_url = \"http://localhost:8000/v1\"").unwrap();
        let config = Config::from_sources(fc, |_| None).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_wake_phrases() {
        let fc = file::parse_config("[wake]\nphrases = [\"  \", \"!!\"]\n[stt]\nbase_url = \"http://x\"").unwrap();
        let config = Config::from_sources(fc, |_| None).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("wake.phrases"));
    }

    #[test]
    fn test_validate_rejects_inverted_capture_window() {
        let fc = file::parse_config(
            "[capture]\nsilence_timeout_ms = 8000\nmax_duration_ms = 4000\n[stt]\nbase_url = \"http://x\"",
        )
        .unwrap();
        let config = Config::from_sources(fc, |_| None).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_trigger_overrides_resolve() {
        let fc = file::parse_config("[interpreter]\nmatching = \"fuzzy\"\n[interpreter.triggers]\nsystem_status = [\"how are you\"]").unwrap();
        let config = Config::from_sources(fc, |_| None).unwrap();

        assert_eq!(config.interpreter.strategy, MatchStrategy::Fuzzy { max_edits: 2 });
        assert_eq!(
            config.interpreter.trigger_overrides,
            vec![(CommandKind::SystemStatus, vec!["how are you".to_string()])]
        );
    }
}
