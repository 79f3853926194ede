//! Error types for the OpenCode voice assistant

use thiserror::Error;

/// Result type alias for assistant operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why a transcription produced no usable text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranscriptionFailure {
    /// Engine could not be reached or rejected the request
    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),

    /// Engine answered but heard no speech
    #[error("no speech detected")]
    NoSpeech,
}

/// Errors that can occur in the assistant
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (fatal at startup)
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone missing, disconnected, or stream failure (fatal)
    #[error("audio device error: {0}")]
    AudioDevice(String),

    /// Output device or decoding failure during playback
    #[error("playback error: {0}")]
    Playback(String),

    /// Speech-to-text error
    #[error("transcription error: {0}")]
    Transcription(#[from] TranscriptionFailure),

    /// Text-to-speech error
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Docker daemon has no container with this name
    #[error("container {0} not found")]
    ContainerNotFound(String),

    /// Docker daemon or CLI unreachable
    #[error("docker unavailable: {0}")]
    DockerUnavailable(String),

    /// Docker command failed for another reason
    #[error("docker error: {0}")]
    Docker(String),

    /// OS metric probe failed
    #[error("probe error: {0}")]
    Probe(String),

    /// Operation exceeded its time budget
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error must terminate the process
    ///
    /// Everything else is recovered at the session boundary
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::AudioDevice(_) | Self::Toml(_))
    }

    /// Process exit code for a fatal error
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) | Self::Toml(_) => 2,
            Self::AudioDevice(_) => 3,
            _ => 1,
        }
    }
}
