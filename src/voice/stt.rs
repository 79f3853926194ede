//! Speech-to-text (STT) processing

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::frames::AudioWindow;
use crate::config::{SttConfig, SttProvider};
use crate::{Error, Result, TranscriptionFailure};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEEPGRAM_BASE_URL: &str = "https://api.deepgram.com/v1";

/// A speech recognition engine
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe an audio window
    ///
    /// # Errors
    ///
    /// Returns [`TranscriptionFailure::NoSpeech`] when the engine heard
    /// nothing, or [`TranscriptionFailure::EngineUnavailable`] when it could
    /// not be reached
    async fn transcribe(&self, window: &AudioWindow) -> std::result::Result<String, TranscriptionFailure>;
}

/// Response from OpenAI Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// Transcribes speech over HTTP (Whisper-compatible or Deepgram)
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    provider: SttProvider,
}

impl SpeechToText {
    /// Create an engine from configuration using the command model
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built or a required key is
    /// missing
    pub fn from_config(config: &SttConfig) -> Result<Self> {
        Self::with_model(config, config.model.clone())
    }

    /// Create an engine for wake spotting (usually a smaller model)
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built or a required key is
    /// missing
    pub fn for_wake(config: &SttConfig) -> Result<Self> {
        Self::with_model(config, config.wake_model.clone())
    }

    fn with_model(config: &SttConfig, model: String) -> Result<Self> {
        let api_key = config.api_key.clone().filter(|k| !k.is_empty());
        let base_url = match (&config.base_url, config.provider) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, SttProvider::Whisper) => OPENAI_BASE_URL.to_string(),
            (None, SttProvider::Deepgram) => DEEPGRAM_BASE_URL.to_string(),
        };

        if api_key.is_none() && config.base_url.is_none() {
            return Err(Error::Config(format!("{} API key required", config.provider)));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build STT client: {e}")))?;

        tracing::debug!(provider = %config.provider, model = %model, base_url = %base_url, "STT engine initialized");

        Ok(Self {
            client,
            api_key,
            model,
            base_url,
            provider: config.provider,
        })
    }

    /// Transcribe WAV bytes
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    pub async fn transcribe_wav(&self, audio: &[u8]) -> Result<String> {
        match self.provider {
            SttProvider::Whisper => self.transcribe_whisper(audio).await,
            SttProvider::Deepgram => self.transcribe_deepgram(audio).await,
        }
    }

    /// Transcribe using a Whisper-compatible endpoint
    async fn transcribe_whisper(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name("audio.wav")
            .mime_str("audio/wav")?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", "en");

        let mut request = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.inspect_err(|e| {
            tracing::error!(error = %e, "Whisper request failed");
        })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(unavailable(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await.inspect_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
        })?;

        tracing::debug!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let url = format!("{}/listen?model={}&punctuate=true", self.base_url, self.model);

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "audio/wav")
            .body(audio.to_vec());
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Token {key}"));
        }

        let response = request.send().await.inspect_err(|e| {
            tracing::error!(error = %e, "Deepgram request failed");
        })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(unavailable(format!("Deepgram API error {status}: {body}")));
        }

        let result: DeepgramResponse = response.json().await.inspect_err(|e| {
            tracing::error!(error = %e, "failed to parse Deepgram response");
        })?;

        let transcript = result
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.clone())
            .unwrap_or_default();

        tracing::debug!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

#[async_trait]
impl Transcriber for SpeechToText {
    async fn transcribe(&self, window: &AudioWindow) -> std::result::Result<String, TranscriptionFailure> {
        let wav = window
            .to_wav()
            .map_err(|e| TranscriptionFailure::EngineUnavailable(e.to_string()))?;

        let text = self.transcribe_wav(&wav).await.map_err(|e| match e {
            Error::Transcription(failure) => failure,
            other => TranscriptionFailure::EngineUnavailable(other.to_string()),
        })?;

        let text = text.trim();
        if text.is_empty() {
            return Err(TranscriptionFailure::NoSpeech);
        }
        Ok(text.to_string())
    }
}

fn unavailable(reason: String) -> Error {
    Error::Transcription(TranscriptionFailure::EngineUnavailable(reason))
}

/// Transcription with a time budget
///
/// "No speech" becomes an empty string; an unreachable or slow engine becomes
/// [`Error::Transcription`] so the caller can apologise and carry on.
#[derive(Clone)]
pub struct TranscriptionAdapter {
    engine: Arc<dyn Transcriber>,
    timeout: Duration,
}

impl TranscriptionAdapter {
    /// Wrap an engine
    #[must_use]
    pub fn new(engine: Arc<dyn Transcriber>, timeout: Duration) -> Self {
        Self { engine, timeout }
    }

    /// Transcribe a captured window
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transcription`] if the engine fails or times out
    pub async fn transcribe(&self, window: &AudioWindow) -> Result<String> {
        if window.is_empty() {
            return Ok(String::new());
        }

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(self.timeout, self.engine.transcribe(window))
            .await
            .unwrap_or_else(|_| {
                Err(TranscriptionFailure::EngineUnavailable(format!(
                    "no answer within {:?}",
                    self.timeout
                )))
            });

        match result {
            Ok(text) => {
                tracing::debug!(
                    audio_ms = window.duration().as_millis(),
                    elapsed_ms = started.elapsed().as_millis(),
                    "transcribed"
                );
                Ok(text)
            }
            Err(TranscriptionFailure::NoSpeech) => Ok(String::new()),
            Err(failure) => {
                tracing::warn!(error = %failure, "transcription failed");
                Err(failure.into())
            }
        }
    }
}
