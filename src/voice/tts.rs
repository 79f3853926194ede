//! Text-to-speech (TTS) processing

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::playback::{AudioPlayback, Clip, decode_mp3, decode_wav};
use crate::config::{TtsConfig, TtsProvider};
use crate::{Error, Result};

/// Something that can say a line out loud
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize and play `text`, returning when playback has finished
    ///
    /// Playback stops early when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or playback fails
    async fn speak(&self, text: &str, cancel: &CancellationToken) -> Result<()>;
}

/// Synthesis backend
#[derive(Debug, Clone)]
enum Backend {
    Piper { binary: String, model: PathBuf },
    OpenAi { api_key: String },
}

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::Client,
    backend: Backend,
    voice: String,
    speed: f64,
    model: String,
}

impl TextToSpeech {
    /// Create an engine from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the provider is not a synthesis engine or its
    /// requirements are missing
    pub fn from_config(config: &TtsConfig) -> Result<Self> {
        let backend = match config.provider {
            TtsProvider::Piper => {
                let binary = which::which(&config.piper_binary)
                    .map(|p| p.to_string_lossy().into_owned())
                    .map_err(|_| Error::Config(format!("piper binary '{}' not found in PATH", config.piper_binary)))?;
                Backend::Piper {
                    binary,
                    model: config.piper_model.clone(),
                }
            }
            TtsProvider::OpenAi => {
                let api_key = config
                    .api_key
                    .clone()
                    .filter(|k| !k.is_empty())
                    .ok_or_else(|| Error::Config("OpenAI API key required for TTS".to_string()))?;
                Backend::OpenAi { api_key }
            }
            TtsProvider::Console => {
                return Err(Error::Config("console output has no synthesis engine".to_string()));
            }
        };

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build TTS client: {e}")))?;

        Ok(Self {
            client,
            backend,
            voice: config.voice.clone(),
            speed: config.speed,
            model: config.model.clone(),
        })
    }

    /// Synthesize text to a playable clip
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    pub async fn synthesize(&self, text: &str) -> Result<Clip> {
        match &self.backend {
            Backend::Piper { binary, model } => synthesize_piper(binary, model, text).await,
            Backend::OpenAi { api_key } => self.synthesize_openai(api_key, text).await,
        }
    }

    /// Synthesize using OpenAI TTS
    async fn synthesize_openai(&self, api_key: &str, text: &str) -> Result<Clip> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f64,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        decode_mp3(&audio)
    }
}

/// Run the local Piper binary, feeding text on stdin
async fn synthesize_piper(binary: &str, model: &Path, text: &str) -> Result<Clip> {
    let output = tempfile::Builder::new().prefix("opencode-tts-").suffix(".wav").tempfile()?;

    let mut child = tokio::process::Command::new(binary)
        .arg("--model")
        .arg(model)
        .arg("--output_file")
        .arg(output.path())
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Synthesis(format!("failed to start piper: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(text.as_bytes()).await?;
        stdin.shutdown().await?;
    }

    let result = child.wait_with_output().await?;
    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(Error::Synthesis(format!("piper exited with {}: {}", result.status, stderr.trim())));
    }

    let wav = tokio::fs::read(output.path()).await?;
    decode_wav(&wav)
}

/// Speaks through a synthesis engine and the default output device
pub struct SpeakerOutput {
    engine: TextToSpeech,
}

impl SpeakerOutput {
    /// Wrap an engine
    #[must_use]
    pub const fn new(engine: TextToSpeech) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Synthesizer for SpeakerOutput {
    async fn speak(&self, text: &str, cancel: &CancellationToken) -> Result<()> {
        let clip = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            clip = self.engine.synthesize(text) => clip?,
        };

        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let mut playback =
            tokio::task::spawn_blocking(move || AudioPlayback::new()?.play_blocking(&clip, &worker_stop));

        tokio::select! {
            () = cancel.cancelled() => {
                stop.store(true, Ordering::Relaxed);
                (&mut playback).await.map_err(|e| Error::Playback(e.to_string()))?
            }
            result = &mut playback => result.map_err(|e| Error::Playback(e.to_string()))?,
        }
    }
}

/// Writes spoken lines to stdout instead of a speaker
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleOutput;

#[async_trait]
impl Synthesizer for ConsoleOutput {
    async fn speak(&self, text: &str, _cancel: &CancellationToken) -> Result<()> {
        println!("{text}");
        Ok(())
    }
}

/// Build the synthesizer named in configuration
///
/// # Errors
///
/// Returns error if the engine cannot be set up
pub fn synthesizer_from_config(config: &TtsConfig) -> Result<Arc<dyn Synthesizer>> {
    match config.provider {
        TtsProvider::Console => Ok(Arc::new(ConsoleOutput)),
        TtsProvider::Piper | TtsProvider::OpenAi => {
            Ok(Arc::new(SpeakerOutput::new(TextToSpeech::from_config(config)?)))
        }
    }
}
