//! Spoken responses with a time budget and one fallback attempt

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::tts::Synthesizer;
use crate::Error;

/// What actually reached the speaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechOutcome {
    /// The requested text was played
    Spoken,
    /// Synthesis failed and the fallback phrase was played instead
    Fallback,
    /// Nothing could be played; the text was only logged
    Silent,
    /// Shutdown interrupted playback
    Cancelled,
}

/// Speaks responses and never fails the caller
///
/// Every line is logged as `[<name>]: <text>` before synthesis, so the
/// transcript survives even when the speaker does not.
#[derive(Clone)]
pub struct SpeechResponder {
    synthesizer: Arc<dyn Synthesizer>,
    name: String,
    timeout: Duration,
    fallback: String,
}

impl SpeechResponder {
    /// Create a responder
    #[must_use]
    pub fn new(synthesizer: Arc<dyn Synthesizer>, name: impl Into<String>, timeout: Duration, fallback: impl Into<String>) -> Self {
        Self {
            synthesizer,
            name: name.into(),
            timeout,
            fallback: fallback.into(),
        }
    }

    /// Assistant name used in log lines
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Say `text`, retrying once with the fallback phrase
    pub async fn say(&self, text: &str, cancel: &CancellationToken) -> SpeechOutcome {
        let text = text.trim();
        if text.is_empty() {
            return SpeechOutcome::Silent;
        }

        tracing::info!("[{}]: {}", self.name, text);

        match self.attempt(text, cancel).await {
            Ok(()) if cancel.is_cancelled() => SpeechOutcome::Cancelled,
            Ok(()) => SpeechOutcome::Spoken,
            Err(e) => {
                tracing::warn!(error = %e, "speech synthesis failed");
                if cancel.is_cancelled() {
                    return SpeechOutcome::Cancelled;
                }
                if self.fallback.is_empty() || self.fallback == text {
                    return SpeechOutcome::Silent;
                }

                match self.attempt(&self.fallback, cancel).await {
                    Ok(()) => SpeechOutcome::Fallback,
                    Err(e) => {
                        tracing::error!(error = %e, "fallback speech failed, response was not spoken");
                        SpeechOutcome::Silent
                    }
                }
            }
        }
    }

    async fn attempt(&self, text: &str, cancel: &CancellationToken) -> crate::Result<()> {
        tokio::time::timeout(self.timeout, self.synthesizer.speak(text, cancel))
            .await
            .map_err(|_| Error::Timeout(self.timeout))?
    }
}
