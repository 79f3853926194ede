//! Daemon - the long-running voice assistant
//!
//! Builds the engines and executors from configuration, owns the microphone
//! for the process lifetime and drives the session machine until shutdown.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::actions::{ActionDispatcher, FAREWELL};
use crate::commands::CommandRegistry;
use crate::docker::{ContainerManager, DockerCli};
use crate::session::{Collaborators, ExitReason, SessionMachine};
use crate::system::{LinuxProbe, SystemProbe};
use crate::voice::{
    AudioSource, ConsoleOutput, FrameSource, SpeechToText, Synthesizer, synthesizer_from_config,
};
use crate::{Config, Error, Result};

/// Spoken once the microphone is open
pub const STARTUP_ANNOUNCEMENT: &str = "OpenCode is online and ready.";

/// The voice assistant daemon
pub struct Daemon {
    config: Config,
}

impl Daemon {
    /// Create a daemon from validated configuration
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Command registry for this configuration
    #[must_use]
    pub fn registry(&self) -> CommandRegistry {
        CommandRegistry::from_config(&self.config.interpreter, self.config.features)
    }

    /// Synthesizer from configuration, falling back to the console
    ///
    /// A missing voice must not keep the assistant from starting; responses are
    /// still logged and printed.
    #[must_use]
    pub fn synthesizer(&self) -> Arc<dyn Synthesizer> {
        match synthesizer_from_config(&self.config.tts) {
            Ok(synthesizer) => synthesizer,
            Err(e) => {
                tracing::warn!(provider = %self.config.tts.provider, error = %e, "speech output unavailable, printing responses instead");
                Arc::new(ConsoleOutput)
            }
        }
    }

    /// Wire the session machine with the real engines and executors
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the transcription engine cannot be set up
    pub async fn machine(&self) -> Result<SessionMachine> {
        let command_stt = SpeechToText::from_config(&self.config.stt)?;
        let wake_stt = SpeechToText::for_wake(&self.config.stt)?;
        tracing::info!(
            provider = %self.config.stt.provider,
            model = %self.config.stt.model,
            wake_model = %self.config.stt.wake_model,
            "transcription engine ready"
        );

        let probe: Arc<dyn SystemProbe> = Arc::new(LinuxProbe::new(self.config.actions.cpu_sample));
        let docker: Arc<dyn ContainerManager> = Arc::new(DockerCli::new(
            self.config.actions.docker_binary.clone(),
            self.config.actions.container_timeout,
        ));

        if self.config.features.docker {
            match docker.version().await {
                Ok(version) => tracing::info!(%version, "docker available"),
                Err(e) => tracing::warn!(error = %e, "docker not reachable, container commands will report it"),
            }
        }

        let registry = Arc::new(self.registry());
        let dispatcher = ActionDispatcher::standard(&self.config.actions, &registry, probe, docker);
        tracing::info!(commands = registry.definitions().len(), "command registry loaded");

        Ok(SessionMachine::new(
            &self.config,
            registry,
            Collaborators {
                wake_transcriber: Arc::new(wake_stt),
                command_transcriber: Arc::new(command_stt),
                synthesizer: self.synthesizer(),
                dispatcher,
            },
        ))
    }

    /// Run until the shutdown command, a termination signal or a fatal error
    ///
    /// # Errors
    ///
    /// Returns [`Error::AudioDevice`] if the microphone cannot be opened or
    /// fails, and configuration errors from engine setup
    pub async fn run(self, cancel: CancellationToken) -> Result<ExitReason> {
        let mut machine = self.machine().await?;

        if let Some(port) = self.config.reserved_port {
            tracing::info!(port, "control port reserved, not listening");
        }

        let audio = self.config.audio.clone();
        let (mut source, mut frames) = tokio::task::spawn_blocking(move || AudioSource::open(&audio))
            .await
            .map_err(|e| Error::AudioDevice(format!("audio startup task failed: {e}")))??;

        machine.speech().say(STARTUP_ANNOUNCEMENT, &cancel).await;
        frames.discard_pending();

        tracing::info!(device = %source.device_name(), name = %self.config.name, "voice assistant ready");

        let outcome = machine.run(&mut frames, &cancel).await;

        if matches!(outcome, Ok(ExitReason::Cancelled)) {
            // The session token is already cancelled; the farewell gets its own
            let farewell = CancellationToken::new();
            let spoken = tokio::time::timeout(self.config.tts.timeout, machine.speech().say(FAREWELL, &farewell)).await;
            if spoken.is_err() {
                tracing::warn!("farewell timed out");
            }
        }

        source.close();
        let stats = frames.stats();
        tracing::info!(
            captured = stats.captured,
            dropped = stats.dropped,
            discarded = stats.discarded,
            sessions = machine.context().completed(),
            aborted = machine.context().aborted(),
            reason = ?outcome.as_ref().ok(),
            "voice assistant stopped"
        );

        outcome
    }
}

/// Cancel `token` on Ctrl-C or SIGTERM
pub fn spawn_signal_listener(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "cannot listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "cannot listen for Ctrl-C");
                    return;
                }
                tracing::info!("interrupt received, shutting down");
            }
            () = terminate => tracing::info!("terminate signal received, shutting down"),
            () = token.cancelled() => return,
        }

        token.cancel();
    });
}

/// Consume frames and hand each to `inspect` until the source ends or `cancel` fires
///
/// Used by the microphone test to read the same frames the session loop sees.
///
/// # Errors
///
/// Returns [`Error::AudioDevice`] if the source fails
pub async fn drain_frames<S>(
    source: &mut S,
    cancel: &CancellationToken,
    mut inspect: impl FnMut(&crate::voice::AudioFrame),
) -> Result<u64>
where
    S: FrameSource + ?Sized,
{
    let mut count = 0;
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => return Ok(count),
            next = source.next_frame() => next?,
        };
        let Some(frame) = next else {
            return Ok(count);
        };
        inspect(&frame);
        count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TtsProvider;

    #[test]
    fn test_registry_follows_features() {
        let mut config = Config::default();
        config.features.docker = false;
        let registry = Daemon::new(config).registry();
        assert!(!registry.contains(crate::commands::CommandKind::ListContainers));
        assert!(registry.contains(crate::commands::CommandKind::SystemStatus));
    }

    #[tokio::test]
    async fn test_missing_voice_falls_back_to_console() {
        let mut config = Config::default();
        config.tts.provider = TtsProvider::Piper;
        config.tts.piper_binary = "definitely-not-a-real-piper-binary".to_string();
        let synthesizer = Daemon::new(config).synthesizer();
        synthesizer.speak("still works", &CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_drain_stops_when_source_ends() {
        let (sender, mut receiver) = crate::voice::frame_channel(8);
        for seq in 0..3 {
            sender.push(crate::voice::AudioFrame::new(vec![0.0; 16], 16000, seq, std::time::Duration::ZERO));
        }
        sender.finish();

        let mut seen = Vec::new();
        let count = drain_frames(&mut receiver, &CancellationToken::new(), |f| seen.push(f.sequence()))
            .await
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(seen, vec![0, 1, 2]);
    }
}
