//! Session state machine
//!
//! One loop consumes frames in capture order. While listening, frames feed the
//! wake word gate; after a wake phrase the same loop captures the command,
//! interprets it, runs the executor and speaks the response before it looks at
//! audio again. [`SessionContext`] is the only place the state is written.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::actions::{ActionDispatcher, ActionResult};
use crate::commands::{CommandKind, CommandRegistry, Interpretation};
use crate::config::{AudioConfig, CaptureConfig, Config};
use crate::voice::{
    CaptureOutcome, FrameSource, SegmenterSettings, SpeechOutcome, SpeechResponder, Synthesizer, Transcriber,
    TranscriptionAdapter, UtteranceCapture, WakeEvent, WakeWordGate,
};
use crate::Result;

/// Spoken when the command audio could not be transcribed
pub const NOT_UNDERSTOOD_RESPONSE: &str = "Sorry, I didn't catch that.";

/// How many transitions the context remembers
const HISTORY_LIMIT: usize = 64;

/// Process-wide session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    ListeningForWake,
    CapturingCommand,
    Executing,
    Speaking,
    Shutdown,
}

impl SessionState {
    /// Stable lowercase name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ListeningForWake => "listening_for_wake",
            Self::CapturingCommand => "capturing_command",
            Self::Executing => "executing",
            Self::Speaking => "speaking",
            Self::Shutdown => "shutdown",
        }
    }

    /// Whether `next` may directly follow `self`
    ///
    /// Capture may go straight to speaking (transcription failure, "no
    /// command heard" prompt) or back to listening (silent abort). Any state
    /// may shut down; nothing leaves shutdown.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::ListeningForWake)
                | (Self::ListeningForWake, Self::CapturingCommand)
                | (
                    Self::CapturingCommand,
                    Self::Executing | Self::Speaking | Self::ListeningForWake
                )
                | (Self::Executing, Self::Speaking)
                | (Self::Speaking, Self::Idle)
                | (
                    Self::Idle
                        | Self::ListeningForWake
                        | Self::CapturingCommand
                        | Self::Executing
                        | Self::Speaking,
                    Self::Shutdown
                )
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Why [`SessionMachine::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The user asked to shut down; the farewell has been spoken
    ShutdownCommand,
    /// The cancellation token fired (signal)
    Cancelled,
    /// The frame source closed
    StreamEnded,
}

/// Single writer of the session state
///
/// Other components observe the state through [`subscribe`](Self::subscribe).
#[derive(Debug)]
pub struct SessionContext {
    state: SessionState,
    tx: watch::Sender<SessionState>,
    history: VecDeque<(SessionState, SessionState)>,
    active: Option<Uuid>,
    completed: u64,
    aborted: u64,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    /// Fresh context in [`SessionState::Idle`]
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionState::Idle);
        Self {
            state: SessionState::Idle,
            tx,
            history: VecDeque::new(),
            active: None,
            completed: 0,
            aborted: 0,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Read-only view of state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Move to `next`, refusing transitions that would skip a state
    pub fn transition(&mut self, next: SessionState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::error!(from = %self.state, to = %next, "invalid session transition refused");
            return false;
        }

        tracing::debug!(from = %self.state, to = %next, session_id = ?self.active, "session state");

        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back((self.state, next));
        self.state = next;
        self.tx.send_replace(next);
        true
    }

    /// Recent transitions, oldest first
    #[must_use]
    pub const fn history(&self) -> &VecDeque<(SessionState, SessionState)> {
        &self.history
    }

    /// Claim the single session slot
    ///
    /// Returns `false` if a session is already in flight.
    pub fn begin(&mut self, id: Uuid) -> bool {
        if let Some(current) = self.active {
            tracing::debug!(active = %current, rejected = %id, "session already active, ignoring wake");
            return false;
        }
        self.active = Some(id);
        true
    }

    /// Release the session slot
    pub fn end(&mut self, completed: bool) {
        if self.active.take().is_some() {
            if completed {
                self.completed += 1;
            } else {
                self.aborted += 1;
            }
        }
    }

    /// Session in flight, if any
    #[must_use]
    pub const fn active(&self) -> Option<Uuid> {
        self.active
    }

    /// Sessions that ended with a spoken response
    #[must_use]
    pub const fn completed(&self) -> u64 {
        self.completed
    }

    /// Sessions abandoned without a command
    #[must_use]
    pub const fn aborted(&self) -> u64 {
        self.aborted
    }
}

/// One wake → transcribe → interpret → act → speak cycle
#[derive(Debug)]
struct CommandSession {
    id: Uuid,
    wake: WakeEvent,
    transcript: Option<String>,
    command: Option<CommandKind>,
    result: Option<ActionResult>,
    started: Instant,
}

impl CommandSession {
    fn new(wake: WakeEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            wake,
            transcript: None,
            command: None,
            result: None,
            started: Instant::now(),
        }
    }

    fn log_summary(&self, outcome: &str) {
        tracing::info!(
            session_id = %self.id,
            wake_phrase = %self.wake.phrase,
            command = self.command.map(CommandKind::name),
            success = self.result.as_ref().map(|r| r.success),
            duration_ms = self.started.elapsed().as_millis(),
            transcript = self.transcript.as_deref(),
            outcome,
            "session finished"
        );
    }
}

/// How a session ended
enum SessionEnd {
    Listening,
    Shutdown,
    Cancelled,
}

enum Captured {
    Window(crate::voice::AudioWindow),
    NoSpeech,
    Cancelled,
}

/// External engines and executors the machine drives
pub struct Collaborators {
    /// Engine used on short wake segments
    pub wake_transcriber: Arc<dyn Transcriber>,
    /// Engine used on command utterances
    pub command_transcriber: Arc<dyn Transcriber>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub dispatcher: ActionDispatcher,
}

/// Coordinates the gate, adapters, interpreter and executors
pub struct SessionMachine {
    audio: AudioConfig,
    capture: CaptureConfig,
    acknowledgement: Option<String>,
    gate: WakeWordGate,
    wake_stt: TranscriptionAdapter,
    command_stt: TranscriptionAdapter,
    registry: Arc<CommandRegistry>,
    dispatcher: ActionDispatcher,
    speech: SpeechResponder,
    context: SessionContext,
}

impl SessionMachine {
    /// Wire the machine from configuration
    #[must_use]
    pub fn new(config: &Config, registry: Arc<CommandRegistry>, collaborators: Collaborators) -> Self {
        let gate = WakeWordGate::new(
            &config.wake.phrases,
            config.wake.strategy,
            SegmenterSettings::for_wake(&config.audio),
            config.audio.sample_rate,
        );

        Self {
            audio: config.audio.clone(),
            capture: config.capture.clone(),
            acknowledgement: config.wake.acknowledgement.clone().filter(|a| !a.trim().is_empty()),
            gate,
            wake_stt: TranscriptionAdapter::new(collaborators.wake_transcriber, config.stt.timeout),
            command_stt: TranscriptionAdapter::new(collaborators.command_transcriber, config.stt.timeout),
            registry,
            dispatcher: collaborators.dispatcher,
            speech: SpeechResponder::new(
                collaborators.synthesizer,
                config.name.clone(),
                config.tts.timeout,
                config.tts.fallback_phrase.clone(),
            ),
            context: SessionContext::new(),
        }
    }

    /// Session context, read-only
    #[must_use]
    pub const fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Speech adapter, for announcements outside a session
    #[must_use]
    pub const fn speech(&self) -> &SpeechResponder {
        &self.speech
    }

    /// Process frames until shutdown, cancellation or end of stream
    ///
    /// # Errors
    ///
    /// Returns [`Error::AudioDevice`](crate::Error::AudioDevice) when the frame source fails. Every other
    /// failure is handled inside the session that caused it.
    pub async fn run<S>(&mut self, source: &mut S, cancel: &CancellationToken) -> Result<ExitReason>
    where
        S: FrameSource + ?Sized,
    {
        if self.context.state() == SessionState::Idle {
            self.context.transition(SessionState::ListeningForWake);
        }
        tracing::info!(wake_phrases = ?self.gate.phrases(), "listening for wake phrase");

        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => return Ok(self.cancelled()),
                next = source.next_frame() => next,
            };

            let frame = match next {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::info!("audio stream ended");
                    return Ok(ExitReason::StreamEnded);
                }
                Err(e) => {
                    tracing::error!(error = %e, "audio source failed");
                    self.context.transition(SessionState::Shutdown);
                    return Err(e);
                }
            };

            let Some(segment) = self.gate.accept_frame(&frame) else {
                continue;
            };

            let heard = tokio::select! {
                () = cancel.cancelled() => return Ok(self.cancelled()),
                heard = self.wake_stt.transcribe(&segment) => heard,
            };

            let text = match heard {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "wake segment transcription failed");
                    continue;
                }
            };
            tracing::trace!(text, "wake candidate");

            let Some(event) = self.gate.accept_transcript(&text) else {
                continue;
            };

            match self.run_session(event, source, cancel).await {
                SessionEnd::Listening => {}
                SessionEnd::Shutdown => return Ok(ExitReason::ShutdownCommand),
                SessionEnd::Cancelled => return Ok(self.cancelled()),
            }
        }
    }

    fn cancelled(&mut self) -> ExitReason {
        if self.context.state() != SessionState::Shutdown {
            self.context.transition(SessionState::Shutdown);
        }
        self.context.end(false);
        tracing::info!("session loop cancelled");
        ExitReason::Cancelled
    }

    async fn run_session<S>(&mut self, event: WakeEvent, source: &mut S, cancel: &CancellationToken) -> SessionEnd
    where
        S: FrameSource + ?Sized,
    {
        let mut session = CommandSession::new(event);
        if !self.context.begin(session.id) {
            self.gate.resume();
            return SessionEnd::Listening;
        }
        self.context.transition(SessionState::CapturingCommand);

        let remainder = session.wake.remainder.clone().filter(|r| !r.trim().is_empty());

        let transcript = if let Some(text) = remainder {
            tracing::debug!(session_id = %session.id, "command spoken with wake phrase");
            Ok(text)
        } else {
            if let Some(ack) = self.acknowledgement.clone() {
                if self.speech.say(&ack, cancel).await == SpeechOutcome::Cancelled {
                    return SessionEnd::Cancelled;
                }
                source.discard_pending();
            }

            match self.capture_command(source, cancel).await {
                Captured::Cancelled => return SessionEnd::Cancelled,
                Captured::NoSpeech => Ok(String::new()),
                Captured::Window(window) => tokio::select! {
                    () = cancel.cancelled() => return SessionEnd::Cancelled,
                    text = self.command_stt.transcribe(&window) => text,
                },
            }
        };

        let response = match transcript {
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "command transcription failed");
                NOT_UNDERSTOOD_RESPONSE.to_string()
            }
            Ok(text) if text.trim().is_empty() => {
                let Some(prompt) = self.capture.no_command_prompt.clone() else {
                    tracing::info!(session_id = %session.id, "no command heard, returning to wake listening");
                    self.context.transition(SessionState::ListeningForWake);
                    self.context.end(false);
                    session.log_summary("aborted");
                    self.finish_listening(source);
                    return SessionEnd::Listening;
                };
                prompt
            }
            Ok(text) => {
                tracing::info!("[User]: {}", text.trim());
                session.transcript = Some(text.trim().to_string());
                self.context.transition(SessionState::Executing);

                match self.registry.interpret(&text) {
                    Interpretation::Matched(command) => {
                        tracing::info!(session_id = %session.id, command = %command.kind, argument = ?command.argument, "command matched");
                        session.command = Some(command.kind);
                        let Some(result) = self.dispatcher.dispatch(&command, cancel).await else {
                            return SessionEnd::Cancelled;
                        };
                        if !result.success {
                            tracing::warn!(session_id = %session.id, command = %command.kind, response = %result.response, "action failed");
                        }
                        let response = result.response.clone();
                        session.result = Some(result);
                        response
                    }
                    Interpretation::Unrecognized { hint, partial } => {
                        tracing::info!(session_id = %session.id, ?partial, "command not recognized");
                        hint
                    }
                }
            }
        };

        self.context.transition(SessionState::Speaking);
        if self.speech.say(&response, cancel).await == SpeechOutcome::Cancelled {
            return SessionEnd::Cancelled;
        }

        let shutdown = session.result.as_ref().is_some_and(|r| r.shutdown);
        self.context.end(true);

        if shutdown {
            self.context.transition(SessionState::Shutdown);
            session.log_summary("shutdown");
            return SessionEnd::Shutdown;
        }

        self.context.transition(SessionState::Idle);
        session.log_summary("completed");
        self.finish_listening(source);
        SessionEnd::Listening
    }

    /// Collect frames until an utterance closes or the window expires
    async fn capture_command<S>(&self, source: &mut S, cancel: &CancellationToken) -> Captured
    where
        S: FrameSource + ?Sized,
    {
        let mut capture = UtteranceCapture::new(&self.audio, &self.capture);

        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => return Captured::Cancelled,
                next = source.next_frame() => next,
            };

            let frame = match next {
                Ok(Some(frame)) => frame,
                Ok(None) => return Captured::NoSpeech,
                Err(e) => {
                    // The outer loop sees the same failure on its next read
                    tracing::warn!(error = %e, "audio failed during command capture");
                    return Captured::NoSpeech;
                }
            };

            match capture.push(&frame) {
                CaptureOutcome::Pending => {}
                CaptureOutcome::Utterance(window) => {
                    tracing::debug!(audio_ms = window.duration().as_millis(), "command audio captured");
                    return Captured::Window(window);
                }
                CaptureOutcome::NoSpeech => {
                    tracing::debug!(elapsed = ?capture.elapsed(), "capture window expired");
                    return Captured::NoSpeech;
                }
            }
        }
    }

    /// Drop audio heard while busy and resume wake scanning
    fn finish_listening<S>(&mut self, source: &mut S)
    where
        S: FrameSource + ?Sized,
    {
        source.discard_pending();
        if self.context.state() == SessionState::Idle {
            self.context.transition(SessionState::ListeningForWake);
        }
        self.gate.resume();
    }
}

impl std::fmt::Debug for SessionMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionMachine")
            .field("state", &self.context.state())
            .field("scanning", &self.gate.is_scanning())
            .finish_non_exhaustive()
    }
}
