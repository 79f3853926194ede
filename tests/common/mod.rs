//! Shared test utilities
//!
//! Hardware-free stand-ins for the microphone, the speech engines, the Docker
//! daemon and the OS probes.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use opencode_voice::actions::ActionDispatcher;
use opencode_voice::commands::CommandRegistry;
use opencode_voice::docker::{ContainerManager, ContainerState, ContainerSummary};
use opencode_voice::session::{Collaborators, SessionMachine};
use opencode_voice::system::{DiskUsage, MemoryUsage, NetworkInterface, SystemProbe};
use opencode_voice::voice::{AudioFrame, AudioWindow, FrameSource, SAMPLE_RATE, Synthesizer, Transcriber};
use opencode_voice::{Config, Error, Result, TranscriptionFailure};

/// Frame length used by every scripted source
pub const FRAME_MS: u32 = 100;

/// Generate sine wave audio samples
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn sine(frequency: f32, duration: Duration, amplitude: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration.as_secs_f32()) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn silence(duration: Duration) -> Vec<f32> {
    vec![0.0; (SAMPLE_RATE as f32 * duration.as_secs_f32()) as usize]
}

/// One stretch of scripted audio
#[derive(Debug, Clone, Copy)]
pub enum Audio {
    Speech(u64),
    Silence(u64),
}

/// Frame source playing a fixed script, then ending
///
/// Frames are produced on demand, so nothing is ever pending.
pub struct ScriptedFrames {
    script: VecDeque<Audio>,
    remaining: u64,
    speaking: bool,
    sequence: u64,
}

impl ScriptedFrames {
    pub fn new(script: &[Audio]) -> Self {
        Self {
            script: script.iter().copied().collect(),
            remaining: 0,
            speaking: false,
            sequence: 0,
        }
    }

    /// Wake phrase followed by enough silence to close the wake segment
    pub fn wake() -> [Audio; 2] {
        [Audio::Speech(600), Audio::Silence(600)]
    }

    /// Spoken command followed by enough silence to close the utterance
    pub fn command() -> [Audio; 2] {
        [Audio::Speech(800), Audio::Silence(1000)]
    }
}

#[async_trait]
impl FrameSource for ScriptedFrames {
    async fn next_frame(&mut self) -> Result<Option<AudioFrame>> {
        while self.remaining == 0 {
            match self.script.pop_front() {
                Some(Audio::Speech(ms)) => {
                    self.speaking = true;
                    self.remaining = ms / u64::from(FRAME_MS);
                }
                Some(Audio::Silence(ms)) => {
                    self.speaking = false;
                    self.remaining = ms / u64::from(FRAME_MS);
                }
                None => return Ok(None),
            }
        }
        self.remaining -= 1;

        let length = Duration::from_millis(u64::from(FRAME_MS));
        let samples = if self.speaking {
            sine(440.0, length, 0.3)
        } else {
            silence(length)
        };
        let frame = AudioFrame::new(
            samples,
            SAMPLE_RATE,
            self.sequence,
            length * u32::try_from(self.sequence).unwrap_or(u32::MAX),
        );
        self.sequence += 1;
        Ok(Some(frame))
    }

    fn discard_pending(&mut self) -> usize {
        0
    }
}

/// Frame source whose device fails immediately
pub struct BrokenFrames;

#[async_trait]
impl FrameSource for BrokenFrames {
    async fn next_frame(&mut self) -> Result<Option<AudioFrame>> {
        Err(Error::AudioDevice("device unplugged".into()))
    }

    fn discard_pending(&mut self) -> usize {
        0
    }
}

/// Answers transcription requests from a queue, in order
///
/// Shared by the wake and command roles; an exhausted queue hears nothing.
#[derive(Default)]
pub struct ScriptedTranscriber {
    replies: Mutex<VecDeque<std::result::Result<String, TranscriptionFailure>>>,
    calls: Mutex<usize>,
}

impl ScriptedTranscriber {
    pub fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| Ok((*r).to_string())).collect()),
            calls: Mutex::new(0),
        })
    }

    pub fn with_replies(replies: Vec<std::result::Result<String, TranscriptionFailure>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, _window: &AudioWindow) -> std::result::Result<String, TranscriptionFailure> {
        *self.calls.lock().unwrap() += 1;
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(TranscriptionFailure::NoSpeech))
    }
}

/// Records everything it is asked to say
#[derive(Default)]
pub struct RecordingSynthesizer {
    spoken: Mutex<Vec<String>>,
    fail_unless: Option<String>,
}

impl RecordingSynthesizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fails every line except `allowed`, recording only what played
    pub fn failing_except(allowed: &str) -> Arc<Self> {
        Arc::new(Self {
            spoken: Mutex::new(Vec::new()),
            fail_unless: Some(allowed.to_string()),
        })
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synthesizer for RecordingSynthesizer {
    async fn speak(&self, text: &str, _cancel: &CancellationToken) -> Result<()> {
        if let Some(allowed) = &self.fail_unless
            && text != allowed
        {
            return Err(Error::Synthesis("voice model missing".into()));
        }
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// In-memory container daemon
#[derive(Default)]
pub struct FakeDocker {
    containers: Mutex<HashMap<String, bool>>,
    unreachable: bool,
    operations: Mutex<Vec<String>>,
}

impl FakeDocker {
    /// Daemon with `(name, running)` containers
    pub fn with(containers: &[(&str, bool)]) -> Arc<Self> {
        Arc::new(Self {
            containers: Mutex::new(containers.iter().map(|(n, r)| ((*n).to_string(), *r)).collect()),
            unreachable: false,
            operations: Mutex::new(Vec::new()),
        })
    }

    /// Daemon that cannot be contacted
    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            unreachable: true,
            ..Self::default()
        })
    }

    /// Mutating operations performed, as "verb name"
    pub fn operations(&self) -> Vec<String> {
        self.operations.lock().unwrap().clone()
    }

    pub fn is_running(&self, name: &str) -> Option<bool> {
        self.containers.lock().unwrap().get(name).copied()
    }

    fn reach(&self) -> Result<()> {
        if self.unreachable {
            return Err(Error::DockerUnavailable("cannot connect to the docker daemon".into()));
        }
        Ok(())
    }

    fn set(&self, verb: &str, name: &str, running: bool) -> Result<()> {
        self.reach()?;
        let mut containers = self.containers.lock().unwrap();
        let state = containers
            .get_mut(name)
            .ok_or_else(|| Error::ContainerNotFound(name.to_string()))?;
        *state = running;
        self.operations.lock().unwrap().push(format!("{verb} {name}"));
        Ok(())
    }
}

#[async_trait]
impl ContainerManager for FakeDocker {
    async fn list_running(&self) -> Result<Vec<ContainerSummary>> {
        self.reach()?;
        let mut running: Vec<ContainerSummary> = self
            .containers
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, running)| **running)
            .map(|(name, _)| ContainerSummary {
                name: name.clone(),
                status: "Up 5 minutes".to_string(),
            })
            .collect();
        running.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(running)
    }

    async fn inspect(&self, name: &str) -> Result<ContainerState> {
        self.reach()?;
        match self.containers.lock().unwrap().get(name) {
            Some(true) => Ok(ContainerState::Running),
            Some(false) => Ok(ContainerState::Stopped("exited".to_string())),
            None => Err(Error::ContainerNotFound(name.to_string())),
        }
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.set("start", name, true)
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.set("stop", name, false)
    }

    async fn restart(&self, name: &str) -> Result<()> {
        self.set("restart", name, true)
    }

    async fn version(&self) -> Result<String> {
        self.reach()?;
        Ok("27.0.3".to_string())
    }
}

/// Probe returning fixed readings and counting calls
#[derive(Default)]
pub struct FixedProbe {
    calls: Mutex<usize>,
}

impl FixedProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    fn count(&self) {
        *self.calls.lock().unwrap() += 1;
    }
}

#[async_trait]
impl SystemProbe for FixedProbe {
    async fn cpu_percent(&self) -> Result<f32> {
        self.count();
        Ok(12.0)
    }

    fn cpu_cores(&self) -> usize {
        4
    }

    async fn memory(&self) -> Result<MemoryUsage> {
        self.count();
        Ok(MemoryUsage {
            total_kib: 1000,
            available_kib: 600,
            swap_total_kib: 0,
            swap_free_kib: 0,
        })
    }

    async fn disk(&self, path: &str) -> Result<DiskUsage> {
        self.count();
        Ok(DiskUsage {
            mount: path.to_string(),
            total_kib: 1000,
            used_kib: 550,
            available_kib: 450,
        })
    }

    async fn temperature(&self) -> Result<Option<f32>> {
        self.count();
        Ok(None)
    }

    async fn interfaces(&self) -> Result<Vec<NetworkInterface>> {
        self.count();
        Ok(vec![NetworkInterface {
            name: "eth0".to_string(),
            address: "192.168.1.20".to_string(),
        }])
    }

    async fn reachable(&self, _target: &str, _timeout: Duration) -> bool {
        self.count();
        true
    }

    async fn audio_inputs(&self) -> Result<Vec<String>> {
        self.count();
        Ok(vec!["Test Mic".to_string()])
    }
}

/// Configuration valid without any API keys
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.wake.acknowledgement = None;
    config.capture.no_command_prompt = None;
    config.actions.report_dir = None;
    config
}

/// Everything a session machine test needs to inspect afterwards
pub struct Harness {
    pub machine: SessionMachine,
    pub transcriber: Arc<ScriptedTranscriber>,
    pub speaker: Arc<RecordingSynthesizer>,
    pub docker: Arc<FakeDocker>,
    pub probe: Arc<FixedProbe>,
}

impl Harness {
    pub fn new(config: &Config, transcripts: &[&str], docker: Arc<FakeDocker>) -> Self {
        Self::build(config, ScriptedTranscriber::new(transcripts), RecordingSynthesizer::new(), docker)
    }

    pub fn build(
        config: &Config,
        transcriber: Arc<ScriptedTranscriber>,
        speaker: Arc<RecordingSynthesizer>,
        docker: Arc<FakeDocker>,
    ) -> Self {
        let probe = FixedProbe::new();
        let registry = Arc::new(CommandRegistry::from_config(&config.interpreter, config.features));
        let dispatcher = ActionDispatcher::standard(
            &config.actions,
            &registry,
            Arc::clone(&probe) as Arc<dyn SystemProbe>,
            Arc::clone(&docker) as Arc<dyn ContainerManager>,
        );

        let machine = SessionMachine::new(
            config,
            registry,
            Collaborators {
                wake_transcriber: Arc::clone(&transcriber) as Arc<dyn Transcriber>,
                command_transcriber: Arc::clone(&transcriber) as Arc<dyn Transcriber>,
                synthesizer: Arc::clone(&speaker) as Arc<dyn Synthesizer>,
                dispatcher,
            },
        );

        Self {
            machine,
            transcriber,
            speaker,
            docker,
            probe,
        }
    }
}
