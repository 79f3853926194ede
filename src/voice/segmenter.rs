//! Energy-based speech segmentation
//!
//! Splits the frame stream into utterance-sized chunks: a segment opens on the
//! first frame above the energy threshold and closes after enough trailing
//! silence. Segments with too little voiced audio are discarded as noise.

use crate::config::AudioConfig;

/// Thresholds, all in samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmenterSettings {
    /// RMS level above which a frame counts as speech
    pub energy_threshold: f32,
    /// Voiced samples needed for a segment to count
    pub min_speech: usize,
    /// Trailing silence that closes a segment
    pub end_silence: usize,
    /// Hard cap on segment length
    pub max_segment: usize,
}

impl SegmenterSettings {
    /// Settings for spotting wake phrases
    #[must_use]
    pub const fn for_wake(audio: &AudioConfig) -> Self {
        Self {
            energy_threshold: audio.energy_threshold,
            min_speech: audio.ms_to_samples(audio.min_speech_ms),
            end_silence: audio.ms_to_samples(audio.end_silence_ms),
            max_segment: audio.ms_to_samples(audio.max_wake_segment_ms),
        }
    }
}

/// Segmenter state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// Waiting for speech
    Idle,
    /// Speech started, accumulating
    Listening,
}

/// Accumulates voiced audio into segments
#[derive(Debug)]
pub struct SpeechSegmenter {
    settings: SegmenterSettings,
    state: SegmenterState,
    buffer: Vec<f32>,
    silence: usize,
    voiced: usize,
}

impl SpeechSegmenter {
    /// Create a segmenter
    #[must_use]
    pub const fn new(settings: SegmenterSettings) -> Self {
        Self {
            settings,
            state: SegmenterState::Idle,
            buffer: Vec::new(),
            silence: 0,
            voiced: 0,
        }
    }

    /// Feed samples; returns a finished segment when one closes
    pub fn push(&mut self, samples: &[f32]) -> Option<Vec<f32>> {
        let energy = calculate_energy(samples);
        let is_speech = energy > self.settings.energy_threshold;

        match self.state {
            SegmenterState::Idle => {
                if is_speech {
                    self.state = SegmenterState::Listening;
                    self.buffer.clear();
                    self.buffer.extend_from_slice(samples);
                    self.silence = 0;
                    self.voiced = samples.len();
                    tracing::trace!(energy, "speech detected, listening");
                }
                None
            }
            SegmenterState::Listening => {
                self.buffer.extend_from_slice(samples);

                if is_speech {
                    self.silence = 0;
                    self.voiced += samples.len();
                } else {
                    self.silence += samples.len();
                }

                tracing::trace!(
                    buffer_len = self.buffer.len(),
                    silence = self.silence,
                    is_speech,
                    energy,
                    "listening state"
                );

                let enough_speech = self.voiced >= self.settings.min_speech;

                if self.silence >= self.settings.end_silence || self.buffer.len() >= self.settings.max_segment {
                    if enough_speech {
                        tracing::debug!(samples = self.buffer.len(), voiced = self.voiced, "speech segment complete");
                        return Some(self.take());
                    }
                    tracing::trace!("too little speech, resetting");
                    self.reset();
                }

                None
            }
        }
    }

    /// Return the current segment if it already holds enough speech
    pub fn flush(&mut self) -> Option<Vec<f32>> {
        let ready = self.state == SegmenterState::Listening && self.voiced >= self.settings.min_speech;
        let segment = ready.then(|| self.take());
        self.reset();
        segment
    }

    /// Drop any partial segment
    pub fn reset(&mut self) {
        self.state = SegmenterState::Idle;
        self.buffer.clear();
        self.silence = 0;
        self.voiced = 0;
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        self.state
    }

    /// Whether a segment is open
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.state == SegmenterState::Listening
    }

    fn take(&mut self) -> Vec<f32> {
        let segment = std::mem::take(&mut self.buffer);
        self.reset();
        segment
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
