//! Command utterance capture after a wake phrase
//!
//! Timing is measured in audio time (samples consumed), so a stalled consumer
//! does not eat into the listening window.

use std::time::Duration;

use super::frames::{AudioFrame, AudioWindow};
use super::segmenter::{SegmenterSettings, SpeechSegmenter};
use crate::config::{AudioConfig, CaptureConfig};

/// Progress of a capture
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    /// Still listening
    Pending,
    /// Speech followed by silence (or the duration cap)
    Utterance(AudioWindow),
    /// Nothing said before the silence timeout
    NoSpeech,
}

/// Collects one command utterance
#[derive(Debug)]
pub struct UtteranceCapture {
    segmenter: SpeechSegmenter,
    sample_rate: u32,
    elapsed: usize,
    silence_timeout: usize,
    max_duration: usize,
}

impl UtteranceCapture {
    /// Start a capture window
    #[must_use]
    pub fn new(audio: &AudioConfig, capture: &CaptureConfig) -> Self {
        let to_samples = |d: Duration| {
            #[allow(clippy::cast_possible_truncation)]
            let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
            audio.ms_to_samples(ms)
        };
        let max_duration = to_samples(capture.max_duration);

        let settings = SegmenterSettings {
            energy_threshold: audio.energy_threshold,
            min_speech: audio.ms_to_samples(audio.min_speech_ms),
            end_silence: audio.ms_to_samples(capture.end_silence_ms),
            max_segment: max_duration,
        };

        Self {
            segmenter: SpeechSegmenter::new(settings),
            sample_rate: audio.sample_rate,
            elapsed: 0,
            silence_timeout: to_samples(capture.silence_timeout),
            max_duration,
        }
    }

    /// Feed the next frame
    pub fn push(&mut self, frame: &AudioFrame) -> CaptureOutcome {
        self.elapsed += frame.len();

        if let Some(segment) = self.segmenter.push(frame.samples()) {
            tracing::debug!(samples = segment.len(), "command utterance captured");
            return CaptureOutcome::Utterance(AudioWindow::new(segment, self.sample_rate));
        }

        if self.elapsed >= self.max_duration {
            return match self.segmenter.flush() {
                Some(segment) => {
                    tracing::debug!(samples = segment.len(), "command capture hit duration cap");
                    CaptureOutcome::Utterance(AudioWindow::new(segment, self.sample_rate))
                }
                None => CaptureOutcome::NoSpeech,
            };
        }

        if !self.segmenter.is_listening() && self.elapsed >= self.silence_timeout {
            tracing::debug!("no speech before silence timeout");
            return CaptureOutcome::NoSpeech;
        }

        CaptureOutcome::Pending
    }

    /// Audio time consumed so far
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn elapsed(&self) -> Duration {
        Duration::from_secs_f64(self.elapsed as f64 / f64::from(self.sample_rate.max(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn capture() -> UtteranceCapture {
        let config = Config::default();
        UtteranceCapture::new(&config.audio, &config.capture)
    }

    fn frame(level: f32) -> AudioFrame {
        AudioFrame::new(vec![level; 1600], 16000, 0, Duration::ZERO)
    }

    fn run(capture: &mut UtteranceCapture, level: f32, frames: usize) -> CaptureOutcome {
        for _ in 0..frames {
            let outcome = capture.push(&frame(level));
            if outcome != CaptureOutcome::Pending {
                return outcome;
            }
        }
        CaptureOutcome::Pending
    }

    #[test]
    fn test_silence_times_out() {
        let mut capture = capture();
        // 5 s default silence timeout at 100 ms frames
        assert_eq!(run(&mut capture, 0.0, 49), CaptureOutcome::Pending);
        assert_eq!(capture.push(&frame(0.0)), CaptureOutcome::NoSpeech);
        assert_eq!(capture.elapsed(), Duration::from_secs(5));
    }

    #[test]
    fn test_speech_then_silence_completes() {
        let mut capture = capture();
        assert_eq!(run(&mut capture, 0.2, 10), CaptureOutcome::Pending);

        match run(&mut capture, 0.0, 20) {
            CaptureOutcome::Utterance(window) => {
                // 1 s of speech plus 800 ms of trailing silence
                assert_eq!(window.samples().len(), 16000 + 12800);
            }
            other => panic!("expected utterance, got {other:?}"),
        }
    }

    #[test]
    fn test_speech_late_in_window_is_kept() {
        let mut capture = capture();
        assert_eq!(run(&mut capture, 0.0, 45), CaptureOutcome::Pending);
        assert_eq!(run(&mut capture, 0.2, 10), CaptureOutcome::Pending);
        assert!(matches!(run(&mut capture, 0.0, 10), CaptureOutcome::Utterance(_)));
    }

    #[test]
    fn test_endless_speech_is_capped() {
        let mut capture = capture();
        assert!(matches!(run(&mut capture, 0.2, 200), CaptureOutcome::Utterance(_)));
        assert_eq!(capture.elapsed(), Duration::from_secs(10));
    }
}
