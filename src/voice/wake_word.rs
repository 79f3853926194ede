//! Wake word detection
//!
//! Hybrid approach: local energy segmentation picks out short utterances, the
//! transcriber turns each into text, and the gate matches configured phrases
//! against a rolling window of recent words so a phrase split across two
//! segments is still found.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use super::frames::{AudioFrame, AudioWindow};
use super::segmenter::{SegmenterSettings, SpeechSegmenter};
use crate::matching::{self, MatchStrategy};

/// A detected wake phrase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeEvent {
    /// Configured phrase that matched
    pub phrase: String,
    /// When the phrase was recognized
    pub detected_at: DateTime<Utc>,
    /// Words spoken after the phrase in the same utterance, case preserved
    pub remainder: Option<String>,
}

/// Scans audio for a wake phrase while no session is active
#[derive(Debug)]
pub struct WakeWordGate {
    phrases: Vec<String>,
    strategy: MatchStrategy,
    segmenter: SpeechSegmenter,
    sample_rate: u32,
    recent: VecDeque<String>,
    window_words: usize,
    scanning: bool,
}

impl WakeWordGate {
    /// Create a gate for the given phrases
    #[must_use]
    pub fn new(phrases: &[String], strategy: MatchStrategy, settings: SegmenterSettings, sample_rate: u32) -> Self {
        let phrases: Vec<String> = phrases
            .iter()
            .map(|p| matching::normalize(p))
            .filter(|p| !p.is_empty())
            .collect();

        let longest = phrases
            .iter()
            .map(|p| p.split(' ').count())
            .max()
            .unwrap_or(1);

        tracing::debug!(wake_phrases = ?phrases, ?strategy, "wake word gate initialized");

        Self {
            phrases,
            strategy,
            segmenter: SpeechSegmenter::new(settings),
            sample_rate,
            recent: VecDeque::new(),
            window_words: longest * 2,
            scanning: true,
        }
    }

    /// Feed a frame; returns a speech segment worth transcribing
    pub fn accept_frame(&mut self, frame: &AudioFrame) -> Option<AudioWindow> {
        if !self.scanning {
            return None;
        }

        self.segmenter
            .push(frame.samples())
            .map(|segment| AudioWindow::new(segment, self.sample_rate))
    }

    /// Check a transcript for a wake phrase
    ///
    /// On a match the gate stops scanning until [`resume`](Self::resume).
    /// Returns `None` while suspended, so a phrase spoken during an active
    /// session never starts a second one.
    pub fn accept_transcript(&mut self, transcript: &str) -> Option<WakeEvent> {
        if !self.scanning {
            tracing::debug!(transcript, "session active, ignoring wake candidate");
            return None;
        }

        let cased = matching::normalize_preserving_case(transcript);
        if cased.is_empty() {
            return None;
        }

        let mut words: Vec<String> = self.recent.iter().cloned().collect();
        words.extend(cased.split(' ').map(ToString::to_string));
        let joined = words.join(" ");
        let lower = joined.to_lowercase();

        for phrase in &self.phrases {
            let Some(found) = self.strategy.find(&lower, phrase) else {
                continue;
            };

            let after = matching::word_index_at(&lower, found.end);
            let remainder = (after < words.len()).then(|| words[after..].join(" "));

            tracing::info!(wake_phrase = %phrase, transcript, edits = found.edits, "wake phrase detected");

            let event = WakeEvent {
                phrase: phrase.clone(),
                detected_at: Utc::now(),
                remainder,
            };
            self.suspend();
            return Some(event);
        }

        // Keep the tail so a phrase split across segments still matches
        let keep = words.len().saturating_sub(self.window_words);
        self.recent = words.into_iter().skip(keep).collect();
        None
    }

    /// Stop scanning and drop any partial segment
    pub fn suspend(&mut self) {
        self.scanning = false;
        self.segmenter.reset();
        self.recent.clear();
    }

    /// Resume scanning with a clean slate
    pub fn resume(&mut self) {
        self.segmenter.reset();
        self.recent.clear();
        self.scanning = true;
    }

    /// Whether the gate is looking for a wake phrase
    #[must_use]
    pub const fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Normalized wake phrases
    #[must_use]
    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }
}
