//! Audio frames and the bounded capture queue
//!
//! The capture thread pushes fixed-size frames; the session loop pulls them in
//! capture order. When the queue is full the oldest frame is dropped so the
//! device callback never blocks. Every dropped or discarded frame is counted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::{Error, Result};

/// A fixed-duration chunk of mono PCM samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
    sequence: u64,
    offset: Duration,
}

impl AudioFrame {
    /// Create a mono frame
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32, sequence: u64, offset: Duration) -> Self {
        Self {
            samples,
            sample_rate,
            channels: 1,
            sequence,
            offset,
        }
    }

    /// PCM samples in `[-1.0, 1.0]`
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channel count (frames are always downmixed to mono)
    #[must_use]
    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Position in capture order
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Time since the stream started
    #[must_use]
    pub const fn offset(&self) -> Duration {
        self.offset
    }

    /// Number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the frame holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Frame duration
    #[must_use]
    pub fn duration(&self) -> Duration {
        samples_duration(self.samples.len(), self.sample_rate)
    }
}

/// A contiguous span of audio handed to the transcriber
#[derive(Debug, Clone, PartialEq)]
pub struct AudioWindow {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioWindow {
    /// Wrap captured samples
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// PCM samples
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Window duration
    #[must_use]
    pub fn duration(&self) -> Duration {
        samples_duration(self.samples.len(), self.sample_rate)
    }

    /// Whether the window holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Encode as 16-bit WAV for STT APIs
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        super::samples_to_wav(&self.samples, self.sample_rate)
    }
}

#[allow(clippy::cast_precision_loss)]
fn samples_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(samples as f64 / f64::from(sample_rate))
}

/// Cuts an arbitrary sample stream into fixed-size frames
#[derive(Debug)]
pub struct FrameAssembler {
    frame_samples: usize,
    sample_rate: u32,
    pending: Vec<f32>,
    sequence: u64,
    emitted_samples: u64,
}

impl FrameAssembler {
    /// Create an assembler producing frames of `frame_samples`
    #[must_use]
    pub fn new(frame_samples: usize, sample_rate: u32) -> Self {
        Self {
            frame_samples: frame_samples.max(1),
            sample_rate,
            pending: Vec::with_capacity(frame_samples * 2),
            sequence: 0,
            emitted_samples: 0,
        }
    }

    /// Append samples, emitting every completed frame
    pub fn push(&mut self, samples: &[f32], mut emit: impl FnMut(AudioFrame)) {
        self.pending.extend_from_slice(samples);

        while self.pending.len() >= self.frame_samples {
            let chunk: Vec<f32> = self.pending.drain(..self.frame_samples).collect();
            #[allow(clippy::cast_possible_truncation)]
            let offset = samples_duration(self.emitted_samples as usize, self.sample_rate);
            emit(AudioFrame::new(chunk, self.sample_rate, self.sequence, offset));
            self.sequence += 1;
            self.emitted_samples += self.frame_samples as u64;
        }
    }
}

/// Anything that yields frames in capture order
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, waiting until one is available
    ///
    /// Returns `None` once the source has been closed for shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AudioDevice`] when the device failed
    async fn next_frame(&mut self) -> Result<Option<AudioFrame>>;

    /// Drop frames captured but not yet consumed, returning how many
    fn discard_pending(&mut self) -> usize;
}

/// Counters for frames that never reached the session loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Frames accepted from the device
    pub captured: u64,
    /// Oldest frames evicted because the queue was full
    pub dropped: u64,
    /// Frames discarded on purpose (e.g. our own speech)
    pub discarded: u64,
}

#[derive(Debug)]
enum Closed {
    Finished,
    Failed(String),
}

#[derive(Debug, Default)]
struct QueueState {
    frames: VecDeque<AudioFrame>,
    closed: Option<Closed>,
    overflowing: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    captured: AtomicU64,
    dropped: AtomicU64,
    discarded: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Create a bounded frame queue
#[must_use]
pub fn frame_channel(capacity: usize) -> (FrameSender, FrameReceiver) {
    let shared = Arc::new(Shared {
        state: Mutex::new(QueueState::default()),
        notify: Notify::new(),
        capacity: capacity.max(1),
        captured: AtomicU64::new(0),
        dropped: AtomicU64::new(0),
        discarded: AtomicU64::new(0),
    });

    (
        FrameSender {
            shared: Arc::clone(&shared),
        },
        FrameReceiver { shared },
    )
}

/// Producer half, owned by the capture stage
#[derive(Debug, Clone)]
pub struct FrameSender {
    shared: Arc<Shared>,
}

impl FrameSender {
    /// Enqueue a frame, evicting the oldest one when full
    ///
    /// Never blocks on the consumer.
    pub fn push(&self, frame: AudioFrame) {
        let mut state = self.shared.lock();
        if state.closed.is_some() {
            return;
        }

        self.shared.captured.fetch_add(1, Ordering::Relaxed);

        if state.frames.len() >= self.shared.capacity {
            state.frames.pop_front();
            let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if !state.overflowing {
                state.overflowing = true;
                tracing::warn!(
                    capacity = self.shared.capacity,
                    dropped_total = dropped,
                    "frame queue full, dropping oldest audio"
                );
            }
        } else if state.overflowing && state.frames.len() < self.shared.capacity / 2 {
            state.overflowing = false;
        }

        state.frames.push_back(frame);
        drop(state);
        self.shared.notify.notify_one();
    }

    /// Close the queue after a fatal device error
    pub fn fail(&self, reason: impl Into<String>) {
        let mut state = self.shared.lock();
        if state.closed.is_none() {
            state.closed = Some(Closed::Failed(reason.into()));
        }
        drop(state);
        self.shared.notify.notify_one();
    }

    /// Close the queue for shutdown
    pub fn finish(&self) {
        let mut state = self.shared.lock();
        if state.closed.is_none() {
            state.closed = Some(Closed::Finished);
        }
        drop(state);
        self.shared.notify.notify_one();
    }
}

/// Consumer half, owned by the session loop
#[derive(Debug)]
pub struct FrameReceiver {
    shared: Arc<Shared>,
}

impl FrameReceiver {
    /// Current counters
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            captured: self.shared.captured.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            discarded: self.shared.discarded.load(Ordering::Relaxed),
        }
    }

    /// Frames waiting to be consumed
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.lock().frames.len()
    }
}

#[async_trait]
impl FrameSource for FrameReceiver {
    async fn next_frame(&mut self) -> Result<Option<AudioFrame>> {
        loop {
            {
                let mut state = self.shared.lock();
                if let Some(frame) = state.frames.pop_front() {
                    return Ok(Some(frame));
                }
                match &state.closed {
                    Some(Closed::Finished) => return Ok(None),
                    Some(Closed::Failed(reason)) => return Err(Error::AudioDevice(reason.clone())),
                    None => {}
                }
            }
            self.shared.notify.notified().await;
        }
    }

    fn discard_pending(&mut self) -> usize {
        let count = {
            let mut state = self.shared.lock();
            let count = state.frames.len();
            state.frames.clear();
            count
        };
        self.shared.discarded.fetch_add(count as u64, Ordering::Relaxed);
        if count > 0 {
            tracing::debug!(frames = count, "discarded pending audio");
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(seq: u64) -> AudioFrame {
        AudioFrame::new(vec![0.0; 160], 16000, seq, Duration::from_millis(seq * 10))
    }

    #[test]
    fn test_assembler_emits_fixed_frames() {
        let mut assembler = FrameAssembler::new(4, 16000);
        let mut frames = Vec::new();

        assembler.push(&[0.1; 6], |f| frames.push(f));
        assert_eq!(frames.len(), 1);

        assembler.push(&[0.2; 6], |f| frames.push(f));
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.len() == 4));
        assert_eq!(frames.iter().map(AudioFrame::sequence).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(frames[2].offset(), Duration::from_micros(500));
    }

    #[tokio::test]
    async fn test_queue_preserves_capture_order() {
        let (tx, mut rx) = frame_channel(8);
        for seq in 0..5 {
            tx.push(frame(seq));
        }
        for seq in 0..5 {
            assert_eq!(rx.next_frame().await.unwrap().unwrap().sequence(), seq);
        }
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest_and_counts() {
        let (tx, mut rx) = frame_channel(3);
        for seq in 0..5 {
            tx.push(frame(seq));
        }

        let stats = rx.stats();
        assert_eq!(stats.captured, 5);
        assert_eq!(stats.dropped, 2);
        assert_eq!(rx.next_frame().await.unwrap().unwrap().sequence(), 2);
    }

    #[tokio::test]
    async fn test_finish_drains_then_ends() {
        let (tx, mut rx) = frame_channel(4);
        tx.push(frame(0));
        tx.finish();
        tx.push(frame(1));

        assert!(rx.next_frame().await.unwrap().is_some());
        assert!(rx.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_device_failure_surfaces_as_audio_error() {
        let (tx, mut rx) = frame_channel(4);
        tx.fail("device unplugged");
        assert!(matches!(rx.next_frame().await, Err(Error::AudioDevice(_))));
    }

    #[tokio::test]
    async fn test_consumer_wakes_on_push() {
        let (tx, mut rx) = frame_channel(4);
        let producer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.push(frame(7));
        });

        let got = rx.next_frame().await.unwrap().unwrap();
        assert_eq!(got.sequence(), 7);
        producer.await.unwrap();
    }

    #[test]
    fn test_discard_is_counted() {
        let (tx, mut rx) = frame_channel(4);
        tx.push(frame(0));
        tx.push(frame(1));

        assert_eq!(rx.discard_pending(), 2);
        assert_eq!(rx.pending(), 0);
        assert_eq!(rx.stats().discarded, 2);
    }
}
