//! Audio playback to speakers

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::resample::resample;
use crate::{Error, Result};

/// Preferred playback rate (matches common TTS output)
const PREFERRED_SAMPLE_RATE: u32 = 24000;

/// Decoded mono audio ready for playback
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    /// Mono samples in `[-1.0, 1.0]`
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl Clip {
    /// Clip duration
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate.max(1)))
    }
}

/// Plays audio to the default output device
pub struct AudioPlayback {
    device: cpal::Device,
    config: StreamConfig,
}

impl AudioPlayback {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Playback("no output device available".to_string()))?;

        let preferred = |channels: u16| {
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == channels
                    && c.min_sample_rate() <= SampleRate(PREFERRED_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PREFERRED_SAMPLE_RATE)
            })
        };

        let config = match preferred(1).or_else(|| preferred(2)) {
            Some(supported) => supported.with_sample_rate(SampleRate(PREFERRED_SAMPLE_RATE)).config(),
            None => device
                .default_output_config()
                .map_err(|e| Error::Playback(format!("no suitable output config found: {e}")))?
                .config(),
        };

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { device, config })
    }

    /// Output device name
    #[must_use]
    pub fn device_name(&self) -> String {
        self.device.name().unwrap_or_else(|_| "unknown".to_string())
    }

    /// Play a clip, blocking until it finishes or `stop` is set
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    pub fn play_blocking(&self, clip: &Clip, stop: &AtomicBool) -> Result<()> {
        if clip.samples.is_empty() {
            return Ok(());
        }

        let device_rate = self.config.sample_rate.0;
        let samples = Arc::new(resample(&clip.samples, clip.sample_rate, device_rate)?);
        let channels = usize::from(self.config.channels);

        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let stream = {
            let samples = Arc::clone(&samples);
            let position = Arc::clone(&position);
            let finished = Arc::clone(&finished);

            self.device
                .build_output_stream(
                    &self.config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut pos = position.load(Ordering::Relaxed);
                        for frame in data.chunks_mut(channels) {
                            let sample = samples.get(pos).copied().unwrap_or_else(|| {
                                finished.store(true, Ordering::Relaxed);
                                0.0
                            });
                            frame.fill(sample);
                            pos = (pos + 1).min(samples.len());
                        }
                        position.store(pos, Ordering::Relaxed);
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(|e| Error::Playback(e.to_string()))?
        };

        stream.play().map_err(|e| Error::Playback(e.to_string()))?;

        let expected = Duration::from_millis((samples.len() as u64 * 1000) / u64::from(device_rate.max(1)));
        let deadline = Instant::now() + expected + Duration::from_millis(500);

        while !finished.load(Ordering::Relaxed) && !stop.load(Ordering::Relaxed) {
            if Instant::now() > deadline {
                tracing::warn!("playback did not finish in time");
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }

        // Let the device drain its last buffer
        if !stop.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(100));
        }

        drop(stream);
        tracing::debug!(samples = samples.len(), "playback complete");

        Ok(())
    }
}

/// Decode MP3 bytes to a mono clip
///
/// # Errors
///
/// Returns error if the data cannot be decoded
pub fn decode_mp3(mp3_data: &[u8]) -> Result<Clip> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = PREFERRED_SAMPLE_RATE;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(sample_rate);
                let channels = frame.channels.max(1);
                #[allow(clippy::cast_precision_loss)]
                samples.extend(frame.data.chunks(channels).map(|chunk| {
                    chunk.iter().map(|&s| f32::from(s) / 32768.0).sum::<f32>() / chunk.len() as f32
                }));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Playback(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(Clip {
        samples,
        sample_rate,
    })
}

/// Decode WAV bytes to a mono clip
///
/// # Errors
///
/// Returns error if the data is not a WAV stream
pub fn decode_wav(wav: &[u8]) -> Result<Clip> {
    let (samples, sample_rate) = super::capture::wav_to_samples(wav)?;
    Ok(Clip {
        samples,
        sample_rate,
    })
}
