//! Sample rate conversion
//!
//! Used when the microphone cannot open at the pipeline rate, and when a
//! synthesized clip does not match the output device.

use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

/// Input chunk size fed to the FFT resampler
const CHUNK_SIZE: usize = 1024;

/// Incremental resampler for a live mono stream
pub struct StreamResampler {
    inner: FftFixedIn<f32>,
    pending: Vec<f32>,
}

impl StreamResampler {
    /// Create a resampler from `from_rate` to `to_rate`
    ///
    /// # Errors
    ///
    /// Returns error if the rates are unsupported
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let inner = FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, 2, 1)
            .map_err(|e| Error::AudioDevice(format!("failed to create resampler: {e}")))?;

        Ok(Self {
            inner,
            pending: Vec::with_capacity(CHUNK_SIZE * 2),
        })
    }

    /// Feed samples, returning whatever output is ready
    pub fn push(&mut self, samples: &[f32]) -> Vec<f32> {
        self.pending.extend_from_slice(samples);
        let mut output = Vec::new();

        loop {
            let needed = self.inner.input_frames_next();
            if self.pending.len() < needed {
                break;
            }

            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            match self.inner.process(&[chunk], None) {
                Ok(mut out) => output.append(&mut out[0]),
                Err(e) => {
                    tracing::warn!(error = %e, "resampling failed, dropping chunk");
                }
            }
        }

        output
    }
}

/// Resample a complete mono clip
///
/// # Errors
///
/// Returns error if resampling fails
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, 2, 1)
        .map_err(|e| Error::Playback(format!("failed to create resampler: {e}")))?;

    let mut output = Vec::with_capacity(samples.len() * to_rate as usize / from_rate as usize + CHUNK_SIZE);
    let mut position = 0;

    while position < samples.len() {
        let needed = resampler.input_frames_next();
        let end = (position + needed).min(samples.len());
        let mut chunk = samples[position..end].to_vec();
        chunk.resize(needed, 0.0);

        let out = resampler
            .process(&[chunk], None)
            .map_err(|e| Error::Playback(format!("resampling failed: {e}")))?;
        output.extend_from_slice(&out[0]);
        position = end;
    }

    let expected = (samples.len() as f64 * f64::from(to_rate) / f64::from(from_rate)).ceil() as usize;
    output.truncate(expected);
    Ok(output)
}

/// Average interleaved channels down to mono
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }

    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_averages_channels() {
        let stereo = [0.2, 0.4, -0.5, 0.5];
        assert_eq!(downmix(&stereo, 2), vec![0.3, 0.0]);
        assert_eq!(downmix(&stereo, 1), stereo.to_vec());
    }

    #[test]
    fn test_resample_changes_length_by_ratio() {
        let input = vec![0.1f32; 48000];
        let output = resample(&input, 48000, 16000).unwrap();
        assert_eq!(output.len(), 16000);
    }

    #[test]
    fn test_resample_same_rate_is_identity() {
        let input = vec![0.25f32; 100];
        assert_eq!(resample(&input, 16000, 16000).unwrap(), input);
    }

    #[test]
    fn test_stream_resampler_emits_output() {
        let mut resampler = StreamResampler::new(48000, 16000).unwrap();
        let mut total = 0;
        for _ in 0..10 {
            total += resampler.push(&[0.0; 4800]).len();
        }
        // Allow for the chunk still buffered and FFT delay
        assert!(total > 12000 && total <= 16000, "got {total}");
    }
}
