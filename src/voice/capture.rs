//! Microphone capture
//!
//! The cpal stream is `!Send`, so it lives on a dedicated thread for the whole
//! session. The device callback downmixes, resamples when the device cannot
//! open at the pipeline rate, cuts frames and pushes them into the bounded
//! queue without ever blocking.

use std::sync::mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig};

use super::frames::{AudioFrame, FrameAssembler, FrameReceiver, FrameSender, frame_channel};
use super::resample::{StreamResampler, downmix};
use crate::config::AudioConfig;
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Live microphone stream feeding a [`FrameReceiver`]
pub struct AudioSource {
    device_name: String,
    sender: FrameSender,
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl AudioSource {
    /// Open the default input device and start streaming frames
    ///
    /// # Errors
    ///
    /// Returns [`Error::AudioDevice`] if no input device can be opened
    pub fn open(config: &AudioConfig) -> Result<(Self, FrameReceiver)> {
        let (sender, receiver) = frame_channel(config.queue_capacity);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<String>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let sample_rate = config.sample_rate;
        let frame_samples = config.frame_samples();
        let thread_sender = sender.clone();

        let thread = std::thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || match start_stream(sample_rate, frame_samples, thread_sender) {
                Ok((stream, name)) => {
                    let _ = ready_tx.send(Ok(name));
                    // Blocks until close() or the source is dropped
                    let _ = stop_rx.recv();
                    drop(stream);
                    tracing::debug!("audio capture stopped");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| Error::AudioDevice(format!("failed to spawn capture thread: {e}")))?;

        let device_name = ready_rx
            .recv()
            .map_err(|_| Error::AudioDevice("capture thread exited during startup".to_string()))??;

        tracing::info!(device = %device_name, sample_rate, frame_samples, "audio capture started");

        Ok((
            Self {
                device_name,
                sender,
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            },
            receiver,
        ))
    }

    /// Input device name
    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Stop the stream and end the frame queue
    pub fn close(&mut self) {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::warn!("audio capture thread panicked");
        }
        self.sender.finish();
    }
}

impl Drop for AudioSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Build and start the input stream, returning it with the device name
fn start_stream(sample_rate: u32, frame_samples: usize, sender: FrameSender) -> Result<(Stream, String)> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::AudioDevice("no input device available".to_string()))?;
    let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

    let native = device
        .supported_input_configs()
        .map_err(|e| Error::AudioDevice(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.sample_format() == SampleFormat::F32
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        });

    let (config, format, resampler) = if let Some(supported) = native {
        (supported.with_sample_rate(SampleRate(sample_rate)).config(), SampleFormat::F32, None)
    } else {
        // Fall back to whatever the device prefers and convert in the callback
        let fallback = device
            .default_input_config()
            .map_err(|e| Error::AudioDevice(format!("no suitable audio config found: {e}")))?;
        let format = fallback.sample_format();
        let config = fallback.config();
        let resampler = (config.sample_rate.0 != sample_rate)
            .then(|| StreamResampler::new(config.sample_rate.0, sample_rate))
            .transpose()?;
        tracing::debug!(
            device_rate = config.sample_rate.0,
            channels = config.channels,
            ?format,
            "input device lacks a native 16 kHz mono mode, converting"
        );
        (config, format, resampler)
    };

    let converter = InputConverter {
        channels: usize::from(config.channels),
        resampler,
        assembler: FrameAssembler::new(frame_samples, sample_rate),
    };

    let stream = match format {
        SampleFormat::F32 => build_input::<f32>(&device, &config, converter, sender),
        SampleFormat::F64 => build_input::<f64>(&device, &config, converter, sender),
        SampleFormat::I8 => build_input::<i8>(&device, &config, converter, sender),
        SampleFormat::I16 => build_input::<i16>(&device, &config, converter, sender),
        SampleFormat::I32 => build_input::<i32>(&device, &config, converter, sender),
        SampleFormat::U8 => build_input::<u8>(&device, &config, converter, sender),
        SampleFormat::U16 => build_input::<u16>(&device, &config, converter, sender),
        SampleFormat::U32 => build_input::<u32>(&device, &config, converter, sender),
        other => Err(Error::AudioDevice(format!("unsupported input sample format: {other}"))),
    }?;

    stream.play().map_err(|e| Error::AudioDevice(e.to_string()))?;

    tracing::debug!(
        device = %device_name,
        sample_rate,
        channels = config.channels,
        ?format,
        "audio capture initialized"
    );

    Ok((stream, device_name))
}

/// Callback-side pipeline: device samples in, pipeline frames out
struct InputConverter {
    channels: usize,
    resampler: Option<StreamResampler>,
    assembler: FrameAssembler,
}

impl InputConverter {
    fn push<T>(&mut self, data: &[T], emit: impl FnMut(AudioFrame))
    where
        T: Sample,
        f32: FromSample<T>,
    {
        let floats = to_f32(data);
        let mono = downmix(&floats, self.channels);
        let samples = match self.resampler.as_mut() {
            Some(r) => r.push(&mono),
            None => mono,
        };
        self.assembler.push(&samples, emit);
    }
}

/// Scale device samples of any format into `[-1.0, 1.0]`
fn to_f32<T>(data: &[T]) -> Vec<f32>
where
    T: Sample,
    f32: FromSample<T>,
{
    data.iter().map(|s| s.to_sample::<f32>()).collect()
}

fn build_input<T>(device: &Device, config: &StreamConfig, mut converter: InputConverter, sender: FrameSender) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let data_sender = sender.clone();

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                converter.push(data, |frame| data_sender.push(frame));
            },
            move |err| {
                tracing::error!(error = %err, "audio capture error");
                sender.fail(err.to_string());
            },
            None,
        )
        .map_err(|e| Error::AudioDevice(e.to_string()))
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let encode_err = |e: hound::Error| Error::Transcription(crate::TranscriptionFailure::EngineUnavailable(format!(
        "wav encoding failed: {e}"
    )));

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(encode_err)?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(sample_i16).map_err(encode_err)?;
        }

        writer.finalize().map_err(encode_err)?;
    }

    Ok(cursor.into_inner())
}

/// Decode WAV bytes to mono f32 samples and their sample rate
///
/// # Errors
///
/// Returns error if the data is not a readable WAV stream
#[allow(clippy::cast_precision_loss)]
pub fn wav_to_samples(wav: &[u8]) -> Result<(Vec<f32>, u32)> {
    let reader = hound::WavReader::new(std::io::Cursor::new(wav))
        .map_err(|e| Error::Playback(format!("invalid wav data: {e}")))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Playback(e.to_string()))?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Playback(e.to_string()))?
        }
    };

    Ok((downmix(&interleaved, usize::from(spec.channels)), spec.sample_rate))
}
