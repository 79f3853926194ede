//! Voice processing module
//!
//! Handles audio capture, wake phrase spotting, command capture,
//! transcription, synthesis and playback.

mod capture;
mod frames;
mod playback;
mod resample;
mod segmenter;
mod speech;
mod stt;
mod tts;
mod utterance;
mod wake_word;

pub use capture::{AudioSource, SAMPLE_RATE, samples_to_wav, wav_to_samples};
pub use frames::{
    AudioFrame, AudioWindow, FrameAssembler, FrameReceiver, FrameSender, FrameSource, QueueStats, frame_channel,
};
pub use playback::{AudioPlayback, Clip, decode_mp3, decode_wav};
pub use resample::{StreamResampler, downmix, resample};
pub use segmenter::{SegmenterSettings, SegmenterState, SpeechSegmenter, calculate_energy};
pub use speech::{SpeechOutcome, SpeechResponder};
pub use stt::{SpeechToText, Transcriber, TranscriptionAdapter};
pub use tts::{ConsoleOutput, SpeakerOutput, Synthesizer, TextToSpeech, synthesizer_from_config};
pub use utterance::{CaptureOutcome, UtteranceCapture};
pub use wake_word::{WakeEvent, WakeWordGate};
