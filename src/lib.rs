//! OpenCode Voice - wake-word driven voice assistant for system and Docker control
//!
//! This library provides the voice command pipeline:
//! - Continuous microphone capture into a bounded frame queue
//! - Wake phrase spotting, command capture and transcription
//! - Fixed-phrase command interpretation and action executors
//! - Spoken responses with a single fallback attempt
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │   Microphone thread  →  bounded frame queue          │
//! └────────────────────┬─────────────────────────────────┘
//!                      │
//! ┌────────────────────▼─────────────────────────────────┐
//! │                 Session machine                       │
//! │   Wake gate  │  STT  │  Interpreter  │  TTS          │
//! └────────────────────┬─────────────────────────────────┘
//!                      │
//! ┌────────────────────▼─────────────────────────────────┐
//! │                 Action executors                      │
//! │   System probes  │  Docker CLI  │  Browser  │  ...   │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod actions;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod docker;
pub mod error;
pub mod matching;
pub mod session;
pub mod system;
pub mod voice;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result, TranscriptionFailure};
pub use session::{ExitReason, SessionMachine, SessionState};
