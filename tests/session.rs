//! Session machine integration tests
//!
//! Drives the full wake → capture → interpret → act → speak loop with scripted
//! audio and fake engines.

mod common;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::{Audio, FakeDocker, Harness, RecordingSynthesizer, ScriptedFrames, ScriptedTranscriber, test_config};
use opencode_voice::actions::FAREWELL;
use opencode_voice::commands::UNRECOGNIZED_RESPONSE;
use opencode_voice::session::NOT_UNDERSTOOD_RESPONSE;
use opencode_voice::voice::FrameSource;
use opencode_voice::{Error, ExitReason, SessionState, TranscriptionFailure};

fn script(parts: &[&[Audio]]) -> ScriptedFrames {
    ScriptedFrames::new(&parts.concat())
}

#[tokio::test]
async fn test_system_status_session() {
    let mut harness = Harness::new(&test_config(), &["hey opencode", "system status"], FakeDocker::with(&[]));
    let mut frames = script(&[&ScriptedFrames::wake(), &ScriptedFrames::command()]);

    let reason = tokio_test::assert_ok!(harness.machine.run(&mut frames, &CancellationToken::new()).await);

    assert_eq!(reason, ExitReason::StreamEnded);
    assert_eq!(harness.speaker.spoken(), vec!["CPU 12%, Memory 40%, Disk 55%."]);
    assert_eq!(harness.machine.context().state(), SessionState::ListeningForWake);
    assert_eq!(harness.machine.context().completed(), 1);
}

#[tokio::test]
async fn test_transitions_follow_the_session_order() {
    use SessionState::{CapturingCommand, Executing, Idle, ListeningForWake, Speaking};

    let mut harness = Harness::new(&test_config(), &["hey opencode", "what time is it"], FakeDocker::with(&[]));
    let mut frames = script(&[&ScriptedFrames::wake(), &ScriptedFrames::command()]);

    harness.machine.run(&mut frames, &CancellationToken::new()).await.unwrap();

    let history: Vec<_> = harness.machine.context().history().iter().copied().collect();
    assert_eq!(
        history,
        vec![
            (Idle, ListeningForWake),
            (ListeningForWake, CapturingCommand),
            (CapturingCommand, Executing),
            (Executing, Speaking),
            (Speaking, Idle),
            (Idle, ListeningForWake),
        ]
    );
    assert!(harness.speaker.spoken()[0].starts_with("The time is "));
}

#[tokio::test]
async fn test_missing_container_is_spoken_not_fatal() {
    let mut harness = Harness::new(
        &test_config(),
        &["hey opencode", "restart container web"],
        FakeDocker::with(&[("db", true)]),
    );
    let mut frames = script(&[&ScriptedFrames::wake(), &ScriptedFrames::command()]);

    let reason = harness.machine.run(&mut frames, &CancellationToken::new()).await.unwrap();

    assert_eq!(reason, ExitReason::StreamEnded);
    assert_eq!(harness.speaker.spoken(), vec!["container web not found"]);
    assert!(harness.docker.operations().is_empty());
}

#[tokio::test]
async fn test_silence_aborts_without_executing() {
    let mut harness = Harness::new(&test_config(), &["hey opencode"], FakeDocker::with(&[]));
    let mut frames = script(&[&ScriptedFrames::wake(), &[Audio::Silence(6000)]]);

    let reason = harness.machine.run(&mut frames, &CancellationToken::new()).await.unwrap();

    assert_eq!(reason, ExitReason::StreamEnded);
    assert!(harness.speaker.spoken().is_empty());
    assert_eq!(harness.probe.calls(), 0);
    assert_eq!(harness.transcriber.calls(), 1);
    assert_eq!(harness.machine.context().aborted(), 1);
    assert_eq!(harness.machine.context().completed(), 0);
    assert_eq!(
        harness.machine.context().history().back(),
        Some(&(SessionState::CapturingCommand, SessionState::ListeningForWake))
    );
}

#[tokio::test]
async fn test_silence_speaks_configured_prompt() {
    let mut config = test_config();
    config.capture.no_command_prompt = Some("I didn't catch that.".to_string());
    let mut harness = Harness::new(&config, &["hey opencode"], FakeDocker::with(&[]));
    let mut frames = script(&[&ScriptedFrames::wake(), &[Audio::Silence(6000)]]);

    harness.machine.run(&mut frames, &CancellationToken::new()).await.unwrap();

    assert_eq!(harness.speaker.spoken(), vec!["I didn't catch that."]);
    assert_eq!(harness.probe.calls(), 0);
}

#[tokio::test]
async fn test_shutdown_command_speaks_farewell_and_stops() {
    let mut harness = Harness::new(&test_config(), &["hey opencode", "shutdown"], FakeDocker::with(&[]));
    let mut frames = script(&[
        &ScriptedFrames::wake(),
        &ScriptedFrames::command(),
        &ScriptedFrames::wake(),
        &ScriptedFrames::command(),
    ]);

    let reason = harness.machine.run(&mut frames, &CancellationToken::new()).await.unwrap();

    assert_eq!(reason, ExitReason::ShutdownCommand);
    assert_eq!(harness.speaker.spoken(), vec![FAREWELL]);
    assert_eq!(harness.machine.context().state(), SessionState::Shutdown);
    // Nothing after the shutdown session is consumed
    assert_eq!(harness.transcriber.calls(), 2);
}

#[tokio::test]
async fn test_docker_unreachable_keeps_listening() {
    let mut harness = Harness::new(
        &test_config(),
        &["hey opencode", "list containers", "hey opencode", "system status"],
        FakeDocker::unreachable(),
    );
    let mut frames = script(&[
        &ScriptedFrames::wake(),
        &ScriptedFrames::command(),
        &ScriptedFrames::wake(),
        &ScriptedFrames::command(),
    ]);

    let reason = harness.machine.run(&mut frames, &CancellationToken::new()).await.unwrap();

    assert_eq!(reason, ExitReason::StreamEnded);
    assert_eq!(
        harness.speaker.spoken(),
        vec!["Docker is not available.", "CPU 12%, Memory 40%, Disk 55%."]
    );
    assert_eq!(harness.machine.context().completed(), 2);
}

#[tokio::test]
async fn test_stopping_a_stopped_container_twice() {
    let mut harness = Harness::new(
        &test_config(),
        &["hey opencode", "stop container db", "hey opencode", "stop container db"],
        FakeDocker::with(&[("db", true)]),
    );
    let mut frames = script(&[
        &ScriptedFrames::wake(),
        &ScriptedFrames::command(),
        &ScriptedFrames::wake(),
        &ScriptedFrames::command(),
    ]);

    harness.machine.run(&mut frames, &CancellationToken::new()).await.unwrap();

    assert_eq!(
        harness.speaker.spoken(),
        vec!["Container db stopped.", "Container db is already stopped."]
    );
    assert_eq!(harness.docker.operations(), vec!["stop db"]);
    assert_eq!(harness.docker.is_running("db"), Some(false));
}

#[tokio::test]
async fn test_command_in_the_wake_utterance() {
    let mut config = test_config();
    config.wake.acknowledgement = Some("Yes?".to_string());
    let mut harness = Harness::new(&config, &["Hey OpenCode, start container Web"], FakeDocker::with(&[("Web", false)]));
    let mut frames = script(&[&ScriptedFrames::wake()]);

    harness.machine.run(&mut frames, &CancellationToken::new()).await.unwrap();

    // No acknowledgement and no second transcription
    assert_eq!(harness.speaker.spoken(), vec!["Container Web started."]);
    assert_eq!(harness.transcriber.calls(), 1);
}

#[tokio::test]
async fn test_acknowledgement_precedes_capture() {
    let mut config = test_config();
    config.wake.acknowledgement = Some("Yes?".to_string());
    let mut harness = Harness::new(&config, &["hey opencode", "help"], FakeDocker::with(&[]));
    let mut frames = script(&[&ScriptedFrames::wake(), &ScriptedFrames::command()]);

    harness.machine.run(&mut frames, &CancellationToken::new()).await.unwrap();

    let spoken = harness.speaker.spoken();
    assert_eq!(spoken.len(), 2);
    assert_eq!(spoken[0], "Yes?");
    assert!(spoken[1].starts_with("I can check system status"));
}

#[tokio::test]
async fn test_transcription_failure_apologises() {
    let transcriber = ScriptedTranscriber::with_replies(vec![
        Ok("hey opencode".to_string()),
        Err(TranscriptionFailure::EngineUnavailable("connection refused".into())),
    ]);
    let mut harness = Harness::build(&test_config(), transcriber, RecordingSynthesizer::new(), FakeDocker::with(&[]));
    let mut frames = script(&[&ScriptedFrames::wake(), &ScriptedFrames::command()]);

    let reason = harness.machine.run(&mut frames, &CancellationToken::new()).await.unwrap();

    assert_eq!(reason, ExitReason::StreamEnded);
    assert_eq!(harness.speaker.spoken(), vec![NOT_UNDERSTOOD_RESPONSE]);
    assert_eq!(harness.probe.calls(), 0);
}

#[tokio::test]
async fn test_wake_phrase_during_session_is_not_a_new_session() {
    let mut harness = Harness::new(&test_config(), &["hey opencode", "hey opencode"], FakeDocker::with(&[]));
    let mut frames = script(&[&ScriptedFrames::wake(), &ScriptedFrames::command()]);

    harness.machine.run(&mut frames, &CancellationToken::new()).await.unwrap();

    assert_eq!(harness.speaker.spoken(), vec![UNRECOGNIZED_RESPONSE]);
    assert_eq!(harness.machine.context().completed(), 1);
    assert_eq!(harness.machine.context().active(), None);
}

#[tokio::test]
async fn test_non_wake_speech_is_ignored() {
    let mut harness = Harness::new(
        &test_config(),
        &["good morning", "hey opencode", "what date is it"],
        FakeDocker::with(&[]),
    );
    let mut frames = script(&[
        &ScriptedFrames::wake(),
        &ScriptedFrames::wake(),
        &ScriptedFrames::command(),
    ]);

    harness.machine.run(&mut frames, &CancellationToken::new()).await.unwrap();

    let spoken = harness.speaker.spoken();
    assert_eq!(spoken.len(), 1);
    assert!(spoken[0].starts_with("Today is "));
}

#[tokio::test]
async fn test_speech_failure_falls_back_once() {
    let config = test_config();
    let speaker = RecordingSynthesizer::failing_except(&config.tts.fallback_phrase);
    let mut harness = Harness::build(
        &config,
        ScriptedTranscriber::new(&["hey opencode", "system status"]),
        speaker,
        FakeDocker::with(&[]),
    );
    let mut frames = script(&[&ScriptedFrames::wake(), &ScriptedFrames::command()]);

    let reason = harness.machine.run(&mut frames, &CancellationToken::new()).await.unwrap();

    assert_eq!(reason, ExitReason::StreamEnded);
    assert_eq!(harness.speaker.spoken(), vec![config.tts.fallback_phrase.clone()]);
    assert_eq!(harness.machine.context().completed(), 1);
}

#[tokio::test]
async fn test_audio_failure_is_fatal() {
    let mut harness = Harness::new(&test_config(), &[], FakeDocker::with(&[]));

    let err = tokio_test::assert_err!(
        harness
            .machine
            .run(&mut common::BrokenFrames, &CancellationToken::new())
            .await
    );

    assert!(matches!(err, Error::AudioDevice(_)));
    assert!(err.is_fatal());
    assert_eq!(err.exit_code(), 3);
}

/// Never yields a frame, like a quiet room with a stalled device
struct Stalled;

#[async_trait::async_trait]
impl FrameSource for Stalled {
    async fn next_frame(&mut self) -> opencode_voice::Result<Option<opencode_voice::voice::AudioFrame>> {
        std::future::pending().await
    }

    fn discard_pending(&mut self) -> usize {
        0
    }
}

#[tokio::test]
async fn test_cancellation_unblocks_frame_wait() {
    let mut harness = Harness::new(&test_config(), &[], FakeDocker::with(&[]));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let reason = tokio::time::timeout(Duration::from_secs(5), harness.machine.run(&mut Stalled, &cancel))
        .await
        .expect("run did not observe cancellation")
        .unwrap();

    assert_eq!(reason, ExitReason::Cancelled);
    assert_eq!(harness.machine.context().state(), SessionState::Shutdown);
}
