use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use opencode_voice::actions::DiagnosticsReport;
use opencode_voice::commands::{ArgumentRule, Interpretation};
use opencode_voice::docker::DockerCli;
use opencode_voice::system::LinuxProbe;
use opencode_voice::voice::{
    AudioPlayback, AudioSource, Clip, SpeakerOutput, Synthesizer, TextToSpeech, calculate_energy,
};
use opencode_voice::{Config, Daemon, Error, ExitReason};

/// OpenCode - wake-word driven voice assistant for system and Docker control
#[derive(Parser)]
#[command(name = "opencode", version, about)]
struct Cli {
    /// Configuration file (defaults to <config dir>/opencode/config.toml)
    #[arg(short, long, env = "OPENCODE_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Listen for the wake phrase and run commands (default)
    Run,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Print a diagnostics report
    Diagnostics,
    /// List the command registry
    Commands,
    /// Show what an utterance would do, without running it
    Interpret {
        /// Utterance text
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Needed before logging so the file appender knows where to write
    let loaded = Config::resolve(cli.config.as_deref());
    let log_dir = loaded.as_ref().ok().and_then(|c| c.log_dir.clone());
    let _guard = init_logging(cli.verbose, log_dir.as_deref());

    match run(cli, loaded).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            let code = e.downcast_ref::<Error>().map_or(1, Error::exit_code);
            ExitCode::from(code)
        }
    }
}

/// Console logging, plus a daily file when a log directory is configured
fn init_logging(verbose: u8, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,opencode_voice=info,opencode=info")),
        1 => EnvFilter::new("info,opencode_voice=debug,opencode=debug"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    match log_dir {
        Some(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "opencode.log"));
            registry
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}

async fn run(cli: Cli, loaded: opencode_voice::Result<Config>) -> anyhow::Result<()> {
    let config = loaded?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_daemon(config).await,
        Command::TestMic { duration } => test_mic(&config, duration).await,
        Command::TestSpeaker => test_speaker().await,
        Command::TestTts { text } => test_tts(&config, &text).await,
        Command::Diagnostics => diagnostics(&config).await,
        Command::Commands => {
            list_commands(&config);
            Ok(())
        }
        Command::Interpret { text } => {
            interpret(&config, &text);
            Ok(())
        }
    }
}

async fn run_daemon(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    tracing::info!(
        name = %config.name,
        wake_phrases = ?config.wake.phrases,
        stt = %config.stt.provider,
        tts = %config.tts.provider,
        "starting voice assistant"
    );
    tracing::debug!(audio = ?config.audio, capture = ?config.capture, features = ?config.features, "loaded configuration");

    let cancel = CancellationToken::new();
    opencode_voice::daemon::spawn_signal_listener(cancel.clone());

    let reason = Daemon::new(config).run(cancel).await?;
    tracing::info!(?reason, "exiting");

    if reason == ExitReason::StreamEnded {
        tracing::warn!("audio stream closed unexpectedly");
    }

    Ok(())
}

/// Test microphone input
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let audio = config.audio.clone();
    let (mut source, mut frames) = tokio::task::spawn_blocking(move || AudioSource::open(&audio)).await??;

    println!("Device: {}", source.device_name());
    println!("Sample rate: {} Hz", config.audio.sample_rate);
    println!("---");

    let cancel = CancellationToken::new();
    let timer = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(duration)).await;
        timer.cancel();
    });

    let frames_per_second = (1000 / config.audio.frame_ms.max(1)).max(1);
    let mut second = 0_u32;
    let mut sum_energy = 0.0_f32;
    let mut peak = 0.0_f32;
    let mut count = 0_u32;

    opencode_voice::daemon::drain_frames(&mut frames, &cancel, |frame| {
        sum_energy += calculate_energy(frame.samples());
        peak = frame.samples().iter().map(|s| s.abs()).fold(peak, f32::max);
        count += 1;

        if count == frames_per_second {
            second += 1;
            #[allow(clippy::cast_precision_loss)]
            let energy = sum_energy / count as f32;

            // Visual meter
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let meter_len = (energy * 100.0).min(50.0) as usize;
            let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);
            println!("[{second:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]");

            sum_energy = 0.0;
            peak = 0.0;
            count = 0;
        }
    })
    .await?;

    source.close();
    let stats = frames.stats();

    println!("\n---");
    println!("Frames captured: {}, dropped: {}", stats.captured, stats.dropped);
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");
    println!("  4. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    // 2 seconds of 440Hz sine wave at 24kHz
    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);

    let clip = Clip { samples, sample_rate };
    tokio::task::spawn_blocking(move || {
        let playback = AudioPlayback::new()?;
        println!("Output device: {}", playback.device_name());
        playback.play_blocking(&clip, &AtomicBool::new(false))
    })
    .await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Test TTS output with the configured engine
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS ({}) with text: \"{text}\"\n", config.tts.provider);

    let engine = TextToSpeech::from_config(&config.tts)?;

    println!("Synthesizing speech...");
    let output: Arc<dyn Synthesizer> = Arc::new(SpeakerOutput::new(engine));
    output.speak(text, &CancellationToken::new()).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

/// Print a diagnostics report and save it when a report directory is set
async fn diagnostics(config: &Config) -> anyhow::Result<()> {
    let probe = LinuxProbe::new(config.actions.cpu_sample);
    let docker = DockerCli::new(config.actions.docker_binary.clone(), config.actions.container_timeout);

    let report = DiagnosticsReport::collect(&probe, &docker, &config.actions).await;
    println!("{}", report.text);

    if let Some(dir) = &config.actions.report_dir {
        let path = report.save(dir).await?;
        println!("Report saved to {}", path.display());
    }

    Ok(())
}

/// List the command registry in match order
fn list_commands(config: &Config) {
    let registry = Daemon::new(config.clone()).registry();

    for definition in registry.definitions() {
        let argument = match &definition.argument {
            ArgumentRule::None => "",
            ArgumentRule::ContainerName { .. } => " <container>",
        };
        println!("{:<18} {}{argument}", definition.kind.name(), definition.triggers.join(" | "));
    }
}

/// Dry-run the interpreter
fn interpret(config: &Config, text: &str) {
    let registry = Daemon::new(config.clone()).registry();

    match registry.interpret(text) {
        Interpretation::Matched(command) => {
            println!("command:  {}", command.kind);
            println!("trigger:  {}", command.trigger);
            if let Some(argument) = command.argument {
                println!("argument: {argument}");
            }
        }
        Interpretation::Unrecognized { hint, partial } => {
            if let Some(kind) = partial {
                println!("command:  {kind} (missing argument)");
            }
            println!("response: {hint}");
        }
    }
}
