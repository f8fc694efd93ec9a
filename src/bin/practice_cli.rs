use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use practice_detector::analysis::features::FftProcessor;
use practice_detector::analysis::{AnalysisContext, Analyzer};
use practice_detector::audio::metronome::{MetronomeHandle, MetronomeScheduler};
use practice_detector::audio::tone::RecordingToneSink;
use practice_detector::clock::{Clock, ManualClock};
use practice_detector::fixtures::{frames_from_samples, load_wav, parse_script};
use practice_detector::session::capture::ScriptedCapture;
use practice_detector::session::sink::MemoryChunkSink;
use practice_detector::{init_logging, AppConfig, RecordingSession, SessionPhase};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(
    name = "practice_cli",
    about = "Practice detection harness: scripted sessions, WAV classification, live recording"
)]
struct Cli {
    /// JSON configuration file (missing fields use defaults)
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a deterministic session over a fixture script such as
    /// `ambient:2000,piano:5000,ambient:3000`
    Simulate {
        #[arg(long)]
        script: String,
        /// Play a metronome alongside the script at this tempo
        #[arg(long)]
        metronome_bpm: Option<u32>,
        /// Print every session snapshot, not only the summary
        #[arg(long)]
        verbose: bool,
    },
    /// Classify a WAV file frame by frame
    Classify {
        #[arg(long)]
        wav: PathBuf,
        #[arg(long, default_value_t = 100)]
        hop_ms: u64,
    },
    /// Record from the default microphone into a WAV file
    Record {
        #[arg(long, default_value = "practice.wav")]
        output: PathBuf,
        /// Stop automatically after this many seconds (ctrl-c stops earlier)
        #[arg(long)]
        seconds: Option<u64>,
        #[arg(long)]
        metronome_bpm: Option<u32>,
        #[arg(long)]
        piece: Option<String>,
    },
}

#[derive(Serialize)]
struct FrameLine {
    timestamp_ms: u64,
    label: String,
    confidence: f32,
    decibel: f32,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    init_logging();
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path),
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Simulate {
            script,
            metronome_bpm,
            verbose,
        } => run_simulate(&config, &script, metronome_bpm, verbose),
        Commands::Classify { wav, hop_ms } => run_classify(&config, wav, hop_ms),
        Commands::Record {
            output,
            seconds,
            metronome_bpm,
            piece,
        } => record::run(&config, output, seconds, metronome_bpm, piece),
    }
}

/// Poll cadence of the simulated metronome, in simulated milliseconds
const SIMULATED_POLL_MS: u64 = 25;

fn run_simulate(
    config: &AppConfig,
    script: &str,
    metronome_bpm: Option<u32>,
    verbose: bool,
) -> Result<ExitCode> {
    let segments = parse_script(script)?;
    let duration_ms: u64 = segments.iter().map(|s| s.duration_ms).sum();
    let clock = ManualClock::new(0);
    let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());

    let capture = ScriptedCapture::new(segments, Arc::clone(&shared_clock));
    let mut session = RecordingSession::new(config, Box::new(capture), Box::new(MemoryChunkSink::new()));

    let tone_sink = RecordingToneSink::new();
    let metronome = match metronome_bpm {
        Some(bpm) => {
            let mut metronome_config = config.metronome.clone();
            metronome_config.bpm = bpm;
            let handle = MetronomeHandle::new(MetronomeScheduler::new(
                &metronome_config,
                Box::new(tone_sink.clone()),
                Arc::clone(&shared_clock),
            ));
            session = session.with_metronome(handle.clone());
            handle.start()?;
            Some(handle)
        }
        None => None,
    };

    session.start(clock.now_ms())?;
    let tick_ms = config.session.analysis_interval_ms.max(1);
    let mut next_tick = tick_ms;
    while clock.now_ms() < duration_ms {
        let now = clock.advance(SIMULATED_POLL_MS.min(next_tick - clock.now_ms()));
        tone_sink.set_time(now as f64 / 1000.0);
        if let Some(handle) = &metronome {
            handle.poll()?;
        }
        if now >= next_tick {
            next_tick += tick_ms;
            let state = session.tick(now)?;
            if verbose {
                println!("{}", serde_json::to_string(&state)?);
            }
            if state.phase == SessionPhase::Stopped {
                break;
            }
        }
    }

    let summary = match session.summary() {
        Some(summary) => summary.clone(),
        None => session.stop(clock.now_ms())?,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    if let Some(handle) = &metronome {
        println!("metronome tones scheduled: {}", tone_sink.tones().len());
        handle.dispose()?;
    }
    Ok(ExitCode::SUCCESS)
}

fn run_classify(config: &AppConfig, wav: PathBuf, hop_ms: u64) -> Result<ExitCode> {
    let (samples, sample_rate) =
        load_wav(&wav).with_context(|| format!("loading {}", wav.display()))?;
    let fft = FftProcessor::new(config.capture.fft_size, &config.features);
    let analyzer = Analyzer::new(&config.features, &config.classifier);
    let ctx = AnalysisContext::without_metronome(None);

    let frames = frames_from_samples(&samples, sample_rate, &fft, hop_ms, 0);
    if frames.is_empty() {
        eprintln!(
            "{} is shorter than one {}-sample analysis window",
            wav.display(),
            fft.fft_size()
        );
        return Ok(ExitCode::from(2));
    }
    for frame in &frames {
        let result = analyzer.analyze(frame, &ctx);
        let line = FrameLine {
            timestamp_ms: result.timestamp_ms,
            label: result.label.to_string(),
            confidence: result.confidence,
            decibel: result.features.decibel,
        };
        println!("{}", serde_json::to_string(&line)?);
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(not(target_os = "android"))]
mod record {
    use std::path::PathBuf;
    use std::process::ExitCode;
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::{Context, Result};
    use practice_detector::audio::metronome::{MetronomeHandle, MetronomeScheduler};
    use practice_detector::audio::{CpalCapture, CpalToneSink};
    use practice_detector::clock::{Clock, SystemClock};
    use practice_detector::managers::BroadcastChannelManager;
    use practice_detector::session::runner::{MetronomeDrive, SessionRunner};
    use practice_detector::session::sink::WavChunkSink;
    use practice_detector::{AppConfig, RecordingSession};

    pub fn run(
        config: &AppConfig,
        output: PathBuf,
        seconds: Option<u64>,
        metronome_bpm: Option<u32>,
        piece: Option<String>,
    ) -> Result<ExitCode> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("building tokio runtime")?;
        runtime.block_on(record(config, output, seconds, metronome_bpm, piece))
    }

    async fn record(
        config: &AppConfig,
        output: PathBuf,
        seconds: Option<u64>,
        metronome_bpm: Option<u32>,
        piece: Option<String>,
    ) -> Result<ExitCode> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let channels = BroadcastChannelManager::new();

        let capture = CpalCapture::new(Arc::clone(&clock), &config.features);
        let mut session = RecordingSession::new(config, Box::new(capture), Box::new(WavChunkSink::new(&output)))
            .with_classification_sender(channels.init_classification());
        if let Some(piece) = piece {
            session = session.with_piece_id(piece);
        }

        let drive = match metronome_bpm {
            Some(bpm) => {
                let mut metronome_config = config.metronome.clone();
                metronome_config.bpm = bpm;
                let sink = CpalToneSink::open()?;
                let scheduler = MetronomeScheduler::new(&metronome_config, Box::new(sink), Arc::clone(&clock))
                    .with_notifications(channels.init_beat_events(), channels.init_metronome_state());
                let handle = MetronomeHandle::new(scheduler);
                session = session.with_metronome(handle.clone());
                Some(MetronomeDrive {
                    handle,
                    poll_interval: Duration::from_millis(metronome_config.poll_interval_ms),
                })
            }
            None => None,
        };

        let state_tx = channels.init_session_state();
        let mut states = state_tx.subscribe();
        let mut runner = SessionRunner::start(
            session,
            Arc::clone(&clock),
            Duration::from_millis(config.session.analysis_interval_ms),
            drive,
            Some(state_tx),
        )?;
        println!("Recording to {} (ctrl-c to stop)", output.display());

        let deadline = async {
            match seconds {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                _ = tokio::signal::ctrl_c() => break,
                state = states.recv() => match state {
                    Ok(state) => {
                        eprint!(
                            "\r{:>6} total {:>6} practice {:>5.1} dB {:<16}",
                            state.total_ms,
                            state.practice_ms,
                            state.current_decibel,
                            state.last_label.map(|l| l.to_string()).unwrap_or_default()
                        );
                        if state.phase == practice_detector::SessionPhase::Stopped {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        eprintln!();

        let summary = runner.stop()?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        Ok(ExitCode::SUCCESS)
    }
}

#[cfg(target_os = "android")]
mod record {
    use std::path::PathBuf;
    use std::process::ExitCode;

    use anyhow::{bail, Result};
    use practice_detector::AppConfig;

    pub fn run(
        _config: &AppConfig,
        _output: PathBuf,
        _seconds: Option<u64>,
        _metronome_bpm: Option<u32>,
        _piece: Option<String>,
    ) -> Result<ExitCode> {
        bail!("live recording needs the desktop audio backend")
    }
}
