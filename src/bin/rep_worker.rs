use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use fitness_tracker::audio::SpeechService;
use fitness_tracker::config::Config;
use fitness_tracker::log;
use fitness_tracker::logging::Logger;
use fitness_tracker::pose::{self, FrameClock, SourceSpec};
use fitness_tracker::session::{ExerciseKind, ExerciseSession};
use fitness_tracker::signal::{Marker, SignalChannel};

#[derive(Parser)]
#[command(version = env!("GIT_VERSION"), about = "Counts repetitions from a pose stream")]
struct Args {
    #[arg(long, value_enum)]
    exercise: ExerciseKind,
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
    /// "-" = stdin, JSON lines file, or tcp://host:port（設定より優先）
    #[arg(long)]
    source: Option<String>,
}

/// ループを抜けた理由
#[derive(Debug)]
enum ExitReason {
    StopSignal,
    Interrupted,
    EndOfStream,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load_or_default(&args.config);
    let kind = args.exercise;

    let logger = Logger::open_or_stderr(&config.paths.log_dir, &format!("{}_worker", kind));
    log!(logger, "Rep Worker ({}) - {}", env!("GIT_VERSION"), kind);

    let signals = SignalChannel::new(&config.paths.data_dir, logger.clone());
    let spec = SourceSpec::parse(args.source.as_deref().unwrap_or(&config.pose.source));
    log!(logger, "[pose] source: {}", spec);

    // SIGINT / SIGTERM → 保存して終了、SIGUSR1 → リセット
    let interrupted = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&interrupted))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&interrupted))?;
    let reset_requested = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGUSR1, Arc::clone(&reset_requested))?;

    let speech = SpeechService::from_config(&config.audio, logger.clone());
    let mut session = ExerciseSession::new(kind, &config, Instant::now());
    session.greet(&speech);

    // ソースを開けなくても 0 を書いてから終了する
    let frames = match pose::source::open(&spec, kind, logger.clone()) {
        Ok(frames) => frames,
        Err(e) => {
            signals.write_count(kind, session.count());
            return Err(e);
        }
    };

    let frame_timeout = Duration::from_millis(config.pose.frame_timeout_ms.max(1));
    let mut clock = FrameClock::new(Instant::now());
    let mut last_feedback: Option<String> = None;
    let mut last_quality = None;
    let mut last_phase = session.phase();
    let mut fps_frames = 0u32;
    let mut fps_timer = Instant::now();

    let reason = loop {
        if signals.is_raised(Marker::Stop) {
            break ExitReason::StopSignal;
        }
        if interrupted.load(Ordering::Relaxed) {
            break ExitReason::Interrupted;
        }
        if reset_requested.swap(false, Ordering::Relaxed) | signals.take(Marker::Reset) {
            session.reset(Instant::now(), &speech);
            signals.write_count(kind, 0);
            last_feedback = None;
            last_quality = None;
            log!(logger, "[session] reset");
        }

        let frame = match frames.recv_timeout(frame_timeout) {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                log!(logger, "[pose] {e:#}");
                continue;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break ExitReason::EndOfStream,
        };

        let now = clock.instant_for(&frame);
        let outcome = session.process(frame.pose.as_ref(), frame.frame_size(), now, &speech);

        if outcome.start_signal {
            signals.raise(Marker::Start);
            log!(logger, "[session] start signal raised");
        }
        if let Some(count) = outcome.counted {
            // 強制終了されても最新の回数が残るように
            signals.write_count(kind, count);
            log!(logger, "[session] {} #{}", kind, count);
        }
        if let Some(progress) = outcome.progress {
            if config.verbose {
                log!(logger, "[calibration] {}%", progress);
            }
        }
        if outcome.quality.is_some() && outcome.quality != last_quality {
            if let Some(quality) = outcome.quality {
                log!(logger, "[session] quality: {}", quality.label());
            }
            last_quality = outcome.quality;
        }
        if outcome.feedback.is_some() && outcome.feedback != last_feedback {
            if let Some(text) = &outcome.feedback {
                log!(logger, "[feedback] {}", text);
            }
            last_feedback = outcome.feedback;
        }
        if session.phase() != last_phase {
            last_phase = session.phase();
            log!(logger, "[session] phase: {}", last_phase);
        }

        fps_frames += 1;
        if fps_timer.elapsed() >= Duration::from_secs(1) {
            if config.verbose {
                let fps = fps_frames as f32 / fps_timer.elapsed().as_secs_f32();
                log!(
                    logger,
                    "[pose] {:.1} fps, stage={:?}, count={}",
                    fps,
                    session.stage(),
                    session.count()
                );
            }
            fps_frames = 0;
            fps_timer = Instant::now();
        }
    };

    // どの終了経路でも回数を保存する
    signals.write_count(kind, session.count());
    log!(
        logger,
        "[session] exit ({:?}) after {:.0}s, {} {} saved",
        reason,
        session.started_at().elapsed().as_secs_f32(),
        session.count(),
        kind.plural()
    );
    Ok(())
}
