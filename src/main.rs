use anyhow::Result;
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use fitness_tracker::audio::{BackgroundMusic, SpeechService};
use fitness_tracker::config::Config;
use fitness_tracker::coordinator::{ControllerEvent, Coordinator, Notice, UserCommand};
use fitness_tracker::log;
use fitness_tracker::logging::Logger;
use fitness_tracker::signal::SignalChannel;
use fitness_tracker::supervisor::ProcessLauncher;
use fitness_tracker::timer::format_clock;

/// 終了時に最後の読み上げを待つ上限
const SUMMARY_WAIT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(version = env!("GIT_VERSION"), about = "Exercise session controller")]
struct Args {
    /// 設定ファイル
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
    /// セッション時間（秒、0 = 無制限）。設定ファイルより優先
    #[arg(long)]
    duration: Option<u32>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::load_or_default(&args.config);
    if let Some(duration) = args.duration {
        config.coordinator.duration_secs = duration;
    }

    let logger = Logger::open_or_stderr(&config.paths.log_dir, "controller");
    log!(logger, "Fitness Tracker ({})", env!("GIT_VERSION"));
    log!(
        logger,
        "[config] duration={}s, verbose={}",
        config.coordinator.duration_secs,
        config.verbose
    );

    let signals = SignalChannel::new(&config.paths.data_dir, logger.clone());
    log!(logger, "[signal] data dir: {}", signals.dir().display());
    let launcher = ProcessLauncher::new(
        config.paths.worker_bin.clone(),
        args.config.clone(),
        logger.clone(),
    )?;
    log!(logger, "[worker] executable: {}", launcher.worker_bin().display());

    let speech = SpeechService::from_config(&config.audio, logger.clone());
    let music = BackgroundMusic::from_config(&config.audio, logger.clone());

    let (tx, rx) = mpsc::channel();
    let mut coordinator = Coordinator::new(
        launcher,
        signals,
        speech,
        music,
        tx.clone(),
        &config.coordinator,
        logger.clone(),
    );

    // Ctrl-C / SIGTERM → quit
    let interrupted = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&interrupted))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&interrupted))?;

    print_help();

    // Console input thread: one command per line
    {
        let tx = tx.clone();
        std::thread::spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match UserCommand::parse(&line) {
                    Some(command) => {
                        if tx.send(ControllerEvent::Command(command)).is_err() {
                            break;
                        }
                    }
                    None => eprintln!("[input] unknown command: {}", line.trim()),
                }
            }
            // 入力が閉じたら終了
            let _ = tx.send(ControllerEvent::Command(UserCommand::Quit));
        });
    }
    drop(tx);

    let poll_interval = coordinator.poll_interval();
    while !coordinator.should_quit() {
        if interrupted.swap(false, Ordering::Relaxed) {
            log!(logger, "[input] interrupted");
            let quit = ControllerEvent::Command(UserCommand::Quit);
            let notices = coordinator.handle(quit, Instant::now());
            show(&logger, &notices);
            break;
        }

        match rx.recv_timeout(poll_interval) {
            Ok(event) => {
                let notices = coordinator.handle(event, Instant::now());
                show(&logger, &notices);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
        let notices = coordinator.poll(Instant::now());
        show(&logger, &notices);
    }

    // 終了前に結果の読み上げを最後まで待つ
    let deadline = Instant::now() + SUMMARY_WAIT;
    while coordinator.awaiting_summary() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(event @ ControllerEvent::AnnouncementDone) => {
                let notices = coordinator.handle(event, Instant::now());
                show(&logger, &notices);
            }
            Ok(_) => {}
            Err(_) => {
                log!(logger, "[audio] summary still speaking, exiting anyway");
                break;
            }
        }
    }

    log!(logger, "bye");
    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("  squat | pushup   start a session");
    println!("  reset            restart calibration / countdown");
    println!("  stop             end the session and show the count");
    println!("  time <secs>      session length for the next session (0 = unbounded)");
    println!("  status           show the current state");
    println!("  quit             stop everything and exit");
    println!();
}

fn show(logger: &Logger, notices: &[Notice]) {
    for notice in notices {
        match notice {
            Notice::Clock(clock) => {
                print!("\r[timer] {}   ", clock);
                let _ = io::stdout().flush();
            }
            Notice::Launched { kind, session } => {
                log!(
                    logger,
                    "[session {}] {} started, waiting for the start signal",
                    session,
                    kind
                );
            }
            Notice::LaunchFailed(reason) => log!(logger, "[worker] could not start: {}", reason),
            Notice::Rejected { running } => {
                log!(logger, "[worker] a {} session is already running; stop it first", running)
            }
            Notice::TimingStarted { kind, duration_secs } => {
                if *duration_secs == 0 {
                    log!(logger, "[timer] {} started, counting up", kind);
                } else {
                    log!(logger, "[timer] {} started, {}", kind, format_clock(*duration_secs));
                }
            }
            Notice::ResetSent => log!(logger, "[worker] reset sent"),
            Notice::NoSession => log!(logger, "no session running"),
            Notice::DurationSet(0) => log!(logger, "[timer] next session: unbounded"),
            Notice::DurationSet(secs) => {
                log!(logger, "[timer] next session: {}", format_clock(*secs))
            }
            Notice::Status(text) => println!("{}", text),
            Notice::Finished(report) => {
                println!();
                log!(logger, "=== {} ===", report);
            }
            Notice::SummarySpoken => {
                print!("> ");
                let _ = io::stdout().flush();
            }
            Notice::Quit => log!(logger, "quitting"),
        }
    }
}
