//! Pose Replay: serves a recorded pose stream to rep workers over TCP.
//!
//! Reads a JSON-lines recording (one `PoseFrame` per line) and plays it to
//! every worker that connects, paced by the recorded timestamps or `--fps`.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fitness_tracker::log;
use fitness_tracker::logging::Logger;
use fitness_tracker::pose::source::parse_line;
use fitness_tracker::pose::PoseFrame;
use fitness_tracker::protocol::{self, MessageStream, ProviderMessage, WorkerMessage};

const DEFAULT_FPS: f32 = 30.0;
/// Gaps in a recording longer than this are clamped.
const MAX_FRAME_GAP: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(version = env!("GIT_VERSION"), about = "Serve a recorded pose stream")]
struct Args {
    /// JSON lines recording
    input: PathBuf,
    #[arg(long, default_value = "127.0.0.1:9100")]
    listen: String,
    /// Fixed frame rate (ignores recorded timestamps)
    #[arg(long)]
    fps: Option<f32>,
    /// Repeat the recording until the worker disconnects
    #[arg(long = "loop")]
    repeat: bool,
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let logger = Logger::open_or_stderr(&args.log_dir, "pose_replay");
    log!(logger, "Pose Replay ({})", env!("GIT_VERSION"));

    let frames = load_recording(&args.input)?;
    log!(logger, "[replay] {} frames from {}", frames.len(), args.input.display());
    let delays = Arc::new(frame_delays(&frames, args.fps));
    let frames = Arc::new(frames);

    let bind_addr: std::net::SocketAddr = args.listen.parse().context("invalid --listen address")?;
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    log!(logger, "Listening on {}", bind_addr);

    loop {
        let (tcp, peer) = listener.accept().await?;
        tcp.set_nodelay(true)?;
        log!(logger, "[tcp] worker connected: {}", peer);
        let frames = Arc::clone(&frames);
        let delays = Arc::clone(&delays);
        let logger = logger.clone();
        let repeat = args.repeat;
        tokio::spawn(async move {
            let stream = protocol::message_stream(tcp);
            match serve(stream, &frames, &delays, repeat, &logger).await {
                Ok(sent) => log!(logger, "[tcp] {}: sent {} frames", peer, sent),
                Err(e) => log!(logger, "[tcp] {}: session error: {e:#}", peer),
            }
        });
    }
}

fn load_recording(path: &PathBuf) -> Result<Vec<PoseFrame>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut frames = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let frame = parse_line(line).with_context(|| format!("{}:{}", path.display(), i + 1))?;
        frames.extend(frame);
    }
    if frames.is_empty() {
        bail!("{} contains no frames", path.display());
    }
    Ok(frames)
}

/// Delay before each frame.
fn frame_delays(frames: &[PoseFrame], fps: Option<f32>) -> Vec<Duration> {
    let fixed = Duration::from_secs_f64(1.0 / fps.unwrap_or(DEFAULT_FPS).max(1.0) as f64);
    if fps.is_some() {
        return vec![fixed; frames.len()];
    }
    let mut previous: Option<u64> = None;
    frames
        .iter()
        .map(|frame| match (previous, frame.timestamp_ms) {
            (Some(prev), Some(ts)) => {
                previous = Some(ts);
                Duration::from_millis(ts.saturating_sub(prev)).min(MAX_FRAME_GAP)
            }
            (None, Some(ts)) => {
                previous = Some(ts);
                Duration::ZERO
            }
            (_, None) => fixed,
        })
        .collect()
}

/// Length of one pass in timestamp milliseconds, including one frame gap.
fn recording_span(frames: &[PoseFrame]) -> u64 {
    let mut stamps = frames.iter().filter_map(|f| f.timestamp_ms);
    let Some(first) = stamps.next() else {
        return 0;
    };
    let last = stamps.last().unwrap_or(first);
    last.saturating_sub(first) + (1000.0 / DEFAULT_FPS) as u64
}

async fn serve(
    mut stream: MessageStream,
    frames: &[PoseFrame],
    delays: &[Duration],
    repeat: bool,
    logger: &Logger,
) -> Result<usize> {
    match protocol::recv_message::<WorkerMessage>(&mut stream).await? {
        WorkerMessage::Subscribe { exercise } => {
            log!(logger, "[replay] subscribe: {}", exercise);
        }
    }
    protocol::send_message(&mut stream, &ProviderMessage::Ready).await?;

    // 繰り返し再生でもタイムスタンプが戻らないようにずらす
    let span = recording_span(frames);
    let mut offset = 0;
    let mut sent = 0;
    loop {
        for (frame, delay) in frames.iter().zip(delays) {
            tokio::time::sleep(*delay).await;
            let mut frame = frame.clone();
            frame.timestamp_ms = frame.timestamp_ms.map(|ts| ts + offset);
            protocol::send_message(&mut stream, &ProviderMessage::Frame(frame)).await?;
            sent += 1;
        }
        if !repeat {
            break;
        }
        offset += span;
    }
    protocol::send_message(&mut stream, &ProviderMessage::EndOfStream).await?;
    Ok(sent)
}
