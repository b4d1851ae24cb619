//! Pose frame sources for the worker.
//!
//! Every source runs on its own thread and forwards frames through a bounded
//! channel, so the frame loop can wait with a timeout and keep polling the
//! stop marker while the provider is quiet.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use super::keypoint::Pose;
use crate::log;
use crate::logging::Logger;
use crate::protocol::{self, ProviderMessage, WorkerMessage};
use crate::session::ExerciseKind;

const CHANNEL_DEPTH: usize = 64;
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// 姿勢推定側から届く1フレーム。`pose: None` は未検出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PoseFrame {
    /// ストリーム内の時刻（ミリ秒）。あればセッション時計に使う
    #[serde(default)]
    pub timestamp_ms: Option<u64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub pose: Option<Pose>,
}

impl PoseFrame {
    pub fn frame_size(&self) -> Option<(u32, u32)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        }
    }
}

/// Where the worker reads frames from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Stdin,
    File(PathBuf),
    Tcp(String),
}

impl SourceSpec {
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        if spec == "-" {
            Self::Stdin
        } else if let Some(addr) = spec.strip_prefix("tcp://") {
            Self::Tcp(addr.to_string())
        } else {
            Self::File(PathBuf::from(spec))
        }
    }
}

impl std::fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdin => write!(f, "stdin"),
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp://{}", addr),
        }
    }
}

pub type FrameReceiver = mpsc::Receiver<Result<PoseFrame>>;

/// Start the source thread. The receiver disconnects when the stream ends.
pub fn open(spec: &SourceSpec, exercise: ExerciseKind, logger: Logger) -> Result<FrameReceiver> {
    match spec {
        SourceSpec::Stdin => Ok(spawn_line_reader(BufReader::new(std::io::stdin()))),
        SourceSpec::File(path) => {
            let file = File::open(path)
                .with_context(|| format!("failed to open pose recording {}", path.display()))?;
            Ok(spawn_line_reader(BufReader::new(file)))
        }
        SourceSpec::Tcp(addr) => spawn_tcp_client(addr.clone(), exercise, logger),
    }
}

/// JSON lines: 1行1フレーム。空行と `#` で始まる行は無視
pub fn parse_line(line: &str) -> Result<Option<PoseFrame>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let frame = serde_json::from_str(line).context("malformed pose frame")?;
    Ok(Some(frame))
}

pub fn spawn_line_reader<R>(reader: R) -> FrameReceiver
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(CHANNEL_DEPTH);
    std::thread::spawn(move || {
        for line in reader.lines() {
            let item = match line {
                Ok(line) => match parse_line(&line) {
                    Ok(Some(frame)) => Ok(frame),
                    Ok(None) => continue,
                    Err(e) => Err(e),
                },
                Err(e) => {
                    let _ = tx.send(Err(e.into()));
                    break;
                }
            };
            if tx.send(item).is_err() {
                break;
            }
        }
    });
    rx
}

fn spawn_tcp_client(addr: String, exercise: ExerciseKind, logger: Logger) -> Result<FrameReceiver> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let (tx, rx) = mpsc::sync_channel(CHANNEL_DEPTH);
    std::thread::spawn(move || {
        runtime.block_on(async move {
            loop {
                log!(logger, "[tcp] connecting to {}...", addr);
                match tokio::net::TcpStream::connect(&addr).await {
                    Ok(tcp) => {
                        let _ = tcp.set_nodelay(true);
                        log!(logger, "[tcp] connected");
                        match receive_frames(tcp, exercise, &tx).await {
                            Ok(()) => {
                                log!(logger, "[tcp] end of pose stream");
                                return;
                            }
                            Err(e) => log!(logger, "[tcp] session error: {e:#}"),
                        }
                    }
                    Err(e) => log!(logger, "[tcp] connection failed: {e}"),
                }
                // ワーカー側がもう受け取らない（終了済み）なら再接続しない
                if tx.send(Err(anyhow::anyhow!("pose provider unavailable"))).is_err() {
                    return;
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        });
    });
    Ok(rx)
}

async fn receive_frames(
    tcp: tokio::net::TcpStream,
    exercise: ExerciseKind,
    tx: &mpsc::SyncSender<Result<PoseFrame>>,
) -> Result<()> {
    let mut stream = protocol::message_stream(tcp);
    protocol::send_message(&mut stream, &WorkerMessage::Subscribe { exercise }).await?;

    match protocol::recv_message::<ProviderMessage>(&mut stream).await? {
        ProviderMessage::Ready => {}
        other => bail!("expected Ready, got {other:?}"),
    }

    loop {
        match protocol::recv_message::<ProviderMessage>(&mut stream).await? {
            ProviderMessage::Frame(frame) => {
                if tx.send(Ok(frame)).is_err() {
                    return Ok(());
                }
            }
            ProviderMessage::EndOfStream => return Ok(()),
            ProviderMessage::Ready => {}
        }
    }
}

/// フレーム時刻 → Instant
///
/// タイムスタンプ付きフレームは最初のフレームからの相対時刻で進む（録画の再生が
/// 実時間に依存しない）。タイムスタンプが無ければ壁時計。
/// 再接続などでタイムスタンプが戻ったら、直前の時刻を起点に付け替える。
/// 返す時刻は減らない。
pub struct FrameClock {
    /// (起点のタイムスタンプ, その時刻)
    anchor: Option<(u64, Instant)>,
    previous_timestamp: Option<u64>,
    last: Instant,
}

impl FrameClock {
    pub fn new(origin: Instant) -> Self {
        Self {
            anchor: None,
            previous_timestamp: None,
            last: origin,
        }
    }

    pub fn instant_for(&mut self, frame: &PoseFrame) -> Instant {
        let at = match frame.timestamp_ms {
            Some(ts) => {
                let went_back = self.previous_timestamp.is_some_and(|prev| ts < prev);
                let (base_ts, base_at) = match self.anchor.filter(|_| !went_back) {
                    Some(anchor) => anchor,
                    None => *self.anchor.insert((ts, self.last)),
                };
                self.previous_timestamp = Some(ts);
                base_at + Duration::from_millis(ts.saturating_sub(base_ts))
            }
            None => Instant::now(),
        };
        self.last = self.last.max(at);
        self.last
    }
}
