use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub pushup: PushupConfig,
    #[serde(default)]
    pub squat: SquatConfig,
    #[serde(default)]
    pub pose: PoseConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    /// フレームレート等の詳細ログを出す
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// シグナルファイルとカウントファイルの共有ディレクトリ
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// ログ出力先
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// ワーカー実行ファイル（未指定ならコントローラと同じディレクトリの rep_worker）
    #[serde(default)]
    pub worker_bin: Option<PathBuf>,
}

fn default_data_dir() -> PathBuf { PathBuf::from("data") }
fn default_log_dir() -> PathBuf { PathBuf::from("logs") }

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_dir: default_log_dir(),
            worker_bin: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CoordinatorConfig {
    /// 開始シグナルのポーリング間隔（ミリ秒）
    #[serde(default = "default_start_poll_ms")]
    pub start_poll_ms: u64,
    /// ワーカー生存確認の間隔（ミリ秒）
    #[serde(default = "default_liveness_poll_ms")]
    pub liveness_poll_ms: u64,
    /// 停止シグナル後に正常終了を待つ時間（ミリ秒）
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    /// 強制終了後に待つ時間（ミリ秒）
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
    /// セッション時間（秒）。0 はカウントアップ（無制限）
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u32,
}

fn default_start_poll_ms() -> u64 { 100 }
fn default_liveness_poll_ms() -> u64 { 200 }
fn default_stop_grace_ms() -> u64 { 3000 }
fn default_kill_grace_ms() -> u64 { 1000 }
fn default_duration_secs() -> u32 { 60 }

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            start_poll_ms: default_start_poll_ms(),
            liveness_poll_ms: default_liveness_poll_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            kill_grace_ms: default_kill_grace_ms(),
            duration_secs: default_duration_secs(),
        }
    }
}

impl CoordinatorConfig {
    pub fn start_poll(&self) -> Duration { Duration::from_millis(self.start_poll_ms) }
    pub fn liveness_poll(&self) -> Duration { Duration::from_millis(self.liveness_poll_ms) }
    pub fn stop_grace(&self) -> Duration { Duration::from_millis(self.stop_grace_ms) }
    pub fn kill_grace(&self) -> Duration { Duration::from_millis(self.kill_grace_ms) }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PushupConfig {
    /// キャリブレーションの静止保持時間（秒）
    #[serde(default = "default_hold_secs")]
    pub hold_secs: f32,
    /// 安定判定バッファのサンプル数
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// 安定とみなす最大-最小の幅（度）
    #[serde(default = "default_stability_threshold")]
    pub stability_threshold: f32,
    /// これ以下の角度ではキャリブレーションを始めない（度）
    #[serde(default = "default_min_calibration_angle")]
    pub min_calibration_angle: f32,
    /// 基準角 - up_margin より大きければ Up
    #[serde(default = "default_up_margin")]
    pub up_margin: f32,
    /// 基準角 - down_margin より小さければ Down
    #[serde(default = "default_down_margin")]
    pub down_margin: f32,
    /// 記録用の下限角オフセット
    #[serde(default = "default_down_offset")]
    pub down_offset: f32,
    #[serde(default = "default_min_depth_for_detection")]
    pub min_depth_for_detection: f32,
    #[serde(default = "default_min_depth_for_count")]
    pub min_depth_for_count: f32,
    /// キャリブレーション後のずれ警告（度）
    #[serde(default = "default_drift_tolerance")]
    pub drift_tolerance: f32,
}

fn default_hold_secs() -> f32 { 3.0 }
fn default_buffer_size() -> usize { 15 }
fn default_stability_threshold() -> f32 { 5.0 }
fn default_min_calibration_angle() -> f32 { 140.0 }
fn default_up_margin() -> f32 { 15.0 }
fn default_down_margin() -> f32 { 30.0 }
fn default_down_offset() -> f32 { 55.0 }
fn default_min_depth_for_detection() -> f32 { 20.0 }
fn default_min_depth_for_count() -> f32 { 40.0 }
fn default_drift_tolerance() -> f32 { 30.0 }

impl Default for PushupConfig {
    fn default() -> Self {
        Self {
            hold_secs: default_hold_secs(),
            buffer_size: default_buffer_size(),
            stability_threshold: default_stability_threshold(),
            min_calibration_angle: default_min_calibration_angle(),
            up_margin: default_up_margin(),
            down_margin: default_down_margin(),
            down_offset: default_down_offset(),
            min_depth_for_detection: default_min_depth_for_detection(),
            min_depth_for_count: default_min_depth_for_count(),
            drift_tolerance: default_drift_tolerance(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SquatConfig {
    #[serde(default = "default_squat_up_angle")]
    pub up_angle: f32,
    #[serde(default = "default_squat_down_angle")]
    pub down_angle: f32,
    /// 「まっすぐ立って」を抜ける膝角度
    #[serde(default = "default_standing_angle")]
    pub standing_angle: f32,
    #[serde(default = "default_ready_secs")]
    pub ready_secs: f32,
    #[serde(default = "default_countdown_from")]
    pub countdown_from: u32,
    #[serde(default = "default_start_secs")]
    pub start_secs: f32,
}

fn default_squat_up_angle() -> f32 { 160.0 }
fn default_squat_down_angle() -> f32 { 90.0 }
fn default_standing_angle() -> f32 { 160.0 }
fn default_ready_secs() -> f32 { 1.0 }
fn default_countdown_from() -> u32 { 3 }
fn default_start_secs() -> f32 { 1.0 }

impl Default for SquatConfig {
    fn default() -> Self {
        Self {
            up_angle: default_squat_up_angle(),
            down_angle: default_squat_down_angle(),
            standing_angle: default_standing_angle(),
            ready_secs: default_ready_secs(),
            countdown_from: default_countdown_from(),
            start_secs: default_start_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PoseConfig {
    /// "-" = stdin, ファイルパス, または "tcp://host:port"
    #[serde(default = "default_pose_source")]
    pub source: String,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    /// 1フレーム待ちの上限（ミリ秒）。超えたらシグナル確認に戻る
    #[serde(default = "default_frame_timeout_ms")]
    pub frame_timeout_ms: u64,
}

fn default_pose_source() -> String { "tcp://127.0.0.1:9100".to_string() }
fn default_confidence_threshold() -> f32 { 0.3 }
fn default_frame_timeout_ms() -> u64 { 100 }

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            source: default_pose_source(),
            confidence_threshold: default_confidence_threshold(),
            frame_timeout_ms: default_frame_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AudioConfig {
    /// 読み上げコマンド（末尾にテキストを追加して実行）。空ならログのみ
    #[serde(default)]
    pub speech_command: Vec<String>,
    /// BGM再生コマンド（末尾にファイルパスを追加）。空ならBGMなし
    #[serde(default)]
    pub music_command: Vec<String>,
    #[serde(default)]
    pub squat_music: Option<PathBuf>,
    #[serde(default)]
    pub pushup_music: Option<PathBuf>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// 読めなければデフォルト設定で続行する
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("[config] {e:#}; using defaults");
                Self::default()
            }
        }
    }
}
