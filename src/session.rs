use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

use crate::audio::Announcer;
use crate::calibration::{CalibrationEngine, CalibrationState};
use crate::config::Config;
use crate::counter::{PushupDetector, RepQuality, SquatCounter};
use crate::gate::CountdownGate;
use crate::pose::{arm_angles, knee_angle, Pose};

/// 種目
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ExerciseKind {
    Squat,
    Pushup,
}

impl ExerciseKind {
    pub const ALL: [ExerciseKind; 2] = [ExerciseKind::Squat, ExerciseKind::Pushup];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Squat => "squat",
            Self::Pushup => "pushup",
        }
    }

    /// 結果表示用の複数形
    pub fn plural(&self) -> &'static str {
        match self {
            Self::Squat => "squats",
            Self::Pushup => "pushups",
        }
    }

    pub fn count_file_name(&self) -> String {
        format!("{}_count.txt", self.name())
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "squat" | "squats" => Some(Self::Squat),
            "pushup" | "pushups" | "push-up" => Some(Self::Pushup),
            _ => None,
        }
    }
}

impl fmt::Display for ExerciseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stage {
    #[default]
    Unknown,
    Up,
    Down,
}

/// 1フレーム処理した結果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameOutcome {
    /// 開始シグナルを出す（キャリブレーション完了 / ゲート通過）
    pub start_signal: bool,
    /// 増えたときの新しい回数
    pub counted: Option<u32>,
    pub feedback: Option<String>,
    /// キャリブレーション中の進捗（%）
    pub progress: Option<u8>,
    /// 確定したレップの評価
    pub quality: Option<RepQuality>,
}

struct PushupSession {
    calibration: CalibrationEngine,
    detector: Option<PushupDetector>,
}

struct SquatSession {
    gate: CountdownGate,
    counter: SquatCounter,
}

enum Variant {
    Pushup(PushupSession),
    Squat(SquatSession),
}

/// ワーカーが持つ1セッション分の状態
///
/// 角度の計算、キャリブレーション / ゲート、レップ判定をまとめる。
/// 読み上げは注入された `Announcer` に流すだけで、完了は待たない。
pub struct ExerciseSession {
    kind: ExerciseKind,
    config: Config,
    variant: Variant,
    started_at: Instant,
}

impl ExerciseSession {
    pub fn new(kind: ExerciseKind, config: &Config, now: Instant) -> Self {
        Self {
            kind,
            config: config.clone(),
            variant: Self::fresh_variant(kind, config),
            started_at: now,
        }
    }

    fn fresh_variant(kind: ExerciseKind, config: &Config) -> Variant {
        match kind {
            ExerciseKind::Pushup => Variant::Pushup(PushupSession {
                calibration: CalibrationEngine::new(config.pushup.clone()),
                detector: None,
            }),
            ExerciseKind::Squat => Variant::Squat(SquatSession {
                gate: CountdownGate::new(&config.squat),
                counter: SquatCounter::new(&config.squat),
            }),
        }
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn count(&self) -> u32 {
        match &self.variant {
            Variant::Pushup(p) => p.detector.as_ref().map_or(0, |d| d.count()),
            Variant::Squat(s) => s.counter.count(),
        }
    }

    pub fn stage(&self) -> Stage {
        match &self.variant {
            Variant::Pushup(p) => p.detector.as_ref().map_or(Stage::Unknown, |d| d.stage()),
            Variant::Squat(s) => s.counter.stage(),
        }
    }

    /// 人に見せる段階名（ログ用）
    pub fn phase(&self) -> &'static str {
        match &self.variant {
            Variant::Pushup(p) => match p.calibration.state() {
                CalibrationState::Waiting => "waiting",
                CalibrationState::Calibrating { .. } => "calibrating",
                CalibrationState::Done(_) => "counting",
            },
            Variant::Squat(s) => s.gate.state().name(),
        }
    }

    /// 開始時の案内
    pub fn greet(&self, announcer: &dyn Announcer) {
        if self.kind == ExerciseKind::Pushup {
            announcer.announce("Get ready to calibrate. Straighten your arms and hold still");
        }
        // スクワットはゲートの最初のフレームで案内する
    }

    /// 回数と段階を0に戻して最初の段階からやり直す
    pub fn reset(&mut self, now: Instant, announcer: &dyn Announcer) {
        self.variant = Self::fresh_variant(self.kind, &self.config);
        self.started_at = now;
        if self.kind == ExerciseKind::Pushup {
            announcer.announce("Recalibrating. Straighten your arms and hold still");
        }
    }

    /// 1フレーム分を処理する。検出なしのフレームは状態を変えない
    pub fn process(
        &mut self,
        pose: Option<&Pose>,
        frame_size: Option<(u32, u32)>,
        now: Instant,
        announcer: &dyn Announcer,
    ) -> FrameOutcome {
        let Some(pose) = pose else {
            return FrameOutcome::default();
        };
        let threshold = self.config.pose.confidence_threshold;
        match &mut self.variant {
            Variant::Pushup(p) => match arm_angles(pose, threshold) {
                Some(arms) => process_pushup(p, arms.average, now, &self.config, announcer),
                None => FrameOutcome::default(),
            },
            Variant::Squat(s) => match knee_angle(pose, threshold, frame_size) {
                Some(angle) => process_squat(s, angle, now, announcer),
                None => FrameOutcome::default(),
            },
        }
    }
}

fn process_pushup(
    session: &mut PushupSession,
    angle: f32,
    now: Instant,
    config: &Config,
    announcer: &dyn Announcer,
) -> FrameOutcome {
    let mut outcome = FrameOutcome::default();
    let calibration = session.calibration.update(angle, now);
    outcome.feedback = calibration.feedback;
    outcome.progress = calibration.progress;

    if calibration.completed {
        outcome.start_signal = true;
        announcer.announce("Calibration complete");
        if let Some(record) = session.calibration.record() {
            session.detector = Some(PushupDetector::new(record, &config.pushup));
        }
    }

    // 完了したフレームから判定を始める
    let Some(detector) = session.detector.as_mut() else {
        return outcome;
    };
    let update = detector.update(angle);
    if let Some(rep) = update.rep {
        outcome.quality = Some(rep.quality);
        match rep.quality {
            RepQuality::GoodForm => {
                if let Some(n) = rep.counted {
                    outcome.counted = Some(n);
                    announcer.announce(&n.to_string());
                    announcer.chime();
                }
            }
            RepQuality::Shallow => {
                announcer.announce("Go a bit lower");
            }
            RepQuality::Incomplete | RepQuality::Minimal => {}
        }
    }
    // レップ判定のフィードバックをずれ警告より優先する
    if update.feedback.is_some() {
        outcome.feedback = update.feedback;
    }
    outcome
}

fn process_squat(
    session: &mut SquatSession,
    angle: f32,
    now: Instant,
    announcer: &dyn Announcer,
) -> FrameOutcome {
    let mut outcome = FrameOutcome::default();
    if !session.gate.is_counting() {
        let gate = session.gate.update(angle, now, announcer);
        outcome.start_signal = gate.entered_counting;
        outcome.feedback = gate.display;
        return outcome;
    }

    if let Some(n) = session.counter.update(angle) {
        outcome.counted = Some(n);
    }
    if let Some(n) = session.counter.take_unspoken() {
        announcer.announce(&n.to_string());
    }
    outcome
}
