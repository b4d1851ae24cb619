use crate::calibration::CalibrationRecord;
use crate::config::PushupConfig;
use crate::session::Stage;

/// 1回の動作の評価
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepQuality {
    GoodForm,
    /// 一番下までは行ったが深さ不足
    Shallow,
    /// Down 判定まで下がっていない
    Incomplete,
    Minimal,
}

impl RepQuality {
    pub fn label(&self) -> &'static str {
        match self {
            Self::GoodForm => "Good form",
            Self::Shallow => "Shallow",
            Self::Incomplete => "Incomplete",
            Self::Minimal => "Minimal",
        }
    }
}

/// Down → Up で確定した1サイクル
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepResult {
    pub quality: RepQuality,
    /// 基準角 - サイクル中の最小角
    pub depth: f32,
    /// カウントされたときの新しい回数
    pub counted: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushupUpdate {
    pub rep: Option<RepResult>,
    pub feedback: Option<String>,
}

/// キャリブレーション済み基準角に対するヒステリシス判定
///
/// - Up: angle > U - up_margin
/// - 真の Down: angle < U - down_margin（was_down を立てる）
/// - Up ゾーンを出た時点で stage は Down になり、最小角の追跡をやり直す
///
/// Down → Up で深さ U - min を評価し、真の Down を経由して
/// min_depth_for_count 以上下がったサイクルだけを数える。
#[derive(Debug, Clone)]
pub struct PushupDetector {
    up_angle: f32,
    up_margin: f32,
    down_margin: f32,
    min_depth_for_detection: f32,
    min_depth_for_count: f32,
    stage: Stage,
    min_angle_in_rep: f32,
    was_down: bool,
    count: u32,
}

impl PushupDetector {
    pub fn new(record: &CalibrationRecord, config: &PushupConfig) -> Self {
        Self {
            up_angle: record.up_angle,
            up_margin: config.up_margin,
            down_margin: config.down_margin,
            min_depth_for_detection: config.min_depth_for_detection,
            min_depth_for_count: config.min_depth_for_count,
            stage: Stage::Unknown,
            min_angle_in_rep: record.up_angle,
            was_down: false,
            count: 0,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn update(&mut self, angle: f32) -> PushupUpdate {
        self.min_angle_in_rep = self.min_angle_in_rep.min(angle);

        let is_up = angle > self.up_angle - self.up_margin;
        if angle < self.up_angle - self.down_margin {
            self.was_down = true;
        }

        match self.stage {
            Stage::Unknown => {
                // 最初のサンプルは位置から推定するだけ。数えない
                self.stage = if is_up { Stage::Up } else { Stage::Down };
                PushupUpdate::default()
            }
            Stage::Up if !is_up => {
                self.stage = Stage::Down;
                self.min_angle_in_rep = angle;
                PushupUpdate {
                    rep: None,
                    feedback: Some("Going down...".to_string()),
                }
            }
            Stage::Up => PushupUpdate::default(),
            Stage::Down if is_up => {
                let result = self.finish_rep();
                let feedback = match result.quality {
                    RepQuality::GoodForm => format!("Good! Pushup #{}", self.count),
                    RepQuality::Shallow => "Too shallow!".to_string(),
                    RepQuality::Incomplete => "Partial movement!".to_string(),
                    RepQuality::Minimal => "Minimal movement!".to_string(),
                };
                PushupUpdate {
                    rep: Some(result),
                    feedback: Some(feedback),
                }
            }
            Stage::Down => {
                let depth = self.up_angle - angle;
                let feedback = if depth < self.min_depth_for_detection {
                    "Start bending..."
                } else if depth < self.min_depth_for_count {
                    "Bending..."
                } else {
                    "Good depth!"
                };
                PushupUpdate {
                    rep: None,
                    feedback: Some(feedback.to_string()),
                }
            }
        }
    }

    fn finish_rep(&mut self) -> RepResult {
        let depth = self.up_angle - self.min_angle_in_rep;
        let (quality, counted) = if depth < self.min_depth_for_detection {
            (RepQuality::Minimal, None)
        } else if !self.was_down {
            (RepQuality::Incomplete, None)
        } else if depth < self.min_depth_for_count {
            (RepQuality::Shallow, None)
        } else {
            self.count += 1;
            (RepQuality::GoodForm, Some(self.count))
        };

        self.was_down = false;
        self.min_angle_in_rep = self.up_angle;
        self.stage = Stage::Up;

        RepResult {
            quality,
            depth,
            counted,
        }
    }
}
