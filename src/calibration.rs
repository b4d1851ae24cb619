use chrono::{DateTime, Local};
use std::time::Instant;

use crate::config::PushupConfig;
use crate::stability::StabilityBuffer;

/// キャリブレーション結果。完了後は変更しない
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationRecord {
    /// 腕を伸ばした基準角（度）
    pub up_angle: f32,
    /// up_angle - down_offset
    pub down_angle: f32,
    pub calibrated_at: DateTime<Local>,
    /// 完了時点のバッファの最大-最小
    pub spread: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationState {
    /// 腕を伸ばして静止するのを待つ
    Waiting,
    /// 静止を保持中
    Calibrating { started: Instant },
    Done(CalibrationRecord),
}

/// 1サンプル分の結果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationUpdate {
    /// このサンプルでキャリブレーションが完了した（1回だけ true）
    pub completed: bool,
    /// 0-100。保持中のみ
    pub progress: Option<u8>,
    pub feedback: Option<String>,
}

/// 腕立て伏せ用の自己キャリブレーション
///
/// Waiting → Calibrating → Done。Calibrating 中に静止が崩れたら Waiting に戻る。
/// 角度の下限（min_calibration_angle）より曲がった姿勢からは始めない。
pub struct CalibrationEngine {
    config: PushupConfig,
    buffer: StabilityBuffer,
    state: CalibrationState,
}

impl CalibrationEngine {
    pub fn new(config: PushupConfig) -> Self {
        let buffer = StabilityBuffer::new(config.buffer_size, config.stability_threshold);
        Self {
            config,
            buffer,
            state: CalibrationState::Waiting,
        }
    }

    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    pub fn record(&self) -> Option<&CalibrationRecord> {
        match &self.state {
            CalibrationState::Done(record) => Some(record),
            _ => None,
        }
    }

    /// 最初からやり直す
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = CalibrationState::Waiting;
    }

    pub fn update(&mut self, angle: f32, now: Instant) -> CalibrationUpdate {
        match &self.state {
            CalibrationState::Waiting => {
                if angle <= self.config.min_calibration_angle {
                    return CalibrationUpdate {
                        feedback: Some("Extend arms more!".to_string()),
                        ..Default::default()
                    };
                }
                if self.buffer.push(angle) {
                    self.state = CalibrationState::Calibrating { started: now };
                    return CalibrationUpdate {
                        progress: Some(0),
                        feedback: Some("Hold still... Calibrating".to_string()),
                        ..Default::default()
                    };
                }
                CalibrationUpdate {
                    feedback: Some("Get into pushup starting position".to_string()),
                    ..Default::default()
                }
            }
            CalibrationState::Calibrating { started } => {
                let started = *started;
                if !self.buffer.push(angle) {
                    self.buffer.clear();
                    self.state = CalibrationState::Waiting;
                    return CalibrationUpdate {
                        feedback: Some("Movement detected. Calibration canceled.".to_string()),
                        ..Default::default()
                    };
                }

                let hold = now.saturating_duration_since(started).as_secs_f32();
                if hold >= self.config.hold_secs {
                    let record = CalibrationRecord {
                        up_angle: angle,
                        down_angle: angle - self.config.down_offset,
                        calibrated_at: Local::now(),
                        spread: self.buffer.spread(),
                    };
                    self.buffer.clear();
                    self.state = CalibrationState::Done(record);
                    return CalibrationUpdate {
                        completed: true,
                        progress: Some(100),
                        feedback: Some("Calibration complete!".to_string()),
                    };
                }

                let progress = progress_percent(hold, self.config.hold_secs);
                CalibrationUpdate {
                    progress: Some(progress),
                    feedback: Some(format!(
                        "Calibrating... {}% ({:.1}s/{:.1}s)",
                        progress, hold, self.config.hold_secs
                    )),
                    ..Default::default()
                }
            }
            CalibrationState::Done(record) => {
                // ずれは警告のみ。再キャリブレーションは手動リセットで
                if (angle - record.up_angle).abs() > self.config.drift_tolerance {
                    CalibrationUpdate {
                        feedback: Some(
                            "Pose changed significantly. Consider recalibrating.".to_string(),
                        ),
                        ..Default::default()
                    }
                } else {
                    CalibrationUpdate::default()
                }
            }
        }
    }
}

fn progress_percent(hold_secs: f32, target_secs: f32) -> u8 {
    if target_secs <= 0.0 {
        return 100;
    }
    (hold_secs / target_secs * 100.0).clamp(0.0, 100.0) as u8
}
