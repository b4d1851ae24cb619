use std::time::{Duration, Instant};

use crate::audio::{Announcement, Announcer};
use crate::config::SquatConfig;

/// スクワット開始前の段取り
#[derive(Debug, Clone)]
pub enum GateState {
    /// 「まっすぐ立って」を案内して待つ
    Waiting { prompt: Option<Announcement> },
    Ready { since: Instant, announcement: Announcement },
    /// 実時間で 3→2→1
    Countdown { started: Instant, last_announced: Option<u32> },
    Start { since: Instant, announcement: Announcement },
    Counting,
}

impl GateState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Waiting { .. } => "waiting",
            Self::Ready { .. } => "ready",
            Self::Countdown { .. } => "countdown",
            Self::Start { .. } => "start",
            Self::Counting => "counting",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GateUpdate {
    /// このフレームで Counting に入った（開始シグナルを出す）
    pub entered_counting: bool,
    /// 画面表示用のテキスト
    pub display: Option<String>,
}

/// Waiting → Ready → Countdown → Start → Counting
///
/// 戻るのは手動リセットだけ。各段は読み上げの完了と表示時間の両方を待つ。
pub struct CountdownGate {
    standing_angle: f32,
    ready: Duration,
    countdown_from: u32,
    start: Duration,
    state: GateState,
}

impl CountdownGate {
    pub fn new(config: &SquatConfig) -> Self {
        Self {
            standing_angle: config.standing_angle,
            ready: Duration::from_secs_f32(config.ready_secs.max(0.0)),
            countdown_from: config.countdown_from,
            start: Duration::from_secs_f32(config.start_secs.max(0.0)),
            state: GateState::Waiting { prompt: None },
        }
    }

    pub fn state(&self) -> &GateState {
        &self.state
    }

    pub fn is_counting(&self) -> bool {
        matches!(self.state, GateState::Counting)
    }

    pub fn reset(&mut self) {
        self.state = GateState::Waiting { prompt: None };
    }

    pub fn update(&mut self, angle: f32, now: Instant, announcer: &dyn Announcer) -> GateUpdate {
        let mut update = GateUpdate::default();
        match &mut self.state {
            GateState::Waiting { prompt } => {
                let prompt =
                    prompt.get_or_insert_with(|| announcer.announce("Please stand straight"));
                update.display = Some("Please stand straight".to_string());
                if prompt.is_finished() && angle > self.standing_angle {
                    self.state = GateState::Ready {
                        since: now,
                        announcement: announcer.announce("Ready"),
                    };
                    update.display = Some("Ready".to_string());
                }
            }
            GateState::Ready { since, announcement } => {
                update.display = Some("Ready".to_string());
                if announcement.is_finished()
                    && now.saturating_duration_since(*since) >= self.ready
                {
                    self.state = GateState::Countdown {
                        started: now,
                        last_announced: None,
                    };
                    update.display = None;
                    // 同じフレームで最初の数字を出す
                    return self.update(angle, now, announcer);
                }
            }
            GateState::Countdown { started, last_announced } => {
                let elapsed = now.saturating_duration_since(*started).as_secs() as u32;
                let remaining = self.countdown_from.saturating_sub(elapsed);
                if remaining > 0 {
                    if *last_announced != Some(remaining) {
                        announcer.announce(&number_word(remaining));
                        *last_announced = Some(remaining);
                    }
                    update.display = Some(remaining.to_string());
                } else {
                    self.state = GateState::Start {
                        since: now,
                        announcement: announcer.announce("Start"),
                    };
                    update.display = Some("Start!".to_string());
                }
            }
            GateState::Start { since, announcement } => {
                update.display = Some("Start!".to_string());
                if announcement.is_finished()
                    && now.saturating_duration_since(*since) >= self.start
                {
                    self.state = GateState::Counting;
                    update.entered_counting = true;
                    update.display = None;
                }
            }
            GateState::Counting => {}
        }
        update
    }
}

fn number_word(n: u32) -> String {
    match n {
        1 => "One".to_string(),
        2 => "Two".to_string(),
        3 => "Three".to_string(),
        _ => n.to_string(),
    }
}
