use crate::config::SquatConfig;
use crate::session::Stage;

/// 固定閾値のスクワット判定
///
/// angle > up_angle で Up、angle < down_angle で Down。
/// 記録済みの Down の後に Up になったら1回。深さの評価はしない。
#[derive(Debug, Clone)]
pub struct SquatCounter {
    up_angle: f32,
    down_angle: f32,
    stage: Stage,
    count: u32,
    /// 読み上げ済みの回数（同じ回数を二度読まない）
    last_spoken: u32,
}

impl SquatCounter {
    pub fn new(config: &SquatConfig) -> Self {
        Self {
            up_angle: config.up_angle,
            down_angle: config.down_angle,
            stage: Stage::Unknown,
            count: 0,
            last_spoken: 0,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// 増えたら新しい回数を返す
    pub fn update(&mut self, angle: f32) -> Option<u32> {
        if angle > self.up_angle {
            let counted = self.stage == Stage::Down;
            self.stage = Stage::Up;
            if counted {
                self.count += 1;
                return Some(self.count);
            }
        } else if angle < self.down_angle {
            self.stage = Stage::Down;
        }
        None
    }

    /// まだ読み上げていない回数があれば返し、読み上げ済みにする
    pub fn take_unspoken(&mut self) -> Option<u32> {
        if self.count > self.last_spoken {
            self.last_spoken = self.count;
            Some(self.count)
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        self.stage = Stage::Unknown;
        self.count = 0;
        self.last_spoken = 0;
    }
}
