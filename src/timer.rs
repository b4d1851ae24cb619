/// セッションタイマー
///
/// target_secs > 0 ならカウントダウン、0 ならカウントアップ（無制限）。
/// 長さと向きは `start` で決まり、セッション中は変わらない。
/// 1秒ごとに `tick` を1回呼ぶ。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionTimer {
    target_secs: u32,
    /// カウントダウンなら残り、カウントアップなら経過
    value: u32,
    active: bool,
    /// `start` 済みか
    started: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Expired,
}

impl SessionTimer {
    pub fn new() -> Self {
        Self {
            target_secs: 0,
            value: 0,
            active: false,
            started: false,
        }
    }

    pub fn is_countdown(&self) -> bool {
        self.target_secs > 0
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn target_secs(&self) -> u32 {
        self.target_secs
    }

    /// 表示用の値（残り or 経過秒）
    pub fn value(&self) -> u32 {
        self.value
    }

    /// 経過秒
    pub fn elapsed_secs(&self) -> u32 {
        if self.is_countdown() {
            self.target_secs - self.value
        } else {
            self.value
        }
    }

    pub fn start(&mut self, target_secs: u32) {
        self.target_secs = target_secs;
        self.value = target_secs;
        self.active = true;
        self.started = true;
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    pub fn tick(&mut self) -> Tick {
        if !self.active {
            return Tick::Continue;
        }
        if !self.is_countdown() {
            self.value += 1;
            return Tick::Continue;
        }
        self.value = self.value.saturating_sub(1);
        if self.value == 0 {
            self.active = false;
            Tick::Expired
        } else {
            Tick::Continue
        }
    }

    pub fn clock(&self) -> String {
        format_clock(self.value)
    }
}

/// "MM:SS"
pub fn format_clock(secs: u32) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// "1m 5s" / "42s"
pub fn format_duration(secs: u32) -> String {
    let (minutes, seconds) = (secs / 60, secs % 60);
    if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
