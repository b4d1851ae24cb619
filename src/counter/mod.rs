//! レップ判定。腕立て伏せ（キャリブレーション基準）とスクワット（固定閾値）は
//! 関節の形が違うので閾値を共有しない。

pub mod pushup;
pub mod squat;

pub use pushup::{PushupDetector, PushupUpdate, RepQuality, RepResult};
pub use squat::SquatCounter;
