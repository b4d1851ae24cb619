use std::collections::VecDeque;

/// 直近N個の角度サンプルを保持する固定長FIFO
///
/// 満杯かつ (最大 - 最小) < 閾値 のときだけ「静止」とみなす。
pub struct StabilityBuffer {
    samples: VecDeque<f32>,
    capacity: usize,
    threshold: f32,
}

impl StabilityBuffer {
    pub fn new(capacity: usize, threshold: f32) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            threshold,
        }
    }

    /// サンプルを追加して静止判定を返す
    pub fn push(&mut self, angle: f32) -> bool {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(angle);
        self.is_stable()
    }

    pub fn is_stable(&self) -> bool {
        self.samples.len() >= self.capacity && self.spread() < self.threshold
    }

    /// 最大 - 最小（空なら0）
    pub fn spread(&self) -> f32 {
        let mut iter = self.samples.iter().copied();
        let Some(first) = iter.next() else {
            return 0.0;
        };
        let (min, max) = iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));
        max - min
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_stable_until_full() {
        let mut buffer = StabilityBuffer::new(15, 5.0);
        for i in 0..14 {
            assert!(!buffer.push(170.0), "stable after {} samples", i + 1);
        }
        assert!(buffer.push(170.0));
        assert_eq!(buffer.len(), 15);
    }

    #[test]
    fn test_spread_threshold_is_strict() {
        let mut buffer = StabilityBuffer::new(3, 5.0);
        buffer.push(170.0);
        buffer.push(172.0);
        assert!(!buffer.push(175.0)); // 幅がちょうど5.0
        assert!(buffer.push(174.9)); // 172, 175, 174.9 → 3.0
    }

    #[test]
    fn test_recomputed_every_sample() {
        let mut buffer = StabilityBuffer::new(3, 5.0);
        for _ in 0..3 {
            buffer.push(160.0);
        }
        assert!(buffer.is_stable());
        assert!(!buffer.push(150.0));
        assert!(!buffer.push(160.0));
        assert!(!buffer.push(160.0)); // 150がまだ残っている
        assert!(buffer.push(160.0));
    }

    #[test]
    fn test_clear() {
        let mut buffer = StabilityBuffer::new(2, 5.0);
        buffer.push(170.0);
        buffer.push(170.0);
        assert!(buffer.is_stable());
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(!buffer.is_stable());
        assert_eq!(buffer.spread(), 0.0);
    }
}
