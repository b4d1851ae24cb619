use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 姿勢推定側が返す 17 キーポイント（COCO順）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(usize)]
pub enum KeypointIndex {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl KeypointIndex {
    pub const COUNT: usize = 17;

    pub const ALL: [KeypointIndex; KeypointIndex::COUNT] = [
        Self::Nose,
        Self::LeftEye,
        Self::RightEye,
        Self::LeftEar,
        Self::RightEar,
        Self::LeftShoulder,
        Self::RightShoulder,
        Self::LeftElbow,
        Self::RightElbow,
        Self::LeftWrist,
        Self::RightWrist,
        Self::LeftHip,
        Self::RightHip,
        Self::LeftKnee,
        Self::RightKnee,
        Self::LeftAnkle,
        Self::RightAnkle,
    ];
}

fn default_confidence() -> f32 {
    1.0
}

/// 単一キーポイント
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    /// 正規化されたX座標 (0.0〜1.0)
    pub x: f32,
    /// 正規化されたY座標 (0.0〜1.0)
    pub y: f32,
    /// 信頼度スコア。省略時は検出済み扱い
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }

    /// 信頼度が閾値以上か
    pub fn is_valid(&self, threshold: f32) -> bool {
        self.confidence > 0.0 && self.confidence >= threshold
    }

    pub fn position(&self) -> [f32; 2] {
        [self.x, self.y]
    }

    /// ピクセル空間の座標（アスペクト比を反映）
    pub fn scaled(&self, width: f32, height: f32) -> [f32; 2] {
        [self.x * width, self.y * height]
    }
}

impl Default for Keypoint {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            confidence: 0.0,
        }
    }
}

/// 1フレーム分の姿勢
///
/// ワイヤ上は関節名 → 座標のマップ。含まれない関節は信頼度0になる。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<KeypointIndex, Keypoint>",
    into = "BTreeMap<KeypointIndex, Keypoint>"
)]
pub struct Pose {
    pub keypoints: [Keypoint; KeypointIndex::COUNT],
}

impl Pose {
    /// 指定した関節だけを持つ姿勢
    pub fn from_joints<I>(joints: I) -> Self
    where
        I: IntoIterator<Item = (KeypointIndex, Keypoint)>,
    {
        let mut pose = Self::default();
        for (index, kp) in joints {
            pose.keypoints[index as usize] = kp;
        }
        pose
    }

    /// インデックスでキーポイントを取得
    pub fn get(&self, index: KeypointIndex) -> &Keypoint {
        &self.keypoints[index as usize]
    }

    /// 閾値を満たすキーポイントのみ
    pub fn valid(&self, index: KeypointIndex, threshold: f32) -> Option<&Keypoint> {
        let kp = self.get(index);
        kp.is_valid(threshold).then_some(kp)
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            keypoints: [Keypoint::default(); KeypointIndex::COUNT],
        }
    }
}

impl From<BTreeMap<KeypointIndex, Keypoint>> for Pose {
    fn from(joints: BTreeMap<KeypointIndex, Keypoint>) -> Self {
        Self::from_joints(joints)
    }
}

impl From<Pose> for BTreeMap<KeypointIndex, Keypoint> {
    fn from(pose: Pose) -> Self {
        KeypointIndex::ALL
            .iter()
            .map(|&index| (index, *pose.get(index)))
            .filter(|(_, kp)| kp.confidence > 0.0)
            .collect()
    }
}
