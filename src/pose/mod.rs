pub mod angle;
pub mod keypoint;
pub mod source;

pub use angle::{arm_angles, joint_angle, knee_angle, ArmAngles};
pub use keypoint::{Keypoint, KeypointIndex, Pose};
pub use source::{FrameClock, FrameReceiver, PoseFrame, SourceSpec};
