use std::time::Instant;

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    #[allow(dead_code)]
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(rgba: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            rgba,
            width,
            height,
            timestamp: Instant::now(),
        }
    }
}

/// COCO-17 landmark order, the layout the single-pose model emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeypointKind {
    Nose,
    LeftEye,
    RightEye,
    LeftEar,
    RightEar,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

pub const NUM_KEYPOINTS: usize = 17;

pub const KEYPOINT_KINDS: [KeypointKind; NUM_KEYPOINTS] = [
    KeypointKind::Nose,
    KeypointKind::LeftEye,
    KeypointKind::RightEye,
    KeypointKind::LeftEar,
    KeypointKind::RightEar,
    KeypointKind::LeftShoulder,
    KeypointKind::RightShoulder,
    KeypointKind::LeftElbow,
    KeypointKind::RightElbow,
    KeypointKind::LeftWrist,
    KeypointKind::RightWrist,
    KeypointKind::LeftHip,
    KeypointKind::RightHip,
    KeypointKind::LeftKnee,
    KeypointKind::RightKnee,
    KeypointKind::LeftAnkle,
    KeypointKind::RightAnkle,
];

/// One detected landmark in source-frame pixel space.
#[derive(Clone, Copy, Debug)]
pub struct Keypoint {
    pub kind: KeypointKind,
    pub x: f32,
    pub y: f32,
    pub score: f32,
}

/// One detected body in one frame. Keypoints follow COCO-17 order.
#[derive(Clone, Debug)]
pub struct Pose {
    pub keypoints: Vec<Keypoint>,
    pub score: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
}

/// Which video feed a frame or surface belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Feed {
    Webcam,
    Reference,
}

impl Feed {
    pub fn label(&self) -> &'static str {
        match self {
            Feed::Webcam => "Your camera",
            Feed::Reference => "Reference",
        }
    }
}

/// A video frame with the skeleton already painted, ready to present.
#[derive(Clone, Debug)]
pub struct SessionFrame {
    pub feed: Feed,
    pub frame: Frame,
}
