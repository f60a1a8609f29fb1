use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, OnceLock},
};

use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use ndarray::Array4;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;
use thiserror::Error;

use crate::types::{Frame, KEYPOINT_KINDS, Keypoint, NUM_KEYPOINTS, Pose};

/// Mean keypoint score below which a detection is treated as "nobody in
/// frame" and no pose is reported.
const MIN_POSE_SCORE: f32 = 0.2;

/// Speed/accuracy variant of the single-pose model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelVariant {
    /// Fast, lower-accuracy model sized for per-tick inference.
    Lightning,
    /// Slower, higher-accuracy model.
    Thunder,
}

impl ModelVariant {
    pub fn input_size(&self) -> u32 {
        match self {
            ModelVariant::Lightning => 192,
            ModelVariant::Thunder => 256,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub variant: ModelVariant,
    pub model_path: PathBuf,
}

impl ModelConfig {
    pub fn lightning(model_path: PathBuf) -> Self {
        Self {
            variant: ModelVariant::Lightning,
            model_path,
        }
    }
}

#[derive(Debug, Error)]
pub enum EstimateError {
    /// `estimate` was called before model loading completed. Correct
    /// controller sequencing never reaches this; it is guarded anyway.
    #[error("pose model is still loading")]
    NotReady,
    #[error(transparent)]
    Inference(#[from] anyhow::Error),
}

/// Frame source → poses. Both video feeds run through the same backend;
/// tests substitute a scripted one.
pub trait PoseBackend: Send + Sync {
    fn estimate(&self, frame: &Frame) -> Result<Vec<Pose>>;
}

/// Process-wide slot for the loaded model: empty until the loader thread
/// installs a backend, immutable afterwards. Cheap to clone and hand to
/// the session and the UI.
#[derive(Clone)]
pub struct EstimatorHandle {
    slot: Arc<OnceLock<Arc<dyn PoseBackend>>>,
}

impl EstimatorHandle {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(OnceLock::new()),
        }
    }

    /// Install the loaded backend. Later installs are ignored.
    pub fn install(&self, backend: Arc<dyn PoseBackend>) {
        if self.slot.set(backend).is_err() {
            log::warn!("pose backend installed twice; keeping the first");
        }
    }

    pub fn ready(&self) -> bool {
        self.slot.get().is_some()
    }

    pub fn estimate(&self, frame: &Frame) -> Result<Vec<Pose>, EstimateError> {
        match self.slot.get() {
            Some(backend) => backend.estimate(frame).map_err(EstimateError::Inference),
            None => Err(EstimateError::NotReady),
        }
    }
}

impl Default for EstimatorHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// ONNX Runtime single-pose backend. The session is serialized behind a
/// mutex; the webcam and reference feeds share one loaded model.
pub struct OrtBackend {
    session: Mutex<Session>,
    variant: ModelVariant,
}

impl OrtBackend {
    pub fn load(config: &ModelConfig) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(&config.model_path)
            .with_context(|| {
                format!(
                    "failed to load pose model from {}",
                    config.model_path.display()
                )
            })?;

        log::info!(
            "pose model ready ({:?}) from {}",
            config.variant,
            config.model_path.display()
        );

        Ok(Self {
            session: Mutex::new(session),
            variant: config.variant,
        })
    }
}

impl PoseBackend for OrtBackend {
    fn estimate(&self, frame: &Frame) -> Result<Vec<Pose>> {
        let input_size = self.variant.input_size();
        let (input, letterbox) = prepare_frame(frame, input_size)?;
        let tensor = Tensor::from_array(input)?;

        let flat: Vec<f32> = {
            let mut session = self
                .session
                .lock()
                .map_err(|_| anyhow!("pose session mutex poisoned"))?;
            let outputs = session
                .run(ort::inputs![tensor])
                .context("failed to run pose model")?;
            if outputs.len() < 1 {
                return Err(anyhow!("pose model returned no outputs"));
            }
            let coords = outputs[0].try_extract_array::<f32>()?;
            coords.iter().copied().collect()
        };

        let pose = decode_single_pose(&flat, &letterbox, input_size)?;
        if pose.score < MIN_POSE_SCORE {
            return Ok(Vec::new());
        }
        Ok(vec![pose])
    }
}

#[derive(Clone, Debug)]
pub struct LetterboxInfo {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: u32,
    pub orig_h: u32,
}

/// Letterbox an RGBA frame into a square model input, black-padded,
/// normalized to [0, 1], NHWC.
pub fn prepare_frame(frame: &Frame, target_size: u32) -> Result<(Array4<f32>, LetterboxInfo)> {
    let expected_len = (frame.width as usize)
        .saturating_mul(frame.height as usize)
        .saturating_mul(4);
    if frame.rgba.len() != expected_len {
        return Err(anyhow!(
            "frame buffer size mismatch: got {}, expected {}",
            frame.rgba.len(),
            expected_len
        ));
    }

    let scale = target_size as f32 / (frame.width.max(frame.height) as f32);
    let new_w = (frame.width as f32 * scale).round().max(1.0) as u32;
    let new_h = (frame.height as f32 * scale).round().max(1.0) as u32;

    let src_image = fir::images::Image::from_vec_u8(
        frame.width,
        frame.height,
        frame.rgba.clone(),
        fir::PixelType::U8x4,
    )?;
    let mut dst_image = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x4);
    let mut resizer = fir::Resizer::new();
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("fast resize failed")?;
    let resized = dst_image.into_vec();

    let pad_x = ((target_size as i64 - new_w as i64) / 2).max(0) as usize;
    let pad_y = ((target_size as i64 - new_h as i64) / 2).max(0) as usize;
    let mut canvas = vec![0u8; (target_size as usize) * (target_size as usize) * 4];
    for px in canvas.chunks_mut(4) {
        px[3] = 255;
    }
    let dst_stride = target_size as usize * 4;
    let src_stride = new_w as usize * 4;
    for row in 0..(new_h as usize) {
        let dst_offset = (pad_y + row) * dst_stride + pad_x * 4;
        let src_offset = row * src_stride;
        canvas[dst_offset..dst_offset + src_stride]
            .copy_from_slice(&resized[src_offset..src_offset + src_stride]);
    }

    let normalized: Vec<f32> = canvas
        .chunks_exact(4)
        .flat_map(|px| {
            [
                px[0] as f32 / 255.0,
                px[1] as f32 / 255.0,
                px[2] as f32 / 255.0,
            ]
        })
        .collect();
    let input = Array4::<f32>::from_shape_vec(
        (1, target_size as usize, target_size as usize, 3),
        normalized,
    )
    .map_err(|err| anyhow!("failed to build input tensor: {err}"))?;

    let letterbox = LetterboxInfo {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
        orig_w: frame.width,
        orig_h: frame.height,
    };

    Ok((input, letterbox))
}

/// Decode the model's `[1, 1, 17, 3]` output — `(y, x, score)` triples
/// normalized to the input square — back into source-frame pixel space.
pub fn decode_single_pose(
    flat: &[f32],
    letterbox: &LetterboxInfo,
    input_size: u32,
) -> Result<Pose> {
    if flat.len() < NUM_KEYPOINTS * 3 {
        return Err(anyhow!(
            "unexpected pose output length: got {}, need {}",
            flat.len(),
            NUM_KEYPOINTS * 3
        ));
    }

    let mut keypoints = Vec::with_capacity(NUM_KEYPOINTS);
    let mut score_sum = 0.0f32;
    for (kind, chunk) in KEYPOINT_KINDS.iter().zip(flat.chunks_exact(3)) {
        let (ny, nx, score) = (chunk[0], chunk[1], chunk[2]);
        let px = nx * input_size as f32;
        let py = ny * input_size as f32;
        let x = ((px - letterbox.pad_x) / letterbox.scale)
            .clamp(0.0, letterbox.orig_w.saturating_sub(1) as f32);
        let y = ((py - letterbox.pad_y) / letterbox.scale)
            .clamp(0.0, letterbox.orig_h.saturating_sub(1) as f32);
        let score = score.clamp(0.0, 1.0);
        score_sum += score;
        keypoints.push(Keypoint {
            kind: *kind,
            x,
            y,
            score,
        });
    }

    Ok(Pose {
        keypoints,
        score: score_sum / NUM_KEYPOINTS as f32,
    })
}

/// Default on-disk location for a variant's model file.
pub fn default_model_path(variant: ModelVariant) -> PathBuf {
    let filename = match variant {
        ModelVariant::Lightning => "movenet_singlepose_lightning.onnx",
        ModelVariant::Thunder => "movenet_singlepose_thunder.onnx",
    };
    Path::new("models").join(filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::KeypointKind;

    fn landscape_letterbox() -> LetterboxInfo {
        // 640x480 into a 192 square: scale 0.3, 24px vertical padding.
        LetterboxInfo {
            scale: 0.3,
            pad_x: 0.0,
            pad_y: 24.0,
            orig_w: 640,
            orig_h: 480,
        }
    }

    fn flat_output(score: f32) -> Vec<f32> {
        let mut flat = Vec::with_capacity(NUM_KEYPOINTS * 3);
        for _ in 0..NUM_KEYPOINTS {
            flat.extend_from_slice(&[0.5, 0.5, score]);
        }
        flat
    }

    #[test]
    fn decode_projects_through_the_letterbox() {
        let pose = decode_single_pose(&flat_output(0.9), &landscape_letterbox(), 192).unwrap();
        assert_eq!(pose.keypoints.len(), NUM_KEYPOINTS);

        // Center of the input square maps to the center of the source frame.
        let nose = &pose.keypoints[0];
        assert_eq!(nose.kind, KeypointKind::Nose);
        assert!((nose.x - 320.0).abs() < 1.0, "x was {}", nose.x);
        assert!((nose.y - 240.0).abs() < 1.0, "y was {}", nose.y);
    }

    #[test]
    fn decode_assigns_kinds_in_model_order() {
        let pose = decode_single_pose(&flat_output(0.9), &landscape_letterbox(), 192).unwrap();
        assert_eq!(pose.keypoints[5].kind, KeypointKind::LeftShoulder);
        assert_eq!(pose.keypoints[16].kind, KeypointKind::RightAnkle);
    }

    #[test]
    fn decode_rejects_short_output() {
        let err = decode_single_pose(&[0.0; 10], &landscape_letterbox(), 192);
        assert!(err.is_err());
    }

    #[test]
    fn coordinates_clamp_to_the_source_frame() {
        let mut flat = flat_output(0.9);
        // Push one keypoint far outside the padded region.
        flat[0] = -1.0;
        flat[1] = 2.0;
        let pose = decode_single_pose(&flat, &landscape_letterbox(), 192).unwrap();
        assert_eq!(pose.keypoints[0].x, 639.0);
        assert_eq!(pose.keypoints[0].y, 0.0);
    }

    #[test]
    fn letterbox_pads_the_short_axis() {
        let frame = Frame::new(vec![0u8; 640 * 480 * 4], 640, 480);
        let (input, letterbox) = prepare_frame(&frame, 192).unwrap();
        assert_eq!(input.shape(), &[1, 192, 192, 3]);
        assert_eq!(letterbox.pad_x, 0.0);
        assert_eq!(letterbox.pad_y, 24.0);
        assert!((letterbox.scale - 0.3).abs() < 1e-6);
    }

    #[test]
    fn handle_reports_not_ready_before_install() {
        let handle = EstimatorHandle::new();
        let frame = Frame::new(vec![0u8; 4], 1, 1);
        assert!(matches!(
            handle.estimate(&frame),
            Err(EstimateError::NotReady)
        ));
        assert!(!handle.ready());
    }

    struct OnePose;

    impl PoseBackend for OnePose {
        fn estimate(&self, _frame: &Frame) -> Result<Vec<Pose>> {
            Ok(vec![Pose {
                keypoints: Vec::new(),
                score: 1.0,
            }])
        }
    }

    #[test]
    fn handle_serves_the_installed_backend() {
        let handle = EstimatorHandle::new();
        handle.install(Arc::new(OnePose));
        assert!(handle.ready());

        let frame = Frame::new(vec![0u8; 4], 1, 1);
        let poses = handle.estimate(&frame).unwrap();
        assert_eq!(poses.len(), 1);
    }
}
