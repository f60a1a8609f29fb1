use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Instant,
};

use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, Sender, bounded};
use nokhwa::{
    Camera,
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraIndex, CameraInfo, FrameFormat, RequestedFormat, RequestedFormatType,
    },
};
use thiserror::Error;

use super::rgba_converter;
use crate::types::Frame;

// Prefer pixel formats that are widely supported on macOS (the built-in cameras
// often reject YUYV even though Nokhwa reports it).
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::GRAY,
    FrameFormat::YUYV,
    FrameFormat::NV12,
    FrameFormat::MJPEG,
];

fn requested_formats() -> [RequestedFormat<'static>; 4] {
    [
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestFrameRate,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestResolution,
            PREFERRED_PIXEL_FORMATS,
        ),
        // Fall back to any format Nokhwa can decode, but prefer higher FPS to
        // avoid very low default rates (e.g. 15 FPS) that some drivers reject.
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]
}

/// Why the camera could not be acquired. Recoverable by calling `start` again.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
}

/// Classify an acquisition failure into the two recoverable cases the
/// session surfaces. Nokhwa reports platform permission failures as
/// free-form text, so this matches on the message.
pub fn classify_start_error(err: &anyhow::Error) -> CameraError {
    let text = format!("{err:#}").to_lowercase();
    if text.contains("denied")
        || text.contains("permission")
        || text.contains("not authorized")
        || text.contains("unauthorized")
    {
        CameraError::PermissionDenied(format!("{err:#}"))
    } else {
        CameraError::DeviceUnavailable(format!("{err:#}"))
    }
}

/// Anything the session can pull live frames from. The production
/// implementation wraps a capture device; tests substitute a stub to
/// observe acquire/release behavior.
pub trait CameraSource: Send {
    /// Acquire the device and start streaming. Frames arrive on the
    /// returned channel until `stop` is called.
    fn start(&mut self) -> Result<Receiver<Frame>, CameraError>;

    /// Release the device. Idempotent; `start` afterwards re-acquires.
    fn stop(&mut self);
}

#[derive(Clone, Debug)]
pub struct CameraDevice {
    pub index: CameraIndex,
    pub label: String,
}

#[derive(Debug)]
pub struct CameraStream {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CameraStream {
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub fn available_cameras() -> Result<Vec<CameraDevice>> {
    let cameras = query(ApiBackend::Auto)?;
    Ok(cameras
        .into_iter()
        .map(|info| CameraDevice {
            index: info.index().clone(),
            label: format_camera_label(&info),
        })
        .collect())
}

fn format_camera_label(info: &CameraInfo) -> String {
    info.human_name()
}

fn build_camera(index: CameraIndex) -> Result<Camera> {
    let mut last_err = None;

    for requested in requested_formats() {
        match Camera::new(index.clone(), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err.into()),
            },
            Err(err) => last_err = Some(err.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
}

fn start_camera_stream(index: CameraIndex, frame_tx: Sender<Frame>) -> Result<CameraStream> {
    // Fail fast before spawning the capture thread.
    build_camera(index.clone())?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();

    let handle = thread::spawn(move || {
        let mut camera = match build_camera(index) {
            Ok(cam) => cam,
            Err(err) => {
                log::error!("failed to open camera: {err:?}");
                return;
            }
        };

        while !stop_flag.load(Ordering::Relaxed) {
            let frame_start = Instant::now();
            let frame = match camera.frame() {
                Ok(frame) => frame,
                Err(err) => {
                    log::warn!(
                        "camera frame read failed (after {:?}): {err:?}",
                        frame_start.elapsed()
                    );
                    continue;
                }
            };

            let frame = match rgba_converter::decode_to_rgba(&frame) {
                Ok(frame) => frame,
                Err(err) => {
                    log::warn!("failed to decode camera frame {err:?}");
                    continue;
                }
            };

            // Drop if the session is busy, otherwise forward every frame.
            let _ = frame_tx.try_send(frame);
        }
    });

    Ok(CameraStream {
        stop,
        handle: Some(handle),
    })
}

/// The default capture device. Holds no device handle while stopped, so
/// the hardware camera indicator follows the session lifecycle.
pub struct DefaultCamera {
    index: CameraIndex,
    stream: Option<CameraStream>,
}

impl DefaultCamera {
    pub fn new(index: CameraIndex) -> Self {
        Self {
            index,
            stream: None,
        }
    }

    /// Picks the first enumerated device.
    pub fn first_available() -> Result<Self, CameraError> {
        let devices = available_cameras().map_err(|err| classify_start_error(&err))?;
        let device = devices
            .into_iter()
            .next()
            .ok_or_else(|| CameraError::DeviceUnavailable("no capture device found".into()))?;
        log::info!("using camera {}", device.label);
        Ok(Self::new(device.index))
    }
}

impl CameraSource for DefaultCamera {
    fn start(&mut self) -> Result<Receiver<Frame>, CameraError> {
        self.stop();

        let (frame_tx, frame_rx) = bounded(1);
        let stream =
            start_camera_stream(self.index.clone(), frame_tx).map_err(|err| {
                let classified = classify_start_error(&err);
                log::warn!("camera start failed: {classified}");
                classified
            })?;
        self.stream = Some(stream);
        Ok(frame_rx)
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop();
        }
    }
}

/// Stand-in when no capture device could be found at startup. Every
/// `start` reports the original failure, so the host keeps showing the
/// camera placeholder and a later retry stays possible.
pub struct UnavailableCamera {
    reason: String,
}

impl UnavailableCamera {
    pub fn new(reason: String) -> Self {
        Self { reason }
    }
}

impl CameraSource for UnavailableCamera {
    fn start(&mut self) -> Result<Receiver<Frame>, CameraError> {
        Err(CameraError::DeviceUnavailable(self.reason.clone()))
    }

    fn stop(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_failures_classify_as_denied() {
        let err = anyhow!("OpenDevice error: Access Denied by the operating system");
        assert!(matches!(
            classify_start_error(&err),
            CameraError::PermissionDenied(_)
        ));
    }

    #[test]
    fn other_failures_classify_as_unavailable() {
        let err = anyhow!("failed to open camera with any supported format");
        assert!(matches!(
            classify_start_error(&err),
            CameraError::DeviceUnavailable(_)
        ));
    }
}
