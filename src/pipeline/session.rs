use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, bounded};

use super::camera::{CameraError, CameraSource};
use super::estimator::{EstimateError, EstimatorHandle};
use super::overlay::{self, OverlaySurface};
use super::reference::ReferencePlayer;
use crate::topology;
use crate::types::{Feed, Frame, SessionFrame, SessionState};

/// Inference-and-render period. A trade-off between responsiveness and
/// inference cost; both feeds are processed once per tick.
pub const TICK_PERIOD: Duration = Duration::from_millis(100);

/// Orchestrates camera, reference player and estimator through the
/// Idle/Running session lifecycle.
///
/// While Running, a tick thread estimates and paints both feeds every
/// [`TICK_PERIOD`]. The cancellation token minted on entering Running is
/// checked before a tick does any work and re-checked after every
/// estimate before a result is painted, so work that outlives a
/// pause/reset is discarded rather than presented. The camera is
/// released on every exit path, including drop.
pub struct SessionController {
    camera: Box<dyn CameraSource>,
    reference: Option<ReferencePlayer>,
    reference_rx: Option<Receiver<Frame>>,
    estimator: EstimatorHandle,
    out_tx: Sender<SessionFrame>,
    state: SessionState,
    cancel: Option<Arc<AtomicBool>>,
    camera_error: Option<CameraError>,
    started_at: Option<Instant>,
    accumulated: Duration,
}

impl SessionController {
    /// Build an Idle controller. Presented frames for both feeds arrive
    /// on the returned channel while the session runs.
    pub fn new(
        camera: Box<dyn CameraSource>,
        reference: Option<(ReferencePlayer, Receiver<Frame>)>,
        estimator: EstimatorHandle,
    ) -> (Self, Receiver<SessionFrame>) {
        let (out_tx, out_rx) = bounded(4);
        let (reference, reference_rx) = match reference {
            Some((player, rx)) => (Some(player), Some(rx)),
            None => (None, None),
        };

        (
            Self {
                camera,
                reference,
                reference_rx,
                estimator,
                out_tx,
                state: SessionState::Idle,
                cancel: None,
                camera_error: None,
                started_at: None,
                accumulated: Duration::ZERO,
            },
            out_rx,
        )
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The last camera acquisition failure, if the running session has no
    /// live webcam stream. Cleared by a successful acquisition.
    pub fn camera_error(&self) -> Option<&CameraError> {
        self.camera_error.as_ref()
    }

    /// Time spent Running since the last reset.
    pub fn elapsed(&self) -> Duration {
        match self.started_at {
            Some(started_at) => self.accumulated + started_at.elapsed(),
            None => self.accumulated,
        }
    }

    /// The play/pause control.
    pub fn toggle(&mut self) -> SessionState {
        match self.state {
            SessionState::Idle => self.start_running(),
            SessionState::Running => self.pause(),
        }
        self.state
    }

    /// Force Idle and rewind the reference clip to time zero. Valid from
    /// any state.
    pub fn reset(&mut self) {
        if self.state == SessionState::Running {
            self.pause();
        } else {
            // Idempotent release for the Idle path too.
            self.camera.stop();
        }
        if let Some(reference) = &self.reference {
            reference.reset();
        }
        self.accumulated = Duration::ZERO;
    }

    fn start_running(&mut self) {
        let camera_rx = match self.camera.start() {
            Ok(rx) => {
                self.camera_error = None;
                Some(rx)
            }
            Err(err) => {
                // Recoverable: the session runs with the reference feed
                // only and the host shows a camera placeholder.
                log::warn!("camera acquisition failed: {err}");
                self.camera_error = Some(err);
                None
            }
        };

        if let Some(reference) = &self.reference {
            reference.play();
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let worker = TickWorker {
            cancel: cancel.clone(),
            camera_rx,
            reference_rx: self.reference_rx.clone(),
            estimator: self.estimator.clone(),
            out_tx: self.out_tx.clone(),
        };
        thread::spawn(move || worker.run());

        self.cancel = Some(cancel);
        self.started_at = Some(Instant::now());
        self.state = SessionState::Running;
        log::info!("session running");
    }

    fn pause(&mut self) {
        // Cancel first: no tick may start work after this point. The
        // thread itself winds down on its own; anything in flight is
        // dropped when it sees the flag.
        if let Some(cancel) = self.cancel.take() {
            cancel.store(true, Ordering::SeqCst);
        }

        self.camera.stop();
        if let Some(reference) = &self.reference {
            reference.pause();
        }

        if let Some(started_at) = self.started_at.take() {
            self.accumulated += started_at.elapsed();
        }
        self.state = SessionState::Idle;
        log::info!("session paused");
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.store(true, Ordering::SeqCst);
        }
        self.camera.stop();
    }
}

struct TickWorker {
    cancel: Arc<AtomicBool>,
    camera_rx: Option<Receiver<Frame>>,
    reference_rx: Option<Receiver<Frame>>,
    estimator: EstimatorHandle,
    out_tx: Sender<SessionFrame>,
}

impl TickWorker {
    fn run(self) {
        let ticker = crossbeam_channel::tick(TICK_PERIOD);
        let mut webcam = FeedState::new(Feed::Webcam, self.camera_rx);
        let mut reference = FeedState::new(Feed::Reference, self.reference_rx);

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                break;
            }
            if ticker.recv().is_err() {
                break;
            }
            if self.cancel.load(Ordering::SeqCst) {
                break;
            }

            // The two half-ticks are independent; neither can abort the
            // other.
            webcam.process(&self.estimator, &self.cancel, &self.out_tx);
            reference.process(&self.estimator, &self.cancel, &self.out_tx);
        }
    }
}

struct FeedState {
    feed: Feed,
    frame_rx: Option<Receiver<Frame>>,
    latest: Option<Frame>,
    surface: OverlaySurface,
    notified_not_ready: bool,
}

impl FeedState {
    fn new(feed: Feed, frame_rx: Option<Receiver<Frame>>) -> Self {
        Self {
            feed,
            frame_rx,
            latest: None,
            surface: OverlaySurface::new(),
            notified_not_ready: false,
        }
    }

    fn mirrored(&self) -> bool {
        self.feed == Feed::Webcam
    }

    fn process(&mut self, estimator: &EstimatorHandle, cancel: &AtomicBool, out: &Sender<SessionFrame>) {
        if let Some(rx) = &self.frame_rx {
            if let Some(frame) = rx.try_iter().last() {
                self.latest = Some(frame);
            }
        }
        // No frame yet (stream warming up, or feed absent): nothing to do
        // this tick.
        let Some(frame) = self.latest.clone() else {
            return;
        };

        let poses = match estimator.estimate(&frame) {
            Ok(poses) => poses,
            Err(EstimateError::NotReady) => {
                if !self.notified_not_ready {
                    log::debug!("{:?}: estimator not ready, presenting bare video", self.feed);
                    self.notified_not_ready = true;
                }
                Vec::new()
            }
            Err(err) => {
                log::warn!("{:?}: pose estimation failed: {err:?}", self.feed);
                Vec::new()
            }
        };

        // The session may have been paused or torn down while inference
        // ran; a stale result must never be painted.
        if cancel.load(Ordering::SeqCst) {
            return;
        }

        let mirrored = self.mirrored();
        overlay::render(
            &mut self.surface,
            &poses,
            frame.width,
            frame.height,
            topology::CONNECTIONS,
            mirrored,
        );
        let presented = overlay::composite(&frame, &self.surface, mirrored);
        let _ = out.try_send(SessionFrame {
            feed: self.feed,
            frame: presented,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::estimator::PoseBackend;
    use crate::pipeline::reference::ClipSource;
    use crate::types::{KEYPOINT_KINDS, Keypoint, Pose};
    use anyhow::Result;
    use crossbeam_channel::unbounded;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CamProbe {
        starts: usize,
        stops: usize,
        active: bool,
        overlapping_start: bool,
    }

    struct MockCamera {
        probe: Arc<Mutex<CamProbe>>,
        // Keeps the stream alive so the session sees an open channel.
        live_tx: Option<Sender<Frame>>,
    }

    impl MockCamera {
        fn new() -> (Self, Arc<Mutex<CamProbe>>) {
            let probe = Arc::new(Mutex::new(CamProbe::default()));
            (
                Self {
                    probe: probe.clone(),
                    live_tx: None,
                },
                probe,
            )
        }
    }

    impl CameraSource for MockCamera {
        fn start(&mut self) -> Result<Receiver<Frame>, CameraError> {
            let mut probe = self.probe.lock().unwrap();
            if probe.active {
                probe.overlapping_start = true;
            }
            probe.starts += 1;
            probe.active = true;

            let (tx, rx) = bounded(4);
            let _ = tx.try_send(Frame::new(vec![10u8; 8 * 8 * 4], 8, 8));
            self.live_tx = Some(tx);
            Ok(rx)
        }

        fn stop(&mut self) {
            let mut probe = self.probe.lock().unwrap();
            if probe.active {
                probe.stops += 1;
                probe.active = false;
            }
            self.live_tx = None;
        }
    }

    struct StillClip;

    impl ClipSource for StillClip {
        fn next_frame(&mut self) -> Result<Option<Frame>> {
            Ok(Some(Frame::new(vec![10u8; 32 * 16 * 4], 32, 16)))
        }

        fn rewind(&mut self) -> Result<()> {
            Ok(())
        }

        fn frame_interval(&self) -> Duration {
            Duration::from_millis(5)
        }
    }

    struct ScriptedPose;

    impl PoseBackend for ScriptedPose {
        fn estimate(&self, _frame: &Frame) -> Result<Vec<Pose>> {
            Ok(vec![Pose {
                keypoints: vec![
                    Keypoint {
                        kind: KEYPOINT_KINDS[0],
                        x: 10.0,
                        y: 10.0,
                        score: 0.9,
                    },
                    Keypoint {
                        kind: KEYPOINT_KINDS[1],
                        x: 20.0,
                        y: 10.0,
                        score: 0.1,
                    },
                ],
                score: 0.5,
            }])
        }
    }

    struct BlockingPose {
        entered_tx: Sender<()>,
        release_rx: Receiver<()>,
    }

    impl PoseBackend for BlockingPose {
        fn estimate(&self, _frame: &Frame) -> Result<Vec<Pose>> {
            let _ = self.entered_tx.send(());
            let _ = self.release_rx.recv();
            Ok(vec![Pose {
                keypoints: Vec::new(),
                score: 1.0,
            }])
        }
    }

    fn ready_estimator(backend: Arc<dyn PoseBackend>) -> EstimatorHandle {
        let handle = EstimatorHandle::new();
        handle.install(backend);
        handle
    }

    fn controller_with(
        backend: Arc<dyn PoseBackend>,
    ) -> (SessionController, Receiver<SessionFrame>, Arc<Mutex<CamProbe>>) {
        let (camera, probe) = MockCamera::new();
        let reference = ReferencePlayer::spawn(Box::new(StillClip));
        let (controller, out_rx) = SessionController::new(
            Box::new(camera),
            Some(reference),
            ready_estimator(backend),
        );
        (controller, out_rx, probe)
    }

    #[test]
    fn toggle_cycles_acquire_and_release_once_each() {
        let (mut controller, _out_rx, probe) = controller_with(Arc::new(ScriptedPose));

        assert_eq!(controller.toggle(), SessionState::Running);
        assert_eq!(controller.toggle(), SessionState::Idle);
        assert_eq!(controller.toggle(), SessionState::Running);
        assert_eq!(controller.toggle(), SessionState::Idle);

        let probe = probe.lock().unwrap();
        assert_eq!(probe.starts, 2);
        assert_eq!(probe.stops, 2);
        assert!(!probe.overlapping_start, "camera acquired twice without release");
    }

    #[test]
    fn reset_from_idle_stays_idle_with_camera_released() {
        let (mut controller, _out_rx, probe) = controller_with(Arc::new(ScriptedPose));

        controller.reset();
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(!probe.lock().unwrap().active);
        assert_eq!(controller.elapsed(), Duration::ZERO);
    }

    #[test]
    fn reset_from_running_releases_everything() {
        let (mut controller, _out_rx, probe) = controller_with(Arc::new(ScriptedPose));

        controller.toggle();
        std::thread::sleep(Duration::from_millis(50));
        controller.reset();

        assert_eq!(controller.state(), SessionState::Idle);
        let probe = probe.lock().unwrap();
        assert!(!probe.active, "camera still held after reset");
        assert_eq!(probe.starts, probe.stops);
    }

    #[test]
    fn running_session_presents_overlaid_frames() {
        let (mut controller, out_rx, _probe) = controller_with(Arc::new(ScriptedPose));
        controller.toggle();

        // Wait for a reference-feed frame; it is rendered unmirrored so
        // keypoint coordinates map straight to pixels.
        let deadline = Instant::now() + Duration::from_secs(5);
        let frame = loop {
            let presented = out_rx
                .recv_deadline(deadline)
                .expect("no session frame before deadline");
            if presented.feed == Feed::Reference {
                break presented.frame;
            }
        };

        let px = |x: u32, y: u32| {
            let idx = ((y * frame.width + x) as usize) * 4;
            [frame.rgba[idx], frame.rgba[idx + 1], frame.rgba[idx + 2]]
        };

        // Strong keypoint painted, weak keypoint omitted, no bone between.
        assert_ne!(px(10, 10), [10, 10, 10]);
        assert_eq!(px(20, 10), [10, 10, 10]);
        assert_eq!(px(15, 10), [10, 10, 10]);
    }

    #[test]
    fn results_landing_after_pause_are_discarded() {
        let (entered_tx, entered_rx) = unbounded();
        let (release_tx, release_rx) = unbounded();
        let backend = BlockingPose {
            entered_tx,
            release_rx,
        };
        let (mut controller, out_rx, _probe) = controller_with(Arc::new(backend));

        controller.toggle();
        entered_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("estimation never started");

        // Pause while inference is still in flight, then let it finish.
        controller.toggle();
        assert_eq!(controller.state(), SessionState::Idle);
        while out_rx.try_recv().is_ok() {}
        let _ = release_tx.send(());

        std::thread::sleep(Duration::from_millis(100));
        assert!(
            out_rx.try_recv().is_err(),
            "stale estimation result was presented after pause"
        );
    }

    #[test]
    fn elapsed_accumulates_only_while_running() {
        let (mut controller, _out_rx, _probe) = controller_with(Arc::new(ScriptedPose));
        assert_eq!(controller.elapsed(), Duration::ZERO);

        controller.toggle();
        std::thread::sleep(Duration::from_millis(30));
        controller.toggle();

        let after_pause = controller.elapsed();
        assert!(after_pause >= Duration::from_millis(30));

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(controller.elapsed(), after_pause);

        controller.reset();
        assert_eq!(controller.elapsed(), Duration::ZERO);
    }
}
