use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use thiserror::Error;

use crate::types::Frame;

/// How long the decode thread sleeps between command polls while paused.
const PAUSED_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("failed to load reference clip: {0}")]
    Load(String),
}

/// Decodes the demonstration clip one frame at a time.
///
/// `next_frame` returns `Ok(None)` at end of clip; `rewind` seeks back to
/// the first frame. Implementations own their decoder state and are driven
/// from a single playback thread.
pub trait ClipSource: Send {
    fn next_frame(&mut self) -> Result<Option<Frame>>;
    fn rewind(&mut self) -> Result<()>;
    fn frame_interval(&self) -> Duration;
}

enum PlayerCommand {
    Play,
    Pause,
    Reset,
    Shutdown,
}

/// Loops a pre-recorded demonstration clip on its own decode thread.
///
/// Playback control is independent of the session: `reset` rewinds to time
/// zero whether or not a session is running. Dropping the player shuts the
/// decode thread down.
pub struct ReferencePlayer {
    cmd_tx: Sender<PlayerCommand>,
    position_ms: Arc<AtomicU64>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ReferencePlayer {
    /// Start a (paused) player around the given clip source. Decoded frames
    /// arrive on the returned channel while playing.
    pub fn spawn(source: Box<dyn ClipSource>) -> (Self, Receiver<Frame>) {
        let (frame_tx, frame_rx) = bounded(1);
        let (cmd_tx, cmd_rx) = unbounded();
        let position_ms = Arc::new(AtomicU64::new(0));
        let position = position_ms.clone();

        let handle = thread::spawn(move || run_playback_loop(source, cmd_rx, frame_tx, position));

        (
            Self {
                cmd_tx,
                position_ms,
                handle: Some(handle),
            },
            frame_rx,
        )
    }

    /// Open the clip at `path` with the ffmpeg decoder.
    #[cfg(feature = "reference-ffmpeg")]
    pub fn open(path: &std::path::Path) -> Result<(Self, Receiver<Frame>), MediaError> {
        let source = ffmpeg_clip::FfmpegClipSource::open(path)?;
        Ok(Self::spawn(Box::new(source)))
    }

    pub fn play(&self) {
        let _ = self.cmd_tx.send(PlayerCommand::Play);
    }

    pub fn pause(&self) {
        let _ = self.cmd_tx.send(PlayerCommand::Pause);
    }

    /// Stop playback and seek to time zero. The position reads as zero
    /// immediately, without waiting for the decode thread.
    pub fn reset(&self) {
        self.position_ms.store(0, Ordering::SeqCst);
        let _ = self.cmd_tx.send(PlayerCommand::Reset);
    }

    pub fn position(&self) -> Duration {
        Duration::from_millis(self.position_ms.load(Ordering::SeqCst))
    }
}

impl Drop for ReferencePlayer {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(PlayerCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_playback_loop(
    mut source: Box<dyn ClipSource>,
    cmd_rx: Receiver<PlayerCommand>,
    frame_tx: Sender<Frame>,
    position_ms: Arc<AtomicU64>,
) {
    let interval = source.frame_interval();
    let mut playing = false;

    loop {
        let timeout = if playing { interval } else { PAUSED_POLL };
        match cmd_rx.recv_timeout(timeout) {
            Ok(PlayerCommand::Play) => playing = true,
            Ok(PlayerCommand::Pause) => playing = false,
            Ok(PlayerCommand::Reset) => {
                playing = false;
                position_ms.store(0, Ordering::SeqCst);
                if let Err(err) = source.rewind() {
                    log::warn!("failed to rewind reference clip: {err:?}");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if playing {
                    playing = step(source.as_mut(), &frame_tx, &position_ms, interval);
                }
            }
            Ok(PlayerCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Decode and publish one frame, looping back to the start of the clip at
/// end of stream. Returns false when the source is beyond recovery.
fn step(
    source: &mut dyn ClipSource,
    frame_tx: &Sender<Frame>,
    position_ms: &AtomicU64,
    interval: Duration,
) -> bool {
    let frame = match source.next_frame() {
        Ok(Some(frame)) => Some(frame),
        Ok(None) => {
            // Loop-to-start behavior.
            position_ms.store(0, Ordering::SeqCst);
            match source.rewind().and_then(|()| source.next_frame()) {
                Ok(frame) => frame,
                Err(err) => {
                    log::warn!("reference clip restart failed: {err:?}");
                    return false;
                }
            }
        }
        Err(err) => {
            log::warn!("reference clip decode failed: {err:?}");
            return false;
        }
    };

    if let Some(frame) = frame {
        position_ms.fetch_add(interval.as_millis() as u64, Ordering::SeqCst);
        // Drop the frame if the session is still busy with the last one.
        let _ = frame_tx.try_send(frame);
    }
    true
}

#[cfg(feature = "reference-ffmpeg")]
mod ffmpeg_clip {
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use anyhow::{Context as _, Result};
    use ffmpeg_next as ffmpeg;

    use super::{ClipSource, MediaError};
    use crate::types::Frame;

    const FALLBACK_FPS: f64 = 30.0;

    pub(super) struct FfmpegClipSource {
        path: PathBuf,
        input: ffmpeg::format::context::Input,
        stream_index: usize,
        decoder: ffmpeg::codec::decoder::Video,
        scaler: ffmpeg::software::scaling::Context,
        interval: Duration,
    }

    impl FfmpegClipSource {
        pub(super) fn open(path: &Path) -> Result<Self, MediaError> {
            Self::build(path).map_err(|err| MediaError::Load(format!("{err:#}")))
        }

        fn build(path: &Path) -> Result<Self> {
            ffmpeg::init().context("initialize ffmpeg")?;
            let input = ffmpeg::format::input(&path)
                .with_context(|| format!("failed to open clip {}", path.display()))?;
            let stream = input
                .streams()
                .best(ffmpeg::media::Type::Video)
                .ok_or_else(|| anyhow::anyhow!("clip has no video track"))?;
            let stream_index = stream.index();

            let rate = stream.avg_frame_rate();
            let fps = if rate.denominator() > 0 && rate.numerator() > 0 {
                rate.numerator() as f64 / rate.denominator() as f64
            } else {
                FALLBACK_FPS
            };
            let interval = Duration::from_secs_f64(1.0 / fps);

            let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                .context("load clip decoder parameters")?;
            let decoder = context
                .decoder()
                .video()
                .context("open ffmpeg video decoder")?;

            let scaler = ffmpeg::software::scaling::context::Context::get(
                decoder.format(),
                decoder.width(),
                decoder.height(),
                ffmpeg::util::format::pixel::Pixel::RGBA,
                decoder.width(),
                decoder.height(),
                ffmpeg::software::scaling::flag::Flags::BILINEAR,
            )
            .context("create ffmpeg scaler")?;

            Ok(Self {
                path: path.to_path_buf(),
                input,
                stream_index,
                decoder,
                scaler,
                interval,
            })
        }
    }

    impl ClipSource for FfmpegClipSource {
        fn next_frame(&mut self) -> Result<Option<Frame>> {
            let mut decoded = ffmpeg::frame::Video::empty();
            let mut rgba_frame = ffmpeg::frame::Video::empty();

            for (stream, packet) in self.input.packets() {
                if stream.index() != self.stream_index {
                    continue;
                }

                self.decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?;

                if self.decoder.receive_frame(&mut decoded).is_ok() {
                    self.scaler
                        .run(&decoded, &mut rgba_frame)
                        .context("scale clip frame to RGBA")?;
                    let (pixels, width, height) = frame_to_pixels(&rgba_frame)?;
                    return Ok(Some(Frame::new(pixels, width, height)));
                }
            }

            // Demuxer exhausted: the clip is over.
            Ok(None)
        }

        fn rewind(&mut self) -> Result<()> {
            // Reopening is simpler and more reliable than seeking every
            // container format back to its first keyframe.
            let fresh = Self::build(&self.path)?;
            *self = fresh;
            Ok(())
        }

        fn frame_interval(&self) -> Duration {
            self.interval
        }
    }

    fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
        let width = frame.width();
        let height = frame.height();
        let row_bytes = (width as usize) * 4;
        let stride = frame.stride(0);
        let data = frame.data(0);

        if stride == row_bytes {
            return Ok((data.to_vec(), width, height));
        }

        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            let end = start + row_bytes;
            pixels.extend_from_slice(
                data.get(start..end)
                    .context("ffmpeg frame row is out of bounds")?,
            );
        }

        Ok((pixels, width, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    struct CountingClip {
        cursor: usize,
        len: usize,
    }

    impl CountingClip {
        fn new(len: usize) -> Self {
            Self { cursor: 0, len }
        }
    }

    impl ClipSource for CountingClip {
        fn next_frame(&mut self) -> Result<Option<Frame>> {
            if self.cursor >= self.len {
                return Ok(None);
            }
            let tag = self.cursor as u8;
            self.cursor += 1;
            Ok(Some(Frame::new(vec![tag, 0, 0, 255], 1, 1)))
        }

        fn rewind(&mut self) -> Result<()> {
            self.cursor = 0;
            Ok(())
        }

        fn frame_interval(&self) -> Duration {
            Duration::from_millis(1)
        }
    }

    fn collect_frames(rx: &Receiver<Frame>, count: usize) -> Vec<u8> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut tags = Vec::new();
        while tags.len() < count && Instant::now() < deadline {
            if let Ok(frame) = rx.recv_timeout(Duration::from_millis(100)) {
                tags.push(frame.rgba[0]);
            }
        }
        tags
    }

    #[test]
    fn playback_loops_back_to_the_first_frame() {
        let (player, frame_rx) = ReferencePlayer::spawn(Box::new(CountingClip::new(3)));
        player.play();

        // Seeing the first frame twice proves the clip wrapped around.
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut first_frame_seen = 0;
        while first_frame_seen < 2 && Instant::now() < deadline {
            if let Ok(frame) = frame_rx.recv_timeout(Duration::from_millis(100)) {
                if frame.rgba[0] == 0 {
                    first_frame_seen += 1;
                }
            }
        }
        assert_eq!(first_frame_seen, 2, "clip never looped back to the start");
    }

    #[test]
    fn reset_rewinds_position_to_zero() {
        let (player, frame_rx) = ReferencePlayer::spawn(Box::new(CountingClip::new(100)));
        player.play();
        let _ = collect_frames(&frame_rx, 5);
        assert!(player.position() > Duration::ZERO);

        player.reset();
        // An in-flight decode step may still bump the counter once; the
        // reset command itself zeroes it again on the playback thread.
        let deadline = Instant::now() + Duration::from_secs(1);
        while player.position() != Duration::ZERO && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(player.position(), Duration::ZERO);
    }

    #[test]
    fn pause_stops_frame_production() {
        let (player, frame_rx) = ReferencePlayer::spawn(Box::new(CountingClip::new(100)));
        player.play();
        let _ = collect_frames(&frame_rx, 3);

        player.pause();
        // Let the pause land, then flush anything already in flight.
        std::thread::sleep(Duration::from_millis(50));
        while frame_rx.try_recv().is_ok() {}

        std::thread::sleep(Duration::from_millis(50));
        assert!(frame_rx.try_recv().is_err());
    }
}
