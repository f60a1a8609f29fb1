use crate::types::{Frame, Pose};

/// Keypoints at or below this score are omitted entirely; bones require
/// both endpoints above it.
pub const CONFIDENCE_THRESHOLD: f32 = 0.3;

const LINE_COLOR: [u8; 4] = [56, 189, 248, 255];
const POINT_COLOR: [u8; 4] = [248, 113, 113, 255];
const LINE_THICKNESS: i32 = 3;
const POINT_RADIUS: i32 = 3;

/// Coordinate transform active while painting. Outside of a `render`
/// call this is always `Identity`; mirroring never leaks between calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transform {
    Identity,
    Mirrored,
}

/// A transparent RGBA drawing surface bound to one video feed. Its pixel
/// dimensions are re-synced to the feed's decoded resolution on every
/// render call, since camera resolution can change after stream start.
pub struct OverlaySurface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    transform: Transform,
}

impl OverlaySurface {
    pub fn new() -> Self {
        Self {
            width: 0,
            height: 0,
            pixels: Vec::new(),
            transform: Transform::Identity,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    fn resize_to(&mut self, width: u32, height: u32) {
        if self.width != width || self.height != height {
            self.width = width;
            self.height = height;
            self.pixels = vec![0u8; (width as usize) * (height as usize) * 4];
        }
    }

    fn clear(&mut self) {
        self.pixels.fill(0);
    }

    fn map_x(&self, x: f32) -> f32 {
        match self.transform {
            Transform::Identity => x,
            Transform::Mirrored => self.width.saturating_sub(1) as f32 - x,
        }
    }
}

impl Default for OverlaySurface {
    fn default() -> Self {
        Self::new()
    }
}

/// Paint every detected pose onto the surface: a filled circle per
/// keypoint above [`CONFIDENCE_THRESHOLD`], a bone per topology pair
/// whose endpoints are both above it. The surface is resized to the
/// feed's dimensions and cleared first, so painting nothing is how an
/// empty pose list renders.
pub fn render(
    surface: &mut OverlaySurface,
    poses: &[Pose],
    frame_width: u32,
    frame_height: u32,
    connections: &[(usize, usize)],
    mirrored: bool,
) {
    surface.resize_to(frame_width, frame_height);
    surface.clear();

    surface.transform = if mirrored {
        Transform::Mirrored
    } else {
        Transform::Identity
    };

    for pose in poses {
        for &(a, b) in connections {
            let (Some(ka), Some(kb)) = (pose.keypoints.get(a), pose.keypoints.get(b)) else {
                continue;
            };
            if ka.score <= CONFIDENCE_THRESHOLD || kb.score <= CONFIDENCE_THRESHOLD {
                continue;
            }
            let pa = (surface.map_x(ka.x), ka.y);
            let pb = (surface.map_x(kb.x), kb.y);
            draw_line(surface, &pa, &pb, LINE_COLOR, LINE_THICKNESS);
        }

        for keypoint in &pose.keypoints {
            if keypoint.score <= CONFIDENCE_THRESHOLD {
                continue;
            }
            let center = (surface.map_x(keypoint.x) as i32, keypoint.y as i32);
            draw_circle(surface, center, POINT_RADIUS, POINT_COLOR);
        }
    }

    surface.transform = Transform::Identity;
}

/// Blend the surface over a video frame for presentation, optionally
/// flipping the video horizontally (the webcam selfie view). The overlay
/// itself is painted pre-mirrored by `render`, so only the video flips.
pub fn composite(frame: &Frame, surface: &OverlaySurface, flip_video: bool) -> Frame {
    let mut out = if flip_video {
        mirror_frame(frame)
    } else {
        frame.clone()
    };

    if surface.width != frame.width || surface.height != frame.height {
        // Surface was rendered against different dimensions; present the
        // bare video rather than a misaligned skeleton.
        return out;
    }

    for (dst, src) in out.rgba.chunks_exact_mut(4).zip(surface.pixels.chunks_exact(4)) {
        let alpha = src[3] as u32;
        if alpha == 0 {
            continue;
        }
        let inv = 255 - alpha;
        for c in 0..3 {
            dst[c] = ((src[c] as u32 * alpha + dst[c] as u32 * inv) / 255) as u8;
        }
    }

    out
}

/// Horizontally flip a frame's pixels.
pub fn mirror_frame(frame: &Frame) -> Frame {
    let mut mirrored = frame.clone();
    let row_px = frame.width as usize;
    for row in mirrored.rgba.chunks_exact_mut(row_px * 4) {
        for left in 0..row_px / 2 {
            let right = row_px - 1 - left;
            for c in 0..4 {
                row.swap(left * 4 + c, right * 4 + c);
            }
        }
    }
    mirrored
}

fn draw_line(
    surface: &mut OverlaySurface,
    p0: &(f32, f32),
    p1: &(f32, f32),
    color: [u8; 4],
    thickness: i32,
) {
    let (mut x0, mut y0) = (p0.0 as i32, p0.1 as i32);
    let (x1, y1) = (p1.0 as i32, p1.1 as i32);
    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let radius = (thickness.max(1) - 1) / 2;

    loop {
        put_pixel_safe(surface, x0, y0, color);
        if radius > 0 {
            for ox in -radius..=radius {
                for oy in -radius..=radius {
                    if ox == 0 && oy == 0 {
                        continue;
                    }
                    if ox.abs() + oy.abs() <= radius {
                        put_pixel_safe(surface, x0 + ox, y0 + oy, color);
                    }
                }
            }
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn draw_circle(surface: &mut OverlaySurface, center: (i32, i32), radius: i32, color: [u8; 4]) {
    let (cx, cy) = center;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put_pixel_safe(surface, cx + dx, cy + dy, color);
            }
        }
    }
}

fn put_pixel_safe(surface: &mut OverlaySurface, x: i32, y: i32, color: [u8; 4]) {
    if x < 0 || y < 0 {
        return;
    }
    let (ux, uy) = (x as u32, y as u32);
    if ux >= surface.width || uy >= surface.height {
        return;
    }
    let idx = ((uy * surface.width + ux) as usize) * 4;
    if idx + 3 < surface.pixels.len() {
        surface.pixels[idx..idx + 4].copy_from_slice(&color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{KEYPOINT_KINDS, Keypoint, Pose};

    fn pose(points: &[(f32, f32, f32)]) -> Pose {
        let keypoints = points
            .iter()
            .enumerate()
            .map(|(i, &(x, y, score))| Keypoint {
                kind: KEYPOINT_KINDS[i],
                x,
                y,
                score,
            })
            .collect();
        Pose {
            keypoints,
            score: 1.0,
        }
    }

    fn pixel(surface: &OverlaySurface, x: u32, y: u32) -> [u8; 4] {
        let idx = ((y * surface.width() + x) as usize) * 4;
        let px = &surface.pixels()[idx..idx + 4];
        [px[0], px[1], px[2], px[3]]
    }

    fn is_blank(surface: &OverlaySurface, x: u32, y: u32) -> bool {
        pixel(surface, x, y) == [0, 0, 0, 0]
    }

    #[test]
    fn keypoint_at_threshold_is_not_drawn() {
        let mut surface = OverlaySurface::new();
        render(
            &mut surface,
            &[pose(&[(8.0, 8.0, CONFIDENCE_THRESHOLD)])],
            16,
            16,
            &[],
            false,
        );
        assert!(surface.pixels().iter().all(|&b| b == 0));
    }

    #[test]
    fn keypoint_above_threshold_is_drawn() {
        let mut surface = OverlaySurface::new();
        render(&mut surface, &[pose(&[(8.0, 8.0, 0.31)])], 16, 16, &[], false);
        assert!(!is_blank(&surface, 8, 8));
    }

    #[test]
    fn low_confidence_endpoint_suppresses_the_bone() {
        // One strong keypoint at (10,10), one weak at (20,10), connected.
        let mut surface = OverlaySurface::new();
        render(
            &mut surface,
            &[pose(&[(10.0, 10.0, 0.9), (20.0, 10.0, 0.1)])],
            32,
            16,
            &[(0, 1)],
            false,
        );

        assert!(!is_blank(&surface, 10, 10), "strong keypoint missing");
        assert!(is_blank(&surface, 20, 10), "weak keypoint was drawn");
        assert!(is_blank(&surface, 15, 10), "bone drawn despite weak end");
    }

    #[test]
    fn bone_is_drawn_when_both_endpoints_are_confident() {
        let mut surface = OverlaySurface::new();
        render(
            &mut surface,
            &[pose(&[(10.0, 10.0, 0.9), (20.0, 10.0, 0.8)])],
            32,
            16,
            &[(0, 1)],
            false,
        );
        assert!(!is_blank(&surface, 15, 10));
    }

    #[test]
    fn zero_poses_clears_previous_content() {
        let mut surface = OverlaySurface::new();
        render(&mut surface, &[pose(&[(8.0, 8.0, 0.9)])], 16, 16, &[], false);
        assert!(!is_blank(&surface, 8, 8));

        render(&mut surface, &[], 16, 16, &[], false);
        assert!(surface.pixels().iter().all(|&b| b == 0));
    }

    #[test]
    fn surface_tracks_video_dimensions_every_call() {
        let mut surface = OverlaySurface::new();
        render(&mut surface, &[], 8, 6, &[], false);
        assert_eq!((surface.width(), surface.height()), (8, 6));

        render(&mut surface, &[], 16, 12, &[], false);
        assert_eq!((surface.width(), surface.height()), (16, 12));
        assert_eq!(surface.pixels().len(), 16 * 12 * 4);
    }

    #[test]
    fn mirroring_flips_about_the_surface_width() {
        let mut surface = OverlaySurface::new();
        render(&mut surface, &[pose(&[(2.0, 5.0, 0.9)])], 10, 10, &[], true);

        // width 10: x=2 lands at 10-1-2 = 7.
        assert!(!is_blank(&surface, 7, 5));
        assert!(is_blank(&surface, 2, 5));
    }

    #[test]
    fn mirrored_render_restores_the_identity_transform() {
        let mut surface = OverlaySurface::new();
        assert_eq!(surface.transform(), Transform::Identity);

        render(&mut surface, &[pose(&[(2.0, 5.0, 0.9)])], 10, 10, &[], true);
        assert_eq!(surface.transform(), Transform::Identity);
    }

    #[test]
    fn render_is_idempotent() {
        let poses = [pose(&[(4.0, 4.0, 0.9), (12.0, 9.0, 0.8)])];
        let mut first = OverlaySurface::new();
        render(&mut first, &poses, 16, 16, &[(0, 1)], true);
        let snapshot = first.pixels().to_vec();

        render(&mut first, &poses, 16, 16, &[(0, 1)], true);
        assert_eq!(first.pixels(), snapshot.as_slice());
    }

    #[test]
    fn composite_blends_overlay_over_video() {
        let mut surface = OverlaySurface::new();
        render(&mut surface, &[pose(&[(2.0, 2.0, 0.9)])], 8, 8, &[], false);

        let video = Frame::new(vec![10u8; 8 * 8 * 4], 8, 8);
        let out = composite(&video, &surface, false);

        let idx = ((2 * 8 + 2) as usize) * 4;
        assert_eq!(out.rgba[idx], POINT_COLOR[0]);
        // Pixels without overlay keep the video content.
        assert_eq!(out.rgba[0], 10);
    }

    #[test]
    fn composite_skips_mismatched_surface() {
        let mut surface = OverlaySurface::new();
        render(&mut surface, &[pose(&[(2.0, 2.0, 0.9)])], 8, 8, &[], false);

        let video = Frame::new(vec![10u8; 4 * 4 * 4], 4, 4);
        let out = composite(&video, &surface, false);
        assert!(out.rgba.iter().all(|&b| b == 10));
    }

    #[test]
    fn mirror_frame_swaps_columns() {
        let mut rgba = vec![0u8; 2 * 1 * 4];
        rgba[0] = 200; // left pixel R
        let frame = Frame::new(rgba, 2, 1);

        let flipped = mirror_frame(&frame);
        assert_eq!(flipped.rgba[4], 200);
        assert_eq!(flipped.rgba[0], 0);
    }
}
