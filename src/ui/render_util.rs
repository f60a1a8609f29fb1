use super::{Arc, ImageBuffer, ImageFrame, RenderImage, Rgba};
use crate::types::Frame;

/// Wrap a presented session frame for the GPU. The skeleton is already
/// painted into the pixels by the session pipeline.
pub(super) fn frame_to_image(frame: &Frame) -> Option<Arc<RenderImage>> {
    let mut rgba = frame.rgba.clone();

    // GPUI expects BGRA; convert in place to avoid the async asset pipeline and flicker.
    for px in rgba.chunks_exact_mut(4) {
        px.swap(0, 2);
    }

    let buffer = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(frame.width, frame.height, rgba)?;
    let frame = ImageFrame::new(buffer);

    Some(Arc::new(RenderImage::new(vec![frame])))
}
