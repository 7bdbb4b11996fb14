//! VP8 frame buffers and reference frame management.
//!
//! Working buffers are macroblock-aligned and carry a replicated border
//! on every side so motion compensation can read out-of-frame positions
//! without per-access emulation. Reference slots hold shared handles to
//! finished frames; refreshing a slot swaps the handle, never copies
//! pixels.

use std::sync::Arc;

/// Border width in pixels around every plane.
pub const EDGE: usize = 32;

/// VP8 frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vp8FrameType {
    /// Key frame (intra-coded).
    KeyFrame = 0,
    /// Inter frame (predicted).
    InterFrame = 1,
}

/// VP8 color space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vp8ColorSpace {
    /// BT.601 (standard definition).
    Bt601 = 0,
    /// Reserved.
    Reserved = 1,
}

/// Reference frame selector for inter prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefFrame {
    /// Intra-coded, no reference.
    Intra,
    /// Most recently decoded frame.
    Last,
    /// Golden frame.
    Golden,
    /// Alternate reference frame.
    AltRef,
}

/// One bordered pixel plane.
#[derive(Clone)]
pub struct Plane {
    data: Vec<u8>,
    stride: usize,
    width: usize,
    height: usize,
    origin: usize,
}

impl Plane {
    fn new(width: usize, height: usize) -> Self {
        let stride = width + 2 * EDGE;
        let origin = EDGE * stride + EDGE;
        Self {
            data: vec![128u8; stride * (height + 2 * EDGE)],
            stride,
            width,
            height,
            origin,
        }
    }

    /// Padded row stride in bytes.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Coded plane width (macroblock aligned).
    pub fn width(&self) -> usize {
        self.width
    }

    /// Coded plane height (macroblock aligned).
    pub fn height(&self) -> usize {
        self.height
    }

    /// Index of pixel (x, y) in the padded buffer. Coordinates may reach
    /// up to `EDGE` pixels outside the coded area on any side.
    pub fn offset(&self, x: isize, y: isize) -> usize {
        (self.origin as isize + y * self.stride as isize + x) as usize
    }

    /// Full padded buffer.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Full padded buffer, mutable.
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Replicate the outermost coded pixels into the border apron.
    pub fn extend_borders(&mut self) {
        for y in 0..self.height {
            let row = self.origin + y * self.stride;
            let left = self.data[row];
            let right = self.data[row + self.width - 1];
            self.data[row - EDGE..row].fill(left);
            self.data[row + self.width..row + self.width + EDGE].fill(right);
        }
        let top = self.origin - EDGE;
        for y in 0..EDGE {
            let dst = y * self.stride;
            self.data.copy_within(top..top + self.stride, dst);
        }
        let bottom = self.origin + (self.height - 1) * self.stride - EDGE;
        for y in 0..EDGE {
            let dst = bottom + (y + 1) * self.stride;
            self.data.copy_within(bottom..bottom + self.stride, dst);
        }
    }
}

/// Bordered YV12 working buffer for one frame.
#[derive(Clone)]
pub struct FrameBuffer {
    /// Luma plane.
    pub y: Plane,
    /// Cb plane.
    pub u: Plane,
    /// Cr plane.
    pub v: Plane,
    /// Display width in pixels.
    pub width: u16,
    /// Display height in pixels.
    pub height: u16,
    /// Width in macroblocks.
    pub mb_w: usize,
    /// Height in macroblocks.
    pub mb_h: usize,
}

impl FrameBuffer {
    /// Allocate a buffer for the given display dimensions.
    pub fn new(width: u16, height: u16) -> Self {
        let mb_w = (usize::from(width) + 15) / 16;
        let mb_h = (usize::from(height) + 15) / 16;
        Self {
            y: Plane::new(mb_w * 16, mb_h * 16),
            u: Plane::new(mb_w * 8, mb_h * 8),
            v: Plane::new(mb_w * 8, mb_h * 8),
            width,
            height,
            mb_w,
            mb_h,
        }
    }

    /// Replicate edges on all three planes.
    pub fn extend_borders(&mut self) {
        self.y.extend_borders();
        self.u.extend_borders();
        self.v.extend_borders();
    }
}

/// The three reference frame slots.
#[derive(Default, Clone)]
pub struct ReferenceFrames {
    /// Most recently refreshed frame.
    pub last: Option<Arc<FrameBuffer>>,
    /// Golden frame.
    pub golden: Option<Arc<FrameBuffer>>,
    /// Alternate reference frame.
    pub altref: Option<Arc<FrameBuffer>>,
}

impl ReferenceFrames {
    /// Fetch the slot for an inter reference. `Intra` has no slot.
    pub fn get(&self, which: RefFrame) -> Option<&Arc<FrameBuffer>> {
        match which {
            RefFrame::Intra => None,
            RefFrame::Last => self.last.as_ref(),
            RefFrame::Golden => self.golden.as_ref(),
            RefFrame::AltRef => self.altref.as_ref(),
        }
    }

    /// Drop all references (stream reset).
    pub fn clear(&mut self) {
        self.last = None;
        self.golden = None;
        self.altref = None;
    }
}

/// VP8 decoded output frame, cropped to display dimensions.
#[derive(Debug, Clone)]
pub struct Vp8Frame {
    /// Frame width.
    pub width: u32,
    /// Frame height.
    pub height: u32,
    /// Frame type.
    pub frame_type: Vp8FrameType,
    /// Color space signalled by the stream's keyframes.
    pub color_space: Vp8ColorSpace,
    /// Y plane (luma).
    pub y_plane: Vec<u8>,
    /// U plane (chroma Cb).
    pub u_plane: Vec<u8>,
    /// V plane (chroma Cr).
    pub v_plane: Vec<u8>,
    /// Y plane stride.
    pub y_stride: usize,
    /// UV plane stride.
    pub uv_stride: usize,
    /// Is visible (show_frame).
    pub visible: bool,
}

impl Vp8Frame {
    /// Copy the coded pixels out of a working buffer.
    pub(crate) fn from_buffer(
        buf: &FrameBuffer,
        frame_type: Vp8FrameType,
        color_space: Vp8ColorSpace,
        visible: bool,
    ) -> Self {
        let width = usize::from(buf.width);
        let height = usize::from(buf.height);
        let uv_width = (width + 1) / 2;
        let uv_height = (height + 1) / 2;

        let copy_plane = |plane: &Plane, w: usize, h: usize| {
            let mut out = vec![0u8; w * h];
            for y in 0..h {
                let src = plane.offset(0, y as isize);
                out[y * w..(y + 1) * w].copy_from_slice(&plane.pixels()[src..src + w]);
            }
            out
        };

        Self {
            width: width as u32,
            height: height as u32,
            frame_type,
            color_space,
            y_plane: copy_plane(&buf.y, width, height),
            u_plane: copy_plane(&buf.u, uv_width, uv_height),
            v_plane: copy_plane(&buf.v, uv_width, uv_height),
            y_stride: width,
            uv_stride: uv_width,
            visible,
        }
    }

    /// Get Y plane data.
    pub fn y_data(&self) -> &[u8] {
        &self.y_plane
    }

    /// Get U plane data.
    pub fn u_data(&self) -> &[u8] {
        &self.u_plane
    }

    /// Get V plane data.
    pub fn v_data(&self) -> &[u8] {
        &self.v_plane
    }

    /// Get pixel at (x, y) in Y plane.
    pub fn get_y(&self, x: usize, y: usize) -> u8 {
        self.y_plane[y * self.y_stride + x]
    }

    /// Get pixel at (x, y) in U plane.
    pub fn get_u(&self, x: usize, y: usize) -> u8 {
        self.u_plane[y * self.uv_stride + x]
    }

    /// Get pixel at (x, y) in V plane.
    pub fn get_v(&self, x: usize, y: usize) -> u8 {
        self.v_plane[y * self.uv_stride + x]
    }

    /// Get total size in bytes.
    pub fn size(&self) -> usize {
        self.y_plane.len() + self.u_plane.len() + self.v_plane.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_is_macroblock_aligned() {
        let buf = FrameBuffer::new(320, 240);
        assert_eq!(buf.mb_w, 20);
        assert_eq!(buf.mb_h, 15);
        assert_eq!(buf.y.width(), 320);
        assert_eq!(buf.u.width(), 160);

        let odd = FrameBuffer::new(17, 31);
        assert_eq!(odd.mb_w, 2);
        assert_eq!(odd.mb_h, 2);
        assert_eq!(odd.y.width(), 32);
        assert_eq!(odd.y.height(), 32);
    }

    #[test]
    fn border_extension_replicates_edges() {
        let mut buf = FrameBuffer::new(16, 16);
        let plane = &mut buf.y;
        let stride = plane.stride();

        let top_left = plane.offset(0, 0);
        plane.pixels_mut()[top_left] = 7;
        let bottom_right = plane.offset(15, 15);
        plane.pixels_mut()[bottom_right] = 200;
        plane.extend_borders();

        // Corners of the apron replicate the corner pixels.
        assert_eq!(plane.pixels()[plane.offset(-1, 0)], 7);
        assert_eq!(plane.pixels()[plane.offset(0, -1)], 7);
        assert_eq!(
            plane.pixels()[plane.offset(-(EDGE as isize), -(EDGE as isize))],
            7
        );
        assert_eq!(plane.pixels()[plane.offset(16, 15)], 200);
        assert_eq!(plane.pixels()[plane.offset(15, 16)], 200);
        assert_eq!(
            plane.pixels()[plane.offset(15 + EDGE as isize, 15 + EDGE as isize)],
            200
        );
        let _ = stride;
    }

    #[test]
    fn output_frame_is_cropped_to_display_size() {
        let mut buf = FrameBuffer::new(17, 13);
        let idx = buf.y.offset(16, 12);
        buf.y.pixels_mut()[idx] = 99;
        let frame = Vp8Frame::from_buffer(&buf, Vp8FrameType::KeyFrame, Vp8ColorSpace::Bt601, true);
        assert_eq!(frame.width, 17);
        assert_eq!(frame.color_space, Vp8ColorSpace::Bt601);
        assert_eq!(frame.height, 13);
        assert_eq!(frame.y_plane.len(), 17 * 13);
        assert_eq!(frame.get_y(16, 12), 99);
        assert_eq!(frame.u_plane.len(), 9 * 7);
    }

    #[test]
    fn reference_slots_share_storage() {
        let buf = Arc::new(FrameBuffer::new(32, 32));
        let mut refs = ReferenceFrames::default();
        refs.last = Some(Arc::clone(&buf));
        refs.golden = Some(Arc::clone(&buf));
        assert_eq!(Arc::strong_count(&buf), 3);
        assert!(refs.get(RefFrame::Intra).is_none());
        refs.clear();
        assert_eq!(Arc::strong_count(&buf), 1);
    }
}
