//! Inter prediction: motion compensation from reference frames.
//!
//! Bitstream version 0 interpolates with the six-tap filter bank, later
//! versions with the bilinear one. Vectors are stored in quarter-pel
//! luma units; luma sampling doubles them to eighth-pel, chroma uses the
//! averaged luma vectors directly since the plane is half resolution.
//! Out-of-frame reads clamp into the replicated border apron, which is
//! equivalent to unlimited edge replication.

use crate::frame::{FrameBuffer, Plane, EDGE};
use crate::modes::{MbInfo, ModeState, MotionVector};
use crate::tables::{MV_SPLIT, SIXTAP_FILTERS};

/// Interpolation filter selected by the bitstream version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McFilter {
    /// Six-tap filter bank (version 0).
    SixTap,
    /// Two-tap bilinear filter (versions 1 to 3).
    Bilinear,
}

impl McFilter {
    /// Filter used by a bitstream version.
    pub fn for_version(version: u8) -> Self {
        if version == 0 {
            Self::SixTap
        } else {
            Self::Bilinear
        }
    }
}

const WIN_STRIDE: usize = 32;

fn bilin(s0: u8, s1: u8, frac: usize) -> u8 {
    let a = (8 - frac) as i32;
    let b = frac as i32;
    ((a * i32::from(s0) + b * i32::from(s1) + 4) >> 3) as u8
}

fn sixtap(src: &[u8], off: usize, step: usize, frac: usize) -> u8 {
    let filt = &SIXTAP_FILTERS[frac];
    let mut val = 64i32;
    for (tap, &coef) in filt.iter().enumerate() {
        val += i32::from(src[off + tap * step]) * i32::from(coef);
    }
    (val >> 7).clamp(0, 255) as u8
}

/// Motion-compensate one square block from `src` into `dst`.
///
/// `mvx`/`mvy` are in eighth-pel units of the destination plane.
pub fn mc_block(
    dst: &mut Plane,
    src: &Plane,
    xpos: usize,
    ypos: usize,
    mvx: i16,
    mvy: i16,
    size: usize,
    filter: McFilter,
) {
    let doff = dst.offset(xpos as isize, ypos as isize);
    let dstride = dst.stride();

    if mvx == 0 && mvy == 0 {
        let soff = src.offset(xpos as isize, ypos as isize);
        let sstride = src.stride();
        for row in 0..size {
            let s = soff + row * sstride;
            let d = doff + row * dstride;
            dst.pixels_mut()[d..d + size].copy_from_slice(&src.pixels()[s..s + size]);
        }
        return;
    }

    let mx = (mvx & 7) as usize;
    let my = (mvy & 7) as usize;
    let ref_x = xpos as isize + (mvx >> 3) as isize;
    let ref_y = ypos as isize + (mvy >> 3) as isize;

    let pre = match filter {
        McFilter::SixTap => 2isize,
        McFilter::Bilinear => 0,
    };
    let ext = match filter {
        McFilter::SixTap => size + 6,
        McFilter::Bilinear => size + 1,
    };

    // Gather the filter window with coordinates clamped into the apron.
    let w = src.width() as isize;
    let h = src.height() as isize;
    let e = EDGE as isize;
    let mut win = [0u8; WIN_STRIDE * WIN_STRIDE];
    for wy in 0..ext {
        let sy = (ref_y - pre + wy as isize).clamp(-e, h + e - 1);
        for wx in 0..ext {
            let sx = (ref_x - pre + wx as isize).clamp(-e, w + e - 1);
            win[wy * WIN_STRIDE + wx] = src.pixels()[src.offset(sx, sy)];
        }
    }
    let pre = pre as usize;
    let dpx = dst.pixels_mut();

    match (mx, my) {
        (0, 0) => {
            let origin = pre * WIN_STRIDE + pre;
            for row in 0..size {
                let s = origin + row * WIN_STRIDE;
                let d = doff + row * dstride;
                dpx[d..d + size].copy_from_slice(&win[s..s + size]);
            }
        }
        (_, 0) => {
            let origin = pre * WIN_STRIDE;
            for row in 0..size {
                for x in 0..size {
                    let off = origin + row * WIN_STRIDE + x;
                    dpx[doff + row * dstride + x] = match filter {
                        McFilter::SixTap => sixtap(&win, off, 1, mx),
                        McFilter::Bilinear => bilin(win[off], win[off + 1], mx),
                    };
                }
            }
        }
        (0, _) => {
            let origin = pre;
            for row in 0..size {
                for x in 0..size {
                    let off = origin + row * WIN_STRIDE + x;
                    dpx[doff + row * dstride + x] = match filter {
                        McFilter::SixTap => sixtap(&win, off, WIN_STRIDE, my),
                        McFilter::Bilinear => bilin(win[off], win[off + WIN_STRIDE], my),
                    };
                }
            }
        }
        _ => {
            let mut tmp = [0u8; WIN_STRIDE * WIN_STRIDE];
            let rows = match filter {
                McFilter::SixTap => size + 6,
                McFilter::Bilinear => size + 1,
            };
            for row in 0..rows {
                for x in 0..size {
                    let off = row * WIN_STRIDE + x;
                    tmp[off] = match filter {
                        McFilter::SixTap => sixtap(&win, off, 1, mx),
                        McFilter::Bilinear => bilin(win[off], win[off + 1], mx),
                    };
                }
            }
            for row in 0..size {
                for x in 0..size {
                    let off = row * WIN_STRIDE + x;
                    dpx[doff + row * dstride + x] = match filter {
                        McFilter::SixTap => sixtap(&tmp, off, WIN_STRIDE, my),
                        McFilter::Bilinear => bilin(tmp[off], tmp[off + WIN_STRIDE], my),
                    };
                }
            }
        }
    }
}

fn chroma_split_mv(modes: &ModeState, mb_x: usize, mb_y: usize, cx: usize, cy: usize) -> MotionVector {
    let mut sx = 0i32;
    let mut sy = 0i32;
    for by in 0..2 {
        for bx in 0..2 {
            let mv = modes.mv_at(mb_x, mb_y, cx * 2 + bx, cy * 2 + by);
            sx += i32::from(mv.x);
            sy += i32::from(mv.y);
        }
    }
    let round = |s: i32| -> i16 { ((s + if s < 0 { 1 } else { 2 }) >> 2) as i16 };
    MotionVector {
        x: round(sx),
        y: round(sy),
    }
}

/// Motion-compensate one inter macroblock into the current frame.
pub fn predict_inter_mb(
    frame: &mut FrameBuffer,
    reference: &FrameBuffer,
    modes: &ModeState,
    mb_x: usize,
    mb_y: usize,
    info: &MbInfo,
    version: u8,
) {
    let filter = McFilter::for_version(version);
    let full_pel_chroma = version == 3;

    if info.inter_mode != MV_SPLIT {
        mc_block(
            &mut frame.y,
            &reference.y,
            mb_x * 16,
            mb_y * 16,
            info.mv.x * 2,
            info.mv.y * 2,
            16,
            filter,
        );
        let mut cmv = info.mv;
        if full_pel_chroma {
            cmv.x &= !7;
            cmv.y &= !7;
        }
        mc_block(
            &mut frame.u,
            &reference.u,
            mb_x * 8,
            mb_y * 8,
            cmv.x,
            cmv.y,
            8,
            filter,
        );
        mc_block(
            &mut frame.v,
            &reference.v,
            mb_x * 8,
            mb_y * 8,
            cmv.x,
            cmv.y,
            8,
            filter,
        );
    } else {
        for by in 0..4 {
            for bx in 0..4 {
                let mv = modes.mv_at(mb_x, mb_y, bx, by);
                mc_block(
                    &mut frame.y,
                    &reference.y,
                    mb_x * 16 + bx * 4,
                    mb_y * 16 + by * 4,
                    mv.x * 2,
                    mv.y * 2,
                    4,
                    filter,
                );
            }
        }
        for cy in 0..2 {
            for cx in 0..2 {
                let mut cmv = chroma_split_mv(modes, mb_x, mb_y, cx, cy);
                if full_pel_chroma {
                    cmv.x &= !7;
                    cmv.y &= !7;
                }
                mc_block(
                    &mut frame.u,
                    &reference.u,
                    mb_x * 8 + cx * 4,
                    mb_y * 8 + cy * 4,
                    cmv.x,
                    cmv.y,
                    4,
                    filter,
                );
                mc_block(
                    &mut frame.v,
                    &reference.v,
                    mb_x * 8 + cx * 4,
                    mb_y * 8 + cy * 4,
                    cmv.x,
                    cmv.y,
                    4,
                    filter,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_frame() -> FrameBuffer {
        let mut buf = FrameBuffer::new(32, 32);
        for y in 0..32isize {
            for x in 0..32isize {
                let idx = buf.y.offset(x, y);
                buf.y.pixels_mut()[idx] = (x * 4 + y) as u8;
            }
        }
        buf.extend_borders();
        buf
    }

    #[test]
    fn zero_vector_copies_source() {
        let src = gradient_frame();
        let mut dst = FrameBuffer::new(32, 32);
        mc_block(&mut dst.y, &src.y, 16, 0, 0, 0, 16, McFilter::Bilinear);
        for y in 0..16isize {
            for x in 16..32isize {
                assert_eq!(
                    dst.y.pixels()[dst.y.offset(x, y)],
                    src.y.pixels()[src.y.offset(x, y)]
                );
            }
        }
    }

    #[test]
    fn whole_pel_motion_shifts_block() {
        let src = gradient_frame();
        let mut dst = FrameBuffer::new(32, 32);
        // One pixel right, two down, no fractional part.
        mc_block(&mut dst.y, &src.y, 8, 8, 8, 16, 8, McFilter::Bilinear);
        assert_eq!(
            dst.y.pixels()[dst.y.offset(8, 8)],
            src.y.pixels()[src.y.offset(9, 10)]
        );
    }

    #[test]
    fn half_pel_bilinear_averages_neighbors() {
        let src = gradient_frame();
        let mut dst = FrameBuffer::new(32, 32);
        mc_block(&mut dst.y, &src.y, 8, 8, 4, 0, 4, McFilter::Bilinear);
        let a = src.y.pixels()[src.y.offset(8, 8)];
        let b = src.y.pixels()[src.y.offset(9, 8)];
        assert_eq!(dst.y.pixels()[dst.y.offset(8, 8)], bilin(a, b, 4));
        assert_eq!(bilin(a, b, 4), ((u16::from(a) + u16::from(b) + 1) / 2) as u8);
    }

    #[test]
    fn sixtap_whole_pel_fraction_is_identity() {
        // Fraction 0 selects the [0, 0, 128, 0, 0, 0] filter.
        let src = gradient_frame();
        let mut dst = FrameBuffer::new(32, 32);
        mc_block(&mut dst.y, &src.y, 8, 8, 16, 0, 4, McFilter::SixTap);
        for y in 0..4isize {
            for x in 0..4isize {
                assert_eq!(
                    dst.y.pixels()[dst.y.offset(8 + x, 8 + y)],
                    src.y.pixels()[src.y.offset(10 + x, 8 + y)]
                );
            }
        }
    }

    #[test]
    fn out_of_frame_reads_replicate_edges() {
        let src = gradient_frame();
        let mut dst = FrameBuffer::new(32, 32);
        // Way past the left edge: every sample clamps to column 0.
        mc_block(&mut dst.y, &src.y, 0, 8, -640, 0, 4, McFilter::Bilinear);
        for y in 0..4isize {
            let edge = src.y.pixels()[src.y.offset(0, 8 + y)];
            for x in 0..4isize {
                assert_eq!(dst.y.pixels()[dst.y.offset(x, 8 + y)], edge);
            }
        }
    }

    #[test]
    fn split_chroma_vector_rounds_toward_zero() {
        let round = |s: i32| ((s + if s < 0 { 1 } else { 2 }) >> 2) as i16;
        assert_eq!(round(4 * 3), 3);
        assert_eq!(round(-4 * 3), -3);
        assert_eq!(round(5), 1);
        assert_eq!(round(-5), -1);
    }
}
