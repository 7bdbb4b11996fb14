//! Intra prediction and residual reconstruction.
//!
//! Each macroblock is predicted inside a small workspace holding the
//! block plus one row and column of context pixels. Off-frame context
//! is seeded with 127 above and 129 to the left. Subblock prediction
//! runs in raster order so that every 4x4 block sees the reconstructed
//! pixels of its neighbors, residue included.

use crate::frame::Plane;
use crate::modes::MbInfo;
use crate::tables::{
    B_HD_PRED, B_HE_PRED, B_HU_PRED, B_LD_PRED, B_PRED, B_RD_PRED, B_TM_PRED, B_VE_PRED,
    B_VL_PRED, B_VR_PRED, H_PRED, TM_PRED, V_PRED,
};
use crate::tokens::MbCoeffs;

const LUMA_STRIDE: usize = 1 + 16 + 4;
const LUMA_WS: usize = (1 + 16) * LUMA_STRIDE;
const CHROMA_STRIDE: usize = 1 + 8;
const CHROMA_WS: usize = (1 + 8) * CHROMA_STRIDE;

fn avg3(left: u8, this: u8, right: u8) -> u8 {
    ((u16::from(left) + 2 * u16::from(this) + u16::from(right) + 2) >> 2) as u8
}

fn avg2(this: u8, right: u8) -> u8 {
    ((u16::from(this) + u16::from(right) + 1) >> 1) as u8
}

/// Add a 4x4 residual block onto predicted pixels with clamping.
pub fn add_residue(pixels: &mut [u8], residual: &[i16; 16], y0: usize, x0: usize, stride: usize) {
    let mut pos = y0 * stride + x0;
    for row in residual.chunks(4) {
        for (p, &r) in pixels[pos..pos + 4].iter_mut().zip(row.iter()) {
            *p = (i32::from(*p) + i32::from(r)).clamp(0, 255) as u8;
        }
        pos += stride;
    }
}

/// Build the bordered luma workspace for one macroblock. The four
/// above-right pixels are duplicated onto rows 4, 8 and 12 so the
/// right-column subblocks below the top row see them as context.
fn luma_workspace(plane: &Plane, mb_x: usize, mb_y: usize, mb_w: usize) -> [u8; LUMA_WS] {
    let mut ws = [0u8; LUMA_WS];
    let px = plane.pixels();
    let x0 = mb_x as isize * 16;
    let y0 = mb_y as isize * 16;

    if mb_y == 0 {
        ws[1..LUMA_STRIDE].fill(127);
    } else {
        let above = plane.offset(x0, y0 - 1);
        ws[1..17].copy_from_slice(&px[above..above + 16]);
        if mb_x == mb_w - 1 {
            let last = px[above + 15];
            ws[17..LUMA_STRIDE].fill(last);
        } else {
            ws[17..LUMA_STRIDE].copy_from_slice(&px[above + 16..above + 20]);
        }
    }
    for i in 17..LUMA_STRIDE {
        ws[4 * LUMA_STRIDE + i] = ws[i];
        ws[8 * LUMA_STRIDE + i] = ws[i];
        ws[12 * LUMA_STRIDE + i] = ws[i];
    }

    if mb_x == 0 {
        for row in 0..16 {
            ws[(row + 1) * LUMA_STRIDE] = 129;
        }
    } else {
        for row in 0..16 {
            ws[(row + 1) * LUMA_STRIDE] = px[plane.offset(x0 - 1, y0 + row as isize)];
        }
    }

    ws[0] = if mb_y == 0 {
        127
    } else if mb_x == 0 {
        129
    } else {
        px[plane.offset(x0 - 1, y0 - 1)]
    };

    ws
}

fn chroma_workspace(plane: &Plane, mb_x: usize, mb_y: usize) -> [u8; CHROMA_WS] {
    let mut ws = [0u8; CHROMA_WS];
    let px = plane.pixels();
    let x0 = mb_x as isize * 8;
    let y0 = mb_y as isize * 8;

    if mb_y == 0 {
        ws[1..CHROMA_STRIDE].fill(127);
    } else {
        let above = plane.offset(x0, y0 - 1);
        ws[1..CHROMA_STRIDE].copy_from_slice(&px[above..above + 8]);
    }
    if mb_x == 0 {
        for row in 0..8 {
            ws[(row + 1) * CHROMA_STRIDE] = 129;
        }
    } else {
        for row in 0..8 {
            ws[(row + 1) * CHROMA_STRIDE] = px[plane.offset(x0 - 1, y0 + row as isize)];
        }
    }
    ws[0] = if mb_y == 0 {
        127
    } else if mb_x == 0 {
        129
    } else {
        px[plane.offset(x0 - 1, y0 - 1)]
    };
    ws
}

fn store_workspace(
    plane: &mut Plane,
    ws: &[u8],
    ws_stride: usize,
    mb_x: usize,
    mb_y: usize,
    size: usize,
) {
    let x0 = (mb_x * size) as isize;
    let y0 = (mb_y * size) as isize;
    for row in 0..size {
        let src = (row + 1) * ws_stride + 1;
        let dst = plane.offset(x0, y0 + row as isize);
        plane.pixels_mut()[dst..dst + size].copy_from_slice(&ws[src..src + size]);
    }
}

fn predict_vpred(ws: &mut [u8], size: usize, stride: usize) {
    for row in 0..size {
        for col in 0..size {
            ws[(row + 1) * stride + 1 + col] = ws[1 + col];
        }
    }
}

fn predict_hpred(ws: &mut [u8], size: usize, stride: usize) {
    for row in 0..size {
        let left = ws[(row + 1) * stride];
        for col in 0..size {
            ws[(row + 1) * stride + 1 + col] = left;
        }
    }
}

fn predict_dcpred(ws: &mut [u8], size: usize, stride: usize, above: bool, left: bool) {
    let mut sum = 0u32;
    let mut shift = if size == 8 { 2 } else { 3 };

    if left {
        for row in 0..size {
            sum += u32::from(ws[(row + 1) * stride]);
        }
        shift += 1;
    }
    if above {
        for col in 0..size {
            sum += u32::from(ws[1 + col]);
        }
        shift += 1;
    }

    let dc = if !left && !above {
        128
    } else {
        ((sum + (1 << (shift - 1))) >> shift) as u8
    };
    for row in 0..size {
        ws[(row + 1) * stride + 1..(row + 1) * stride + 1 + size].fill(dc);
    }
}

fn predict_tmpred(ws: &mut [u8], size: usize, x0: usize, y0: usize, stride: usize) {
    let p = i32::from(ws[(y0 - 1) * stride + x0 - 1]);
    for row in 0..size {
        let left = i32::from(ws[(y0 + row) * stride + x0 - 1]);
        for col in 0..size {
            let above = i32::from(ws[(y0 - 1) * stride + x0 + col]);
            ws[(y0 + row) * stride + x0 + col] = (left + above - p).clamp(0, 255) as u8;
        }
    }
}

fn topleft_pixel(ws: &[u8], x0: usize, y0: usize, stride: usize) -> u8 {
    ws[(y0 - 1) * stride + x0 - 1]
}

fn top_pixels(ws: &[u8], x0: usize, y0: usize, stride: usize) -> [u8; 8] {
    let pos = (y0 - 1) * stride + x0;
    ws[pos..pos + 8].try_into().unwrap()
}

fn left_pixels(ws: &[u8], x0: usize, y0: usize, stride: usize) -> [u8; 4] {
    [
        ws[y0 * stride + x0 - 1],
        ws[(y0 + 1) * stride + x0 - 1],
        ws[(y0 + 2) * stride + x0 - 1],
        ws[(y0 + 3) * stride + x0 - 1],
    ]
}

/// Pixels along the left and top edges, bottom-left to top-right.
fn edge_pixels(ws: &[u8], x0: usize, y0: usize, stride: usize) -> [u8; 9] {
    let pos = (y0 - 1) * stride + x0 - 1;
    [
        ws[pos + 4 * stride],
        ws[pos + 3 * stride],
        ws[pos + 2 * stride],
        ws[pos + stride],
        ws[pos],
        ws[pos + 1],
        ws[pos + 2],
        ws[pos + 3],
        ws[pos + 4],
    ]
}

fn predict_bdcpred(ws: &mut [u8], x0: usize, y0: usize, stride: usize) {
    let mut sum = 4u32;
    for col in 0..4 {
        sum += u32::from(ws[(y0 - 1) * stride + x0 + col]);
    }
    for row in 0..4 {
        sum += u32::from(ws[(y0 + row) * stride + x0 - 1]);
    }
    let dc = (sum >> 3) as u8;
    for row in 0..4 {
        ws[(y0 + row) * stride + x0..(y0 + row) * stride + x0 + 4].fill(dc);
    }
}

fn predict_bvepred(ws: &mut [u8], x0: usize, y0: usize, stride: usize) {
    let p = topleft_pixel(ws, x0, y0, stride);
    let a = top_pixels(ws, x0, y0, stride);
    let avg = [
        avg3(p, a[0], a[1]),
        avg3(a[0], a[1], a[2]),
        avg3(a[1], a[2], a[3]),
        avg3(a[2], a[3], a[4]),
    ];
    for row in 0..4 {
        ws[(y0 + row) * stride + x0..(y0 + row) * stride + x0 + 4].copy_from_slice(&avg);
    }
}

fn predict_bhepred(ws: &mut [u8], x0: usize, y0: usize, stride: usize) {
    let p = topleft_pixel(ws, x0, y0, stride);
    let l = left_pixels(ws, x0, y0, stride);
    let avg = [
        avg3(p, l[0], l[1]),
        avg3(l[0], l[1], l[2]),
        avg3(l[1], l[2], l[3]),
        avg3(l[2], l[3], l[3]),
    ];
    for (row, &val) in avg.iter().enumerate() {
        ws[(y0 + row) * stride + x0..(y0 + row) * stride + x0 + 4].fill(val);
    }
}

fn predict_bldpred(ws: &mut [u8], x0: usize, y0: usize, stride: usize) {
    let a = top_pixels(ws, x0, y0, stride);
    let avg = [
        avg3(a[0], a[1], a[2]),
        avg3(a[1], a[2], a[3]),
        avg3(a[2], a[3], a[4]),
        avg3(a[3], a[4], a[5]),
        avg3(a[4], a[5], a[6]),
        avg3(a[5], a[6], a[7]),
        avg3(a[6], a[7], a[7]),
    ];
    for row in 0..4 {
        ws[(y0 + row) * stride + x0..(y0 + row) * stride + x0 + 4]
            .copy_from_slice(&avg[row..row + 4]);
    }
}

fn predict_brdpred(ws: &mut [u8], x0: usize, y0: usize, stride: usize) {
    let e = edge_pixels(ws, x0, y0, stride);
    let avg = [
        avg3(e[0], e[1], e[2]),
        avg3(e[1], e[2], e[3]),
        avg3(e[2], e[3], e[4]),
        avg3(e[3], e[4], e[5]),
        avg3(e[4], e[5], e[6]),
        avg3(e[5], e[6], e[7]),
        avg3(e[6], e[7], e[8]),
    ];
    for row in 0..4 {
        ws[(y0 + row) * stride + x0..(y0 + row) * stride + x0 + 4]
            .copy_from_slice(&avg[3 - row..7 - row]);
    }
}

fn predict_bvrpred(ws: &mut [u8], x0: usize, y0: usize, stride: usize) {
    let e = edge_pixels(ws, x0, y0, stride);

    ws[(y0 + 3) * stride + x0] = avg3(e[1], e[2], e[3]);
    ws[(y0 + 2) * stride + x0] = avg3(e[2], e[3], e[4]);
    ws[(y0 + 3) * stride + x0 + 1] = avg3(e[3], e[4], e[5]);
    ws[(y0 + 1) * stride + x0] = avg3(e[3], e[4], e[5]);
    ws[(y0 + 2) * stride + x0 + 1] = avg2(e[4], e[5]);
    ws[y0 * stride + x0] = avg2(e[4], e[5]);
    ws[(y0 + 3) * stride + x0 + 2] = avg3(e[4], e[5], e[6]);
    ws[(y0 + 1) * stride + x0 + 1] = avg3(e[4], e[5], e[6]);
    ws[(y0 + 2) * stride + x0 + 2] = avg2(e[5], e[6]);
    ws[y0 * stride + x0 + 1] = avg2(e[5], e[6]);
    ws[(y0 + 3) * stride + x0 + 3] = avg3(e[5], e[6], e[7]);
    ws[(y0 + 1) * stride + x0 + 2] = avg3(e[5], e[6], e[7]);
    ws[(y0 + 2) * stride + x0 + 3] = avg2(e[6], e[7]);
    ws[y0 * stride + x0 + 2] = avg2(e[6], e[7]);
    ws[(y0 + 1) * stride + x0 + 3] = avg3(e[6], e[7], e[8]);
    ws[y0 * stride + x0 + 3] = avg2(e[7], e[8]);
}

fn predict_bvlpred(ws: &mut [u8], x0: usize, y0: usize, stride: usize) {
    let a = top_pixels(ws, x0, y0, stride);

    ws[y0 * stride + x0] = avg2(a[0], a[1]);
    ws[(y0 + 1) * stride + x0] = avg3(a[0], a[1], a[2]);
    ws[(y0 + 2) * stride + x0] = avg2(a[1], a[2]);
    ws[y0 * stride + x0 + 1] = avg2(a[1], a[2]);
    ws[(y0 + 1) * stride + x0 + 1] = avg3(a[1], a[2], a[3]);
    ws[(y0 + 3) * stride + x0] = avg3(a[1], a[2], a[3]);
    ws[(y0 + 2) * stride + x0 + 1] = avg2(a[2], a[3]);
    ws[y0 * stride + x0 + 2] = avg2(a[2], a[3]);
    ws[(y0 + 3) * stride + x0 + 1] = avg3(a[2], a[3], a[4]);
    ws[(y0 + 1) * stride + x0 + 2] = avg3(a[2], a[3], a[4]);
    ws[(y0 + 2) * stride + x0 + 2] = avg2(a[3], a[4]);
    ws[y0 * stride + x0 + 3] = avg2(a[3], a[4]);
    ws[(y0 + 3) * stride + x0 + 2] = avg3(a[3], a[4], a[5]);
    ws[(y0 + 1) * stride + x0 + 3] = avg3(a[3], a[4], a[5]);
    ws[(y0 + 2) * stride + x0 + 3] = avg3(a[4], a[5], a[6]);
    ws[(y0 + 3) * stride + x0 + 3] = avg3(a[5], a[6], a[7]);
}

fn predict_bhdpred(ws: &mut [u8], x0: usize, y0: usize, stride: usize) {
    let e = edge_pixels(ws, x0, y0, stride);

    ws[(y0 + 3) * stride + x0] = avg2(e[0], e[1]);
    ws[(y0 + 3) * stride + x0 + 1] = avg3(e[0], e[1], e[2]);
    ws[(y0 + 2) * stride + x0] = avg2(e[1], e[2]);
    ws[(y0 + 3) * stride + x0 + 2] = avg2(e[1], e[2]);
    ws[(y0 + 2) * stride + x0 + 1] = avg3(e[1], e[2], e[3]);
    ws[(y0 + 3) * stride + x0 + 3] = avg3(e[1], e[2], e[3]);
    ws[(y0 + 2) * stride + x0 + 2] = avg2(e[2], e[3]);
    ws[(y0 + 1) * stride + x0] = avg2(e[2], e[3]);
    ws[(y0 + 2) * stride + x0 + 3] = avg3(e[2], e[3], e[4]);
    ws[(y0 + 1) * stride + x0 + 1] = avg3(e[2], e[3], e[4]);
    ws[(y0 + 1) * stride + x0 + 2] = avg2(e[3], e[4]);
    ws[y0 * stride + x0] = avg2(e[3], e[4]);
    ws[(y0 + 1) * stride + x0 + 3] = avg3(e[3], e[4], e[5]);
    ws[y0 * stride + x0 + 1] = avg3(e[3], e[4], e[5]);
    ws[y0 * stride + x0 + 2] = avg3(e[4], e[5], e[6]);
    ws[y0 * stride + x0 + 3] = avg3(e[5], e[6], e[7]);
}

fn predict_bhupred(ws: &mut [u8], x0: usize, y0: usize, stride: usize) {
    let l = left_pixels(ws, x0, y0, stride);

    ws[y0 * stride + x0] = avg2(l[0], l[1]);
    ws[y0 * stride + x0 + 1] = avg3(l[0], l[1], l[2]);
    ws[y0 * stride + x0 + 2] = avg2(l[1], l[2]);
    ws[(y0 + 1) * stride + x0] = avg2(l[1], l[2]);
    ws[y0 * stride + x0 + 3] = avg3(l[1], l[2], l[3]);
    ws[(y0 + 1) * stride + x0 + 1] = avg3(l[1], l[2], l[3]);
    ws[(y0 + 1) * stride + x0 + 2] = avg2(l[2], l[3]);
    ws[(y0 + 2) * stride + x0] = avg2(l[2], l[3]);
    ws[(y0 + 1) * stride + x0 + 3] = avg3(l[2], l[3], l[3]);
    ws[(y0 + 2) * stride + x0 + 1] = avg3(l[2], l[3], l[3]);
    ws[(y0 + 2) * stride + x0 + 2] = l[3];
    ws[(y0 + 2) * stride + x0 + 3] = l[3];
    ws[(y0 + 3) * stride + x0] = l[3];
    ws[(y0 + 3) * stride + x0 + 1] = l[3];
    ws[(y0 + 3) * stride + x0 + 2] = l[3];
    ws[(y0 + 3) * stride + x0 + 3] = l[3];
}

fn predict_subblock(ws: &mut [u8], mode: i8, x0: usize, y0: usize, stride: usize) {
    match mode {
        B_TM_PRED => predict_tmpred(ws, 4, x0, y0, stride),
        B_VE_PRED => predict_bvepred(ws, x0, y0, stride),
        B_HE_PRED => predict_bhepred(ws, x0, y0, stride),
        B_LD_PRED => predict_bldpred(ws, x0, y0, stride),
        B_RD_PRED => predict_brdpred(ws, x0, y0, stride),
        B_VR_PRED => predict_bvrpred(ws, x0, y0, stride),
        B_VL_PRED => predict_bvlpred(ws, x0, y0, stride),
        B_HD_PRED => predict_bhdpred(ws, x0, y0, stride),
        B_HU_PRED => predict_bhupred(ws, x0, y0, stride),
        _ => predict_bdcpred(ws, x0, y0, stride),
    }
}

/// Intra-predict and reconstruct the luma plane of one macroblock.
pub fn predict_luma(
    plane: &mut Plane,
    mb_x: usize,
    mb_y: usize,
    mb_w: usize,
    info: &MbInfo,
    coeffs: &MbCoeffs,
) {
    let mut ws = luma_workspace(plane, mb_x, mb_y, mb_w);

    if info.ymode == B_PRED {
        for sby in 0..4 {
            for sbx in 0..4 {
                let i = sby * 4 + sbx;
                let x0 = sbx * 4 + 1;
                let y0 = sby * 4 + 1;
                predict_subblock(&mut ws, info.bmodes[i], x0, y0, LUMA_STRIDE);
                if coeffs.nonzero[i] > 0 {
                    add_residue(&mut ws, &coeffs.blocks[i], y0, x0, LUMA_STRIDE);
                }
            }
        }
    } else {
        match info.ymode {
            V_PRED => predict_vpred(&mut ws, 16, LUMA_STRIDE),
            H_PRED => predict_hpred(&mut ws, 16, LUMA_STRIDE),
            TM_PRED => predict_tmpred(&mut ws, 16, 1, 1, LUMA_STRIDE),
            _ => predict_dcpred(&mut ws, 16, LUMA_STRIDE, mb_y != 0, mb_x != 0),
        }
        for i in 0..16 {
            if coeffs.nonzero[i] > 0 {
                let x0 = (i % 4) * 4 + 1;
                let y0 = (i / 4) * 4 + 1;
                add_residue(&mut ws, &coeffs.blocks[i], y0, x0, LUMA_STRIDE);
            }
        }
    }

    store_workspace(plane, &ws, LUMA_STRIDE, mb_x, mb_y, 16);
}

fn predict_chroma_plane(
    plane: &mut Plane,
    mb_x: usize,
    mb_y: usize,
    mode: i8,
    blocks: &[[i16; 16]],
    nonzero: &[u8],
) {
    let mut ws = chroma_workspace(plane, mb_x, mb_y);
    match mode {
        V_PRED => predict_vpred(&mut ws, 8, CHROMA_STRIDE),
        H_PRED => predict_hpred(&mut ws, 8, CHROMA_STRIDE),
        TM_PRED => predict_tmpred(&mut ws, 8, 1, 1, CHROMA_STRIDE),
        _ => predict_dcpred(&mut ws, 8, CHROMA_STRIDE, mb_y != 0, mb_x != 0),
    }
    for i in 0..4 {
        if nonzero[i] > 0 {
            let x0 = (i % 2) * 4 + 1;
            let y0 = (i / 2) * 4 + 1;
            add_residue(&mut ws, &blocks[i], y0, x0, CHROMA_STRIDE);
        }
    }
    store_workspace(plane, &ws, CHROMA_STRIDE, mb_x, mb_y, 8);
}

/// Intra-predict and reconstruct both chroma planes of one macroblock.
pub fn predict_chroma(
    u: &mut Plane,
    v: &mut Plane,
    mb_x: usize,
    mb_y: usize,
    info: &MbInfo,
    coeffs: &MbCoeffs,
) {
    predict_chroma_plane(
        u,
        mb_x,
        mb_y,
        info.uvmode,
        &coeffs.blocks[16..20],
        &coeffs.nonzero[16..20],
    );
    predict_chroma_plane(
        v,
        mb_x,
        mb_y,
        info.uvmode,
        &coeffs.blocks[20..24],
        &coeffs.nonzero[20..24],
    );
}

/// Add the residual of an inter macroblock onto its motion-compensated
/// prediction in the frame planes.
pub fn add_inter_residue(
    y: &mut Plane,
    u: &mut Plane,
    v: &mut Plane,
    mb_x: usize,
    mb_y: usize,
    coeffs: &MbCoeffs,
) {
    let stride = y.stride();
    for i in 0..16 {
        if coeffs.nonzero[i] > 0 {
            let x = (mb_x * 16 + (i % 4) * 4) as isize;
            let row = (mb_y * 16 + (i / 4) * 4) as isize;
            let off = y.offset(x, row);
            add_residue(
                y.pixels_mut(),
                &coeffs.blocks[i],
                off / stride,
                off % stride,
                stride,
            );
        }
    }
    for (plane, base) in [(u, 16usize), (v, 20)] {
        let stride = plane.stride();
        for i in 0..4 {
            if coeffs.nonzero[base + i] > 0 {
                let x = (mb_x * 8 + (i % 2) * 4) as isize;
                let row = (mb_y * 8 + (i / 2) * 4) as isize;
                let off = plane.offset(x, row);
                add_residue(
                    plane.pixels_mut(),
                    &coeffs.blocks[base + i],
                    off / stride,
                    off % stride,
                    stride,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameBuffer;

    fn flat_ws(value: u8) -> [u8; LUMA_WS] {
        [value; LUMA_WS]
    }

    #[test]
    fn dc_prediction_without_neighbors_is_mid_gray() {
        let mut ws = flat_ws(0);
        predict_dcpred(&mut ws, 16, LUMA_STRIDE, false, false);
        assert_eq!(ws[LUMA_STRIDE + 1], 128);
        assert_eq!(ws[16 * LUMA_STRIDE + 16], 128);
    }

    #[test]
    fn dc_prediction_averages_borders() {
        let mut ws = flat_ws(0);
        for col in 0..16 {
            ws[1 + col] = 100;
        }
        for row in 0..16 {
            ws[(row + 1) * LUMA_STRIDE] = 60;
        }
        predict_dcpred(&mut ws, 16, LUMA_STRIDE, true, true);
        assert_eq!(ws[LUMA_STRIDE + 1], 80);
    }

    #[test]
    fn tm_prediction_follows_gradient() {
        let mut ws = flat_ws(0);
        ws[0] = 10;
        for col in 0..16 {
            ws[1 + col] = 10 + col as u8;
        }
        for row in 0..16 {
            ws[(row + 1) * LUMA_STRIDE] = 10 + row as u8;
        }
        predict_tmpred(&mut ws, 16, 1, 1, LUMA_STRIDE);
        // L + A - P reproduces the gradient exactly.
        assert_eq!(ws[LUMA_STRIDE + 1], 10);
        assert_eq!(ws[3 * LUMA_STRIDE + 6], 10 + 2 + 5);
        assert_eq!(ws[16 * LUMA_STRIDE + 16], 10 + 15 + 15);
    }

    #[test]
    fn vertical_edge_subblock_prediction_smooths_top_row() {
        let mut ws = flat_ws(0);
        ws[0] = 8;
        ws[1] = 16;
        ws[2] = 24;
        ws[3] = 32;
        ws[4] = 40;
        ws[5] = 48;
        predict_bvepred(&mut ws, 1, 1, LUMA_STRIDE);
        let expected = [
            avg3(8, 16, 24),
            avg3(16, 24, 32),
            avg3(24, 32, 40),
            avg3(32, 40, 48),
        ];
        for row in 1..=4 {
            assert_eq!(ws[row * LUMA_STRIDE + 1..row * LUMA_STRIDE + 5], expected);
        }
    }

    #[test]
    fn horizontal_up_fills_tail_with_last_left_pixel() {
        let mut ws = flat_ws(0);
        ws[LUMA_STRIDE] = 10;
        ws[2 * LUMA_STRIDE] = 20;
        ws[3 * LUMA_STRIDE] = 30;
        ws[4 * LUMA_STRIDE] = 40;
        predict_bhupred(&mut ws, 1, 1, LUMA_STRIDE);
        assert_eq!(ws[LUMA_STRIDE + 1], avg2(10, 20));
        assert_eq!(ws[4 * LUMA_STRIDE + 4], 40);
        assert_eq!(ws[3 * LUMA_STRIDE + 3], 40);
    }

    #[test]
    fn residue_addition_saturates() {
        let mut pixels = [250u8; 16];
        let mut residual = [0i16; 16];
        residual[0] = 100;
        residual[1] = -300;
        add_residue(&mut pixels, &residual, 0, 0, 4);
        assert_eq!(pixels[0], 255);
        assert_eq!(pixels[1], 0);
        assert_eq!(pixels[2], 250);
    }

    #[test]
    fn workspace_seeds_frame_edges() {
        let buf = FrameBuffer::new(32, 32);
        let ws = luma_workspace(&buf.y, 0, 0, 2);
        assert_eq!(ws[0], 127);
        assert_eq!(ws[1], 127);
        assert_eq!(ws[LUMA_STRIDE], 129);

        // Off the top edge but not the left: neighbor pixels are used.
        let ws = luma_workspace(&buf.y, 1, 0, 2);
        assert_eq!(ws[0], 127);
        assert_eq!(ws[LUMA_STRIDE], 128);
    }

    #[test]
    fn last_column_workspace_replicates_above_right() {
        let mut buf = FrameBuffer::new(32, 32);
        for x in 0..32isize {
            let idx = buf.y.offset(x, 15);
            buf.y.pixels_mut()[idx] = x as u8;
        }
        let ws = luma_workspace(&buf.y, 1, 1, 2);
        assert_eq!(ws[16], 31);
        for i in 17..LUMA_STRIDE {
            assert_eq!(ws[i], 31);
        }
    }
}
