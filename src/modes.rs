//! Macroblock mode and motion vector decoding.
//!
//! Modes live in the first partition. Prediction of motion vectors uses
//! a census of the above, left and above-left macroblocks; the counts
//! select both the candidate vectors and the tree probabilities for the
//! inter mode symbol.

use crate::bool_decoder::BoolDecoder;
use crate::frame::RefFrame;
use crate::header::{EntropyTables, Segmentation, Vp8FrameHeader};
use crate::tables::{
    Prob, BMODE_PROBS, BMODE_TREE, B_DC_PRED, B_HE_PRED, B_PRED, B_TM_PRED, B_VE_PRED, DC_PRED,
    H_PRED, KF_BMODE_PROBS, KF_UV_MODE_PROBS, KF_YMODE_PROBS, KF_YMODE_TREE, LONG_VECTOR_ORDER,
    MV_NEAR, MV_NEAREST, MV_NEW, MV_REF_PROBS, MV_REF_TREE, MV_SPLIT, MV_ZERO, SEGMENT_ID_TREE,
    SMALL_MV_TREE, SPLIT_LEFT_RIGHT, SPLIT_MV_PROBS, SPLIT_MV_TREE, SPLIT_QUARTERS,
    SPLIT_TOP_BOTTOM, SUB_MV_ABOVE, SUB_MV_LEFT, SUB_MV_REF_PROBS, SUB_MV_REF_TREE, SUB_MV_ZERO,
    TM_PRED, UV_MODE_TREE, V_PRED, YMODE_TREE,
};

/// Motion vector in quarter-pel units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotionVector {
    /// Horizontal component.
    pub x: i16,
    /// Vertical component.
    pub y: i16,
}

impl MotionVector {
    /// The zero vector.
    pub const ZERO: Self = Self { x: 0, y: 0 };

    /// True when both components are zero.
    pub fn is_zero(self) -> bool {
        self == Self::ZERO
    }

    fn negated(self) -> Self {
        Self {
            x: -self.x,
            y: -self.y,
        }
    }
}

impl std::ops::Add for MotionVector {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
}

/// Decoded mode information for one macroblock.
#[derive(Debug, Clone, Copy)]
pub struct MbInfo {
    /// Segment id, 0..=3.
    pub segment: u8,
    /// No residual coefficients are coded for this macroblock.
    pub skip: bool,
    /// Luma prediction mode (16x16 modes or B_PRED).
    pub ymode: i8,
    /// Chroma prediction mode.
    pub uvmode: i8,
    /// Per-subblock luma modes, valid when `ymode == B_PRED`.
    pub bmodes: [i8; 16],
    /// Inter prediction mode, valid when `ref_frame` is not intra.
    pub inter_mode: i8,
    /// Reference frame for prediction.
    pub ref_frame: RefFrame,
    /// Whether the macroblock codes a Y2 block.
    pub has_y2: bool,
    /// Macroblock-level motion vector.
    pub mv: MotionVector,
    /// Set by the token decoder when any non-zero coefficient decoded.
    pub has_coeffs: bool,
}

impl Default for MbInfo {
    fn default() -> Self {
        Self {
            segment: 0,
            skip: false,
            ymode: DC_PRED,
            uvmode: DC_PRED,
            bmodes: [B_DC_PRED; 16],
            inter_mode: MV_ZERO,
            ref_frame: RefFrame::Intra,
            has_y2: true,
            mv: MotionVector::ZERO,
            has_coeffs: false,
        }
    }
}

/// Motion vector prediction result.
pub struct MvPrediction {
    /// Predictor added to a newly coded vector.
    pub best: MotionVector,
    /// First ranked candidate.
    pub nearest: MotionVector,
    /// Second ranked candidate.
    pub near: MotionVector,
    /// Inter mode tree probabilities selected by the census.
    pub probs: [Prob; 4],
}

/// Per-frame mode state: macroblock info plus the 4x4 grids of motion
/// vectors and subblock modes consulted as spatial context.
pub struct ModeState {
    mb_w: usize,
    mb_h: usize,
    stride: usize,
    mvs: Vec<MotionVector>,
    bmodes: Vec<i8>,
    mbs: Vec<MbInfo>,
}

fn submode_for(ymode: i8) -> i8 {
    match ymode {
        V_PRED => B_VE_PRED,
        H_PRED => B_HE_PRED,
        TM_PRED => B_TM_PRED,
        _ => B_DC_PRED,
    }
}

fn sub_mv_context(left: MotionVector, above: MotionVector) -> usize {
    if left == above {
        if left.is_zero() {
            4
        } else {
            3
        }
    } else if above.is_zero() {
        2
    } else if left.is_zero() {
        1
    } else {
        0
    }
}

fn clip_mv(mv: MotionVector, mb_x: usize, mb_y: usize, mb_w: usize, mb_h: usize) -> MotionVector {
    let clip = |val: i16, pos: i32, max: i32| -> i16 {
        (i32::from(val) + pos).clamp(-64, max) as i16 - pos as i16
    };
    MotionVector {
        x: clip(mv.x, mb_x as i32 * 64, mb_w as i32 * 64),
        y: clip(mv.y, mb_y as i32 * 64, mb_h as i32 * 64),
    }
}

fn decode_mv_component(bc: &mut BoolDecoder<'_>, probs: &[Prob; 19]) -> i16 {
    let val = if bc.read_bool(probs[0]) {
        // Long form: ten bits in a fixed scrambled order, with bit 3
        // implied when the upper bits are all clear.
        let mut raw = 0i16;
        for &bit in LONG_VECTOR_ORDER.iter() {
            raw |= i16::from(bc.read_bool(probs[9 + bit])) << bit;
        }
        if raw & 0x3F0 != 0 {
            raw |= i16::from(bc.read_bool(probs[9 + 3])) << 3;
        } else {
            raw |= 1 << 3;
        }
        raw
    } else {
        i16::from(bc.read_tree(&SMALL_MV_TREE, &probs[2..9]))
    };
    if val != 0 && bc.read_bool(probs[1]) {
        -val
    } else {
        val
    }
}

fn read_mv(bc: &mut BoolDecoder<'_>, mv_probs: &[[Prob; 19]; 2]) -> MotionVector {
    // Row component first.
    let y = decode_mv_component(bc, &mv_probs[0]);
    let x = decode_mv_component(bc, &mv_probs[1]);
    MotionVector { x, y }
}

fn ref_bias(hdr: &Vp8FrameHeader, rf: RefFrame) -> bool {
    match rf {
        RefFrame::Golden => hdr.sign_bias_golden,
        RefFrame::AltRef => hdr.sign_bias_altref,
        _ => false,
    }
}

impl ModeState {
    /// Allocate state for a frame of `mb_w` x `mb_h` macroblocks.
    pub fn new(mb_w: usize, mb_h: usize) -> Self {
        let stride = mb_w * 4;
        Self {
            mb_w,
            mb_h,
            stride,
            mvs: vec![MotionVector::ZERO; stride * mb_h * 4],
            bmodes: vec![B_DC_PRED; stride * mb_h * 4],
            mbs: vec![MbInfo::default(); mb_w * mb_h],
        }
    }

    /// Info for an already decoded macroblock.
    pub fn mb(&self, mb_x: usize, mb_y: usize) -> &MbInfo {
        &self.mbs[mb_y * self.mb_w + mb_x]
    }

    /// Mutable info, used by the token decoder to record coefficients.
    pub fn mb_mut(&mut self, mb_x: usize, mb_y: usize) -> &mut MbInfo {
        &mut self.mbs[mb_y * self.mb_w + mb_x]
    }

    /// Subblock motion vector at 4x4 position (bx, by) of a macroblock.
    pub fn mv_at(&self, mb_x: usize, mb_y: usize, bx: usize, by: usize) -> MotionVector {
        self.mvs[(mb_y * 4 + by) * self.stride + mb_x * 4 + bx]
    }

    fn grid_base(&self, mb_x: usize, mb_y: usize) -> usize {
        mb_y * 4 * self.stride + mb_x * 4
    }

    fn fill_mv(&mut self, mb_x: usize, mb_y: usize, mv: MotionVector) {
        let base = self.grid_base(mb_x, mb_y);
        for row in 0..4 {
            self.mvs[base + row * self.stride..base + row * self.stride + 4].fill(mv);
        }
    }

    fn fill_bmodes(&mut self, mb_x: usize, mb_y: usize, mode: i8) {
        let base = self.grid_base(mb_x, mb_y);
        for row in 0..4 {
            self.bmodes[base + row * self.stride..base + row * self.stride + 4].fill(mode);
        }
    }

    /// Rank candidate motion vectors from decoded neighbors.
    pub(crate) fn find_mv_pred(
        &self,
        mb_x: usize,
        mb_y: usize,
        ref_frame: RefFrame,
        hdr: &Vp8FrameHeader,
    ) -> MvPrediction {
        let mut near_mvs = [MotionVector::ZERO; 4];
        let mut cnt = [0usize; 4];
        let mut last = 0usize;

        let candidates: [(isize, isize, usize); 3] = [(0, -1, 2), (-1, 0, 2), (-1, -1, 1)];
        for &(dx, dy, weight) in candidates.iter() {
            let nx = mb_x as isize + dx;
            let ny = mb_y as isize + dy;
            if nx < 0 || ny < 0 {
                continue;
            }
            let nb = &self.mbs[ny as usize * self.mb_w + nx as usize];
            if nb.ref_frame == RefFrame::Intra {
                continue;
            }
            if nb.mv.is_zero() {
                cnt[0] += weight;
            } else {
                let mut mv = nb.mv;
                if ref_bias(hdr, nb.ref_frame) != ref_bias(hdr, ref_frame) {
                    mv = mv.negated();
                }
                if last == 0 || mv != near_mvs[last] {
                    last += 1;
                    near_mvs[last] = mv;
                }
                cnt[last] += weight;
            }
        }

        // A third distinct vector equal to the first strengthens it.
        if cnt[3] > 0 && near_mvs[last] == near_mvs[1] {
            cnt[1] += 1;
        }

        let split_weight = |dx: isize, dy: isize| -> usize {
            let nx = mb_x as isize + dx;
            let ny = mb_y as isize + dy;
            if nx < 0 || ny < 0 {
                return 0;
            }
            let nb = &self.mbs[ny as usize * self.mb_w + nx as usize];
            usize::from(nb.ref_frame != RefFrame::Intra && nb.inter_mode == MV_SPLIT)
        };
        cnt[3] = (split_weight(0, -1) + split_weight(-1, 0)) * 2 + split_weight(-1, -1);

        if cnt[2] > cnt[1] {
            cnt.swap(1, 2);
            near_mvs.swap(1, 2);
        }
        if cnt[1] >= cnt[0] {
            near_mvs[0] = near_mvs[1];
        }

        MvPrediction {
            best: clip_mv(near_mvs[0], mb_x, mb_y, self.mb_w, self.mb_h),
            nearest: clip_mv(near_mvs[1], mb_x, mb_y, self.mb_w, self.mb_h),
            near: clip_mv(near_mvs[2], mb_x, mb_y, self.mb_w, self.mb_h),
            probs: [
                MV_REF_PROBS[cnt[0]][0],
                MV_REF_PROBS[cnt[1]][1],
                MV_REF_PROBS[cnt[2]][2],
                MV_REF_PROBS[cnt[3]][3],
            ],
        }
    }

    fn get_split_mv(
        &mut self,
        bc: &mut BoolDecoder<'_>,
        mv_probs: &[[Prob; 19]; 2],
        mb_x: usize,
        mb_y: usize,
        bx: usize,
        by: usize,
        pred: MotionVector,
    ) -> MotionVector {
        let idx = self.grid_base(mb_x, mb_y) + by * self.stride + bx;
        let left = if mb_x > 0 || bx > 0 {
            self.mvs[idx - 1]
        } else {
            MotionVector::ZERO
        };
        let above = if mb_y > 0 || by > 0 {
            self.mvs[idx - self.stride]
        } else {
            MotionVector::ZERO
        };
        let probs = &SUB_MV_REF_PROBS[sub_mv_context(left, above)];
        match bc.read_tree(&SUB_MV_REF_TREE, probs) {
            SUB_MV_LEFT => left,
            SUB_MV_ABOVE => above,
            SUB_MV_ZERO => MotionVector::ZERO,
            _ => pred + read_mv(bc, mv_probs),
        }
    }

    fn do_split_mv(
        &mut self,
        bc: &mut BoolDecoder<'_>,
        mv_probs: &[[Prob; 19]; 2],
        mb_x: usize,
        mb_y: usize,
        pred: MotionVector,
    ) {
        let split_kind = bc.read_tree(&SPLIT_MV_TREE, &SPLIT_MV_PROBS);
        let base = self.grid_base(mb_x, mb_y);
        let stride = self.stride;
        match split_kind {
            SPLIT_TOP_BOTTOM => {
                let top = self.get_split_mv(bc, mv_probs, mb_x, mb_y, 0, 0, pred);
                for row in 0..2 {
                    self.mvs[base + row * stride..base + row * stride + 4].fill(top);
                }
                let bottom = self.get_split_mv(bc, mv_probs, mb_x, mb_y, 0, 2, pred);
                for row in 2..4 {
                    self.mvs[base + row * stride..base + row * stride + 4].fill(bottom);
                }
            }
            SPLIT_LEFT_RIGHT => {
                let left = self.get_split_mv(bc, mv_probs, mb_x, mb_y, 0, 0, pred);
                // Seed the neighbor so the right half sees it as context.
                self.mvs[base + 1] = left;
                let right = self.get_split_mv(bc, mv_probs, mb_x, mb_y, 2, 0, pred);
                for row in 0..4 {
                    self.mvs[base + row * stride..base + row * stride + 2].fill(left);
                    self.mvs[base + row * stride + 2..base + row * stride + 4].fill(right);
                }
            }
            SPLIT_QUARTERS => {
                for &by in &[0usize, 2] {
                    for &bx in &[0usize, 2] {
                        let mv = self.get_split_mv(bc, mv_probs, mb_x, mb_y, bx, by, pred);
                        let idx = base + by * stride + bx;
                        self.mvs[idx] = mv;
                        self.mvs[idx + 1] = mv;
                        self.mvs[idx + stride] = mv;
                        self.mvs[idx + stride + 1] = mv;
                    }
                }
            }
            _ => {
                for by in 0..4 {
                    for bx in 0..4 {
                        let mv = self.get_split_mv(bc, mv_probs, mb_x, mb_y, bx, by, pred);
                        self.mvs[base + by * stride + bx] = mv;
                    }
                }
            }
        }
    }

    /// Decode the modes of one macroblock from the first partition.
    #[allow(clippy::too_many_arguments)]
    pub fn decode_mb(
        &mut self,
        bc: &mut BoolDecoder<'_>,
        mb_x: usize,
        mb_y: usize,
        keyframe: bool,
        hdr: &Vp8FrameHeader,
        segmentation: &Segmentation,
        entropy: &EntropyTables,
        segment_map: &mut [u8],
    ) -> MbInfo {
        let mut info = MbInfo::default();

        if segmentation.enabled {
            let map_idx = mb_y * self.mb_w + mb_x;
            if segmentation.update_map {
                let id = bc.read_tree(&SEGMENT_ID_TREE, &segmentation.tree_probs) as u8;
                segment_map[map_idx] = id;
                info.segment = id;
            } else {
                info.segment = segment_map[map_idx];
            }
        }

        if hdr.mb_no_coeff_skip {
            info.skip = bc.read_bool(hdr.prob_skip_false);
        }

        if keyframe {
            self.decode_intra_kf(bc, mb_x, mb_y, &mut info);
        } else if !bc.read_bool(hdr.prob_intra) {
            self.decode_intra_inter_frame(bc, mb_x, mb_y, entropy, &mut info);
        } else {
            self.decode_inter(bc, mb_x, mb_y, hdr, entropy, &mut info);
        }

        self.mbs[mb_y * self.mb_w + mb_x] = info;
        info
    }

    fn decode_bpred_modes(
        &mut self,
        bc: &mut BoolDecoder<'_>,
        mb_x: usize,
        mb_y: usize,
        keyframe: bool,
        info: &mut MbInfo,
    ) {
        let base = self.grid_base(mb_x, mb_y);
        for by in 0..4 {
            for bx in 0..4 {
                let idx = base + by * self.stride + bx;
                let mode = if keyframe {
                    let above = if mb_y == 0 && by == 0 {
                        B_DC_PRED
                    } else {
                        self.bmodes[idx - self.stride]
                    };
                    let left = if mb_x == 0 && bx == 0 {
                        B_DC_PRED
                    } else {
                        self.bmodes[idx - 1]
                    };
                    bc.read_tree(
                        &BMODE_TREE,
                        &KF_BMODE_PROBS[above as usize][left as usize],
                    )
                } else {
                    bc.read_tree(&BMODE_TREE, &BMODE_PROBS)
                };
                self.bmodes[idx] = mode;
                info.bmodes[by * 4 + bx] = mode;
            }
        }
    }

    fn decode_intra_kf(
        &mut self,
        bc: &mut BoolDecoder<'_>,
        mb_x: usize,
        mb_y: usize,
        info: &mut MbInfo,
    ) {
        info.ymode = bc.read_tree(&KF_YMODE_TREE, &KF_YMODE_PROBS);
        if info.ymode == B_PRED {
            info.has_y2 = false;
            self.decode_bpred_modes(bc, mb_x, mb_y, true, info);
        } else {
            self.fill_bmodes(mb_x, mb_y, submode_for(info.ymode));
        }
        info.uvmode = bc.read_tree(&UV_MODE_TREE, &KF_UV_MODE_PROBS);
        self.fill_mv(mb_x, mb_y, MotionVector::ZERO);
    }

    fn decode_intra_inter_frame(
        &mut self,
        bc: &mut BoolDecoder<'_>,
        mb_x: usize,
        mb_y: usize,
        entropy: &EntropyTables,
        info: &mut MbInfo,
    ) {
        info.ymode = bc.read_tree(&YMODE_TREE, &entropy.ymode_probs);
        if info.ymode == B_PRED {
            info.has_y2 = false;
            self.decode_bpred_modes(bc, mb_x, mb_y, false, info);
        } else {
            self.fill_bmodes(mb_x, mb_y, submode_for(info.ymode));
        }
        info.uvmode = bc.read_tree(&UV_MODE_TREE, &entropy.uvmode_probs);
        self.fill_mv(mb_x, mb_y, MotionVector::ZERO);
    }

    fn decode_inter(
        &mut self,
        bc: &mut BoolDecoder<'_>,
        mb_x: usize,
        mb_y: usize,
        hdr: &Vp8FrameHeader,
        entropy: &EntropyTables,
        info: &mut MbInfo,
    ) {
        info.ref_frame = if !bc.read_bool(hdr.prob_last) {
            RefFrame::Last
        } else if !bc.read_bool(hdr.prob_golden) {
            RefFrame::Golden
        } else {
            RefFrame::AltRef
        };
        self.fill_bmodes(mb_x, mb_y, B_DC_PRED);

        let pred = self.find_mv_pred(mb_x, mb_y, info.ref_frame, hdr);
        info.inter_mode = bc.read_tree(&MV_REF_TREE, &pred.probs);
        match info.inter_mode {
            MV_NEAREST => info.mv = pred.nearest,
            MV_NEAR => info.mv = pred.near,
            MV_NEW => info.mv = pred.best + read_mv(bc, &entropy.mv_probs),
            MV_SPLIT => {
                info.has_y2 = false;
                self.do_split_mv(bc, &entropy.mv_probs, mb_x, mb_y, pred.best);
                info.mv = self.mv_at(mb_x, mb_y, 3, 3);
            }
            _ => info.mv = MotionVector::ZERO,
        }
        if info.inter_mode != MV_SPLIT {
            self.fill_mv(mb_x, mb_y, info.mv);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inter_mb(mv: MotionVector, ref_frame: RefFrame, inter_mode: i8) -> MbInfo {
        MbInfo {
            mv,
            ref_frame,
            inter_mode,
            ..MbInfo::default()
        }
    }

    #[test]
    fn census_with_intra_neighbors_favors_zero() {
        let state = ModeState::new(4, 4);
        let hdr = Vp8FrameHeader::default();
        let pred = state.find_mv_pred(1, 1, RefFrame::Last, &hdr);
        assert_eq!(pred.best, MotionVector::ZERO);
        assert_eq!(pred.nearest, MotionVector::ZERO);
        assert_eq!(pred.probs, [7, 1, 1, 143]);
    }

    #[test]
    fn census_merges_equal_neighbor_vectors() {
        let mut state = ModeState::new(4, 4);
        let mv = MotionVector { x: 12, y: -8 };
        *state.mb_mut(1, 0) = inter_mb(mv, RefFrame::Last, MV_NEW);
        *state.mb_mut(0, 1) = inter_mb(mv, RefFrame::Last, MV_NEW);
        let hdr = Vp8FrameHeader::default();
        let pred = state.find_mv_pred(1, 1, RefFrame::Last, &hdr);
        // Both weight-2 neighbors collapse into the nearest slot.
        assert_eq!(pred.nearest, mv);
        assert_eq!(pred.near, MotionVector::ZERO);
        assert_eq!(pred.best, mv);
        assert_eq!(pred.probs[1], MV_REF_PROBS[4][1]);
    }

    #[test]
    fn census_negates_on_sign_bias_mismatch() {
        let mut state = ModeState::new(4, 4);
        let mv = MotionVector { x: 4, y: 4 };
        *state.mb_mut(1, 0) = inter_mb(mv, RefFrame::Golden, MV_NEW);
        let hdr = Vp8FrameHeader {
            sign_bias_golden: true,
            ..Vp8FrameHeader::default()
        };
        let pred = state.find_mv_pred(1, 1, RefFrame::Last, &hdr);
        assert_eq!(pred.nearest, MotionVector { x: -4, y: -4 });
    }

    #[test]
    fn census_counts_split_neighbors() {
        let mut state = ModeState::new(4, 4);
        *state.mb_mut(1, 0) = inter_mb(MotionVector::ZERO, RefFrame::Last, MV_SPLIT);
        *state.mb_mut(0, 1) = inter_mb(MotionVector::ZERO, RefFrame::Last, MV_SPLIT);
        *state.mb_mut(0, 0) = inter_mb(MotionVector::ZERO, RefFrame::Last, MV_SPLIT);
        let hdr = Vp8FrameHeader::default();
        let pred = state.find_mv_pred(1, 1, RefFrame::Last, &hdr);
        assert_eq!(pred.probs[3], MV_REF_PROBS[5][3]);
    }

    #[test]
    fn candidate_vectors_are_clamped_to_frame() {
        let mut state = ModeState::new(2, 2);
        let mv = MotionVector { x: 500, y: -500 };
        *state.mb_mut(0, 0) = inter_mb(mv, RefFrame::Last, MV_NEW);
        let hdr = Vp8FrameHeader::default();
        let pred = state.find_mv_pred(0, 1, RefFrame::Last, &hdr);
        // x limited to the right frame edge, y to 16 px above the top.
        assert_eq!(pred.nearest.x, 2 * 64);
        assert_eq!(pred.nearest.y, -(64 + 64));
    }

    #[test]
    fn sub_mv_context_selection() {
        let zero = MotionVector::ZERO;
        let a = MotionVector { x: 1, y: 0 };
        let b = MotionVector { x: 0, y: 2 };
        assert_eq!(sub_mv_context(zero, zero), 4);
        assert_eq!(sub_mv_context(a, a), 3);
        assert_eq!(sub_mv_context(a, zero), 2);
        assert_eq!(sub_mv_context(zero, b), 1);
        assert_eq!(sub_mv_context(a, b), 0);
    }

    #[test]
    fn intra_16x16_modes_map_to_subblock_context() {
        assert_eq!(submode_for(DC_PRED), B_DC_PRED);
        assert_eq!(submode_for(V_PRED), B_VE_PRED);
        assert_eq!(submode_for(H_PRED), B_HE_PRED);
        assert_eq!(submode_for(TM_PRED), B_TM_PRED);
    }
}
