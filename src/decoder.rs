//! Frame decoding driver.
//!
//! Owns all state that persists between frames: segmentation features,
//! loop filter parameters, entropy tables, the segment map and the three
//! reference slots. Each call to [`Vp8Decoder::decode_frame`] parses one
//! complete VP8 frame and returns the reconstructed picture.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::bool_decoder::BoolDecoder;
use crate::error::{Result, Vp8Error};
use crate::frame::{FrameBuffer, RefFrame, ReferenceFrames, Vp8ColorSpace, Vp8Frame, Vp8FrameType};
use crate::header::{
    read_frame_header, split_token_partitions, EntropyTables, FrameTag, LoopFilterParams,
    Segmentation,
};
use crate::loop_filter::filter_frame;
use crate::modes::ModeState;
use crate::motion::predict_inter_mb;
use crate::prediction::{add_inter_residue, predict_chroma, predict_luma};
use crate::tokens::{read_mb_coeffs, MbCoeffs, MbQuant, TokenState};

/// Decoder limits and knobs.
#[derive(Debug, Clone)]
pub struct Vp8DecoderConfig {
    /// Largest accepted frame width.
    pub max_width: u16,
    /// Largest accepted frame height.
    pub max_height: u16,
    /// Requested worker threads. Decoding currently runs on the calling
    /// thread regardless.
    pub threads: usize,
    /// Requested error concealment. Corrupt frames are rejected instead.
    pub error_concealment: bool,
}

impl Default for Vp8DecoderConfig {
    fn default() -> Self {
        Self {
            max_width: 4096,
            max_height: 4096,
            threads: 1,
            error_concealment: false,
        }
    }
}

/// Stateful VP8 bitstream decoder.
pub struct Vp8Decoder {
    config: Vp8DecoderConfig,
    width: u16,
    height: u16,
    mb_w: usize,
    mb_h: usize,
    color_space: Vp8ColorSpace,
    segmentation: Segmentation,
    loop_filter: LoopFilterParams,
    entropy: EntropyTables,
    segment_map: Vec<u8>,
    refs: ReferenceFrames,
}

impl Default for Vp8Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Vp8Decoder {
    /// Decoder with default limits.
    pub fn new() -> Self {
        Self::with_config(Vp8DecoderConfig::default())
    }

    /// Decoder with explicit limits.
    pub fn with_config(config: Vp8DecoderConfig) -> Self {
        if config.threads > 1 {
            warn!(threads = config.threads, "multithreaded decoding not available");
        }
        Self {
            config,
            width: 0,
            height: 0,
            mb_w: 0,
            mb_h: 0,
            color_space: Vp8ColorSpace::Bt601,
            segmentation: Segmentation::default(),
            loop_filter: LoopFilterParams::default(),
            entropy: EntropyTables::default(),
            segment_map: Vec::new(),
            refs: ReferenceFrames::default(),
        }
    }

    /// Current frame width, zero before the first keyframe.
    pub fn width(&self) -> u16 {
        self.width
    }

    /// Current frame height, zero before the first keyframe.
    pub fn height(&self) -> u16 {
        self.height
    }

    /// Drop all reference frames and dimensions, e.g. on a seek.
    pub fn reset(&mut self) {
        self.width = 0;
        self.height = 0;
        self.mb_w = 0;
        self.mb_h = 0;
        self.color_space = Vp8ColorSpace::Bt601;
        self.segmentation = Segmentation::default();
        self.loop_filter = LoopFilterParams::default();
        self.entropy = EntropyTables::default();
        self.segment_map.clear();
        self.refs.clear();
    }

    fn apply_keyframe_dimensions(&mut self, tag: &FrameTag) -> Result<()> {
        if tag.width == 0 || tag.height == 0 {
            return Err(Vp8Error::InvalidDimensions {
                width: tag.width,
                height: tag.height,
            });
        }
        if tag.width > self.config.max_width || tag.height > self.config.max_height {
            return Err(Vp8Error::LimitExceeded {
                width: tag.width,
                height: tag.height,
                max_width: self.config.max_width,
                max_height: self.config.max_height,
            });
        }
        if tag.width != self.width || tag.height != self.height {
            self.width = tag.width;
            self.height = tag.height;
            self.mb_w = (usize::from(tag.width) + 15) >> 4;
            self.mb_h = (usize::from(tag.height) + 15) >> 4;
            self.segment_map = vec![0; self.mb_w * self.mb_h];
            self.refs.clear();
        }
        Ok(())
    }

    /// Decode one complete frame and return the reconstructed picture.
    ///
    /// Frames that are not shown (`visible() == false`) still update the
    /// reference slots and must be fed to the decoder.
    pub fn decode_frame(&mut self, src: &[u8]) -> Result<Vp8Frame> {
        let tag = FrameTag::parse(src)?;

        if tag.keyframe {
            self.apply_keyframe_dimensions(&tag)?;
        } else if self.width == 0 {
            return Err(Vp8Error::InvalidBitstream(
                "stream does not start with a keyframe".into(),
            ));
        }

        let part1 = &src[tag.data_offset..tag.data_offset + tag.first_part_size];
        let mut bc = BoolDecoder::new(part1);
        let (hdr, entropy_backup) = read_frame_header(
            &mut bc,
            &tag,
            &mut self.segmentation,
            &mut self.loop_filter,
            &mut self.entropy,
        )?;

        // Coded on keyframes only; sticky for the inter frames that follow.
        if tag.keyframe {
            self.color_space = if hdr.color_space == 0 {
                Vp8ColorSpace::Bt601
            } else {
                Vp8ColorSpace::Reserved
            };
        }

        let partitions = split_token_partitions(src, &tag, hdr.num_partitions)?;
        let mut token_bcs: Vec<BoolDecoder<'_>> =
            partitions.iter().map(|p| BoolDecoder::new(p)).collect();

        debug!(
            keyframe = tag.keyframe,
            version = tag.version,
            width = self.width,
            height = self.height,
            partitions = hdr.num_partitions,
            show = tag.show_frame,
            "decoding frame"
        );

        let mut frame = FrameBuffer::new(self.width, self.height);
        let mut modes = ModeState::new(self.mb_w, self.mb_h);
        let mut token_state = TokenState::new(self.mb_w);

        for mb_y in 0..self.mb_h {
            let part_idx = mb_y & (hdr.num_partitions - 1);
            token_state.reset_left();
            for mb_x in 0..self.mb_w {
                let info = modes.decode_mb(
                    &mut bc,
                    mb_x,
                    mb_y,
                    tag.keyframe,
                    &hdr,
                    &self.segmentation,
                    &self.entropy,
                    &mut self.segment_map,
                );

                let quant = MbQuant::derive(&hdr.quant, &self.segmentation, info.segment);
                let coeffs = if info.skip {
                    token_state.clear_mb(mb_x, info.has_y2);
                    MbCoeffs::default()
                } else {
                    let mut coeffs = read_mb_coeffs(
                        &mut token_bcs[part_idx],
                        &self.entropy.coeff_probs,
                        &mut token_state,
                        mb_x,
                        &info,
                        &quant,
                    );
                    coeffs.transform();
                    coeffs
                };
                modes.mb_mut(mb_x, mb_y).has_coeffs = coeffs.any();

                if info.ref_frame == RefFrame::Intra {
                    predict_luma(&mut frame.y, mb_x, mb_y, self.mb_w, &info, &coeffs);
                    predict_chroma(&mut frame.u, &mut frame.v, mb_x, mb_y, &info, &coeffs);
                } else {
                    let reference = self
                        .refs
                        .get(info.ref_frame)
                        .ok_or_else(|| {
                            Vp8Error::Corrupted(format!(
                                "missing {:?} reference frame",
                                info.ref_frame
                            ))
                        })?
                        .clone();
                    predict_inter_mb(
                        &mut frame,
                        &reference,
                        &modes,
                        mb_x,
                        mb_y,
                        &info,
                        tag.version,
                    );
                    if coeffs.any() {
                        add_inter_residue(
                            &mut frame.y,
                            &mut frame.u,
                            &mut frame.v,
                            mb_x,
                            mb_y,
                            &coeffs,
                        );
                    }
                }
            }
        }

        if bc.has_error() {
            return Err(Vp8Error::Corrupted("mode partition truncated".into()));
        }
        for (i, token_bc) in token_bcs.iter().enumerate() {
            // Partitions beyond the number of macroblock rows are never read.
            if i < self.mb_h && token_bc.has_error() {
                return Err(Vp8Error::Corrupted(format!("token partition {i} truncated")));
            }
        }

        filter_frame(
            &mut frame,
            &modes,
            &self.loop_filter,
            &self.segmentation,
            tag.keyframe,
            tag.version,
            self.mb_w,
            self.mb_h,
        );
        frame.extend_borders();

        if let Some(backup) = entropy_backup {
            self.entropy = backup;
        }

        let frame_type = if tag.keyframe {
            Vp8FrameType::KeyFrame
        } else {
            Vp8FrameType::InterFrame
        };
        let output = Vp8Frame::from_buffer(&frame, frame_type, self.color_space, tag.show_frame);
        self.update_references(&hdr, Arc::new(frame));
        Ok(output)
    }

    /// Install the decoded frame into the reference slots. Copies read
    /// the slots in the same order the refresh flags were coded, so a
    /// golden copy from altref sees an already copied altref slot.
    fn update_references(&mut self, hdr: &crate::header::Vp8FrameHeader, current: Arc<FrameBuffer>) {
        if !hdr.refresh_altref {
            match hdr.copy_to_altref {
                1 => self.refs.altref = self.refs.last.clone(),
                2 => self.refs.altref = self.refs.golden.clone(),
                _ => {}
            }
        }
        if !hdr.refresh_golden {
            match hdr.copy_to_golden {
                1 => self.refs.golden = self.refs.last.clone(),
                2 => self.refs.golden = self.refs.altref.clone(),
                _ => {}
            }
        }
        if hdr.refresh_golden {
            self.refs.golden = Some(current.clone());
        }
        if hdr.refresh_altref {
            self.refs.altref = Some(current.clone());
        }
        if hdr.refresh_last {
            self.refs.last = Some(current);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::{
        COEFF_UPDATE_PROBS, KF_UV_MODE_PROBS, KF_YMODE_PROBS, KF_YMODE_TREE, UV_MODE_TREE,
        VP8_NORM,
    };

    /// Arithmetic encoder matching the decoder, for building test
    /// bitstreams.
    struct BoolEncoder {
        low: u32,
        range: u32,
        count: i32,
        out: Vec<u8>,
    }

    impl BoolEncoder {
        fn new() -> Self {
            Self {
                low: 0,
                range: 255,
                count: -24,
                out: Vec::new(),
            }
        }

        fn put_bool(&mut self, bit: bool, prob: u8) {
            let split = 1 + (((self.range - 1) * u32::from(prob)) >> 8);
            if bit {
                self.low += split;
                self.range -= split;
            } else {
                self.range = split;
            }
            let mut shift = VP8_NORM[self.range as usize] as i32;
            self.range <<= shift;
            self.count += shift;
            if self.count >= 0 {
                let offset = shift - self.count;
                if (self.low << (offset - 1)) & 0x8000_0000 != 0 {
                    let mut x = self.out.len();
                    while x > 0 && self.out[x - 1] == 0xFF {
                        self.out[x - 1] = 0;
                        x -= 1;
                    }
                    if x > 0 {
                        self.out[x - 1] += 1;
                    }
                }
                self.out.push((self.low >> (24 - offset)) as u8);
                self.low <<= offset;
                self.low &= 0x00FF_FFFF;
                shift = self.count;
                self.count -= 8;
            }
            self.low <<= shift;
        }

        fn put_flag(&mut self, bit: bool) {
            self.put_bool(bit, 128);
        }

        fn put_literal(&mut self, value: u32, bits: u32) {
            for i in (0..bits).rev() {
                self.put_flag((value >> i) & 1 != 0);
            }
        }

        fn put_tree(&mut self, tree: &[i8], probs: &[u8], symbol: i8) {
            let mut path = Vec::new();
            assert!(find_path(tree, 0, symbol, &mut path));
            for (prob_idx, bit) in path {
                self.put_bool(bit, probs[prob_idx]);
            }
        }

        fn finish(mut self) -> Vec<u8> {
            for _ in 0..32 {
                self.put_flag(false);
            }
            self.out
        }
    }

    fn find_path(tree: &[i8], index: usize, symbol: i8, path: &mut Vec<(usize, bool)>) -> bool {
        for bit in [false, true] {
            path.push((index >> 1, bit));
            let entry = tree[index + usize::from(bit)];
            if entry <= 0 {
                if -entry == symbol {
                    return true;
                }
            } else if find_path(tree, entry as usize, symbol, path) {
                return true;
            }
            path.pop();
        }
        false
    }

    #[test]
    fn encoder_decoder_round_trip() {
        let bits = [
            (true, 128u8),
            (false, 10),
            (true, 240),
            (true, 1),
            (false, 128),
            (true, 77),
            (false, 200),
            (true, 200),
        ];
        let mut enc = BoolEncoder::new();
        for &(bit, prob) in &bits {
            enc.put_bool(bit, prob);
        }
        let data = enc.finish();
        let mut dec = BoolDecoder::new(&data);
        for &(bit, prob) in &bits {
            assert_eq!(dec.read_bool(prob), bit);
        }
        assert!(!dec.has_error());
    }

    /// Header partition for an all-skip keyframe: every macroblock is
    /// DC-predicted with no residual.
    fn flat_keyframe_header(mb_count: usize) -> Vec<u8> {
        let mut enc = BoolEncoder::new();
        enc.put_flag(false); // color space
        enc.put_flag(false); // clamping
        enc.put_flag(false); // segmentation
        enc.put_flag(false); // simple filter
        enc.put_literal(0, 6); // filter level
        enc.put_literal(0, 3); // sharpness
        enc.put_flag(false); // filter deltas
        enc.put_literal(0, 2); // one token partition
        enc.put_literal(0, 7); // yac index
        for _ in 0..5 {
            enc.put_flag(false); // quantizer deltas
        }
        enc.put_flag(true); // refresh entropy
        for plane in COEFF_UPDATE_PROBS.iter() {
            for band in plane.iter() {
                for ctx in band.iter() {
                    for &prob in ctx.iter() {
                        enc.put_bool(false, prob);
                    }
                }
            }
        }
        enc.put_flag(true); // per-mb skip flags present
        enc.put_literal(255, 8); // prob_skip_false
        for _ in 0..mb_count {
            enc.put_bool(true, 255); // skip
            enc.put_tree(&KF_YMODE_TREE, &KF_YMODE_PROBS, 0); // DC_PRED
            enc.put_tree(&UV_MODE_TREE, &KF_UV_MODE_PROBS, 0); // DC_PRED
        }
        enc.finish()
    }

    fn flat_keyframe(width: u16, height: u16) -> Vec<u8> {
        let mb_count = ((usize::from(width) + 15) >> 4) * ((usize::from(height) + 15) >> 4);
        let header = flat_keyframe_header(mb_count);
        let raw = (header.len() as u32) << 5 | 1 << 4;
        let mut data = vec![raw as u8, (raw >> 8) as u8, (raw >> 16) as u8];
        data.extend_from_slice(&[0x9D, 0x01, 0x2A]);
        data.extend_from_slice(&width.to_le_bytes());
        data.extend_from_slice(&height.to_le_bytes());
        data.extend_from_slice(&header);
        data.push(0); // token partition
        data
    }

    #[test]
    fn decodes_flat_gray_keyframe() {
        let data = flat_keyframe(32, 16);
        let mut dec = Vp8Decoder::new();
        let frame = dec.decode_frame(&data).expect("keyframe decodes");
        assert_eq!(frame.width, 32);
        assert_eq!(frame.height, 16);
        assert_eq!(frame.frame_type, Vp8FrameType::KeyFrame);
        assert_eq!(frame.color_space, Vp8ColorSpace::Bt601);
        assert!(frame.visible);
        // DC prediction with no neighbours predicts 128 everywhere.
        for y in 0..16 {
            for x in 0..32 {
                assert_eq!(frame.get_y(x, y), 128);
            }
        }
        for y in 0..8 {
            for x in 0..16 {
                assert_eq!(frame.get_u(x, y), 128);
                assert_eq!(frame.get_v(x, y), 128);
            }
        }
    }

    #[test]
    fn keyframe_fills_all_reference_slots() {
        let data = flat_keyframe(16, 16);
        let mut dec = Vp8Decoder::new();
        dec.decode_frame(&data).unwrap();
        let last = dec.refs.last.as_ref().unwrap();
        let golden = dec.refs.golden.as_ref().unwrap();
        let altref = dec.refs.altref.as_ref().unwrap();
        assert!(Arc::ptr_eq(last, golden));
        assert!(Arc::ptr_eq(last, altref));
        assert_eq!(Arc::strong_count(last), 3);
    }

    #[test]
    fn first_frame_must_be_keyframe() {
        // Inter frame tag: bit 0 set, zero first partition.
        let data = [0x01, 0x00, 0x00, 0x00];
        let mut dec = Vp8Decoder::new();
        assert!(matches!(
            dec.decode_frame(&data),
            Err(Vp8Error::InvalidBitstream(_))
        ));
    }

    #[test]
    fn rejects_frames_beyond_configured_limits() {
        let data = flat_keyframe(32, 16);
        let mut dec = Vp8Decoder::with_config(Vp8DecoderConfig {
            max_width: 16,
            max_height: 16,
            ..Default::default()
        });
        match dec.decode_frame(&data) {
            Err(Vp8Error::LimitExceeded { width, max_width, .. }) => {
                assert_eq!(width, 32);
                assert_eq!(max_width, 16);
            }
            other => panic!("expected limit error, got {other:?}"),
        }
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let data = flat_keyframe(16, 16);
        let mut dec = Vp8Decoder::new();
        assert!(dec.decode_frame(&data[..data.len() / 2]).is_err());
    }

    #[test]
    fn reset_requires_new_keyframe() {
        let data = flat_keyframe(16, 16);
        let mut dec = Vp8Decoder::new();
        dec.decode_frame(&data).unwrap();
        assert_eq!(dec.width(), 16);
        dec.reset();
        assert_eq!(dec.width(), 0);
        assert!(dec.refs.last.is_none());
    }
}
