//! VP8 frame tag and compressed header parsing.

use byteorder::{ByteOrder, LittleEndian};
use tracing::trace;

use crate::bool_decoder::BoolDecoder;
use crate::error::{Result, Vp8Error};
use crate::tables::{
    Prob, TokenProbTables, COEFF_UPDATE_PROBS, DEFAULT_COEFF_PROBS, DEFAULT_MV_PROBS,
    MV_UPDATE_PROBS, UV_MODE_PROBS, YMODE_PROBS,
};

/// Offset of the compressed data on a keyframe (tag + sync + dimensions).
pub const KEYFRAME_DATA_OFFSET: usize = 10;
/// Offset of the compressed data on an inter frame (tag only).
pub const INTERFRAME_DATA_OFFSET: usize = 3;

const KEYFRAME_SYNC: [u8; 3] = [0x9D, 0x01, 0x2A];

/// Uncompressed frame tag at the start of every VP8 frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameTag {
    /// True for intra-only frames.
    pub keyframe: bool,
    /// Bitstream version, 0..=3. Selects reconstruction filters.
    pub version: u8,
    /// Whether the frame is meant to be displayed.
    pub show_frame: bool,
    /// Size in bytes of the first (mode and header) partition.
    pub first_part_size: usize,
    /// Display width (keyframes only, zero otherwise).
    pub width: u16,
    /// Display height (keyframes only, zero otherwise).
    pub height: u16,
    /// Horizontal upscale hint, not applied by the decoder.
    pub xscale: u8,
    /// Vertical upscale hint, not applied by the decoder.
    pub yscale: u8,
    /// Byte offset of the first partition within the frame data.
    pub data_offset: usize,
}

impl FrameTag {
    /// Parse the three-byte tag and, on keyframes, the sync code and
    /// dimensions that follow it.
    pub fn parse(src: &[u8]) -> Result<Self> {
        if src.len() < INTERFRAME_DATA_OFFSET {
            return Err(Vp8Error::InvalidFrameHeader("frame shorter than tag".into()));
        }
        let raw = u32::from(src[0]) | u32::from(src[1]) << 8 | u32::from(src[2]) << 16;
        let keyframe = raw & 1 == 0;
        let version = ((raw >> 1) & 7) as u8;
        if version > 3 {
            return Err(Vp8Error::UnsupportedFeature(format!(
                "bitstream version {version}"
            )));
        }
        let show_frame = (raw >> 4) & 1 != 0;
        let first_part_size = (raw >> 5) as usize;

        let mut tag = Self {
            keyframe,
            version,
            show_frame,
            first_part_size,
            width: 0,
            height: 0,
            xscale: 0,
            yscale: 0,
            data_offset: INTERFRAME_DATA_OFFSET,
        };

        if keyframe {
            if src.len() < KEYFRAME_DATA_OFFSET {
                return Err(Vp8Error::InvalidFrameHeader(
                    "keyframe shorter than start code".into(),
                ));
            }
            if src[3..6] != KEYFRAME_SYNC {
                return Err(Vp8Error::InvalidFrameHeader("bad keyframe sync code".into()));
            }
            let w = LittleEndian::read_u16(&src[6..8]);
            let h = LittleEndian::read_u16(&src[8..10]);
            tag.width = w & 0x3FFF;
            tag.height = h & 0x3FFF;
            tag.xscale = (w >> 14) as u8;
            tag.yscale = (h >> 14) as u8;
            tag.data_offset = KEYFRAME_DATA_OFFSET;
        }

        if tag.data_offset + tag.first_part_size > src.len() {
            return Err(Vp8Error::InvalidPartition(format!(
                "first partition of {} bytes exceeds frame of {} bytes",
                tag.first_part_size,
                src.len()
            )));
        }
        Ok(tag)
    }
}

/// Per-segment features, persistent across frames until updated.
#[derive(Debug, Clone)]
pub struct Segmentation {
    /// Whether segmentation is in use this frame.
    pub enabled: bool,
    /// Whether the segment map is recoded this frame.
    pub update_map: bool,
    /// Feature data is absolute rather than a delta from frame values.
    pub abs_values: bool,
    /// Per-segment quantizer value or delta.
    pub quant: [i8; 4],
    /// Per-segment loop filter level or delta.
    pub loop_filter: [i8; 4],
    /// Segment id tree probabilities.
    pub tree_probs: [Prob; 3],
}

impl Default for Segmentation {
    fn default() -> Self {
        Self {
            enabled: false,
            update_map: false,
            abs_values: false,
            quant: [0; 4],
            loop_filter: [0; 4],
            tree_probs: [255; 3],
        }
    }
}

/// Loop filter configuration, persistent deltas included.
#[derive(Debug, Clone, Default)]
pub struct LoopFilterParams {
    /// Use the simple filter instead of the normal one.
    pub simple: bool,
    /// Frame-level filter strength, 0..=63. Zero disables filtering.
    pub level: u8,
    /// Sharpness, 0..=7.
    pub sharpness: u8,
    /// Whether per-reference and per-mode adjustments apply.
    pub delta_enabled: bool,
    /// Adjustments by reference frame (intra, last, golden, altref).
    pub ref_deltas: [i8; 4],
    /// Adjustments by prediction mode class.
    pub mode_deltas: [i8; 4],
}

/// Dequantization indices from the frame header.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuantIndices {
    /// Base AC quantizer index for luma, 0..=127.
    pub yac: u8,
    /// Delta for luma DC.
    pub ydc_delta: i8,
    /// Delta for the Y2 block DC.
    pub y2dc_delta: i8,
    /// Delta for the Y2 block AC.
    pub y2ac_delta: i8,
    /// Delta for chroma DC.
    pub uvdc_delta: i8,
    /// Delta for chroma AC.
    pub uvac_delta: i8,
}

/// Entropy context carried between frames.
#[derive(Clone)]
pub struct EntropyTables {
    /// DCT token probabilities.
    pub coeff_probs: TokenProbTables,
    /// Motion vector component probabilities, row then column.
    pub mv_probs: [[Prob; 19]; 2],
    /// Luma mode probabilities for inter frames.
    pub ymode_probs: [Prob; 4],
    /// Chroma mode probabilities for inter frames.
    pub uvmode_probs: [Prob; 3],
}

impl Default for EntropyTables {
    fn default() -> Self {
        Self {
            coeff_probs: DEFAULT_COEFF_PROBS,
            mv_probs: DEFAULT_MV_PROBS,
            ymode_probs: YMODE_PROBS,
            uvmode_probs: UV_MODE_PROBS,
        }
    }
}

/// Decoded per-frame header fields.
#[derive(Debug, Clone, Default)]
pub struct Vp8FrameHeader {
    /// Color space bit (keyframes only).
    pub color_space: u8,
    /// Clamping may be skipped when false (keyframes only).
    pub clamping_required: bool,
    /// Number of DCT token partitions (1, 2, 4 or 8).
    pub num_partitions: usize,
    /// Dequantization indices.
    pub quant: QuantIndices,
    /// Install this frame in the golden slot.
    pub refresh_golden: bool,
    /// Install this frame in the altref slot.
    pub refresh_altref: bool,
    /// Golden copy source when not refreshed: 0 none, 1 last, 2 altref.
    pub copy_to_golden: u8,
    /// Altref copy source when not refreshed: 0 none, 1 last, 2 golden.
    pub copy_to_altref: u8,
    /// Invert motion vector signs when predicting from golden.
    pub sign_bias_golden: bool,
    /// Invert motion vector signs when predicting from altref.
    pub sign_bias_altref: bool,
    /// Keep entropy updates for following frames.
    pub refresh_entropy: bool,
    /// Install this frame in the last slot.
    pub refresh_last: bool,
    /// Whether per-macroblock skip flags are coded.
    pub mb_no_coeff_skip: bool,
    /// Probability that a macroblock is not skipped.
    pub prob_skip_false: Prob,
    /// Probability that an inter-frame macroblock is inter coded.
    pub prob_intra: Prob,
    /// Probability of referencing the last frame.
    pub prob_last: Prob,
    /// Probability of referencing golden over altref.
    pub prob_golden: Prob,
}

fn read_delta_update(bc: &mut BoolDecoder<'_>, bits: u32) -> i8 {
    if bc.read_flag() {
        bc.read_signed_literal(bits) as i8
    } else {
        0
    }
}

/// Read the compressed frame header from the first partition.
///
/// `segmentation`, `loop_filter` and `entropy` persist across frames and
/// are updated in place. Returns the per-frame header together with a
/// snapshot of the entropy tables to restore after the frame when
/// `refresh_entropy` is unset.
pub fn read_frame_header(
    bc: &mut BoolDecoder<'_>,
    tag: &FrameTag,
    segmentation: &mut Segmentation,
    loop_filter: &mut LoopFilterParams,
    entropy: &mut EntropyTables,
) -> Result<(Vp8FrameHeader, Option<EntropyTables>)> {
    let mut hdr = Vp8FrameHeader::default();

    if tag.keyframe {
        *entropy = EntropyTables::default();
        hdr.color_space = bc.read_flag() as u8;
        hdr.clamping_required = !bc.read_flag();
        if hdr.color_space != 0 {
            return Err(Vp8Error::UnsupportedFeature("reserved color space".into()));
        }
    }

    segmentation.enabled = bc.read_flag();
    segmentation.update_map = false;
    if segmentation.enabled {
        segmentation.update_map = bc.read_flag();
        let update_data = bc.read_flag();
        if update_data {
            segmentation.abs_values = bc.read_flag();
            for quant in segmentation.quant.iter_mut() {
                *quant = read_delta_update(bc, 7);
            }
            for level in segmentation.loop_filter.iter_mut() {
                *level = read_delta_update(bc, 6);
            }
        }
        if segmentation.update_map {
            segmentation.tree_probs = [255; 3];
            for prob in segmentation.tree_probs.iter_mut() {
                if bc.read_flag() {
                    *prob = bc.read_byte();
                }
            }
        }
    }

    loop_filter.simple = bc.read_flag();
    loop_filter.level = bc.read_literal(6) as u8;
    loop_filter.sharpness = bc.read_literal(3) as u8;
    loop_filter.delta_enabled = bc.read_flag();
    if loop_filter.delta_enabled && bc.read_flag() {
        for delta in loop_filter.ref_deltas.iter_mut() {
            if bc.read_flag() {
                *delta = bc.read_signed_literal(6) as i8;
            }
        }
        for delta in loop_filter.mode_deltas.iter_mut() {
            if bc.read_flag() {
                *delta = bc.read_signed_literal(6) as i8;
            }
        }
    }

    hdr.num_partitions = 1 << bc.read_literal(2);

    hdr.quant.yac = bc.read_literal(7) as u8;
    hdr.quant.ydc_delta = read_delta_update(bc, 4);
    hdr.quant.y2dc_delta = read_delta_update(bc, 4);
    hdr.quant.y2ac_delta = read_delta_update(bc, 4);
    hdr.quant.uvdc_delta = read_delta_update(bc, 4);
    hdr.quant.uvac_delta = read_delta_update(bc, 4);

    if tag.keyframe {
        hdr.refresh_entropy = bc.read_flag();
        hdr.refresh_last = true;
        hdr.refresh_golden = true;
        hdr.refresh_altref = true;
    } else {
        hdr.refresh_golden = bc.read_flag();
        hdr.refresh_altref = bc.read_flag();
        if !hdr.refresh_golden {
            hdr.copy_to_golden = bc.read_literal(2) as u8;
        }
        if !hdr.refresh_altref {
            hdr.copy_to_altref = bc.read_literal(2) as u8;
        }
        hdr.sign_bias_golden = bc.read_flag();
        hdr.sign_bias_altref = bc.read_flag();
        hdr.refresh_entropy = bc.read_flag();
        hdr.refresh_last = bc.read_flag();
    }

    let backup = if hdr.refresh_entropy {
        None
    } else {
        Some(entropy.clone())
    };

    for (i, plane) in COEFF_UPDATE_PROBS.iter().enumerate() {
        for (j, band) in plane.iter().enumerate() {
            for (k, ctx) in band.iter().enumerate() {
                for (l, &update_prob) in ctx.iter().enumerate() {
                    if bc.read_bool(update_prob) {
                        entropy.coeff_probs[i][j][k][l] = bc.read_byte();
                    }
                }
            }
        }
    }

    hdr.mb_no_coeff_skip = bc.read_flag();
    if hdr.mb_no_coeff_skip {
        hdr.prob_skip_false = bc.read_byte();
    }

    if !tag.keyframe {
        hdr.prob_intra = bc.read_byte();
        hdr.prob_last = bc.read_byte();
        hdr.prob_golden = bc.read_byte();
        if bc.read_flag() {
            for prob in entropy.ymode_probs.iter_mut() {
                *prob = bc.read_byte();
            }
        }
        if bc.read_flag() {
            for prob in entropy.uvmode_probs.iter_mut() {
                *prob = bc.read_byte();
            }
        }
        for (comp, updates) in MV_UPDATE_PROBS.iter().enumerate() {
            for (i, &update_prob) in updates.iter().enumerate() {
                if bc.read_bool(update_prob) {
                    let x = bc.read_literal(7) as u8;
                    entropy.mv_probs[comp][i] = if x > 0 { x << 1 } else { 1 };
                }
            }
        }
    }

    if bc.has_error() {
        return Err(Vp8Error::Corrupted("first partition truncated".into()));
    }

    trace!(
        partitions = hdr.num_partitions,
        yac = hdr.quant.yac,
        filter_level = loop_filter.level,
        segmentation = segmentation.enabled,
        "frame header"
    );

    Ok((hdr, backup))
}

/// Slice the DCT token partitions out of the frame data. The sizes of
/// all but the final partition are stored as 3-byte little-endian
/// values between the first partition and the token data.
pub fn split_token_partitions<'a>(
    src: &'a [u8],
    tag: &FrameTag,
    num_partitions: usize,
) -> Result<Vec<&'a [u8]>> {
    let mut offset = tag.data_offset + tag.first_part_size;
    let size_bytes = (num_partitions - 1) * 3;
    if offset + size_bytes > src.len() {
        return Err(Vp8Error::InvalidPartition(
            "partition size table exceeds frame".into(),
        ));
    }

    let mut partitions = Vec::with_capacity(num_partitions);
    let sizes = &src[offset..offset + size_bytes];
    offset += size_bytes;

    for i in 0..num_partitions {
        let size = if i + 1 < num_partitions {
            LittleEndian::read_u24(&sizes[i * 3..i * 3 + 3]) as usize
        } else {
            src.len().saturating_sub(offset)
        };
        if offset + size > src.len() {
            return Err(Vp8Error::InvalidPartition(format!(
                "token partition {i} of {size} bytes exceeds frame"
            )));
        }
        partitions.push(&src[offset..offset + size]);
        offset += size;
    }
    Ok(partitions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyframe_bytes(width: u16, height: u16) -> Vec<u8> {
        let first_part_size = 0usize;
        let raw = (first_part_size as u32) << 5 | 1 << 4; // keyframe, show, version 0
        let mut data = vec![raw as u8, (raw >> 8) as u8, (raw >> 16) as u8];
        data.extend_from_slice(&KEYFRAME_SYNC);
        data.extend_from_slice(&width.to_le_bytes());
        data.extend_from_slice(&height.to_le_bytes());
        data
    }

    #[test]
    fn keyframe_tag_parses_dimensions() {
        let data = keyframe_bytes(176, 144);
        let tag = FrameTag::parse(&data).unwrap();
        assert!(tag.keyframe);
        assert!(tag.show_frame);
        assert_eq!(tag.version, 0);
        assert_eq!(tag.width, 176);
        assert_eq!(tag.height, 144);
        assert_eq!(tag.data_offset, KEYFRAME_DATA_OFFSET);
    }

    #[test]
    fn scale_bits_are_separated_from_dimensions() {
        let mut data = keyframe_bytes(0, 0);
        let w: u16 = 320 | (2 << 14);
        let h: u16 = 240 | (1 << 14);
        data[6..8].copy_from_slice(&w.to_le_bytes());
        data[8..10].copy_from_slice(&h.to_le_bytes());
        let tag = FrameTag::parse(&data).unwrap();
        assert_eq!(tag.width, 320);
        assert_eq!(tag.xscale, 2);
        assert_eq!(tag.height, 240);
        assert_eq!(tag.yscale, 1);
    }

    #[test]
    fn bad_sync_code_is_rejected() {
        let mut data = keyframe_bytes(176, 144);
        data[4] = 0x00;
        assert!(matches!(
            FrameTag::parse(&data),
            Err(Vp8Error::InvalidFrameHeader(_))
        ));
    }

    #[test]
    fn oversized_first_partition_is_rejected() {
        let mut data = keyframe_bytes(176, 144);
        let raw = 1000u32 << 5;
        data[0] = raw as u8;
        data[1] = (raw >> 8) as u8;
        data[2] = (raw >> 16) as u8;
        assert!(matches!(
            FrameTag::parse(&data),
            Err(Vp8Error::InvalidPartition(_))
        ));
    }

    #[test]
    fn interframe_tag_has_no_dimensions() {
        // Odd low bit marks an inter frame.
        let raw: u32 = 1 | 1 << 4;
        let data = [raw as u8, (raw >> 8) as u8, (raw >> 16) as u8];
        let tag = FrameTag::parse(&data).unwrap();
        assert!(!tag.keyframe);
        assert_eq!(tag.width, 0);
        assert_eq!(tag.data_offset, INTERFRAME_DATA_OFFSET);
    }

    #[test]
    fn version_above_three_is_unsupported() {
        let raw: u32 = 1 | 5 << 1;
        let data = [raw as u8, (raw >> 8) as u8, (raw >> 16) as u8];
        assert!(matches!(
            FrameTag::parse(&data),
            Err(Vp8Error::UnsupportedFeature(_))
        ));
    }

    #[test]
    fn token_partitions_split_by_size_table() {
        // Inter frame, zero-size first partition, two partitions.
        let raw: u32 = 1;
        let mut data = vec![raw as u8, (raw >> 8) as u8, (raw >> 16) as u8];
        data.extend_from_slice(&[4, 0, 0]); // first token partition is 4 bytes
        data.extend_from_slice(&[0xAA; 4]);
        data.extend_from_slice(&[0xBB; 6]);
        let tag = FrameTag::parse(&data).unwrap();
        let parts = split_token_partitions(&data, &tag, 2).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], &[0xAA; 4]);
        assert_eq!(parts[1], &[0xBB; 6]);
    }

    #[test]
    fn truncated_partition_table_is_rejected() {
        let raw: u32 = 1;
        let data = vec![raw as u8, (raw >> 8) as u8, (raw >> 16) as u8, 4];
        let tag = FrameTag::parse(&data).unwrap();
        assert!(matches!(
            split_token_partitions(&data, &tag, 2),
            Err(Vp8Error::InvalidPartition(_))
        ));
    }
}
