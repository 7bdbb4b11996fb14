//! VP8 boolean arithmetic decoder.
//!
//! The decoder maintains a range in [1, 255] and a 64-bit value register
//! topped up lazily from the input. Reads never fail: once the input is
//! exhausted the register is charged with a large sentinel bit count and
//! further reads consume fabricated zero bits, so a truncated stream
//! decodes deterministically to completion. [`BoolDecoder::has_error`]
//! reports whether any fabricated bits were actually consumed.

use crate::tables::VP8_NORM;

/// Width of the value register in bits.
const BD_VALUE_BITS: i32 = 64;

/// Sentinel added to `count` when the input runs dry. Large enough that
/// it can never be mistaken for a real bit count.
const LOTS_OF_BITS: i32 = 0x4000_0000;

/// Boolean arithmetic decoder over a borrowed buffer.
pub struct BoolDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    value: u64,
    range: u32,
    count: i32,
}

impl<'a> BoolDecoder<'a> {
    /// Create a decoder over `data`. An empty buffer is a valid state:
    /// every read returns zero bits and `has_error()` reports true once
    /// the first fabricated bit is consumed.
    pub fn new(data: &'a [u8]) -> Self {
        let mut decoder = Self {
            data,
            pos: 0,
            value: 0,
            range: 255,
            count: -8,
        };
        decoder.fill();
        decoder
    }

    fn fill(&mut self) {
        let bits_left = ((self.data.len() - self.pos) * 8) as i32;
        let mut shift = BD_VALUE_BITS - 8 - (self.count + 8);
        let overrun = shift + 8 - bits_left;
        let mut loop_end = 0;

        if overrun >= 0 {
            self.count += LOTS_OF_BITS;
            loop_end = overrun;
        }
        if overrun < 0 || bits_left > 0 {
            while shift >= loop_end {
                self.count += 8;
                self.value |= u64::from(self.data[self.pos]) << shift;
                self.pos += 1;
                shift -= 8;
            }
        }
    }

    /// Decode one boolean with the given probability of being zero.
    pub fn read_bool(&mut self, prob: u8) -> bool {
        let split = 1 + (((self.range - 1) * u32::from(prob)) >> 8);

        if self.count < 0 {
            self.fill();
        }

        let bigsplit = u64::from(split) << (BD_VALUE_BITS - 8);
        let bit = self.value >= bigsplit;
        if bit {
            self.range -= split;
            self.value -= bigsplit;
        } else {
            self.range = split;
        }

        let shift = VP8_NORM[self.range as usize];
        self.range <<= shift;
        self.value <<= shift;
        self.count -= shift as i32;

        bit
    }

    /// Decode one bit at probability 128.
    pub fn read_flag(&mut self) -> bool {
        self.read_bool(128)
    }

    /// Decode `n` bits at probability 128, most significant bit first.
    pub fn read_literal(&mut self, n: u32) -> u32 {
        let mut value = 0u32;
        for _ in 0..n {
            value = (value << 1) | u32::from(self.read_flag());
        }
        value
    }

    /// Decode a full byte (8-bit literal).
    pub fn read_byte(&mut self) -> u8 {
        self.read_literal(8) as u8
    }

    /// Decode an `n`-bit magnitude followed by a sign bit.
    pub fn read_signed_literal(&mut self, n: u32) -> i32 {
        let value = self.read_literal(n) as i32;
        if self.read_flag() {
            -value
        } else {
            value
        }
    }

    /// Walk a probability tree from the root and return the leaf symbol.
    pub fn read_tree(&mut self, tree: &[i8], probs: &[u8]) -> i8 {
        self.read_tree_from(tree, probs, 0)
    }

    /// Walk a probability tree starting at node index `start`.
    pub fn read_tree_from(&mut self, tree: &[i8], probs: &[u8], start: usize) -> i8 {
        let mut index = start;
        loop {
            let next = tree[index + usize::from(self.read_bool(probs[index >> 1]))];
            if next <= 0 {
                return -next;
            }
            index = next as usize;
        }
    }

    /// True once the decoder has consumed bits past the end of the input.
    ///
    /// Decoding a frame whose partitions are truncated still completes;
    /// this is checked afterwards to tell apart a clean decode from one
    /// fed fabricated data.
    pub fn has_error(&self) -> bool {
        self.count > BD_VALUE_BITS && self.count < LOTS_OF_BITS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_a_valid_no_op_state() {
        let mut decoder = BoolDecoder::new(&[]);
        for _ in 0..100 {
            assert!(!decoder.read_flag());
        }
        assert!(decoder.has_error());
    }

    #[test]
    fn literal_assembles_flags_msb_first() {
        let data = [0b1101_0110, 0b1010_1010, 0x3C];
        let mut by_literal = BoolDecoder::new(&data);
        let mut by_flags = BoolDecoder::new(&data);

        let literal = by_literal.read_literal(12);
        let mut assembled = 0u32;
        for _ in 0..12 {
            assembled = (assembled << 1) | u32::from(by_flags.read_flag());
        }
        assert_eq!(literal, assembled);
        assert!(!by_literal.has_error());
    }

    #[test]
    fn error_flag_only_set_after_overrun() {
        // The 8-bit lookahead turns sour once reads eat into the last
        // byte, so the error budget of a 4-byte input is 24 bits.
        let data = [0xFF; 4];
        let mut decoder = BoolDecoder::new(&data);
        for _ in 0..16 {
            decoder.read_flag();
        }
        assert!(!decoder.has_error());
        for _ in 0..128 {
            decoder.read_flag();
        }
        assert!(decoder.has_error());
    }

    #[test]
    fn decoding_past_eos_is_deterministic() {
        let data = [0x12, 0x34];
        let mut a = BoolDecoder::new(&data);
        let mut b = BoolDecoder::new(&data);
        let bits_a: Vec<bool> = (0..200).map(|_| a.read_bool(67)).collect();
        let bits_b: Vec<bool> = (0..200).map(|_| b.read_bool(67)).collect();
        assert_eq!(bits_a, bits_b);
    }

    #[test]
    fn tree_walk_matches_raw_bool_reads() {
        use crate::tables::{DCT_TOKEN_TREE, DEFAULT_COEFF_PROBS};
        let data = [0x5A, 0xC3, 0x99, 0x10, 0x42, 0xfe, 0x07, 0x81];
        let probs = &DEFAULT_COEFF_PROBS[1][1][0];

        let mut by_tree = BoolDecoder::new(&data);
        let mut by_hand = BoolDecoder::new(&data);

        for _ in 0..4 {
            let token = by_tree.read_tree(&DCT_TOKEN_TREE, probs);

            let mut index = 0usize;
            let manual = loop {
                let bit = by_hand.read_bool(probs[index >> 1]);
                let next = DCT_TOKEN_TREE[index + usize::from(bit)];
                if next <= 0 {
                    break -next;
                }
                index = next as usize;
            };
            assert_eq!(token, manual);
        }
    }

    #[test]
    fn signed_literal_reads_magnitude_then_sign() {
        // 4-bit magnitude 0b1011 followed by a set sign bit.
        let data = [0b1011_1000];
        let mut decoder = BoolDecoder::new(&data);
        assert_eq!(decoder.read_signed_literal(4), -11);
    }
}
