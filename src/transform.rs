//! VP8 inverse transforms (Walsh-Hadamard and DCT).
//!
//! Both transforms operate in place on a 4x4 coefficient block in raster
//! order. The DC-only fast paths are taken when the token decoder saw a
//! single coefficient; they must produce the same output as the full
//! transforms fed a DC-only block.

const COS_PI8_SQRT2_MINUS1: i32 = 20091;
const SIN_PI8_SQRT2: i32 = 35468;

fn mul_cos(val: i32) -> i32 {
    val + ((val * COS_PI8_SQRT2_MINUS1) >> 16)
}

fn mul_sin(val: i32) -> i32 {
    (val * SIN_PI8_SQRT2) >> 16
}

fn idct_pass(s: [i32; 4], shift: u32) -> [i32; 4] {
    let a1 = s[0] + s[2];
    let b1 = s[0] - s[2];
    let c1 = mul_sin(s[1]) - mul_cos(s[3]);
    let d1 = mul_cos(s[1]) + mul_sin(s[3]);
    let bias = (1 << shift) >> 1;
    [
        (a1 + d1 + bias) >> shift,
        (b1 + c1 + bias) >> shift,
        (b1 - c1 + bias) >> shift,
        (a1 - d1 + bias) >> shift,
    ]
}

/// Inverse DCT on a 4x4 residual block, columns then rows.
pub fn idct4x4(blk: &mut [i16; 16]) {
    let mut tmp = [0i32; 16];
    for i in 0..4 {
        let col = idct_pass(
            [
                blk[i] as i32,
                blk[4 + i] as i32,
                blk[8 + i] as i32,
                blk[12 + i] as i32,
            ],
            0,
        );
        for (row, &val) in col.iter().enumerate() {
            tmp[row * 4 + i] = val;
        }
    }
    for row in 0..4 {
        let out = idct_pass(
            [tmp[row * 4], tmp[row * 4 + 1], tmp[row * 4 + 2], tmp[row * 4 + 3]],
            3,
        );
        for (i, &val) in out.iter().enumerate() {
            blk[row * 4 + i] = val as i16;
        }
    }
}

/// DC-only inverse DCT fast path.
pub fn idct4x4_dc(blk: &mut [i16; 16]) {
    let dc = ((blk[0] as i32 + 4) >> 3) as i16;
    *blk = [dc; 16];
}

/// Inverse Walsh-Hadamard transform on the Y2 block, columns then rows.
pub fn iwht4x4(blk: &mut [i16; 16]) {
    let mut tmp = [0i32; 16];
    for i in 0..4 {
        let s0 = blk[i] as i32;
        let s1 = blk[4 + i] as i32;
        let s2 = blk[8 + i] as i32;
        let s3 = blk[12 + i] as i32;
        let a1 = s0 + s3;
        let b1 = s1 + s2;
        let c1 = s1 - s2;
        let d1 = s0 - s3;
        tmp[i] = a1 + b1;
        tmp[4 + i] = c1 + d1;
        tmp[8 + i] = a1 - b1;
        tmp[12 + i] = d1 - c1;
    }
    for row in 0..4 {
        let s0 = tmp[row * 4];
        let s1 = tmp[row * 4 + 1];
        let s2 = tmp[row * 4 + 2];
        let s3 = tmp[row * 4 + 3];
        let a1 = s0 + s3;
        let b1 = s1 + s2;
        let c1 = s1 - s2;
        let d1 = s0 - s3;
        blk[row * 4] = ((a1 + b1 + 3) >> 3) as i16;
        blk[row * 4 + 1] = ((c1 + d1 + 3) >> 3) as i16;
        blk[row * 4 + 2] = ((a1 - b1 + 3) >> 3) as i16;
        blk[row * 4 + 3] = ((d1 - c1 + 3) >> 3) as i16;
    }
}

/// DC-only inverse Walsh-Hadamard fast path.
pub fn iwht4x4_dc(blk: &mut [i16; 16]) {
    let dc = ((blk[0] as i32 + 3) >> 3) as i16;
    *blk = [dc; 16];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idct_zero_input_stays_zero() {
        let mut blk = [0i16; 16];
        idct4x4(&mut blk);
        assert_eq!(blk, [0i16; 16]);
    }

    #[test]
    fn idct_dc_path_matches_full_transform() {
        for dc in [-804i16, -100, -1, 0, 1, 37, 100, 803] {
            let mut full = [0i16; 16];
            full[0] = dc;
            idct4x4(&mut full);

            let mut fast = [0i16; 16];
            fast[0] = dc;
            idct4x4_dc(&mut fast);

            assert_eq!(full, fast, "dc = {dc}");
        }
    }

    #[test]
    fn iwht_dc_path_matches_full_transform() {
        for dc in [-512i16, -5, 0, 8, 801] {
            let mut full = [0i16; 16];
            full[0] = dc;
            iwht4x4(&mut full);

            let mut fast = [0i16; 16];
            fast[0] = dc;
            iwht4x4_dc(&mut fast);

            assert_eq!(full, fast, "dc = {dc}");
        }
    }

    #[test]
    fn iwht_distributes_dc_evenly() {
        let mut blk = [0i16; 16];
        blk[0] = 16 * 8;
        iwht4x4(&mut blk);
        assert_eq!(blk, [16i16; 16]);
    }

    #[test]
    fn idct_single_ac_coefficient() {
        let mut blk = [0i16; 16];
        blk[1] = 64;
        idct4x4(&mut blk);
        // Row symmetry of the basis: columns mirror around the center.
        for row in 0..4 {
            assert_eq!(blk[row * 4], -blk[row * 4 + 3]);
            assert_eq!(blk[row * 4 + 1], -blk[row * 4 + 2]);
        }
    }
}
