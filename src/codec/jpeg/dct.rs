//! Separable AAN transforms on 8x8 blocks, after the IJG implementation.
//! The inverse transform runs in fixed point; the forward one in `f32`.

use super::tables::DCT_SCALE_FACTOR;

/// Fractional bits of the fixed point inverse transform.
pub const DECOMPRESSION_BITS_PRECISION: u32 = 14;

const ONE_HALF: i64 = 1 << (DECOMPRESSION_BITS_PRECISION - 1);

// round(x * 2^14) for the AAN rotation constants
const FIX_1_414213562: i64 = 23_171;
const FIX_1_847759065: i64 = 30_274;
const FIX_1_0823922: i64 = 17_734;
const FIX_2_61312593: i64 = 42_813;

#[inline]
fn mul(value: i64, factor: i64) -> i64 {
    (value * factor + ONE_HALF) >> DECOMPRESSION_BITS_PRECISION
}

/// Multipliers that fold dequantization into the inverse transform.
pub fn decompression_factors(quant: &[u32; 64]) -> [i64; 64] {
    let mut factors = [0i64; 64];
    for (index, factor) in factors.iter_mut().enumerate() {
        let row = DCT_SCALE_FACTOR[index / 8];
        let col = DCT_SCALE_FACTOR[index % 8];
        *factor = (((quant[index] as i64) << DECOMPRESSION_BITS_PRECISION) as f32 * col * row) as i64;
    }
    factors
}

/// Divisors that fold quantization into the forward transform.
pub fn compression_factors(quant: &[u32; 64]) -> [f32; 64] {
    let mut factors = [0f32; 64];
    for (index, factor) in factors.iter_mut().enumerate() {
        let row = DCT_SCALE_FACTOR[index / 8];
        let col = DCT_SCALE_FACTOR[index % 8];
        *factor = 1.0 / ((quant[index].max(1) << 3) as f32 * col * row);
    }
    factors
}

/// Forward transform of zero centred samples, quantized in place.
pub fn fdct(block: &mut [i32; 64], descale: &[f32; 64]) {
    let mut temp = [0f32; 64];

    for row in 0..8 {
        let base = row * 8;
        let line = |i: usize| block[base + i] as f32;
        let out = fdct_1d([
            line(0),
            line(1),
            line(2),
            line(3),
            line(4),
            line(5),
            line(6),
            line(7),
        ]);
        temp[base..base + 8].copy_from_slice(&out);
    }

    for col in 0..8 {
        let column = |i: usize| temp[col + i * 8];
        let out = fdct_1d([
            column(0),
            column(1),
            column(2),
            column(3),
            column(4),
            column(5),
            column(6),
            column(7),
        ]);
        for (i, value) in out.into_iter().enumerate() {
            temp[col + i * 8] = value;
        }
    }

    for (index, value) in block.iter_mut().enumerate() {
        *value = (temp[index] * descale[index]).round() as i32;
    }
}

fn fdct_1d(d: [f32; 8]) -> [f32; 8] {
    let tmp0 = d[0] + d[7];
    let tmp7 = d[0] - d[7];
    let tmp1 = d[1] + d[6];
    let tmp6 = d[1] - d[6];
    let tmp2 = d[2] + d[5];
    let tmp5 = d[2] - d[5];
    let tmp3 = d[3] + d[4];
    let tmp4 = d[3] - d[4];

    // even part
    let tmp10 = tmp0 + tmp3;
    let tmp13 = tmp0 - tmp3;
    let tmp11 = tmp1 + tmp2;
    let tmp12 = tmp1 - tmp2;
    let z1 = (tmp12 + tmp13) * 0.707_106_78;

    // odd part
    let tmp10o = tmp4 + tmp5;
    let tmp11o = tmp5 + tmp6;
    let tmp12o = tmp6 + tmp7;
    let z5 = (tmp10o - tmp12o) * 0.382_683_43;
    let z2 = tmp10o * 0.541_196_1 + z5;
    let z4 = tmp12o * 1.306_563 + z5;
    let z3 = tmp11o * 0.707_106_78;
    let z11 = tmp7 + z3;
    let z13 = tmp7 - z3;

    [
        tmp10 + tmp11,
        z11 + z4,
        tmp13 + z1,
        z13 - z2,
        tmp10 - tmp11,
        z13 + z2,
        tmp13 - z1,
        z11 - z4,
    ]
}

/// Inverse transform of dequantized coefficients, result zero centred.
pub fn idct(block: &mut [i32; 64], scale: &[i64; 64]) {
    let mut temp = [0i64; 64];

    for row in 0..8 {
        let base = row * 8;
        if block[base + 1..base + 8].iter().all(|value| *value == 0) {
            let dc = block[base] as i64 * scale[base];
            temp[base..base + 8].fill(dc);
            continue;
        }
        let input = |i: usize| block[base + i] as i64 * scale[base + i];
        let out = idct_1d([
            input(0),
            input(1),
            input(2),
            input(3),
            input(4),
            input(5),
            input(6),
            input(7),
        ]);
        temp[base..base + 8].copy_from_slice(&out);
    }

    let round = ONE_HALF << 3;
    let shift = DECOMPRESSION_BITS_PRECISION + 3;
    for col in 0..8 {
        let column = |i: usize| temp[col + i * 8];
        let out = idct_1d([
            column(0),
            column(1),
            column(2),
            column(3),
            column(4),
            column(5),
            column(6),
            column(7),
        ]);
        for (i, value) in out.into_iter().enumerate() {
            block[col + i * 8] = ((value + round) >> shift) as i32;
        }
    }
}

fn idct_1d(d: [i64; 8]) -> [i64; 8] {
    // even part
    let tmp10 = d[0] + d[4];
    let tmp11 = d[0] - d[4];
    let tmp13 = d[2] + d[6];
    let tmp12 = mul(d[2] - d[6], FIX_1_414213562) - tmp13;

    let tmp0 = tmp10 + tmp13;
    let tmp3 = tmp10 - tmp13;
    let tmp1 = tmp11 + tmp12;
    let tmp2 = tmp11 - tmp12;

    // odd part
    let z13 = d[5] + d[3];
    let z10 = d[5] - d[3];
    let z11 = d[1] + d[7];
    let z12 = d[1] - d[7];

    let tmp7 = z11 + z13;
    let tmp11o = mul(z11 - z13, FIX_1_414213562);
    let z5 = mul(z10 + z12, FIX_1_847759065);
    let tmp10o = mul(z12, FIX_1_0823922) - z5;
    let tmp12o = z5 - mul(z10, FIX_2_61312593);

    let tmp6 = tmp12o - tmp7;
    let tmp5 = tmp11o - tmp6;
    let tmp4 = tmp10o + tmp5;

    [
        tmp0 + tmp7,
        tmp1 + tmp6,
        tmp2 + tmp5,
        tmp3 - tmp4,
        tmp3 + tmp4,
        tmp2 - tmp5,
        tmp1 - tmp6,
        tmp0 - tmp7,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(block: [i32; 64]) -> [i32; 64] {
        let unit = [1u32; 64];
        let mut work = block;
        fdct(&mut work, &compression_factors(&unit));
        idct(&mut work, &decompression_factors(&unit));
        work
    }

    fn assert_close(original: [i32; 64]) {
        let restored = round_trip(original);
        for (index, (a, b)) in original.iter().zip(restored.iter()).enumerate() {
            assert!((a - b).abs() <= 1, "sample {} was {} now {}", index, a, b);
        }
    }

    #[test]
    fn flat_block_survives() {
        assert_close([-37; 64]);
        assert_eq!(round_trip([0; 64]), [0; 64]);
    }

    #[test]
    fn gradients_and_edges_survive() {
        let mut gradient = [0i32; 64];
        let mut checker = [0i32; 64];
        for (index, (g, c)) in gradient.iter_mut().zip(checker.iter_mut()).enumerate() {
            *g = (index as i32 * 4) - 128;
            *c = if (index / 8 + index % 8) % 2 == 0 { 127 } else { -128 };
        }
        assert_close(gradient);
        assert_close(checker);
    }

    #[test]
    fn pseudo_random_blocks_survive() {
        let mut seed: u32 = 0x1234_5678;
        for _ in 0..50 {
            let mut block = [0i32; 64];
            for value in block.iter_mut() {
                seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                *value = ((seed >> 16) % 256) as i32 - 128;
            }
            assert_close(block);
        }
    }

    #[test]
    fn dc_only_block_matches_mean() {
        let mut block = [0i32; 64];
        block[0] = 80;
        idct(&mut block, &decompression_factors(&[1; 64]));
        assert!(block.iter().all(|value| *value == 10));
    }
}
