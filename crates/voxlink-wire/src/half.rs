//! IEEE 754 binary16 conversion done with integer bit manipulation.
//!
//! Stable Rust has no native half-precision type, so every target goes
//! through this path. Conversion from `f32` rounds to nearest, ties to even,
//! and preserves signed zero, subnormals, infinities and NaN.

/// Converts an `f32` to the bit pattern of the nearest binary16 value.
pub fn f32_to_f16_bits(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exp = ((bits >> 23) & 0xff) as i32;
    let man = bits & 0x007f_ffff;

    if exp == 0xff {
        if man == 0 {
            return sign | 0x7c00;
        }
        // Quiet the NaN and keep as much payload as fits.
        return sign | 0x7e00 | (man >> 13) as u16;
    }

    let half_exp = exp - 127 + 15;
    if half_exp >= 0x1f {
        return sign | 0x7c00;
    }

    if half_exp <= 0 {
        if half_exp < -10 {
            return sign;
        }
        let full = man | 0x0080_0000;
        let shift = (14 - half_exp) as u32;
        let mut m = full >> shift;
        let rem = full & ((1 << shift) - 1);
        let halfway = 1u32 << (shift - 1);
        if rem > halfway || (rem == halfway && m & 1 == 1) {
            m += 1;
        }
        // A carry out of the mantissa lands on the smallest normal, which is
        // exactly the right encoding.
        return sign | m as u16;
    }

    let mut out = ((half_exp as u32) << 10) | (man >> 13);
    let rem = man & 0x1fff;
    if rem > 0x1000 || (rem == 0x1000 && out & 1 == 1) {
        // May carry into the exponent, which rounds up to infinity correctly.
        out += 1;
    }
    sign | out as u16
}

/// Converts a binary16 bit pattern to the `f32` it represents exactly.
pub fn f16_bits_to_f32(bits: u16) -> f32 {
    let sign = ((bits & 0x8000) as u32) << 16;
    let exp = ((bits >> 10) & 0x1f) as u32;
    let man = (bits & 0x03ff) as u32;

    let out = match exp {
        0 if man == 0 => sign,
        0 => {
            let mut e: i32 = -14;
            let mut m = man;
            while m & 0x0400 == 0 {
                m <<= 1;
                e -= 1;
            }
            sign | (((e + 127) as u32) << 23) | ((m & 0x03ff) << 13)
        }
        0x1f => sign | 0x7f80_0000 | (man << 13),
        _ => sign | ((exp + 127 - 15) << 23) | (man << 13),
    };
    f32::from_bits(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_bit_patterns() {
        assert_eq!(f32_to_f16_bits(0.0), 0x0000);
        assert_eq!(f32_to_f16_bits(-0.0), 0x8000);
        assert_eq!(f32_to_f16_bits(1.0), 0x3c00);
        assert_eq!(f32_to_f16_bits(-2.0), 0xc000);
        assert_eq!(f32_to_f16_bits(0.5), 0x3800);
        assert_eq!(f32_to_f16_bits(65504.0), 0x7bff);
        assert_eq!(f32_to_f16_bits(f32::INFINITY), 0x7c00);
        assert_eq!(f32_to_f16_bits(f32::NEG_INFINITY), 0xfc00);
    }

    #[test]
    fn test_overflow_saturates_to_infinity() {
        assert_eq!(f32_to_f16_bits(65520.0), 0x7c00);
        assert_eq!(f32_to_f16_bits(1.0e9), 0x7c00);
        assert_eq!(f32_to_f16_bits(-1.0e9), 0xfc00);
    }

    #[test]
    fn test_subnormals() {
        // Smallest positive subnormal: 2^-24.
        let tiny = 2.0f32.powi(-24);
        assert_eq!(f32_to_f16_bits(tiny), 0x0001);
        assert_eq!(f16_bits_to_f32(0x0001), tiny);
        // Largest subnormal.
        assert_eq!(f16_bits_to_f32(0x03ff), 1023.0 * tiny);
        // Half of the smallest subnormal ties to even (zero).
        assert_eq!(f32_to_f16_bits(tiny / 2.0), 0x0000);
    }

    #[test]
    fn test_round_to_nearest_even() {
        // 1 + 2^-11 is exactly halfway between 1.0 and the next half value.
        let halfway = 1.0 + 2.0f32.powi(-11);
        assert_eq!(f32_to_f16_bits(halfway), 0x3c00);
        // Slightly above halfway rounds up.
        let above = 1.0 + 2.0f32.powi(-11) + 2.0f32.powi(-20);
        assert_eq!(f32_to_f16_bits(above), 0x3c01);
    }

    #[test]
    fn test_nan_survives() {
        let bits = f32_to_f16_bits(f32::NAN);
        assert_eq!(bits & 0x7c00, 0x7c00);
        assert_ne!(bits & 0x03ff, 0);
        assert!(f16_bits_to_f32(bits).is_nan());
    }

    #[test]
    fn test_every_finite_half_roundtrips_exactly() {
        for bits in 0u16..=0xffff {
            let exp = (bits >> 10) & 0x1f;
            if exp == 0x1f {
                continue;
            }
            let value = f16_bits_to_f32(bits);
            assert_eq!(f32_to_f16_bits(value), bits, "bits {bits:#06x}");
        }
    }
}
