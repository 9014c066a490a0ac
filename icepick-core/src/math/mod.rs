//! Fixed-point helpers for the RC sense front-end.
//!
//! Everything here works in signed 5.26 fixed point (`1.0 == 1 << 26`) so the
//! conversion runs on cores without an FPU and produces the same bits the
//! calibration tooling was fitted against.

/// One in s5.26.
pub const FP_ONE: i32 = 1 << 26;

/// Arguments below -26.5 underflow to zero.
pub const EXP2_UNDERFLOW: i32 = -0x6A00_0000;

/// Arguments at or above 4.5 no longer fit the s5.26 output range.
pub const EXP2_SATURATE: i32 = 0x1200_0000;

/// Minimax coefficients for `2^f - 1`, `f` in `[-0.5, 0.5]`, highest order first.
///
/// Each entry is `trunc(c * 2^q + bias)` where the bias absorbs the rounding
/// error of the fitted polynomial:
///
/// | term | `c`            | `q` | bias |
/// |------|----------------|-----|------|
/// | x^6  | 1.53303146e-4  | 36  | 996  |
/// | x^5  | 1.33887795e-3  | 35  | 99   |
/// | x^4  | 9.61833261e-3  | 34  | 121  |
/// | x^3  | 5.55036329e-2  | 33  | 51   |
/// | x^2  | 2.40226507e-1  | 32  | 8    |
/// | x^1  | 6.93147182e-1  | 31  | 5    |
///
/// The decreasing `q` matches one `mulhi` per Horner step against an argument
/// held in Q31.
pub const EXP2_COEFFICIENTS: [i32; 6] = [
    10_535_907,
    46_003_595,
    165_241_817,
    476_772_627,
    1_031_764_999,
    1_488_522_244,
];

/// High word of the signed 64-bit product.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn mulhi(a: i32, b: i32) -> i32 {
    ((a as i64 * b as i64) >> 32) as i32
}

/// Computes `2^a` in s5.26 fixed point.
///
/// Returns exactly `0` below [`EXP2_UNDERFLOW`] and saturates to `i32::MAX`
/// from [`EXP2_SATURATE`] upwards; the function is monotonic over its whole
/// domain.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_possible_wrap)]
pub const fn exp2_fp(a: i32) -> i32 {
    if a < EXP2_UNDERFLOW {
        return 0;
    }
    if a >= EXP2_SATURATE {
        return i32::MAX;
    }

    // a = i + f with f in [-0.5, 0.5]
    let i = (a + (FP_ONE >> 1)) & !(FP_ONE - 1);
    let f = (a - i) << 5;
    let shift = ((5 << 26) - i) >> 26;

    let mut r = EXP2_COEFFICIENTS[0];
    let mut term = 1;
    while term < EXP2_COEFFICIENTS.len() {
        r = mulhi(r, f).wrapping_add(EXP2_COEFFICIENTS[term]);
        term += 1;
    }
    r = mulhi(r, f);

    // r holds 2^f - 1 in Q30: double it, add 1.0 in Q31, then round into s5.26.
    let scaled = (r as u32)
        .wrapping_mul(2)
        .wrapping_add(1 << 31)
        .wrapping_add((1u32 << shift) / 2)
        .wrapping_add(1);
    (scaled >> shift) as i32
}

/// Calibration of the RC charge timing front-end.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SenseCalibration {
    /// `log2(e) / K_rc` expressed in 2^-26 units per charge count.
    pub k_time: i32,
    /// Full-scale reading, in millivolts at the sense pin.
    pub k_scale: i32,
}

impl SenseCalibration {
    /// Reference board: 96 MHz sampling into 100 nF through 5 kΩ, 3.3 V rail
    /// behind a 1:2 divider.
    pub const REFERENCE: Self = Self::new(4034, 6600);

    #[must_use]
    pub const fn new(k_time: i32, k_scale: i32) -> Self {
        Self { k_time, k_scale }
    }
}

impl Default for SenseCalibration {
    fn default() -> Self {
        Self::REFERENCE
    }
}

/// Converts a raw charge count into millivolts: `k_scale * (1 - 2^(-k_time * raw))`.
///
/// The exponent is formed in 64 bits and clamped to `0..=i32::MAX`: very long
/// charge times read as full scale and a negative `k_time` reads as zero.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn convert_sense(raw_charge: u32, calibration: SenseCalibration) -> i32 {
    let exponent =
        (i64::from(raw_charge) * i64::from(calibration.k_time)).clamp(0, i64::from(i32::MAX));
    let remaining = exp2_fp(-(exponent as i32));

    let mut value = (FP_ONE - remaining) >> 13;
    value = value.wrapping_mul(calibration.k_scale);
    value >> 13
}

/// Q16 gain undoing the 1.5 kΩ series impedance on the Vsense input.
pub const VSENSE_COMPENSATION_Q16: i64 = 70_451;

/// Applies the Vsense input impedance correction to a converted reading.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn compensate_vsense(millivolts: i32) -> i32 {
    ((i64::from(millivolts) * VSENSE_COMPENSATION_Q16) >> 16) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn coefficient_table_matches_derivation() {
        let derived = [
            (1.533_031_46e-4_f64, 36, 996.0),
            (1.338_877_95e-3, 35, 99.0),
            (9.618_332_61e-3, 34, 121.0),
            (5.550_363_29e-2, 33, 51.0),
            (2.402_265_07e-1, 32, 8.0),
            (6.931_471_82e-1, 31, 5.0),
        ]
        .map(|(c, q, bias)| (c * (1u64 << q) as f64 + bias) as i32);

        assert_eq!(derived, EXP2_COEFFICIENTS);
    }

    #[test]
    fn mulhi_keeps_the_signed_high_word() {
        assert_eq!(mulhi(1 << 30, 1 << 30), 1 << 28);
        assert_eq!(mulhi(-(1 << 30), 1 << 30), -(1 << 28));
        assert_eq!(mulhi(-1, 1), -1);
        assert_eq!(mulhi(0, i32::MAX), 0);
    }

    #[test]
    fn exp2_of_zero_is_exactly_one() {
        assert_eq!(exp2_fp(0), FP_ONE);
    }

    #[test]
    fn exp2_of_integers_is_a_power_of_two() {
        assert_eq!(exp2_fp(FP_ONE), 2 * FP_ONE);
        assert_eq!(exp2_fp(2 * FP_ONE), 4 * FP_ONE);
        assert_eq!(exp2_fp(-FP_ONE), FP_ONE / 2);
        assert_eq!(exp2_fp(-3 * FP_ONE), FP_ONE / 8);
        assert_eq!(exp2_fp(-10 * FP_ONE), 65_536);
    }

    #[test]
    fn exp2_matches_reference_bits() {
        assert_eq!(exp2_fp(FP_ONE / 2), 94_906_266);
        assert_eq!(exp2_fp(-FP_ONE / 2), 47_453_133);
        assert_eq!(exp2_fp(3 << 24), 112_863_207);
        assert_eq!(exp2_fp(4 * FP_ONE), 1_073_741_825);
        assert_eq!(exp2_fp(EXP2_SATURATE - 1), 1_518_500_228);
    }

    #[test]
    fn exp2_underflow_boundary() {
        assert_eq!(exp2_fp(EXP2_UNDERFLOW), 1);
        assert_eq!(exp2_fp(-26 * FP_ONE), 1);
        assert_eq!(exp2_fp(EXP2_UNDERFLOW - 1), 0);
        assert_eq!(exp2_fp(i32::MIN), 0);
    }

    #[test]
    fn exp2_saturates_instead_of_overflowing() {
        assert_eq!(exp2_fp(EXP2_SATURATE), i32::MAX);
        assert_eq!(exp2_fp(i32::MAX), i32::MAX);
    }

    #[test]
    fn exp2_is_monotonic_across_rounding_boundaries() {
        for whole in -27..5 {
            let boundary = (whole << 26) + (FP_ONE >> 1);
            let mut previous = exp2_fp(boundary - 2_000);
            for a in (boundary - 2_000)..(boundary + 2_000) {
                let value = exp2_fp(a);
                assert!(value >= previous, "exp2 decreased at {a:#x}");
                previous = value;
            }
        }
    }

    #[test]
    fn exp2_is_monotonic_on_a_coarse_sweep() {
        let mut previous = 0;
        let mut a = i32::MIN;
        while a < i32::MAX - 0x20_0000 {
            let value = exp2_fp(a);
            assert!(value >= previous, "exp2 decreased at {a:#x}");
            previous = value;
            a += 0x10_0000 + 7;
        }
    }

    #[test]
    fn convert_sense_matches_reference_readings() {
        let cal = SenseCalibration::REFERENCE;
        assert_eq!(convert_sense(0, cal), 0);
        assert_eq!(convert_sense(100, cal), 27);
        assert_eq!(convert_sense(9_039, cal), 2_070);
        assert_eq!(convert_sense(32_173, cal), 4_872);
        assert_eq!(convert_sense(100_000, cal), 6_496);
    }

    #[test]
    fn convert_sense_reads_full_scale_for_long_charge_times() {
        let cal = SenseCalibration::REFERENCE;
        assert_eq!(convert_sense(1_000_000, cal), 6_600);
        assert_eq!(convert_sense(0x7FFF_FFFF, cal), 6_600);
    }

    #[test]
    fn convert_sense_uses_supplied_calibration() {
        let halved = SenseCalibration::new(4034, 3300);
        assert_eq!(convert_sense(1_000_000, halved), 3_300);
        assert!(convert_sense(32_173, halved) < convert_sense(32_173, SenseCalibration::REFERENCE));
    }

    #[test]
    fn convert_sense_reads_zero_for_negative_time_constants() {
        let inverted = SenseCalibration::new(-4034, 6600);
        assert_eq!(convert_sense(9_039, inverted), 0);
        assert_eq!(convert_sense(u32::MAX, SenseCalibration::new(i32::MIN, 6600)), 0);
    }

    #[test]
    fn vsense_compensation_scales_up() {
        assert_eq!(compensate_vsense(0), 0);
        assert_eq!(compensate_vsense(65_536), 70_451);
        assert_eq!(compensate_vsense(1_000), 1_074);
    }
}
