//! Small numeric helpers shared by the link-adaptation code

/// Power ratio in dB to linear scale
#[inline]
pub fn db_to_linear(db: f64) -> f64 {
    10.0_f64.powf(db / 10.0)
}

/// Linear power ratio to dB
#[inline]
pub fn linear_to_db(linear: f64) -> f64 {
    10.0 * linear.log10()
}

/// dBm to milliwatts
#[inline]
pub fn dbm_to_mw(dbm: f64) -> f64 {
    db_to_linear(dbm)
}

/// Milliwatts to dBm
#[inline]
pub fn mw_to_dbm(mw: f64) -> f64 {
    linear_to_db(mw)
}

/// Complementary error function.
///
/// Abramowitz & Stegun 7.1.26, max absolute error around 1.5e-7,
/// which is far below the resolution of the error-rate tables.
pub fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * z);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    let r = poly * (-z * z).exp();
    if x >= 0.0 {
        r
    } else {
        2.0 - r
    }
}

/// Splitmix64 finalizer, used to fold several integers into one seed.
#[inline]
pub fn mix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_conversion() {
        assert!((db_to_linear(0.0) - 1.0).abs() < 1e-12);
        assert!((db_to_linear(10.0) - 10.0).abs() < 1e-9);
        assert!((db_to_linear(-30.0) - 0.001).abs() < 1e-12);
        assert!((linear_to_db(100.0) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_dbm_roundtrip() {
        assert!((dbm_to_mw(23.0) - 199.526_231).abs() < 1e-5);
        assert!((mw_to_dbm(1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_erfc_reference_points() {
        assert!((erfc(0.0) - 1.0).abs() < 1e-6);
        assert!((erfc(1.0) - 0.157_299_207).abs() < 1e-6);
        assert!((erfc(2.0) - 0.004_677_735).abs() < 1e-6);
        assert!((erfc(-1.0) - 1.842_700_793).abs() < 1e-6);
        assert!(erfc(6.0) < 1e-15);
    }

    #[test]
    fn test_mix64_spreads_neighbours() {
        let a = mix64(1);
        let b = mix64(2);
        assert_ne!(a, b);
        assert!((a ^ b).count_ones() > 16);
    }
}
