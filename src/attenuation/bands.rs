//! Octave bands and decibel energy arithmetic.

/// Number of octave bands used by the propagation model (63 Hz to 8 kHz).
pub const NUM_BANDS: usize = 8;

/// Center frequencies of the octave bands in Hz.
pub const BAND_FREQUENCIES: [f64; NUM_BANDS] = [
    63.0, 125.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0,
];

/// A-weighting corrections per octave band (dB).
pub const A_WEIGHTING: [f64; NUM_BANDS] = [-26.2, -16.1, -8.6, -3.2, 0.0, 1.2, 1.0, -1.1];

/// Relative road-traffic emission spectrum per octave band, unweighted (dB).
pub const ROAD_SPECTRUM: [f64; NUM_BANDS] = [8.2, 3.1, -0.4, -2.8, -3.0, -6.2, -10.0, -12.9];

/// Per-band sound levels in dB.
pub type Spectrum = [f64; NUM_BANDS];

/// Energy (decibel) sum of two levels: `10 log10(10^(a/10) + 10^(b/10))`.
pub fn sum_db(a: f64, b: f64) -> f64 {
    let e = 10f64.powf(a / 10.0) + 10f64.powf(b / 10.0);
    10.0 * e.log10()
}

/// Band-wise energy sum of two spectra.
pub fn sum_db_spectrum(a: &Spectrum, b: &Spectrum) -> Spectrum {
    let mut out = [0.0; NUM_BANDS];
    for (i, o) in out.iter_mut().enumerate() {
        *o = sum_db(a[i], b[i]);
    }
    out
}

/// Total level of a spectrum by energy summation across bands.
pub fn total_level(spectrum: &Spectrum) -> f64 {
    let e: f64 = spectrum.iter().map(|l| 10f64.powf(l / 10.0)).sum();
    10.0 * e.log10()
}

/// Applies the A-weighting corrections to an unweighted spectrum.
pub fn a_weighted(spectrum: &Spectrum) -> Spectrum {
    let mut out = *spectrum;
    for (o, w) in out.iter_mut().zip(A_WEIGHTING.iter()) {
        *o += w;
    }
    out
}

/// Splits a global dB(A) emission level into per-band dB(A) levels following
/// the road-traffic spectrum shape.
///
/// The repartition is normalized so the energy sum of the result equals the
/// input level exactly.
pub fn spectrum_repartition(level_dba: f64) -> Spectrum {
    let shape = a_weighted(&ROAD_SPECTRUM);
    let norm = total_level(&shape);
    let mut out = [0.0; NUM_BANDS];
    for (i, o) in out.iter_mut().enumerate() {
        *o = level_dba + shape[i] - norm;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum_db_doubling() {
        // Two equal levels add 10*log10(2) ~= 3.01 dB.
        let sum = sum_db(60.0, 60.0);
        assert!((sum - 63.0103).abs() < 1e-3, "got {sum}");
    }

    #[test]
    fn test_sum_db_commutative_associative() {
        let a = 55.0;
        let b = 61.5;
        let c = 48.2;
        assert!((sum_db(a, b) - sum_db(b, a)).abs() < 1e-12);
        let left = sum_db(sum_db(a, b), c);
        let right = sum_db(a, sum_db(b, c));
        assert!((left - right).abs() < 1e-10);
    }

    #[test]
    fn test_sum_db_identity() {
        // Summing with "no energy" returns the value unchanged.
        let v = 42.0;
        assert!((sum_db(v, f64::NEG_INFINITY) - v).abs() < 1e-12);
    }

    #[test]
    fn test_sum_db_dominance() {
        // A much smaller contribution barely moves the total.
        let sum = sum_db(80.0, 40.0);
        assert!(sum > 80.0 && sum < 80.01);
    }

    #[test]
    fn test_total_level_single_band() {
        let mut spectrum = [f64::NEG_INFINITY; NUM_BANDS];
        spectrum[4] = 70.0;
        assert!((total_level(&spectrum) - 70.0).abs() < 1e-12);
    }

    #[test]
    fn test_spectrum_repartition_preserves_total() {
        let spectrum = spectrum_repartition(85.0);
        assert!((total_level(&spectrum) - 85.0).abs() < 1e-9);
        // Road traffic peaks around 1 kHz once A-weighted.
        let max_band = spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(max_band, 4);
    }

    #[test]
    fn test_sum_db_spectrum() {
        let a = spectrum_repartition(80.0);
        let b = spectrum_repartition(80.0);
        let merged = sum_db_spectrum(&a, &b);
        assert!((total_level(&merged) - 83.0103).abs() < 1e-3);
    }

    #[test]
    fn test_a_weighting_reference_band() {
        // 1 kHz is the A-weighting reference: no correction.
        let flat = [60.0; NUM_BANDS];
        let weighted = a_weighted(&flat);
        assert!((weighted[4] - 60.0).abs() < 1e-12);
        assert!(weighted[0] < weighted[4]);
    }
}
