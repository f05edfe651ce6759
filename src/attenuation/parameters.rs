//! Atmospheric configuration for the attenuation formulas.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::attenuation::bands::{BAND_FREQUENCIES, NUM_BANDS};

/// Absolute zero in Celsius.
pub const K_0: f64 = 273.15;
/// Reference ambient atmospheric temperature (K).
pub const KREF: f64 = 293.15;
/// Standard atmospheric pressure (Pa).
pub const PREF: f64 = 101_325.0;
/// Isothermal temperature at the triple point (K).
const K01: f64 = 273.16;

/// Air state plus the per-band coefficients derived from it.
///
/// The derived fields (`celerity`, `alpha_atmo`) are recomputed whenever the
/// state changes through the setters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttenuationParameters {
    /// Temperature in Celsius.
    pub temperature: f64,
    /// Relative humidity in percent (0-100).
    pub humidity: f64,
    /// Atmospheric pressure in Pa.
    pub pressure: f64,
    /// Sound celerity in m/s, derived from the temperature.
    pub celerity: f64,
    /// Atmospheric absorption per band in dB/km.
    pub alpha_atmo: [f64; NUM_BANDS],
}

impl Default for AttenuationParameters {
    fn default() -> Self {
        Self::new(15.0, 70.0, PREF).expect("default air state is valid")
    }
}

impl AttenuationParameters {
    pub fn new(temperature: f64, humidity: f64, pressure: f64) -> Result<Self> {
        if !(0.0..=100.0).contains(&humidity) {
            bail!("relative humidity must be within 0-100 %, got {humidity}");
        }
        if pressure <= 0.0 {
            bail!("atmospheric pressure must be positive, got {pressure}");
        }
        if temperature <= -K_0 {
            bail!("temperature below absolute zero: {temperature}");
        }
        let mut params = Self {
            temperature,
            humidity,
            pressure,
            celerity: 0.0,
            alpha_atmo: [0.0; NUM_BANDS],
        };
        params.refresh();
        Ok(params)
    }

    pub fn set_temperature(&mut self, temperature: f64) {
        self.temperature = temperature;
        self.refresh();
    }

    pub fn set_humidity(&mut self, humidity: f64) {
        self.humidity = humidity;
        self.refresh();
    }

    fn refresh(&mut self) {
        self.celerity = celerity(self.temperature + K_0);
        for (i, alpha) in self.alpha_atmo.iter_mut().enumerate() {
            *alpha = atmospheric_absorption(BAND_FREQUENCIES[i], self.humidity, self.temperature + K_0);
        }
    }
}

/// Sound celerity in air for a temperature in Kelvin (ISO 9613-1).
pub fn celerity(kelvin: f64) -> f64 {
    343.2 * (kelvin / KREF).sqrt()
}

/// Atmospheric absorption coefficient in dB/km at one frequency.
///
/// Classical + molecular relaxation model of ISO 9613-1 in the form used by
/// the CNOSSOS propagation standard.
pub fn atmospheric_absorption(freq: f64, humidity: f64, t_kel: f64) -> f64 {
    let tcor = t_kel / KREF;
    let xmol = humidity * 10f64.powf(4.6151 - 6.8346 * (K01 / t_kel).powf(1.261));

    let frq_o = 24.0 + 40400.0 * xmol * ((0.02 + xmol) / (0.391 + xmol));
    let frq_n = tcor.powf(-0.5)
        * (9.0 + 280.0 * xmol * (-4.17 * (tcor.powf(-1.0 / 3.0) - 1.0)).exp());

    let a1 = 0.01275 * (-2239.1 / t_kel).exp() / (frq_o + freq * freq / frq_o);
    let a2 = 0.10680 * (-3352.0 / t_kel).exp() / (frq_n + freq * freq / frq_n);
    let a0 = 8.686
        * freq
        * freq
        * (1.84e-11 * tcor.powf(0.5) + tcor.powf(-2.5) * (a1 + a2));

    a0 * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_celerity() {
        let params = AttenuationParameters::default();
        // ~340 m/s at 15 degrees Celsius
        assert!(
            (params.celerity - 340.3).abs() < 0.5,
            "celerity = {}",
            params.celerity
        );
    }

    #[test]
    fn test_alpha_magnitudes() {
        let params = AttenuationParameters::default();
        // Reference magnitudes at 15 C / 70 %: ~4 dB/km at 1 kHz, around
        // 0.1 dB/km at 63 Hz, far higher at 8 kHz.
        assert!(
            params.alpha_atmo[4] > 3.0 && params.alpha_atmo[4] < 5.0,
            "alpha(1 kHz) = {}",
            params.alpha_atmo[4]
        );
        assert!(params.alpha_atmo[0] < 0.5);
        assert!(params.alpha_atmo[7] > 50.0);
    }

    #[test]
    fn test_alpha_increases_with_frequency() {
        let params = AttenuationParameters::default();
        for b in 1..NUM_BANDS {
            assert!(
                params.alpha_atmo[b] > params.alpha_atmo[b - 1],
                "absorption must grow with frequency (band {b})"
            );
        }
    }

    #[test]
    fn test_setters_refresh_derived_state() {
        let mut params = AttenuationParameters::default();
        let before = params.alpha_atmo[4];
        params.set_temperature(30.0);
        assert!(params.celerity > 343.0);
        assert!((params.alpha_atmo[4] - before).abs() > 1e-6);
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        assert!(AttenuationParameters::new(15.0, 150.0, PREF).is_err());
        assert!(AttenuationParameters::new(15.0, 70.0, -10.0).is_err());
        assert!(AttenuationParameters::new(-300.0, 70.0, PREF).is_err());
    }
}
