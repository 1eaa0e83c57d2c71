//! Wavetables.
//!
//! Each table holds one cycle of a named waveform, peak value 1.0,
//! sampled by fixed-point phase with linear interpolation.

use lazy_static::lazy_static;

use crate::math::{lerp, TAU};

/// log2 of table length; the top `TABLE_BITS` of a phase index the table.
pub const TABLE_BITS: u32 = 11;
/// Samples per wave cycle.
pub const TABLE_LEN: usize = 1 << TABLE_BITS;
/// Bits of a phase below the table index, weighting interpolation.
pub const FRAC_BITS: u32 = 32 - TABLE_BITS;

const FRAC_SCALE: f32 = 1.0 / (1u32 << FRAC_BITS) as f32;

/// Named waveforms.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Wave {
    #[default]
    Sin,
    Sqr,
    Tri,
    /// Falling sawtooth.
    Saw,
    /// Absolute half-frequency sine: one positive arch per cycle.
    Ahs,
    /// Half-rectified sine.
    Hrs,
    /// Square root of sine, sign-symmetric.
    Srs,
    /// Squared sine, sign-symmetric.
    Ssr,
}

impl Wave {
    pub const COUNT: usize = 8;
    pub const NAMES: [&'static str; Self::COUNT] =
        ["sin", "sqr", "tri", "saw", "ahs", "hrs", "srs", "ssr"];

    pub fn from_name(name: &str) -> Option<Wave> {
        Some(match name {
            "sin" => Wave::Sin,
            "sqr" => Wave::Sqr,
            "tri" => Wave::Tri,
            "saw" => Wave::Saw,
            "ahs" => Wave::Ahs,
            "hrs" => Wave::Hrs,
            "srs" => Wave::Srs,
            "ssr" => Wave::Ssr,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        Self::NAMES[self as usize]
    }

    /// The wavetable for this waveform.
    #[inline]
    pub fn table(self) -> &'static WaveTable {
        &TABLES[self as usize]
    }
}

/// One cycle of a waveform.
pub struct WaveTable {
    samples: Box<[f32; TABLE_LEN]>,
}

impl WaveTable {
    fn from_fn(f: impl Fn(f64) -> f64) -> Self {
        let mut samples = Box::new([0.0f32; TABLE_LEN]);
        for (i, out) in samples.iter_mut().enumerate() {
            *out = f(i as f64 / TABLE_LEN as f64) as f32;
        }
        WaveTable { samples }
    }

    /// Sample the table at a 32-bit phase with linear interpolation.
    #[inline]
    pub fn at(&self, phase: u32) -> f32 {
        let i = (phase >> FRAC_BITS) as usize;
        let frac = (phase & ((1 << FRAC_BITS) - 1)) as f32 * FRAC_SCALE;
        let j = (i + 1) & (TABLE_LEN - 1);
        lerp(self.samples[i], self.samples[j], frac)
    }
}

lazy_static! {
    static ref TABLES: [WaveTable; Wave::COUNT] = [
        WaveTable::from_fn(|x| (x * TAU).sin()),
        WaveTable::from_fn(|x| if x < 0.5 { 1.0 } else { -1.0 }),
        WaveTable::from_fn(|x| {
            if x < 0.25 {
                4.0 * x
            } else if x < 0.75 {
                2.0 - 4.0 * x
            } else {
                4.0 * x - 4.0
            }
        }),
        WaveTable::from_fn(|x| 1.0 - 2.0 * x),
        WaveTable::from_fn(|x| 2.0 * (x * TAU * 0.5).sin() - 1.0),
        WaveTable::from_fn(|x| 2.0 * (x * TAU).sin().max(0.0) - 1.0),
        WaveTable::from_fn(|x| {
            let s = (x * TAU).sin();
            s.signum() * s.abs().sqrt()
        }),
        WaveTable::from_fn(|x| {
            let s = (x * TAU).sin();
            s * s.abs()
        }),
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_peak_at_one() {
        for wave in [
            Wave::Sin,
            Wave::Sqr,
            Wave::Tri,
            Wave::Saw,
            Wave::Ahs,
            Wave::Hrs,
            Wave::Srs,
            Wave::Ssr,
        ] {
            let table = wave.table();
            let mut peak = 0.0f32;
            for i in 0..TABLE_LEN {
                peak = peak.max(table.samples[i].abs());
            }
            assert!(
                peak <= 1.0 && peak > 0.9,
                "{}: peak {}",
                wave.name(),
                peak
            );
        }
    }

    #[test]
    fn interpolation_is_linear() {
        let table = Wave::Saw.table();
        // Halfway between adjacent saw samples.
        let half = 1u32 << (FRAC_BITS - 1);
        let v = table.at(half);
        let mid = 0.5 * (table.samples[0] + table.samples[1]);
        assert!((v - mid).abs() < 1.0e-6);
    }

    #[test]
    fn name_round_trip() {
        for name in Wave::NAMES {
            assert_eq!(Wave::from_name(name).unwrap().name(), name);
        }
        assert!(Wave::from_name("nope").is_none());
    }
}
