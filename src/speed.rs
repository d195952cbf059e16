//! Speed perturbation
//!
//! Tempo is changed by resampling the timeline and keeping the declared
//! sample rate, so pitch moves together with tempo.

use crate::resample::resample;
use crate::waveform::Waveform;
use crate::{Error, Result};
use log::debug;

/// Changes playback tempo by a continuous factor
#[derive(Debug, Clone, Copy, Default)]
pub struct SpeedPerturber;

impl SpeedPerturber {
    pub fn new() -> Self {
        Self
    }

    /// Play `signal` `speed_factor` times faster
    ///
    /// A factor of 2.0 halves the duration, 0.5 doubles it. The result keeps
    /// the sample rate of `signal`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if `speed_factor` is not finite or not
    /// positive, or if the slowed-down output would exceed
    /// [`MAX_OUTPUT_LEN`](crate::resample::MAX_OUTPUT_LEN).
    pub fn apply(&self, signal: &Waveform, speed_factor: f64) -> Result<Waveform> {
        if !speed_factor.is_finite() || speed_factor <= 0.0 {
            return Err(Error::InvalidParameter(format!(
                "Speed factor must be finite and positive, got {}",
                speed_factor
            )));
        }
        let out = resample(signal, 1.0 / speed_factor)?;
        debug!(
            "Speed x{:.4}: {} -> {} samples at {} Hz",
            speed_factor,
            signal.len(),
            out.len(),
            out.sample_rate()
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_sample_rate() {
        let w = Waveform::from_vec(vec![0.1; 22050], 22050).unwrap();
        let out = SpeedPerturber::new().apply(&w, 1.1).unwrap();
        assert_eq!(out.sample_rate(), 22050);
        assert_eq!(out.len(), 20045);
    }

    #[test]
    fn test_rejects_bad_factor() {
        let w = Waveform::from_vec(vec![0.1; 10], 16000).unwrap();
        for factor in [0.0, -0.5, f64::NAN, f64::NEG_INFINITY] {
            assert!(matches!(
                SpeedPerturber::new().apply(&w, factor),
                Err(Error::InvalidParameter(_))
            ));
        }
    }

    #[test]
    fn test_rejects_unbounded_slowdown() {
        let w = Waveform::from_vec(vec![0.1; 16000], 16000).unwrap();
        assert!(matches!(
            SpeedPerturber::new().apply(&w, 1e-7),
            Err(Error::InvalidParameter(_))
        ));
    }
}
