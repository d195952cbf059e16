//! Additive noise at a target signal-to-noise ratio
//!
//! The noise clip is fitted to the signal length, scaled so that the ratio
//! of signal power to added noise power equals the requested SNR, summed with
//! the signal and finally hard-limited to the valid amplitude domain.

use crate::random::RandomSource;
use crate::waveform::{NoiseClip, PadPolicy, Waveform, AMPLITUDE_LIMIT};
use crate::{Error, Result};
use log::{debug, warn};
use ndarray::Zip;
use std::sync::Arc;

/// Result of one noise augmentation
#[derive(Debug, Clone)]
pub struct NoiseOutcome {
    pub waveform: Waveform,
    /// Gain applied to the fitted noise segment
    pub gain: f64,
    /// Sample of the noise clip the segment starts at
    pub offset: usize,
    /// Number of output samples that had to be hard-limited
    pub clipped_samples: usize,
}

impl NoiseOutcome {
    pub fn clipped(&self) -> bool {
        self.clipped_samples > 0
    }
}

/// Mixes signals with noise at a caller-specified SNR
#[derive(Debug, Clone, Copy)]
pub struct NoiseAugmenter {
    require_signal: bool,
}

impl Default for NoiseAugmenter {
    fn default() -> Self {
        Self { require_signal: true }
    }
}

impl NoiseAugmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept silent signals instead of failing on them
    ///
    /// A silent signal receives no noise, since no gain yields a finite SNR.
    pub fn allow_silent_signal(mut self) -> Self {
        self.require_signal = false;
        self
    }

    /// Mix `noise` into `signal` at `snr_db`
    ///
    /// # Arguments
    ///
    /// * `signal` - Clean audio
    /// * `noise` - Noise source at the same sample rate; shorter clips are
    ///   repeated cyclically from a random offset, longer clips contribute a
    ///   random contiguous segment
    /// * `snr_db` - Target ratio of signal power to added noise power, in dB
    /// * `rng` - Random source for the segment position
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * `snr_db` is not finite ([`Error::InvalidParameter`])
    /// * the sample rates differ ([`Error::SampleRateMismatch`])
    /// * the noise is silent, or the signal is silent while required
    ///   ([`Error::DegenerateSignal`])
    pub fn apply(
        &self,
        signal: &Waveform,
        noise: &NoiseClip,
        snr_db: f64,
        rng: &mut RandomSource,
    ) -> Result<NoiseOutcome> {
        if !snr_db.is_finite() {
            return Err(Error::InvalidParameter(format!("SNR {} dB is not finite", snr_db)));
        }
        if signal.sample_rate() != noise.sample_rate() {
            return Err(Error::SampleRateMismatch {
                expected: signal.sample_rate(),
                found: noise.sample_rate(),
            });
        }

        let (segment, offset) = fit_noise(signal.len(), noise, rng)?;

        let signal_power = signal.power()?;
        let noise_power = segment.power()?;
        if noise_power == 0.0 {
            return Err(Error::DegenerateSignal("Noise segment has zero power".into()));
        }
        if signal_power == 0.0 {
            if self.require_signal {
                return Err(Error::DegenerateSignal("Signal has zero power".into()));
            }
            debug!("Silent signal, skipping noise");
            return Ok(NoiseOutcome {
                waveform: signal.clone(),
                gain: 0.0,
                offset,
                clipped_samples: 0,
            });
        }

        let gain = (signal_power / (noise_power * 10f64.powf(snr_db / 10.0))).sqrt();
        debug!(
            "Mixing noise at {:.2} dB: signal power {:.3e}, noise power {:.3e}, gain {:.4e}",
            snr_db, signal_power, noise_power, gain
        );

        if !gain.is_finite() {
            return Err(Error::InvalidParameter(format!(
                "Noise gain for {} dB is not representable",
                snr_db
            )));
        }

        // Sum and limit in f64 so extreme gains saturate instead of overflowing f32.
        let limit = AMPLITUDE_LIMIT as f64;
        let mut clipped_samples = 0;
        let mixed = Zip::from(signal.samples())
            .and(segment.samples())
            .map_collect(|&s, &n| {
                let v = s as f64 + gain * n as f64;
                if v.abs() > limit {
                    clipped_samples += 1;
                }
                v.clamp(-limit, limit) as f32
            });
        let waveform = Waveform::from_parts(mixed, signal.sample_rate());
        if clipped_samples > 0 {
            warn!("Noise mix clipped {} of {} samples", clipped_samples, waveform.len());
        }

        Ok(NoiseOutcome {
            waveform,
            gain,
            offset,
            clipped_samples,
        })
    }
}

/// Fit `noise` to `target_len` samples, returning the segment and its start offset.
fn fit_noise(
    target_len: usize,
    noise: &NoiseClip,
    rng: &mut RandomSource,
) -> Result<(Waveform, usize)> {
    let len = noise.len();
    if len >= target_len {
        let offset = rng.index(len - target_len + 1)?;
        Ok((noise.segment(offset, target_len)?, offset))
    } else {
        let offset = rng.index(len)?;
        let segment = noise.rotate(offset).pad_or_trim(target_len, PadPolicy::CyclicRepeat)?;
        Ok((segment, offset))
    }
}

/// Shared collection of noise clips to draw from
///
/// Cloning is cheap; clips are reference counted.
#[derive(Debug, Clone, Default)]
pub struct NoiseBank {
    clips: Arc<Vec<NoiseClip>>,
}

impl NoiseBank {
    pub fn new(clips: Vec<NoiseClip>) -> Self {
        Self { clips: Arc::new(clips) }
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&NoiseClip> {
        self.clips.get(index)
    }

    /// Pick a clip uniformly at random, returning its index and the clip
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the bank is empty.
    pub fn choose(&self, rng: &mut RandomSource) -> Result<(usize, &NoiseClip)> {
        if self.clips.is_empty() {
            return Err(Error::InvalidInput("Noise bank is empty".into()));
        }
        let index = rng.index(self.clips.len())?;
        Ok((index, &self.clips[index]))
    }
}

impl From<Vec<NoiseClip>> for NoiseBank {
    fn from(clips: Vec<NoiseClip>) -> Self {
        Self::new(clips)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn tone(len: usize, amplitude: f32) -> Waveform {
        let samples = (0..len).map(|i| amplitude * (i as f32 * 0.05).sin()).collect();
        Waveform::from_vec(samples, 16000).unwrap()
    }

    fn added_noise_snr(signal: &Waveform, mixed: &Waveform) -> f64 {
        let diff = mixed.mix(signal, 1.0, -1.0).unwrap();
        10.0 * (signal.power().unwrap() / diff.power().unwrap()).log10()
    }

    #[test]
    fn test_hits_target_snr_with_longer_noise() {
        let signal = tone(4000, 0.3);
        let noise = tone(10000, 0.8).rotate(17);
        let mut rng = RandomSource::from_seed(3);
        for snr in [-5.0, 0.0, 10.0, 30.0] {
            let out = NoiseAugmenter::new().apply(&signal, &noise, snr, &mut rng).unwrap();
            assert!(!out.clipped());
            assert!(out.offset <= 6000);
            assert_abs_diff_eq!(added_noise_snr(&signal, &out.waveform), snr, epsilon = 0.05);
        }
    }

    #[test]
    fn test_short_noise_is_repeated() {
        let signal = tone(5000, 0.3);
        let noise = Waveform::from_vec(vec![0.5, -0.5, 0.25], 16000).unwrap();
        let mut rng = RandomSource::from_seed(9);
        let out = NoiseAugmenter::new().apply(&signal, &noise, 6.0, &mut rng).unwrap();
        assert_eq!(out.waveform.len(), 5000);
        assert!(out.offset < 3);
        assert_abs_diff_eq!(added_noise_snr(&signal, &out.waveform), 6.0, epsilon = 0.1);
    }

    #[test]
    fn test_silent_sources() {
        let silent = Waveform::from_vec(vec![0.0; 100], 16000).unwrap();
        let signal = tone(100, 0.5);
        let mut rng = RandomSource::from_seed(0);
        assert!(matches!(
            NoiseAugmenter::new().apply(&signal, &silent, 0.0, &mut rng),
            Err(Error::DegenerateSignal(_))
        ));
        assert!(matches!(
            NoiseAugmenter::new().apply(&silent, &signal, 0.0, &mut rng),
            Err(Error::DegenerateSignal(_))
        ));
        let out = NoiseAugmenter::new()
            .allow_silent_signal()
            .apply(&silent, &signal, 0.0, &mut rng)
            .unwrap();
        assert_eq!(out.waveform, silent);
    }

    #[test]
    fn test_rate_mismatch_and_bad_snr() {
        let signal = tone(100, 0.5);
        let noise = Waveform::from_vec(vec![0.1; 100], 8000).unwrap();
        let mut rng = RandomSource::from_seed(0);
        assert!(matches!(
            NoiseAugmenter::new().apply(&signal, &noise, 0.0, &mut rng),
            Err(Error::SampleRateMismatch { .. })
        ));
        assert!(matches!(
            NoiseAugmenter::new().apply(&signal, &signal, f64::NAN, &mut rng),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_loud_noise_is_clipped_not_rejected() {
        let signal = tone(2000, 0.9);
        let noise = tone(2000, 0.9).rotate(500);
        let mut rng = RandomSource::from_seed(5);
        let out = NoiseAugmenter::new().apply(&signal, &noise, -20.0, &mut rng).unwrap();
        assert!(out.clipped());
        assert!(out.waveform.peak() <= AMPLITUDE_LIMIT);
    }

    #[test]
    fn test_extreme_negative_snr_saturates() {
        let signal = tone(2000, 0.5);
        let noise = tone(3000, 0.5).rotate(123);
        let mut rng = RandomSource::from_seed(21);
        for snr in [-800.0, -1000.0] {
            let out = NoiseAugmenter::new().apply(&signal, &noise, snr, &mut rng).unwrap();
            assert!(out.clipped());
            assert!(out.gain > 1e39);
            assert!(out.waveform.samples().iter().all(|v| v.is_finite()));
            assert_abs_diff_eq!(out.waveform.peak(), AMPLITUDE_LIMIT);
        }
    }

    #[test]
    fn test_bank_choose() {
        let bank = NoiseBank::new(vec![tone(10, 0.1), tone(20, 0.1)]);
        let mut rng = RandomSource::from_seed(11);
        let (index, clip) = bank.choose(&mut rng).unwrap();
        assert_eq!(clip.len(), if index == 0 { 10 } else { 20 });
        assert!(NoiseBank::default().choose(&mut rng).is_err());
    }
}
