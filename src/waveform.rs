//! Mono sample buffers
//!
//! This module provides the [`Waveform`] value type shared by every transform,
//! together with the arithmetic primitives they are built from: power,
//! scaling, length adjustment, mixing and amplitude limiting.

use crate::{Error, Result};
use ndarray::{s, Array1, ArrayView1, Zip};
use ndarray_stats::QuantileExt;

/// Upper bound of the valid amplitude domain `[-1.0, 1.0]`.
pub const AMPLITUDE_LIMIT: f32 = 1.0;

/// A waveform used as a noise source
pub type NoiseClip = Waveform;

/// How [`Waveform::pad_or_trim`] fills a buffer that is too short.
///
/// Buffers that are too long are always truncated at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadPolicy {
    /// Append zeros
    ZeroPad,
    /// Repeat the buffer from its start
    CyclicRepeat,
    /// Only shorten; a buffer shorter than the target is an error
    Trim,
}

/// Immutable mono audio buffer
///
/// A waveform always holds at least one sample, every sample is finite and
/// the sample rate is positive. Operations return new waveforms instead of
/// mutating in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    samples: Array1<f32>,
    sample_rate: u32,
}

impl Waveform {
    /// Create a waveform from raw samples
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if:
    /// * `samples` is empty
    /// * any sample is NaN or infinite
    /// * `sample_rate` is zero
    pub fn new(samples: Array1<f32>, sample_rate: u32) -> Result<Self> {
        if samples.is_empty() {
            return Err(Error::InvalidInput("Waveform must hold at least one sample".into()));
        }
        if sample_rate == 0 {
            return Err(Error::InvalidInput("Sample rate must be positive".into()));
        }
        if let Some(pos) = samples.iter().position(|v| !v.is_finite()) {
            return Err(Error::InvalidInput(format!(
                "Sample {} is not finite ({})",
                pos, samples[pos]
            )));
        }
        Ok(Self { samples, sample_rate })
    }

    /// Create a waveform from a vector of samples
    pub fn from_vec(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        Self::new(Array1::from_vec(samples), sample_rate)
    }

    /// Build a waveform from samples already known to be valid.
    pub(crate) fn from_parts(samples: Array1<f32>, sample_rate: u32) -> Self {
        debug_assert!(!samples.is_empty() && sample_rate > 0);
        debug_assert!(samples.iter().all(|v| v.is_finite()));
        Self { samples, sample_rate }
    }

    pub fn samples(&self) -> ArrayView1<'_, f32> {
        self.samples.view()
    }

    pub fn into_samples(self) -> Array1<f32> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channel count; always 1
    pub fn channels(&self) -> u16 {
        1
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Mean squared sample value
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the buffer is empty.
    pub fn power(&self) -> Result<f64> {
        if self.samples.is_empty() {
            return Err(Error::InvalidInput("Cannot compute power of an empty buffer".into()));
        }
        let energy: f64 = self.samples.iter().map(|&v| (v as f64) * (v as f64)).sum();
        Ok(energy / self.samples.len() as f64)
    }

    /// Largest absolute sample value
    pub fn peak(&self) -> f32 {
        self.samples
            .mapv(f32::abs)
            .max()
            .copied()
            .unwrap_or(0.0)
    }

    /// Multiply every sample by `factor`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if `factor` is not finite, or if the
    /// scaled samples overflow `f32`.
    pub fn scale(&self, factor: f64) -> Result<Waveform> {
        if !factor.is_finite() {
            return Err(Error::InvalidParameter(format!("Scale factor {} is not finite", factor)));
        }
        let scaled = self.samples.mapv(|v| (v as f64 * factor) as f32);
        if scaled.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidParameter(format!(
                "Scaling by {} overflows the sample type",
                factor
            )));
        }
        Ok(Self::from_parts(scaled, self.sample_rate))
    }

    /// Return a waveform of exactly `target_length` samples
    ///
    /// # Arguments
    ///
    /// * `target_length` - Number of samples in the result
    /// * `policy` - How to extend a buffer shorter than `target_length`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if `target_length` is zero, or if the
    /// policy is [`PadPolicy::Trim`] and the buffer is shorter than the target.
    pub fn pad_or_trim(&self, target_length: usize, policy: PadPolicy) -> Result<Waveform> {
        if target_length == 0 {
            return Err(Error::InvalidParameter("Target length must be at least one sample".into()));
        }
        let len = self.samples.len();
        if target_length <= len {
            let trimmed = self.samples.slice(s![..target_length]).to_owned();
            return Ok(Self::from_parts(trimmed, self.sample_rate));
        }

        let extended = match policy {
            PadPolicy::ZeroPad => {
                let mut out = Array1::zeros(target_length);
                out.slice_mut(s![..len]).assign(&self.samples);
                out
            }
            PadPolicy::CyclicRepeat => {
                Array1::from_shape_fn(target_length, |i| self.samples[i % len])
            }
            PadPolicy::Trim => {
                return Err(Error::InvalidParameter(format!(
                    "Cannot trim {} samples to a longer length of {}",
                    len, target_length
                )))
            }
        };
        Ok(Self::from_parts(extended, self.sample_rate))
    }

    /// Rotate the buffer left by `offset` samples, wrapping around the end
    pub fn rotate(&self, offset: usize) -> Waveform {
        let len = self.samples.len();
        let offset = offset % len;
        let rotated = Array1::from_shape_fn(len, |i| self.samples[(i + offset) % len]);
        Self::from_parts(rotated, self.sample_rate)
    }

    /// Copy `length` samples starting at `start`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the range is empty or out of bounds.
    pub fn segment(&self, start: usize, length: usize) -> Result<Waveform> {
        let end = start.checked_add(length).unwrap_or(usize::MAX);
        if length == 0 || end > self.samples.len() {
            return Err(Error::InvalidInput(format!(
                "Segment {}..{} out of bounds (length {})",
                start,
                end,
                self.samples.len()
            )));
        }
        Ok(Self::from_parts(self.samples.slice(s![start..end]).to_owned(), self.sample_rate))
    }

    /// Weighted sum `gain_self * self + gain_other * other`
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * the sample rates differ ([`Error::SampleRateMismatch`])
    /// * the lengths differ ([`Error::InvalidInput`])
    /// * a gain is not finite ([`Error::InvalidParameter`])
    pub fn mix(&self, other: &Waveform, gain_self: f64, gain_other: f64) -> Result<Waveform> {
        if self.sample_rate != other.sample_rate {
            return Err(Error::SampleRateMismatch {
                expected: self.sample_rate,
                found: other.sample_rate,
            });
        }
        if self.len() != other.len() {
            return Err(Error::InvalidInput(format!(
                "Cannot mix buffers of length {} and {}",
                self.len(),
                other.len()
            )));
        }
        if !gain_self.is_finite() || !gain_other.is_finite() {
            return Err(Error::InvalidParameter(format!(
                "Mix gains must be finite, got {} and {}",
                gain_self, gain_other
            )));
        }

        let mixed = Zip::from(&self.samples)
            .and(&other.samples)
            .map_collect(|&a, &b| (a as f64 * gain_self + b as f64 * gain_other) as f32);
        if mixed.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidParameter("Mix overflows the sample type".into()));
        }
        Ok(Self::from_parts(mixed, self.sample_rate))
    }

    /// Hard-limit samples to `[min, max]`
    ///
    /// Returns the limited waveform and the number of samples that were out of range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if the bounds are not finite or `min > max`.
    pub fn clip_to_range(&self, min: f32, max: f32) -> Result<(Waveform, usize)> {
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(Error::InvalidParameter(format!("Invalid clip range [{}, {}]", min, max)));
        }
        let clipped = self.samples.iter().filter(|&&v| v < min || v > max).count();
        let limited = self.samples.mapv(|v| v.clamp(min, max));
        Ok((Self::from_parts(limited, self.sample_rate), clipped))
    }

    /// Scale the buffer down so its peak does not exceed `limit`
    ///
    /// Returns the result and whether scaling was needed.
    pub fn normalize_peak(&self, limit: f32) -> Result<(Waveform, bool)> {
        if !limit.is_finite() || limit <= 0.0 {
            return Err(Error::InvalidParameter(format!("Peak limit {} must be positive", limit)));
        }
        let peak = self.peak();
        if peak <= limit {
            return Ok((self.clone(), false));
        }
        let gain = limit as f64 / peak as f64;
        let scaled = self.samples.mapv(|v| ((v as f64 * gain) as f32).clamp(-limit, limit));
        Ok((Self::from_parts(scaled, self.sample_rate), true))
    }
}
