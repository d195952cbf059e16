//! Band-limited resampling
//!
//! Rate conversion and timeline stretching share one `rubato` sinc
//! resampler. For a ratio `r` (output samples per input sample) the output
//! holds `round(len * r)` samples and is aligned with the input: the
//! resampler's filter delay is skipped and the tail is flushed with zeros.
//! When `r < 1` the cutoff follows the new Nyquist frequency, which is
//! `min(R1, R2) / 2` for rate conversion.

use crate::waveform::Waveform;
use crate::{Error, Result};
use log::debug;
use ndarray::{Array1, ArrayView1};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Largest number of samples a single resampling call may produce.
///
/// 2^28 samples is a little under five hours at 16 kHz. Ratios that would
/// exceed it are rejected instead of attempting the allocation.
pub const MAX_OUTPUT_LEN: usize = 1 << 28;

const SINC_LEN: usize = 256;
const F_CUTOFF: f32 = 0.95;
const OVERSAMPLING_FACTOR: usize = 256;
const CHUNK_SIZE: usize = 1024;
/// Zero chunks pushed after the input to drain the filter delay.
const MAX_FLUSH_CHUNKS: usize = 8;

/// Stretch or compress `waveform` by `ratio` without changing its declared sample rate
///
/// # Arguments
///
/// * `waveform` - Input audio
/// * `ratio` - Output samples per input sample; `target_rate / source_rate` for
///   rate conversion or `1 / speed_factor` for a tempo change
///
/// # Returns
///
/// A waveform of `round(len * ratio)` samples (at least one)
///
/// # Errors
///
/// Returns [`Error::InvalidParameter`] if `ratio` is not finite or not positive,
/// or if the output would be longer than [`MAX_OUTPUT_LEN`].
pub fn resample(waveform: &Waveform, ratio: f64) -> Result<Waveform> {
    validate_ratio(waveform.len(), ratio)?;
    let samples = resample_samples(waveform.samples(), ratio)?;
    Waveform::new(samples, waveform.sample_rate())
}

/// Convert `waveform` to `target_rate`
///
/// # Errors
///
/// Returns [`Error::InvalidParameter`] if `target_rate` is zero or the output
/// would be longer than [`MAX_OUTPUT_LEN`].
pub fn resample_to_rate(waveform: &Waveform, target_rate: u32) -> Result<Waveform> {
    if target_rate == 0 {
        return Err(Error::InvalidParameter(
            "Target sample rate must be positive".into(),
        ));
    }
    if target_rate == waveform.sample_rate() {
        return Ok(waveform.clone());
    }
    let ratio = target_rate as f64 / waveform.sample_rate() as f64;
    validate_ratio(waveform.len(), ratio)?;
    debug!(
        "Converting {} samples from {} Hz to {} Hz",
        waveform.len(),
        waveform.sample_rate(),
        target_rate
    );
    let samples = resample_samples(waveform.samples(), ratio)?;
    Waveform::new(samples, target_rate)
}

/// Number of samples produced by resampling `len` samples by `ratio`
pub fn output_length(len: usize, ratio: f64) -> usize {
    ((len as f64 * ratio).round() as usize).max(1)
}

fn validate_ratio(len: usize, ratio: f64) -> Result<()> {
    if !ratio.is_finite() || ratio <= 0.0 {
        return Err(Error::InvalidParameter(format!(
            "Resampling ratio must be finite and positive, got {}",
            ratio
        )));
    }
    if (len as f64 * ratio).round() > MAX_OUTPUT_LEN as f64 {
        return Err(Error::InvalidParameter(format!(
            "Resampling {} samples by {} exceeds the maximum output length of {} samples",
            len, ratio, MAX_OUTPUT_LEN
        )));
    }
    Ok(())
}

fn resample_samples(input: ArrayView1<f32>, ratio: f64) -> Result<Array1<f32>> {
    let n_in = input.len();
    let n_out = output_length(n_in, ratio);
    if ratio == 1.0 {
        return Ok(input.to_owned());
    }

    let params = SincInterpolationParameters {
        sinc_len: SINC_LEN,
        f_cutoff: F_CUTOFF,
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: OVERSAMPLING_FACTOR,
        window: WindowFunction::Hann,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK_SIZE, 1)
        .map_err(|e| Error::InvalidParameter(e.to_string()))?;
    let delay = resampler.output_delay();
    let wanted = delay + n_out;
    debug!(
        "Resampling {} -> {} samples (ratio {:.6}, delay {})",
        n_in, n_out, ratio, delay
    );

    let input = input.to_vec();
    let mut output: Vec<f32> = Vec::with_capacity(wanted);
    let mut pos = 0;
    while pos < n_in {
        let needed = resampler.input_frames_next();
        let end = (pos + needed).min(n_in);
        let frames: &[&[f32]] = &[&input[pos..end]];
        let chunk = if end - pos == needed {
            resampler.process(frames, None)
        } else {
            resampler.process_partial(Some(frames), None)
        };
        let chunk = chunk.map_err(|e| Error::AudioProcessing(e.to_string()))?;
        output.extend_from_slice(&chunk[0]);
        pos += needed;
    }

    let mut flushes = 0;
    while output.len() < wanted && flushes < MAX_FLUSH_CHUNKS {
        let chunk = resampler
            .process_partial(None::<&[&[f32]]>, None)
            .map_err(|e| Error::AudioProcessing(e.to_string()))?;
        output.extend_from_slice(&chunk[0]);
        flushes += 1;
    }

    // Very small ratios can leave the output short of the length law; the
    // missing samples lie past the end of the input and are silent.
    output.resize(wanted.max(output.len()), 0.0);
    Ok(Array1::from(output[delay..wanted].to_vec()))
}
