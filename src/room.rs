//! Room reverberation through the image-source method
//!
//! A shoebox room is described by its dimensions, wall absorption and the
//! positions of one source and one microphone. Reflections are modelled as
//! virtual sources mirrored across the walls; each contributes an attenuated,
//! delayed impulse to the room impulse response, which is then convolved
//! with the input waveform.
//!
//! Walls are indexed as `x = 0`, `x = length`, `y = 0`, `y = width`,
//! `z = 0` (floor) and `z = height` (ceiling).

use crate::resample::resample_to_rate;
use crate::waveform::{Waveform, AMPLITUDE_LIMIT};
use crate::{Error, Result};
use log::{debug, warn};
use ndarray::{s, Array1, ArrayView1};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};

/// Speed of sound in air, in metres per second
pub const SPEED_OF_SOUND: f64 = 343.0;

/// Smallest room volume accepted, in cubic metres
pub const MIN_ROOM_VOLUME: f64 = 1.0;

/// Highest reflection order accepted
pub const MAX_REFLECTION_ORDER: u32 = 50;

/// Minimum distance between source and microphone, in metres
pub(crate) const MIN_SOURCE_MIC_DISTANCE: f64 = 0.01;

/// Fraction of total impulse-response energy below which the tail is dropped.
const TAIL_ENERGY_THRESHOLD: f64 = 1e-6;

/// Below this operand length direct convolution is used instead of FFT.
const DIRECT_CONVOLUTION_MAX_LEN: usize = 32;

/// Energy absorption of the room walls, each in `[0, 1)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Absorption {
    /// Same coefficient on every wall
    Global(f64),
    /// One coefficient per wall, in wall index order
    PerWall([f64; 6]),
}

impl Absorption {
    /// Absorption coefficient of every wall in index order
    pub fn per_wall(&self) -> [f64; 6] {
        match *self {
            Absorption::Global(a) => [a; 6],
            Absorption::PerWall(walls) => walls,
        }
    }

    /// Pressure reflection coefficient `sqrt(1 - absorption)` of every wall
    pub fn reflection_coefficients(&self) -> [f64; 6] {
        self.per_wall().map(|a| (1.0 - a).sqrt())
    }
}

/// Shoebox room with one source and one microphone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomGeometry {
    /// Length, width and height in metres
    pub dimensions: [f64; 3],
    pub absorption: Absorption,
    /// Source position in metres
    pub source: [f64; 3],
    /// Microphone position in metres
    pub microphone: [f64; 3],
}

impl RoomGeometry {
    pub fn new(
        dimensions: [f64; 3],
        absorption: Absorption,
        source: [f64; 3],
        microphone: [f64; 3],
    ) -> Self {
        Self {
            dimensions,
            absorption,
            source,
            microphone,
        }
    }

    pub fn volume(&self) -> f64 {
        self.dimensions.iter().product()
    }

    /// Check that the room can be simulated
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidGeometry`] if:
    /// * a dimension is not finite and positive
    /// * the volume is below [`MIN_ROOM_VOLUME`]
    /// * an absorption coefficient lies outside `[0, 1)`
    /// * the source or microphone is not strictly inside the room
    /// * the source and microphone coincide
    pub fn validate(&self) -> Result<()> {
        if self.dimensions.iter().any(|d| !d.is_finite() || *d <= 0.0) {
            return Err(Error::InvalidGeometry(format!(
                "Room dimensions must be positive, got {:?}",
                self.dimensions
            )));
        }
        let volume = self.volume();
        if volume < MIN_ROOM_VOLUME {
            return Err(Error::InvalidGeometry(format!(
                "Room volume {:.3e} m^3 is below the minimum of {} m^3",
                volume, MIN_ROOM_VOLUME
            )));
        }
        if let Some(a) = self
            .absorption
            .per_wall()
            .into_iter()
            .find(|a| !a.is_finite() || !(0.0..1.0).contains(a))
        {
            return Err(Error::InvalidGeometry(format!(
                "Absorption coefficient {} is outside [0, 1)",
                a
            )));
        }
        for (name, point) in [("Source", &self.source), ("Microphone", &self.microphone)] {
            let inside = point
                .iter()
                .zip(self.dimensions.iter())
                .all(|(p, d)| p.is_finite() && *p > 0.0 && p < d);
            if !inside {
                return Err(Error::InvalidGeometry(format!(
                    "{} position {:?} is not strictly inside the room {:?}",
                    name, point, self.dimensions
                )));
            }
        }
        if distance(&self.source, &self.microphone) < MIN_SOURCE_MIC_DISTANCE {
            return Err(Error::InvalidGeometry(
                "Source and microphone positions coincide".into(),
            ));
        }
        Ok(())
    }
}

/// Energy absorption and reflection order that give a room the reverberation time `rt60`
///
/// Uses Sabine's formula. The order is the number of reflections needed for
/// sound to travel `speed_of_sound * rt60` metres in the room's narrowest
/// cross-section.
///
/// # Errors
///
/// Returns [`Error::InvalidParameter`] if `rt60` is not positive, or if the room
/// is too large to reach `rt60` with absorption below one.
pub fn inverse_sabine(
    rt60: f64,
    dimensions: [f64; 3],
    speed_of_sound: f64,
) -> Result<(f64, u32)> {
    if !rt60.is_finite() || rt60 <= 0.0 {
        return Err(Error::InvalidParameter(format!("RT60 must be positive, got {}", rt60)));
    }
    if dimensions.iter().any(|d| !d.is_finite() || *d <= 0.0) {
        return Err(Error::InvalidParameter(format!(
            "Room dimensions must be positive, got {:?}",
            dimensions
        )));
    }
    let [l, w, h] = dimensions;
    let volume = l * w * h;
    let surface = 2.0 * (l * w + l * h + w * h);
    let sabine = 24.0 * std::f64::consts::LN_10 / speed_of_sound;
    let absorption = sabine * volume / (surface * rt60);
    if absorption >= 1.0 {
        return Err(Error::InvalidParameter(format!(
            "RT60 of {} s is too short for room {:?}",
            rt60, dimensions
        )));
    }

    let narrowest = [(l, w), (l, h), (w, h)]
        .iter()
        .map(|(a, b)| a * b / (a + b))
        .fold(f64::INFINITY, f64::min);
    let order = (speed_of_sound * rt60 / narrowest - 1.0).ceil().max(0.0) as u32;
    Ok((absorption, order))
}

/// Room impulse response at a given sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseResponse {
    waveform: Waveform,
    image_sources: usize,
}

impl ImpulseResponse {
    /// Single unit tap: convolution with it is the identity
    fn pass_through(sample_rate: u32) -> Self {
        Self {
            waveform: Waveform::from_parts(Array1::from_elem(1, 1.0), sample_rate),
            image_sources: 0,
        }
    }

    pub fn waveform(&self) -> &Waveform {
        &self.waveform
    }

    pub fn len(&self) -> usize {
        self.waveform.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waveform.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.waveform.sample_rate()
    }

    /// Number of image sources that contributed a tap
    pub fn image_sources(&self) -> usize {
        self.image_sources
    }
}

/// Result of one room simulation
#[derive(Debug, Clone)]
pub struct RoomOutcome {
    pub waveform: Waveform,
    pub impulse_response: ImpulseResponse,
    /// Length of the full convolution before truncation to the input length
    pub convolved_len: usize,
    /// Whether the output had to be scaled down into the amplitude domain
    pub clipped: bool,
}

/// Image-source room simulator
#[derive(Debug, Clone, Copy)]
pub struct RoomSimulator {
    speed_of_sound: f64,
    simulation_rate: Option<u32>,
}

impl Default for RoomSimulator {
    fn default() -> Self {
        Self {
            speed_of_sound: SPEED_OF_SOUND,
            simulation_rate: None,
        }
    }
}

impl RoomSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate impulse responses at `rate` and resample them to each waveform's rate
    pub fn with_simulation_rate(mut self, rate: u32) -> Self {
        self.simulation_rate = Some(rate);
        self
    }

    pub fn with_speed_of_sound(mut self, speed_of_sound: f64) -> Self {
        self.speed_of_sound = speed_of_sound;
        self
    }

    fn validate(&self, reflection_order: u32) -> Result<()> {
        if !self.speed_of_sound.is_finite() || self.speed_of_sound <= 0.0 {
            return Err(Error::InvalidParameter(format!(
                "Speed of sound must be positive, got {}",
                self.speed_of_sound
            )));
        }
        if self.simulation_rate == Some(0) {
            return Err(Error::InvalidParameter("Simulation rate must be positive".into()));
        }
        if reflection_order > MAX_REFLECTION_ORDER {
            return Err(Error::InvalidParameter(format!(
                "Reflection order {} exceeds the maximum of {}",
                reflection_order, MAX_REFLECTION_ORDER
            )));
        }
        Ok(())
    }

    /// Synthesize the impulse response of `geometry` for audio at `sample_rate`
    ///
    /// # Arguments
    ///
    /// * `geometry` - Room, source and microphone
    /// * `reflection_order` - Maximum number of wall bounces per path; zero
    ///   yields a single unit tap
    /// * `sample_rate` - Rate of the audio the response will be applied to
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidGeometry`] for an invalid room and
    /// [`Error::InvalidParameter`] for an out-of-range order or simulator setting.
    pub fn impulse_response(
        &self,
        geometry: &RoomGeometry,
        reflection_order: u32,
        sample_rate: u32,
    ) -> Result<ImpulseResponse> {
        geometry.validate()?;
        self.validate(reflection_order)?;
        if sample_rate == 0 {
            return Err(Error::InvalidParameter("Sample rate must be positive".into()));
        }
        if reflection_order == 0 {
            return Ok(ImpulseResponse::pass_through(sample_rate));
        }

        let rate = self.simulation_rate.unwrap_or(sample_rate);
        let (taps, image_sources) = self.image_source_taps(geometry, reflection_order, rate);
        let taps = truncate_tail(taps);
        debug!(
            "Room {:?}: {} image sources, impulse response of {} samples at {} Hz",
            geometry.dimensions,
            image_sources,
            taps.len(),
            rate
        );

        let mut waveform = Waveform::new(taps.mapv(|v| v as f32), rate)?;
        if rate != sample_rate {
            // Keep the DC gain of the response across the rate change.
            let gain = rate as f64 / sample_rate as f64;
            waveform = resample_to_rate(&waveform, sample_rate)?.scale(gain)?;
        }
        Ok(ImpulseResponse {
            waveform,
            image_sources,
        })
    }

    /// Deposit one tap per image source into a buffer sampled at `rate`.
    fn image_source_taps(
        &self,
        geometry: &RoomGeometry,
        order: u32,
        rate: u32,
    ) -> (Array1<f64>, usize) {
        let reflection = geometry.absorption.reflection_coefficients();
        let axes: Vec<Vec<AxisImage>> = (0..3)
            .map(|axis| axis_images(geometry.source[axis], geometry.dimensions[axis], order))
            .collect();
        let samples_per_metre = rate as f64 / self.speed_of_sound;

        let mut taps: Vec<(usize, f64)> = Vec::new();
        for x in &axes[0] {
            for y in &axes[1] {
                if x.reflections() + y.reflections() > order {
                    continue;
                }
                for z in &axes[2] {
                    if x.reflections() + y.reflections() + z.reflections() > order {
                        continue;
                    }
                    let image = [x.coordinate, y.coordinate, z.coordinate];
                    let dist = distance(&image, &geometry.microphone);
                    let attenuation = x.attenuation(reflection[0], reflection[1])
                        * y.attenuation(reflection[2], reflection[3])
                        * z.attenuation(reflection[4], reflection[5]);
                    let delay = (dist * samples_per_metre).round() as usize;
                    taps.push((delay, attenuation / dist));
                }
            }
        }

        let len = taps.iter().map(|(delay, _)| delay + 1).max().unwrap_or(1);
        let mut buffer = Array1::<f64>::zeros(len);
        for &(delay, amplitude) in &taps {
            buffer[delay] += amplitude;
        }
        (buffer, taps.len())
    }

    /// Reverberate `waveform` in `geometry`
    ///
    /// The output keeps the input length: the reverberant tail past the end
    /// of the input is dropped. If the result exceeds the amplitude domain it
    /// is scaled down and [`RoomOutcome::clipped`] is set.
    ///
    /// # Errors
    ///
    /// Same as [`RoomSimulator::impulse_response`].
    pub fn simulate(
        &self,
        waveform: &Waveform,
        geometry: &RoomGeometry,
        reflection_order: u32,
    ) -> Result<RoomOutcome> {
        let impulse_response =
            self.impulse_response(geometry, reflection_order, waveform.sample_rate())?;
        if reflection_order == 0 {
            return Ok(RoomOutcome {
                waveform: waveform.clone(),
                impulse_response,
                convolved_len: waveform.len(),
                clipped: false,
            });
        }

        let full = convolve(waveform.samples(), impulse_response.waveform().samples());
        let convolved_len = full.len();
        let wet = Waveform::new(
            full.slice(s![..waveform.len()]).mapv(|v| v as f32),
            waveform.sample_rate(),
        )?;
        let (waveform, clipped) = wet.normalize_peak(AMPLITUDE_LIMIT)?;
        if clipped {
            warn!("Reverberant output exceeded the amplitude limit and was normalized");
        }

        Ok(RoomOutcome {
            waveform,
            impulse_response,
            convolved_len,
            clipped,
        })
    }
}

/// One mirrored source coordinate along a single axis.
#[derive(Debug, Clone, Copy)]
struct AxisImage {
    coordinate: f64,
    low_hits: u32,
    high_hits: u32,
}

impl AxisImage {
    fn reflections(&self) -> u32 {
        self.low_hits + self.high_hits
    }

    fn attenuation(&self, low: f64, high: f64) -> f64 {
        low.powi(self.low_hits as i32) * high.powi(self.high_hits as i32)
    }
}

/// Images of `source` along an axis of length `dim` with at most `order` reflections.
///
/// Image `(n, q)` sits at `(1 - 2q) * source + 2 n dim` and has bounced
/// `|n - q|` times off the wall at zero and `|n|` times off the wall at `dim`.
fn axis_images(source: f64, dim: f64, order: u32) -> Vec<AxisImage> {
    let order = order as i64;
    let mut images = Vec::new();
    for n in -order..=order {
        for q in 0..=1i64 {
            let low_hits = (n - q).unsigned_abs() as u32;
            let high_hits = n.unsigned_abs() as u32;
            if (low_hits + high_hits) as i64 > order {
                continue;
            }
            images.push(AxisImage {
                coordinate: (1 - 2 * q) as f64 * source + 2.0 * n as f64 * dim,
                low_hits,
                high_hits,
            });
        }
    }
    images
}

/// Drop the trailing samples that hold less than the threshold share of the energy.
fn truncate_tail(taps: Array1<f64>) -> Array1<f64> {
    let total: f64 = taps.iter().map(|v| v * v).sum();
    if total == 0.0 {
        return taps;
    }
    let mut tail = 0.0;
    let mut keep = taps.len();
    for (i, v) in taps.iter().enumerate().rev() {
        tail += v * v;
        if tail >= TAIL_ENERGY_THRESHOLD * total {
            keep = i + 1;
            break;
        }
    }
    taps.slice(s![..keep]).to_owned()
}

pub(crate) fn distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum::<f64>().sqrt()
}

/// Full linear convolution of `signal` and `kernel`
///
/// The result holds `signal.len() + kernel.len() - 1` samples. Short operands
/// are convolved directly, longer ones through the FFT.
pub fn convolve(signal: ArrayView1<f32>, kernel: ArrayView1<f32>) -> Array1<f64> {
    if signal.is_empty() || kernel.is_empty() {
        return Array1::zeros(0);
    }
    if signal.len().min(kernel.len()) <= DIRECT_CONVOLUTION_MAX_LEN {
        convolve_direct(signal, kernel)
    } else {
        convolve_fft(signal, kernel)
    }
}

fn convolve_direct(signal: ArrayView1<f32>, kernel: ArrayView1<f32>) -> Array1<f64> {
    let mut out = Array1::<f64>::zeros(signal.len() + kernel.len() - 1);
    for (i, &x) in signal.iter().enumerate() {
        if x == 0.0 {
            continue;
        }
        for (j, &h) in kernel.iter().enumerate() {
            out[i + j] += x as f64 * h as f64;
        }
    }
    out
}

fn convolve_fft(signal: ArrayView1<f32>, kernel: ArrayView1<f32>) -> Array1<f64> {
    let out_len = signal.len() + kernel.len() - 1;
    let fft_len = out_len.next_power_of_two();

    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(fft_len);
    let inverse = planner.plan_fft_inverse(fft_len);

    let to_spectrum = |values: ArrayView1<f32>| {
        let mut buf = vec![Complex::new(0.0f64, 0.0); fft_len];
        for (b, &v) in buf.iter_mut().zip(values.iter()) {
            b.re = v as f64;
        }
        forward.process(&mut buf);
        buf
    };
    let mut spectrum = to_spectrum(signal);
    let kernel_spectrum = to_spectrum(kernel);
    for (a, b) in spectrum.iter_mut().zip(kernel_spectrum.iter()) {
        *a = *a * *b;
    }
    inverse.process(&mut spectrum);

    // rustfft does not normalize
    let norm = 1.0 / fft_len as f64;
    Array1::from_iter(spectrum[..out_len].iter().map(|c| c.re * norm))
}
