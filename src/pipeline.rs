//! Augmentation pipeline
//!
//! This module chains the three transforms under one seeded random source.
//! Enabled transforms always run in the same order:
//!
//! 1. room simulation (the recording environment)
//! 2. additive noise (a channel effect)
//! 3. speed perturbation (a playback-level change)
//!
//! Parameters are drawn uniformly from the configured closed ranges and
//! returned next to the augmented waveform so callers can log or replay them.

use crate::noise::{NoiseAugmenter, NoiseBank};
use crate::random::RandomSource;
use crate::room::{
    self, inverse_sabine, Absorption, RoomGeometry, RoomSimulator, MAX_REFLECTION_ORDER,
};
use crate::speed::SpeedPerturber;
use crate::waveform::Waveform;
use crate::{Error, Result};
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Furthest a sampled source or microphone is kept from each wall, in metres
const WALL_MARGIN: f64 = 0.5;

/// Attempts at drawing a microphone position distinct from the source
const MAX_PLACEMENT_ATTEMPTS: usize = 16;

/// Closed interval `[min, max]` parameters are drawn from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    pub min: f64,
    pub max: f64,
}

impl ParamRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Range holding a single value
    pub fn fixed(value: f64) -> Self {
        Self { min: value, max: value }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }

    fn validate(&self, name: &str) -> Result<()> {
        if !self.min.is_finite() || !self.max.is_finite() || self.min > self.max {
            return Err(Error::InvalidParameter(format!(
                "{} range [{}, {}] must be finite with min <= max",
                name, self.min, self.max
            )));
        }
        Ok(())
    }

    fn sample(&self, rng: &mut RandomSource) -> Result<f64> {
        rng.uniform(self.min, self.max)
    }
}

/// Noise augmentation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    pub enabled: bool,
    pub snr_db_range: ParamRange,
    /// Pass silent signals through instead of failing
    pub allow_silent_signal: bool,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            snr_db_range: ParamRange::new(5.0, 20.0),
            allow_silent_signal: false,
        }
    }
}

impl NoiseConfig {
    fn validate(&self) -> Result<()> {
        self.snr_db_range.validate("SNR")
    }
}

/// Room simulation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    pub enabled: bool,
    /// Length, width and height ranges in metres
    pub dim_range: [ParamRange; 3],
    /// Global wall absorption range; ignored when `rt60_range` is set
    pub absorption_range: ParamRange,
    /// Reflection order, or the upper bound on it when `rt60_range` is set
    pub reflection_order: u32,
    /// Target reverberation time range in seconds
    pub rt60_range: Option<ParamRange>,
    /// Rate at which impulse responses are generated, if different from the audio
    pub simulation_rate: Option<u32>,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dim_range: [
                ParamRange::new(3.0, 10.0),
                ParamRange::new(3.0, 10.0),
                ParamRange::new(2.2, 5.0),
            ],
            absorption_range: ParamRange::new(0.1, 0.6),
            reflection_order: 10,
            rt60_range: None,
            simulation_rate: None,
        }
    }
}

impl RoomConfig {
    fn validate(&self) -> Result<()> {
        for (range, name) in self.dim_range.iter().zip(["Length", "Width", "Height"]) {
            range.validate(name)?;
            if range.min <= 0.0 {
                return Err(Error::InvalidParameter(format!("{} range must be positive", name)));
            }
        }
        self.absorption_range.validate("Absorption")?;
        if self.absorption_range.min < 0.0 || self.absorption_range.max >= 1.0 {
            return Err(Error::InvalidParameter(format!(
                "Absorption range [{}, {}] must lie within [0, 1)",
                self.absorption_range.min, self.absorption_range.max
            )));
        }
        if self.reflection_order > MAX_REFLECTION_ORDER {
            return Err(Error::InvalidParameter(format!(
                "Reflection order {} exceeds the maximum of {}",
                self.reflection_order, MAX_REFLECTION_ORDER
            )));
        }
        if let Some(rt60) = &self.rt60_range {
            rt60.validate("RT60")?;
            if rt60.min <= 0.0 {
                return Err(Error::InvalidParameter("RT60 range must be positive".into()));
            }
        }
        if self.simulation_rate == Some(0) {
            return Err(Error::InvalidParameter("Simulation rate must be positive".into()));
        }
        Ok(())
    }
}

/// Speed perturbation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedConfig {
    pub enabled: bool,
    pub factor_range: ParamRange,
}

impl Default for SpeedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            factor_range: ParamRange::new(0.9, 1.1),
        }
    }
}

impl SpeedConfig {
    fn validate(&self) -> Result<()> {
        self.factor_range.validate("Speed factor")?;
        if self.factor_range.min <= 0.0 {
            return Err(Error::InvalidParameter("Speed factor range must be positive".into()));
        }
        Ok(())
    }
}

/// Which transforms run and the ranges their parameters are drawn from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    pub noise: NoiseConfig,
    pub room: RoomConfig,
    pub speed: SpeedConfig,
}

impl AugmentationConfig {
    /// Check every enabled section
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] describing the first invalid range.
    pub fn validate(&self) -> Result<()> {
        if self.room.enabled {
            self.room.validate()?;
        }
        if self.noise.enabled {
            self.noise.validate()?;
        }
        if self.speed.enabled {
            self.speed.validate()?;
        }
        Ok(())
    }
}

/// Parameters the room step was run with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomParams {
    pub geometry: RoomGeometry,
    pub reflection_order: u32,
    pub rt60: Option<f64>,
    pub impulse_response_len: usize,
    pub clipped: bool,
}

/// Parameters the noise step was run with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseParams {
    pub snr_db: f64,
    /// Index of the clip in the noise bank
    pub clip_index: usize,
    pub offset: usize,
    pub gain: f64,
    pub clipped_samples: usize,
}

/// Parameters the speed step was run with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedParams {
    pub factor: f64,
}

/// Concrete values drawn for one pipeline run; `None` for disabled steps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RealizedParams {
    pub room: Option<RoomParams>,
    pub noise: Option<NoiseParams>,
    pub speed: Option<SpeedParams>,
}

impl RealizedParams {
    /// Whether any step had to limit the amplitude of its output
    pub fn clipped(&self) -> bool {
        self.room.as_ref().map_or(false, |r| r.clipped)
            || self.noise.as_ref().map_or(false, |n| n.clipped_samples > 0)
    }
}

/// Augmented waveform and the parameters that produced it
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub waveform: Waveform,
    pub params: RealizedParams,
}

/// Runs the enabled transforms of an [`AugmentationConfig`] in order
///
/// # Example
///
/// ```rust
/// use rifs_augment::{AugmentationConfig, AugmentationPipeline, NoiseBank, Waveform};
///
/// let noise: Vec<f32> = (0..800).map(|i| ((i * 37) % 17) as f32 / 17.0 - 0.5).collect();
/// let noise = Waveform::from_vec(noise, 16000)?;
/// let speech: Vec<f32> = (0..1600).map(|i| (i as f32 * 0.03).sin() * 0.5).collect();
/// let speech = Waveform::from_vec(speech, 16000)?;
///
/// let pipeline = AugmentationPipeline::new(AugmentationConfig::default())
///     .with_noise_bank(NoiseBank::new(vec![noise]));
/// let output = pipeline.run(&speech, 42)?;
/// println!("{:?}", output.params);
/// # Ok::<(), rifs_augment::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct AugmentationPipeline {
    config: AugmentationConfig,
    noise_bank: NoiseBank,
}

impl AugmentationPipeline {
    pub fn new(config: AugmentationConfig) -> Self {
        Self {
            config,
            noise_bank: NoiseBank::default(),
        }
    }

    pub fn with_noise_bank(mut self, noise_bank: NoiseBank) -> Self {
        self.noise_bank = noise_bank;
        self
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    pub fn noise_bank(&self) -> &NoiseBank {
        &self.noise_bank
    }

    /// Augment `waveform` with a random source built from `seed`
    ///
    /// # Errors
    ///
    /// Returns the error of the first step that fails; no partial result is produced.
    pub fn run(&self, waveform: &Waveform, seed: u64) -> Result<PipelineOutput> {
        let mut rng = RandomSource::from_seed(seed);
        self.run_with(waveform, &mut rng)
    }

    /// Augment `waveform` drawing from a caller-owned random source
    ///
    /// # Errors
    ///
    /// Same as [`AugmentationPipeline::run`].
    pub fn run_with(&self, waveform: &Waveform, rng: &mut RandomSource) -> Result<PipelineOutput> {
        self.config.validate()?;
        let mut params = RealizedParams::default();
        let mut current = waveform.clone();

        if self.config.room.enabled {
            let (out, room_params) = self.apply_room(&current, rng)?;
            current = out;
            params.room = Some(room_params);
        }
        if self.config.noise.enabled {
            let (out, noise_params) = self.apply_noise(&current, rng)?;
            current = out;
            params.noise = Some(noise_params);
        }
        if self.config.speed.enabled {
            let factor = self.config.speed.factor_range.sample(rng)?;
            current = SpeedPerturber::new().apply(&current, factor)?;
            params.speed = Some(SpeedParams { factor });
        }

        debug!("Pipeline produced {} samples with {:?}", current.len(), params);
        Ok(PipelineOutput {
            waveform: current,
            params,
        })
    }

    /// Augment independent waveforms in parallel
    ///
    /// Waveform `i` is processed with [`RandomSource::derive`]`(base_seed, i)`,
    /// so each result depends only on its input, its index and the seed.
    pub fn run_batch(&self, waveforms: &[Waveform], base_seed: u64) -> Vec<Result<PipelineOutput>> {
        info!("Augmenting batch of {} waveforms", waveforms.len());
        waveforms
            .par_iter()
            .enumerate()
            .map(|(i, waveform)| {
                let mut rng = RandomSource::derive(base_seed, i as u64);
                self.run_with(waveform, &mut rng)
            })
            .collect()
    }

    fn apply_room(
        &self,
        waveform: &Waveform,
        rng: &mut RandomSource,
    ) -> Result<(Waveform, RoomParams)> {
        let config = &self.config.room;
        let mut dimensions = [0.0; 3];
        for (dim, range) in dimensions.iter_mut().zip(config.dim_range.iter()) {
            *dim = range.sample(rng)?;
        }

        let (absorption, reflection_order, rt60) = match &config.rt60_range {
            Some(range) => {
                let rt60 = range.sample(rng)?;
                let (absorption, order) = inverse_sabine(rt60, dimensions, room::SPEED_OF_SOUND)?;
                (absorption, order.min(config.reflection_order), Some(rt60))
            }
            None => (config.absorption_range.sample(rng)?, config.reflection_order, None),
        };

        let source = sample_position(&dimensions, rng)?;
        let mut microphone = sample_position(&dimensions, rng)?;
        let mut attempts = 1;
        while room::distance(&source, &microphone) < room::MIN_SOURCE_MIC_DISTANCE {
            if attempts == MAX_PLACEMENT_ATTEMPTS {
                return Err(Error::InvalidGeometry(
                    "Could not place the microphone away from the source".into(),
                ));
            }
            microphone = sample_position(&dimensions, rng)?;
            attempts += 1;
        }

        let geometry = RoomGeometry::new(
            dimensions,
            Absorption::Global(absorption),
            source,
            microphone,
        );
        let mut simulator = RoomSimulator::new();
        if let Some(rate) = config.simulation_rate {
            simulator = simulator.with_simulation_rate(rate);
        }
        let outcome = simulator.simulate(waveform, &geometry, reflection_order)?;

        let params = RoomParams {
            geometry,
            reflection_order,
            rt60,
            impulse_response_len: outcome.impulse_response.len(),
            clipped: outcome.clipped,
        };
        Ok((outcome.waveform, params))
    }

    fn apply_noise(
        &self,
        waveform: &Waveform,
        rng: &mut RandomSource,
    ) -> Result<(Waveform, NoiseParams)> {
        let config = &self.config.noise;
        let snr_db = config.snr_db_range.sample(rng)?;
        let (clip_index, clip) = self.noise_bank.choose(rng)?;

        let mut augmenter = NoiseAugmenter::new();
        if config.allow_silent_signal {
            augmenter = augmenter.allow_silent_signal();
        }
        let outcome = augmenter.apply(waveform, clip, snr_db, rng)?;

        let params = NoiseParams {
            snr_db,
            clip_index,
            offset: outcome.offset,
            gain: outcome.gain,
            clipped_samples: outcome.clipped_samples,
        };
        Ok((outcome.waveform, params))
    }
}

/// Uniform point inside a room, kept away from the walls.
fn sample_position(dimensions: &[f64; 3], rng: &mut RandomSource) -> Result<[f64; 3]> {
    let mut position = [0.0; 3];
    for (p, &dim) in position.iter_mut().zip(dimensions.iter()) {
        let margin = WALL_MARGIN.min(dim / 4.0);
        *p = rng.uniform(margin, dim - margin)?;
    }
    Ok(position)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speech(len: usize) -> Waveform {
        let samples = (0..len)
            .map(|i| 0.4 * (i as f32 * 0.07).sin() * (i as f32 * 0.001).cos())
            .collect();
        Waveform::from_vec(samples, 16000).unwrap()
    }

    fn bank() -> NoiseBank {
        let noise = (0..3000).map(|i| ((i * 7919) % 101) as f32 / 101.0 - 0.5).collect();
        NoiseBank::new(vec![Waveform::from_vec(noise, 16000).unwrap()])
    }

    #[test]
    fn test_disabled_steps_leave_input() {
        let config = AugmentationConfig {
            noise: NoiseConfig { enabled: false, ..Default::default() },
            room: RoomConfig { enabled: false, ..Default::default() },
            speed: SpeedConfig { enabled: false, ..Default::default() },
        };
        let w = speech(1000);
        let out = AugmentationPipeline::new(config).run(&w, 1).unwrap();
        assert_eq!(out.waveform, w);
        assert_eq!(out.params, RealizedParams::default());
    }

    #[test]
    fn test_realized_params_lie_in_ranges() {
        let config = AugmentationConfig {
            room: RoomConfig { reflection_order: 4, ..Default::default() },
            ..Default::default()
        };
        let pipeline = AugmentationPipeline::new(config.clone()).with_noise_bank(bank());
        let out = pipeline.run(&speech(4000), 99).unwrap();

        let room = out.params.room.unwrap();
        for (dim, range) in room.geometry.dimensions.iter().zip(config.room.dim_range.iter()) {
            assert!(range.contains(*dim));
        }
        assert!(room.geometry.validate().is_ok());
        assert_eq!(room.reflection_order, 4);
        assert!(config.noise.snr_db_range.contains(out.params.noise.unwrap().snr_db));
        assert!(config.speed.factor_range.contains(out.params.speed.unwrap().factor));
    }

    #[test]
    fn test_rt60_mode_derives_order() {
        let config = AugmentationConfig {
            noise: NoiseConfig { enabled: false, ..Default::default() },
            speed: SpeedConfig { enabled: false, ..Default::default() },
            room: RoomConfig {
                rt60_range: Some(ParamRange::new(0.3, 0.4)),
                reflection_order: 3,
                ..Default::default()
            },
        };
        let out = AugmentationPipeline::new(config).run(&speech(2000), 5).unwrap();
        let room = out.params.room.unwrap();
        assert!(room.rt60.is_some());
        assert!(room.reflection_order <= 3);
        assert_eq!(out.waveform.len(), 2000);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = AugmentationConfig {
            speed: SpeedConfig { enabled: true, factor_range: ParamRange::new(1.2, 0.8) },
            ..Default::default()
        };
        assert!(matches!(
            AugmentationPipeline::new(config).with_noise_bank(bank()).run(&speech(100), 0),
            Err(Error::InvalidParameter(_))
        ));

        let config = AugmentationConfig {
            room: RoomConfig { absorption_range: ParamRange::new(0.5, 1.0), ..Default::default() },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_noise_without_bank_fails() {
        let config = AugmentationConfig {
            room: RoomConfig { enabled: false, ..Default::default() },
            ..Default::default()
        };
        assert!(matches!(
            AugmentationPipeline::new(config).run(&speech(100), 0),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_config_from_json_uses_defaults() {
        let json = r#"{
            "noise": { "snr_db_range": { "min": 0.0, "max": 5.0 } },
            "speed": { "enabled": false }
        }"#;
        let config: AugmentationConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.noise.snr_db_range, ParamRange::new(0.0, 5.0));
        assert!(config.noise.enabled);
        assert!(!config.speed.enabled);
        assert_eq!(config.room, RoomConfig::default());
    }
}
