//! Speech waveform augmentation
//!
//! This crate produces distorted variants of speech recordings for training and
//! evaluating speech models. Three families of distortion are supported:
//!
//! * additive background noise mixed at a target signal-to-noise ratio
//! * room reverberation synthesized with the image-source method
//! * speed perturbation through band-limited resampling
//!
//! Every transform works on an in-memory [`Waveform`] and returns a new one.
//! The [`AugmentationPipeline`] chains them under a single seeded
//! [`RandomSource`] so that results are reproducible.

pub mod noise;
pub mod pipeline;
pub mod random;
pub mod resample;
pub mod room;
pub mod speed;
pub mod utils;
pub mod waveform;

pub use noise::{NoiseAugmenter, NoiseBank, NoiseOutcome};
pub use pipeline::{
    AugmentationConfig, AugmentationPipeline, NoiseConfig, ParamRange, PipelineOutput,
    RealizedParams, RoomConfig, SpeedConfig,
};
pub use random::RandomSource;
pub use resample::{resample, resample_to_rate};
pub use room::{Absorption, ImpulseResponse, RoomGeometry, RoomOutcome, RoomSimulator};
pub use speed::SpeedPerturber;
pub use waveform::{NoiseClip, PadPolicy, Waveform, AMPLITUDE_LIMIT};

/// Error types for the augmentation library
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Sample rate mismatch: expected {expected} Hz, found {found} Hz")]
    SampleRateMismatch { expected: u32, found: u32 },
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Invalid room geometry: {0}")]
    InvalidGeometry(String),
    #[error("Degenerate signal: {0}")]
    DegenerateSignal(String),
    #[error("Audio processing error: {0}")]
    AudioProcessing(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for the augmentation library
pub type Result<T> = std::result::Result<T, Error>;

/// Mix `noise_clip` into `waveform` at `snr_db` decibels.
///
/// The segment of the noise clip that is used is drawn from `rng`.
pub fn apply_noise(
    waveform: &Waveform,
    noise_clip: &NoiseClip,
    snr_db: f64,
    rng: &mut RandomSource,
) -> Result<Waveform> {
    NoiseAugmenter::default()
        .apply(waveform, noise_clip, snr_db, rng)
        .map(|outcome| outcome.waveform)
}

/// Reverberate `waveform` in the room described by `room_geometry`.
///
/// A `reflection_order` of zero returns the input unchanged.
pub fn simulate_room(
    waveform: &Waveform,
    room_geometry: &RoomGeometry,
    reflection_order: u32,
) -> Result<Waveform> {
    RoomSimulator::default()
        .simulate(waveform, room_geometry, reflection_order)
        .map(|outcome| outcome.waveform)
}

/// Change the tempo of `waveform` by `factor` while keeping its declared sample rate.
pub fn perturb_speed(waveform: &Waveform, factor: f64) -> Result<Waveform> {
    SpeedPerturber::default().apply(waveform, factor)
}

/// Run every enabled transform of `config` on `waveform` under `seed`.
///
/// `noise_bank` supplies the clips used by the noise step; it may be empty when
/// noise augmentation is disabled.
pub fn run_pipeline(
    waveform: &Waveform,
    config: &AugmentationConfig,
    noise_bank: &NoiseBank,
    seed: u64,
) -> Result<PipelineOutput> {
    AugmentationPipeline::new(config.clone())
        .with_noise_bank(noise_bank.clone())
        .run(waveform, seed)
}
