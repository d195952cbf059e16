//! Audio file utilities
//!
//! Thin adapters between WAV files and the in-memory [`Waveform`] the
//! transforms operate on: decoding, encoding, loading a directory of noise
//! clips and augmenting a directory of recordings.

use crate::noise::NoiseBank;
use crate::pipeline::{AugmentationConfig, AugmentationPipeline};
use crate::resample::resample_to_rate;
use crate::waveform::Waveform;
use crate::{Error, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// Read audio from a WAV file
///
/// Integer and float PCM are accepted; multi-channel audio is downmixed to
/// mono by averaging the channels.
///
/// # Arguments
///
/// * `path` - Path to the WAV file
///
/// # Returns
///
/// The decoded waveform at the file's sample rate
///
/// # Errors
///
/// Returns an error if:
/// * The file cannot be opened
/// * The file format is invalid
/// * The file holds no samples
pub fn read_audio<P: AsRef<Path>>(path: P) -> Result<Waveform> {
    let mut reader = WavReader::open(path).map_err(|e| Error::AudioProcessing(e.to_string()))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map_err(|e| Error::AudioProcessing(e.to_string())))
            .collect::<Result<Vec<f32>>>()?,
        SampleFormat::Int => {
            let full_scale = (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map_err(|e| Error::AudioProcessing(e.to_string())))
                .map(|s| s.map(|v| v as f32 / full_scale))
                .collect::<Result<Vec<f32>>>()?
        }
    };

    let channels = spec.channels.max(1) as usize;
    let samples: Vec<f32> = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };
    debug!(
        "Read {} frames ({} channels, {} Hz, {:?})",
        samples.len(),
        spec.channels,
        spec.sample_rate,
        spec.sample_format
    );

    Waveform::from_vec(samples, spec.sample_rate)
}

/// Load a WAV file as mono audio at `sample_rate`
///
/// Files at another rate are resampled.
///
/// # Errors
///
/// Returns an error if the file cannot be decoded or holds no samples.
pub fn load_wav_with_checks<P: AsRef<Path>>(path: P, sample_rate: u32) -> Result<Waveform> {
    let waveform = read_audio(path.as_ref())?;
    if waveform.sample_rate() != sample_rate {
        debug!(
            "Resampling {:?} from {} Hz to {} Hz",
            path.as_ref(),
            waveform.sample_rate(),
            sample_rate
        );
    }
    resample_to_rate(&waveform, sample_rate)
}

/// Save audio to a WAV file
///
/// Samples are written as 16-bit PCM, saturating outside `[-1.0, 1.0]`.
///
/// # Errors
///
/// Returns an error if:
/// * The file cannot be created
/// * The audio data cannot be written
/// * The WAV file cannot be finalized
pub fn save_audio<P: AsRef<Path>>(path: P, audio: &Waveform) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: audio.sample_rate(),
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer =
        WavWriter::create(path, spec).map_err(|e| Error::AudioProcessing(e.to_string()))?;

    for &sample in audio.samples().iter() {
        let sample = (sample * 32768.0).clamp(-32768.0, 32767.0) as i16;
        writer
            .write_sample(sample)
            .map_err(|e| Error::AudioProcessing(e.to_string()))?;
    }

    writer
        .finalize()
        .map_err(|e| Error::AudioProcessing(e.to_string()))?;

    Ok(())
}

/// Load every `.wav` file below `dir` into a noise bank at `sample_rate`
///
/// Files are visited in sorted path order so clip indices are stable.
///
/// # Errors
///
/// Returns an error if the directory cannot be read or a file cannot be decoded.
pub fn load_noise_dir<P: AsRef<Path>>(dir: P, sample_rate: u32) -> Result<NoiseBank> {
    let paths = wav_files(dir.as_ref(), true)?;
    let clips = paths
        .iter()
        .map(|path| load_wav_with_checks(path, sample_rate))
        .collect::<Result<Vec<Waveform>>>()?;
    info!("Loaded {} noise clips from {:?}", clips.len(), dir.as_ref());
    Ok(NoiseBank::new(clips))
}

/// Augment every `.wav` file in `source` and write the results to `target`
///
/// Output files keep their names. File `i` in sorted order is augmented with
/// the seed derived from `base_seed` and `i`.
///
/// # Returns
///
/// Paths of the written files
///
/// # Errors
///
/// Returns an error if a file cannot be read or written, or if augmenting any
/// file fails.
pub fn augment_dir<P: AsRef<Path>, Q: AsRef<Path>>(
    source: P,
    target: Q,
    config: &AugmentationConfig,
    noise_bank: &NoiseBank,
    base_seed: u64,
    recursive: bool,
) -> Result<Vec<PathBuf>> {
    let target = target.as_ref();
    fs::create_dir_all(target)?;

    let paths = wav_files(source.as_ref(), recursive)?;
    let waveforms = paths
        .iter()
        .map(read_audio)
        .collect::<Result<Vec<Waveform>>>()?;

    let pipeline = AugmentationPipeline::new(config.clone()).with_noise_bank(noise_bank.clone());
    let outputs = pipeline.run_batch(&waveforms, base_seed);

    let mut written = Vec::with_capacity(paths.len());
    for (path, output) in paths.iter().zip(outputs) {
        let output = output.map_err(|e| {
            warn!("Augmenting {:?} failed: {}", path, e);
            e
        })?;
        let name = path
            .file_name()
            .ok_or_else(|| Error::InvalidInput(format!("{:?} has no file name", path)))?;
        let out_path = target.join(name);
        save_audio(&out_path, &output.waveform)?;
        written.push(out_path);
    }
    info!("Augmented {} files into {:?}", written.len(), target);
    Ok(written)
}

fn wav_files(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                if recursive {
                    pending.push(path);
                }
            } else if path
                .extension()
                .map_or(false, |ext| ext.eq_ignore_ascii_case("wav"))
            {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}
