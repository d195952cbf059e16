use rifs_augment::utils::{
    augment_dir, load_noise_dir, load_wav_with_checks, read_audio, save_audio,
};
use rifs_augment::{AugmentationConfig, NoiseBank, RoomConfig, Waveform};
use std::fs;
use tempfile::TempDir;

fn tone(len: usize, sample_rate: u32, freq: f32) -> Waveform {
    let samples = (0..len)
        .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
        .collect();
    Waveform::from_vec(samples, sample_rate).unwrap()
}

#[test]
fn save_then_read_keeps_samples() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("tone.wav");
    let original = tone(1600, 16000, 300.0);

    save_audio(&path, &original).unwrap();
    let decoded = read_audio(&path).unwrap();

    assert_eq!(decoded.sample_rate(), 16000);
    assert_eq!(decoded.len(), original.len());
    for (a, b) in decoded.samples().iter().zip(original.samples().iter()) {
        assert!((a - b).abs() < 1e-4);
    }
}

#[test]
fn stereo_float_files_are_downmixed() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("stereo.wav");
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 8000,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for _ in 0..100 {
        writer.write_sample(0.5f32).unwrap();
        writer.write_sample(-0.1f32).unwrap();
    }
    writer.finalize().unwrap();

    let decoded = read_audio(&path).unwrap();
    assert_eq!(decoded.len(), 100);
    assert!(decoded.samples().iter().all(|&v| (v - 0.2).abs() < 1e-6));

    let resampled = load_wav_with_checks(&path, 16000).unwrap();
    assert_eq!(resampled.sample_rate(), 16000);
    assert_eq!(resampled.len(), 200);
}

#[test]
fn empty_file_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("empty.wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    hound::WavWriter::create(&path, spec).unwrap().finalize().unwrap();
    assert!(read_audio(&path).is_err());
}

#[test]
fn noise_dir_is_loaded_recursively() {
    let temp_dir = TempDir::new().unwrap();
    let nested = temp_dir.path().join("street");
    fs::create_dir_all(&nested).unwrap();
    save_audio(temp_dir.path().join("hum.wav"), &tone(500, 16000, 50.0)).unwrap();
    save_audio(nested.join("traffic.wav"), &tone(400, 8000, 90.0)).unwrap();
    fs::write(temp_dir.path().join("notes.txt"), "not audio").unwrap();

    let bank = load_noise_dir(temp_dir.path(), 16000).unwrap();
    assert_eq!(bank.len(), 2);
    let lengths: Vec<usize> = (0..bank.len()).map(|i| bank.get(i).unwrap().len()).collect();
    assert!(lengths.contains(&500));
    assert!(lengths.contains(&800));
}

#[test]
fn directory_is_augmented_into_target() {
    let temp_dir = TempDir::new().unwrap();
    let source = temp_dir.path().join("clean");
    let target = temp_dir.path().join("augmented");
    fs::create_dir_all(&source).unwrap();
    save_audio(source.join("a.wav"), &tone(4000, 16000, 220.0)).unwrap();
    save_audio(source.join("b.wav"), &tone(3000, 16000, 330.0)).unwrap();

    let config = AugmentationConfig {
        room: RoomConfig {
            reflection_order: 3,
            ..Default::default()
        },
        ..Default::default()
    };
    let bank = NoiseBank::new(vec![tone(1000, 16000, 1000.0)]);
    let written = augment_dir(&source, &target, &config, &bank, 7, false).unwrap();

    assert_eq!(written.len(), 2);
    assert_eq!(written[0], target.join("a.wav"));
    assert!(read_audio(&written[1]).unwrap().len() > 0);
}
