use hound::{WavSpec, WavWriter};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::PI;
use std::fs;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    fs::create_dir_all("demos/data/clean")?;
    fs::create_dir_all("demos/data/noise")?;

    // Two "utterances": vowel-like harmonic stacks with a slow envelope
    for (index, f0) in [(1, 120.0f32), (2, 210.0f32)] {
        let path = format!("demos/data/clean/utterance_{}.wav", index);
        let mut writer = WavWriter::create(&path, spec)?;
        let total_samples = 16000 * 2;
        for i in 0..total_samples {
            let t = i as f32 / 16000.0;
            let envelope = (PI * t / 2.0).sin();
            let voiced: f32 = (1..=5)
                .map(|h| (2.0 * PI * f0 * h as f32 * t).sin() / h as f32)
                .sum();
            let sample = 0.3 * envelope * voiced;
            writer.write_sample((sample * 32767.0) as i16)?;
        }
        writer.finalize()?;
        println!("Generated {}", path);
    }

    // Noise: a mains hum plus seeded hiss
    let path = "demos/data/noise/hum_and_hiss.wav";
    let mut writer = WavWriter::create(path, spec)?;
    let mut rng = StdRng::seed_from_u64(7);
    for i in 0..16000 {
        let hiss: f32 = rng.gen_range(-0.5..0.5);
        let hum = (2.0 * PI * 50.0 * i as f32 / 16000.0).sin();
        writer.write_sample(((0.3 * hum + 0.4 * hiss) * 32767.0) as i16)?;
    }
    writer.finalize()?;
    println!("Generated {}", path);

    Ok(())
}
