use anyhow::Context;
use log::info;
use rifs_augment::utils::{load_noise_dir, load_wav_with_checks, save_audio};
use rifs_augment::{AugmentationConfig, AugmentationPipeline};
use std::env;
use std::fs;
use std::path::Path;

const SAMPLE_RATE: u32 = 16000;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let input = args.get(1).map(String::as_str).unwrap_or("demos/data/clean/utterance_1.wav");
    let output = args.get(2).map(String::as_str).unwrap_or("demos/data/augmented.wav");
    let seed: u64 = args.get(3).map(|s| s.parse()).transpose()?.unwrap_or(42);

    if !Path::new(input).exists() {
        println!("Input file not found. Run 'cargo run --example generate_test_audio' first.");
        return Ok(());
    }

    // Optional JSON configuration next to the demo data
    let config_path = Path::new("demos/data/config.json");
    let config: AugmentationConfig = if config_path.exists() {
        let text = fs::read_to_string(config_path)?;
        serde_json::from_str(&text).with_context(|| format!("parsing {:?}", config_path))?
    } else {
        AugmentationConfig::default()
    };

    info!("Loading noise clips...");
    let bank = load_noise_dir("demos/data/noise", SAMPLE_RATE)?;
    let audio = load_wav_with_checks(input, SAMPLE_RATE)?;
    println!("Audio loaded: {} samples", audio.len());

    let pipeline = AugmentationPipeline::new(config).with_noise_bank(bank);
    let result = pipeline.run(&audio, seed)?;

    println!("Realized parameters:");
    println!("{}", serde_json::to_string_pretty(&result.params)?);
    if result.params.clipped() {
        println!("Warning: output was amplitude limited");
    }

    save_audio(output, &result.waveform)?;
    println!("Saved {} samples to {}", result.waveform.len(), output);
    Ok(())
}
