use rifs_augment::utils::{augment_dir, load_noise_dir};
use rifs_augment::AugmentationConfig;
use std::path::Path;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let source = Path::new("demos/data/clean");
    if !source.exists() {
        println!("No input directory. Run 'cargo run --example generate_test_audio' first.");
        return Ok(());
    }

    let bank = load_noise_dir("demos/data/noise", 16000)?;
    let written = augment_dir(
        source,
        "demos/data/augmented",
        &AugmentationConfig::default(),
        &bank,
        2024,
        true,
    )?;

    println!("Augmented {} files:", written.len());
    for path in written {
        println!("  {}", path.display());
    }
    Ok(())
}
