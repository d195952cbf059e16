use approx::{assert_abs_diff_eq, assert_relative_eq};
use rifs_augment::room::convolve;
use rifs_augment::{
    apply_noise, perturb_speed, run_pipeline, simulate_room, Absorption, AugmentationConfig,
    AugmentationPipeline, Error, NoiseBank, RandomSource, RoomGeometry, RoomSimulator, Waveform,
};

const RATE: u32 = 16000;

fn speech_like(len: usize) -> Waveform {
    let samples = (0..len)
        .map(|i| {
            let t = i as f32 / RATE as f32;
            0.3 * (2.0 * std::f32::consts::PI * 220.0 * t).sin()
                + 0.1 * (2.0 * std::f32::consts::PI * 1330.0 * t).sin()
        })
        .collect();
    Waveform::from_vec(samples, RATE).unwrap()
}

/// Uniform noise scaled to exactly unit power.
fn white_noise(len: usize, seed: u64) -> Waveform {
    let mut rng = RandomSource::from_seed(seed);
    let samples: Vec<f32> = (0..len)
        .map(|_| rng.uniform(-1.0, 1.0).unwrap() as f32)
        .collect();
    let raw = Waveform::from_vec(samples, RATE).unwrap();
    raw.scale(1.0 / raw.power().unwrap().sqrt()).unwrap()
}

fn office() -> RoomGeometry {
    RoomGeometry::new(
        [6.0, 4.5, 2.8],
        Absorption::PerWall([0.2, 0.25, 0.3, 0.3, 0.1, 0.5]),
        [1.2, 1.0, 1.5],
        [4.1, 3.0, 1.1],
    )
}

#[test]
fn speed_factor_one_is_identity() {
    let w = speech_like(12345);
    let out = perturb_speed(&w, 1.0).unwrap();
    assert_eq!(out.len(), w.len());
    for (a, b) in out.samples().iter().zip(w.samples().iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-4);
    }
}

#[test]
fn speed_round_trip_restores_length() {
    let w = speech_like(16001);
    for k in [0.8, 0.93, 1.07, 1.25, 2.0] {
        let there = perturb_speed(&w, k).unwrap();
        let back = perturb_speed(&there, 1.0 / k).unwrap();
        let diff = back.len() as i64 - w.len() as i64;
        assert!(diff.abs() <= 2, "factor {} changed length by {}", k, diff);
    }
}

#[test]
fn speed_two_halves_length() {
    let w = speech_like(16000);
    let out = perturb_speed(&w, 2.0).unwrap();
    assert!((out.len() as i64 - 8000).abs() <= 1);
    assert_eq!(out.sample_rate(), RATE);
}

#[test]
fn noise_hits_target_snr() {
    let signal = speech_like(16000);
    let noise = white_noise(24000, 8);
    let mut rng = RandomSource::from_seed(21);
    for snr in [-3.0, 0.0, 5.0, 12.5, 40.0] {
        let mixed = apply_noise(&signal, &noise, snr, &mut rng).unwrap();
        let added = mixed.mix(&signal, 1.0, -1.0).unwrap();
        let measured = 10.0 * (signal.power().unwrap() / added.power().unwrap()).log10();
        assert_abs_diff_eq!(measured, snr, epsilon = 0.5);
    }
}

#[test]
fn impulse_with_equal_power_noise_doubles_power() {
    let mut samples = vec![0.0f32; 16000];
    samples[0] = 1.0;
    let signal = Waveform::from_vec(samples, RATE).unwrap();
    let noise = white_noise(16000, 3);
    let mut rng = RandomSource::from_seed(0);

    let out = apply_noise(&signal, &noise, 0.0, &mut rng).unwrap();
    let ratio = out.power().unwrap() / signal.power().unwrap();
    assert_relative_eq!(ratio, 2.0, max_relative = 0.05);
}

#[test]
fn reflection_order_zero_passes_through() {
    let w = speech_like(5000);
    assert_eq!(simulate_room(&w, &office(), 0).unwrap(), w);
}

#[test]
fn degenerate_room_is_rejected() {
    let geometry = RoomGeometry::new(
        [0.01, 0.01, 0.01],
        Absorption::Global(0.2),
        [0.003, 0.003, 0.003],
        [0.007, 0.007, 0.007],
    );
    let w = speech_like(100);
    assert!(matches!(simulate_room(&w, &geometry, 3), Err(Error::InvalidGeometry(_))));
}

#[test]
fn convolution_length_law() {
    let w = speech_like(8000);
    let outcome = RoomSimulator::new().simulate(&w, &office(), 6).unwrap();
    let ir_len = outcome.impulse_response.len();
    assert!(ir_len > 1);
    assert_eq!(outcome.convolved_len, w.len() + ir_len - 1);
    assert_eq!(outcome.waveform.len(), w.len());

    let full = convolve(w.samples(), outcome.impulse_response.waveform().samples());
    assert_eq!(full.len(), w.len() + ir_len - 1);
}

#[test]
fn reverberation_delays_and_spreads_an_impulse() {
    let mut samples = vec![0.0f32; 8000];
    samples[0] = 0.5;
    let w = Waveform::from_vec(samples, RATE).unwrap();
    let out = simulate_room(&w, &office(), 10).unwrap();
    assert!(out.samples()[0].abs() < 1e-6);
    let nonzero = out.samples().iter().filter(|v| v.abs() > 1e-6).count();
    assert!(nonzero > 50, "only {} taps survived", nonzero);
}

#[test]
fn pipeline_is_deterministic() {
    let w = speech_like(16000);
    let bank = NoiseBank::new(vec![white_noise(7000, 1), white_noise(20000, 2)]);
    let config = AugmentationConfig::default();

    let first = run_pipeline(&w, &config, &bank, 42).unwrap();
    let second = run_pipeline(&w, &config, &bank, 42).unwrap();
    assert_eq!(first.waveform, second.waveform);
    assert_eq!(first.params, second.params);

    let other = run_pipeline(&w, &config, &bank, 43).unwrap();
    assert_ne!(first.params, other.params);
}

#[test]
fn batch_matches_sequential_runs() {
    let bank = NoiseBank::new(vec![white_noise(9000, 4)]);
    let pipeline = AugmentationPipeline::new(AugmentationConfig::default()).with_noise_bank(bank);
    let inputs: Vec<Waveform> = (0..6).map(|i| speech_like(4000 + i * 500)).collect();

    let batch = pipeline.run_batch(&inputs, 1234);
    assert_eq!(batch.len(), inputs.len());
    for (i, (input, result)) in inputs.iter().zip(batch).enumerate() {
        let mut rng = RandomSource::derive(1234, i as u64);
        let expected = pipeline.run_with(input, &mut rng).unwrap();
        let result = result.unwrap();
        assert_eq!(result.waveform, expected.waveform);
        assert_eq!(result.params, expected.params);
    }
}
