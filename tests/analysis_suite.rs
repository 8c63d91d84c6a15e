use pointcloud_visualizer::analysis::{
    BAND_COUNT, BandEnergy, BeatDetector, SpectralAnalyzer, band_energy,
};
use pointcloud_visualizer::audio::{
    FFT_SIZE, MAGNITUDE_BINS, MagnitudeAnalyzer, SilentSource, quantize_db,
};
use proptest::prelude::*;

const SR: u32 = 48_000;

fn flat_mags(v: u8) -> Vec<u8> {
    vec![v; MAGNITUDE_BINS]
}

// ── band_energy ─────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn band_energy_stays_normalized(
        mags in prop::collection::vec(any::<u8>(), 1..2048),
        lo in 0.0f32..24_000.0,
        span in 0.0f32..24_000.0,
    ) {
        let e = band_energy(&mags, SR, lo, lo + span);
        prop_assert!((0.0..=1.0).contains(&e), "energy {e} out of range");
    }
}

#[test]
fn band_energy_degenerate_inputs_are_zero() {
    assert_eq!(band_energy(&[], SR, 20.0, 60.0), 0.0);
    assert_eq!(band_energy(&flat_mags(200), 0, 20.0, 60.0), 0.0);
    assert_eq!(band_energy(&flat_mags(200), SR, 500.0, 100.0), 0.0);
    // Entirely above Nyquist.
    assert_eq!(band_energy(&flat_mags(200), SR, 30_000.0, 40_000.0), 0.0);
}

#[test]
fn band_energy_full_scale_is_one() {
    let e = band_energy(&flat_mags(255), SR, 250.0, 500.0);
    assert!((e - 1.0).abs() < 1e-6, "got {e}");
}

// ── SpectralAnalyzer ────────────────────────────────────────────────────────

#[test]
fn first_frame_is_one_fifth_of_raw() {
    let mags = flat_mags(200);
    let raw = SpectralAnalyzer::raw_bands(&mags, SR);
    let mut a = SpectralAnalyzer::new();
    let out = a.analyze(&mags, SR);
    for i in 0..BAND_COUNT {
        assert!((out.bands[i] - raw[i] * 0.2).abs() < 1e-5, "band {i}");
    }
}

#[test]
fn smoothing_converges_to_steady_input() {
    let mags = flat_mags(200);
    let raw = SpectralAnalyzer::raw_bands(&mags, SR);
    let mut a = SpectralAnalyzer::new();
    let mut out = BandEnergy::SILENT;
    for _ in 0..80 {
        out = a.analyze(&mags, SR);
    }
    for i in 0..BAND_COUNT {
        assert!((out.bands[i] - raw[i]).abs() < 1e-3, "band {i}: {} vs {}", out.bands[i], raw[i]);
    }
    assert!(out.bass >= out.bands[0] && out.bass >= out.bands[1]);
}

#[test]
fn quiet_input_is_gated_to_zero() {
    let raw = SpectralAnalyzer::raw_bands(&flat_mags(10), SR);
    assert!(raw.iter().all(|b| *b == 0.0), "{raw:?}");
}

#[test]
fn silent_source_yields_silence_and_resets_smoothing() {
    let mut a = SpectralAnalyzer::new();
    for _ in 0..10 {
        a.analyze(&flat_mags(220), SR);
    }
    let mut scratch = Vec::new();
    let out = a.tick(&SilentSource, &mut scratch);
    assert!(out.is_silent());
    assert_eq!(a.last(), BandEnergy::SILENT);

    let mags = flat_mags(200);
    let raw = SpectralAnalyzer::raw_bands(&mags, SR);
    let next = a.analyze(&mags, SR);
    assert!((next.bands[3] - raw[3] * 0.2).abs() < 1e-5);
}

// ── Beat detection ──────────────────────────────────────────────────────────

#[test]
fn beat_spikes_then_decays() {
    let mut d = BeatDetector::with_average(0.1);
    assert_eq!(d.update(0.5), 1.0);
    let b1 = d.update(0.0);
    assert!((b1 - 0.9).abs() < 1e-6, "got {b1}");
    let b2 = d.update(0.0);
    assert!((b2 - 0.81).abs() < 1e-6, "got {b2}");
}

#[test]
fn beat_needs_one_and_a_half_times_average() {
    let mut d = BeatDetector::with_average(0.4);
    assert_eq!(d.update(0.55), 0.0);
    let mut d = BeatDetector::with_average(0.4);
    assert_eq!(d.update(0.61), 1.0);
}

#[test]
fn beat_average_tracks_input() {
    let mut d = BeatDetector::new();
    for _ in 0..400 {
        d.update(0.3);
    }
    assert!((d.average() - 0.3).abs() < 1e-3);
    assert!(d.beat() < 1e-3, "steady input should not keep beating");
}

// ── BandEnergy ──────────────────────────────────────────────────────────────

#[test]
fn aggregates_follow_band_groups() {
    let e = BandEnergy::from_bands([0.1, 0.7, 0.2, 0.3, 0.5, 0.9, 0.1, 0.2], 2.0);
    assert_eq!(e.bass, 0.7);
    assert_eq!(e.mid, 0.5);
    assert_eq!(e.high, 0.9);
    assert_eq!(e.beat, 1.0);
}

#[test]
fn intensity_scales_every_band() {
    let e = BandEnergy::from_bands([0.8; BAND_COUNT], 1.0);
    let half = e.scaled(0.5);
    assert!(half.bands.iter().all(|b| (b - 0.4).abs() < 1e-6));
    assert!((half.beat - 0.5).abs() < 1e-6);
    assert_eq!(e.scaled(1.0), e);
    assert!(e.scaled(0.0).is_silent());
}

// ── Magnitudes ──────────────────────────────────────────────────────────────

#[test]
fn quantize_db_maps_range_ends() {
    assert_eq!(quantize_db(0.0), 0);
    assert_eq!(quantize_db(f32::NAN), 0);
    assert_eq!(quantize_db(1e-6), 0);
    assert_eq!(quantize_db(1.0), 255);
    let mid = quantize_db(10f32.powf(-65.0 / 20.0));
    assert!((126..=128).contains(&mid), "got {mid}");
}

#[test]
fn sine_peaks_at_its_bin() {
    let freq = 1_000.0f32;
    let ring: Vec<f32> = (0..FFT_SIZE)
        .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin() * 0.5)
        .collect();
    let mut out = vec![0u8; MAGNITUDE_BINS];
    MagnitudeAnalyzer::new().process(&ring, 0, &mut out);
    let peak = out
        .iter()
        .enumerate()
        .max_by_key(|(_, v)| **v)
        .map(|(i, _)| i)
        .unwrap();
    let expected = freq / (SR as f32 / FFT_SIZE as f32);
    assert!((peak as f32 - expected).abs() <= 1.5, "peak bin {peak}, expected ~{expected}");
}
