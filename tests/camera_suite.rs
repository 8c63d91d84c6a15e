use pointcloud_visualizer::analysis::{BAND_COUNT, BandEnergy};
use pointcloud_visualizer::camera::{AutoCamera, DepthProbe, forward};
use pointcloud_visualizer::cloud::DepthMap;
use proptest::prelude::*;
use std::sync::Arc;

fn loud(beat: f32) -> BandEnergy {
    BandEnergy::from_bands([0.8; BAND_COUNT], beat)
}

fn probe_from(w: usize, h: usize, f: impl Fn(f32) -> f32) -> DepthProbe {
    let values = (0..h)
        .flat_map(|_| (0..w).map(|x| x as f32 / (w - 1) as f32))
        .map(f)
        .collect();
    DepthProbe::new(Arc::new(DepthMap::new(w, h, values).unwrap()), 1.6, 1.0)
}

#[test]
fn uniform_near_wall_turns_camera() {
    let wall = probe_from(64, 32, |_| 0.9);
    let mut steered = AutoCamera::new(11, 1.5);
    let mut free = AutoCamera::new(11, 1.5);
    for _ in 0..10 {
        steered.update(0.1, &BandEnergy::SILENT, Some(&wall));
        free.update(0.1, &BandEnergy::SILENT, None);
    }
    assert!(
        steered.target_yaw() > free.target_yaw() + 0.5,
        "steered {} vs free {}",
        steered.target_yaw(),
        free.target_yaw()
    );
}

#[test]
fn camera_leans_toward_the_far_side() {
    // Nearer on the right half of the view.
    let slope = probe_from(64, 32, |u| 0.4 + 0.5 * u);
    let mut steered = AutoCamera::new(5, 1.5);
    let mut free = AutoCamera::new(5, 1.5);
    for _ in 0..5 {
        steered.update(0.1, &BandEnergy::SILENT, Some(&slope));
        free.update(0.1, &BandEnergy::SILENT, None);
    }
    assert!(steered.target_yaw() < free.target_yaw(), "should turn left");
}

#[test]
fn far_geometry_does_not_steer() {
    let open = probe_from(32, 16, |_| 0.1);
    let mut a = AutoCamera::new(3, 1.0);
    let mut b = AutoCamera::new(3, 1.0);
    for _ in 0..20 {
        a.update(0.05, &BandEnergy::SILENT, Some(&open));
        b.update(0.05, &BandEnergy::SILENT, None);
    }
    assert_eq!(a.target_yaw(), b.target_yaw());
    assert_eq!(a.position(), b.position());
}

#[test]
fn beat_kicks_the_target() {
    let mut calm = AutoCamera::new(21, 1.0);
    let mut kicked = AutoCamera::new(21, 1.0);
    calm.update(0.016, &BandEnergy::SILENT, None);
    kicked.update(0.016, &loud(1.0), None);
    assert_ne!(calm.target_yaw(), kicked.target_yaw());
}

#[test]
fn same_seed_same_path() {
    let mut a = AutoCamera::new(42, 1.2);
    let mut b = AutoCamera::new(42, 1.2);
    for i in 0..300 {
        let audio = loud(if i % 15 == 0 { 1.0 } else { 0.2 });
        let ma = a.update(1.0 / 30.0, &audio, None);
        let mb = b.update(1.0 / 30.0, &audio, None);
        assert_eq!(ma, mb);
    }
}

#[test]
fn probe_maps_straight_ahead_to_image_center() {
    let p = probe_from(65, 33, |u| u);
    assert!((p.sample(0.0, 0.0) - 0.5).abs() < 1e-6);
    assert!(p.sample(0.8, 0.0) > 0.99);
    assert!(p.sample(-0.8, 0.0) < 0.01);
}

#[test]
fn forward_at_rest_looks_down_negative_z() {
    let f = forward(0.0, 0.0);
    assert!((f.z + 1.0).abs() < 1e-6 && f.x.abs() < 1e-6 && f.y.abs() < 1e-6);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn stays_bounded_and_finite(
        seed in any::<u64>(),
        bass in 0.0f32..1.0,
        beat_every in 2usize..40,
    ) {
        let mut cam = AutoCamera::new(seed, 16.0 / 9.0);
        for i in 0..900 {
            let beat = if i % beat_every == 0 { 1.0 } else { 0.0 };
            let audio = BandEnergy::from_bands([bass; BAND_COUNT], beat);
            let m = cam.update(0.1, &audio, None);
            prop_assert!(m.view.is_finite() && m.projection.is_finite() && m.eye.is_finite());
            let p = cam.position();
            prop_assert!(
                p.x.abs() <= 4.0 + 1e-4 && p.y.abs() <= 2.0 + 1e-4 && p.z.abs() <= 6.0 + 1e-4,
                "{p:?}"
            );
            prop_assert!(cam.pitch().abs() <= 0.6 + 1e-4);
        }
    }
}
