use std::sync::Arc;

use pointcloud_visualizer::analysis::{BAND_COUNT, BandEnergy};
use pointcloud_visualizer::camera::AutoCamera;
use pointcloud_visualizer::cloud::{
    BuilderConfig, Category, PointCloud, PointCloudBuilder, procedural_scene,
};
use pointcloud_visualizer::config::{Quality, RenderParameters};
use pointcloud_visualizer::error::RenderError;
use pointcloud_visualizer::physics::{FieldInputs, displace, proximity};
use pointcloud_visualizer::post::{
    PingPong, PostParams, PostState, bloom_weights, hue_rotate, iteration_count, kaleido_uv,
    sacred_color,
};
use pointcloud_visualizer::visual::{
    CloudSlots, CpuEngine, Crossfade, GpuEngine, RenderCtx, VisualEngine,
};
use glam::Vec3;
use proptest::prelude::*;

const W: usize = 48;
const H: usize = 32;

fn loud() -> BandEnergy {
    BandEnergy::from_bands([0.9; BAND_COUNT], 1.0)
}

fn scene() -> Arc<PointCloud> {
    let (img, depth) = procedural_scene(128, 80);
    Arc::new(PointCloudBuilder::new(BuilderConfig::default()).build(&img, Some(&depth), None))
}

fn ctx(t: f32, coherence: f32, audio: BandEnergy) -> RenderCtx {
    let camera = AutoCamera::new(1, W as f32 / H as f32).update(0.016, &BandEnergy::SILENT, None);
    RenderCtx {
        t,
        dt: 0.016,
        w: W,
        h: H,
        audio,
        params: RenderParameters {
            coherence,
            ..RenderParameters::default()
        },
        camera,
        quality: Quality::Ultra,
        scale: 1,
    }
}

fn has_non_black(buf: &[u8]) -> bool {
    buf.chunks_exact(4).any(|px| px[0] != 0 || px[1] != 0 || px[2] != 0)
}

// ── Crossfade / slots ───────────────────────────────────────────────────────

proptest! {
    #[test]
    fn crossfade_alphas_sum_to_one(
        start in -10.0f32..10.0,
        duration in 0.0f32..5.0,
        dt in -1.0f32..8.0,
    ) {
        let f = Crossfade::new(start, duration);
        let now = start + dt;
        let (a_in, a_out) = (f.incoming(now), f.outgoing(now));
        prop_assert!((0.0..=1.0).contains(&a_in));
        prop_assert!((a_in + a_out - 1.0).abs() < 1e-6);
    }
}

#[test]
fn zero_length_crossfade_is_a_cut() {
    let f = Crossfade::new(3.0, 0.0);
    assert_eq!(f.incoming(3.0), 1.0);
    assert!(f.is_complete(3.0));
}

#[test]
fn outgoing_cloud_released_only_at_zero_alpha() {
    let mut slots = CloudSlots::new(1.0);
    assert!(slots.push("a", 0.0).is_none());
    assert!(!slots.is_fading());
    slots.push("b", 2.0);
    assert_eq!(slots.len(), 2);

    assert!(slots.begin_frame(2.5).is_none());
    let live: Vec<_> = slots.live(2.5).collect();
    assert_eq!(live.len(), 2);
    assert_eq!(*live[0].0, "a", "outgoing draws first");
    let sum: f32 = live.iter().map(|(_, a)| a).sum();
    assert!((sum - 1.0).abs() < 1e-6);

    assert_eq!(slots.begin_frame(3.0), Some("a"));
    assert_eq!(slots.len(), 1);
    assert!(!slots.is_fading());
    assert_eq!(slots.current(), Some(&"b"));
}

// ── Post parameters ─────────────────────────────────────────────────────────

#[test]
fn iteration_count_follows_coherence() {
    assert_eq!(iteration_count(1.0), 1);
    assert_eq!(iteration_count(0.5), 2);
    assert_eq!(iteration_count(0.0), 3);
    assert_eq!(iteration_count(-4.0), 3);
}

#[test]
fn full_coherence_disables_chaos_effects() {
    let p = PostParams::compute(1.0, &loud(), 12.5);
    assert_eq!(p.iterations, 1);
    assert_eq!(p.kaleido_amount, 0.0);
    assert_eq!(p.glitch_amount, 0.0);
    assert_eq!(p.sacred_activation, 0.0);
    assert!(!p.draw_sacred);
    assert_eq!(p.feedback_amount, 0.0);
    assert_eq!(sacred_color([0.3, 0.7], 1.5, &p), [0.0; 3]);
}

#[test]
fn silence_disables_beat_effects() {
    let p = PostParams::compute(0.0, &BandEnergy::SILENT, 4.0);
    assert_eq!(p.glitch_amount, 0.0);
    assert_eq!(p.chroma_offset, 0.0);
    assert!(p.draw_sacred);
    assert_eq!(p.sacred_activation, 1.0);
    assert!(p.feedback_amount <= 0.92);
}

#[test]
fn post_state_transitions() {
    assert_eq!(PostState::Idle.on_frame(true, true), PostState::Compositing);
    assert_eq!(PostState::Compositing.on_frame(false, true), PostState::Idle);
    assert_eq!(PostState::Compositing.on_frame(true, false), PostState::ContextLost);
    assert_eq!(PostState::ContextLost.on_frame(true, true), PostState::Compositing);
}

#[test]
fn ping_pong_swaps_roles() {
    let mut pp = PingPong::new(1, 2);
    {
        let (cur, hist) = pp.split();
        *cur += *hist;
    }
    assert_eq!(*pp.current(), 3);
    pp.swap();
    assert_eq!(*pp.history(), 3);
    assert_eq!(*pp.current(), 2);
}

#[test]
fn pixel_helpers() {
    let c = kaleido_uv([0.5, 0.5], 1.3);
    assert!((c[0] - 0.5).abs() < 1e-6 && (c[1] - 0.5).abs() < 1e-6);

    let rgb = [0.8, 0.2, 0.4];
    let back = hue_rotate(rgb, std::f32::consts::TAU);
    for k in 0..3 {
        assert!((back[k] - rgb[k]).abs() < 1e-4);
    }
    let grey = hue_rotate([0.5; 3], 1.0);
    assert!(grey.iter().all(|v| (v - 0.5).abs() < 1e-5));

    let sum: f32 = bloom_weights().iter().sum();
    assert!((sum - 1.0).abs() < 1e-5);
}

// ── Displacement ────────────────────────────────────────────────────────────

fn inputs(coherence: f32, form: f32, audio: BandEnergy) -> FieldInputs {
    FieldInputs {
        time: 3.7,
        audio,
        params: RenderParameters {
            coherence,
            form,
            ..RenderParameters::default()
        },
        eye: Vec3::ZERO,
    }
}

proptest! {
    #[test]
    fn full_coherence_keeps_points_at_rest(
        x in -10.0f32..10.0,
        y in -10.0f32..10.0,
        z in -10.0f32..10.0,
        id in 0u8..6,
    ) {
        let base = Vec3::new(x, y, z);
        let cat = Category::from_id(id).unwrap();
        let p = displace(base, cat, &inputs(1.0, 1.0, loud()));
        prop_assert_eq!(p.position, base);
    }
}

#[test]
fn silence_without_form_keeps_points_at_rest() {
    let base = Vec3::new(1.5, -0.4, -7.0);
    for cat in Category::ALL {
        let p = displace(base, cat, &inputs(0.0, 0.0, BandEnergy::SILENT));
        assert!((p.position - base).length() < 1e-5, "{cat:?} moved to {:?}", p.position);
    }
}

#[test]
fn loud_chaos_moves_distant_points() {
    let base = Vec3::new(2.0, 1.0, -11.0);
    assert!(proximity(base, Vec3::ZERO) < 0.1);
    let i = inputs(0.0, 0.0, loud());
    for cat in Category::ALL {
        let p = displace(base, cat, &i);
        assert!(p.position.is_finite());
        assert!((p.position - base).length() > 1e-4, "{cat:?} stayed put");
    }
}

#[test]
fn highlight_dims_other_categories() {
    let mut i = inputs(1.0, 0.0, BandEnergy::SILENT);
    i.params.highlight = Category::Ground.id() as i32;
    let hit = displace(Vec3::new(0.0, -1.0, -5.0), Category::Ground, &i);
    let miss = displace(Vec3::new(0.0, -1.0, -5.0), Category::Sky, &i);
    assert!(hit.brightness > miss.brightness);
}

// ── Software engine ─────────────────────────────────────────────────────────

#[test]
fn cpu_engine_is_idle_and_black_without_a_scene() {
    let mut engine = CpuEngine::new(1.0);
    let out = engine.render(&ctx(0.0, 0.5, loud()));
    assert_eq!(out.len(), W * H * 4);
    assert!(!has_non_black(out));
    assert!(out.chunks_exact(4).all(|px| px[3] == 255));
    assert_eq!(engine.post_state(), PostState::Idle);
}

#[test]
fn cpu_engine_draws_submitted_cloud() {
    let mut engine = CpuEngine::new(1.0);
    engine.submit_cloud(scene(), 0.0);
    let out = engine.render(&ctx(0.0, 1.0, BandEnergy::SILENT)).to_vec();
    assert_eq!(engine.post_state(), PostState::Compositing);
    assert_eq!(engine.resident_clouds(), 1);
    assert!(has_non_black(&out));
    assert!(engine.history().iter().any(|c| c.iter().any(|v| *v > 0.0)));
}

#[test]
fn cpu_engine_is_deterministic() {
    let run = || {
        let mut engine = CpuEngine::new(1.0);
        engine.submit_cloud(scene(), 0.0);
        let mut last = Vec::new();
        for i in 0..4 {
            last = engine.render(&ctx(i as f32 * 0.1, 0.2, loud())).to_vec();
        }
        last
    };
    assert_eq!(run(), run());
}

#[test]
fn cpu_engine_holds_both_clouds_during_fade() {
    let mut engine = CpuEngine::new(1.0);
    engine.submit_cloud(scene(), 0.0);
    engine.render(&ctx(0.0, 1.0, BandEnergy::SILENT));

    engine.submit_cloud(scene(), 0.5);
    engine.render(&ctx(0.5, 1.0, BandEnergy::SILENT));
    assert_eq!(engine.resident_clouds(), 2);

    // A third cloud waits; nothing visible is dropped mid-fade.
    engine.submit_cloud(scene(), 0.8);
    engine.render(&ctx(0.8, 1.0, BandEnergy::SILENT));
    assert_eq!(engine.resident_clouds(), 2);

    // Fade ends at 1.5: outgoing released, the waiting cloud starts its own fade.
    engine.render(&ctx(1.6, 1.0, BandEnergy::SILENT));
    assert_eq!(engine.resident_clouds(), 2);
    engine.render(&ctx(2.7, 1.0, BandEnergy::SILENT));
    assert_eq!(engine.resident_clouds(), 1);
}

#[test]
fn cpu_engine_output_matches_requested_size_when_downscaled() {
    let mut engine = CpuEngine::new(0.0);
    engine.submit_cloud(scene(), 0.0);
    let mut c = ctx(0.0, 0.0, loud());
    c.scale = 2;
    c.quality = Quality::Fast;
    let out = engine.render(&c);
    assert_eq!(out.len(), W * H * 4);
    assert_eq!(engine.history().len(), (W / 2) * (H / 2));
}

#[test]
fn cpu_engine_feedback_keeps_trails_under_chaos() {
    let mut engine = CpuEngine::new(0.0);
    engine.submit_cloud(scene(), 0.0);
    for i in 0..6 {
        engine.render(&ctx(i as f32 * 0.05, 0.0, loud()));
    }
    let energy: f32 = engine.history().iter().flat_map(|c| c.iter()).sum();
    assert!(energy.is_finite() && energy > 0.0);
    assert!(engine.history().iter().all(|c| c.iter().all(|v| (0.0..=1.0).contains(v))));
}

// ── GPU engine ──────────────────────────────────────────────────────────────

#[test]
#[ignore = "needs a GPU adapter"]
fn gpu_engine_renders_when_an_adapter_exists() {
    let mut engine = match GpuEngine::new(1.0, None) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("skipping: {e}");
            return;
        }
    };
    let idle = engine.render(&ctx(0.0, 1.0, BandEnergy::SILENT)).to_vec();
    assert_eq!(idle.len(), W * H * 4);
    assert!(!has_non_black(&idle));

    engine.submit_cloud(scene(), 0.0);
    let out = engine.render(&ctx(0.1, 1.0, BandEnergy::SILENT)).to_vec();
    assert!(engine.take_errors().is_empty());
    assert_eq!(engine.post_state(), PostState::Compositing);
    assert!(has_non_black(&out));
}

#[test]
#[ignore = "needs a GPU adapter"]
fn gpu_engine_keeps_pipelines_when_reload_fails() {
    let mut engine = match GpuEngine::new(1.0, None) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("skipping: {e}");
            return;
        }
    };
    engine.submit_cloud(scene(), 0.0);
    assert!(has_non_black(engine.render(&ctx(0.1, 1.0, BandEnergy::SILENT))));

    let dir = std::env::temp_dir().join(format!("pcv-shaders-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("points.wgsl"), "fn vs_main( -> {").unwrap();
    let result = engine.reload_shaders(&dir);
    let _ = std::fs::remove_dir_all(&dir);

    match result {
        Err(RenderError::ShaderCompilation { stage, .. }) => assert_eq!(stage, "points"),
        other => panic!("expected a compile error, got {other:?}"),
    }
    let errors = engine.take_errors();
    assert!(matches!(errors.as_slice(), [RenderError::ShaderCompilation { .. }]));

    let out = engine.render(&ctx(0.2, 1.0, BandEnergy::SILENT)).to_vec();
    assert!(has_non_black(&out), "previous pipelines should keep drawing");
    assert_eq!(engine.post_state(), PostState::Compositing);
}
