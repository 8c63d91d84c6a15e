use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use clap::Parser;
use crossterm::event::{KeyCode, KeyModifiers};
use pointcloud_visualizer::app::{
    Engine, FrameInput, RuntimeTuning, UiState, builder_config, build_wrapped_hud, handle_key,
    hard_wrap_line, highlight_label, hud_rows_for_text, initial_request, HudInfo,
};
use pointcloud_visualizer::analysis::BandEnergy;
use pointcloud_visualizer::audio::SilentSource;
use pointcloud_visualizer::cloud::{BuilderConfig, PointCloud};
use pointcloud_visualizer::config::{Config, ProjectionMode, Quality, RenderParameters};
use pointcloud_visualizer::error::RenderError;
use pointcloud_visualizer::post::PostState;
use pointcloud_visualizer::scene::{SceneRequest, SceneWorker};
use pointcloud_visualizer::visual::{CpuEngine, RenderCtx, VisualEngine};

fn parse(args: &[&str]) -> Config {
    let mut argv = vec!["pointcloud_visualizer"];
    argv.extend_from_slice(args);
    Config::try_parse_from(argv).unwrap()
}

fn headless_engine() -> Engine {
    Engine::new(
        Box::new(CpuEngine::new(0.5)),
        SceneWorker::spawn(None),
        BuilderConfig::default(),
        RenderParameters::default(),
        7,
    )
}

fn frame(t: f32) -> FrameInput {
    FrameInput {
        t,
        dt: 1.0 / 30.0,
        w: 64,
        h: 40,
        quality: Quality::High,
        scale: 1,
    }
}

fn wait_for_scene(engine: &mut Engine) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while engine.scene_pending() && Instant::now() < deadline {
        engine.poll_scenes(0.0);
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn has_non_black(buf: &[u8]) -> bool {
    buf.chunks_exact(4).any(|px| px[0] != 0 || px[1] != 0 || px[2] != 0)
}

// ── Engine ──────────────────────────────────────────────────────────────────

#[test]
fn frames_are_black_until_a_scene_arrives() {
    let mut engine = headless_engine();
    let out = engine.tick(&SilentSource, frame(0.0));
    assert_eq!(out.len(), 64 * 40 * 4);
    assert!(!has_non_black(out));
    assert_eq!(engine.visual().post_state(), PostState::Idle);
    assert!(!engine.has_scene());
}

#[test]
fn procedural_scene_renders_headless() {
    let mut engine = headless_engine();
    engine.request_scene(SceneRequest::Procedural { width: 256, height: 160 });
    wait_for_scene(&mut engine);
    assert!(engine.has_scene(), "status: {}", engine.status());

    let out = engine.tick(&SilentSource, frame(0.1)).to_vec();
    assert!(has_non_black(&out));
    assert_eq!(engine.visual().post_state(), PostState::Compositing);
    assert!(engine.audio().is_silent());
    assert!(engine.status().contains("points"), "status: {}", engine.status());
}

#[test]
fn failed_request_keeps_the_current_scene() {
    let mut engine = headless_engine();
    engine.request_scene(SceneRequest::Procedural { width: 128, height: 80 });
    wait_for_scene(&mut engine);
    engine.tick(&SilentSource, frame(0.0));
    assert_eq!(engine.visual().resident_clouds(), 1);

    engine.request_scene(SceneRequest::Remote {
        prompt: "desert".to_string(),
        seed: 4,
    });
    wait_for_scene(&mut engine);
    assert!(engine.status().contains("failed"), "status: {}", engine.status());
    let out = engine.tick(&SilentSource, frame(0.1)).to_vec();
    assert!(engine.has_scene());
    assert_eq!(engine.visual().resident_clouds(), 1);
    assert!(has_non_black(&out));
}

#[test]
fn projection_toggle_rebuilds_the_scene() {
    let mut engine = headless_engine();
    engine.request_scene(SceneRequest::Procedural { width: 96, height: 60 });
    wait_for_scene(&mut engine);

    engine.toggle_projection();
    assert_eq!(engine.params.projection, ProjectionMode::Spherical);
    assert!(engine.scene_pending());
    wait_for_scene(&mut engine);
    assert!(!engine.scene_pending());
}

#[test]
fn reload_without_shader_dir_reports_it() {
    let mut engine = headless_engine();
    engine.reload_shaders();
    assert!(engine.status().contains("--shader-dir"));
}

/// Engine double whose context can be dropped from the test side.
#[derive(Default)]
struct LossyState {
    lose_next_frame: bool,
    resubmit: bool,
    submitted: Vec<usize>,
    resident: usize,
}

struct LossyEngine {
    state: Arc<Mutex<LossyState>>,
    frame: Vec<u8>,
}

impl VisualEngine for LossyEngine {
    fn name(&self) -> &'static str {
        "lossy"
    }

    fn resize(&mut self, w: usize, h: usize) {
        self.frame = vec![0; w * h * 4];
    }

    fn submit_cloud(&mut self, cloud: Arc<PointCloud>, _now: f32) {
        let mut s = self.state.lock().unwrap();
        s.submitted.push(cloud.len());
        s.resident = 1;
    }

    fn resident_clouds(&self) -> usize {
        self.state.lock().unwrap().resident
    }

    fn post_state(&self) -> PostState {
        if self.resident_clouds() > 0 {
            PostState::Compositing
        } else {
            PostState::ContextLost
        }
    }

    fn take_errors(&mut self) -> Vec<RenderError> {
        let mut s = self.state.lock().unwrap();
        if std::mem::take(&mut s.lose_next_frame) {
            s.resident = 0;
            s.resubmit = true;
            return vec![RenderError::DeviceLost("test".to_string())];
        }
        Vec::new()
    }

    fn needs_resubmit(&mut self) -> bool {
        std::mem::take(&mut self.state.lock().unwrap().resubmit)
    }

    fn reload_shaders(&mut self, _dir: &Path) -> Result<(), RenderError> {
        Ok(())
    }

    fn render(&mut self, ctx: &RenderCtx) -> &[u8] {
        self.resize(ctx.w, ctx.h);
        &self.frame
    }
}

#[test]
fn lost_context_gets_the_last_cloud_again() {
    let state = Arc::new(Mutex::new(LossyState::default()));
    let visual = LossyEngine {
        state: state.clone(),
        frame: Vec::new(),
    };
    let mut engine = Engine::new(
        Box::new(visual),
        SceneWorker::spawn(None),
        BuilderConfig::default(),
        RenderParameters::default(),
        7,
    );
    engine.request_scene(SceneRequest::Procedural { width: 96, height: 60 });
    wait_for_scene(&mut engine);
    engine.tick(&SilentSource, frame(0.0));
    let points = state.lock().unwrap().submitted.clone();
    assert_eq!(points.len(), 1);

    state.lock().unwrap().lose_next_frame = true;
    engine.tick(&SilentSource, frame(0.1));
    assert!(engine.status().contains("lost"), "status: {}", engine.status());
    assert_eq!(engine.visual().resident_clouds(), 0);

    // The loss is noticed during one frame and repaired on the next.
    engine.tick(&SilentSource, frame(0.2));
    let s = state.lock().unwrap();
    assert_eq!(s.submitted, vec![points[0], points[0]]);
    assert_eq!(s.resident, 1);
}

// ── Keys ────────────────────────────────────────────────────────────────────

#[test]
fn keys_adjust_parameters_within_bounds() {
    let mut engine = headless_engine();
    let mut ui = UiState {
        show_hud: true,
        show_help: false,
    };
    let none = KeyModifiers::NONE;

    for _ in 0..40 {
        assert!(!handle_key(KeyCode::Up, none, &mut engine, &mut ui));
    }
    assert_eq!(engine.params.coherence, 1.0);
    for _ in 0..40 {
        handle_key(KeyCode::Down, none, &mut engine, &mut ui);
    }
    assert_eq!(engine.params.coherence, 0.0);

    handle_key(KeyCode::Char('-'), none, &mut engine, &mut ui);
    assert!((engine.intensity() - 0.95).abs() < 1e-6);
    for _ in 0..5 {
        handle_key(KeyCode::Char('+'), none, &mut engine, &mut ui);
    }
    assert_eq!(engine.intensity(), 1.0);

    handle_key(KeyCode::Char('h'), none, &mut engine, &mut ui);
    assert_eq!(engine.params.highlight, 0);

    handle_key(KeyCode::Char('?'), none, &mut engine, &mut ui);
    assert!(ui.show_help);
    handle_key(KeyCode::Char('i'), none, &mut engine, &mut ui);
    assert!(!ui.show_hud);
}

#[test]
fn quit_keys() {
    let mut engine = headless_engine();
    let mut ui = UiState {
        show_hud: true,
        show_help: false,
    };
    assert!(handle_key(KeyCode::Char('q'), KeyModifiers::NONE, &mut engine, &mut ui));
    assert!(handle_key(KeyCode::Esc, KeyModifiers::NONE, &mut engine, &mut ui));
    assert!(handle_key(KeyCode::Char('c'), KeyModifiers::CONTROL, &mut engine, &mut ui));
    assert!(!handle_key(KeyCode::Char('c'), KeyModifiers::NONE, &mut engine, &mut ui));
}

// ── Config → requests ───────────────────────────────────────────────────────

#[test]
fn initial_request_priority() {
    assert!(matches!(
        initial_request(&parse(&[])),
        SceneRequest::Procedural { .. }
    ));
    assert!(matches!(
        initial_request(&parse(&["--server", "http://localhost:9"])),
        SceneRequest::Remote { .. }
    ));
    assert!(matches!(
        initial_request(&parse(&["--server", "http://localhost:9", "--image", "a.png"])),
        SceneRequest::Image { .. }
    ));
    assert!(matches!(
        initial_request(&parse(&["--image", "a.png", "--scene-file", "s.bin"])),
        SceneRequest::File(_)
    ));
}

#[test]
fn builder_follows_cli() {
    let cfg = parse(&["--seed", "9", "--projection", "spherical", "--target-points", "50000"]);
    let b = builder_config(&cfg);
    assert_eq!(b.seed, 9);
    assert_eq!(b.projection, ProjectionMode::Spherical);
    assert_eq!((b.target_min, b.target_max), (40_000, 60_000));

    let d = builder_config(&parse(&[]));
    assert_eq!(d.target_min, BuilderConfig::default().target_min);
}

#[test]
fn render_parameters_are_clamped_from_cli() {
    let cfg = parse(&["--coherence", "3", "--highlight", "-7", "--point-scale", "50"]);
    let p = RenderParameters::from_config(&cfg);
    assert_eq!(p.coherence, 1.0);
    assert_eq!(p.highlight, -1);
    assert_eq!(p.point_scale, 4.0);
}

// ── Runtime tuning ──────────────────────────────────────────────────────────

#[test]
fn slow_frames_halve_resolution_then_lower_quality() {
    let mut rt = RuntimeTuning::new(Quality::High, true);
    rt.update(60.0, 33.0);
    assert_eq!((rt.scale, rt.quality), (2, Quality::High));
    rt.update(60.0, 33.0);
    assert_eq!((rt.scale, rt.quality), (2, Quality::Balanced));

    for _ in 0..400 {
        rt.update(5.0, 33.0);
    }
    assert_eq!((rt.scale, rt.quality), (1, Quality::High));
}

#[test]
fn fixed_quality_ignores_frame_times() {
    let mut rt = RuntimeTuning::new(Quality::Fast, false);
    for _ in 0..50 {
        rt.update(500.0, 33.0);
    }
    assert_eq!((rt.scale, rt.quality), (1, Quality::Fast));
}

// ── HUD ─────────────────────────────────────────────────────────────────────

#[test]
fn hud_wrapping() {
    assert_eq!(hard_wrap_line("abcdef", 4), vec!["abcd", "ef"]);
    assert_eq!(hard_wrap_line("", 4), vec![String::new()]);
    assert_eq!(hud_rows_for_text(10, true, "a\nb\nc"), 3);
    assert_eq!(hud_rows_for_text(2, true, "a\nb\nc"), 1);
    assert_eq!(hud_rows_for_text(10, false, "a\nb\nc"), 0);
}

#[test]
fn hud_lines_fit_the_terminal() {
    let info = HudInfo {
        engine: "cpu",
        source: "silent",
        fps: 29.7,
        params: RenderParameters::default(),
        intensity: 0.8,
        audio: BandEnergy::SILENT,
        post: "compositing",
        clouds: 2,
        status: "procedural: 1234 points in 12 ms",
        pending: false,
        quality: Quality::Balanced,
        scale: 1,
    };
    let hud = build_wrapped_hud(40, &info);
    assert!(hud.lines().count() >= 3);
    assert!(hud.lines().all(|l| l.chars().count() <= 40));
    assert!(hud.replace('\n', "").contains("passes 1"));
}

#[test]
fn highlight_labels() {
    assert_eq!(highlight_label(-1), "all");
    assert_eq!(highlight_label(0), "subject");
    assert_eq!(highlight_label(4), "sky");
}
