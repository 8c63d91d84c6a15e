use crate::analysis::{BandEnergy, SpectralAnalyzer};
use crate::audio::{MagnitudeSource, open_source};
use crate::camera::{AutoCamera, DepthProbe};
use crate::cloud::{BuilderConfig, Category, PointCloud};
use crate::config::{Config, EngineMode, Quality, RenderParameters};
use crate::post::iteration_count;
use crate::render::{Frame, HalfBlockRenderer, Renderer};
use crate::scene::{GenerationClient, SceneEvent, SceneRequest, SceneWorker};
use crate::terminal::{TerminalGuard, Viewport};
use crate::visual::{CpuEngine, GpuEngine, RenderCtx, VisualEngine};
use anyhow::Context;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const PROCEDURAL_SIZE: (usize, usize) = (512, 320);
const MAX_HUD_ROWS: u16 = 4;

/// Per-frame timing and output size handed to `Engine::tick`.
#[derive(Debug, Clone, Copy)]
pub struct FrameInput {
    pub t: f32,
    pub dt: f32,
    pub w: usize,
    pub h: usize,
    pub quality: Quality,
    pub scale: usize,
}

/// Owns one of each component and drives them once per frame.
pub struct Engine {
    analyzer: SpectralAnalyzer,
    camera: AutoCamera,
    visual: Box<dyn VisualEngine>,
    scenes: SceneWorker,
    builder: BuilderConfig,
    pub params: RenderParameters,
    intensity: f32,
    depth_probe: Option<DepthProbe>,
    last_cloud: Option<Arc<PointCloud>>,
    last_request: Option<SceneRequest>,
    shader_dir: Option<PathBuf>,
    audio: BandEnergy,
    mags: Vec<u8>,
    status: String,
}

impl Engine {
    pub fn new(
        visual: Box<dyn VisualEngine>,
        scenes: SceneWorker,
        builder: BuilderConfig,
        params: RenderParameters,
        camera_seed: u64,
    ) -> Self {
        Self {
            analyzer: SpectralAnalyzer::new(),
            camera: AutoCamera::new(camera_seed, 1.0),
            visual,
            scenes,
            builder,
            params,
            intensity: 1.0,
            depth_probe: None,
            last_cloud: None,
            last_request: None,
            shader_dir: None,
            audio: BandEnergy::SILENT,
            mags: Vec::new(),
            status: "waiting for scene".to_string(),
        }
    }

    pub fn with_shader_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.shader_dir = dir;
        self
    }

    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    pub fn set_intensity(&mut self, v: f32) {
        self.intensity = v.clamp(0.0, 1.0);
    }

    pub fn audio(&self) -> BandEnergy {
        self.audio
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn set_status(&mut self, s: impl Into<String>) {
        self.status = s.into();
    }

    pub fn visual(&self) -> &dyn VisualEngine {
        &*self.visual
    }

    pub fn camera(&self) -> &AutoCamera {
        &self.camera
    }

    pub fn has_scene(&self) -> bool {
        self.last_cloud.is_some()
    }

    pub fn scene_pending(&self) -> bool {
        self.scenes.in_flight()
    }

    pub fn request_scene(&mut self, request: SceneRequest) -> u64 {
        self.status = format!("building {}", request.label());
        self.last_request = Some(request.clone());
        self.scenes.request(request, self.builder)
    }

    /// Re-issues the last request; remote prompts get a fresh seed.
    pub fn next_scene(&mut self) -> Option<u64> {
        let mut request = self.last_request.clone()?;
        if let SceneRequest::Remote { seed, .. } = &mut request {
            *seed = seed.wrapping_add(1);
        }
        Some(self.request_scene(request))
    }

    pub fn toggle_projection(&mut self) {
        self.params.projection = self.params.projection.toggled();
        self.builder.projection = self.params.projection;
        info!(projection = self.params.projection.label(), "projection changed");
        self.next_scene_same_seed();
    }

    fn next_scene_same_seed(&mut self) {
        if let Some(request) = self.last_request.clone() {
            self.request_scene(request);
        }
    }

    pub fn reload_shaders(&mut self) {
        let Some(dir) = self.shader_dir.clone() else {
            self.status = "no --shader-dir to reload from".to_string();
            return;
        };
        self.status = match self.visual.reload_shaders(&dir) {
            Ok(()) => format!("shaders reloaded from {}", dir.display()),
            Err(e) => format!("shader reload failed: {e}"),
        };
    }

    /// Accepts finished scenes. Returns true when a new cloud was handed to the renderer.
    pub fn poll_scenes(&mut self, now: f32) -> bool {
        let mut accepted = false;
        while let Some(event) = self.scenes.poll() {
            match event {
                SceneEvent::Ready(ready) => {
                    self.status = format!(
                        "{}: {} points in {} ms",
                        ready.label,
                        ready.cloud.len(),
                        ready.elapsed.as_millis()
                    );
                    self.depth_probe = ready
                        .depth
                        .map(|(map, h_arc, v_arc)| DepthProbe::new(map, h_arc, v_arc));
                    self.visual.submit_cloud(ready.cloud.clone(), now);
                    self.last_cloud = Some(ready.cloud);
                    accepted = true;
                }
                SceneEvent::Failed { label, error, .. } => {
                    warn!(%label, %error, "keeping current scene");
                    self.status = format!("{label} failed: {error}");
                }
            }
        }
        accepted
    }

    pub fn tick(&mut self, source: &dyn MagnitudeSource, frame: FrameInput) -> &[u8] {
        self.audio = self
            .analyzer
            .tick(source, &mut self.mags)
            .scaled(self.intensity);

        self.poll_scenes(frame.t);
        if self.visual.needs_resubmit() {
            if let Some(cloud) = &self.last_cloud {
                info!(points = cloud.len(), "re-uploading cloud after context loss");
                self.visual.submit_cloud(cloud.clone(), frame.t);
            }
        }
        for e in self.visual.take_errors() {
            warn!(error = %e, "render error");
            self.status = e.to_string();
        }

        self.camera
            .set_aspect(frame.w.max(1) as f32 / frame.h.max(1) as f32);
        let camera = self
            .camera
            .update(frame.dt, &self.audio, self.depth_probe.as_ref());

        let ctx = RenderCtx {
            t: frame.t,
            dt: frame.dt,
            w: frame.w,
            h: frame.h,
            audio: self.audio,
            params: self.params,
            camera,
            quality: frame.quality,
            scale: frame.scale,
        };
        self.visual.render(&ctx)
    }
}

pub fn init_logging(log_file: Option<&Path>) -> anyhow::Result<()> {
    let Some(path) = log_file else {
        return Ok(());
    };
    let file = std::fs::File::create(path)
        .with_context(|| format!("create log file {}", path.display()))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|e| anyhow::anyhow!("init logging: {e}"))
}

pub fn builder_config(cfg: &Config) -> BuilderConfig {
    let base = BuilderConfig {
        seed: cfg.seed,
        projection: cfg.projection,
        ..BuilderConfig::default()
    };
    match cfg.target_points {
        Some(n) => base.with_target(n),
        None => base,
    }
}

/// Scene file, then image, then server, then the built-in procedural scene.
pub fn initial_request(cfg: &Config) -> SceneRequest {
    if let Some(path) = &cfg.scene_file {
        return SceneRequest::File(path.clone());
    }
    if let Some(image) = &cfg.image {
        return SceneRequest::Image {
            image: image.clone(),
            depth: cfg.depth.clone(),
            segmentation: cfg.segmentation.clone(),
        };
    }
    if cfg.server.is_some() {
        return SceneRequest::Remote {
            prompt: cfg.prompt.clone(),
            seed: cfg.seed,
        };
    }
    SceneRequest::Procedural {
        width: PROCEDURAL_SIZE.0,
        height: PROCEDURAL_SIZE.1,
    }
}

/// Falls back to the CPU engine when no usable GPU exists.
pub fn create_visual(cfg: &Config) -> (Box<dyn VisualEngine>, Option<String>) {
    match cfg.engine {
        EngineMode::Cpu => (Box::new(CpuEngine::new(cfg.crossfade)), None),
        EngineMode::Gpu => match GpuEngine::new(cfg.crossfade, cfg.shader_dir.as_deref()) {
            Ok(e) => (Box::new(e), None),
            Err(err) => {
                warn!(%err, "gpu engine unavailable, using cpu");
                (
                    Box::new(CpuEngine::new(cfg.crossfade)),
                    Some(format!("gpu unavailable ({err}); using cpu")),
                )
            }
        },
    }
}

pub fn run(cfg: Config) -> anyhow::Result<()> {
    init_logging(cfg.log_file.as_deref())?;
    info!(?cfg, "starting");

    let (source, audio_warning) =
        open_source(cfg.source, cfg.device.as_deref(), cfg.audio_file.as_deref());
    let (visual, visual_warning) = create_visual(&cfg);
    let client = cfg
        .server
        .as_deref()
        .map(|url| GenerationClient::new(url, Duration::from_secs(cfg.server_timeout_secs)));

    let mut engine = Engine::new(
        visual,
        SceneWorker::spawn(client),
        builder_config(&cfg),
        RenderParameters::from_config(&cfg),
        cfg.seed as u64,
    )
    .with_shader_dir(cfg.shader_dir.clone());
    engine.set_intensity(cfg.intensity);
    engine.request_scene(initial_request(&cfg));
    if let Some(w) = audio_warning.or(visual_warning) {
        engine.set_status(w);
    }

    let _term = TerminalGuard::new()?;
    let mut out = BufWriter::new(TerminalGuard::stdout());
    let mut renderer = HalfBlockRenderer::new();

    let mut last_size = crossterm::terminal::size().context("get terminal size")?;
    if last_size.1 < 2 || last_size.0 < 4 {
        return Err(anyhow::anyhow!(
            "terminal too small (need at least 4x2, got {}x{})",
            last_size.0,
            last_size.1
        ));
    }

    let mut ui = UiState {
        show_hud: true,
        show_help: false,
    };
    let mut hud_rows = hud_rows_for_size(last_size, ui.show_hud);
    let mut runtime = RuntimeTuning::new(cfg.quality, cfg.adaptive_quality);
    let mut fps = FpsCounter::new();
    let start = Instant::now();
    let mut last_frame = start;
    let source_label = source.label().to_string();

    loop {
        let now = Instant::now();

        while event::poll(Duration::from_millis(0))? {
            match event::read()? {
                Event::Key(k) if k.kind != KeyEventKind::Release => {
                    if handle_key(k.code, k.modifiers, &mut engine, &mut ui) {
                        return Ok(());
                    }
                }
                Event::Resize(c, r) => last_size = (c, r),
                _ => {}
            }
        }
        // Resize events can be missed by some terminals.
        let sz = crossterm::terminal::size()?;
        if sz != last_size {
            last_size = sz;
        }

        let dt = now.duration_since(last_frame).as_secs_f32().max(1e-6);
        last_frame = now;
        let (term_cols, term_rows) = last_size;

        let hud = if ui.show_hud {
            build_wrapped_hud(
                term_cols as usize,
                &HudInfo {
                    engine: engine.visual().name(),
                    source: &source_label,
                    fps: fps.fps(),
                    params: engine.params,
                    intensity: engine.intensity(),
                    audio: engine.audio(),
                    post: engine.visual().post_state().label(),
                    clouds: engine.visual().resident_clouds(),
                    status: engine.status(),
                    pending: engine.scene_pending(),
                    quality: runtime.quality,
                    scale: runtime.scale,
                },
            )
        } else {
            String::new()
        };
        let target_rows = hud_rows_for_text(term_rows, ui.show_hud, &hud);
        if target_rows != hud_rows {
            hud_rows = target_rows;
        }
        let viewport = Viewport::new(term_cols, term_rows, hud_rows);

        let frame_input = FrameInput {
            t: now.duration_since(start).as_secs_f32(),
            dt,
            w: viewport.pixel_width(),
            h: viewport.pixel_height(),
            quality: runtime.quality,
            scale: runtime.scale,
        };
        let audio = engine.audio();
        let pixels = engine.tick(&*source, frame_input);

        let frame = Frame {
            term_cols,
            term_rows,
            visual_rows: viewport.visual_rows,
            pixel_width: viewport.pixel_width(),
            pixel_height: viewport.pixel_height(),
            pixels_rgba: pixels,
            hud: &hud,
            hud_rows: viewport.hud_rows,
            meters: ui.show_hud.then_some(&audio),
            overlay: ui.show_help.then(help_popup_text),
            sync_updates: cfg.sync_updates,
        };
        renderer.render(&frame, &mut out)?;

        let total_ms = now.elapsed().as_secs_f32() * 1000.0;
        fps.tick();
        runtime.update(total_ms, 1000.0 / cfg.fps.max(1) as f32);

        let target = Duration::from_secs_f32(1.0 / cfg.fps.max(1) as f32);
        let elapsed = now.elapsed();
        if elapsed < target {
            std::thread::sleep(target - elapsed);
        }
    }
}

pub struct UiState {
    pub show_hud: bool,
    pub show_help: bool,
}

/// Applies one key press. Returns true to quit.
pub fn handle_key(
    code: KeyCode,
    mods: KeyModifiers,
    engine: &mut Engine,
    ui: &mut UiState,
) -> bool {
    if mods.contains(KeyModifiers::CONTROL) && matches!(code, KeyCode::Char('c')) {
        return true;
    }
    let p = &mut engine.params;
    match code {
        KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('Q') => return true,
        KeyCode::Up => p.coherence = (p.coherence + 0.05).min(1.0),
        KeyCode::Down => p.coherence = (p.coherence - 0.05).max(0.0),
        KeyCode::Right => p.form = (p.form + 0.05).min(1.0),
        KeyCode::Left => p.form = (p.form - 0.05).max(0.0),
        KeyCode::Char(']') => p.point_scale = (p.point_scale * 1.1).min(4.0),
        KeyCode::Char('[') => p.point_scale = (p.point_scale / 1.1).max(0.1),
        KeyCode::Char('h') | KeyCode::Char('H') => p.cycle_highlight(),
        KeyCode::Char('+') | KeyCode::Char('=') => engine.set_intensity(engine.intensity() + 0.05),
        KeyCode::Char('-') | KeyCode::Char('_') => engine.set_intensity(engine.intensity() - 0.05),
        KeyCode::Char('p') | KeyCode::Char('P') => engine.toggle_projection(),
        KeyCode::Char('n') | KeyCode::Char('N') => {
            engine.next_scene();
        }
        KeyCode::Char('r') | KeyCode::Char('R') => engine.reload_shaders(),
        KeyCode::Char('i') | KeyCode::Char('I') => ui.show_hud = !ui.show_hud,
        KeyCode::Char('?') | KeyCode::Char('/') | KeyCode::F(1) | KeyCode::Tab => {
            ui.show_help = !ui.show_help
        }
        _ => {}
    }
    false
}

pub struct HudInfo<'a> {
    pub engine: &'a str,
    pub source: &'a str,
    pub fps: f32,
    pub params: RenderParameters,
    pub intensity: f32,
    pub audio: BandEnergy,
    pub post: &'a str,
    pub clouds: usize,
    pub status: &'a str,
    pub pending: bool,
    pub quality: Quality,
    pub scale: usize,
}

pub fn highlight_label(highlight: i32) -> &'static str {
    u8::try_from(highlight)
        .ok()
        .and_then(Category::from_id)
        .map(Category::label)
        .unwrap_or("all")
}

pub fn build_wrapped_hud(cols: usize, info: &HudInfo<'_>) -> String {
    let p = &info.params;
    let lines = vec![
        format!(
            "beat {:>4.2} | coh {:>4.2} form {:>4.2} int {:>4.2} size {:>4.2} | passes {} | post {} | FPS {:>4.1}",
            info.audio.beat,
            p.coherence,
            p.form,
            info.intensity,
            p.point_scale,
            iteration_count(p.coherence),
            info.post,
            info.fps,
        ),
        format!(
            "Scene: {}{} | clouds {} | highlight {} | {} | Engine {} {:?} x{} | Audio {}",
            info.status,
            if info.pending { " (building)" } else { "" },
            info.clouds,
            highlight_label(p.highlight),
            p.projection.label(),
            info.engine,
            info.quality,
            info.scale,
            info.source,
        ),
        "Keys: up/down coherence | left/right form | +/- intensity | [/] size | h highlight | p projection | n new scene | r reload shaders | i HUD | ? help | q quit".to_string(),
    ];
    wrap_hud_lines(cols, &lines).join("\n")
}

pub fn hud_rows_for_size(size: (u16, u16), show_hud: bool) -> u16 {
    if !show_hud || size.1 <= 1 {
        return 0;
    }
    (size.1 - 1).min(MAX_HUD_ROWS)
}

pub fn hud_rows_for_text(term_rows: u16, show_hud: bool, hud: &str) -> u16 {
    if !show_hud {
        return 0;
    }
    (hud.lines().count() as u16).min(term_rows.saturating_sub(1))
}

pub fn wrap_hud_lines(cols: usize, lines: &[String]) -> Vec<String> {
    let width = cols.max(1);
    lines.iter().flat_map(|l| hard_wrap_line(l, width)).collect()
}

pub fn hard_wrap_line(line: &str, width: usize) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars
        .chunks(width.max(1))
        .map(|c| c.iter().collect())
        .collect()
}

fn help_popup_text() -> &'static str {
    "Point Cloud Visualizer\n\
up/down  coherence (order vs chaos)\n\
left/right  form jitter\n\
+ / -  audio intensity\n\
[ / ]  point size\n\
h  cycle highlighted category (all, subject .. ambient)\n\
p  toggle planar/spherical projection (rebuilds the scene)\n\
n  new scene (new seed for remote prompts)\n\
r  reload shaders from --shader-dir\n\
i  show/hide HUD\n\
? or / or F1 or tab  toggle this help\n\
q or esc  quit"
}

struct FpsCounter {
    last: Instant,
    frames: u32,
    fps: f32,
}

impl FpsCounter {
    fn new() -> Self {
        Self {
            last: Instant::now(),
            frames: 0,
            fps: 0.0,
        }
    }

    fn tick(&mut self) {
        self.frames += 1;
        let dt = self.last.elapsed().as_secs_f32();
        if dt >= 0.5 {
            self.fps = self.frames as f32 / dt;
            self.frames = 0;
            self.last = Instant::now();
        }
    }

    fn fps(&self) -> f32 {
        self.fps
    }
}

/// Frame-time driven quality: halve resolution first, then lower quality; recover in reverse.
#[derive(Debug, Clone)]
pub struct RuntimeTuning {
    base_quality: Quality,
    pub quality: Quality,
    pub scale: usize,
    adaptive: bool,
    ema_ms: f32,
}

impl RuntimeTuning {
    pub fn new(base_quality: Quality, adaptive: bool) -> Self {
        Self {
            base_quality,
            quality: base_quality,
            scale: 1,
            adaptive,
            ema_ms: 0.0,
        }
    }

    pub fn update(&mut self, frame_ms: f32, target_ms: f32) {
        if !self.adaptive {
            return;
        }
        self.ema_ms = if self.ema_ms == 0.0 {
            frame_ms
        } else {
            self.ema_ms * 0.95 + frame_ms * 0.05
        };

        if self.ema_ms > target_ms * 1.22 {
            if self.scale == 1 {
                self.scale = 2;
            } else {
                self.quality = self.quality.lower();
            }
            return;
        }
        if self.ema_ms < target_ms * 0.72 {
            if self.quality.rank() < self.base_quality.rank() {
                self.quality = self.quality.higher();
            } else if self.scale > 1 {
                self.scale = 1;
            }
        }
    }
}
