use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "pointcloud-visualizer",
    version,
    about = "Audio-reactive 3D point cloud with feedback post-processing, in the terminal"
)]
pub struct Config {
    #[arg(long, value_enum, default_value_t = AudioSource::Mic)]
    pub source: AudioSource,

    /// WAV file played (and analyzed) with --source file.
    #[arg(long)]
    pub audio_file: Option<PathBuf>,

    #[arg(long)]
    pub device: Option<String>,

    #[arg(long, default_value_t = false)]
    pub list_devices: bool,

    #[arg(long, value_enum, default_value_t = EngineMode::Gpu)]
    pub engine: EngineMode,

    #[arg(long, default_value_t = 30)]
    pub fps: u32,

    #[arg(long, value_enum, default_value_t = Quality::Balanced)]
    pub quality: Quality,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub adaptive_quality: bool,

    /// Source image for a locally built scene.
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// Grayscale depth map (white = near) matching --image.
    #[arg(long)]
    pub depth: Option<PathBuf>,

    /// Grayscale segmentation map whose values are class ids.
    #[arg(long)]
    pub segmentation: Option<PathBuf>,

    /// Pre-built scene in the binary wire format.
    #[arg(long)]
    pub scene_file: Option<PathBuf>,

    /// Scene-generation server base URL.
    #[arg(long)]
    pub server: Option<String>,

    #[arg(long, default_value = "a quiet forest at dusk")]
    pub prompt: String,

    #[arg(long, default_value_t = 30)]
    pub server_timeout_secs: u64,

    #[arg(long, default_value_t = 0.7)]
    pub coherence: f32,

    #[arg(long, default_value_t = 0.3)]
    pub form: f32,

    #[arg(long, default_value_t = 1.0)]
    pub intensity: f32,

    #[arg(long, default_value_t = 1.0)]
    pub point_scale: f32,

    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub highlight: i32,

    #[arg(long, value_enum, default_value_t = ProjectionMode::Planar)]
    pub projection: ProjectionMode,

    /// Overrides the builder's target point band (midpoint).
    #[arg(long)]
    pub target_points: Option<usize>,

    #[arg(long, default_value_t = 0x5EED_1234)]
    pub seed: u32,

    /// Cloud crossfade duration in seconds.
    #[arg(long, default_value_t = 1.5)]
    pub crossfade: f32,

    /// Directory holding points.wgsl / composite.wgsl / sacred.wgsl overrides (reload with `r`).
    #[arg(long)]
    pub shader_dir: Option<PathBuf>,

    #[arg(long)]
    pub log_file: Option<PathBuf>,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub sync_updates: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AudioSource {
    Mic,
    File,
    #[value(alias = "silent", alias = "off")]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EngineMode {
    #[value(alias = "software")]
    Cpu,
    #[value(alias = "wgpu")]
    Gpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Quality {
    Ultra,
    High,
    Balanced,
    Fast,
}

impl Quality {
    pub fn lower(self) -> Self {
        match self {
            Self::Ultra => Self::High,
            Self::High => Self::Balanced,
            Self::Balanced => Self::Fast,
            Self::Fast => Self::Fast,
        }
    }

    pub fn higher(self) -> Self {
        match self {
            Self::Fast => Self::Balanced,
            Self::Balanced => Self::High,
            Self::High => Self::Ultra,
            Self::Ultra => Self::Ultra,
        }
    }

    pub fn rank(self) -> u8 {
        match self {
            Self::Fast => 0,
            Self::Balanced => 1,
            Self::High => 2,
            Self::Ultra => 3,
        }
    }

    /// Every n-th point is splatted by the software engine.
    pub fn point_stride(self) -> usize {
        match self {
            Self::Ultra => 1,
            Self::High => 2,
            Self::Balanced => 4,
            Self::Fast => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum ProjectionMode {
    #[default]
    Planar,
    #[value(alias = "panorama", alias = "panoramic")]
    Spherical,
}

impl ProjectionMode {
    pub fn toggled(self) -> Self {
        match self {
            Self::Planar => Self::Spherical,
            Self::Spherical => Self::Planar,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Planar => "planar",
            Self::Spherical => "spherical",
        }
    }
}

/// Per-frame controls handed to the renderer and post-processor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderParameters {
    pub coherence: f32,
    pub form: f32,
    pub point_scale: f32,
    pub highlight: i32,
    pub projection: ProjectionMode,
}

impl Default for RenderParameters {
    fn default() -> Self {
        Self {
            coherence: 1.0,
            form: 0.0,
            point_scale: 1.0,
            highlight: -1,
            projection: ProjectionMode::Planar,
        }
    }
}

impl RenderParameters {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            coherence: cfg.coherence.clamp(0.0, 1.0),
            form: cfg.form.clamp(0.0, 1.0),
            point_scale: cfg.point_scale.clamp(0.1, 4.0),
            highlight: cfg.highlight.clamp(-1, 5),
            projection: cfg.projection,
        }
    }

    pub fn cycle_highlight(&mut self) {
        self.highlight = if self.highlight >= 5 { -1 } else { self.highlight + 1 };
    }
}
