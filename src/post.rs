//! Feedback post-processing: per-frame parameters, pixel-space helpers shared
//! by the software chain, and the compositor state machine.
//!
//! `visual::wgsl::COMPOSITE_SRC` and `SACRED_SRC` evaluate the same math on the GPU.

use crate::analysis::BandEnergy;
use crate::physics::smoothstep;
use std::f32::consts::TAU;

pub const MAX_ITERATIONS: u32 = 3;
pub const KALEIDO_SEGMENTS: f32 = 6.0;
/// Same, zoom-in, zoom-out, spiral.
pub const FEEDBACK_WEIGHTS: [f32; 4] = [0.4, 0.25, 0.2, 0.15];
pub const FEEDBACK_GAIN: f32 = 0.85;
pub const BLOOM_RADIUS: i32 = 3;
pub const SACRED_GATE: f32 = 0.55;

pub fn iteration_count(coherence: f32) -> u32 {
    let chaos = 1.0 - coherence.clamp(0.0, 1.0);
    ((1.0 + chaos * 2.0).round() as u32).clamp(1, MAX_ITERATIONS)
}

/// Extra attenuation of pass `i`'s feedback contribution.
pub fn pass_fade(iteration: u32) -> f32 {
    1.0 / (1.0 + iteration as f32 * 0.3)
}

pub fn sacred_activation(coherence: f32) -> f32 {
    ((0.5 - coherence) / 0.5).clamp(0.0, 1.0)
}

/// Whether the overlay pass is issued at all.
pub fn sacred_enabled(coherence: f32) -> bool {
    coherence <= SACRED_GATE
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostParams {
    pub time: f32,
    pub chaos: f32,
    pub iterations: u32,
    pub kaleido_amount: f32,
    pub kaleido_rotation: f32,
    pub feedback_amount: f32,
    pub zoom_in: f32,
    pub zoom_out: f32,
    pub spiral_angle: f32,
    pub chroma_offset: f32,
    pub glitch_amount: f32,
    pub glitch_seed: u32,
    pub bloom_threshold: f32,
    pub bloom_strength: f32,
    pub hue_shift: f32,
    pub sacred_activation: f32,
    pub tunnel_amount: f32,
    pub draw_sacred: bool,
    pub beat: f32,
}

impl PostParams {
    pub fn compute(coherence: f32, audio: &BandEnergy, time: f32) -> Self {
        let c = coherence.clamp(0.0, 1.0);
        let chaos = 1.0 - c;
        Self {
            time,
            chaos,
            iterations: iteration_count(c),
            kaleido_amount: ((0.6 - c) / 0.6).clamp(0.0, 1.0).powf(1.5),
            kaleido_rotation: time * (0.05 + 0.3 * audio.high),
            feedback_amount: (chaos * (0.55 + 0.3 * audio.bass)).min(0.92),
            zoom_in: 1.0 + chaos * (0.01 + 0.03 * audio.bass + 0.04 * audio.beat),
            zoom_out: 1.0 - chaos * (0.01 + 0.02 * audio.mid),
            spiral_angle: chaos * (0.01 + 0.04 * audio.mid + 0.05 * audio.beat),
            chroma_offset: audio.beat * (0.003 + 0.012 * chaos),
            glitch_amount: audio.beat * chaos,
            glitch_seed: (time.max(0.0) * 12.0).floor() as u32,
            bloom_threshold: 0.65,
            bloom_strength: 0.2 + 0.6 * chaos + 0.4 * audio.bass,
            hue_shift: chaos * 0.5 * (time * 0.2).sin(),
            sacred_activation: sacred_activation(c),
            tunnel_amount: ((0.2 - c) / 0.2).clamp(0.0, 1.0),
            draw_sacred: sacred_enabled(c),
            beat: audio.beat,
        }
    }
}

/// Compositor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostState {
    /// No valid scene texture yet.
    #[default]
    Idle,
    Compositing,
    /// GPU objects are gone; rebuilt on the next valid frame.
    ContextLost,
}

impl PostState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Compositing => "compositing",
            Self::ContextLost => "context-lost",
        }
    }

    /// Transition for a frame that did (or did not) have a scene to composite.
    pub fn on_frame(self, has_scene: bool, resources_ready: bool) -> Self {
        match (self, resources_ready, has_scene) {
            (_, false, _) => Self::ContextLost,
            (_, true, true) => Self::Compositing,
            (_, true, false) => Self::Idle,
        }
    }
}

/// Two named targets whose roles swap at frame end. Never read and written in one pass.
#[derive(Debug)]
pub struct PingPong<T> {
    current: T,
    history: T,
}

impl<T> PingPong<T> {
    pub fn new(current: T, history: T) -> Self {
        Self { current, history }
    }

    pub fn current(&self) -> &T {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut T {
        &mut self.current
    }

    pub fn history(&self) -> &T {
        &self.history
    }

    /// Both targets: (current for writing, history for reading).
    pub fn split(&mut self) -> (&mut T, &T) {
        (&mut self.current, &self.history)
    }

    /// This frame's output becomes next frame's history.
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.current, &mut self.history);
    }
}

pub fn hash_u32(x: u32, y: u32, seed: u32) -> u32 {
    let mut n = x.wrapping_mul(374_761_393)
        ^ y.wrapping_mul(668_265_263)
        ^ seed.wrapping_mul(0x9E37_79B9);
    n ^= n >> 13;
    n = n.wrapping_mul(1_274_126_177);
    n ^ (n >> 16)
}

pub fn hash_unit(x: u32, y: u32, seed: u32) -> f32 {
    (hash_u32(x, y, seed) & 0x00FF_FFFF) as f32 / 16_777_216.0
}

/// Radial fold into `KALEIDO_SEGMENTS` mirrored wedges.
pub fn kaleido_uv(uv: [f32; 2], rotation: f32) -> [f32; 2] {
    let (x, y) = (uv[0] - 0.5, uv[1] - 0.5);
    let r = (x * x + y * y).sqrt();
    let seg = TAU / KALEIDO_SEGMENTS;
    let mut a = y.atan2(x) + rotation;
    a = a.rem_euclid(seg);
    if a > seg * 0.5 {
        a = seg - a;
    }
    [0.5 + r * a.cos(), 0.5 + r * a.sin()]
}

pub fn zoom_uv(uv: [f32; 2], zoom: f32) -> [f32; 2] {
    let z = zoom.max(1e-3);
    [0.5 + (uv[0] - 0.5) / z, 0.5 + (uv[1] - 0.5) / z]
}

pub fn rotate_uv(uv: [f32; 2], angle: f32) -> [f32; 2] {
    let (s, c) = angle.sin_cos();
    let (x, y) = (uv[0] - 0.5, uv[1] - 0.5);
    [0.5 + c * x - s * y, 0.5 + s * x + c * y]
}

pub fn luma(c: [f32; 3]) -> f32 {
    0.299 * c[0] + 0.587 * c[1] + 0.114 * c[2]
}

/// Rotation about the grey axis by `angle` radians.
pub fn hue_rotate(c: [f32; 3], angle: f32) -> [f32; 3] {
    if angle == 0.0 {
        return c;
    }
    let (s, cs) = angle.sin_cos();
    let k = 1.0 / 3.0f32.sqrt();
    let dot = (c[0] + c[1] + c[2]) * k;
    let axis = [k, k, k];
    let cross = [
        axis[1] * c[2] - axis[2] * c[1],
        axis[2] * c[0] - axis[0] * c[2],
        axis[0] * c[1] - axis[1] * c[0],
    ];
    std::array::from_fn(|i| c[i] * cs + cross[i] * s + axis[i] * dot * (1.0 - cs))
}

/// Normalized 1D Gaussian taps for the 7x7 bloom kernel.
pub fn bloom_weights() -> [f32; (2 * BLOOM_RADIUS + 1) as usize] {
    let sigma = 1.6f32;
    let mut w = [0.0f32; (2 * BLOOM_RADIUS + 1) as usize];
    let mut sum = 0.0;
    for (i, tap) in w.iter_mut().enumerate() {
        let x = i as f32 - BLOOM_RADIUS as f32;
        *tap = (-(x * x) / (2.0 * sigma * sigma)).exp();
        sum += *tap;
    }
    for tap in &mut w {
        *tap /= sum;
    }
    w
}

fn line(d: f32, width: f32) -> f32 {
    1.0 - smoothstep(0.0, width, d.abs())
}

fn hex_edge(p: [f32; 2]) -> f32 {
    // Distance to the nearest edge of a unit-ish hexagonal cell.
    let (sx, sy) = (1.0f32, 3.0f32.sqrt());
    let a = [p[0].rem_euclid(sx) - sx * 0.5, p[1].rem_euclid(sy) - sy * 0.5];
    let b = [
        (p[0] - sx * 0.5).rem_euclid(sx) - sx * 0.5,
        (p[1] - sy * 0.5).rem_euclid(sy) - sy * 0.5,
    ];
    let g = if a[0] * a[0] + a[1] * a[1] < b[0] * b[0] + b[1] * b[1] { a } else { b };
    let (gx, gy) = (g[0].abs(), g[1].abs());
    let d = (gx * 0.5 + gy * 3.0f32.sqrt() * 0.5).max(gx);
    0.5 - d
}

/// Additive overlay colour at `uv`. Zero unless coherence is low.
pub fn sacred_color(uv: [f32; 2], aspect: f32, p: &PostParams) -> [f32; 3] {
    if !p.draw_sacred || p.sacred_activation <= 0.0 {
        return [0.0; 3];
    }
    let t = p.time;
    let x = (uv[0] - 0.5) * aspect * 2.0;
    let y = (uv[1] - 0.5) * 2.0;
    let r = (x * x + y * y).sqrt();
    let a = y.atan2(x);

    let rings = line((r * 5.0 - t * 0.25).fract() - 0.5, 0.06) * 0.35;

    let radius = 0.35f32;
    let mut flower = line(r - radius, 0.012);
    for k in 0..6 {
        let ang = k as f32 * TAU / 6.0 + t * 0.05;
        let (cx, cy) = (radius * ang.cos(), radius * ang.sin());
        let d = ((x - cx).powi(2) + (y - cy).powi(2)).sqrt() - radius;
        flower = flower.max(line(d, 0.012));
    }

    let hex = line(hex_edge([x * 4.0, y * 4.0]), 0.04) * 0.25;

    let tunnel = if p.tunnel_amount > 0.0 {
        let z = 0.3 / r.max(0.05) + t * 0.8;
        line(hex_edge([a * 6.0 / TAU * 3.0, z]), 0.05)
            * smoothstep(0.05, 0.6, r)
            * p.tunnel_amount
            * 0.7
    } else {
        0.0
    };

    let intensity =
        (rings + flower * 0.6 + hex + tunnel) * p.sacred_activation * (0.6 + 0.4 * p.beat);
    let phase = t * 0.1 + r * 0.5;
    [
        intensity * (0.5 + 0.5 * (TAU * phase).cos()),
        intensity * (0.5 + 0.5 * (TAU * (phase + 0.33)).cos()),
        intensity * (0.5 + 0.5 * (TAU * (phase + 0.67)).cos()),
    ]
}
