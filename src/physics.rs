//! Per-point displacement model.
//!
//! A pure function of (base position, category, time, audio, parameters). The
//! software engine calls it directly; `visual::wgsl::POINTS_SRC` evaluates the
//! same expressions per vertex. Keep the two in step.

use crate::analysis::BandEnergy;
use crate::cloud::Category;
use crate::config::RenderParameters;
use glam::Vec3;

/// Distance at which the camera stops adding mass.
pub const PROXIMITY_RANGE: f32 = 12.0;
const PROXIMITY_MASS: f32 = 1.5;

#[derive(Debug, Clone, Copy)]
pub struct FieldInputs {
    pub time: f32,
    pub audio: BandEnergy,
    pub params: RenderParameters,
    pub eye: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplacedPoint {
    pub position: Vec3,
    pub size: f32,
    pub brightness: f32,
}

pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// 0 far away, 1 at the camera.
pub fn proximity(base: Vec3, eye: Vec3) -> f32 {
    (1.0 - base.distance(eye) / PROXIMITY_RANGE).clamp(0.0, 1.0)
}

pub fn point_mass(category: Category, prox: f32) -> f32 {
    category.profile().mass * (1.0 + prox * PROXIMITY_MASS)
}

pub fn category_energy(category: Category, audio: &BandEnergy) -> f32 {
    let [a, b] = category.profile().bands;
    audio.bands[a].max(audio.bands[b])
}

/// Spatially coherent wave for one category. Neighbors move together.
pub fn category_wave(category: Category, p: Vec3, t: f32, e: f32) -> Vec3 {
    match category {
        Category::Subject => p.normalize_or_zero() * (t * 2.1 + p.length() * 0.8).sin() * e * 0.6,
        Category::Structure => Vec3::new(0.0, (p.x * 0.5 + t * 1.4).sin(), 0.0) * e * 0.3,
        Category::Ground => {
            Vec3::new((p.z * 0.7 + t).sin(), 0.0, (p.x * 0.7 + t).cos()) * e * 0.25
        }
        Category::Vegetation => Vec3::new(
            (p.y * 1.3 + t * 2.3).sin(),
            0.0,
            (p.y * 1.1 + t * 1.9).cos(),
        ) * e
            * 0.5,
        Category::Sky => Vec3::new(
            (p.y * 0.4 + t * 0.7).sin() * 1.2,
            (p.x * 0.3 + t * 0.5).cos() * 0.4,
            ((p.x + p.z) * 0.2 + t * 0.9).sin(),
        ) * e
            * 0.9,
        Category::Ambient => Vec3::new(
            (p.z * 0.6 + t).cos(),
            (p.x * 0.6 + t * 1.3).sin(),
            (p.y * 0.6 + t * 0.8).sin(),
        ) * e
            * 0.7,
    }
}

pub fn global_wave(p: Vec3, t: f32, audio: &BandEnergy) -> Vec3 {
    Vec3::new(
        (p.y * 0.9 + t * 1.7).sin(),
        (p.z * 0.8 + t * 1.3).sin(),
        (p.x * 0.7 + t * 1.1).sin(),
    ) * (audio.bass * 0.4 + audio.mid * 0.3)
}

/// Low-mid against presence: strongest where both are present.
pub fn interference(p: Vec3, t: f32, audio: &BandEnergy) -> Vec3 {
    let (b1, b5) = (audio.bands[1], audio.bands[5]);
    p.normalize_or_zero() * (p.x * 3.0 * b1 + t).sin() * (p.y * 3.0 * b5 - t).sin() * b1 * b5 * 0.8
}

/// Offset produced by rotating `p` about Y; angle follows high energy.
pub fn spiral(p: Vec3, t: f32, high: f32) -> Vec3 {
    let a = high * 0.6 * (t * 0.5 + p.length() * 0.2).sin();
    let (s, c) = a.sin_cos();
    Vec3::new(c * p.x + s * p.z, p.y, -s * p.x + c * p.z) - p
}

pub fn radial_pulse(p: Vec3, t: f32, beat: f32) -> Vec3 {
    p.normalize_or_zero() * beat * 0.5 * (0.5 + 0.5 * (p.length() * 1.5 - t * 6.0).sin())
}

/// Deterministic per-position value in [0,1).
pub fn position_hash(p: Vec3, salt: f32) -> f32 {
    let h = (p.dot(Vec3::new(12.9898, 78.233, 37.719)) + salt).sin() * 43_758.547;
    h - h.floor()
}

pub fn form_jitter(p: Vec3, form: f32) -> Vec3 {
    Vec3::new(
        position_hash(p, 0.0) - 0.5,
        position_hash(p, 1.7) - 0.5,
        position_hash(p, 3.1) - 0.5,
    ) * 2.0
        * form
        * 0.35
}

pub fn displace(base: Vec3, category: Category, inputs: &FieldInputs) -> DisplacedPoint {
    let audio = &inputs.audio;
    let params = &inputs.params;
    let t = inputs.time;
    let coherence = params.coherence.clamp(0.0, 1.0);

    let prox = proximity(base, inputs.eye);
    let mass = point_mass(category, prox);
    // Near points stay solid whatever the global setting.
    let protect = smoothstep(0.55, 1.0, prox) * 0.7;
    let drive = (1.0 - coherence) * (1.0 - protect);
    let e = category_energy(category, audio);

    let position = if drive > 0.0 {
        let field = category_wave(category, base, t, e)
            + global_wave(base, t, audio)
            + interference(base, t, audio)
            + spiral(base, t, audio.high)
            + radial_pulse(base, t, audio.beat)
            + form_jitter(base, params.form);
        base + field * (drive / mass)
    } else {
        base
    };

    let size = params.point_scale
        * (0.55 + 0.45 * coherence)
        * (1.0 + 0.8 * e)
        * (0.85 + 0.05 * category.profile().mass.min(3.0));
    let emphasis = match params.highlight {
        h if h < 0 => 1.0,
        h if h == category.id() as i32 => 1.5,
        _ => 0.3,
    };

    DisplacedPoint {
        position,
        size,
        brightness: emphasis * (1.0 + 0.25 * e),
    }
}
