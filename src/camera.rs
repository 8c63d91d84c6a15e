//! Autonomous first-person camera.
//!
//! Drifts on its own, kicks on beats, and leans away from near geometry when a
//! depth map of the current scene is available.

use crate::analysis::BandEnergy;
use crate::cloud::DepthMap;
use crate::physics::smoothstep;
use glam::{Mat4, Vec3};
use std::sync::Arc;

const BEAT_THRESHOLD: f32 = 0.5;
const BEAT_COOLDOWN: f32 = 0.3;
const TIMER_MIN: f32 = 3.0;
const TIMER_SPAN: f32 = 4.0;
const SMOOTHING_RATE: f32 = 1.5;
const PITCH_LIMIT: f32 = 0.6;
const BOUNDS: Vec3 = Vec3::new(4.0, 2.0, 6.0);
const PROBE_OFFSET: f32 = 0.08;
const STEER_GAIN: f32 = 2.0;
/// Lateral difference below which the wall counts as uniform.
const STEER_DEADBAND: f32 = 0.02;

pub const FOV_Y: f32 = std::f32::consts::FRAC_PI_3;
pub const Z_NEAR: f32 = 0.05;
pub const Z_FAR: f32 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraMatrices {
    pub view: Mat4,
    pub projection: Mat4,
    pub eye: Vec3,
}

impl CameraMatrices {
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }
}

/// Depth map plus the arcs it was projected with, so look directions map back to texels.
#[derive(Debug, Clone)]
pub struct DepthProbe {
    pub map: Arc<DepthMap>,
    pub h_arc: f32,
    pub v_arc: f32,
}

impl DepthProbe {
    pub fn new(map: Arc<DepthMap>, h_arc: f32, v_arc: f32) -> Self {
        Self {
            map,
            h_arc: h_arc.max(1e-3),
            v_arc: v_arc.max(1e-3),
        }
    }

    /// Depth seen along (yaw, pitch). Yaw wraps for panoramic arcs.
    pub fn sample(&self, yaw: f32, pitch: f32) -> f32 {
        let mut u = 0.5 + yaw / self.h_arc;
        if self.h_arc >= std::f32::consts::TAU - 1e-3 {
            u = u.rem_euclid(1.0);
        }
        let v = 0.5 - pitch / self.v_arc;
        self.map.sample(u, v)
    }
}

pub struct AutoCamera {
    position: Vec3,
    yaw: f32,
    pitch: f32,
    target_yaw: f32,
    target_pitch: f32,
    time: f32,
    last_kick: f32,
    next_timer: f32,
    steer_sign: f32,
    aspect: f32,
    rng: fastrand::Rng,
}

impl AutoCamera {
    pub fn new(seed: u64, aspect: f32) -> Self {
        let mut rng = fastrand::Rng::with_seed(seed);
        let next_timer = TIMER_MIN + rng.f32() * TIMER_SPAN;
        Self {
            position: Vec3::ZERO,
            yaw: 0.0,
            pitch: 0.0,
            target_yaw: 0.0,
            target_pitch: 0.0,
            time: 0.0,
            last_kick: f32::NEG_INFINITY,
            next_timer,
            steer_sign: 1.0,
            aspect: aspect.max(1e-3),
            rng,
        }
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect.max(1e-3);
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    pub fn target_yaw(&self) -> f32 {
        self.target_yaw
    }

    pub fn target_pitch(&self) -> f32 {
        self.target_pitch
    }

    pub fn forward(&self) -> Vec3 {
        forward(self.yaw, self.pitch)
    }

    pub fn update(
        &mut self,
        dt: f32,
        audio: &BandEnergy,
        depth: Option<&DepthProbe>,
    ) -> CameraMatrices {
        let dt = dt.clamp(0.0, 0.25);
        self.time += dt;
        let t = self.time;

        if audio.beat > BEAT_THRESHOLD && t - self.last_kick >= BEAT_COOLDOWN {
            self.last_kick = t;
            self.target_yaw += (self.rng.f32() * 2.0 - 1.0) * 0.35;
            self.target_pitch += (self.rng.f32() * 2.0 - 1.0) * 0.1;
        }

        if t >= self.next_timer {
            self.next_timer = t + TIMER_MIN + self.rng.f32() * TIMER_SPAN;
            self.target_yaw += (self.rng.f32() * 2.0 - 1.0) * 0.6;
            self.target_pitch += (self.rng.f32() * 2.0 - 1.0) * 0.25;
        }

        self.target_yaw += (t * 0.17).sin() * 0.05 * dt;
        self.target_pitch += (t * 0.11).cos() * 0.02 * dt;

        if let Some(probe) = depth {
            self.steer(probe, dt);
        }
        self.target_pitch = self.target_pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT);

        let k = (SMOOTHING_RATE * dt).min(1.0);
        self.yaw += (self.target_yaw - self.yaw) * k;
        self.pitch += (self.target_pitch - self.pitch) * k;

        let speed = 0.2 + (audio.bass + audio.mid) * 1.2;
        self.position += self.forward() * speed * dt;
        self.wrap_bounds();

        let shake_amp = audio.bass * 0.03 + audio.beat * 0.06;
        let shake = Vec3::new((t * 31.0).sin(), (t * 27.0 + 1.3).sin(), 0.0) * shake_amp;
        let eye = self.position + shake;
        CameraMatrices {
            view: Mat4::look_at_rh(eye, eye + self.forward(), Vec3::Y),
            projection: Mat4::perspective_rh(FOV_Y, self.aspect, Z_NEAR, Z_FAR),
            eye,
        }
    }

    /// Leans targets toward the more open side of whatever is ahead.
    fn steer(&mut self, probe: &DepthProbe, dt: f32) {
        let center = probe.sample(self.yaw, self.pitch);
        let near = smoothstep(0.45, 0.85, center);
        if near <= 0.0 {
            return;
        }
        let left = probe.sample(self.yaw - PROBE_OFFSET, self.pitch);
        let right = probe.sample(self.yaw + PROBE_OFFSET, self.pitch);
        let up = probe.sample(self.yaw, self.pitch + PROBE_OFFSET);
        let down = probe.sample(self.yaw, self.pitch - PROBE_OFFSET);

        let mut lateral = left - right;
        if lateral.abs() < STEER_DEADBAND {
            // Uniform wall: keep turning the way we last escaped.
            lateral = self.steer_sign * 0.5;
        } else {
            self.steer_sign = lateral.signum();
        }
        self.target_yaw += lateral * near * STEER_GAIN * dt;
        self.target_pitch += (down - up) * near * STEER_GAIN * 0.5 * dt;
    }

    fn wrap_bounds(&mut self) {
        self.position.x = self.position.x.clamp(-BOUNDS.x, BOUNDS.x);
        self.position.y = self.position.y.clamp(-BOUNDS.y, BOUNDS.y);
        let wrapped = if self.position.z < -BOUNDS.z {
            Some(BOUNDS.z)
        } else if self.position.z > BOUNDS.z {
            Some(-BOUNDS.z)
        } else {
            None
        };
        if let Some(z) = wrapped {
            self.position.z = z;
            let to_origin = -self.position;
            if to_origin.length_squared() > 1e-6 {
                let horiz = (to_origin.x * to_origin.x + to_origin.z * to_origin.z).sqrt();
                let yaw = to_origin.x.atan2(-to_origin.z);
                // Continue from the current heading rather than spinning the long way round.
                self.target_yaw = self.yaw + wrap_angle(yaw - self.yaw);
                self.target_pitch = to_origin.y.atan2(horiz).clamp(-PITCH_LIMIT, PITCH_LIMIT);
            }
        }
    }
}

pub fn forward(yaw: f32, pitch: f32) -> Vec3 {
    Vec3::new(yaw.sin() * pitch.cos(), pitch.sin(), -yaw.cos() * pitch.cos())
}

fn wrap_angle(a: f32) -> f32 {
    use std::f32::consts::{PI, TAU};
    (a + PI).rem_euclid(TAU) - PI
}
