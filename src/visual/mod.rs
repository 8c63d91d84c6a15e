mod cpu;
mod gpu;
pub mod wgsl;

use crate::analysis::BandEnergy;
use crate::camera::CameraMatrices;
use crate::cloud::PointCloud;
use crate::config::{Quality, RenderParameters};
use crate::error::RenderError;
use crate::post::PostState;
use std::path::Path;
use std::sync::Arc;

pub use cpu::CpuEngine;
pub use gpu::GpuEngine;

pub const DEFAULT_CROSSFADE_SECS: f32 = 1.5;

#[derive(Debug, Clone, Copy)]
pub struct RenderCtx {
    pub t: f32,
    pub dt: f32,
    pub w: usize,
    pub h: usize,
    pub audio: BandEnergy,
    pub params: RenderParameters,
    pub camera: CameraMatrices,
    pub quality: Quality,
    pub scale: usize,
}

/// Something that turns clouds + per-frame inputs into an RGBA8 frame.
pub trait VisualEngine {
    fn name(&self) -> &'static str;
    fn resize(&mut self, w: usize, h: usize);
    /// Starts a crossfade from whatever is showing to `cloud`.
    fn submit_cloud(&mut self, cloud: Arc<PointCloud>, now: f32);
    /// Clouds currently resident (0, 1 or 2 while fading).
    fn resident_clouds(&self) -> usize;
    fn post_state(&self) -> PostState;
    /// Errors raised since the last call (compile failures, context loss).
    fn take_errors(&mut self) -> Vec<RenderError>;
    /// True once after a context loss dropped the resident clouds.
    fn needs_resubmit(&mut self) -> bool {
        false
    }
    fn reload_shaders(&mut self, _dir: &Path) -> Result<(), RenderError> {
        Ok(())
    }
    fn render(&mut self, ctx: &RenderCtx) -> &[u8];
}

/// Linear crossfade between the outgoing and incoming cloud.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crossfade {
    pub start: f32,
    pub duration: f32,
}

impl Crossfade {
    pub fn new(start: f32, duration: f32) -> Self {
        Self {
            start,
            duration: duration.max(0.0),
        }
    }

    pub fn incoming(&self, now: f32) -> f32 {
        if self.duration <= 0.0 {
            return 1.0;
        }
        ((now - self.start) / self.duration).clamp(0.0, 1.0)
    }

    pub fn outgoing(&self, now: f32) -> f32 {
        1.0 - self.incoming(now)
    }

    pub fn is_complete(&self, now: f32) -> bool {
        self.incoming(now) >= 1.0
    }
}

/// Current + previous cloud. The previous one is released only after its alpha hits 0.
#[derive(Debug)]
pub struct CloudSlots<C> {
    current: Option<C>,
    previous: Option<C>,
    fade: Option<Crossfade>,
    duration: f32,
}

impl<C> CloudSlots<C> {
    pub fn new(duration: f32) -> Self {
        Self {
            current: None,
            previous: None,
            fade: None,
            duration,
        }
    }

    pub fn set_duration(&mut self, duration: f32) {
        self.duration = duration.max(0.0);
    }

    /// New cloud arrives. Pushing mid-fade drops the outgoing cloud early; see `is_fading`.
    pub fn push(&mut self, cloud: C, now: f32) -> Option<C> {
        let dropped = self.previous.take();
        self.previous = self.current.take();
        self.current = Some(cloud);
        self.fade = self.previous.is_some().then(|| Crossfade::new(now, self.duration));
        dropped
    }

    /// Call at frame start, before drawing. Returns the cloud released this frame.
    pub fn begin_frame(&mut self, now: f32) -> Option<C> {
        match self.fade {
            Some(f) if f.is_complete(now) => {
                self.fade = None;
                self.previous.take()
            }
            _ => None,
        }
    }

    pub fn fade(&self) -> Option<Crossfade> {
        self.fade
    }

    /// Engines hold new clouds back while this is true so nothing visible is dropped.
    pub fn is_fading(&self) -> bool {
        self.fade.is_some()
    }

    pub fn current(&self) -> Option<&C> {
        self.current.as_ref()
    }

    pub fn previous(&self) -> Option<&C> {
        self.previous.as_ref()
    }

    pub fn len(&self) -> usize {
        self.current.is_some() as usize + self.previous.is_some() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }

    /// Live clouds with their alpha, outgoing first so the incoming one draws on top.
    pub fn live(&self, now: f32) -> impl Iterator<Item = (&C, f32)> {
        let (out_a, in_a) = match self.fade {
            Some(f) => (f.outgoing(now), f.incoming(now)),
            None => (0.0, 1.0),
        };
        self.previous
            .iter()
            .map(move |c| (c, out_a))
            .chain(self.current.iter().map(move |c| (c, in_a)))
            .filter(|(_, a)| *a > 0.0)
    }

    pub fn live_mut(&mut self, now: f32) -> impl Iterator<Item = (&mut C, f32)> {
        let (out_a, in_a) = match self.fade {
            Some(f) => (f.outgoing(now), f.incoming(now)),
            None => (0.0, 1.0),
        };
        self.previous
            .iter_mut()
            .map(move |c| (c, out_a))
            .chain(self.current.iter_mut().map(move |c| (c, in_a)))
            .filter(|(_, a)| *a > 0.0)
    }

    pub fn clear(&mut self) {
        self.current = None;
        self.previous = None;
        self.fade = None;
    }
}
