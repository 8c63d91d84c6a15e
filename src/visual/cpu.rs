use super::{CloudSlots, RenderCtx, VisualEngine};
use crate::camera::Z_NEAR;
use crate::cloud::PointCloud;
use crate::error::RenderError;
use crate::physics::{FieldInputs, displace};
use crate::post::{
    BLOOM_RADIUS, FEEDBACK_GAIN, FEEDBACK_WEIGHTS, PingPong, PostParams, PostState, bloom_weights,
    hash_unit, hue_rotate, kaleido_uv, luma, pass_fade, rotate_uv, sacred_color, zoom_uv,
};
use glam::Vec3;
use std::f32::consts::TAU;
use std::sync::Arc;
use tracing::debug;

type Rgb = [f32; 3];

/// World-space splat diameter at point_scale 1.
const SPLAT_WORLD_SIZE: f32 = 0.05;
const MAX_SPLAT_RADIUS: f32 = 6.0;

/// Software rasterizer + post chain. Headless, deterministic for a given input.
pub struct CpuEngine {
    slots: CloudSlots<Arc<PointCloud>>,
    pending: Option<Arc<PointCloud>>,
    state: PostState,
    w: usize,
    h: usize,
    iw: usize,
    ih: usize,
    color: Vec<Rgb>,
    depth: Vec<f32>,
    feedback: PingPong<Vec<Rgb>>,
    scratch: [Vec<Rgb>; 2],
    bright: Vec<Rgb>,
    blur_tmp: Vec<Rgb>,
    out: Vec<u8>,
    bloom: [f32; (2 * BLOOM_RADIUS + 1) as usize],
}

impl CpuEngine {
    pub fn new(crossfade_secs: f32) -> Self {
        Self {
            slots: CloudSlots::new(crossfade_secs),
            pending: None,
            state: PostState::Idle,
            w: 0,
            h: 0,
            iw: 0,
            ih: 0,
            color: Vec::new(),
            depth: Vec::new(),
            feedback: PingPong::new(Vec::new(), Vec::new()),
            scratch: [Vec::new(), Vec::new()],
            bright: Vec::new(),
            blur_tmp: Vec::new(),
            out: Vec::new(),
            bloom: bloom_weights(),
        }
    }

    /// Internal-resolution feedback history (this frame's output after `render`).
    pub fn history(&self) -> &[Rgb] {
        self.feedback.history()
    }

    fn ensure_size(&mut self, w: usize, h: usize, scale: usize) {
        let scale = scale.max(1);
        let (iw, ih) = (w.div_ceil(scale), h.div_ceil(scale));
        if self.w == w && self.h == h && self.iw == iw && self.ih == ih {
            return;
        }
        self.w = w;
        self.h = h;
        self.iw = iw;
        self.ih = ih;
        let n = iw * ih;
        self.color = vec![[0.0; 3]; n];
        self.depth = vec![f32::INFINITY; n];
        self.feedback = PingPong::new(vec![[0.0; 3]; n], vec![[0.0; 3]; n]);
        self.scratch = [vec![[0.0; 3]; n], vec![[0.0; 3]; n]];
        self.bright = vec![[0.0; 3]; n];
        self.blur_tmp = vec![[0.0; 3]; n];
        self.out = vec![0; w * h * 4];
        for px in self.out.chunks_exact_mut(4) {
            px[3] = 255;
        }
    }

    fn rasterize(&mut self, ctx: &RenderCtx) {
        self.color.fill([0.0; 3]);
        self.depth.fill(f32::INFINITY);
        let (iw, ih) = (self.iw as f32, self.ih as f32);
        let vp = ctx.camera.view_projection();
        let focal = ctx.camera.projection.y_axis.y * ih * 0.5;
        let inputs = FieldInputs {
            time: ctx.t,
            audio: ctx.audio,
            params: ctx.params,
            eye: ctx.camera.eye,
        };

        for (cloud, alpha) in self.slots.live(ctx.t) {
            // Keep the splat count near the pixel budget regardless of cloud size.
            let budget = (self.iw * self.ih * 2).max(1);
            let stride = ctx.quality.point_stride().max(cloud.len() / budget).max(1);
            let radius_gain = (stride as f32).sqrt();
            for i in (0..cloud.len()).step_by(stride) {
                let base = Vec3::from(cloud.positions()[i]);
                let p = displace(base, cloud.category(i), &inputs);
                let clip = vp * p.position.extend(1.0);
                if clip.w <= Z_NEAR {
                    continue;
                }
                let ndc = clip.truncate() / clip.w;
                if !(0.0..=1.0).contains(&ndc.z) || ndc.x.abs() > 1.1 || ndc.y.abs() > 1.1 {
                    continue;
                }
                let sx = (ndc.x * 0.5 + 0.5) * iw;
                let sy = (0.5 - ndc.y * 0.5) * ih;
                let r = (p.size * SPLAT_WORLD_SIZE * focal * radius_gain / clip.w)
                    .clamp(0.5, MAX_SPLAT_RADIUS);
                let c = cloud.colors()[i];
                let rgb = [
                    c[0] * p.brightness,
                    c[1] * p.brightness,
                    c[2] * p.brightness,
                ];
                splat(
                    &mut self.color,
                    &mut self.depth,
                    self.iw,
                    self.ih,
                    (sx, sy, r),
                    ndc.z,
                    rgb,
                    alpha,
                );
            }
        }
    }

    fn composite(&mut self, ctx: &RenderCtx) -> PostParams {
        let pp = PostParams::compute(ctx.params.coherence, &ctx.audio, ctx.t);
        let dims = (self.iw, self.ih);
        let Self {
            color,
            feedback,
            scratch,
            bright,
            blur_tmp,
            bloom,
            ..
        } = self;
        let [s0, s1] = scratch;
        let (cur, hist) = feedback.split();
        let mut pass = |src: &[Rgb], dst: &mut [Rgb], i: u32| {
            bloom_pass(src, bright, blur_tmp, dims, pp.bloom_threshold, &bloom[..]);
            composite_pass(src, hist, bright, dst, dims, &pp, i);
        };
        match pp.iterations {
            1 => pass(color, cur, 0),
            2 => {
                pass(color, s0, 0);
                pass(s0, cur, 1);
            }
            _ => {
                pass(color, s0, 0);
                pass(s0, s1, 1);
                pass(s1, cur, 2);
            }
        }

        if pp.draw_sacred {
            let aspect = ctx.w.max(1) as f32 / ctx.h.max(1) as f32;
            for y in 0..self.ih {
                for x in 0..self.iw {
                    let uv = [(x as f32 + 0.5) / self.iw as f32, (y as f32 + 0.5) / self.ih as f32];
                    let add = sacred_color(uv, aspect, &pp);
                    let px = &mut self.feedback.current_mut()[y * self.iw + x];
                    for k in 0..3 {
                        px[k] = (px[k] + add[k]).min(1.0);
                    }
                }
            }
        }
        pp
    }

    fn write_output(&mut self) {
        let (w, h, iw, ih) = (self.w, self.h, self.iw, self.ih);
        let src = self.feedback.current();
        for y in 0..h {
            let sy = (y * ih / h.max(1)).min(ih.saturating_sub(1));
            for x in 0..w {
                let sx = (x * iw / w.max(1)).min(iw.saturating_sub(1));
                let c = src[sy * iw + sx];
                let o = (y * w + x) * 4;
                self.out[o] = (c[0].clamp(0.0, 1.0) * 255.0) as u8;
                self.out[o + 1] = (c[1].clamp(0.0, 1.0) * 255.0) as u8;
                self.out[o + 2] = (c[2].clamp(0.0, 1.0) * 255.0) as u8;
                self.out[o + 3] = 255;
            }
        }
    }
}

impl VisualEngine for CpuEngine {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn resize(&mut self, w: usize, h: usize) {
        self.ensure_size(w, h, 1);
    }

    fn submit_cloud(&mut self, cloud: Arc<PointCloud>, _now: f32) {
        self.pending = Some(cloud);
    }

    fn resident_clouds(&self) -> usize {
        self.slots.len()
    }

    fn post_state(&self) -> PostState {
        self.state
    }

    fn take_errors(&mut self) -> Vec<RenderError> {
        Vec::new()
    }

    fn render(&mut self, ctx: &RenderCtx) -> &[u8] {
        self.ensure_size(ctx.w, ctx.h, ctx.scale);
        if self.slots.begin_frame(ctx.t).is_some() {
            debug!("outgoing cloud released");
        }
        if !self.slots.is_fading() {
            if let Some(cloud) = self.pending.take() {
                debug!(points = cloud.len(), "crossfade started");
                self.slots.push(cloud, ctx.t);
            }
        }

        self.state = self.state.on_frame(!self.slots.is_empty(), true);
        if self.state == PostState::Idle || self.iw == 0 || self.ih == 0 {
            for c in self.feedback.current_mut().iter_mut() {
                *c = [0.0; 3];
            }
            self.write_output();
            return &self.out;
        }

        self.rasterize(ctx);
        self.composite(ctx);
        self.write_output();
        self.feedback.swap();
        &self.out
    }
}

#[allow(clippy::too_many_arguments)]
fn splat(
    color: &mut [Rgb],
    depth: &mut [f32],
    w: usize,
    h: usize,
    (cx, cy, r): (f32, f32, f32),
    z: f32,
    rgb: Rgb,
    alpha: f32,
) {
    let x0 = (cx - r).floor().max(0.0) as usize;
    let y0 = (cy - r).floor().max(0.0) as usize;
    let x1 = ((cx + r).ceil() as usize).min(w);
    let y1 = ((cy + r).ceil() as usize).min(h);
    let r2 = r * r;
    for y in y0..y1 {
        let dy = y as f32 + 0.5 - cy;
        for x in x0..x1 {
            let dx = x as f32 + 0.5 - cx;
            if dx * dx + dy * dy > r2 {
                continue;
            }
            let i = y * w + x;
            if z >= depth[i] {
                continue;
            }
            depth[i] = z;
            let dst = &mut color[i];
            for k in 0..3 {
                dst[k] = rgb[k] * alpha + dst[k] * (1.0 - alpha);
            }
        }
    }
}

fn sample(buf: &[Rgb], (w, h): (usize, usize), uv: [f32; 2]) -> Rgb {
    if w == 0 || h == 0 {
        return [0.0; 3];
    }
    let fx = (uv[0] * w as f32 - 0.5).clamp(0.0, (w - 1) as f32);
    let fy = (uv[1] * h as f32 - 0.5).clamp(0.0, (h - 1) as f32);
    let (x0, y0) = (fx as usize, fy as usize);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (tx, ty) = (fx - x0 as f32, fy - y0 as f32);
    let a = buf[y0 * w + x0];
    let b = buf[y0 * w + x1];
    let c = buf[y1 * w + x0];
    let d = buf[y1 * w + x1];
    std::array::from_fn(|k| {
        let top = a[k] + (b[k] - a[k]) * tx;
        let bot = c[k] + (d[k] - c[k]) * tx;
        top + (bot - top) * ty
    })
}

/// Over-threshold luminance, blurred with the separable 7x7 Gaussian.
fn bloom_pass(
    src: &[Rgb],
    bright: &mut [Rgb],
    tmp: &mut [Rgb],
    (w, h): (usize, usize),
    threshold: f32,
    weights: &[f32],
) {
    let r = BLOOM_RADIUS;
    for (dst, c) in bright.iter_mut().zip(src) {
        let k = ((luma(*c) - threshold) / (1.0 - threshold)).max(0.0);
        *dst = [c[0] * k, c[1] * k, c[2] * k];
    }
    for y in 0..h {
        for x in 0..w {
            let mut acc = [0.0f32; 3];
            for (t, wt) in weights.iter().enumerate() {
                let sx = (x as i32 + t as i32 - r).clamp(0, w as i32 - 1) as usize;
                let s = bright[y * w + sx];
                for k in 0..3 {
                    acc[k] += s[k] * wt;
                }
            }
            tmp[y * w + x] = acc;
        }
    }
    for y in 0..h {
        for x in 0..w {
            let mut acc = [0.0f32; 3];
            for (t, wt) in weights.iter().enumerate() {
                let sy = (y as i32 + t as i32 - r).clamp(0, h as i32 - 1) as usize;
                let s = tmp[sy * w + x];
                for k in 0..3 {
                    acc[k] += s[k] * wt;
                }
            }
            bright[y * w + x] = acc;
        }
    }
}

fn composite_pass(
    src: &[Rgb],
    history: &[Rgb],
    bloom: &[Rgb],
    dst: &mut [Rgb],
    dims: (usize, usize),
    pp: &PostParams,
    iteration: u32,
) {
    let (w, h) = dims;
    let feedback = pp.feedback_amount * pass_fade(iteration) * FEEDBACK_GAIN;
    for y in 0..h {
        for x in 0..w {
            let uv = [(x as f32 + 0.5) / w as f32, (y as f32 + 0.5) / h as f32];
            let mut suv = uv;
            if pp.kaleido_amount > 0.0 {
                let k = kaleido_uv(uv, pp.kaleido_rotation);
                suv = [
                    uv[0] + (k[0] - uv[0]) * pp.kaleido_amount,
                    uv[1] + (k[1] - uv[1]) * pp.kaleido_amount,
                ];
            }
            let mut col = sample(src, dims, suv);

            if pp.chroma_offset > 0.0 {
                let d = [suv[0] - 0.5, suv[1] - 0.5];
                let len = (d[0] * d[0] + d[1] * d[1]).sqrt().max(1e-5);
                let o = [d[0] / len * pp.chroma_offset, d[1] / len * pp.chroma_offset];
                col[0] = sample(src, dims, [suv[0] + o[0], suv[1] + o[1]])[0];
                col[2] = sample(src, dims, [suv[0] - o[0], suv[1] - o[1]])[2];
            }

            if feedback > 0.0 {
                let taps = [
                    sample(history, dims, uv),
                    sample(history, dims, zoom_uv(uv, pp.zoom_in)),
                    sample(history, dims, zoom_uv(uv, pp.zoom_out)),
                    sample(history, dims, rotate_uv(uv, pp.spiral_angle)),
                ];
                for (tap, wt) in taps.iter().zip(FEEDBACK_WEIGHTS) {
                    for k in 0..3 {
                        col[k] += tap[k] * wt * feedback;
                    }
                }
            }

            if pp.glitch_amount > 0.0 {
                col = glitch(src, dims, uv, suv, col, pp);
            }

            let b = bloom[y * w + x];
            for k in 0..3 {
                col[k] += b[k] * pp.bloom_strength;
            }

            let col = hue_rotate(col, pp.hue_shift * TAU);
            dst[y * w + x] = col.map(|v| v.clamp(0.0, 1.0));
        }
    }
}

/// Block-quantized glitches keyed on a time-quantized seed.
fn glitch(
    src: &[Rgb],
    dims: (usize, usize),
    uv: [f32; 2],
    suv: [f32; 2],
    mut col: Rgb,
    pp: &PostParams,
) -> Rgb {
    let g = pp.glitch_amount;
    let seed = pp.glitch_seed;
    let mut guv = suv;

    let row = (suv[1] * 90.0) as u32;
    if hash_unit(row, 0, seed) < g * 0.3 {
        guv[0] += (hash_unit(row, 1, seed) - 0.5) * 0.1 * g;
        col = sample(src, dims, guv);
    }

    let (bx, by) = ((guv[0] * 16.0).max(0.0) as u32, (guv[1] * 9.0).max(0.0) as u32);
    if hash_unit(bx, by, seed ^ 0xB10C) < g * 0.25 {
        let off = [
            (hash_unit(bx, by, seed.wrapping_add(7)) - 0.5) * 0.08,
            (hash_unit(by, bx, seed.wrapping_add(11)) - 0.5) * 0.08,
        ];
        col = sample(src, dims, [guv[0] + off[0], guv[1] + off[1]]);
    }

    if hash_unit(bx, by, seed.wrapping_add(3)) < g * 0.5 {
        let s = 0.01 * g;
        col[0] = sample(src, dims, [guv[0] + s, guv[1]])[0];
        col[2] = sample(src, dims, [guv[0] - s, guv[1]])[2];
    }

    let line = (uv[1] * 120.0) as u32;
    if hash_unit(line, 5, seed) > 1.0 - g * 0.08 {
        let noise = hash_unit((uv[0] * dims.0 as f32) as u32, line, seed);
        for c in &mut col {
            *c += 0.25 * noise;
        }
    }
    col
}
