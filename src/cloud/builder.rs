use super::{Category, CategoryMap, DepthMap, PointCloud};
use crate::config::ProjectionMode;
use std::f32::consts::{PI, TAU};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuilderConfig {
    /// Target band for a full-size image; smaller images scale it down.
    pub target_min: usize,
    pub target_max: usize,
    pub reference_pixels: usize,
    pub min_density: f32,
    pub max_density: f32,
    pub edge_gain: f32,
    pub seed: u32,
    pub projection: ProjectionMode,
    pub radius: f32,
    pub depth_push: f32,
    /// Horizontal arc of the planar mapping, radians.
    pub planar_arc: f32,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            target_min: 400_000,
            target_max: 600_000,
            reference_pixels: 1024 * 1024,
            min_density: 0.05,
            max_density: 0.8,
            edge_gain: 0.7,
            seed: 0x5EED_1234,
            projection: ProjectionMode::Planar,
            radius: 10.0,
            depth_push: 6.0,
            planar_arc: 1.6,
        }
    }
}

impl BuilderConfig {
    /// Recenters the target band on `mid` keeping its relative width.
    pub fn with_target(mut self, mid: usize) -> Self {
        let mid = mid.max(1);
        self.target_min = mid * 4 / 5;
        self.target_max = mid * 6 / 5;
        self
    }

    /// (horizontal, vertical) arcs in radians for an image of this shape.
    pub fn arcs(&self, width: usize, height: usize) -> (f32, f32) {
        match self.projection {
            ProjectionMode::Spherical => (TAU, PI * 0.9),
            ProjectionMode::Planar => {
                let aspect = height.max(1) as f32 / width.max(1) as f32;
                (self.planar_arc, (self.planar_arc * aspect).min(PI * 0.9))
            }
        }
    }

    pub fn target_band(&self, pixels: usize) -> (usize, usize) {
        let scale = (pixels as f64 / self.reference_pixels.max(1) as f64).min(1.0);
        (
            (self.target_min as f64 * scale).round() as usize,
            (self.target_max as f64 * scale).round() as usize,
        )
    }

    pub fn target_count(&self, pixels: usize) -> usize {
        let (lo, hi) = self.target_band(pixels);
        (lo + hi) / 2
    }
}

/// Owned 8-bit RGB pixels, row-major. `rgb` always holds `width * height` pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    pub(super) width: usize,
    pub(super) height: usize,
    pub(super) rgb: Vec<u8>,
}

impl SourceImage {
    pub fn new(width: usize, height: usize, rgb: Vec<u8>) -> Option<Self> {
        let len = width.checked_mul(height)?.checked_mul(3)?;
        (rgb.len() == len).then_some(Self { width, height, rgb })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn rgb(&self) -> &[u8] {
        &self.rgb
    }

    pub fn pixels(&self) -> usize {
        self.width * self.height
    }
}

pub fn luminance(rgb: &[u8]) -> Vec<f32> {
    rgb.chunks_exact(3)
        .map(|p| (0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32) / 255.0)
        .collect()
}

/// 3x3 Sobel magnitude normalized by its maximum. A flat image yields all zeros.
pub fn sobel_magnitude(lum: &[f32], width: usize, height: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; width * height];
    if width == 0 || height == 0 || lum.len() < width * height {
        return out;
    }
    let at = |x: isize, y: isize| -> f32 {
        let xc = x.clamp(0, width as isize - 1) as usize;
        let yc = y.clamp(0, height as isize - 1) as usize;
        lum[yc * width + xc]
    };
    let mut max = 0.0f32;
    for y in 0..height as isize {
        for x in 0..width as isize {
            let gx = -at(x - 1, y - 1) - 2.0 * at(x - 1, y) - at(x - 1, y + 1)
                + at(x + 1, y - 1)
                + 2.0 * at(x + 1, y)
                + at(x + 1, y + 1);
            let gy = -at(x - 1, y - 1) - 2.0 * at(x, y - 1) - at(x + 1, y - 1)
                + at(x - 1, y + 1)
                + 2.0 * at(x, y + 1)
                + at(x + 1, y + 1);
            let m = (gx * gx + gy * gy).sqrt();
            out[y as usize * width + x as usize] = m;
            max = max.max(m);
        }
    }
    if max > 1e-6 {
        for v in &mut out {
            *v /= max;
        }
    } else {
        out.fill(0.0);
    }
    out
}

/// Finds the base density whose expected selection count is closest to `target`.
pub fn solve_base_density(
    edges: &[f32],
    target: usize,
    edge_gain: f32,
    min: f32,
    max: f32,
) -> f32 {
    let expected = |b: f32| -> f32 { edges.iter().map(|e| (b + e * edge_gain).min(1.0)).sum() };
    let target = target as f32;
    if expected(min) >= target {
        return min;
    }
    if expected(max) <= target {
        return max;
    }
    let (mut lo, mut hi) = (min, max);
    for _ in 0..24 {
        let mid = 0.5 * (lo + hi);
        if expected(mid) < target {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

/// Stateless LCG draw in [0,1) for pixel `index` under `seed`.
pub fn lcg_unit(seed: u32, index: u32) -> f32 {
    let mut s = seed ^ index.wrapping_mul(0x9E37_79B9);
    s = s.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
    s ^= s >> 16;
    s = s.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
    (s >> 8) as f32 / (1u32 << 24) as f32
}

/// Spherical-arc mapping of normalized image coordinates. Depth 1 pulls the point in.
pub fn project(
    u: f32,
    v: f32,
    depth: f32,
    h_arc: f32,
    v_arc: f32,
    radius: f32,
    push: f32,
) -> [f32; 3] {
    let theta = (u - 0.5) * h_arc;
    let phi = (0.5 - v) * v_arc;
    let r = radius - depth.clamp(0.0, 1.0) * push;
    [
        r * phi.cos() * theta.sin(),
        r * phi.sin(),
        -r * phi.cos() * theta.cos(),
    ]
}

pub struct PointCloudBuilder {
    config: BuilderConfig,
}

impl PointCloudBuilder {
    pub fn new(config: BuilderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    pub fn build(
        &self,
        image: &SourceImage,
        depth: Option<&DepthMap>,
        categories: Option<&CategoryMap>,
    ) -> PointCloud {
        let (w, h) = (image.width, image.height);
        let cfg = &self.config;
        let radial;
        let depth = match depth {
            Some(d) => d,
            None => {
                radial = DepthMap::radial(w.max(1), h.max(1));
                &radial
            }
        };

        let edges = sobel_magnitude(&luminance(&image.rgb), w, h);
        let target = cfg.target_count(image.pixels());
        let base = solve_base_density(
            &edges,
            target,
            cfg.edge_gain,
            cfg.min_density,
            cfg.max_density,
        );
        let (h_arc, v_arc) = cfg.arcs(w, h);

        let mut positions = Vec::with_capacity(target + target / 8);
        let mut colors = Vec::with_capacity(target + target / 8);
        let mut cats = Vec::with_capacity(target + target / 8);

        // A one-pixel-wide axis has no extent to map across.
        let degenerate = w <= 1 || h <= 1;
        for y in 0..h {
            let v = if degenerate { 0.5 } else { y as f32 / (h - 1) as f32 };
            for x in 0..w {
                let i = y * w + x;
                let p = (base + edges[i] * cfg.edge_gain).min(1.0);
                if lcg_unit(cfg.seed, i as u32) >= p {
                    continue;
                }
                let u = if degenerate { 0.5 } else { x as f32 / (w - 1) as f32 };
                let d = depth.sample(u, v);
                positions.push(project(u, v, d, h_arc, v_arc, cfg.radius, cfg.depth_push));
                let px = &image.rgb[i * 3..i * 3 + 3];
                colors.push([
                    px[0] as f32 / 255.0,
                    px[1] as f32 / 255.0,
                    px[2] as f32 / 255.0,
                ]);
                let cat = categories
                    .and_then(|m| m.sample(u, v))
                    .unwrap_or_else(|| Category::from_depth(d));
                cats.push(cat.id());
            }
        }

        PointCloud::from_trusted(positions, colors, cats)
    }
}
