use super::{Category, SourceImage};
use crate::error::SceneError;
use std::path::{Path, PathBuf};

/// Dense depth in [0,1], 1 = near.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthMap {
    width: usize,
    height: usize,
    values: Vec<f32>,
}

impl DepthMap {
    pub fn new(width: usize, height: usize, values: Vec<f32>) -> Result<Self, SceneError> {
        if values.len() != width * height || width == 0 || height == 0 {
            return Err(SceneError::MapSize {
                width,
                height,
                len: values.len(),
            });
        }
        let values = values.into_iter().map(|v| v.clamp(0.0, 1.0)).collect();
        Ok(Self {
            width,
            height,
            values,
        })
    }

    /// Fallback when no estimator is available: nearest at the center.
    pub fn radial(width: usize, height: usize) -> Self {
        let (w, h) = (width.max(1), height.max(1));
        let mut values = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                let dx = (x as f32 + 0.5) / w as f32 - 0.5;
                let dy = (y as f32 + 0.5) / h as f32 - 0.5;
                let r = (dx * dx + dy * dy).sqrt() / std::f32::consts::FRAC_1_SQRT_2;
                values.push((1.0 - r).clamp(0.0, 1.0));
            }
        }
        Self {
            width: w,
            height: h,
            values,
        }
    }

    pub fn uniform(width: usize, height: usize, depth: f32) -> Self {
        let (w, h) = (width.max(1), height.max(1));
        Self {
            width: w,
            height: h,
            values: vec![depth.clamp(0.0, 1.0); w * h],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Nearest sample at normalized coordinates; outside [0,1] clamps to the edge.
    pub fn sample(&self, u: f32, v: f32) -> f32 {
        let x = (u.clamp(0.0, 1.0) * (self.width - 1) as f32).round() as usize;
        let y = (v.clamp(0.0, 1.0) * (self.height - 1) as f32).round() as usize;
        self.values[y.min(self.height - 1) * self.width + x.min(self.width - 1)]
    }
}

/// Per-pixel category ids, already mapped onto the six categories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryMap {
    width: usize,
    height: usize,
    ids: Vec<u8>,
}

impl CategoryMap {
    pub fn new(width: usize, height: usize, ids: Vec<u8>) -> Result<Self, SceneError> {
        if ids.len() != width * height || width == 0 || height == 0 {
            return Err(SceneError::MapSize {
                width,
                height,
                len: ids.len(),
            });
        }
        Ok(Self { width, height, ids })
    }

    /// Builds from raw segmentation class ids.
    pub fn from_classes(width: usize, height: usize, classes: &[u8]) -> Result<Self, SceneError> {
        let ids = classes.iter().map(|c| category_for_class(*c).id()).collect();
        Self::new(width, height, ids)
    }

    pub fn sample(&self, u: f32, v: f32) -> Option<Category> {
        let x = (u.clamp(0.0, 1.0) * (self.width - 1) as f32).round() as usize;
        let y = (v.clamp(0.0, 1.0) * (self.height - 1) as f32).round() as usize;
        self.ids
            .get(y.min(self.height - 1) * self.width + x.min(self.width - 1))
            .and_then(|id| Category::from_id(*id))
    }
}

/// Fixed mapping from ADE20K-style class indices to categories.
pub fn category_for_class(class: u8) -> Category {
    match class {
        2 => Category::Sky,
        0 | 1 | 5 | 8 | 14 | 25 | 32 | 38 | 42 | 48 | 53 | 59 | 61 | 79 | 84 => Category::Structure,
        3 | 6 | 11 | 13 | 16 | 28 | 29 | 34 | 46 | 52 | 54 | 68 | 91 | 94 => Category::Ground,
        4 | 9 | 17 | 66 | 72 => Category::Vegetation,
        21 | 26 | 60 | 109 | 113 | 128 => Category::Ambient,
        _ => Category::Subject,
    }
}

/// What a depth/segmentation collaborator hands back. Either part may be absent.
#[derive(Debug, Clone, Default)]
pub struct DepthEstimate {
    pub depth: Option<DepthMap>,
    pub categories: Option<CategoryMap>,
}

/// Seam for depth estimation and semantic segmentation.
pub trait DepthSource: Send {
    fn estimate(&self, image: &SourceImage) -> Result<DepthEstimate, SceneError>;
}

/// Reads precomputed maps from disk (grayscale; depth white = near, segmentation value = class id).
#[derive(Debug, Clone, Default)]
pub struct FileDepthSource {
    pub depth: Option<PathBuf>,
    pub segmentation: Option<PathBuf>,
}

impl DepthSource for FileDepthSource {
    fn estimate(&self, _image: &SourceImage) -> Result<DepthEstimate, SceneError> {
        let depth = match &self.depth {
            Some(path) => {
                let img = image::open(path)?.to_luma16();
                let (w, h) = img.dimensions();
                let values = img.into_raw().into_iter().map(|v| v as f32 / 65535.0).collect();
                Some(DepthMap::new(w as usize, h as usize, values)?)
            }
            None => None,
        };
        let categories = match &self.segmentation {
            Some(path) => {
                let img = image::open(path)?.to_luma8();
                let (w, h) = img.dimensions();
                Some(CategoryMap::from_classes(w as usize, h as usize, img.as_raw())?)
            }
            None => None,
        };
        Ok(DepthEstimate { depth, categories })
    }
}

pub fn load_rgb_image(path: &Path) -> Result<SourceImage, SceneError> {
    let img = image::open(path)?.to_rgb8();
    let (w, h) = img.dimensions();
    Ok(SourceImage {
        width: w as usize,
        height: h as usize,
        rgb: img.into_raw(),
    })
}

/// Synthetic landscape used when no scene source is configured.
pub fn procedural_scene(width: usize, height: usize) -> (SourceImage, DepthMap) {
    let (w, h) = (width.max(2), height.max(2));
    let mut rgb = Vec::with_capacity(w * h * 3);
    let mut depth = Vec::with_capacity(w * h);
    let horizon = 0.55f32;
    for y in 0..h {
        let v = y as f32 / (h - 1) as f32;
        for x in 0..w {
            let u = x as f32 / (w - 1) as f32;
            let grain = (super::lcg_unit(0xC0FF_EE00, (y * w + x) as u32) - 0.5) * 0.12;
            let (dx, dy) = (u - 0.5, (v - 0.5) * h as f32 / w as f32);
            let orb = (dx * dx + dy * dy).sqrt();
            let ridge = horizon - 0.08 * ((u * 9.0).sin() * 0.6 + (u * 23.0).sin() * 0.4);

            let (c, d) = if orb < 0.14 {
                let glow = 1.0 - orb / 0.14;
                ([0.95, 0.45 + 0.4 * glow, 0.2 + 0.5 * glow], 0.85 + 0.1 * glow)
            } else if v < ridge {
                let t = v / ridge;
                ([0.15 + 0.7 * t, 0.2 + 0.35 * t, 0.55 - 0.2 * t], 0.05)
            } else if v < horizon + 0.08 {
                ([0.12 + grain, 0.35 + grain, 0.15], 0.5)
            } else {
                let t = (v - horizon) / (1.0 - horizon);
                let stripe = if ((u * 40.0 + t * 12.0).floor() as i32) % 2 == 0 {
                    0.08
                } else {
                    0.0
                };
                ([0.35 + stripe + grain, 0.25 + grain, 0.18], 0.3 + 0.45 * t)
            };
            for ch in c {
                rgb.push((ch.clamp(0.0, 1.0) * 255.0) as u8);
            }
            depth.push(d);
        }
    }
    (
        SourceImage { width: w, height: h, rgb },
        DepthMap { width: w, height: h, values: depth },
    )
}
