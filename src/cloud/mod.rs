//! Point clouds, semantic categories and the image-to-cloud builder.

mod builder;
mod maps;

pub use builder::{
    BuilderConfig, PointCloudBuilder, SourceImage, lcg_unit, luminance, project, sobel_magnitude,
    solve_base_density,
};
pub use maps::{
    CategoryMap, DepthEstimate, DepthMap, DepthSource, FileDepthSource, category_for_class,
    load_rgb_image, procedural_scene,
};

use crate::error::ProtocolError;

pub const CATEGORY_COUNT: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Category {
    Subject = 0,
    Structure = 1,
    Ground = 2,
    Vegetation = 3,
    Sky = 4,
    Ambient = 5,
}

/// Physical response of one category: inertia and which two bands drive it.
#[derive(Debug, Clone, Copy)]
pub struct CategoryProfile {
    pub mass: f32,
    pub bands: [usize; 2],
    pub label: &'static str,
}

pub const CATEGORY_PROFILES: [CategoryProfile; CATEGORY_COUNT] = [
    CategoryProfile { mass: 1.0, bands: [0, 1], label: "subject" },
    CategoryProfile { mass: 2.4, bands: [1, 2], label: "structure" },
    CategoryProfile { mass: 3.0, bands: [0, 2], label: "ground" },
    CategoryProfile { mass: 0.8, bands: [3, 4], label: "vegetation" },
    CategoryProfile { mass: 0.35, bands: [6, 7], label: "sky" },
    CategoryProfile { mass: 0.6, bands: [4, 5], label: "ambient" },
];

impl Category {
    pub const ALL: [Self; CATEGORY_COUNT] = [
        Self::Subject,
        Self::Structure,
        Self::Ground,
        Self::Vegetation,
        Self::Sky,
        Self::Ambient,
    ];

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn profile(self) -> &'static CategoryProfile {
        &CATEGORY_PROFILES[self as usize]
    }

    pub fn label(self) -> &'static str {
        self.profile().label
    }

    /// Fallback when no segmentation is supplied (depth 1 = near).
    pub fn from_depth(depth: f32) -> Self {
        match depth {
            d if d >= 0.8 => Self::Subject,
            d if d >= 0.6 => Self::Structure,
            d if d >= 0.45 => Self::Vegetation,
            d if d >= 0.3 => Self::Ground,
            d if d >= 0.15 => Self::Ambient,
            _ => Self::Sky,
        }
    }
}

/// Id rescaled to [0,1], the form the point shader receives.
pub fn normalized_category(id: u8) -> f32 {
    id as f32 / (CATEGORY_COUNT - 1) as f32
}

/// Immutable point set. Displacement happens at render time only.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PointCloud {
    positions: Vec<[f32; 3]>,
    colors: Vec<[f32; 3]>,
    categories: Vec<u8>,
}

impl PointCloud {
    pub fn new(
        positions: Vec<[f32; 3]>,
        colors: Vec<[f32; 3]>,
        categories: Vec<u8>,
    ) -> Result<Self, ProtocolError> {
        if positions.len() != colors.len() || positions.len() != categories.len() {
            return Err(ProtocolError::CloudShape {
                positions: positions.len(),
                colors: colors.len(),
                categories: categories.len(),
            });
        }
        if let Some((index, id)) = categories
            .iter()
            .enumerate()
            .find(|(_, c)| **c as usize >= CATEGORY_COUNT)
        {
            return Err(ProtocolError::InvalidCategory {
                index,
                id: *id,
                max: (CATEGORY_COUNT - 1) as u8,
            });
        }
        Ok(Self {
            positions,
            colors,
            categories,
        })
    }

    /// For callers that build the arrays in lockstep with valid ids.
    pub(crate) fn from_trusted(
        positions: Vec<[f32; 3]>,
        colors: Vec<[f32; 3]>,
        categories: Vec<u8>,
    ) -> Self {
        debug_assert!(positions.len() == colors.len() && positions.len() == categories.len());
        Self {
            positions,
            colors,
            categories,
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[[f32; 3]] {
        &self.positions
    }

    pub fn colors(&self) -> &[[f32; 3]] {
        &self.colors
    }

    pub fn categories(&self) -> &[u8] {
        &self.categories
    }

    pub fn category(&self, i: usize) -> Category {
        self.categories
            .get(i)
            .and_then(|c| Category::from_id(*c))
            .unwrap_or(Category::Ambient)
    }

    /// Points per category, indexed by id.
    pub fn histogram(&self) -> [usize; CATEGORY_COUNT] {
        let mut h = [0usize; CATEGORY_COUNT];
        for c in &self.categories {
            h[*c as usize] += 1;
        }
        h
    }
}
