use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use pointcloud_visualizer::cloud::{
    BuilderConfig, Category, DepthMap, DepthSource, FileDepthSource, PointCloudBuilder,
    load_rgb_image, procedural_scene,
};
use pointcloud_visualizer::config::ProjectionMode;
use pointcloud_visualizer::scene::{SceneHeader, encode_scene};

/// Builds a point cloud offline and writes it in the binary scene format
/// accepted by `--scene-file`.
#[derive(Parser, Debug)]
#[command(name = "export_cloud")]
struct Args {
    /// Source image. Without it the built-in procedural scene is exported.
    #[arg(long)]
    image: Option<PathBuf>,

    /// Grayscale depth map (white = near).
    #[arg(long)]
    depth: Option<PathBuf>,

    /// Grayscale segmentation map (pixel value = class id).
    #[arg(long)]
    segmentation: Option<PathBuf>,

    #[arg(long, default_value = "scene.pcv")]
    out: PathBuf,

    #[arg(long, value_enum, default_value_t = ProjectionMode::Planar)]
    projection: ProjectionMode,

    #[arg(long)]
    target_points: Option<usize>,

    #[arg(long, default_value_t = 7)]
    seed: u32,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = BuilderConfig {
        seed: args.seed,
        projection: args.projection,
        ..BuilderConfig::default()
    };
    if let Some(n) = args.target_points {
        config = config.with_target(n);
    }
    let builder = PointCloudBuilder::new(config);

    let cloud = match &args.image {
        Some(path) => {
            let img = load_rgb_image(path).with_context(|| format!("load {}", path.display()))?;
            let estimate = FileDepthSource {
                depth: args.depth.clone(),
                segmentation: args.segmentation.clone(),
            }
            .estimate(&img)
            .context("load depth/segmentation maps")?;
            let depth = estimate
                .depth
                .unwrap_or_else(|| DepthMap::radial(img.width(), img.height()));
            builder.build(&img, Some(&depth), estimate.categories.as_ref())
        }
        None => {
            let (img, depth) = procedural_scene(512, 320);
            builder.build(&img, Some(&depth), None)
        }
    };

    let header = SceneHeader {
        labels: Category::ALL.iter().map(|c| c.label().to_string()).collect(),
        ..SceneHeader::default()
    };
    let bytes = encode_scene(&header, &cloud).context("encode scene")?;
    if let Some(parent) = args.out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create dir {}", parent.display()))?;
    }
    fs::write(&args.out, &bytes).with_context(|| format!("write {}", args.out.display()))?;

    let hist = cloud.histogram();
    println!("wrote {} ({} points, {} bytes)", args.out.display(), cloud.len(), bytes.len());
    for (cat, n) in Category::ALL.iter().zip(hist) {
        println!("  {:<10} {n}", cat.label());
    }
    Ok(())
}
