use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cfg = pointcloud_visualizer::config::Config::parse();
    if cfg.list_devices {
        pointcloud_visualizer::audio::list_devices()?;
        return Ok(());
    }

    pointcloud_visualizer::app::run(cfg)
}
