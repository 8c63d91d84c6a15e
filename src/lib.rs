pub mod analysis;
pub mod app;
pub mod audio;
pub mod camera;
pub mod cloud;
pub mod config;
pub mod error;
pub mod physics;
pub mod post;
pub mod render;
pub mod scene;
pub mod terminal;
pub mod visual;
