//! Scene acquisition off the frame loop: wire format, server client, worker.

mod client;
mod protocol;
mod worker;

pub use client::{GenerationClient, GenerationRequest};
pub use protocol::{
    DecodedScene, MAX_HEADER_BYTES, RECORD_BYTES, SceneHeader, decode_scene, encode_scene,
};
pub use worker::{SceneEvent, SceneReady, SceneRequest, SceneWorker};
