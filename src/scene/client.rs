use super::protocol::{DecodedScene, decode_scene};
use crate::config::ProjectionMode;
use crate::error::SceneError;
use serde::Serialize;
use std::io::Read;
use std::time::Duration;
use tracing::debug;

/// Upper bound on a response body (header + records).
const MAX_RESPONSE_BYTES: u64 = 256 << 20;

#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub seed: u32,
    pub projection: &'static str,
    pub target_points: usize,
}

impl GenerationRequest {
    pub fn new(prompt: &str, seed: u32, projection: ProjectionMode, target_points: usize) -> Self {
        Self {
            prompt: prompt.to_string(),
            seed,
            projection: projection.label(),
            target_points,
        }
    }
}

/// Blocking client for the scene-generation server. Runs on the scene worker thread.
#[derive(Clone)]
pub struct GenerationClient {
    base_url: String,
    agent: ureq::Agent,
}

impl GenerationClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/generate", self.base_url)
    }

    pub fn generate(&self, request: &GenerationRequest) -> Result<DecodedScene, SceneError> {
        let url = self.endpoint();
        debug!(%url, prompt = %request.prompt, "requesting scene");
        let response = self
            .agent
            .post(&url)
            .set("Accept", "application/octet-stream")
            .send_json(request)
            .map_err(|e| SceneError::Transport(e.to_string()))?;

        let mut body = Vec::new();
        response
            .into_reader()
            .take(MAX_RESPONSE_BYTES)
            .read_to_end(&mut body)?;
        Ok(decode_scene(&body)?)
    }
}
