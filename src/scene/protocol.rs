//! Binary scene payload:
//! `[u32 LE header length][UTF-8 JSON header][point_count x 20-byte records]`.
//!
//! Record: 3 x f32 LE position, 3 x u8 colour, 1 x u8 category id, 4 pad bytes.

use crate::cloud::PointCloud;
use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};

pub const RECORD_BYTES: usize = 20;
pub const MAX_HEADER_BYTES: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SceneHeader {
    pub point_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    /// Server-reported stage timings in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timings: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct DecodedScene {
    pub header: SceneHeader,
    pub cloud: PointCloud,
}

fn take<'a>(bytes: &'a [u8], at: usize, len: usize) -> Result<&'a [u8], ProtocolError> {
    bytes.get(at..at + len).ok_or(ProtocolError::Truncated {
        needed: at + len,
        got: bytes.len(),
    })
}

pub fn decode_scene(bytes: &[u8]) -> Result<DecodedScene, ProtocolError> {
    let len_bytes = take(bytes, 0, 4)?;
    let header_len =
        u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
    if header_len > MAX_HEADER_BYTES {
        return Err(ProtocolError::HeaderTooLarge(header_len));
    }
    let header: SceneHeader = serde_json::from_slice(take(bytes, 4, header_len)?)?;

    let body_at = 4 + header_len;
    let body = &bytes[body_at.min(bytes.len())..];
    let available = body.len() / RECORD_BYTES;
    let n = header.point_count;
    if available < n {
        // The declared count comes off the wire and may be absurd.
        let needed = n
            .checked_mul(RECORD_BYTES)
            .and_then(|b| b.checked_add(body_at))
            .unwrap_or(usize::MAX);
        return Err(ProtocolError::Truncated {
            needed,
            got: bytes.len(),
        });
    }
    if body.len() != n * RECORD_BYTES {
        return Err(ProtocolError::CountMismatch {
            declared: n,
            actual: available,
        });
    }

    let mut positions = Vec::with_capacity(n);
    let mut colors = Vec::with_capacity(n);
    let mut categories = Vec::with_capacity(n);
    for rec in body.chunks_exact(RECORD_BYTES) {
        let f = |o: usize| f32::from_le_bytes([rec[o], rec[o + 1], rec[o + 2], rec[o + 3]]);
        positions.push([f(0), f(4), f(8)]);
        colors.push([
            rec[12] as f32 / 255.0,
            rec[13] as f32 / 255.0,
            rec[14] as f32 / 255.0,
        ]);
        categories.push(rec[15]);
    }

    Ok(DecodedScene {
        header,
        cloud: PointCloud::new(positions, colors, categories)?,
    })
}

/// Inverse of [`decode_scene`]. `point_count` is taken from the cloud.
pub fn encode_scene(header: &SceneHeader, cloud: &PointCloud) -> Result<Vec<u8>, ProtocolError> {
    let mut header = header.clone();
    header.point_count = cloud.len();
    let json = serde_json::to_vec(&header)?;
    if json.len() > MAX_HEADER_BYTES {
        return Err(ProtocolError::HeaderTooLarge(json.len()));
    }

    let mut out = Vec::with_capacity(4 + json.len() + cloud.len() * RECORD_BYTES);
    out.extend_from_slice(&(json.len() as u32).to_le_bytes());
    out.extend_from_slice(&json);
    for ((p, c), cat) in cloud
        .positions()
        .iter()
        .zip(cloud.colors())
        .zip(cloud.categories())
    {
        for v in p {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for v in c {
            out.push((v.clamp(0.0, 1.0) * 255.0).round() as u8);
        }
        out.push(*cat);
        out.extend_from_slice(&[0u8; 4]);
    }
    Ok(out)
}
