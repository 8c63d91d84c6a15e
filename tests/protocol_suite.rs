use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use pointcloud_visualizer::cloud::{BuilderConfig, PointCloud};
use pointcloud_visualizer::config::ProjectionMode;
use pointcloud_visualizer::error::{ProtocolError, SceneError};
use pointcloud_visualizer::scene::{
    GenerationClient, GenerationRequest, MAX_HEADER_BYTES, RECORD_BYTES, SceneEvent, SceneHeader,
    SceneRequest, SceneWorker, decode_scene, encode_scene,
};

fn sample_cloud() -> PointCloud {
    PointCloud::new(
        vec![[1.0, 2.0, -3.0], [-0.5, 0.25, -8.0], [0.0, 0.0, -1.0]],
        vec![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.2, 0.4, 0.6]],
        vec![0, 4, 5],
    )
    .unwrap()
}

fn encoded() -> Vec<u8> {
    encode_scene(&SceneHeader::default(), &sample_cloud()).unwrap()
}

fn header_len(bytes: &[u8]) -> usize {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
}

// ── Wire format ─────────────────────────────────────────────────────────────

#[test]
fn decode_reads_what_encode_wrote() {
    let bytes = encoded();
    assert_eq!(bytes.len(), 4 + header_len(&bytes) + 3 * RECORD_BYTES);

    let decoded = decode_scene(&bytes).unwrap();
    assert_eq!(decoded.header.point_count, 3);
    let cloud = decoded.cloud;
    assert_eq!(cloud.positions(), sample_cloud().positions());
    assert_eq!(cloud.categories(), &[0, 4, 5]);
    // Colors survive 8-bit quantization.
    for (a, b) in cloud.colors().iter().zip(sample_cloud().colors()) {
        for k in 0..3 {
            assert!((a[k] - b[k]).abs() <= 0.5 / 255.0 + 1e-6);
        }
    }
}

#[test]
fn header_keeps_unknown_fields() {
    let json = br#"{"point_count":0,"labels":["subject"],"timings":{"depth_ms":12},"model":"x"}"#;
    let mut bytes = (json.len() as u32).to_le_bytes().to_vec();
    bytes.extend_from_slice(json);
    let decoded = decode_scene(&bytes).unwrap();
    assert!(decoded.cloud.is_empty());
    assert_eq!(decoded.header.labels, vec!["subject".to_string()]);
    assert!(decoded.header.timings.is_some());
    assert_eq!(decoded.header.extra.get("model").and_then(|v| v.as_str()), Some("x"));
}

#[test]
fn truncated_payloads_are_rejected() {
    assert!(matches!(decode_scene(&[1, 0]), Err(ProtocolError::Truncated { .. })));

    let bytes = encoded();
    let cut = &bytes[..bytes.len() - 7];
    assert!(matches!(decode_scene(cut), Err(ProtocolError::Truncated { .. })));

    let header_only = &bytes[..4 + header_len(&bytes) - 1];
    assert!(matches!(decode_scene(header_only), Err(ProtocolError::Truncated { .. })));
}

#[test]
fn oversized_header_is_rejected() {
    let mut bytes = ((MAX_HEADER_BYTES + 1) as u32).to_le_bytes().to_vec();
    bytes.extend_from_slice(b"{}");
    assert!(matches!(decode_scene(&bytes), Err(ProtocolError::HeaderTooLarge(_))));
}

#[test]
fn extra_records_are_a_count_mismatch() {
    let mut bytes = encoded();
    bytes.extend_from_slice(&[0u8; RECORD_BYTES]);
    match decode_scene(&bytes) {
        Err(ProtocolError::CountMismatch { declared, actual }) => {
            assert_eq!((declared, actual), (3, 4));
        }
        other => panic!("expected count mismatch, got {other:?}"),
    }
}

#[test]
fn out_of_range_category_is_rejected() {
    let mut bytes = encoded();
    let second_record = 4 + header_len(&bytes) + RECORD_BYTES;
    bytes[second_record + 15] = 6;
    match decode_scene(&bytes) {
        Err(ProtocolError::InvalidCategory { index, id, max }) => {
            assert_eq!((index, id, max), (1, 6, 5));
        }
        other => panic!("expected invalid category, got {other:?}"),
    }
}

fn header_only(json: &str) -> Vec<u8> {
    let mut bytes = (json.len() as u32).to_le_bytes().to_vec();
    bytes.extend_from_slice(json.as_bytes());
    bytes
}

#[test]
fn absurd_point_count_is_truncation_not_overflow() {
    for count in [usize::MAX, usize::MAX / 4, usize::MAX / RECORD_BYTES + 1] {
        let bytes = header_only(&format!(r#"{{"point_count":{count}}}"#));
        match decode_scene(&bytes) {
            Err(ProtocolError::Truncated { needed, got }) => {
                assert_eq!(got, bytes.len());
                assert!(needed > got);
            }
            other => panic!("count {count}: expected truncation, got {other:?}"),
        }
    }
}

#[test]
fn malformed_header_json_is_rejected() {
    let json = b"{not json";
    let mut bytes = (json.len() as u32).to_le_bytes().to_vec();
    bytes.extend_from_slice(json);
    assert!(matches!(decode_scene(&bytes), Err(ProtocolError::InvalidHeader(_))));
}

// ── Generation client ───────────────────────────────────────────────────────

/// One-shot HTTP responder on a random local port.
fn serve_once(status: &'static str, body: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                let len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + len {
                    break;
                }
            }
        }
        let head = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        stream.write_all(head.as_bytes()).unwrap();
        stream.write_all(&body).unwrap();
    });
    format!("http://{addr}")
}

#[test]
fn client_decodes_server_payload() {
    let url = serve_once("200 OK", encoded());
    let client = GenerationClient::new(&url, Duration::from_secs(5));
    assert_eq!(client.endpoint(), format!("{url}/generate"));
    let scene = client
        .generate(&GenerationRequest::new("a forest", 3, ProjectionMode::Spherical, 1000))
        .unwrap();
    assert_eq!(scene.cloud.len(), 3);
}

#[test]
fn client_reports_server_errors_as_transport() {
    let url = serve_once("500 Internal Server Error", b"boom".to_vec());
    let client = GenerationClient::new(&url, Duration::from_secs(5));
    let err = client
        .generate(&GenerationRequest::new("x", 0, ProjectionMode::Planar, 10))
        .unwrap_err();
    assert!(matches!(err, SceneError::Transport(_)), "{err}");
}

#[test]
fn client_rejects_garbage_body() {
    let url = serve_once("200 OK", vec![9, 0, 0, 0, b'{']);
    let client = GenerationClient::new(&url, Duration::from_secs(5));
    let err = client
        .generate(&GenerationRequest::new("x", 0, ProjectionMode::Planar, 10))
        .unwrap_err();
    assert!(matches!(err, SceneError::Protocol(ProtocolError::Truncated { .. })), "{err}");
}

// ── Scene worker ────────────────────────────────────────────────────────────

fn small_builder() -> BuilderConfig {
    BuilderConfig::default().with_target(2_000)
}

#[test]
fn newest_request_wins() {
    let mut worker = SceneWorker::spawn(None);
    let first = worker.request(SceneRequest::Procedural { width: 96, height: 64 }, small_builder());
    let second =
        worker.request(SceneRequest::Procedural { width: 64, height: 40 }, small_builder());
    assert!(second > first);
    assert_eq!(worker.latest_id(), second);
    assert!(worker.in_flight());

    match worker.wait(Duration::from_secs(20)) {
        Some(SceneEvent::Ready(ready)) => {
            assert_eq!(ready.id, second);
            assert!(!ready.cloud.is_empty());
            assert!(ready.depth.is_some());
        }
        other => panic!("expected the second scene, got {other:?}"),
    }
    assert!(!worker.in_flight());
    assert!(worker.poll().is_none());
}

#[test]
fn remote_request_without_server_fails_softly() {
    let mut worker = SceneWorker::spawn(None);
    let id = worker.request(
        SceneRequest::Remote {
            prompt: "city".to_string(),
            seed: 1,
        },
        small_builder(),
    );
    match worker.wait(Duration::from_secs(10)) {
        Some(SceneEvent::Failed { id: got, error, .. }) => {
            assert_eq!(got, id);
            assert!(matches!(error, SceneError::Transport(_)));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[test]
fn scene_file_loads_through_the_worker() {
    let path = std::env::temp_dir().join(format!("pcv-scene-{}.bin", std::process::id()));
    std::fs::write(&path, encoded()).unwrap();
    let mut worker = SceneWorker::spawn(None);
    worker.request(SceneRequest::File(path.clone()), small_builder());
    let event = worker.wait(Duration::from_secs(10));
    let _ = std::fs::remove_file(&path);
    match event {
        Some(SceneEvent::Ready(ready)) => {
            assert_eq!(ready.cloud.len(), 3);
            assert!(ready.depth.is_none());
        }
        other => panic!("expected ready scene, got {other:?}"),
    }
}

#[test]
fn missing_image_fails_without_panicking() {
    let mut worker = SceneWorker::spawn(None);
    worker.request(
        SceneRequest::Image {
            image: "/nonexistent/pcv/image.png".into(),
            depth: None,
            segmentation: None,
        },
        small_builder(),
    );
    assert!(matches!(
        worker.wait(Duration::from_secs(10)),
        Some(SceneEvent::Failed { .. })
    ));
}

#[test]
fn worker_survives_a_hostile_scene_file() {
    let path = std::env::temp_dir().join(format!("pcv-hostile-{}.bin", std::process::id()));
    let hostile = header_only(&format!(r#"{{"point_count":{}}}"#, usize::MAX / 4));
    std::fs::write(&path, hostile).unwrap();
    let mut worker = SceneWorker::spawn(None);
    worker.request(SceneRequest::File(path.clone()), small_builder());
    let first = worker.wait(Duration::from_secs(10));
    let _ = std::fs::remove_file(&path);
    assert!(
        matches!(
            first,
            Some(SceneEvent::Failed {
                error: SceneError::Protocol(ProtocolError::Truncated { .. }),
                ..
            })
        ),
        "{first:?}"
    );

    let id = worker.request(SceneRequest::Procedural { width: 32, height: 20 }, small_builder());
    match worker.wait(Duration::from_secs(20)) {
        Some(SceneEvent::Ready(ready)) => assert_eq!(ready.id, id),
        other => panic!("worker should still serve requests, got {other:?}"),
    }
}
