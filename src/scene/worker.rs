use super::client::{GenerationClient, GenerationRequest};
use super::protocol::decode_scene;
use crate::cloud::{
    BuilderConfig, DepthMap, DepthSource, FileDepthSource, PointCloud, PointCloudBuilder,
    load_rgb_image, procedural_scene,
};
use crate::error::SceneError;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub enum SceneRequest {
    Image {
        image: PathBuf,
        depth: Option<PathBuf>,
        segmentation: Option<PathBuf>,
    },
    File(PathBuf),
    Remote {
        prompt: String,
        seed: u32,
    },
    Procedural {
        width: usize,
        height: usize,
    },
}

impl SceneRequest {
    pub fn label(&self) -> String {
        match self {
            Self::Image { image, .. } => format!("image {}", file_name(image)),
            Self::File(path) => format!("scene {}", file_name(path)),
            Self::Remote { prompt, .. } => format!("remote \"{prompt}\""),
            Self::Procedural { .. } => "procedural".to_string(),
        }
    }
}

fn file_name(p: &std::path::Path) -> String {
    p.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| p.display().to_string())
}

#[derive(Debug, Clone)]
pub struct SceneReady {
    pub id: u64,
    pub label: String,
    pub cloud: Arc<PointCloud>,
    /// Depth the cloud was projected from, with its arcs, when known.
    pub depth: Option<(Arc<DepthMap>, f32, f32)>,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub enum SceneEvent {
    Ready(SceneReady),
    Failed { id: u64, label: String, error: SceneError },
}

struct Job {
    id: u64,
    request: SceneRequest,
    builder: BuilderConfig,
}

/// Background scene construction. Newest request wins: stale queued jobs are
/// skipped and stale results are dropped on receipt.
pub struct SceneWorker {
    jobs: Option<Sender<Job>>,
    events: Receiver<SceneEvent>,
    /// Lets `request` report a dead worker through the normal event path.
    local_events: Sender<SceneEvent>,
    handle: Option<thread::JoinHandle<()>>,
    next_id: u64,
    latest_id: u64,
    pending: bool,
}

impl SceneWorker {
    pub fn spawn(client: Option<GenerationClient>) -> Self {
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job>();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let local_events = event_tx.clone();
        let handle = thread::Builder::new()
            .name("scene-worker".to_string())
            .spawn(move || worker_loop(job_rx, event_tx, client))
            .map_err(|e| warn!(error = %e, "scene worker failed to start"))
            .ok();
        Self {
            jobs: Some(job_tx),
            events: event_rx,
            local_events,
            handle,
            next_id: 0,
            latest_id: 0,
            pending: false,
        }
    }

    /// Queues a request and returns its id. Any older request is superseded.
    pub fn request(&mut self, request: SceneRequest, builder: BuilderConfig) -> u64 {
        self.next_id += 1;
        self.latest_id = self.next_id;
        self.pending = true;
        let id = self.next_id;
        let label = request.label();
        info!(id, %label, "scene requested");
        let sent = match &self.jobs {
            Some(tx) => tx
                .send(Job {
                    id,
                    request,
                    builder,
                })
                .is_ok(),
            None => false,
        };
        if !sent {
            warn!(id, %label, "scene worker is gone; request dropped");
            let _ = self.local_events.send(SceneEvent::Failed {
                id,
                label,
                error: SceneError::WorkerGone,
            });
        }
        id
    }

    pub fn latest_id(&self) -> u64 {
        self.latest_id
    }

    pub fn in_flight(&self) -> bool {
        self.pending
    }

    /// Next event for the newest request, discarding superseded ones.
    pub fn poll(&mut self) -> Option<SceneEvent> {
        loop {
            let event = match self.events.try_recv() {
                Ok(e) => e,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
            };
            let id = match &event {
                SceneEvent::Ready(r) => r.id,
                SceneEvent::Failed { id, .. } => *id,
            };
            if id < self.latest_id {
                info!(id, latest = self.latest_id, "dropping superseded scene result");
                continue;
            }
            self.pending = false;
            return Some(event);
        }
    }

    /// Blocks up to `timeout` for the newest request's outcome.
    pub fn wait(&mut self, timeout: Duration) -> Option<SceneEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(e) = self.poll() {
                return Some(e);
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Drop for SceneWorker {
    fn drop(&mut self) {
        // Closing the job channel ends the worker loop after its current job.
        self.jobs.take();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

fn worker_loop(
    jobs: Receiver<Job>,
    events: Sender<SceneEvent>,
    client: Option<GenerationClient>,
) {
    while let Ok(mut job) = jobs.recv() {
        // Skip straight to the newest queued job.
        while let Ok(newer) = jobs.try_recv() {
            info!(id = job.id, superseded_by = newer.id, "skipping superseded scene job");
            job = newer;
        }

        let started = Instant::now();
        let label = job.request.label();
        let event = match run_job(&job, client.as_ref()) {
            Ok((cloud, depth)) => {
                info!(
                    id = job.id,
                    %label,
                    points = cloud.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "scene ready"
                );
                SceneEvent::Ready(SceneReady {
                    id: job.id,
                    label,
                    cloud: Arc::new(cloud),
                    depth,
                    elapsed: started.elapsed(),
                })
            }
            Err(error) => {
                warn!(id = job.id, %label, %error, "scene request failed");
                SceneEvent::Failed {
                    id: job.id,
                    label,
                    error,
                }
            }
        };
        if events.send(event).is_err() {
            return;
        }
    }
}

type JobOutput = (PointCloud, Option<(Arc<DepthMap>, f32, f32)>);

fn run_job(job: &Job, client: Option<&GenerationClient>) -> Result<JobOutput, SceneError> {
    let builder = PointCloudBuilder::new(job.builder);
    match &job.request {
        SceneRequest::Image {
            image,
            depth,
            segmentation,
        } => {
            let img = load_rgb_image(image)?;
            let source = FileDepthSource {
                depth: depth.clone(),
                segmentation: segmentation.clone(),
            };
            let estimate = source.estimate(&img)?;
            let depth = estimate
                .depth
                .unwrap_or_else(|| DepthMap::radial(img.width(), img.height()));
            let cloud = builder.build(&img, Some(&depth), estimate.categories.as_ref());
            let (h_arc, v_arc) = job.builder.arcs(img.width(), img.height());
            Ok((cloud, Some((Arc::new(depth), h_arc, v_arc))))
        }
        SceneRequest::Procedural { width, height } => {
            let (img, depth) = procedural_scene(*width, *height);
            let cloud = builder.build(&img, Some(&depth), None);
            let (h_arc, v_arc) = job.builder.arcs(img.width(), img.height());
            Ok((cloud, Some((Arc::new(depth), h_arc, v_arc))))
        }
        SceneRequest::File(path) => {
            let bytes = std::fs::read(path)?;
            Ok((decode_scene(&bytes)?.cloud, None))
        }
        SceneRequest::Remote { prompt, seed } => {
            let client = client
                .ok_or_else(|| SceneError::Transport("no --server configured".to_string()))?;
            let request = GenerationRequest::new(
                prompt,
                *seed,
                job.builder.projection,
                job.builder.target_count(job.builder.reference_pixels),
            );
            Ok((client.generate(&request)?.cloud, None))
        }
    }
}
