//! Live preview analysis loop with back-pressure.
//!
//! Frames arrive faster than the detector can handle them. [`FrameGate`]
//! admits at most one frame at a time and no more often than the configured
//! minimum interval; everything else is dropped on the spot. Every
//! [`PreviewFrame`] gives its buffer back to the producer when dropped, so
//! success, failure and skip paths all release it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use image::DynamicImage;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::config::{PipelineConfig, PreviewConfig};
use crate::detector::MeshDetector;
use crate::stabilizer::{LandmarkStabilizer, StabilizedFrame};
use crate::transform::Rotation;
use crate::types::{DetectionFrame, ImageSize};

/// Why a frame was not analysed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The previous frame's detection is still running.
    InFlight,
    /// Less than the minimum interval since the last admitted frame.
    Throttled,
}

/// Admission control for preview frames.
#[derive(Debug)]
pub struct FrameGate {
    in_flight: AtomicBool,
    last_admitted: Mutex<Option<Instant>>,
    min_interval: Duration,
    dropped: AtomicU64,
}

impl FrameGate {
    pub fn new(min_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            in_flight: AtomicBool::new(false),
            last_admitted: Mutex::new(None),
            min_interval,
            dropped: AtomicU64::new(0),
        })
    }

    pub fn try_acquire(self: &Arc<Self>) -> Result<FramePermit, DropReason> {
        self.try_acquire_at(Instant::now())
    }

    /// Admit a frame arriving at `now`. The returned permit keeps the gate
    /// busy until it is dropped.
    pub fn try_acquire_at(self: &Arc<Self>, now: Instant) -> Result<FramePermit, DropReason> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(DropReason::InFlight);
        }

        let mut last = match self.last_admitted.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(prev) = *last {
            if now.saturating_duration_since(prev) < self.min_interval {
                drop(last);
                self.in_flight.store(false, Ordering::Release);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return Err(DropReason::Throttled);
            }
        }
        *last = Some(now);
        Ok(FramePermit {
            gate: Arc::clone(self),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Frames rejected so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Held while one frame is being analysed.
#[must_use = "the gate is released as soon as the permit is dropped"]
#[derive(Debug)]
pub struct FramePermit {
    gate: Arc<FrameGate>,
}

impl Drop for FramePermit {
    fn drop(&mut self) {
        self.gate.in_flight.store(false, Ordering::Release);
    }
}

/// A camera frame on loan from its producer.
pub struct PreviewFrame {
    pub image: DynamicImage,
    pub rotation: Rotation,
    pub timestamp_ms: u64,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl PreviewFrame {
    pub fn new(image: DynamicImage, rotation: Rotation, timestamp_ms: u64) -> Self {
        Self {
            image,
            rotation,
            timestamp_ms,
            release: None,
        }
    }

    /// Run `release` when the frame is dropped, returning the buffer to its pool.
    pub fn with_release<F>(mut self, release: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        self.release = Some(Box::new(release));
        self
    }

    pub fn size(&self) -> ImageSize {
        ImageSize::new(self.image.width(), self.image.height())
    }
}

impl Drop for PreviewFrame {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for PreviewFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewFrame")
            .field("size", &self.size())
            .field("rotation", &self.rotation)
            .field("timestamp_ms", &self.timestamp_ms)
            .finish()
    }
}

/// Most recent detection frames, oldest first.
#[derive(Debug, Clone)]
pub struct FrameHistory {
    frames: VecDeque<DetectionFrame>,
    capacity: usize,
}

impl FrameHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, frame: DetectionFrame) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn latest(&self) -> Option<&DetectionFrame> {
        self.frames.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DetectionFrame> {
        self.frames.iter()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// At least two frames, all with a face, and the face box centre moving
    /// less than a tenth of the face width between consecutive frames.
    pub fn is_temporally_stable(&self) -> bool {
        if self.frames.len() < 2 {
            return false;
        }
        let mut boxes = Vec::with_capacity(self.frames.len());
        for frame in &self.frames {
            match frame.primary_face() {
                Some(face) => boxes.push(face.bounding_box),
                None => return false,
            }
        }
        boxes.windows(2).all(|pair| {
            let drift = pair[0].center().distance(&pair[1].center());
            drift < 0.1 * pair[1].width.max(pair[0].width)
        })
    }
}

/// What happened to one submitted frame.
#[derive(Debug, Clone, PartialEq)]
pub enum PreviewResult {
    Dropped(DropReason),
    NoFace,
    Failed(String),
    TimedOut,
    /// A clear happened while the frame was in detection; its result was discarded.
    Stale,
    Tracked(StabilizedFrame),
}

struct SessionState {
    generation: u64,
    stabilizer: LandmarkStabilizer,
    history: FrameHistory,
}

/// One live preview: gate, stabilizer and frame history.
///
/// All state changes happen under one async mutex, and a generation counter
/// bumped by [`PreviewSession::clear`] discards results of detections that
/// started before the clear.
#[derive(Clone)]
pub struct PreviewSession {
    mesh: Arc<dyn MeshDetector>,
    gate: Arc<FrameGate>,
    state: Arc<AsyncMutex<SessionState>>,
    config: PreviewConfig,
}

impl PreviewSession {
    pub fn new(mesh: Arc<dyn MeshDetector>, config: &PipelineConfig) -> Self {
        let preview = config.preview.clone();
        Self {
            mesh,
            gate: FrameGate::new(Duration::from_millis(preview.min_frame_interval_ms)),
            state: Arc::new(AsyncMutex::new(SessionState {
                generation: 0,
                stabilizer: LandmarkStabilizer::new(config.stabilizer.clone()),
                history: FrameHistory::new(preview.history_size),
            })),
            config: preview,
        }
    }

    pub fn gate(&self) -> &Arc<FrameGate> {
        &self.gate
    }

    /// Analyse a frame, or drop it if the gate is closed. The frame is
    /// released before this returns on every path.
    pub async fn submit(&self, frame: PreviewFrame) -> PreviewResult {
        let permit = match self.gate.try_acquire() {
            Ok(permit) => permit,
            Err(reason) => {
                debug!(?reason, timestamp_ms = frame.timestamp_ms, "preview frame dropped");
                return PreviewResult::Dropped(reason);
            }
        };

        let generation = self.state.lock().await.generation;
        let limit = Duration::from_millis(self.config.detection_timeout_ms);
        let detection =
            tokio::time::timeout(limit, self.mesh.detect(&frame.image, frame.rotation)).await;
        let (timestamp_ms, image_size) = (frame.timestamp_ms, frame.size());
        drop(frame);

        let faces = match detection {
            Ok(Ok(faces)) => faces,
            Ok(Err(e)) => {
                warn!(error = %e, "preview detection failed");
                return PreviewResult::Failed(e.to_string());
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.config.detection_timeout_ms,
                    "preview detection timed out"
                );
                return PreviewResult::TimedOut;
            }
        };

        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!(
                started = generation,
                current = state.generation,
                "discarding stale preview result"
            );
            return PreviewResult::Stale;
        }
        let frame = DetectionFrame::new(timestamp_ms, faces, image_size);
        let stabilized = state.stabilizer.stabilize_frame(&frame);
        state.history.push(frame);
        drop(state);
        drop(permit);

        match stabilized {
            Some(s) => PreviewResult::Tracked(s),
            None => PreviewResult::NoFace,
        }
    }

    /// Forget all history; detections already running will be discarded.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.generation += 1;
        state.stabilizer.clear();
        state.history.clear();
        debug!(generation = state.generation, "preview session cleared");
    }

    pub async fn history_len(&self) -> usize {
        self.state.lock().await.history.len()
    }

    pub async fn is_temporally_stable(&self) -> bool {
        self.state.lock().await.history.is_temporally_stable()
    }

    /// Latest frame in the history, if any.
    pub async fn latest(&self) -> Option<DetectionFrame> {
        self.state.lock().await.history.latest().cloned()
    }
}
