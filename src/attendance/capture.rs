use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Front,
    Rear,
}

impl Facing {
    /// Also accepts the browser's `user` / `environment` facing modes.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "front" | "user" => Some(Facing::Front),
            "rear" | "back" | "environment" => Some(Facing::Rear),
            _ => None,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Facing::Front => Facing::Rear,
            Facing::Rear => Facing::Front,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Facing::Front => "front",
            Facing::Rear => "rear",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CaptureError {
    #[error("no {} camera available", .0.as_str())]
    NoDevice(Facing),

    #[error("camera permission denied")]
    PermissionDenied,

    #[error("camera stream closed")]
    Closed,
}

#[async_trait]
pub trait CaptureSource: Send + Sync {
    async fn acquire(&self, facing: Facing) -> Result<Box<dyn CaptureStream>, CaptureError>;
}

/// An acquired camera. Dropping the stream releases the device.
#[async_trait]
pub trait CaptureStream: Send {
    fn facing(&self) -> Facing;

    /// Waits for the next frame (encoded image bytes).
    async fn next_frame(&mut self) -> Result<Vec<u8>, CaptureError>;
}

type FrameSlot = Option<Arc<Vec<u8>>>;

#[derive(Default)]
struct FeedState {
    denied: bool,
    channels: HashMap<Facing, watch::Sender<FrameSlot>>,
    live: usize,
}

/// Capture source fed by the shell: it announces which cameras exist and
/// pushes frames; scanners acquire a facing and receive the latest frame.
#[derive(Clone, Default)]
pub struct PushFeed {
    state: Arc<Mutex<FeedState>>,
}

impl PushFeed {
    pub fn new() -> Self {
        PushFeed::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Replaces the announced camera set. Streams on a withdrawn camera close.
    pub fn announce(&self, facings: &[Facing], denied: bool) {
        let mut st = self.lock();
        st.denied = denied;
        let keep: HashSet<Facing> = if denied {
            HashSet::new()
        } else {
            facings.iter().copied().collect()
        };
        st.channels.retain(|f, _| keep.contains(f));
        for f in keep {
            st.channels.entry(f).or_insert_with(|| watch::channel(None).0);
        }
        debug!(?facings, denied, "capture devices announced");
    }

    /// Publishes a frame; returns whether any stream is listening.
    pub fn publish(&self, facing: Facing, frame: Vec<u8>) -> Result<bool, CaptureError> {
        let st = self.lock();
        if st.denied {
            return Err(CaptureError::PermissionDenied);
        }
        let tx = st.channels.get(&facing).ok_or(CaptureError::NoDevice(facing))?;
        tx.send_replace(Some(Arc::new(frame)));
        Ok(tx.receiver_count() > 0)
    }

    pub fn live_streams(&self) -> usize {
        self.lock().live
    }

    pub fn announced(&self) -> Vec<Facing> {
        let mut v: Vec<Facing> = self.lock().channels.keys().copied().collect();
        v.sort_by_key(|f| f.as_str());
        v
    }
}

#[async_trait]
impl CaptureSource for PushFeed {
    async fn acquire(&self, facing: Facing) -> Result<Box<dyn CaptureStream>, CaptureError> {
        let mut st = self.lock();
        if st.denied {
            return Err(CaptureError::PermissionDenied);
        }
        let tx = st.channels.get(&facing).ok_or(CaptureError::NoDevice(facing))?;
        let mut rx = tx.subscribe();
        rx.borrow_and_update();
        st.live += 1;
        Ok(Box::new(PushStream {
            facing,
            rx,
            state: self.state.clone(),
        }))
    }
}

struct PushStream {
    facing: Facing,
    rx: watch::Receiver<FrameSlot>,
    state: Arc<Mutex<FeedState>>,
}

#[async_trait]
impl CaptureStream for PushStream {
    fn facing(&self) -> Facing {
        self.facing
    }

    async fn next_frame(&mut self) -> Result<Vec<u8>, CaptureError> {
        loop {
            self.rx.changed().await.map_err(|_| CaptureError::Closed)?;
            let frame = self.rx.borrow_and_update().clone();
            if let Some(frame) = frame {
                return Ok(frame.as_ref().clone());
            }
        }
    }
}

impl Drop for PushStream {
    fn drop(&mut self) {
        let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
        st.live = st.live.saturating_sub(1);
    }
}
