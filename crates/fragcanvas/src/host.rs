//! The engine's view of its host: frame scheduling and event subscriptions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::engine::ShaderCanvas;
use crate::gl::GlBackend;

/// Opaque id of a scheduled frame callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRequest(u64);

impl FrameRequest {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

/// Event families the engine listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventInterest {
    /// Press, move, release and leave on the canvas, mouse and touch.
    Pointer,
    DeviceOrientation,
    Resize,
}

/// Implemented by whatever embeds the canvas: a browser binding, a window
/// event loop, or [`FrameQueue`] for plain loops.
pub trait Host {
    /// Asks for one `tick` call on the next display refresh.
    fn request_frame(&mut self) -> FrameRequest;
    fn cancel_frame(&mut self, request: FrameRequest);
    /// Starts forwarding events of this family to `handle_input`.
    fn subscribe(&mut self, interest: EventInterest);
    fn unsubscribe(&mut self, interest: EventInterest);
}

/// A [`Host`] that only remembers what was asked of it. Pair it with
/// [`RenderLoop`], or poll [`FrameQueue::take_pending`] from an event loop.
#[derive(Debug, Default)]
pub struct FrameQueue {
    next_id: u64,
    pending: Option<FrameRequest>,
    interests: Vec<EventInterest>,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_pending(&mut self) -> Option<FrameRequest> {
        self.pending.take()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_subscribed(&self, interest: EventInterest) -> bool {
        self.interests.contains(&interest)
    }
}

impl Host for FrameQueue {
    fn request_frame(&mut self) -> FrameRequest {
        self.next_id += 1;
        let request = FrameRequest::new(self.next_id);
        self.pending = Some(request);
        request
    }

    fn cancel_frame(&mut self, request: FrameRequest) {
        if self.pending == Some(request) {
            self.pending = None;
        }
    }

    fn subscribe(&mut self, interest: EventInterest) {
        if !self.interests.contains(&interest) {
            self.interests.push(interest);
        }
    }

    fn unsubscribe(&mut self, interest: EventInterest) {
        self.interests.retain(|candidate| *candidate != interest);
    }
}

/// Cloneable stop flag shared between a render loop and whoever stops it.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_micros(16_667);

/// Blocking tick driver for hosts without a display-refresh callback.
#[derive(Debug, Clone)]
pub struct RenderLoop {
    token: CancellationToken,
    frame_interval: Duration,
}

impl RenderLoop {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            frame_interval: DEFAULT_FRAME_INTERVAL,
        }
    }

    pub fn with_frame_interval(mut self, frame_interval: Duration) -> Self {
        self.frame_interval = frame_interval;
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Ticks while the canvas keeps requesting frames. Cancellation tears
    /// the canvas down before returning; a canvas that stops on its own is
    /// left as is. Returns the number of ticks run.
    pub fn run<B: GlBackend>(&self, canvas: &mut ShaderCanvas<B, FrameQueue>) -> u64 {
        let started = Instant::now();
        let mut ticks = 0;
        loop {
            if self.token.is_cancelled() {
                tracing::debug!(ticks, "render loop cancelled");
                canvas.teardown();
                break;
            }
            if canvas.host_mut().take_pending().is_none() {
                tracing::debug!(ticks, "render loop idle, no frame requested");
                break;
            }

            let frame_start = Instant::now();
            canvas.tick(started.elapsed());
            ticks += 1;

            if let Some(remaining) = self.frame_interval.checked_sub(frame_start.elapsed()) {
                thread::sleep(remaining);
            }
        }
        ticks
    }
}
