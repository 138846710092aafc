//! Per-tick numeric state: clock, frame counter, smoothed pointer, date.

use std::time::Duration;

use chrono::{DateTime, Datelike, TimeZone, Timelike};

use crate::error::CanvasError;

/// Fullscreen quad as a triangle strip, `vec3` per vertex.
pub const QUAD_VERTICES: [f32; 12] = [
    1.0, 1.0, 0.0, //
    -1.0, 1.0, 0.0, //
    1.0, -1.0, 0.0, //
    -1.0, -1.0, 0.0,
];

pub const QUAD_VERTEX_COUNT: i32 = 4;

/// Pointer in canvas pixels, bottom-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PointerState {
    /// Position bound as `iMouse.xy`.
    pub x: f32,
    pub y: f32,
    /// Latest raw position the smoothed one moves toward.
    pub target_x: f32,
    pub target_y: f32,
    /// Where the active press started; zero when released.
    pub press_x: f32,
    pub press_y: f32,
    pub pressed: bool,
}

impl PointerState {
    pub fn as_uniform(&self) -> [f32; 4] {
        [self.x, self.y, self.press_x, self.press_y]
    }
}

/// Values to bind for one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameValues {
    pub time: f32,
    pub time_delta: f32,
    pub frame: i32,
    pub mouse: [f32; 4],
}

/// Clamps a pointer smoothing factor into `0..=1`, returning the warning to
/// report when it had to.
pub fn clamp_smoothing(requested: f32) -> (f32, Option<CanvasError>) {
    let clamped = if requested.is_nan() {
        1.0
    } else {
        requested.clamp(0.0, 1.0)
    };
    if clamped == requested {
        (clamped, None)
    } else {
        (
            clamped,
            Some(CanvasError::InvalidSmoothing { requested, clamped }),
        )
    }
}

fn lerp(from: f32, to: f32, factor: f32) -> f32 {
    from * (1.0 - factor) + to * factor
}

#[derive(Debug, Clone)]
pub struct FrameState {
    elapsed: f64,
    last_timestamp: Option<Duration>,
    frame: i32,
    smoothing: f32,
    pointer: PointerState,
}

impl FrameState {
    /// `smoothing` must already be within `0..=1`; see [`clamp_smoothing`].
    pub fn new(smoothing: f32) -> Self {
        Self {
            elapsed: 0.0,
            last_timestamp: None,
            frame: 0,
            smoothing,
            pointer: PointerState::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn starting_at(mut self, frame: i32) -> Self {
        self.frame = frame;
        self
    }

    pub fn smoothing(&self) -> f32 {
        self.smoothing
    }

    pub fn pointer(&self) -> &PointerState {
        &self.pointer
    }

    pub fn frame(&self) -> i32 {
        self.frame
    }

    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    fn tracks_immediately(&self) -> bool {
        self.smoothing >= 1.0
    }

    pub fn pointer_down(&mut self, x: f32, y: f32) {
        self.pointer.pressed = true;
        self.pointer.press_x = x;
        self.pointer.press_y = y;
        self.pointer.target_x = x;
        self.pointer.target_y = y;
        if self.tracks_immediately() {
            self.pointer.x = x;
            self.pointer.y = y;
        }
    }

    pub fn pointer_move(&mut self, x: f32, y: f32) {
        self.pointer.target_x = x;
        self.pointer.target_y = y;
        if self.tracks_immediately() {
            self.pointer.x = x;
            self.pointer.y = y;
        }
    }

    /// Release or leave. The position stays where it was.
    pub fn pointer_up(&mut self) {
        self.pointer.pressed = false;
        self.pointer.press_x = 0.0;
        self.pointer.press_y = 0.0;
    }

    /// Advances to `timestamp` (host clock, any origin) and returns the
    /// values to bind this tick. The first tick and any tick whose timestamp
    /// went backwards contribute no elapsed time; the frame counter is read
    /// before it is incremented.
    pub fn advance(&mut self, timestamp: Duration) -> FrameValues {
        let delta = match self.last_timestamp {
            Some(previous) => timestamp
                .checked_sub(previous)
                .map(|delta| delta.as_secs_f64())
                .unwrap_or(0.0),
            None => 0.0,
        };
        self.last_timestamp = Some(timestamp);
        self.elapsed += delta;

        if !self.tracks_immediately() {
            self.pointer.x = lerp(self.pointer.x, self.pointer.target_x, self.smoothing);
            self.pointer.y = lerp(self.pointer.y, self.pointer.target_y, self.smoothing);
        }

        let frame = self.frame;
        self.frame = self.frame.wrapping_add(1);

        FrameValues {
            time: self.elapsed as f32,
            time_delta: delta as f32,
            frame,
            mouse: self.pointer.as_uniform(),
        }
    }
}

/// `iDate`: year, 1-based month, day, seconds since midnight with
/// millisecond fraction.
pub fn date_components<Tz: TimeZone>(now: &DateTime<Tz>) -> [f32; 4] {
    let millis = now.timestamp_subsec_millis().min(999);
    let seconds = now.hour() * 3600 + now.minute() * 60 + now.second();
    [
        now.year() as f32,
        now.month() as f32,
        now.day() as f32,
        seconds as f32 + millis as f32 * 0.001,
    ]
}

pub fn local_date() -> [f32; 4] {
    date_components(&chrono::Local::now())
}
