//! Host input normalized into engine events, and the conversion of pointer
//! positions into canvas pixels with a bottom-left origin.

/// The canvas's bounding box in client (viewport) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CanvasRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl CanvasRect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// A canvas filling its window from the origin.
    pub fn sized(width: f64, height: f64) -> Self {
        Self::new(0.0, 0.0, width, height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchPoint {
    pub id: u64,
    pub client_x: f64,
    pub client_y: f64,
}

/// Pointer coordinates as the host reports them.
#[derive(Debug, Clone, PartialEq)]
pub enum PointerPosition {
    Mouse { client_x: f64, client_y: f64 },
    /// Touch points that changed with this event; the first one is used.
    Touch(Vec<TouchPoint>),
}

impl PointerPosition {
    pub fn mouse(client_x: f64, client_y: f64) -> Self {
        PointerPosition::Mouse { client_x, client_y }
    }

    fn client(&self) -> Option<(f64, f64)> {
        match self {
            PointerPosition::Mouse { client_x, client_y } => Some((*client_x, *client_y)),
            PointerPosition::Touch(points) => points
                .first()
                .map(|point| (point.client_x, point.client_y)),
        }
    }
}

/// A device-orientation reading; absent fields bind as 0.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OrientationReading {
    pub alpha: Option<f64>,
    pub beta: Option<f64>,
    pub gamma: Option<f64>,
    /// Legacy screen orientation angle in degrees.
    pub screen_orientation: Option<f64>,
}

impl OrientationReading {
    pub fn as_uniform(&self) -> [f32; 4] {
        [
            self.alpha.unwrap_or(0.0) as f32,
            self.beta.unwrap_or(0.0) as f32,
            self.gamma.unwrap_or(0.0) as f32,
            self.screen_orientation.unwrap_or(0.0) as f32,
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    PointerDown(PointerPosition),
    PointerMove(PointerPosition),
    PointerUp,
    PointerLeave,
    Orientation(OrientationReading),
    /// New logical size of the canvas container.
    Resize { width: f64, height: f64 },
    ScaleFactor(f64),
    /// The canvas moved on the page or the page scrolled.
    Layout { bounds: CanvasRect, scroll: (f64, f64) },
}

/// Converts client coordinates into canvas pixels for `iMouse`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InputAdapter {
    bounds: CanvasRect,
    scroll: (f64, f64),
}

impl InputAdapter {
    pub fn new(bounds: CanvasRect) -> Self {
        Self {
            bounds,
            scroll: (0.0, 0.0),
        }
    }

    pub fn bounds(&self) -> CanvasRect {
        self.bounds
    }

    pub fn set_layout(&mut self, bounds: CanvasRect, scroll: (f64, f64)) {
        self.bounds = bounds;
        self.scroll = scroll;
    }

    /// Keeps the offset, replaces the size.
    pub fn set_size(&mut self, width: f64, height: f64) {
        self.bounds.width = width;
        self.bounds.height = height;
    }

    /// Canvas-local position with y growing upward, or `None` for a touch
    /// event without changed points.
    pub fn locate(&self, position: &PointerPosition) -> Option<(f32, f32)> {
        let (client_x, client_y) = position.client()?;
        let x = client_x - self.bounds.left - self.scroll.0;
        let y = client_y - self.bounds.top - self.scroll.1;
        Some((x as f32, (self.bounds.height - y) as f32))
    }
}

#[cfg(feature = "winit")]
pub use self::winit_events::WinitTranslator;

#[cfg(feature = "winit")]
mod winit_events {
    use winit::dpi::{PhysicalPosition, PhysicalSize};
    use winit::event::{ElementState, MouseButton, Touch, TouchPhase, WindowEvent};

    use super::{InputEvent, PointerPosition, TouchPoint};

    /// Turns `winit` window events into [`InputEvent`]s. Positions are
    /// reported in logical pixels, matching the canvas size handed to
    /// `initialize`.
    #[derive(Debug, Clone, Copy)]
    pub struct WinitTranslator {
        cursor: Option<PhysicalPosition<f64>>,
        scale_factor: f64,
    }

    impl WinitTranslator {
        pub fn new(scale_factor: f64) -> Self {
            Self {
                cursor: None,
                scale_factor,
            }
        }

        pub fn translate(&mut self, event: &WindowEvent) -> Option<InputEvent> {
            match event {
                WindowEvent::CursorMoved { position, .. } => Some(self.cursor_moved(*position)),
                WindowEvent::CursorLeft { .. } => {
                    self.cursor = None;
                    Some(InputEvent::PointerLeave)
                }
                WindowEvent::MouseInput {
                    state,
                    button: MouseButton::Left,
                    ..
                } => self.left_button(*state),
                WindowEvent::Touch(touch) => Some(self.touch(touch)),
                WindowEvent::Resized(size) => Some(self.resized(*size)),
                WindowEvent::ScaleFactorChanged { scale_factor, .. } => {
                    self.scale_factor = *scale_factor;
                    Some(InputEvent::ScaleFactor(*scale_factor))
                }
                _ => None,
            }
        }

        fn logical(&self, position: PhysicalPosition<f64>) -> (f64, f64) {
            (
                position.x / self.scale_factor,
                position.y / self.scale_factor,
            )
        }

        pub(crate) fn cursor_moved(&mut self, position: PhysicalPosition<f64>) -> InputEvent {
            self.cursor = Some(position);
            let (client_x, client_y) = self.logical(position);
            InputEvent::PointerMove(PointerPosition::Mouse { client_x, client_y })
        }

        pub(crate) fn left_button(&mut self, state: ElementState) -> Option<InputEvent> {
            match state {
                ElementState::Pressed => {
                    let (client_x, client_y) = self.logical(self.cursor?);
                    Some(InputEvent::PointerDown(PointerPosition::Mouse {
                        client_x,
                        client_y,
                    }))
                }
                ElementState::Released => Some(InputEvent::PointerUp),
            }
        }

        pub(crate) fn touch_at(
            &self,
            id: u64,
            phase: TouchPhase,
            location: PhysicalPosition<f64>,
        ) -> InputEvent {
            let (client_x, client_y) = self.logical(location);
            let position = PointerPosition::Touch(vec![TouchPoint {
                id,
                client_x,
                client_y,
            }]);
            match phase {
                TouchPhase::Started => InputEvent::PointerDown(position),
                TouchPhase::Moved => InputEvent::PointerMove(position),
                TouchPhase::Ended | TouchPhase::Cancelled => InputEvent::PointerUp,
            }
        }

        fn touch(&self, touch: &Touch) -> InputEvent {
            self.touch_at(touch.id, touch.phase, touch.location)
        }

        pub(crate) fn resized(&self, size: PhysicalSize<u32>) -> InputEvent {
            InputEvent::Resize {
                width: size.width as f64 / self.scale_factor,
                height: size.height as f64 / self.scale_factor,
            }
        }
    }

}
