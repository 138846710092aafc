//! Error taxonomy and the caller-facing diagnostic sinks.
//!
//! Nothing in the engine is fatal to its host: every failure becomes a
//! [`CanvasError`] routed through [`Diagnostics`], which hands the rendered
//! message to the caller's `on_warning` / `on_error` callbacks or, when none
//! were supplied, to `tracing`.

use std::fmt;

use thiserror::Error;

use crate::gl::ShaderStage;
use crate::uniforms::UniformError;

/// How a diagnostic is surfaced to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Error)]
pub enum CanvasError {
    /// Unknown precision qualifier; the preprocessor fell back to `mediump`.
    #[error(
        "wrong precision type {requested}, please pass one of lowp, mediump, highp; \
         the shader precision falls back to mediump"
    )]
    InvalidPrecision { requested: String },
    /// Pointer smoothing factor outside `0..=1`.
    #[error("pointer smoothing factor {requested} is outside 0..=1, using {clamped}")]
    InvalidSmoothing { requested: f32, clamped: f32 },
    /// Companion warning to [`CanvasError::Compile`] carrying the rejected source.
    #[error("error compiling the {stage} shader:\n{text}")]
    ShaderSource { stage: ShaderStage, text: String },
    #[error("{stage} shader compiler log: {log}")]
    Compile { stage: ShaderStage, log: String },
    #[error("unable to initialize the shader program: {0}")]
    Link(String),
    #[error("failed to load texture for channel {channel} ({locator}): {reason}")]
    TextureLoad {
        channel: usize,
        locator: String,
        reason: String,
    },
    #[error("uniform \"{name}\" dropped: {source}")]
    InvalidUniform {
        name: String,
        #[source]
        source: UniformError,
    },
    /// A GL object could not be created.
    #[error("GPU resource error: {0}")]
    Backend(String),
}

impl CanvasError {
    pub fn severity(&self) -> Severity {
        match self {
            CanvasError::InvalidPrecision { .. }
            | CanvasError::InvalidSmoothing { .. }
            | CanvasError::ShaderSource { .. } => Severity::Warning,
            CanvasError::Compile { .. }
            | CanvasError::Link(_)
            | CanvasError::TextureLoad { .. }
            | CanvasError::InvalidUniform { .. }
            | CanvasError::Backend(_) => Severity::Error,
        }
    }
}

type MessageCallback = Box<dyn FnMut(&str)>;
type SettledCallback = Box<dyn FnOnce()>;

/// Caller-supplied hooks. Missing hooks fall back to `tracing`.
#[derive(Default)]
pub struct Callbacks {
    on_error: Option<MessageCallback>,
    on_warning: Option<MessageCallback>,
    on_textures_settled: Option<SettledCallback>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_error(mut self, callback: impl FnMut(&str) + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    pub fn on_warning(mut self, callback: impl FnMut(&str) + 'static) -> Self {
        self.on_warning = Some(Box::new(callback));
        self
    }

    /// Fires once, after every texture load attempt has finished.
    pub fn on_textures_settled(mut self, callback: impl FnOnce() + 'static) -> Self {
        self.on_textures_settled = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_error", &self.on_error.is_some())
            .field("on_warning", &self.on_warning.is_some())
            .field("on_textures_settled", &self.on_textures_settled.is_some())
            .finish()
    }
}

/// Routes diagnostics to the caller and remembers whether the settle signal
/// has already fired.
#[derive(Debug)]
pub struct Diagnostics {
    callbacks: Callbacks,
    settled: bool,
    warnings: usize,
    errors: usize,
}

impl Diagnostics {
    pub fn new(callbacks: Callbacks) -> Self {
        Self {
            callbacks,
            settled: false,
            warnings: 0,
            errors: 0,
        }
    }

    pub fn report(&mut self, error: CanvasError) {
        let message = error.to_string();
        match error.severity() {
            Severity::Warning => {
                self.warnings += 1;
                match self.callbacks.on_warning.as_mut() {
                    Some(callback) => callback(&message),
                    None => tracing::warn!("{message}"),
                }
            }
            Severity::Error => {
                self.errors += 1;
                match self.callbacks.on_error.as_mut() {
                    Some(callback) => callback(&message),
                    None => tracing::error!("{message}"),
                }
            }
        }
    }

    pub fn textures_settled(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;
        tracing::debug!("all texture loads settled");
        if let Some(callback) = self.callbacks.on_textures_settled.take() {
            callback();
        }
    }

    pub fn has_settled(&self) -> bool {
        self.settled
    }

    pub fn warning_count(&self) -> usize {
        self.warnings
    }

    pub fn error_count(&self) -> usize {
        self.errors
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(Callbacks::default())
    }
}
