#![deny(unsafe_code)]

//! Shadertoy-style fragment shader canvas on top of OpenGL ES / WebGL via
//! `glow`.
//!
//! A caller hands [`EngineConfig`] (fragment source, textures, custom inputs)
//! to a [`ShaderCanvas`] together with a [`GlBackend`] and a [`Host`]. The
//! overall flow is:
//!
//! ```text
//!   EngineConfig
//!        │
//!        ▼
//!   ShaderCanvas::initialize ──▶ preprocess() ──▶ ProgramManager (compile + link)
//!        │                                                 │
//!        ├──▶ TextureManager::start (inline or worker)     ▼
//!        │                                      uniform locations resolved
//!        ▼
//!   Host::request_frame ──▶ ShaderCanvas::tick ──▶ FrameState::advance
//!        ▲                        │
//!        └────────────────────────┴──▶ bind uniforms + textures ──▶ draw quad
//! ```
//!
//! The canvas owns every GPU object it creates and releases them in
//! [`ShaderCanvas::teardown`], which also runs on drop. Hosts without a
//! display-refresh callback can pair [`FrameQueue`] with [`RenderLoop`].

mod engine;
mod error;
mod frame;
mod gl;
mod host;
mod input;
mod preprocess;
mod program;
mod textures;
mod types;
mod uniforms;

#[cfg(test)]
mod testing;

pub use engine::{EngineConfig, ShaderCanvas};
pub use error::{Callbacks, CanvasError, Diagnostics, Severity};
pub use frame::{
    clamp_smoothing, date_components, local_date, FrameState, FrameValues, PointerState,
    QUAD_VERTEX_COUNT, QUAD_VERTICES,
};
pub use gl::{GlBackend, GlowBackend, SamplerParams, ShaderStage, REQUESTED_EXTENSIONS};
pub use host::{
    CancellationToken, EventInterest, FrameQueue, FrameRequest, Host, RenderLoop,
    DEFAULT_FRAME_INTERVAL,
};
#[cfg(feature = "winit")]
pub use input::WinitTranslator;
pub use input::{
    CanvasRect, InputAdapter, InputEvent, OrientationReading, PointerPosition, TouchPoint,
};
pub use preprocess::{
    preprocess, resolve_precision, PreprocessedShaders, DEFAULT_FRAGMENT_SHADER,
    DEFAULT_VERTEX_SHADER,
};
pub use program::{ProgramManager, POSITION_COMPONENTS};
pub use textures::{
    prepare_image, ImageFileLoader, LoadStrategy, LoadedMedia, TextureImage, TextureLoader,
    TextureManager, TextureResource, VideoFrames,
};
pub use types::{
    CanvasGeometry, ContextAttributes, FilterMode, MediaKind, PowerPreference, Precision, Rgba,
    TextureDescriptor, WrapMode, UNIFORM_CHANNEL_PREFIX, UNIFORM_CHANNEL_RESOLUTION, UNIFORM_DATE,
    UNIFORM_DEVICE_ORIENTATION, UNIFORM_FRAME, UNIFORM_MOUSE, UNIFORM_RESOLUTION, UNIFORM_TIME,
    UNIFORM_TIME_DELTA, VERTEX_POSITION_ATTRIBUTE,
};
pub use uniforms::{
    classify, BuiltinIds, CustomUniform, ScalarKind, TextureUniformIds, UniformError, UniformId,
    UniformInput, UniformOrigin, UniformRegistry, UniformSpec, UniformType, UniformUpload,
    UniformValue,
};
