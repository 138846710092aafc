use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Names of the engine-provided inputs, in the order they are registered.
pub const UNIFORM_TIME: &str = "iTime";
pub const UNIFORM_TIME_DELTA: &str = "iTimeDelta";
pub const UNIFORM_DATE: &str = "iDate";
pub const UNIFORM_MOUSE: &str = "iMouse";
pub const UNIFORM_RESOLUTION: &str = "iResolution";
pub const UNIFORM_FRAME: &str = "iFrame";
pub const UNIFORM_DEVICE_ORIENTATION: &str = "iDeviceOrientation";
pub const UNIFORM_CHANNEL_RESOLUTION: &str = "iChannelResolution";

/// Prefix of the per-texture sampler inputs (`iChannel0`, `iChannel1`, ...).
pub const UNIFORM_CHANNEL_PREFIX: &str = "iChannel";

/// Vertex attribute the fullscreen quad feeds.
pub const VERTEX_POSITION_ATTRIBUTE: &str = "aVertexPosition";

/// RGBA color with components in `0.0..=1.0`.
pub type Rgba = [f32; 4];

/// GLSL float precision qualifier injected at the top of the fragment shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    Low,
    Medium,
    #[default]
    High,
}

impl Precision {
    pub const ALL: [Precision; 3] = [Precision::Low, Precision::Medium, Precision::High];

    pub fn as_str(self) -> &'static str {
        match self {
            Precision::Low => "lowp",
            Precision::Medium => "mediump",
            Precision::High => "highp",
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Precision {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "lowp" => Ok(Precision::Low),
            "mediump" => Ok(Precision::Medium),
            "highp" => Ok(Precision::High),
            other => Err(other.to_string()),
        }
    }
}

/// Texture coordinate wrapping, mirroring the GL wrap enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WrapMode {
    #[default]
    Repeat,
    ClampToEdge,
    MirroredRepeat,
}

impl WrapMode {
    pub fn gl_enum(self) -> u32 {
        match self {
            WrapMode::Repeat => glow::REPEAT,
            WrapMode::ClampToEdge => glow::CLAMP_TO_EDGE,
            WrapMode::MirroredRepeat => glow::MIRRORED_REPEAT,
        }
    }

    pub fn repeats(self) -> bool {
        !matches!(self, WrapMode::ClampToEdge)
    }
}

/// Texture sampling filter, mirroring the GL filter enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterMode {
    Nearest,
    Linear,
    NearestMipmapNearest,
    LinearMipmapNearest,
    NearestMipmapLinear,
    LinearMipmapLinear,
}

impl FilterMode {
    pub fn gl_enum(self) -> u32 {
        match self {
            FilterMode::Nearest => glow::NEAREST,
            FilterMode::Linear => glow::LINEAR,
            FilterMode::NearestMipmapNearest => glow::NEAREST_MIPMAP_NEAREST,
            FilterMode::LinearMipmapNearest => glow::LINEAR_MIPMAP_NEAREST,
            FilterMode::NearestMipmapLinear => glow::NEAREST_MIPMAP_LINEAR,
            FilterMode::LinearMipmapLinear => glow::LINEAR_MIPMAP_LINEAR,
        }
    }

    pub fn uses_mipmaps(self) -> bool {
        !matches!(self, FilterMode::Nearest | FilterMode::Linear)
    }

    /// Magnification only accepts the two base filters; mipmap variants
    /// collapse onto the filter they sample within a level.
    pub fn for_magnification(self) -> FilterMode {
        match self {
            FilterMode::Nearest | FilterMode::NearestMipmapNearest | FilterMode::NearestMipmapLinear => {
                FilterMode::Nearest
            }
            FilterMode::Linear | FilterMode::LinearMipmapNearest | FilterMode::LinearMipmapLinear => {
                FilterMode::Linear
            }
        }
    }
}

/// Whether a texture uploads once or refreshes its content every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Image,
    Video,
}

impl MediaKind {
    const VIDEO_EXTENSIONS: [&'static str; 6] = ["mp4", "webm", "ogv", "ogg", "mov", "m4v"];

    /// Guesses the media kind from a locator's extension.
    pub fn from_locator(locator: &str) -> MediaKind {
        let path = locator.split(['?', '#']).next().unwrap_or(locator);
        let is_video = Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                Self::VIDEO_EXTENSIONS
                    .iter()
                    .any(|candidate| candidate.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false);
        if is_video {
            MediaKind::Video
        } else {
            MediaKind::Image
        }
    }
}

fn default_min_filter() -> FilterMode {
    FilterMode::LinearMipmapLinear
}

fn default_mag_filter() -> FilterMode {
    FilterMode::Linear
}

fn default_flip_y() -> bool {
    true
}

/// Describes one texture channel: where its content comes from and how it
/// should be sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TextureDescriptor {
    /// Locator handed to the texture loader (a path for the default loader).
    pub source: String,
    #[serde(default)]
    pub wrap_s: WrapMode,
    #[serde(default)]
    pub wrap_t: WrapMode,
    #[serde(default = "default_min_filter")]
    pub min_filter: FilterMode,
    #[serde(default = "default_mag_filter")]
    pub mag_filter: FilterMode,
    #[serde(default = "default_flip_y")]
    pub flip_y: bool,
    /// Overrides the extension-based media detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaKind>,
}

impl TextureDescriptor {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            wrap_s: WrapMode::default(),
            wrap_t: WrapMode::default(),
            min_filter: default_min_filter(),
            mag_filter: default_mag_filter(),
            flip_y: default_flip_y(),
            media: None,
        }
    }

    pub fn with_wrap(mut self, wrap_s: WrapMode, wrap_t: WrapMode) -> Self {
        self.wrap_s = wrap_s;
        self.wrap_t = wrap_t;
        self
    }

    pub fn with_filters(mut self, min_filter: FilterMode, mag_filter: FilterMode) -> Self {
        self.min_filter = min_filter;
        self.mag_filter = mag_filter;
        self
    }

    pub fn with_flip_y(mut self, flip_y: bool) -> Self {
        self.flip_y = flip_y;
        self
    }

    pub fn with_media(mut self, media: MediaKind) -> Self {
        self.media = Some(media);
        self
    }

    pub fn media_kind(&self) -> MediaKind {
        self.media
            .unwrap_or_else(|| MediaKind::from_locator(&self.source))
    }
}

/// Power preference forwarded to context creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowerPreference {
    #[default]
    Default,
    LowPower,
    HighPerformance,
}

/// Options for whoever creates the GL context. The engine never creates a
/// context itself; it only carries these through to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ContextAttributes {
    pub alpha: bool,
    pub antialias: bool,
    pub depth: bool,
    pub stencil: bool,
    pub premultiplied_alpha: bool,
    pub preserve_drawing_buffer: bool,
    pub power_preference: PowerPreference,
}

impl Default for ContextAttributes {
    fn default() -> Self {
        Self {
            alpha: true,
            antialias: true,
            depth: true,
            stencil: false,
            premultiplied_alpha: true,
            preserve_drawing_buffer: false,
            power_preference: PowerPreference::Default,
        }
    }
}

/// Sizes of the drawing surface: logical (CSS/window) units and the physical
/// drawing buffer derived from the device pixel ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasGeometry {
    pub device_pixel_ratio: f64,
    pub logical_size: (f64, f64),
    pub drawing_buffer: (u32, u32),
}

impl CanvasGeometry {
    pub fn new(logical_width: f64, logical_height: f64, device_pixel_ratio: f64) -> Self {
        let scale = |logical: f64| (logical.max(0.0) * device_pixel_ratio).floor() as u32;
        Self {
            device_pixel_ratio,
            logical_size: (logical_width, logical_height),
            drawing_buffer: (scale(logical_width), scale(logical_height)),
        }
    }

    pub fn resolution(&self) -> [f32; 2] {
        [self.drawing_buffer.0 as f32, self.drawing_buffer.1 as f32]
    }
}

impl Default for CanvasGeometry {
    fn default() -> Self {
        Self::new(1.0, 1.0, 1.0)
    }
}
