//! Texture channels: asynchronous loading, upload, per-tick binding.
//!
//! Loads go through a [`TextureLoader`], either on worker threads or inline.
//! Results come back over a channel and are applied by the thread owning the
//! GL context when [`TextureManager::poll`] runs at the start of a tick, so
//! the registry and GPU state only ever have one mutator.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{Receiver, Sender};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::{CanvasError, Diagnostics};
use crate::gl::{GlBackend, SamplerParams};
use crate::types::{MediaKind, TextureDescriptor};
use crate::uniforms::{TextureUniformIds, UniformRegistry};

/// Decoded RGBA8 pixels, rows top to bottom unless flipped.
#[derive(Debug, Clone)]
pub struct TextureImage {
    rgba: RgbaImage,
}

impl TextureImage {
    pub fn from_rgba(rgba: RgbaImage) -> Self {
        Self { rgba }
    }

    /// Wraps raw RGBA8 bytes; `None` when the length is not `width * height * 4`.
    pub fn from_raw(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        RgbaImage::from_raw(width, height, pixels).map(Self::from_rgba)
    }

    pub fn solid(width: u32, height: u32, color: [u8; 4]) -> Self {
        Self::from_rgba(RgbaImage::from_pixel(width, height, image::Rgba(color)))
    }

    pub fn width(&self) -> u32 {
        self.rgba.width()
    }

    pub fn height(&self) -> u32 {
        self.rgba.height()
    }

    pub fn pixels(&self) -> &[u8] {
        self.rgba.as_raw()
    }

    pub fn flip_vertical(&mut self) {
        imageops::flip_vertical_in_place(&mut self.rgba);
    }

    pub fn is_power_of_two(&self) -> bool {
        self.width().is_power_of_two() && self.height().is_power_of_two()
    }

    /// Rescales to the next power of two on each axis.
    pub fn to_power_of_two(self) -> Self {
        if self.is_power_of_two() {
            return self;
        }
        let width = self.width().max(1).next_power_of_two();
        let height = self.height().max(1).next_power_of_two();
        Self::from_rgba(imageops::resize(
            &self.rgba,
            width,
            height,
            FilterType::Triangle,
        ))
    }
}

/// A source whose content changes over time.
pub trait VideoFrames: Send {
    /// The newest decoded frame, or `None` when nothing changed since the
    /// previous call.
    fn next_frame(&mut self) -> Option<TextureImage>;
}

/// What a loader produced for one descriptor.
pub enum LoadedMedia {
    Image(TextureImage),
    Video {
        first_frame: TextureImage,
        frames: Box<dyn VideoFrames>,
    },
}

impl LoadedMedia {
    pub fn kind(&self) -> MediaKind {
        match self {
            LoadedMedia::Image(_) => MediaKind::Image,
            LoadedMedia::Video { .. } => MediaKind::Video,
        }
    }
}

impl fmt::Debug for LoadedMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadedMedia::Image(image) => f.debug_tuple("Image").field(image).finish(),
            LoadedMedia::Video { first_frame, .. } => f
                .debug_struct("Video")
                .field("first_frame", first_frame)
                .finish_non_exhaustive(),
        }
    }
}

/// Resolves a descriptor's locator into decoded content. Called from worker
/// threads under [`LoadStrategy::Threaded`].
pub trait TextureLoader: Send + Sync {
    fn load(&self, descriptor: &TextureDescriptor) -> Result<LoadedMedia>;
}

/// Decodes still images from the filesystem.
#[derive(Debug, Clone, Default)]
pub struct ImageFileLoader {
    base_dir: Option<PathBuf>,
}

impl ImageFileLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves relative locators against `base_dir`.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }

    fn resolve(&self, locator: &str) -> PathBuf {
        let path = Path::new(locator);
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl TextureLoader for ImageFileLoader {
    fn load(&self, descriptor: &TextureDescriptor) -> Result<LoadedMedia> {
        if descriptor.media_kind() == MediaKind::Video {
            bail!(
                "no video decoder available for {}; supply a TextureLoader that yields frames",
                descriptor.source
            );
        }
        let path = self.resolve(&descriptor.source);
        let image = image::open(&path)
            .with_context(|| format!("failed to open texture at {}", path.display()))?;
        Ok(LoadedMedia::Image(TextureImage::from_rgba(image.to_rgba8())))
    }
}

/// Where texture loads run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStrategy {
    /// Load on the calling thread while the manager starts.
    Inline,
    /// One worker thread per descriptor.
    #[default]
    Threaded,
}

/// Applies the descriptor's CPU-side preparation: Y flip, then a power-of-two
/// resize when mipmaps or repeat wrapping are requested.
pub fn prepare_image(mut image: TextureImage, descriptor: &TextureDescriptor) -> TextureImage {
    if descriptor.flip_y {
        image.flip_vertical();
    }
    let needs_power_of_two = descriptor.min_filter.uses_mipmaps()
        || descriptor.wrap_s.repeats()
        || descriptor.wrap_t.repeats();
    if needs_power_of_two && !image.is_power_of_two() {
        tracing::debug!(
            width = image.width(),
            height = image.height(),
            source = %descriptor.source,
            "resizing texture to power of two"
        );
        image = image.to_power_of_two();
    }
    image
}

fn load_prepared(loader: &dyn TextureLoader, descriptor: &TextureDescriptor) -> Result<LoadedMedia> {
    Ok(match loader.load(descriptor)? {
        LoadedMedia::Image(image) => LoadedMedia::Image(prepare_image(image, descriptor)),
        LoadedMedia::Video {
            first_frame,
            frames,
        } => LoadedMedia::Video {
            first_frame: prepare_image(first_frame, descriptor),
            frames,
        },
    })
}

/// Runs one load, turning a panicking loader into a failed load so the
/// channel still completes.
fn load_guarded(loader: &dyn TextureLoader, descriptor: &TextureDescriptor) -> Result<LoadedMedia> {
    panic::catch_unwind(AssertUnwindSafe(|| load_prepared(loader, descriptor)))
        .unwrap_or_else(|payload| Err(anyhow!("texture loader panicked: {}", panic_message(&*payload))))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

struct LoadCompletion {
    channel: usize,
    result: Result<LoadedMedia>,
}

/// GPU side of one channel.
pub struct TextureResource<B: GlBackend> {
    descriptor: TextureDescriptor,
    params: SamplerParams,
    handle: Option<B::Texture>,
    width: u32,
    height: u32,
    loaded: bool,
    media: MediaKind,
    frames: Option<Box<dyn VideoFrames>>,
}

impl<B: GlBackend> TextureResource<B> {
    fn new(descriptor: TextureDescriptor) -> Self {
        let params = SamplerParams {
            wrap_s: descriptor.wrap_s,
            wrap_t: descriptor.wrap_t,
            min_filter: descriptor.min_filter,
            mag_filter: descriptor.mag_filter,
        };
        let media = descriptor.media_kind();
        Self {
            descriptor,
            params,
            handle: None,
            width: 0,
            height: 0,
            loaded: false,
            media,
            frames: None,
        }
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn media(&self) -> MediaKind {
        self.media
    }

    pub fn handle(&self) -> Option<B::Texture> {
        self.handle
    }
}

impl<B: GlBackend> fmt::Debug for TextureResource<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureResource")
            .field("source", &self.descriptor.source)
            .field("handle", &self.handle)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("loaded", &self.loaded)
            .field("media", &self.media)
            .finish()
    }
}

/// Owns every channel's texture and the load pipeline feeding them.
pub struct TextureManager<B: GlBackend> {
    resources: Vec<TextureResource<B>>,
    uniforms: Option<TextureUniformIds>,
    loader: Arc<dyn TextureLoader>,
    strategy: LoadStrategy,
    sender: Sender<LoadCompletion>,
    receiver: Receiver<LoadCompletion>,
    outstanding: usize,
    started: bool,
    closed: bool,
}

impl<B: GlBackend> TextureManager<B> {
    pub fn new(
        descriptors: Vec<TextureDescriptor>,
        loader: Arc<dyn TextureLoader>,
        strategy: LoadStrategy,
    ) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            resources: descriptors.into_iter().map(TextureResource::new).collect(),
            uniforms: None,
            loader,
            strategy,
            sender,
            receiver,
            outstanding: 0,
            started: false,
            closed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn resource(&self, channel: usize) -> Option<&TextureResource<B>> {
        self.resources.get(channel)
    }

    pub fn uniforms(&self) -> Option<&TextureUniformIds> {
        self.uniforms.as_ref()
    }

    /// Loads still in flight.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Declares `iChannelN` and `iChannelResolution` for the configured list.
    pub fn register_uniforms(&mut self, registry: &mut UniformRegistry) {
        self.uniforms = registry.register_textures(self.resources.len());
    }

    /// Kicks off every load. With no textures the settle signal fires here.
    pub fn start(&mut self, diagnostics: &mut Diagnostics) {
        if self.started {
            return;
        }
        self.started = true;
        if self.resources.is_empty() {
            diagnostics.textures_settled();
            return;
        }
        self.outstanding = self.resources.len();
        for (channel, resource) in self.resources.iter().enumerate() {
            let descriptor = resource.descriptor.clone();
            match self.strategy {
                LoadStrategy::Inline => {
                    let result = load_guarded(self.loader.as_ref(), &descriptor);
                    let _ = self.sender.send(LoadCompletion { channel, result });
                }
                LoadStrategy::Threaded => self.spawn_load(channel, descriptor),
            }
        }
    }

    /// Declines every load without attempting it. The settle signal still
    /// fires so hosts waiting on it are released.
    pub fn skip(&mut self, diagnostics: &mut Diagnostics) {
        if self.started {
            return;
        }
        self.started = true;
        self.closed = true;
        tracing::debug!(textures = self.resources.len(), "texture loads skipped");
        diagnostics.textures_settled();
    }

    fn spawn_load(&self, channel: usize, descriptor: TextureDescriptor) {
        let loader = Arc::clone(&self.loader);
        let sender = self.sender.clone();
        let spawned = thread::Builder::new()
            .name(format!("fragcanvas-texture-{channel}"))
            .spawn({
                let descriptor = descriptor.clone();
                move || {
                    let result = load_guarded(loader.as_ref(), &descriptor);
                    // The receiver is gone once the canvas is torn down.
                    let _ = sender.send(LoadCompletion { channel, result });
                }
            });
        if let Err(err) = spawned {
            tracing::warn!(channel, %err, "texture worker spawn failed; loading inline");
            let result = load_guarded(self.loader.as_ref(), &descriptor);
            let _ = self.sender.send(LoadCompletion { channel, result });
        }
    }

    /// Applies every finished load: uploads the texture, writes the channel
    /// resolution and fires the settle signal after the last completion.
    pub fn poll(
        &mut self,
        gl: &B,
        registry: &mut UniformRegistry,
        diagnostics: &mut Diagnostics,
        device_pixel_ratio: f64,
    ) {
        if self.closed || self.outstanding == 0 {
            return;
        }
        while let Ok(completion) = self.receiver.try_recv() {
            self.outstanding = self.outstanding.saturating_sub(1);
            self.apply(gl, completion, registry, diagnostics, device_pixel_ratio);
        }
        if self.outstanding == 0 {
            diagnostics.textures_settled();
        }
    }

    fn apply(
        &mut self,
        gl: &B,
        completion: LoadCompletion,
        registry: &mut UniformRegistry,
        diagnostics: &mut Diagnostics,
        device_pixel_ratio: f64,
    ) {
        let LoadCompletion { channel, result } = completion;
        let Some(resource) = self.resources.get_mut(channel) else {
            return;
        };
        let media = match result {
            Ok(media) => media,
            Err(err) => {
                diagnostics.report(CanvasError::TextureLoad {
                    channel,
                    locator: resource.descriptor.source.clone(),
                    reason: format!("{err:#}"),
                });
                return;
            }
        };

        resource.media = media.kind();
        let (image, frames) = match media {
            LoadedMedia::Image(image) => (image, None),
            LoadedMedia::Video {
                first_frame,
                frames,
            } => (first_frame, Some(frames)),
        };
        let handle = match gl.create_texture(&resource.params, &image) {
            Ok(handle) => handle,
            Err(message) => {
                diagnostics.report(CanvasError::Backend(format!(
                    "texture for channel {channel}: {message}"
                )));
                return;
            }
        };
        resource.handle = Some(handle);
        resource.width = image.width();
        resource.height = image.height();
        resource.frames = frames;
        resource.loaded = true;

        if let Some(ids) = &self.uniforms {
            registry.set_channel_resolution(
                ids.resolution,
                channel,
                resource.width,
                resource.height,
                device_pixel_ratio,
            );
        }
        tracing::debug!(
            channel,
            width = resource.width,
            height = resource.height,
            media = ?resource.media,
            "texture uploaded"
        );
    }

    /// Rewrites every loaded channel's resolution for a new pixel ratio.
    pub fn refresh_resolutions(&self, registry: &mut UniformRegistry, device_pixel_ratio: f64) {
        let Some(ids) = &self.uniforms else {
            return;
        };
        for (channel, resource) in self.resources.iter().enumerate() {
            if resource.loaded {
                registry.set_channel_resolution(
                    ids.resolution,
                    channel,
                    resource.width,
                    resource.height,
                    device_pixel_ratio,
                );
            }
        }
    }

    /// Binds each loaded texture the shader samples to its unit, refreshing
    /// video content first. Channels whose sampler is unused are skipped.
    pub fn bind(&mut self, gl: &B, registry: &mut UniformRegistry, device_pixel_ratio: f64) {
        for (channel, resource) in self.resources.iter_mut().enumerate() {
            let Some(handle) = resource.handle else {
                continue;
            };
            let sampled = self
                .uniforms
                .as_ref()
                .and_then(|ids| ids.channels.get(channel))
                .is_some_and(|id| registry.is_needed(*id));
            if !sampled {
                continue;
            }
            if let Some(frame) = resource.frames.as_mut().and_then(|frames| frames.next_frame()) {
                let frame = prepare_image(frame, &resource.descriptor);
                gl.update_texture(handle, &resource.params, &frame);
                if (frame.width(), frame.height()) != (resource.width, resource.height) {
                    resource.width = frame.width();
                    resource.height = frame.height();
                    if let Some(ids) = &self.uniforms {
                        registry.set_channel_resolution(
                            ids.resolution,
                            channel,
                            resource.width,
                            resource.height,
                            device_pixel_ratio,
                        );
                    }
                }
            }
            gl.bind_texture(channel as u32, handle);
        }
    }

    /// Deletes every texture and discards loads that have not been applied.
    pub fn teardown(&mut self, gl: &B) {
        self.closed = true;
        while self.receiver.try_recv().is_ok() {}
        for resource in &mut self.resources {
            if let Some(handle) = resource.handle.take() {
                gl.delete_texture(handle);
            }
            resource.frames = None;
            resource.loaded = false;
        }
    }
}

impl<B: GlBackend> fmt::Debug for TextureManager<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureManager")
            .field("resources", &self.resources)
            .field("strategy", &self.strategy)
            .field("outstanding", &self.outstanding)
            .field("closed", &self.closed)
            .finish()
    }
}
