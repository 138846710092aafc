//! Recording doubles for the GL context, the host and the texture loader.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::gl::{GlBackend, SamplerParams, ShaderStage};
use crate::host::{EventInterest, FrameRequest, Host};
use crate::textures::{LoadedMedia, TextureImage, TextureLoader, VideoFrames};
use crate::types::{Rgba, TextureDescriptor};
use crate::uniforms::UniformUpload;

/// Owned copy of a [`UniformUpload`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedUpload {
    Float(f32),
    Int(i32),
    Floats(Vec<f32>),
    Ints(Vec<i32>),
    Matrix(Vec<f32>),
}

impl From<UniformUpload<'_>> for RecordedUpload {
    fn from(upload: UniformUpload<'_>) -> Self {
        match upload {
            UniformUpload::Float(value) => RecordedUpload::Float(value),
            UniformUpload::Int(value) => RecordedUpload::Int(value),
            UniformUpload::FloatVector { data, .. } => RecordedUpload::Floats(data.to_vec()),
            UniformUpload::IntVector { data, .. } => RecordedUpload::Ints(data.to_vec()),
            UniformUpload::Matrix { data, .. } => RecordedUpload::Matrix(data.to_vec()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GlCall {
    CompileShader(ShaderStage),
    DeleteShader(u32),
    LinkProgram,
    UseProgram(Option<u32>),
    DeleteProgram(u32),
    SetUniform { name: String, value: RecordedUpload },
    CreateBuffer(Vec<f32>),
    BindVertexAttribute { attribute: u32, components: i32 },
    DeleteBuffer(u32),
    ConfigurePipeline(Rgba),
    Viewport(u32, u32),
    Clear,
    Draw(i32),
    CreateTexture { texture: u32, width: u32, height: u32 },
    UpdateTexture { texture: u32, width: u32, height: u32 },
    BindTexture { unit: u32, texture: u32 },
    DeleteTexture(u32),
}

/// [`GlBackend`] that records every call. Handles are sequential integers
/// and uniform locations are the uniform names.
#[derive(Debug, Default)]
pub struct RecordingGl {
    calls: RefCell<Vec<GlCall>>,
    next_handle: Cell<u32>,
    compile_failures: HashMap<String, String>,
    link_failure: Option<String>,
}

impl RecordingGl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_compile(mut self, stage: ShaderStage, log: &str) -> Self {
        self.compile_failures.insert(stage.to_string(), log.to_string());
        self
    }

    pub fn fail_link(mut self, log: &str) -> Self {
        self.link_failure = Some(log.to_string());
        self
    }

    pub fn calls(&self) -> Vec<GlCall> {
        self.calls.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    /// Every value uploaded to `name`, oldest first.
    pub fn uploads(&self, name: &str) -> Vec<RecordedUpload> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                GlCall::SetUniform {
                    name: uploaded,
                    value,
                } if uploaded == name => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, predicate: impl Fn(&GlCall) -> bool) -> usize {
        self.calls.borrow().iter().filter(|call| predicate(call)).count()
    }

    fn record(&self, call: GlCall) {
        self.calls.borrow_mut().push(call);
    }

    fn handle(&self) -> u32 {
        let handle = self.next_handle.get() + 1;
        self.next_handle.set(handle);
        handle
    }
}

impl GlBackend for RecordingGl {
    type Shader = u32;
    type Program = u32;
    type Texture = u32;
    type Buffer = u32;
    type UniformLocation = String;

    fn has_extension(&self, _name: &str) -> bool {
        true
    }

    fn compile_shader(&self, stage: ShaderStage, _source: &str) -> Result<u32, String> {
        self.record(GlCall::CompileShader(stage));
        match self.compile_failures.get(&stage.to_string()) {
            Some(log) => Err(log.clone()),
            None => Ok(self.handle()),
        }
    }

    fn delete_shader(&self, shader: u32) {
        self.record(GlCall::DeleteShader(shader));
    }

    fn link_program(&self, _vertex: u32, _fragment: u32) -> Result<u32, String> {
        self.record(GlCall::LinkProgram);
        match &self.link_failure {
            Some(log) => Err(log.clone()),
            None => Ok(self.handle()),
        }
    }

    fn use_program(&self, program: Option<u32>) {
        self.record(GlCall::UseProgram(program));
    }

    fn delete_program(&self, program: u32) {
        self.record(GlCall::DeleteProgram(program));
    }

    fn attrib_location(&self, _program: u32, _name: &str) -> Option<u32> {
        Some(0)
    }

    fn uniform_location(&self, _program: u32, name: &str) -> Option<String> {
        Some(name.to_string())
    }

    fn set_uniform(&self, location: &String, upload: UniformUpload<'_>) {
        self.record(GlCall::SetUniform {
            name: location.clone(),
            value: upload.into(),
        });
    }

    fn create_vertex_buffer(&self, vertices: &[f32]) -> Result<u32, String> {
        self.record(GlCall::CreateBuffer(vertices.to_vec()));
        Ok(self.handle())
    }

    fn bind_vertex_attribute(&self, _buffer: u32, attribute: u32, components: i32) {
        self.record(GlCall::BindVertexAttribute {
            attribute,
            components,
        });
    }

    fn delete_buffer(&self, buffer: u32) {
        self.record(GlCall::DeleteBuffer(buffer));
    }

    fn configure_pipeline(&self, clear_color: Rgba) {
        self.record(GlCall::ConfigurePipeline(clear_color));
    }

    fn viewport(&self, width: u32, height: u32) {
        self.record(GlCall::Viewport(width, height));
    }

    fn clear(&self) {
        self.record(GlCall::Clear);
    }

    fn draw_triangle_strip(&self, vertex_count: i32) {
        self.record(GlCall::Draw(vertex_count));
    }

    fn create_texture(&self, _params: &SamplerParams, image: &TextureImage) -> Result<u32, String> {
        let texture = self.handle();
        self.record(GlCall::CreateTexture {
            texture,
            width: image.width(),
            height: image.height(),
        });
        Ok(texture)
    }

    fn update_texture(&self, texture: u32, _params: &SamplerParams, image: &TextureImage) {
        self.record(GlCall::UpdateTexture {
            texture,
            width: image.width(),
            height: image.height(),
        });
    }

    fn bind_texture(&self, unit: u32, texture: u32) {
        self.record(GlCall::BindTexture { unit, texture });
    }

    fn delete_texture(&self, texture: u32) {
        self.record(GlCall::DeleteTexture(texture));
    }
}

/// [`Host`] that hands out sequential frame requests and records
/// subscriptions.
#[derive(Debug, Default)]
pub struct RecordingHost {
    next_request: u64,
    pub requested: Vec<FrameRequest>,
    pub cancelled: Vec<FrameRequest>,
    pub subscribed: Vec<EventInterest>,
    pub unsubscribed: Vec<EventInterest>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interests subscribed and not yet unsubscribed.
    pub fn active_interests(&self) -> Vec<EventInterest> {
        self.subscribed
            .iter()
            .copied()
            .filter(|interest| !self.unsubscribed.contains(interest))
            .collect()
    }
}

impl Host for RecordingHost {
    fn request_frame(&mut self) -> FrameRequest {
        self.next_request += 1;
        let request = FrameRequest::new(self.next_request);
        self.requested.push(request);
        request
    }

    fn cancel_frame(&mut self, request: FrameRequest) {
        self.cancelled.push(request);
    }

    fn subscribe(&mut self, interest: EventInterest) {
        self.subscribed.push(interest);
    }

    fn unsubscribe(&mut self, interest: EventInterest) {
        self.unsubscribed.push(interest);
    }
}

enum FakeMedia {
    Image { width: u32, height: u32 },
    Video { width: u32, height: u32, frames: usize },
    Panic,
}

/// Loader serving solid-color content by locator; unknown locators fail.
#[derive(Default)]
pub struct FakeLoader {
    media: HashMap<String, FakeMedia>,
    delay: Option<Duration>,
}

impl FakeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, source: &str, width: u32, height: u32) -> Self {
        self.media
            .insert(source.to_string(), FakeMedia::Image { width, height });
        self
    }

    /// Sleeps before answering each load.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// A video whose source produces `frames` frames after the first.
    pub fn with_video(mut self, source: &str, width: u32, height: u32, frames: usize) -> Self {
        self.media.insert(
            source.to_string(),
            FakeMedia::Video {
                width,
                height,
                frames,
            },
        );
        self
    }

    /// A locator whose load panics instead of returning.
    pub fn with_panic(mut self, source: &str) -> Self {
        self.media.insert(source.to_string(), FakeMedia::Panic);
        self
    }
}

struct CountedFrames {
    width: u32,
    height: u32,
    remaining: usize,
}

impl VideoFrames for CountedFrames {
    fn next_frame(&mut self) -> Option<TextureImage> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(TextureImage::solid(self.width, self.height, [0, 0, 0, 255]))
    }
}

impl TextureLoader for FakeLoader {
    fn load(&self, descriptor: &TextureDescriptor) -> Result<LoadedMedia> {
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        match self.media.get(&descriptor.source) {
            Some(FakeMedia::Image { width, height }) => Ok(LoadedMedia::Image(
                TextureImage::solid(*width, *height, [255, 255, 255, 255]),
            )),
            Some(FakeMedia::Video {
                width,
                height,
                frames,
            }) => Ok(LoadedMedia::Video {
                first_frame: TextureImage::solid(*width, *height, [0, 0, 0, 255]),
                frames: Box::new(CountedFrames {
                    width: *width,
                    height: *height,
                    remaining: *frames,
                }),
            }),
            Some(FakeMedia::Panic) => panic!("decoder blew up on {}", descriptor.source),
            None => Err(anyhow!("no such file: {}", descriptor.source)),
        }
    }
}
