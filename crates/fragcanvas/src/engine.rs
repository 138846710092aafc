//! [`ShaderCanvas`], the engine entry point, and its [`EngineConfig`].
//!
//! ```text
//!   host events ──▶ handle_input ──▶ InputAdapter / FrameState / registry
//!                                                    │
//!   initialize ──▶ preprocess ──▶ ProgramManager     ▼
//!        │                                 tick ──▶ poll textures ──▶ bind uniforms
//!        └──▶ TextureManager::start                        └──▶ bind textures ──▶ draw
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Callbacks, CanvasError, Diagnostics};
use crate::frame::{clamp_smoothing, local_date, FrameState, FrameValues, QUAD_VERTEX_COUNT, QUAD_VERTICES};
use crate::gl::{GlBackend, REQUESTED_EXTENSIONS};
use crate::host::{EventInterest, FrameRequest, Host};
use crate::input::{CanvasRect, InputAdapter, InputEvent};
use crate::preprocess::{preprocess, PreprocessedShaders, DEFAULT_FRAGMENT_SHADER, DEFAULT_VERTEX_SHADER};
use crate::program::ProgramManager;
use crate::textures::{ImageFileLoader, LoadStrategy, TextureLoader, TextureManager};
use crate::types::{CanvasGeometry, ContextAttributes, Precision, Rgba, TextureDescriptor};
use crate::uniforms::{
    CustomUniform, UniformInput, UniformOrigin, UniformRegistry, UniformUpload, UniformValue,
};

/// Everything a canvas is built from. Only the fragment source is required.
pub struct EngineConfig {
    pub fragment_shader: String,
    pub vertex_shader: String,
    pub textures: Vec<TextureDescriptor>,
    pub uniforms: BTreeMap<String, CustomUniform>,
    pub clear_color: Rgba,
    /// `lowp`, `mediump` or `highp`; anything else falls back to `mediump`.
    pub precision: String,
    /// Pointer smoothing factor in `0..=1`; 1 tracks the pointer exactly.
    pub smoothing: f32,
    pub device_pixel_ratio: f64,
    pub context_attributes: ContextAttributes,
    pub load_strategy: LoadStrategy,
    /// Defaults to [`ImageFileLoader`].
    pub texture_loader: Option<Arc<dyn TextureLoader>>,
    pub callbacks: Callbacks,
}

impl EngineConfig {
    pub fn new(fragment_shader: impl Into<String>) -> Self {
        Self {
            fragment_shader: fragment_shader.into(),
            ..Self::default()
        }
    }

    pub fn with_vertex_shader(mut self, vertex_shader: impl Into<String>) -> Self {
        self.vertex_shader = vertex_shader.into();
        self
    }

    pub fn with_texture(mut self, texture: TextureDescriptor) -> Self {
        self.textures.push(texture);
        self
    }

    pub fn with_uniform(mut self, name: impl Into<String>, uniform: CustomUniform) -> Self {
        self.uniforms.insert(name.into(), uniform);
        self
    }

    pub fn with_clear_color(mut self, clear_color: Rgba) -> Self {
        self.clear_color = clear_color;
        self
    }

    pub fn with_precision(mut self, precision: impl Into<String>) -> Self {
        self.precision = precision.into();
        self
    }

    pub fn with_smoothing(mut self, smoothing: f32) -> Self {
        self.smoothing = smoothing;
        self
    }

    pub fn with_device_pixel_ratio(mut self, device_pixel_ratio: f64) -> Self {
        self.device_pixel_ratio = device_pixel_ratio;
        self
    }

    pub fn with_context_attributes(mut self, attributes: ContextAttributes) -> Self {
        self.context_attributes = attributes;
        self
    }

    pub fn with_load_strategy(mut self, strategy: LoadStrategy) -> Self {
        self.load_strategy = strategy;
        self
    }

    pub fn with_texture_loader(mut self, loader: Arc<dyn TextureLoader>) -> Self {
        self.texture_loader = Some(loader);
        self
    }

    pub fn with_callbacks(mut self, callbacks: Callbacks) -> Self {
        self.callbacks = callbacks;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fragment_shader: DEFAULT_FRAGMENT_SHADER.to_string(),
            vertex_shader: DEFAULT_VERTEX_SHADER.to_string(),
            textures: Vec::new(),
            uniforms: BTreeMap::new(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            precision: Precision::High.as_str().to_string(),
            smoothing: 1.0,
            device_pixel_ratio: 1.0,
            context_attributes: ContextAttributes::default(),
            load_strategy: LoadStrategy::default(),
            texture_loader: None,
            callbacks: Callbacks::default(),
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("fragment_shader", &self.fragment_shader.len())
            .field("vertex_shader", &self.vertex_shader.len())
            .field("textures", &self.textures)
            .field("uniforms", &self.uniforms)
            .field("clear_color", &self.clear_color)
            .field("precision", &self.precision)
            .field("smoothing", &self.smoothing)
            .field("device_pixel_ratio", &self.device_pixel_ratio)
            .field("context_attributes", &self.context_attributes)
            .field("load_strategy", &self.load_strategy)
            .field("texture_loader", &self.texture_loader.is_some())
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    /// Initialization failed; nothing is drawn.
    Halted,
    TornDown,
}

/// One fullscreen fragment program drawn into one surface.
pub struct ShaderCanvas<B: GlBackend, H: Host> {
    gl: B,
    host: H,
    fragment_shader: String,
    vertex_shader: String,
    precision: String,
    clear_color: Rgba,
    context_attributes: ContextAttributes,
    registry: UniformRegistry,
    diagnostics: Diagnostics,
    program: ProgramManager<B>,
    textures: TextureManager<B>,
    frame: FrameState,
    input: InputAdapter,
    geometry: CanvasGeometry,
    sources: Option<PreprocessedShaders>,
    quad: Option<B::Buffer>,
    pending_frame: Option<FrameRequest>,
    interests: Vec<EventInterest>,
    lifecycle: Lifecycle,
}

impl<B: GlBackend, H: Host> ShaderCanvas<B, H> {
    /// Classifies the custom inputs and prepares the texture list. Nothing
    /// touches the GPU until [`ShaderCanvas::initialize`].
    pub fn new(gl: B, host: H, config: EngineConfig) -> Self {
        let EngineConfig {
            fragment_shader,
            vertex_shader,
            textures,
            uniforms,
            clear_color,
            precision,
            smoothing,
            device_pixel_ratio,
            context_attributes,
            load_strategy,
            texture_loader,
            callbacks,
        } = config;

        let mut diagnostics = Diagnostics::new(callbacks);
        let (smoothing, warning) = clamp_smoothing(smoothing);
        if let Some(warning) = warning {
            diagnostics.report(warning);
        }

        let mut registry = UniformRegistry::new();
        for (name, uniform) in &uniforms {
            if let Err(source) = registry.add_custom(name, uniform) {
                diagnostics.report(CanvasError::InvalidUniform {
                    name: name.clone(),
                    source,
                });
            }
        }

        let loader = texture_loader.unwrap_or_else(|| Arc::new(ImageFileLoader::new()));
        let mut textures = TextureManager::new(textures, loader, load_strategy);
        textures.register_uniforms(&mut registry);

        let geometry = CanvasGeometry::new(0.0, 0.0, device_pixel_ratio);

        Self {
            gl,
            host,
            fragment_shader,
            vertex_shader,
            precision,
            clear_color,
            context_attributes,
            registry,
            diagnostics,
            program: ProgramManager::new(),
            textures,
            frame: FrameState::new(smoothing),
            input: InputAdapter::default(),
            geometry,
            sources: None,
            quad: None,
            pending_frame: None,
            interests: Vec::new(),
            lifecycle: Lifecycle::Created,
        }
    }

    /// Builds the program, starts texture loads, attaches listeners and
    /// requests the first frame. Failures are reported and leave the canvas
    /// halted; [`ShaderCanvas::teardown`] is still safe afterwards.
    pub fn initialize(&mut self, logical_size: (f64, f64)) {
        if self.lifecycle != Lifecycle::Created {
            tracing::debug!(state = ?self.lifecycle, "initialize ignored");
            return;
        }
        for extension in REQUESTED_EXTENSIONS {
            let available = self.gl.has_extension(extension);
            tracing::debug!(extension, available, "GL extension probe");
        }

        self.set_geometry(logical_size.0, logical_size.1, self.geometry.device_pixel_ratio);
        self.input.set_size(logical_size.0, logical_size.1);
        self.gl.configure_pipeline(self.clear_color);

        let sources = preprocess(
            &self.fragment_shader,
            &self.vertex_shader,
            &self.precision,
            self.geometry.device_pixel_ratio,
            &mut self.registry,
            &mut self.diagnostics,
        );
        let linked = self.program.build(&self.gl, &sources, &mut self.diagnostics);
        self.sources = Some(sources);
        if !linked {
            self.halt();
            return;
        }

        let quad = match self.gl.create_vertex_buffer(&QUAD_VERTICES) {
            Ok(quad) => quad,
            Err(message) => {
                self.diagnostics
                    .report(CanvasError::Backend(format!("quad vertex buffer: {message}")));
                self.halt();
                return;
            }
        };
        self.quad = Some(quad);
        self.program.attach_quad(&self.gl, quad);
        self.program.resolve_locations(&self.gl, &self.registry);

        self.attach_listeners();

        self.textures.start(&mut self.diagnostics);
        self.textures.poll(
            &self.gl,
            &mut self.registry,
            &mut self.diagnostics,
            self.geometry.device_pixel_ratio,
        );

        self.push_resolution();
        self.lifecycle = Lifecycle::Running;
        self.pending_frame = Some(self.host.request_frame());
        tracing::debug!(
            width = self.geometry.drawing_buffer.0,
            height = self.geometry.drawing_buffer.1,
            textures = self.textures.len(),
            "shader canvas initialized"
        );
    }

    fn attach_listeners(&mut self) {
        let builtins = self.registry.builtins();
        let mut interests = Vec::new();
        if self.registry.is_needed(builtins.mouse) {
            interests.push(EventInterest::Pointer);
        }
        if self.registry.is_needed(builtins.device_orientation) {
            interests.push(EventInterest::DeviceOrientation);
        }
        interests.push(EventInterest::Resize);
        for interest in &interests {
            self.host.subscribe(*interest);
        }
        self.interests = interests;
    }

    /// Draws one frame for the host's refresh callback.
    /// Stops the canvas for good after a setup failure. Texture loads are
    /// skipped but still settle.
    fn halt(&mut self) {
        self.lifecycle = Lifecycle::Halted;
        self.textures.skip(&mut self.diagnostics);
    }

    pub fn tick(&mut self, timestamp: Duration) {
        if self.lifecycle != Lifecycle::Running {
            return;
        }
        self.pending_frame = None;
        let device_pixel_ratio = self.geometry.device_pixel_ratio;

        self.textures.poll(
            &self.gl,
            &mut self.registry,
            &mut self.diagnostics,
            device_pixel_ratio,
        );

        let values = self.frame.advance(timestamp);
        self.store_frame_values(&values);

        let (width, height) = self.geometry.drawing_buffer;
        self.gl.viewport(width, height);
        self.gl.clear();
        if let Some(quad) = self.quad {
            self.program.attach_quad(&self.gl, quad);
        }

        self.bind_uniforms(&values);
        self.textures
            .bind(&self.gl, &mut self.registry, device_pixel_ratio);

        self.gl.draw_triangle_strip(QUAD_VERTEX_COUNT);
        tracing::trace!(frame = values.frame, time = values.time, "tick");

        self.pending_frame = Some(self.host.request_frame());
    }

    fn store_frame_values(&mut self, values: &FrameValues) {
        let builtins = self.registry.builtins();
        self.registry
            .set_value(builtins.time, UniformValue::Scalar(values.time));
        self.registry
            .set_value(builtins.time_delta, UniformValue::Scalar(values.time_delta));
        self.registry
            .set_value(builtins.frame, UniformValue::Scalar(values.frame as f32));
        self.registry.set_value(
            builtins.mouse,
            UniformValue::FixedVector(values.mouse.to_vec()),
        );
        if self.registry.is_needed(builtins.date) {
            self.registry
                .set_value(builtins.date, UniformValue::FixedVector(local_date().to_vec()));
        }
    }

    /// Custom and texture inputs go through the type-dispatched upload; the
    /// built-ins each use the call matching their fixed type.
    fn bind_uniforms(&self, values: &FrameValues) {
        let builtins = self.registry.builtins();
        for (id, location) in self.program.locations() {
            let spec = self.registry.get(*id);
            if spec.origin != UniformOrigin::BuiltIn {
                spec.with_upload(|upload| self.gl.set_uniform(location, upload));
                continue;
            }
            let components = spec.value.components();
            let upload = if *id == builtins.frame {
                UniformUpload::Int(values.frame)
            } else if *id == builtins.time || *id == builtins.time_delta {
                UniformUpload::Float(components[0])
            } else {
                UniformUpload::FloatVector {
                    size: spec.ty.element_len() as u8,
                    data: &components,
                }
            };
            self.gl.set_uniform(location, upload);
        }
    }

    pub fn handle_input(&mut self, event: InputEvent) {
        if self.lifecycle == Lifecycle::TornDown {
            return;
        }
        match event {
            InputEvent::PointerDown(position) => {
                if let Some((x, y)) = self.input.locate(&position) {
                    self.frame.pointer_down(x, y);
                }
            }
            InputEvent::PointerMove(position) => {
                if let Some((x, y)) = self.input.locate(&position) {
                    self.frame.pointer_move(x, y);
                }
            }
            InputEvent::PointerUp | InputEvent::PointerLeave => self.frame.pointer_up(),
            InputEvent::Orientation(reading) => {
                let id = self.registry.builtins().device_orientation;
                self.registry
                    .set_value(id, UniformValue::FixedVector(reading.as_uniform().to_vec()));
            }
            InputEvent::Resize { width, height } => self.resize((width, height)),
            InputEvent::ScaleFactor(device_pixel_ratio) => {
                let (width, height) = self.geometry.logical_size;
                self.set_geometry(width, height, device_pixel_ratio);
                self.textures
                    .refresh_resolutions(&mut self.registry, device_pixel_ratio);
                self.push_resolution();
            }
            InputEvent::Layout { bounds, scroll } => self.input.set_layout(bounds, scroll),
        }
    }

    /// Recomputes the drawing buffer and pushes `iResolution` right away
    /// when the shader reads it.
    pub fn resize(&mut self, logical_size: (f64, f64)) {
        if self.lifecycle == Lifecycle::TornDown {
            return;
        }
        let (width, height) = logical_size;
        self.set_geometry(width, height, self.geometry.device_pixel_ratio);
        self.input.set_size(width, height);
        self.push_resolution();
    }

    fn set_geometry(&mut self, width: f64, height: f64, device_pixel_ratio: f64) {
        self.geometry = CanvasGeometry::new(width, height, device_pixel_ratio);
        let resolution = self.registry.builtins().resolution;
        self.registry.set_value(
            resolution,
            UniformValue::FixedVector(self.geometry.resolution().to_vec()),
        );
    }

    fn push_resolution(&self) {
        let resolution = self.registry.builtins().resolution;
        if !self.registry.is_needed(resolution) {
            return;
        }
        if let Some(location) = self.program.location(resolution) {
            let data = self.geometry.resolution();
            self.gl
                .set_uniform(location, UniformUpload::FloatVector { size: 2, data: &data });
        }
    }

    /// Replaces a custom input's value; it is uploaded on the next tick.
    pub fn set_uniform(
        &mut self,
        name: &str,
        value: impl Into<UniformInput>,
    ) -> Result<(), CanvasError> {
        let value = value.into();
        self.registry
            .set_custom_value(name, &value)
            .map_err(|source| {
                let error = CanvasError::InvalidUniform {
                    name: name.to_string(),
                    source,
                };
                self.diagnostics.report(error.clone());
                error
            })
    }

    /// Cancels the pending frame, then releases the program, the textures,
    /// the listeners and the quad buffer. Safe to call at any point and more
    /// than once.
    pub fn teardown(&mut self) {
        if self.lifecycle == Lifecycle::TornDown {
            return;
        }
        if let Some(request) = self.pending_frame.take() {
            self.host.cancel_frame(request);
        }
        self.program.teardown(&self.gl);
        self.textures.teardown(&self.gl);
        for interest in self.interests.drain(..) {
            self.host.unsubscribe(interest);
        }
        if let Some(quad) = self.quad.take() {
            self.gl.delete_buffer(quad);
        }
        self.lifecycle = Lifecycle::TornDown;
        tracing::debug!("shader canvas torn down");
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle == Lifecycle::Running
    }

    pub fn registry(&self) -> &UniformRegistry {
        &self.registry
    }

    pub fn geometry(&self) -> &CanvasGeometry {
        &self.geometry
    }

    /// Final shader sources, once initialized.
    pub fn sources(&self) -> Option<&PreprocessedShaders> {
        self.sources.as_ref()
    }

    pub fn frame_state(&self) -> &FrameState {
        &self.frame
    }

    pub fn textures(&self) -> &TextureManager<B> {
        &self.textures
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn context_attributes(&self) -> &ContextAttributes {
        &self.context_attributes
    }

    pub fn canvas_bounds(&self) -> CanvasRect {
        self.input.bounds()
    }

    pub fn gl(&self) -> &B {
        &self.gl
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }
}

impl<B: GlBackend, H: Host> Drop for ShaderCanvas<B, H> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<B: GlBackend, H: Host> fmt::Debug for ShaderCanvas<B, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderCanvas")
            .field("lifecycle", &self.lifecycle)
            .field("geometry", &self.geometry)
            .field("uniforms", &self.registry.len())
            .field("textures", &self.textures.len())
            .field("pending_frame", &self.pending_frame)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::thread;

    use super::*;
    use crate::gl::ShaderStage;
    use crate::host::{CancellationToken, FrameQueue, RenderLoop};
    use crate::input::{OrientationReading, PointerPosition};
    use crate::testing::{FakeLoader, GlCall, RecordedUpload, RecordingGl, RecordingHost};
    use crate::types::{FilterMode, WrapMode};

    const MOUSE_SHADER: &str = "void mainImage(out vec4 c, in vec2 p) {
    c = vec4(iMouse.xy / iResolution.xy, float(iFrame), iTime);
}";

    fn canvas(config: EngineConfig) -> ShaderCanvas<RecordingGl, RecordingHost> {
        ShaderCanvas::new(RecordingGl::new(), RecordingHost::new(), config)
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn mouse_xy(gl: &RecordingGl) -> Vec<[f32; 2]> {
        gl.uploads("iMouse")
            .into_iter()
            .filter_map(|upload| match upload {
                RecordedUpload::Floats(values) => Some([values[0], values[1]]),
                _ => None,
            })
            .collect()
    }

    fn clamp(source: &str) -> TextureDescriptor {
        TextureDescriptor::new(source)
            .with_wrap(WrapMode::ClampToEdge, WrapMode::ClampToEdge)
            .with_filters(FilterMode::Linear, FilterMode::Linear)
    }

    #[test]
    fn initialize_links_and_requests_first_frame() {
        let mut canvas = canvas(EngineConfig::new(MOUSE_SHADER));
        canvas.initialize((320.0, 200.0));

        assert!(canvas.is_running());
        assert_eq!(canvas.host().requested.len(), 1);
        assert!(canvas.sources().unwrap().shadertoy);
        assert_eq!(canvas.geometry().drawing_buffer, (320, 200));
        assert!(canvas.diagnostics().has_settled());
        let calls = canvas.gl().calls();
        assert!(calls.contains(&GlCall::ConfigurePipeline([0.0, 0.0, 0.0, 1.0])));
        assert!(calls.contains(&GlCall::CreateBuffer(QUAD_VERTICES.to_vec())));
    }

    #[test]
    fn frame_counter_binds_pre_increment_value() {
        let mut canvas = canvas(EngineConfig::new(MOUSE_SHADER));
        canvas.initialize((100.0, 100.0));
        for n in 0..4 {
            canvas.tick(ms(n * 16));
        }
        assert_eq!(
            canvas.gl().uploads("iFrame"),
            vec![
                RecordedUpload::Int(0),
                RecordedUpload::Int(1),
                RecordedUpload::Int(2),
                RecordedUpload::Int(3)
            ]
        );
    }

    #[test]
    fn time_starts_at_zero_and_accumulates() {
        let mut canvas = canvas(EngineConfig::new(MOUSE_SHADER));
        canvas.initialize((100.0, 100.0));
        canvas.tick(ms(5_000));
        canvas.tick(ms(5_250));
        canvas.tick(ms(5_500));
        let times: Vec<f32> = canvas
            .gl()
            .uploads("iTime")
            .into_iter()
            .filter_map(|upload| match upload {
                RecordedUpload::Float(value) => Some(value),
                _ => None,
            })
            .collect();
        assert_eq!(times.len(), 3);
        assert_eq!(times[0], 0.0);
        assert!((times[1] - 0.25).abs() < 1e-6);
        assert!((times[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn unreferenced_builtins_are_never_bound() {
        let mut canvas = canvas(EngineConfig::new(MOUSE_SHADER));
        canvas.initialize((100.0, 100.0));
        canvas.tick(ms(0));
        assert!(canvas.gl().uploads("iDate").is_empty());
        assert!(canvas.gl().uploads("iTimeDelta").is_empty());
        assert!(!canvas.registry().by_name("iDate").unwrap().needed);
    }

    #[test]
    fn pointer_without_smoothing_binds_flipped_position() {
        let mut canvas = canvas(EngineConfig::new(MOUSE_SHADER));
        canvas.initialize((200.0, 100.0));
        canvas.handle_input(InputEvent::Layout {
            bounds: CanvasRect::new(10.0, 20.0, 200.0, 100.0),
            scroll: (0.0, 0.0),
        });
        canvas.handle_input(InputEvent::PointerMove(PointerPosition::mouse(60.0, 30.0)));
        canvas.tick(ms(0));
        assert_eq!(mouse_xy(canvas.gl()).last(), Some(&[50.0, 90.0]));
    }

    #[test]
    fn half_smoothing_binds_midpoint_after_one_tick() {
        let mut canvas = canvas(EngineConfig::new(MOUSE_SHADER).with_smoothing(0.5));
        canvas.initialize((200.0, 100.0));
        canvas.tick(ms(0));
        canvas.handle_input(InputEvent::PointerMove(PointerPosition::mouse(80.0, 60.0)));
        canvas.tick(ms(16));
        assert_eq!(mouse_xy(canvas.gl()).last(), Some(&[40.0, 20.0]));
    }

    #[test]
    fn press_fills_press_components_until_release() {
        let mut canvas = canvas(EngineConfig::new(MOUSE_SHADER));
        canvas.initialize((100.0, 100.0));
        canvas.handle_input(InputEvent::PointerDown(PointerPosition::mouse(10.0, 10.0)));
        canvas.tick(ms(0));
        canvas.handle_input(InputEvent::PointerLeave);
        canvas.tick(ms(16));
        assert_eq!(
            canvas.gl().uploads("iMouse"),
            vec![
                RecordedUpload::Floats(vec![10.0, 90.0, 10.0, 90.0]),
                RecordedUpload::Floats(vec![10.0, 90.0, 0.0, 0.0]),
            ]
        );
    }

    #[test]
    fn listeners_follow_needed_inputs() {
        let mut plain = canvas(EngineConfig::new("void main() { gl_FragColor = vec4(iTime); }"));
        plain.initialize((10.0, 10.0));
        assert_eq!(plain.host().active_interests(), vec![EventInterest::Resize]);

        let mut tilt = canvas(EngineConfig::new(
            "void main() { gl_FragColor = iDeviceOrientation + iMouse; }",
        ));
        tilt.initialize((10.0, 10.0));
        assert_eq!(
            tilt.host().active_interests(),
            vec![
                EventInterest::Pointer,
                EventInterest::DeviceOrientation,
                EventInterest::Resize
            ]
        );
    }

    #[test]
    fn resize_pushes_resolution_immediately() {
        let mut canvas = canvas(EngineConfig::new(MOUSE_SHADER).with_device_pixel_ratio(2.0));
        canvas.initialize((100.0, 50.0));
        canvas.gl().clear_calls();
        canvas.handle_input(InputEvent::Resize {
            width: 120.5,
            height: 60.0,
        });
        assert_eq!(canvas.geometry().drawing_buffer, (241, 120));
        assert_eq!(
            canvas.gl().uploads("iResolution"),
            vec![RecordedUpload::Floats(vec![241.0, 120.0])]
        );
    }

    #[test]
    fn custom_uniforms_bind_and_update() {
        let config = EngineConfig::new("void main() { gl_FragColor = vec4(uTint, uGain); }")
            .with_uniform("uTint", CustomUniform::new("3f", [1.0_f32, 0.5, 0.25]))
            .with_uniform("uGain", CustomUniform::new("1f", 2.0_f32));
        let mut canvas = canvas(config);
        canvas.initialize((10.0, 10.0));
        canvas.tick(ms(0));
        canvas.set_uniform("uGain", 3.0_f32).unwrap();
        canvas.tick(ms(16));

        assert_eq!(
            canvas.gl().uploads("uTint")[0],
            RecordedUpload::Floats(vec![1.0, 0.5, 0.25])
        );
        assert_eq!(
            canvas.gl().uploads("uGain"),
            vec![RecordedUpload::Float(2.0), RecordedUpload::Float(3.0)]
        );
        assert!(canvas.set_uniform("uTint", 1.0_f32).is_err());
        assert_eq!(canvas.diagnostics().error_count(), 1);
    }

    #[test]
    fn invalid_custom_type_is_dropped_and_rendering_continues() {
        let errors = Rc::new(RefCell::new(Vec::new()));
        let sink = errors.clone();
        let config = EngineConfig::new("void main() { gl_FragColor = vec4(uOdd); }")
            .with_uniform("uOdd", CustomUniform::new("5f", 1.0_f32))
            .with_callbacks(Callbacks::new().on_error(move |msg| sink.borrow_mut().push(msg.to_string())));
        let mut canvas = canvas(config);
        canvas.initialize((10.0, 10.0));
        canvas.tick(ms(0));

        assert_eq!(errors.borrow().len(), 1);
        assert!(errors.borrow()[0].contains("5f"));
        assert!(canvas.is_running());
        assert!(!canvas.sources().unwrap().fragment.contains("uniform float uOdd"));
    }

    #[test]
    fn out_of_range_smoothing_warns() {
        let warnings = Rc::new(RefCell::new(0));
        let counter = warnings.clone();
        let canvas = canvas(
            EngineConfig::new(MOUSE_SHADER)
                .with_smoothing(3.0)
                .with_callbacks(Callbacks::new().on_warning(move |_| *counter.borrow_mut() += 1)),
        );
        assert_eq!(*warnings.borrow(), 1);
        assert_eq!(canvas.frame_state().smoothing(), 1.0);
    }

    #[test]
    fn compile_failure_halts_without_frames() {
        let gl = RecordingGl::new().fail_compile(ShaderStage::Fragment, "0:3: 'foo' undeclared");
        let mut canvas = ShaderCanvas::new(gl, RecordingHost::new(), EngineConfig::new(MOUSE_SHADER));
        canvas.initialize((10.0, 10.0));
        canvas.tick(ms(0));

        assert!(!canvas.is_running());
        assert!(canvas.host().requested.is_empty());
        assert_eq!(canvas.gl().count(|call| matches!(call, GlCall::Draw(_))), 0);
        assert_eq!(canvas.diagnostics().warning_count(), 1);
        assert_eq!(canvas.diagnostics().error_count(), 1);
        canvas.teardown();
    }

    #[test]
    fn link_failure_still_settles_textures() {
        let settled = Rc::new(RefCell::new(0));
        let count = settled.clone();
        let loader = FakeLoader::new().with_image("a.png", 4, 4);
        let config = EngineConfig::new(MOUSE_SHADER)
            .with_texture(clamp("a.png"))
            .with_texture_loader(Arc::new(loader))
            .with_load_strategy(LoadStrategy::Inline)
            .with_callbacks(Callbacks::new().on_textures_settled(move || *count.borrow_mut() += 1));
        let gl = RecordingGl::new().fail_link("missing main");
        let mut canvas = ShaderCanvas::new(gl, RecordingHost::new(), config);
        canvas.initialize((10.0, 10.0));
        canvas.tick(ms(0));

        assert!(!canvas.is_running());
        assert!(canvas.diagnostics().has_settled());
        assert_eq!(*settled.borrow(), 1);
        assert_eq!(
            canvas.gl().count(|call| matches!(call, GlCall::CreateTexture { .. })),
            0
        );
    }

    #[test]
    fn frame_counter_stays_exact_past_float_precision() {
        let mut canvas = canvas(EngineConfig::new(MOUSE_SHADER));
        canvas.initialize((10.0, 10.0));
        canvas.frame = FrameState::new(1.0).starting_at(16_777_217);
        canvas.tick(ms(0));
        canvas.tick(ms(16));
        assert_eq!(
            canvas.gl().uploads("iFrame"),
            vec![RecordedUpload::Int(16_777_217), RecordedUpload::Int(16_777_218)]
        );
    }

    #[test]
    fn orientation_reaches_the_next_tick() {
        let mut canvas = canvas(EngineConfig::new(
            "void main() { gl_FragColor = iDeviceOrientation / 360.0; }",
        ));
        canvas.initialize((10.0, 10.0));
        canvas.handle_input(InputEvent::Orientation(OrientationReading {
            alpha: Some(90.0),
            ..OrientationReading::default()
        }));
        canvas.tick(ms(0));
        assert_eq!(
            canvas.gl().uploads("iDeviceOrientation"),
            vec![RecordedUpload::Floats(vec![90.0, 0.0, 0.0, 0.0])]
        );
    }

    #[test]
    fn scale_factor_rescales_buffer_and_channel_resolution() {
        let loader = FakeLoader::new().with_image("a.png", 8, 4);
        let config = EngineConfig::new(
            "void main() { gl_FragColor = texture(iChannel0, gl_FragCoord.xy / iResolution.xy) * iChannelResolution[0].x; }",
        )
        .with_texture(clamp("a.png"))
        .with_texture_loader(Arc::new(loader))
        .with_load_strategy(LoadStrategy::Inline);
        let mut canvas = canvas(config);
        canvas.initialize((100.0, 50.0));
        canvas.gl().clear_calls();

        canvas.handle_input(InputEvent::ScaleFactor(2.0));
        assert_eq!(canvas.geometry().drawing_buffer, (200, 100));
        assert_eq!(
            canvas.gl().uploads("iResolution"),
            vec![RecordedUpload::Floats(vec![200.0, 100.0])]
        );

        canvas.tick(ms(0));
        assert_eq!(
            canvas.gl().uploads("iChannelResolution"),
            vec![RecordedUpload::Floats(vec![16.0, 8.0, 0.0])]
        );
    }

    #[test]
    fn tick_draws_quad_and_reschedules() {
        let mut canvas = canvas(EngineConfig::new(MOUSE_SHADER));
        canvas.initialize((64.0, 32.0));
        canvas.tick(ms(0));
        let calls = canvas.gl().calls();
        assert!(calls.contains(&GlCall::Viewport(64, 32)));
        assert!(calls.contains(&GlCall::Clear));
        assert!(calls.contains(&GlCall::Draw(4)));
        assert_eq!(canvas.host().requested.len(), 2);
    }

    #[test]
    fn textures_bind_to_units_and_report_resolution() {
        let loader = FakeLoader::new().with_image("a.png", 8, 4).with_image("b.png", 2, 2);
        let config = EngineConfig::new(
            "void main() { gl_FragColor = texture(iChannel1, vec2(0.0)) * iChannelResolution[0].x; }",
        )
        .with_texture(clamp("a.png"))
        .with_texture(clamp("b.png"))
        .with_texture_loader(Arc::new(loader))
        .with_load_strategy(LoadStrategy::Inline);
        let mut canvas = canvas(config);
        canvas.initialize((10.0, 10.0));
        canvas.tick(ms(0));

        let binds: Vec<_> = canvas
            .gl()
            .calls()
            .into_iter()
            .filter(|call| matches!(call, GlCall::BindTexture { .. }))
            .collect();
        assert_eq!(binds.len(), 1);
        assert!(matches!(binds[0], GlCall::BindTexture { unit: 1, .. }));
        assert_eq!(
            canvas.gl().uploads("iChannel1"),
            vec![RecordedUpload::Int(1)]
        );
        assert_eq!(
            canvas.gl().uploads("iChannelResolution"),
            vec![RecordedUpload::Floats(vec![8.0, 4.0, 0.0, 2.0, 2.0, 0.0])]
        );
        assert!(canvas.gl().uploads("iChannel0").is_empty());
    }

    #[test]
    fn teardown_before_textures_load_is_clean() {
        let loader = FakeLoader::new()
            .with_image("slow.png", 4, 4)
            .with_delay(Duration::from_millis(50));
        let config = EngineConfig::new(MOUSE_SHADER)
            .with_texture(clamp("slow.png"))
            .with_texture_loader(Arc::new(loader))
            .with_load_strategy(LoadStrategy::Threaded);
        let mut canvas = canvas(config);
        canvas.initialize((10.0, 10.0));
        canvas.teardown();
        canvas.teardown();
        thread::sleep(Duration::from_millis(80));
        canvas.tick(ms(16));

        let host = canvas.host();
        assert_eq!(host.cancelled, host.requested);
        assert!(host.active_interests().is_empty());
        let gl = canvas.gl();
        assert_eq!(gl.count(|call| matches!(call, GlCall::DeleteProgram(_))), 1);
        assert_eq!(gl.count(|call| matches!(call, GlCall::DeleteBuffer(_))), 1);
        assert_eq!(gl.count(|call| matches!(call, GlCall::CreateTexture { .. })), 0);
        assert!(!canvas.is_running());
        assert!(!canvas.diagnostics().has_settled());
    }

    #[test]
    fn render_loop_runs_until_cancelled() {
        let token = CancellationToken::new();
        let mut canvas = ShaderCanvas::new(
            RecordingGl::new(),
            FrameQueue::new(),
            EngineConfig::new(MOUSE_SHADER),
        );
        canvas.initialize((10.0, 10.0));

        let stopper = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            stopper.cancel();
        });
        let ticks = RenderLoop::new(token)
            .with_frame_interval(Duration::from_millis(1))
            .run(&mut canvas);
        handle.join().unwrap();

        assert!(ticks > 0);
        assert!(!canvas.is_running());
        assert!(!canvas.host().has_pending());
    }
}
