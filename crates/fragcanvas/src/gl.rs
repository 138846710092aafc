//! The slice of OpenGL / WebGL the engine drives, behind [`GlBackend`].
//!
//! [`GlowBackend`] implements it on top of a `glow::Context`, which covers
//! native GL, GLES and WebGL (through glow's `web_sys` bindings). Tests use a
//! recording backend so the engine can be exercised without a GPU.

use std::fmt;

use glow::HasContext;

use crate::textures::TextureImage;
use crate::types::{FilterMode, Rgba, WrapMode};
use crate::uniforms::UniformUpload;

/// Extensions the engine asks for. Shaders relying on `dFdx` or
/// `texture2DLodEXT` need them on WebGL 1; native contexts expose the same
/// functionality under `GL_`-prefixed names or in core.
pub const REQUESTED_EXTENSIONS: [&str; 2] = ["OES_standard_derivatives", "EXT_shader_texture_lod"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn gl_enum(self) -> u32 {
        match self {
            ShaderStage::Vertex => glow::VERTEX_SHADER,
            ShaderStage::Fragment => glow::FRAGMENT_SHADER,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

/// Sampling state applied when a texture is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerParams {
    pub wrap_s: WrapMode,
    pub wrap_t: WrapMode,
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
}

impl SamplerParams {
    pub fn generates_mipmaps(&self) -> bool {
        self.min_filter.uses_mipmaps()
    }
}

/// Everything the engine needs from a GL context.
///
/// Creation methods return the driver's message on failure. Implementations
/// must not panic; a failing call surfaces as an `Err` or is ignored by the
/// driver the way GL ignores calls on invalid handles.
pub trait GlBackend {
    type Shader: Copy + fmt::Debug;
    type Program: Copy + fmt::Debug;
    type Texture: Copy + fmt::Debug;
    type Buffer: Copy + fmt::Debug;
    type UniformLocation: Clone + fmt::Debug;

    fn has_extension(&self, name: &str) -> bool;

    /// Compiles one stage. On failure the shader object is released and the
    /// compiler's info log is returned.
    fn compile_shader(&self, stage: ShaderStage, source: &str) -> Result<Self::Shader, String>;
    fn delete_shader(&self, shader: Self::Shader);
    /// Links both stages. On failure the program is released and the
    /// linker's info log is returned.
    fn link_program(
        &self,
        vertex: Self::Shader,
        fragment: Self::Shader,
    ) -> Result<Self::Program, String>;
    fn use_program(&self, program: Option<Self::Program>);
    fn delete_program(&self, program: Self::Program);

    fn attrib_location(&self, program: Self::Program, name: &str) -> Option<u32>;
    fn uniform_location(&self, program: Self::Program, name: &str)
        -> Option<Self::UniformLocation>;
    fn set_uniform(&self, location: &Self::UniformLocation, upload: UniformUpload<'_>);

    /// Creates an array buffer holding `vertices` for static drawing.
    fn create_vertex_buffer(&self, vertices: &[f32]) -> Result<Self::Buffer, String>;
    /// Binds `buffer` and feeds `components` floats per vertex into `attribute`.
    fn bind_vertex_attribute(&self, buffer: Self::Buffer, attribute: u32, components: i32);
    fn delete_buffer(&self, buffer: Self::Buffer);

    /// One-time pipeline state: clear color, depth clear value and depth test.
    fn configure_pipeline(&self, clear_color: Rgba);
    fn viewport(&self, width: u32, height: u32);
    fn clear(&self);
    fn draw_triangle_strip(&self, vertex_count: i32);

    fn create_texture(
        &self,
        params: &SamplerParams,
        image: &TextureImage,
    ) -> Result<Self::Texture, String>;
    /// Replaces the content of an existing texture, regenerating mipmaps
    /// when `params` asks for them.
    fn update_texture(&self, texture: Self::Texture, params: &SamplerParams, image: &TextureImage);
    fn bind_texture(&self, unit: u32, texture: Self::Texture);
    fn delete_texture(&self, texture: Self::Texture);
}

/// [`GlBackend`] over a live `glow::Context`.
pub struct GlowBackend {
    gl: glow::Context,
}

impl GlowBackend {
    pub fn new(gl: glow::Context) -> Self {
        Self { gl }
    }

    pub fn gl(&self) -> &glow::Context {
        &self.gl
    }

    pub fn into_gl(self) -> glow::Context {
        self.gl
    }

    #[allow(unsafe_code)]
    fn upload_pixels(&self, params: &SamplerParams, image: &TextureImage) {
        // SAFETY: the texture is bound to TEXTURE_2D by the caller and
        // `pixels` holds width * height RGBA8 texels.
        unsafe {
            self.gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            self.gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                glow::RGBA as i32,
                image.width() as i32,
                image.height() as i32,
                0,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(Some(image.pixels())),
            );
            if params.generates_mipmaps() {
                self.gl.generate_mipmap(glow::TEXTURE_2D);
            }
        }
    }
}

impl fmt::Debug for GlowBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlowBackend").finish_non_exhaustive()
    }
}

#[allow(unsafe_code)]
impl GlBackend for GlowBackend {
    type Shader = glow::Shader;
    type Program = glow::Program;
    type Texture = glow::Texture;
    type Buffer = glow::Buffer;
    type UniformLocation = glow::UniformLocation;

    fn has_extension(&self, name: &str) -> bool {
        let extensions = self.gl.supported_extensions();
        extensions.contains(name) || extensions.contains(&format!("GL_{name}"))
    }

    fn compile_shader(&self, stage: ShaderStage, source: &str) -> Result<glow::Shader, String> {
        // SAFETY: glow wraps raw GL calls as unsafe. The stage enum is a
        // valid shader type and the shader is deleted on the failure path.
        unsafe {
            let shader = self.gl.create_shader(stage.gl_enum())?;
            self.gl.shader_source(shader, source);
            self.gl.compile_shader(shader);
            if self.gl.get_shader_compile_status(shader) {
                Ok(shader)
            } else {
                let log = self.gl.get_shader_info_log(shader);
                self.gl.delete_shader(shader);
                Err(log)
            }
        }
    }

    fn delete_shader(&self, shader: glow::Shader) {
        // SAFETY: shader handle came from `compile_shader`.
        unsafe { self.gl.delete_shader(shader) }
    }

    fn link_program(
        &self,
        vertex: glow::Shader,
        fragment: glow::Shader,
    ) -> Result<glow::Program, String> {
        // SAFETY: both handles are compiled shaders; the program is deleted
        // on the failure path.
        unsafe {
            let program = self.gl.create_program()?;
            self.gl.attach_shader(program, vertex);
            self.gl.attach_shader(program, fragment);
            self.gl.link_program(program);
            if self.gl.get_program_link_status(program) {
                Ok(program)
            } else {
                let log = self.gl.get_program_info_log(program);
                self.gl.delete_program(program);
                Err(log)
            }
        }
    }

    fn use_program(&self, program: Option<glow::Program>) {
        // SAFETY: `None` unbinds; `Some` holds a linked program.
        unsafe { self.gl.use_program(program) }
    }

    fn delete_program(&self, program: glow::Program) {
        // SAFETY: program handle came from `link_program`.
        unsafe { self.gl.delete_program(program) }
    }

    fn attrib_location(&self, program: glow::Program, name: &str) -> Option<u32> {
        // SAFETY: program handle came from `link_program`.
        unsafe { self.gl.get_attrib_location(program, name) }
    }

    fn uniform_location(&self, program: glow::Program, name: &str) -> Option<glow::UniformLocation> {
        // SAFETY: program handle came from `link_program`.
        unsafe { self.gl.get_uniform_location(program, name) }
    }

    fn set_uniform(&self, location: &glow::UniformLocation, upload: UniformUpload<'_>) {
        let location = Some(location);
        // SAFETY: the location belongs to the program in use; slice lengths
        // are whole multiples of the element size.
        unsafe {
            match upload {
                UniformUpload::Float(value) => self.gl.uniform_1_f32(location, value),
                UniformUpload::Int(value) => self.gl.uniform_1_i32(location, value),
                UniformUpload::FloatVector { size, data } => match size {
                    1 => self.gl.uniform_1_f32_slice(location, data),
                    2 => self.gl.uniform_2_f32_slice(location, data),
                    3 => self.gl.uniform_3_f32_slice(location, data),
                    _ => self.gl.uniform_4_f32_slice(location, data),
                },
                UniformUpload::IntVector { size, data } => match size {
                    1 => self.gl.uniform_1_i32_slice(location, data),
                    2 => self.gl.uniform_2_i32_slice(location, data),
                    3 => self.gl.uniform_3_i32_slice(location, data),
                    _ => self.gl.uniform_4_i32_slice(location, data),
                },
                UniformUpload::Matrix { dimension, data } => match dimension {
                    2 => self.gl.uniform_matrix_2_f32_slice(location, false, data),
                    3 => self.gl.uniform_matrix_3_f32_slice(location, false, data),
                    _ => self.gl.uniform_matrix_4_f32_slice(location, false, data),
                },
            }
        }
    }

    fn create_vertex_buffer(&self, vertices: &[f32]) -> Result<glow::Buffer, String> {
        // SAFETY: the buffer is freshly created and bound before upload.
        unsafe {
            let buffer = self.gl.create_buffer()?;
            self.gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
            self.gl.buffer_data_u8_slice(
                glow::ARRAY_BUFFER,
                bytemuck::cast_slice(vertices),
                glow::STATIC_DRAW,
            );
            Ok(buffer)
        }
    }

    fn bind_vertex_attribute(&self, buffer: glow::Buffer, attribute: u32, components: i32) {
        // SAFETY: buffer holds tightly packed f32 positions.
        unsafe {
            self.gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
            self.gl
                .vertex_attrib_pointer_f32(attribute, components, glow::FLOAT, false, 0, 0);
            self.gl.enable_vertex_attrib_array(attribute);
        }
    }

    fn delete_buffer(&self, buffer: glow::Buffer) {
        // SAFETY: buffer handle came from `create_vertex_buffer`.
        unsafe { self.gl.delete_buffer(buffer) }
    }

    fn configure_pipeline(&self, clear_color: Rgba) {
        let [r, g, b, a] = clear_color;
        // SAFETY: plain state setters.
        unsafe {
            self.gl.clear_color(r, g, b, a);
            self.gl.clear_depth_f32(1.0);
            self.gl.enable(glow::DEPTH_TEST);
            self.gl.depth_func(glow::LEQUAL);
        }
    }

    fn viewport(&self, width: u32, height: u32) {
        // SAFETY: plain state setter.
        unsafe { self.gl.viewport(0, 0, width as i32, height as i32) }
    }

    fn clear(&self) {
        // SAFETY: plain state call.
        unsafe { self.gl.clear(glow::COLOR_BUFFER_BIT | glow::DEPTH_BUFFER_BIT) }
    }

    fn draw_triangle_strip(&self, vertex_count: i32) {
        // SAFETY: a program and vertex attribute are bound before drawing.
        unsafe { self.gl.draw_arrays(glow::TRIANGLE_STRIP, 0, vertex_count) }
    }

    fn create_texture(
        &self,
        params: &SamplerParams,
        image: &TextureImage,
    ) -> Result<glow::Texture, String> {
        // SAFETY: the texture is created and bound before its parameters are set.
        let texture = unsafe {
            let texture = self.gl.create_texture()?;
            self.gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            self.gl.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_WRAP_S,
                params.wrap_s.gl_enum() as i32,
            );
            self.gl.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_WRAP_T,
                params.wrap_t.gl_enum() as i32,
            );
            self.gl.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_MIN_FILTER,
                params.min_filter.gl_enum() as i32,
            );
            self.gl.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_MAG_FILTER,
                params.mag_filter.for_magnification().gl_enum() as i32,
            );
            texture
        };
        self.upload_pixels(params, image);
        Ok(texture)
    }

    fn update_texture(&self, texture: glow::Texture, params: &SamplerParams, image: &TextureImage) {
        // SAFETY: texture handle came from `create_texture`.
        unsafe { self.gl.bind_texture(glow::TEXTURE_2D, Some(texture)) };
        self.upload_pixels(params, image);
    }

    fn bind_texture(&self, unit: u32, texture: glow::Texture) {
        // SAFETY: unit is below the sampler count the shader declares.
        unsafe {
            self.gl.active_texture(glow::TEXTURE0 + unit);
            self.gl.bind_texture(glow::TEXTURE_2D, Some(texture));
        }
    }

    fn delete_texture(&self, texture: glow::Texture) {
        // SAFETY: texture handle came from `create_texture`.
        unsafe { self.gl.delete_texture(texture) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_match_compiler_wording() {
        assert_eq!(ShaderStage::Vertex.to_string(), "vertex");
        assert_eq!(ShaderStage::Fragment.to_string(), "fragment");
        assert_eq!(ShaderStage::Fragment.gl_enum(), glow::FRAGMENT_SHADER);
    }

    #[test]
    fn mipmaps_follow_min_filter() {
        let mut params = SamplerParams {
            wrap_s: WrapMode::Repeat,
            wrap_t: WrapMode::Repeat,
            min_filter: FilterMode::LinearMipmapLinear,
            mag_filter: FilterMode::Linear,
        };
        assert!(params.generates_mipmaps());
        params.min_filter = FilterMode::Nearest;
        assert!(!params.generates_mipmaps());
    }
}
