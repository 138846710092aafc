use crate::error::{CanvasError, Diagnostics};
use crate::gl::{GlBackend, ShaderStage};
use crate::preprocess::PreprocessedShaders;
use crate::types::VERTEX_POSITION_ATTRIBUTE;
use crate::uniforms::{UniformId, UniformRegistry};

/// Components per quad vertex (`vec3 aVertexPosition`).
pub const POSITION_COMPONENTS: i32 = 3;

/// Owns the compiled stages, the linked program and the uniform location
/// table built from it.
#[derive(Debug)]
pub struct ProgramManager<B: GlBackend> {
    vertex: Option<B::Shader>,
    fragment: Option<B::Shader>,
    program: Option<B::Program>,
    position_attribute: Option<u32>,
    locations: Vec<(UniformId, B::UniformLocation)>,
}

impl<B: GlBackend> ProgramManager<B> {
    pub fn new() -> Self {
        Self {
            vertex: None,
            fragment: None,
            program: None,
            position_attribute: None,
            locations: Vec::new(),
        }
    }

    /// Compiles both stages and links them. Returns whether a usable program
    /// now exists; every failure has already been reported.
    pub fn build(
        &mut self,
        gl: &B,
        sources: &PreprocessedShaders,
        diagnostics: &mut Diagnostics,
    ) -> bool {
        self.vertex = compile_stage(gl, ShaderStage::Vertex, &sources.vertex, diagnostics);
        self.fragment = compile_stage(gl, ShaderStage::Fragment, &sources.fragment, diagnostics);

        let (Some(vertex), Some(fragment)) = (self.vertex, self.fragment) else {
            return false;
        };

        let program = match gl.link_program(vertex, fragment) {
            Ok(program) => program,
            Err(log) => {
                diagnostics.report(CanvasError::Link(log));
                return false;
            }
        };
        gl.use_program(Some(program));
        self.program = Some(program);

        self.position_attribute = gl.attrib_location(program, VERTEX_POSITION_ATTRIBUTE);
        if self.position_attribute.is_none() {
            diagnostics.report(CanvasError::Backend(format!(
                "vertex attribute {VERTEX_POSITION_ATTRIBUTE} is not active in the linked program"
            )));
        }
        tracing::debug!(attribute = ?self.position_attribute, "shader program linked");
        true
    }

    /// Points the position attribute at the quad buffer and enables it.
    pub fn attach_quad(&self, gl: &B, buffer: B::Buffer) {
        if let Some(attribute) = self.position_attribute {
            gl.bind_vertex_attribute(buffer, attribute, POSITION_COMPONENTS);
        }
    }

    /// Resolves a GPU location for every needed input. Inputs the compiler
    /// optimized away have no location and are skipped when binding.
    pub fn resolve_locations(&mut self, gl: &B, registry: &UniformRegistry) {
        let Some(program) = self.program else {
            return;
        };
        self.locations = registry
            .needed()
            .filter_map(|(id, spec)| {
                let location = gl.uniform_location(program, &spec.name);
                if location.is_none() {
                    tracing::trace!(name = %spec.name, "uniform has no active location");
                }
                location.map(|location| (id, location))
            })
            .collect();
    }

    pub fn locations(&self) -> &[(UniformId, B::UniformLocation)] {
        &self.locations
    }

    pub fn location(&self, id: UniformId) -> Option<&B::UniformLocation> {
        self.locations
            .iter()
            .find(|(candidate, _)| *candidate == id)
            .map(|(_, location)| location)
    }

    pub fn is_linked(&self) -> bool {
        self.program.is_some()
    }

    pub fn position_attribute(&self) -> Option<u32> {
        self.position_attribute
    }

    /// Releases whatever was created. Safe to call repeatedly and after a
    /// failed build.
    pub fn teardown(&mut self, gl: &B) {
        if let Some(program) = self.program.take() {
            gl.use_program(None);
            gl.delete_program(program);
        }
        if let Some(shader) = self.vertex.take() {
            gl.delete_shader(shader);
        }
        if let Some(shader) = self.fragment.take() {
            gl.delete_shader(shader);
        }
        self.position_attribute = None;
        self.locations.clear();
    }
}

impl<B: GlBackend> Default for ProgramManager<B> {
    fn default() -> Self {
        Self::new()
    }
}

fn compile_stage<B: GlBackend>(
    gl: &B,
    stage: ShaderStage,
    source: &str,
    diagnostics: &mut Diagnostics,
) -> Option<B::Shader> {
    match gl.compile_shader(stage, source) {
        Ok(shader) => Some(shader),
        Err(log) => {
            diagnostics.report(CanvasError::ShaderSource {
                stage,
                text: source.to_string(),
            });
            diagnostics.report(CanvasError::Compile { stage, log });
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::preprocess;
    use crate::testing::{GlCall, RecordingGl};

    fn sources(registry: &mut UniformRegistry) -> PreprocessedShaders {
        preprocess(
            "void main() { gl_FragColor = vec4(iTime, iMouse.xy, 1.0); }",
            "",
            "highp",
            1.0,
            registry,
            &mut Diagnostics::default(),
        )
    }

    #[test]
    fn successful_build_uses_program_and_resolves_attribute() {
        let gl = RecordingGl::new();
        let mut registry = UniformRegistry::new();
        let sources = sources(&mut registry);
        let mut diagnostics = Diagnostics::default();
        let mut manager = ProgramManager::<RecordingGl>::new();

        assert!(manager.build(&gl, &sources, &mut diagnostics));
        assert!(manager.is_linked());
        assert_eq!(manager.position_attribute(), Some(0));
        assert_eq!(diagnostics.error_count(), 0);
        assert!(gl.calls().iter().any(|call| matches!(call, GlCall::UseProgram(Some(_)))));

        manager.resolve_locations(&gl, &registry);
        let names: Vec<_> = manager
            .locations()
            .iter()
            .map(|(id, _)| registry.get(*id).name.clone())
            .collect();
        assert_eq!(names, ["iTime", "iMouse"]);
    }

    #[test]
    fn compile_failure_reports_source_and_log() {
        let gl = RecordingGl::new().fail_compile(ShaderStage::Fragment, "0:1: syntax error");
        let mut registry = UniformRegistry::new();
        let sources = sources(&mut registry);
        let mut diagnostics = Diagnostics::default();
        let mut manager = ProgramManager::<RecordingGl>::new();

        assert!(!manager.build(&gl, &sources, &mut diagnostics));
        assert!(!manager.is_linked());
        assert_eq!(diagnostics.warning_count(), 1);
        assert_eq!(diagnostics.error_count(), 1);
        assert!(!gl.calls().iter().any(|call| matches!(call, GlCall::LinkProgram)));
    }

    #[test]
    fn link_failure_reports_error() {
        let gl = RecordingGl::new().fail_link("varying vUv not written");
        let mut registry = UniformRegistry::new();
        let sources = sources(&mut registry);
        let mut diagnostics = Diagnostics::default();
        let mut manager = ProgramManager::<RecordingGl>::new();

        assert!(!manager.build(&gl, &sources, &mut diagnostics));
        assert_eq!(diagnostics.error_count(), 1);
        assert_eq!(diagnostics.warning_count(), 0);
    }

    #[test]
    fn teardown_is_idempotent() {
        let gl = RecordingGl::new();
        let mut registry = UniformRegistry::new();
        let sources = sources(&mut registry);
        let mut manager = ProgramManager::<RecordingGl>::new();
        manager.build(&gl, &sources, &mut Diagnostics::default());

        manager.teardown(&gl);
        manager.teardown(&gl);
        let deletes = gl
            .calls()
            .iter()
            .filter(|call| matches!(call, GlCall::DeleteProgram(_)))
            .count();
        assert_eq!(deletes, 1);
        assert!(!manager.is_linked());
    }

    #[test]
    fn teardown_after_failed_build_releases_compiled_stage() {
        let gl = RecordingGl::new().fail_compile(ShaderStage::Fragment, "bad");
        let mut registry = UniformRegistry::new();
        let sources = sources(&mut registry);
        let mut manager = ProgramManager::<RecordingGl>::new();
        manager.build(&gl, &sources, &mut Diagnostics::default());
        manager.teardown(&gl);

        let calls = gl.calls();
        assert_eq!(
            calls
                .iter()
                .filter(|call| matches!(call, GlCall::DeleteShader(_)))
                .count(),
            1
        );
        assert!(!calls.iter().any(|call| matches!(call, GlCall::DeleteProgram(_))));
    }
}
