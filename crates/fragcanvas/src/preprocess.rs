use crate::error::{CanvasError, Diagnostics};
use crate::types::Precision;
use crate::uniforms::UniformRegistry;

/// Pass-through vertex program for the fullscreen quad.
pub const DEFAULT_VERTEX_SHADER: &str = "attribute vec3 aVertexPosition;
void main(void) {
    gl_Position = vec4(aVertexPosition, 1.0);
}";

/// The classic Shadertoy color gradient, used when no fragment source is given.
pub const DEFAULT_FRAGMENT_SHADER: &str = "void mainImage( out vec4 fragColor, in vec2 fragCoord ) {
    vec2 uv = fragCoord/iResolution.xy;
    vec3 col = 0.5 + 0.5*cos(iTime+uv.xyx+vec3(0,2,4));
    fragColor = vec4(col,1.0);
}";

/// Entry point appended to sources that only define `mainImage`.
const SHADERTOY_MAIN: &str = "
void main(void){
    vec4 color = vec4(0.0,0.0,0.0,1.0);
    mainImage( color, gl_FragCoord.xy );
    gl_FragColor = color;
}";

const SHADERTOY_ENTRY: &str = "mainImage";

/// Final sources handed to the program manager.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessedShaders {
    pub fragment: String,
    pub vertex: String,
    /// The fragment source defined `mainImage` and received the wrapper `main`.
    pub shadertoy: bool,
    pub precision: Precision,
}

/// Resolves the precision qualifier, reporting one warning and falling back
/// to `mediump` when it is not one of `lowp`, `mediump`, `highp`.
pub fn resolve_precision(requested: &str, diagnostics: &mut Diagnostics) -> Precision {
    match requested.parse::<Precision>() {
        Ok(precision) => precision,
        Err(requested) => {
            diagnostics.report(CanvasError::InvalidPrecision { requested });
            Precision::Medium
        }
    }
}

/// Builds the final fragment/vertex pair and flags every registry input the
/// raw fragment source mentions as needed.
///
/// Layout of the produced fragment source:
///
/// 1. `precision <p> float;`
/// 2. `#define DPR <ratio>`
/// 3. one `uniform` declaration per needed input, in registry order
/// 4. the caller's source with `texture(` rewritten to `texture2D(`
/// 5. the `main` wrapper when the source defines `mainImage`
///
/// Name detection is a substring search over the raw source, the same way
/// the sampling rewrite is a plain text replacement; neither understands
/// comments.
pub fn preprocess(
    fragment: &str,
    vertex: &str,
    precision: &str,
    device_pixel_ratio: f64,
    registry: &mut UniformRegistry,
    diagnostics: &mut Diagnostics,
) -> PreprocessedShaders {
    let precision = resolve_precision(precision, diagnostics);
    let fragment = if fragment.trim().is_empty() {
        DEFAULT_FRAGMENT_SHADER
    } else {
        fragment
    };
    let vertex = if vertex.trim().is_empty() {
        DEFAULT_VERTEX_SHADER
    } else {
        vertex
    };

    let mentioned: Vec<_> = registry
        .iter()
        .filter(|(_, spec)| fragment.contains(spec.name.as_str()))
        .map(|(id, _)| id)
        .collect();

    let mut declarations = String::new();
    for id in &mentioned {
        registry.mark_needed(*id);
        declarations.push_str(&registry.get(*id).declaration());
        declarations.push('\n');
    }

    let body = strip_directives(fragment, registry).replace("texture(", "texture2D(");
    let shadertoy = fragment.contains(SHADERTOY_ENTRY);

    let mut output = format!(
        "precision {precision} float;\n#define DPR {device_pixel_ratio:.1}\n{declarations}{body}"
    );
    if shadertoy {
        output.push_str(SHADERTOY_MAIN);
    }

    tracing::debug!(
        needed = mentioned.len(),
        shadertoy,
        %precision,
        "preprocessed fragment shader"
    );

    PreprocessedShaders {
        fragment: output,
        vertex: vertex.to_string(),
        shadertoy,
        precision,
    }
}

/// Drops a leading `#version` line and any `uniform` declaration of a name
/// the registry already declares.
fn strip_directives(source: &str, registry: &UniformRegistry) -> String {
    let mut skipped_version = false;
    let mut kept = Vec::new();
    for line in source.lines() {
        let trimmed = line.trim_start();
        if !skipped_version && trimmed.starts_with("#version") {
            skipped_version = true;
            continue;
        }
        if declared_uniform(trimmed).is_some_and(|name| registry.lookup(name).is_some()) {
            continue;
        }
        kept.push(line);
    }
    kept.join("\n")
}

/// Name declared by a single-variable `uniform <type> <name>...;` line.
fn declared_uniform(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("uniform")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let mut tokens = rest.split_whitespace();
    let mut ty = tokens.next()?;
    if matches!(ty, "lowp" | "mediump" | "highp") {
        ty = tokens.next()?;
    }
    if ty.is_empty() {
        return None;
    }
    let name = tokens.next()?;
    let end = name
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(name.len());
    (end > 0).then(|| &name[..end])
}
