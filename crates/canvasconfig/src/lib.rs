//! TOML manifests describing a [`fragcanvas`] canvas.
//!
//! A manifest names the shader files (or carries their source inline), the
//! texture channels, custom uniforms and the canvas settings. Relative paths
//! resolve against the manifest's directory.
//!
//! ```toml
//! version = 1
//!
//! [shader]
//! fragment = "plasma.frag"
//! precision = "mediump"
//!
//! [canvas]
//! smoothing = 0.25
//!
//! [[textures]]
//! source = "noise.png"
//! wrap-s = "clamp-to-edge"
//!
//! [uniforms.uTint]
//! type = "3f"
//! value = [1.0, 0.5, 0.25]
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fragcanvas::{
    ContextAttributes, CustomUniform, EngineConfig, ImageFileLoader, LoadStrategy, Precision,
    Rgba, TextureDescriptor, UniformType,
};
use serde::{Deserialize, Serialize};

pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse manifest: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid manifest: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CanvasManifest {
    pub version: u32,
    #[serde(default)]
    pub shader: ShaderSection,
    #[serde(default)]
    pub canvas: CanvasSection,
    #[serde(default)]
    pub context: ContextAttributes,
    #[serde(default)]
    pub textures: Vec<TextureDescriptor>,
    #[serde(default)]
    pub uniforms: BTreeMap<String, CustomUniform>,
}

/// Where the shader sources come from. A stage with neither a file nor an
/// inline source uses the engine's default program for that stage.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ShaderSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertex: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertex_source: Option<String>,
    #[serde(default = "default_precision")]
    pub precision: String,
}

impl Default for ShaderSection {
    fn default() -> Self {
        Self {
            fragment: None,
            fragment_source: None,
            vertex: None,
            vertex_source: None,
            precision: default_precision(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CanvasSection {
    #[serde(default = "default_clear_color")]
    pub clear_color: Rgba,
    #[serde(default = "default_smoothing")]
    pub smoothing: f32,
    #[serde(default = "default_device_pixel_ratio")]
    pub device_pixel_ratio: f64,
    #[serde(default)]
    pub load_strategy: LoadStrategy,
}

impl Default for CanvasSection {
    fn default() -> Self {
        Self {
            clear_color: default_clear_color(),
            smoothing: default_smoothing(),
            device_pixel_ratio: default_device_pixel_ratio(),
            load_strategy: LoadStrategy::default(),
        }
    }
}

fn default_precision() -> String {
    Precision::High.as_str().to_string()
}

fn default_clear_color() -> Rgba {
    [0.0, 0.0, 0.0, 1.0]
}

fn default_smoothing() -> f32 {
    1.0
}

fn default_device_pixel_ratio() -> f64 {
    1.0
}

impl CanvasManifest {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: CanvasManifest = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let manifest = Self::from_toml_str(&read(path)?)?;
        tracing::debug!(
            path = %path.display(),
            textures = manifest.textures.len(),
            uniforms = manifest.uniforms.len(),
            "loaded canvas manifest"
        );
        Ok(manifest)
    }

    /// Every problem found, in file order. Empty means the manifest is usable.
    pub fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.version != MANIFEST_VERSION {
            issues.push(format!(
                "unsupported manifest version {}; expected {MANIFEST_VERSION}",
                self.version
            ));
        }

        let shader = &self.shader;
        if shader.fragment.is_some() && shader.fragment_source.is_some() {
            issues.push("shader.fragment and shader.fragment-source are mutually exclusive".into());
        }
        if shader.vertex.is_some() && shader.vertex_source.is_some() {
            issues.push("shader.vertex and shader.vertex-source are mutually exclusive".into());
        }
        if shader.precision.parse::<Precision>().is_err() {
            issues.push(format!(
                "shader.precision '{}' must be one of lowp, mediump, highp",
                shader.precision
            ));
        }

        let canvas = &self.canvas;
        if !(0.0..=1.0).contains(&canvas.smoothing) {
            issues.push(format!(
                "canvas.smoothing {} must be within 0..=1",
                canvas.smoothing
            ));
        }
        if !(canvas.device_pixel_ratio > 0.0 && canvas.device_pixel_ratio.is_finite()) {
            issues.push(format!(
                "canvas.device-pixel-ratio {} must be a positive number",
                canvas.device_pixel_ratio
            ));
        }
        if canvas
            .clear_color
            .iter()
            .any(|component| !(0.0..=1.0).contains(component))
        {
            issues.push("canvas.clear-color components must be within 0..=1".into());
        }

        for (index, texture) in self.textures.iter().enumerate() {
            if texture.source.trim().is_empty() {
                issues.push(format!("textures[{index}] has an empty source"));
            }
        }

        for (name, uniform) in &self.uniforms {
            if let Err(err) = uniform.type_tag.parse::<UniformType>() {
                issues.push(format!("uniforms.{name}: {err}"));
            }
        }

        issues
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let issues = self.issues();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(issues.join("; ")))
        }
    }

    /// Reads the shader files and builds the engine configuration. Relative
    /// shader and texture paths resolve against `base_dir`.
    pub fn into_engine_config(self, base_dir: &Path) -> Result<EngineConfig, ConfigError> {
        let fragment = stage_source(self.shader.fragment_source, self.shader.fragment, base_dir)?;
        let mut config = EngineConfig::new(fragment.unwrap_or_default())
            .with_precision(self.shader.precision)
            .with_clear_color(self.canvas.clear_color)
            .with_smoothing(self.canvas.smoothing)
            .with_device_pixel_ratio(self.canvas.device_pixel_ratio)
            .with_load_strategy(self.canvas.load_strategy)
            .with_context_attributes(self.context)
            .with_texture_loader(Arc::new(ImageFileLoader::with_base_dir(base_dir)));

        if let Some(vertex) = stage_source(self.shader.vertex_source, self.shader.vertex, base_dir)? {
            config = config.with_vertex_shader(vertex);
        }
        config.textures = self.textures;
        config.uniforms = self.uniforms;
        Ok(config)
    }
}

/// Loads the manifest at `path` and converts it, resolving paths against the
/// manifest's directory.
pub fn load_engine_config(path: impl AsRef<Path>) -> Result<EngineConfig, ConfigError> {
    let path = path.as_ref();
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    CanvasManifest::load(path)?.into_engine_config(base_dir)
}

fn stage_source(
    inline: Option<String>,
    file: Option<PathBuf>,
    base_dir: &Path,
) -> Result<Option<String>, ConfigError> {
    if inline.is_some() {
        return Ok(inline);
    }
    match file {
        Some(file) => {
            let path = if file.is_relative() {
                base_dir.join(file)
            } else {
                file
            };
            read(&path).map(Some)
        }
        None => Ok(None),
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
