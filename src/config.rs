//! Application configuration
//!
//! Configuration is loaded from multiple sources with the following priority (lowest to highest):
//! 1. `config/default.toml` (version controlled)
//! 2. `config/user.toml` (gitignored, user overrides)
//! 3. Environment variables (`SHAPES_SECTION__KEY`)

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub scene: SceneConfig,
    #[serde(default)]
    pub shaders: ShaderConfig,
    #[serde(default)]
    pub rendering: RenderingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from the `config` directory and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();
        let default_path = config_dir.join("default.toml");
        let user_path = config_dir.join("user.toml");

        let mut figment = Figment::new();

        if default_path.exists() {
            figment = figment.merge(Toml::file(&default_path));
        }

        if user_path.exists() {
            figment = figment.merge(Toml::file(&user_path));
        }

        // SHAPES_SCENE__SHAPE=triangle -> scene.shape = "triangle"
        figment = figment.merge(Env::prefixed("SHAPES_").split("__"));

        figment.extract().map_err(ConfigError::from)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
    pub vsync: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "From Scratch".to_string(),
            width: 800,
            height: 800,
            resizable: true,
            vsync: true,
        }
    }
}

/// Which hard-coded mesh gets uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    Triangle,
    Circle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub shape: Shape,
    pub circle: CircleConfig,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            shape: Shape::Circle,
            circle: CircleConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircleConfig {
    /// Number of rim vertices (and triangles) in the fan
    pub segments: u32,
    pub radius: f32,
}

impl Default for CircleConfig {
    fn default() -> Self {
        Self {
            segments: 10,
            radius: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
    pub vertex_entry: String,
    pub fragment_entry: String,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/shape-vs.wgsl"),
            fragment: PathBuf::from("shaders/shape-fs.wgsl"),
            vertex_entry: "vertex_main".to_string(),
            fragment_entry: "fragment_main".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderingConfig {
    /// RGBA clear colour
    pub clear_color: [f64; 4],
    pub depth_test: bool,
    /// Feed the real elapsed time to the shaders instead of 0
    pub animate: bool,
    /// Frames between frame-time log lines, 0 disables them
    pub stats_interval: u32,
}

impl Default for RenderingConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.3, 0.3, 0.3, 0.0],
            depth_test: true,
            animate: false,
            stats_interval: 300,
        }
    }
}

impl RenderingConfig {
    pub fn clear_color(&self) -> wgpu::Color {
        let [r, g, b, a] = self.clear_color;
        wgpu::Color { r, g, b, a }
    }
}

/// `filter` follows the `env_logger` filter syntax (e.g. "info",
/// "shape_exercises=debug,wgpu=warn"). When unset, `RUST_LOG` is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: Option<String>,
}

#[derive(Debug)]
pub struct ConfigError {
    message: String,
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        ConfigError {
            message: e.to_string(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}
