//! `fxlive.toml`: where the live preview finds its template, shader source,
//! scratch directory and textures, and how it launches the shader compiler.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::Deserialize;

/// File name looked up in the project root.
pub const CONFIG_FILE_NAME: &str = "fxlive.toml";

const CHANNEL_SLOTS: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to read configuration {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditorConfig {
    pub version: u32,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub compiler: CompilerConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub template: PathBuf,
    pub source: PathBuf,
    pub scratch: PathBuf,
    pub assets: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            template: PathBuf::from("common/shader.glsl"),
            source: PathBuf::from("scratch/pixelshader.glsl"),
            scratch: PathBuf::from("scratch"),
            assets: PathBuf::from("assets"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerConfig {
    pub program: PathBuf,
    pub profile: String,
    pub args: Vec<String>,
    pub debug: bool,
    pub debug_flag: String,
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("tools/compile-shader.sh"),
            profile: "vulkan1.0".to_string(),
            args: vec![
                "{source}".to_string(),
                "{dest}".to_string(),
                "/Profile:{profile}".to_string(),
            ],
            debug: true,
            debug_flag: "/Debug".to_string(),
            timeout: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    /// Linear RGBA, each component in `[0, 1]`.
    pub clear_color: [f64; 4],
    /// Initial window size in pixels.
    pub size: [u32; 2],
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            clear_color: [70.0 / 255.0, 130.0 / 255.0, 180.0 / 255.0, 1.0],
            size: [1280, 720],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKindSetting {
    Texture2d,
    Cubemap,
    Volume,
}

impl<'de> Deserialize<'de> for ChannelKindSetting {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse_channel_kind(&raw).map_err(de::Error::custom)
    }
}

fn parse_channel_kind(raw: &str) -> Result<ChannelKindSetting, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "2d" | "texture2d" | "texture" => Ok(ChannelKindSetting::Texture2d),
        "cube" | "cubemap" => Ok(ChannelKindSetting::Cubemap),
        "3d" | "volume" | "texture3d" => Ok(ChannelKindSetting::Volume),
        other => Err(format!(
            "invalid channel kind '{other}'; expected texture2d, cubemap, or volume"
        )),
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    pub slot: usize,
    #[serde(default = "default_kind")]
    pub kind: ChannelKindSetting,
    /// Image file, cubemap face directory or volume slice directory,
    /// relative to `paths.assets`.
    pub path: PathBuf,
}

/// A channel whose path was resolved against the assets directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChannel {
    pub slot: usize,
    pub kind: ChannelKindSetting,
    pub path: PathBuf,
}

/// Configuration with every path made absolute against the project root.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub root: PathBuf,
    pub template: PathBuf,
    pub source: PathBuf,
    pub scratch: PathBuf,
    pub assets: PathBuf,
    pub compiler: CompilerConfig,
    pub clear_color: [f64; 4],
    pub size: [u32; 2],
    pub channels: Vec<ResolvedChannel>,
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_kind() -> ChannelKindSetting {
    ChannelKindSetting::Texture2d
}

fn default_channels() -> Vec<ChannelConfig> {
    vec![ChannelConfig {
        slot: 0,
        kind: ChannelKindSetting::Texture2d,
        path: PathBuf::from("textures/test.png"),
    }]
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs(v as u64))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs_f64(v))
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            version: 1,
            paths: PathsConfig::default(),
            compiler: CompilerConfig::default(),
            render: RenderConfig::default(),
            channels: default_channels(),
        }
    }
}

impl EditorConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: EditorConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    /// Reads and validates the config at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let input = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        for (name, path) in [
            ("paths.template", &self.paths.template),
            ("paths.source", &self.paths.source),
            ("paths.scratch", &self.paths.scratch),
        ] {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!("{name} may not be empty")));
            }
        }

        if self.compiler.program.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "compiler.program may not be empty".into(),
            ));
        }

        if self.compiler.timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "compiler.timeout must be greater than zero".into(),
            ));
        }

        for (index, component) in self.render.clear_color.iter().enumerate() {
            if !(0.0..=1.0).contains(component) {
                return Err(ConfigError::Invalid(format!(
                    "render.clear_color[{index}] must be within [0, 1], got {component}"
                )));
            }
        }

        if self.render.size.contains(&0) {
            return Err(ConfigError::Invalid(
                "render.size must be at least 1x1".into(),
            ));
        }

        let mut seen = BTreeSet::new();
        for channel in &self.channels {
            if channel.slot >= CHANNEL_SLOTS {
                return Err(ConfigError::Invalid(format!(
                    "channel slot {} is out of range; expected 0-{}",
                    channel.slot,
                    CHANNEL_SLOTS - 1
                )));
            }
            if !seen.insert(channel.slot) {
                return Err(ConfigError::Invalid(format!(
                    "channel slot {} is configured more than once",
                    channel.slot
                )));
            }
            if channel.path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "channel {} has an empty path",
                    channel.slot
                )));
            }
        }

        Ok(())
    }

    /// Resolves relative paths against `root`; channel paths resolve against
    /// the assets directory. A relative compiler program is only rebased when it
    /// names a path (contains a separator), so bare names still go through `PATH`.
    pub fn resolve(&self, root: &Path) -> ResolvedConfig {
        let join = |path: &Path| {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                root.join(path)
            }
        };
        let assets = join(&self.paths.assets);
        let mut compiler = self.compiler.clone();
        if compiler.program.components().count() > 1 {
            compiler.program = join(&compiler.program);
        }
        let channels = self
            .channels
            .iter()
            .map(|channel| ResolvedChannel {
                slot: channel.slot,
                kind: channel.kind,
                path: if channel.path.is_absolute() {
                    channel.path.clone()
                } else {
                    assets.join(&channel.path)
                },
            })
            .collect();

        ResolvedConfig {
            root: root.to_path_buf(),
            template: join(&self.paths.template),
            source: join(&self.paths.source),
            scratch: join(&self.paths.scratch),
            assets,
            compiler,
            clear_color: self.render.clear_color,
            size: self.render.size,
            channels,
        }
    }
}
