use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::compile::CompilerSettings;

/// Shaders may declare up to four input channels (`Channel0-3`).
pub const CHANNEL_COUNT: usize = 4;

/// Texture dimensionality of a channel slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Texture2d,
    Cubemap,
    Volume,
}

impl ChannelKind {
    /// Name used in configuration files and diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Texture2d => "texture2d",
            ChannelKind::Cubemap => "cubemap",
            ChannelKind::Volume => "volume",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "2d" | "texture2d" | "texture" => Ok(ChannelKind::Texture2d),
            "cube" | "cubemap" => Ok(ChannelKind::Cubemap),
            "3d" | "volume" | "texture3d" => Ok(ChannelKind::Volume),
            other => Err(format!(
                "unknown channel kind '{other}'; expected texture2d, cubemap, or volume"
            )),
        }
    }
}

/// Expected face stems for cubemap resources stored on disk.
pub const CUBEMAP_FACE_STEMS: [&str; 6] = ["posx", "negx", "posy", "negy", "posz", "negz"];

/// Physical size of the render surface in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Clamps both dimensions to at least one pixel; GPU targets cannot be empty.
    pub fn clamped(self) -> Self {
        Self {
            width: self.width.max(1),
            height: self.height.max(1),
        }
    }
}

impl fmt::Display for SurfaceSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Linear RGBA colour used to clear the back buffer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearColor {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl ClearColor {
    /// XNA's `SteelBlue` (70, 130, 180).
    pub const STEEL_BLUE: ClearColor = ClearColor {
        r: 70.0 / 255.0,
        g: 130.0 / 255.0,
        b: 180.0 / 255.0,
        a: 1.0,
    };

    pub fn from_array(rgba: [f64; 4]) -> Self {
        Self {
            r: rgba[0],
            g: rgba[1],
            b: rgba[2],
            a: rgba[3],
        }
    }
}

impl Default for ClearColor {
    fn default() -> Self {
        Self::STEEL_BLUE
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressMode {
    Wrap,
    Clamp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterMode {
    Point,
    Linear,
}

/// Sampler applied to every sampler slot the active program declares.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SamplerState {
    pub address: AddressMode,
    pub filter: FilterMode,
}

impl SamplerState {
    pub const POINT_WRAP: SamplerState = SamplerState {
        address: AddressMode::Wrap,
        filter: FilterMode::Point,
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RasterizerState {
    pub cull: CullMode,
}

impl RasterizerState {
    pub const CULL_NONE: RasterizerState = RasterizerState {
        cull: CullMode::None,
    };
}

/// Where a live surface finds its inputs and how it compiles them.
///
/// `SurfaceSettings` mirrors the `[paths]`, `[compiler]` and `[render]` config
/// sections after they were resolved against the project root.
#[derive(Clone, Debug)]
pub struct SurfaceSettings {
    /// Template containing the channel placeholder.
    pub template: PathBuf,
    /// User-edited pixel shader; only its modification time is inspected.
    pub source: PathBuf,
    /// Directory receiving the assembled source and the compiled binary.
    pub scratch_dir: PathBuf,
    /// Background colour drawn every frame.
    pub clear_color: ClearColor,
    /// External compiler invocation settings.
    pub compiler: CompilerSettings,
}

impl SurfaceSettings {
    /// Location of the compiler output inside the scratch directory.
    pub fn binary_path(&self) -> PathBuf {
        self.scratch_dir.join(crate::assemble::PROGRAM_BINARY_NAME)
    }

    /// Location of the assembled source inside the scratch directory.
    pub fn assembled_path(&self) -> PathBuf {
        self.scratch_dir.join(crate::assemble::ASSEMBLED_SOURCE_NAME)
    }
}

impl Default for SurfaceSettings {
    fn default() -> Self {
        Self {
            template: PathBuf::from("common/shader.glsl"),
            source: PathBuf::from("scratch/pixelshader.glsl"),
            scratch_dir: PathBuf::from("scratch"),
            clear_color: ClearColor::default(),
            compiler: CompilerSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_kind_parses_aliases() {
        assert_eq!("2d".parse::<ChannelKind>(), Ok(ChannelKind::Texture2d));
        assert_eq!("CubeMap".parse::<ChannelKind>(), Ok(ChannelKind::Cubemap));
        assert_eq!("volume".parse::<ChannelKind>(), Ok(ChannelKind::Volume));
        assert!("sphere".parse::<ChannelKind>().is_err());
    }

    #[test]
    fn surface_size_never_collapses_to_zero() {
        let size = SurfaceSize::new(0, 300).clamped();
        assert_eq!(size, SurfaceSize::new(1, 300));
    }

    #[test]
    fn scratch_paths_live_under_scratch_dir() {
        let settings = SurfaceSettings {
            scratch_dir: PathBuf::from("/tmp/fx"),
            ..SurfaceSettings::default()
        };
        assert!(settings.binary_path().starts_with("/tmp/fx"));
        assert!(settings.assembled_path().starts_with("/tmp/fx"));
    }
}
