//! Content written into a fresh project by `fxlive init` and on first run.

use std::path::Path;

use anyhow::{Context, Result};
use image::{Rgba, RgbaImage};

/// Template wrapped around the user's `mainImage`. The channel placeholder
/// line is replaced with one `DECLARE_*` line per bound channel and the
/// include line with the text of the configured source.
pub const DEFAULT_TEMPLATE: &str = r#"#version 450

layout(std140, set = 0, binding = 0) uniform Parameters {
    mat4 MatrixTransform;
    vec4 Date;
    vec3 Resolution;
    float Time;
    vec3 ChannelResolution0;
    float ChannelTime0;
    vec3 ChannelResolution1;
    float ChannelTime1;
    vec3 ChannelResolution2;
    float ChannelTime2;
    vec3 ChannelResolution3;
    float ChannelTime3;
    float TimeDelta;
};

#define DECLARE_TEXTURE2D(name, index) \
    layout(set = 1, binding = index) uniform texture2D name; \
    layout(set = 2, binding = index) uniform sampler name##Sampler;
#define DECLARE_CUBEMAP(name, index) \
    layout(set = 1, binding = index) uniform textureCube name; \
    layout(set = 2, binding = index) uniform sampler name##Sampler;
#define DECLARE_TEXTURE3D(name, index) \
    layout(set = 1, binding = index) uniform texture3D name; \
    layout(set = 2, binding = index) uniform sampler name##Sampler;

#define SAMPLE_TEXTURE2D(name, coord) texture(sampler2D(name, name##Sampler), coord)
#define SAMPLE_CUBEMAP(name, dir) texture(samplerCube(name, name##Sampler), dir)
#define SAMPLE_TEXTURE3D(name, coord) texture(sampler3D(name, name##Sampler), coord)

[insert Channel defines here]

layout(location = 0) in vec2 v_uv;
layout(location = 1) in vec4 v_color;
layout(location = 0) out vec4 out_color;

#include "pixelshader.glsl"

void main() {
    vec2 fragCoord = vec2(v_uv.x, 1.0 - v_uv.y) * Resolution.xy;
    out_color = mainImage(fragCoord);
}
"#;

/// Starter program opened in the editor.
pub const DEFAULT_PIXEL_SHADER: &str = r#"vec4 mainImage(vec2 fragCoord)
{
    // Normalized pixel coordinates (from 0 to 1)
    vec2 uv = fragCoord / Resolution.xy;
    vec3 texel = SAMPLE_TEXTURE2D(Channel0, uv).xyz;

    // Time varying pixel color
    vec3 col = 0.5 * texel + 0.5 * cos(Time + uv.xyx + vec3(0.0, 2.0, 4.0));

    return vec4(col, 1.0);
}
"#;

pub const DEFAULT_CONFIG: &str = r#"version = 1

[paths]
template = "common/shader.glsl"
source = "scratch/pixelshader.glsl"
scratch = "scratch"
assets = "assets"

[compiler]
program = "tools/compile-shader.sh"
profile = "vulkan1.0"
args = ["{source}", "{dest}", "/Profile:{profile}"]
debug = true
debug_flag = "/Debug"
timeout = "5s"

[render]
clear_color = [0.2745098, 0.5098039, 0.7058824, 1.0]
size = [1280, 720]

[[channels]]
slot = 0
kind = "texture2d"
path = "textures/test.png"
"#;

pub const COMPILE_SCRIPT: &str = include_str!("../../../tools/compile-shader.sh");

const TEST_PATTERN_SIZE: u32 = 256;
const TEST_PATTERN_CELL: u32 = 32;

/// Writes a checkerboard PNG used as the default channel texture.
pub fn write_test_pattern(path: &Path) -> Result<()> {
    let image = RgbaImage::from_fn(TEST_PATTERN_SIZE, TEST_PATTERN_SIZE, |x, y| {
        let dark = (x / TEST_PATTERN_CELL + y / TEST_PATTERN_CELL) % 2 == 0;
        let shade = if dark { 48 } else { 208 };
        Rgba([shade, (x * 255 / TEST_PATTERN_SIZE) as u8, shade, 255])
    });
    image
        .save(path)
        .with_context(|| format!("failed to write test pattern {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use liveconfig::EditorConfig;

    #[test]
    fn default_config_matches_builtin_defaults() {
        let parsed = EditorConfig::from_toml_str(DEFAULT_CONFIG).expect("parse default config");
        let builtin = EditorConfig::default();
        assert_eq!(parsed.paths, builtin.paths);
        assert_eq!(parsed.compiler, builtin.compiler);
        assert_eq!(parsed.channels, builtin.channels);
        for (parsed, builtin) in parsed
            .render
            .clear_color
            .iter()
            .zip(builtin.render.clear_color.iter())
        {
            assert!((parsed - builtin).abs() < 1e-6);
        }
    }

    #[test]
    fn template_assembles_with_the_starter_shader() {
        let assembled = renderer::assemble::assemble(
            DEFAULT_TEMPLATE,
            std::path::Path::new("shader.glsl"),
            DEFAULT_PIXEL_SHADER,
            &[Some(renderer::ChannelKind::Texture2d), None, None, None],
        )
        .expect("default template assembles");
        assert!(assembled.contains("DECLARE_TEXTURE2D(Channel0,0)\n"));
        assert!(assembled.contains(DEFAULT_PIXEL_SHADER));
        assert!(!assembled.contains(renderer::assemble::SOURCE_INCLUDE));
    }

    #[test]
    fn template_declares_every_bindable_uniform() {
        for name in ["Time", "TimeDelta", "Date", "Resolution", "MatrixTransform"] {
            assert!(
                DEFAULT_TEMPLATE.contains(&format!(" {name};")),
                "template lacks {name}"
            );
            assert!(renderer::UniformSource::from_name(name).is_some());
        }
    }

    #[test]
    fn test_pattern_is_a_readable_png() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test.png");
        write_test_pattern(&path).expect("write pattern");
        let decoded = image::open(&path).expect("decode");
        assert_eq!(decoded.width(), TEST_PATTERN_SIZE);
        assert_eq!(decoded.height(), TEST_PATTERN_SIZE);
    }
}
