use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use image::imageops::flip_vertical_in_place;
use image::GenericImageView;
use wgpu::util::{DeviceExt, TextureDataOrder};

use crate::channels::{ChannelTexture, TextureExtent};
use crate::error::RenderError;
use crate::types::{ChannelKind, CUBEMAP_FACE_STEMS};

use super::context::GpuDevice;

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "gif"];

/// A texture that can be bound to a channel slot.
#[derive(Debug)]
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub kind: ChannelKind,
    extent: TextureExtent,
}

impl ChannelTexture for GpuTexture {
    fn extent(&self) -> TextureExtent {
        self.extent
    }
}

pub(crate) fn view_dimension_of(kind: ChannelKind) -> wgpu::TextureViewDimension {
    match kind {
        ChannelKind::Texture2d => wgpu::TextureViewDimension::D2,
        ChannelKind::Cubemap => wgpu::TextureViewDimension::Cube,
        ChannelKind::Volume => wgpu::TextureViewDimension::D3,
    }
}

/// Rejects extents the device cannot allocate before wgpu sees them.
pub(crate) fn check_extent(
    kind: ChannelKind,
    extent: TextureExtent,
    limits: &wgpu::Limits,
) -> Result<(), String> {
    let (max_side, max_depth) = match kind {
        ChannelKind::Texture2d => (limits.max_texture_dimension_2d, 1),
        ChannelKind::Cubemap => (limits.max_texture_dimension_2d, 6),
        ChannelKind::Volume => (
            limits.max_texture_dimension_3d,
            limits.max_texture_dimension_3d,
        ),
    };
    if extent.width == 0 || extent.height == 0 || extent.depth == 0 {
        return Err(format!("{kind} texture has an empty extent {extent:?}"));
    }
    if extent.width > max_side || extent.height > max_side || extent.depth > max_depth {
        return Err(format!(
            "{kind} texture {}x{}x{} exceeds the device limit of {max_side}",
            extent.width, extent.height, extent.depth
        ));
    }
    Ok(())
}

fn upload(
    gpu: &GpuDevice,
    label: &str,
    kind: ChannelKind,
    extent: TextureExtent,
    data: &[u8],
) -> Result<GpuTexture, RenderError> {
    check_extent(kind, extent, &gpu.device.limits())
        .map_err(|reason| RenderError::resource(label.to_string(), reason))?;
    let dimension = match kind {
        ChannelKind::Volume => wgpu::TextureDimension::D3,
        ChannelKind::Texture2d | ChannelKind::Cubemap => wgpu::TextureDimension::D2,
    };
    let (texture, view) = gpu.validated(
        |device| {
            let texture = device.create_texture_with_data(
                &gpu.queue,
                &wgpu::TextureDescriptor {
                    label: Some(label),
                    size: wgpu::Extent3d {
                        width: extent.width,
                        height: extent.height,
                        depth_or_array_layers: extent.depth,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension,
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                },
                TextureDataOrder::LayerMajor,
                data,
            );
            let view = texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some(label),
                dimension: Some(view_dimension_of(kind)),
                ..Default::default()
            });
            (texture, view)
        },
        |reason| RenderError::resource(label.to_string(), reason),
    )?;
    Ok(GpuTexture {
        texture,
        view,
        kind,
        extent,
    })
}

/// 1x1 white texture (six faces for cubemaps).
pub fn create_placeholder(
    gpu: &GpuDevice,
    kind: ChannelKind,
) -> Result<GpuTexture, RenderError> {
    let depth = if kind == ChannelKind::Cubemap { 6 } else { 1 };
    let data = vec![255u8; 4 * depth as usize];
    upload(
        gpu,
        &format!("placeholder {kind}"),
        kind,
        TextureExtent::new(1, 1, depth),
        &data,
    )
}

/// Loads a texture of the given kind from `path`: an image file for 2D
/// textures, a directory of faces for cubemaps, a directory of slices for volumes.
pub fn load_texture(gpu: &GpuDevice, path: &Path, kind: ChannelKind) -> Result<GpuTexture> {
    match kind {
        ChannelKind::Texture2d => load_texture_2d(gpu, path),
        ChannelKind::Cubemap => load_cubemap(gpu, path),
        ChannelKind::Volume => load_volume(gpu, path),
    }
}

fn load_texture_2d(gpu: &GpuDevice, path: &Path) -> Result<GpuTexture> {
    let image = image::open(path)
        .with_context(|| format!("failed to open texture at {}", path.display()))?;
    let (width, height) = image.dimensions();
    let mut rgba = image.to_rgba8();
    flip_vertical_in_place(&mut rgba);
    Ok(upload(
        gpu,
        &format!("texture {}", path.display()),
        ChannelKind::Texture2d,
        TextureExtent::new(width, height, 1),
        &rgba,
    )?)
}

fn load_cubemap(gpu: &GpuDevice, directory: &Path) -> Result<GpuTexture> {
    if !directory.is_dir() {
        anyhow::bail!(
            "cubemap directory {} is missing or not a directory",
            directory.display()
        );
    }

    let mut faces = Vec::with_capacity(CUBEMAP_FACE_STEMS.len());
    for face in CUBEMAP_FACE_STEMS {
        let face_path = find_cubemap_face(directory, face).ok_or_else(|| {
            anyhow!("cubemap face '{face}' missing in {}", directory.display())
        })?;
        let image = image::open(&face_path).with_context(|| {
            format!("failed to open cubemap face '{face}' at {}", face_path.display())
        })?;
        faces.push((face_path, image));
    }

    let (width, height) = faces[0].1.dimensions();
    if width != height {
        anyhow::bail!(
            "cubemap face {} is not square ({}x{})",
            faces[0].0.display(),
            width,
            height
        );
    }

    let mut data = Vec::with_capacity((width * height * 4 * 6) as usize);
    for (face_path, face) in faces {
        if face.dimensions() != (width, height) {
            anyhow::bail!(
                "cubemap face {} does not match {}x{}",
                face_path.display(),
                width,
                height
            );
        }
        let mut rgba = face.to_rgba8();
        flip_vertical_in_place(&mut rgba);
        data.extend_from_slice(&rgba);
    }

    Ok(upload(
        gpu,
        &format!("cubemap {}", directory.display()),
        ChannelKind::Cubemap,
        TextureExtent::new(width, height, 6),
        &data,
    )?)
}

fn load_volume(gpu: &GpuDevice, directory: &Path) -> Result<GpuTexture> {
    let slices = volume_slices(directory)?;
    let mut data = Vec::new();
    let mut size = None;
    for slice in &slices {
        let image = image::open(slice)
            .with_context(|| format!("failed to open volume slice {}", slice.display()))?;
        let dimensions = image.dimensions();
        match size {
            None => size = Some(dimensions),
            Some(expected) if expected != dimensions => anyhow::bail!(
                "volume slice {} is {}x{}, expected {}x{}",
                slice.display(),
                dimensions.0,
                dimensions.1,
                expected.0,
                expected.1
            ),
            Some(_) => {}
        }
        let mut rgba = image.to_rgba8();
        flip_vertical_in_place(&mut rgba);
        data.extend_from_slice(&rgba);
    }
    let (width, height) =
        size.ok_or_else(|| anyhow!("volume {} has no slices", directory.display()))?;

    Ok(upload(
        gpu,
        &format!("volume {}", directory.display()),
        ChannelKind::Volume,
        TextureExtent::new(width, height, slices.len() as u32),
        &data,
    )?)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Image files in `directory`, sorted by file name.
pub(crate) fn volume_slices(directory: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(directory)
        .with_context(|| format!("failed to read volume directory {}", directory.display()))?;
    let mut slices = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && is_image(&path) {
            slices.push(path);
        }
    }
    slices.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    if slices.is_empty() {
        anyhow::bail!("volume directory {} contains no images", directory.display());
    }
    Ok(slices)
}

pub(crate) fn find_cubemap_face(directory: &Path, stem: &str) -> Option<PathBuf> {
    IMAGE_EXTENSIONS
        .iter()
        .map(|ext| directory.join(format!("{stem}.{ext}")))
        .find(|candidate| candidate.exists())
}

/// Shares loaded textures between slots that name the same file and kind.
#[derive(Default)]
pub struct TextureCache {
    entries: HashMap<(PathBuf, ChannelKind), Arc<GpuTexture>>,
}

impl TextureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(
        &mut self,
        gpu: &GpuDevice,
        path: &Path,
        kind: ChannelKind,
    ) -> Result<Arc<GpuTexture>> {
        let key = (path.to_path_buf(), kind);
        if let Some(texture) = self.entries.get(&key) {
            tracing::debug!(path = %path.display(), kind = %kind, "texture cache hit");
            return Ok(Arc::clone(texture));
        }
        let texture = Arc::new(load_texture(gpu, path, kind)?);
        tracing::info!(
            path = %path.display(),
            kind = %kind,
            width = texture.extent.width,
            height = texture.extent.height,
            "loaded channel texture"
        );
        self.entries.insert(key, Arc::clone(&texture));
        Ok(texture)
    }

    /// Drops textures no slot references any more.
    pub fn prune(&mut self) {
        self.entries.retain(|_, texture| Arc::strong_count(texture) > 1);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
