// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! GPU textures and the CPU staging data they are created from.

use prism_core::memory::{MemoryCategory, MemoryTracker};
use prism_core::renderer::{GpuContext, TextureFormat, TextureId};
use prism_core::{EngineError, EngineResult, ErrorKind};
use std::path::{Path, PathBuf};

/// Decoded pixels waiting to be uploaded on the GPU thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureStaging {
    /// Tightly packed rows, top row first.
    pub pixels: Vec<u8>,
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Texel format of `pixels`.
    pub format: TextureFormat,
    /// Build a mip chain after upload.
    pub generate_mipmap: bool,
    /// The file the pixels came from, kept for hot reload.
    pub source_path: Option<PathBuf>,
}

impl TextureStaging {
    /// Checks that `pixels` holds exactly `width * height` texels of `format`.
    pub fn validate(&self) -> EngineResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(EngineError::new(
                ErrorKind::ResourceInvalidFormat,
                format!("texture has zero extent ({}x{})", self.width, self.height),
            ));
        }
        let expected =
            self.width as usize * self.height as usize * self.format.bytes_per_pixel();
        if self.pixels.len() != expected {
            return Err(EngineError::new(
                ErrorKind::ResourceInvalidFormat,
                format!(
                    "texture data is {} bytes, expected {expected} for {}x{} {:?}",
                    self.pixels.len(),
                    self.width,
                    self.height,
                    self.format
                ),
            ));
        }
        Ok(())
    }

    /// Size of the level-0 image in bytes.
    pub fn byte_size(&self) -> u64 {
        self.pixels.len() as u64
    }
}

/// A 2D texture living on the GPU.
#[derive(Debug, Clone, PartialEq)]
pub struct Texture {
    id: TextureId,
    width: u32,
    height: u32,
    format: TextureFormat,
    has_mipmap: bool,
    source_path: Option<PathBuf>,
}

/// Approximate GPU bytes of a texture, including a full mip chain when present.
fn estimated_bytes(width: u32, height: u32, format: TextureFormat, mipmap: bool) -> u64 {
    let base = u64::from(width) * u64::from(height) * format.bytes_per_pixel() as u64;
    if mipmap {
        base + base / 3
    } else {
        base
    }
}

impl Texture {
    /// Creates the GL texture from staging data. Must run on the GPU thread.
    pub fn from_staging(
        ctx: &GpuContext,
        staging: &TextureStaging,
        memory: &MemoryTracker,
    ) -> EngineResult<Self> {
        staging.validate()?;
        let mut texture = Self::allocate(
            ctx,
            staging.width,
            staging.height,
            staging.format,
            Some(&staging.pixels),
            staging.generate_mipmap,
            memory,
        )?;
        texture.source_path = staging.source_path.clone();
        Ok(texture)
    }

    /// Creates a GL texture from raw data, or uninitialized storage when `pixels` is
    /// `None` (render targets, depth buffers).
    pub fn from_data(
        ctx: &GpuContext,
        width: u32,
        height: u32,
        format: TextureFormat,
        pixels: Option<&[u8]>,
        memory: &MemoryTracker,
    ) -> EngineResult<Self> {
        Self::allocate(ctx, width, height, format, pixels, false, memory)
    }

    fn allocate(
        ctx: &GpuContext,
        width: u32,
        height: u32,
        format: TextureFormat,
        pixels: Option<&[u8]>,
        mipmap: bool,
        memory: &MemoryTracker,
    ) -> EngineResult<Self> {
        let gl = ctx.gl("Texture::create");
        let id = gl.create_texture()?;
        gl.active_texture(0);
        gl.bind_texture(Some(id));
        let result = gl.tex_image_2d(width, height, format, pixels);
        if let Err(e) = result {
            gl.bind_texture(None);
            gl.delete_texture(id);
            ctx.mark_bindings_dirty();
            return Err(EngineError::new(ErrorKind::ResourceUploadFailed, e.message));
        }
        let mipmap = mipmap && pixels.is_some();
        if mipmap {
            gl.generate_mipmap();
        }
        gl.bind_texture(None);
        ctx.mark_bindings_dirty();

        memory.record_alloc(
            MemoryCategory::Texture,
            estimated_bytes(width, height, format, mipmap),
        );
        log::debug!("Created texture {id:?} {width}x{height} {format:?} (mipmaps: {mipmap})");
        Ok(Self {
            id,
            width,
            height,
            format,
            has_mipmap: mipmap,
            source_path: None,
        })
    }

    /// Deletes the GL texture. Must run on the GPU thread.
    pub fn release_gpu(&self, ctx: &GpuContext, memory: &MemoryTracker) {
        ctx.gl("Texture::release_gpu").delete_texture(self.id);
        ctx.mark_bindings_dirty();
        memory.record_free(MemoryCategory::Texture, self.byte_size());
    }

    /// The GL texture name.
    #[inline]
    pub fn id(&self) -> TextureId {
        self.id
    }

    /// Width in texels.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in texels.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Texel format.
    #[inline]
    pub fn format(&self) -> TextureFormat {
        self.format
    }

    /// Returns `true` if a mip chain was generated.
    #[inline]
    pub fn has_mipmap(&self) -> bool {
        self.has_mipmap
    }

    /// The file this texture was decoded from, if any.
    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    /// Approximate GPU bytes held.
    pub fn byte_size(&self) -> u64 {
        estimated_bytes(self.width, self.height, self.format, self.has_mipmap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_validation_checks_size() {
        let mut staging = TextureStaging {
            pixels: vec![0; 2 * 2 * 3],
            width: 2,
            height: 2,
            format: TextureFormat::Rgb,
            generate_mipmap: false,
            source_path: None,
        };
        assert!(staging.validate().is_ok());
        staging.format = TextureFormat::Rgba;
        let err = staging.validate().unwrap_err();
        assert_eq!(err.kind, ErrorKind::ResourceInvalidFormat);
    }

    #[test]
    fn mip_chain_adds_a_third() {
        assert_eq!(estimated_bytes(4, 4, TextureFormat::Rgba, false), 64);
        assert_eq!(estimated_bytes(4, 4, TextureFormat::Rgba, true), 85);
    }
}
