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

//! Texture decoding and upload.

use image::DynamicImage;
use prism_core::renderer::{GpuContext, TextureFormat};
use prism_core::{EngineResult, Handle};
use prism_data::{ResourceManager, Texture, TextureDecoder, TextureStaging};
use std::path::Path;

use crate::asset_lane::{AssetLoaderLane, LoadError};

/// A lane that decodes image files into [`TextureStaging`] on the CPU and uploads the
/// staged pixels on the GPU thread.
///
/// The staging format follows the source's channel count: grey images become
/// [`TextureFormat::R`], grey-alpha [`TextureFormat::Rg`], and so on up to RGBA. Every
/// format is stored as 8 bits per channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextureLoader {
    generate_mipmap: bool,
}

impl TextureLoader {
    /// Creates a loader that does not request mipmaps.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a loader whose [`AssetLoaderLane::load`] requests a mip chain.
    pub fn with_mipmaps(generate_mipmap: bool) -> Self {
        Self { generate_mipmap }
    }

    /// Reads and decodes `path`. No GPU work happens here.
    pub fn decode_to_staging(
        path: &Path,
        generate_mipmap: bool,
    ) -> Result<TextureStaging, LoadError> {
        let bytes = std::fs::read(path).map_err(|e| LoadError::from_io(path, e))?;
        let mut staging = Self::decode_bytes(&bytes, generate_mipmap)
            .map_err(|e| LoadError::decode(path, e))?;
        staging.source_path = Some(path.to_path_buf());
        log::debug!(
            "Decoded '{}' ({}x{} {:?})",
            path.display(),
            staging.width,
            staging.height,
            staging.format
        );
        Ok(staging)
    }

    /// Decodes an in-memory image file.
    pub fn decode_bytes(
        bytes: &[u8],
        generate_mipmap: bool,
    ) -> Result<TextureStaging, image::ImageError> {
        let img = image::load_from_memory(bytes)?;
        Ok(staging_from_image(img, generate_mipmap))
    }

    /// Creates the GL texture from decoded pixels and registers it under `name`.
    ///
    /// Must run on the GPU thread.
    pub fn upload_staged(
        ctx: &GpuContext,
        resources: &ResourceManager,
        name: &str,
        staging: &TextureStaging,
    ) -> EngineResult<Handle<Texture>> {
        let handle = resources.create_texture_from_staging(ctx, staging, name)?;
        log::debug!(
            "Uploaded texture '{name}' ({}x{}, {} bytes)",
            staging.width,
            staging.height,
            staging.byte_size()
        );
        Ok(handle)
    }
}

fn staging_from_image(img: DynamicImage, generate_mipmap: bool) -> TextureStaging {
    let (width, height) = (img.width(), img.height());
    let (format, pixels) = match img.color().channel_count() {
        1 => (TextureFormat::R, img.to_luma8().into_raw()),
        2 => (TextureFormat::Rg, img.to_luma_alpha8().into_raw()),
        3 => (TextureFormat::Rgb, img.to_rgb8().into_raw()),
        _ => (TextureFormat::Rgba, img.to_rgba8().into_raw()),
    };
    TextureStaging {
        pixels,
        width,
        height,
        format,
        generate_mipmap,
        source_path: None,
    }
}

impl AssetLoaderLane<TextureStaging> for TextureLoader {
    fn load(&self, path: &Path) -> Result<TextureStaging, LoadError> {
        Self::decode_to_staging(path, self.generate_mipmap)
    }
}

impl TextureDecoder for TextureLoader {
    fn decode(&self, path: &Path, generate_mipmap: bool) -> EngineResult<TextureStaging> {
        Ok(Self::decode_to_staging(path, generate_mipmap)?)
    }
}
