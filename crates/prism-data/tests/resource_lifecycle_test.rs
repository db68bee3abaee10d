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

use std::sync::Arc;

use prism_core::memory::MemoryCategory;
use prism_core::renderer::{GpuContext, GpuThreadGuard, TextureFormat};
use prism_data::{Mesh, ResourceManager, TextureStaging};
use prism_infra::HeadlessDevice;

fn gpu_context() -> (Arc<HeadlessDevice>, GpuContext) {
    let device = Arc::new(HeadlessDevice::new());
    let guard = Arc::new(GpuThreadGuard::new());
    guard.register_current().expect("fresh guard accepts the test thread");
    let ctx = GpuContext::new(device.clone(), guard);
    (device, ctx)
}

fn checker_staging(size: u32) -> TextureStaging {
    TextureStaging {
        pixels: vec![0x7f; (size * size * 4) as usize],
        width: size,
        height: size,
        format: TextureFormat::Rgba,
        generate_mipmap: false,
        source_path: None,
    }
}

#[test]
fn test_freed_handle_is_stale_after_slot_reuse() {
    // --- 1. ARRANGE ---
    let (device, ctx) = gpu_context();
    let rm = ResourceManager::default();
    let first = rm
        .create_uploaded_mesh(&ctx, Mesh::quad(1.0), "first")
        .expect("quad uploads");
    assert_eq!(device.live_vertex_arrays(), 1);

    // --- 2. ACT ---
    assert!(rm.free_mesh(&ctx, first));
    let second = rm
        .create_uploaded_mesh(&ctx, Mesh::cube(1.0), "second")
        .expect("cube uploads");

    // --- 3. ASSERT ---
    assert_eq!(second.id, first.id, "the freed slot should be recycled");
    assert_ne!(second.generation, first.generation);
    assert!(rm.get_mesh(first).is_none(), "stale handle must not resolve");
    assert!(rm.get_mesh(second).is_some());
    assert!(!rm.free_mesh(&ctx, first), "double free is a no-op");
    assert_eq!(device.live_vertex_arrays(), 1);
    assert_eq!(device.live_buffers(), 2);
}

#[test]
fn test_mesh_reload_keeps_handle_and_gpu_objects() {
    // --- 1. ARRANGE ---
    let (device, ctx) = gpu_context();
    let rm = ResourceManager::default();
    let handle = rm
        .create_uploaded_mesh(&ctx, Mesh::quad(1.0), "model")
        .expect("quad uploads");
    let before = rm.get_mesh(handle).and_then(|m| m.gpu()).expect("uploaded");

    // --- 2. ACT ---
    rm.reload_mesh(&ctx, handle, Mesh::cube(2.0))
        .expect("reload succeeds");

    // --- 3. ASSERT ---
    let mesh = rm.get_mesh(handle).expect("handle still valid");
    let after = mesh.gpu().expect("reloaded mesh is uploaded");
    assert_eq!(after.vao, before.vao);
    assert_eq!(after.vbo, before.vbo);
    assert_eq!(after.index_count, 36);
    assert_eq!(device.live_buffers(), 2, "no buffers leaked by the reload");
    assert_eq!(
        rm.memory().current_bytes(MemoryCategory::Mesh),
        after.total_bytes()
    );
}

#[test]
fn test_cleanup_evicts_only_idle_unshared_textures() {
    // --- 1. ARRANGE ---
    let (device, ctx) = gpu_context();
    let rm = ResourceManager::default();
    let idle = rm
        .create_texture_from_staging(&ctx, &checker_staging(4), "idle")
        .expect("texture uploads");
    let busy = rm
        .create_texture_from_staging(&ctx, &checker_staging(4), "busy")
        .expect("texture uploads");
    assert_eq!(device.live_textures(), 2);
    let held = rm.get_texture(busy).expect("live texture");

    // --- 2. ACT ---
    rm.begin_frame(100);
    let evicted = rm.cleanup_unused(&ctx, 10);

    // --- 3. ASSERT ---
    assert_eq!(evicted, 1, "the held texture must survive");
    assert!(rm.get_texture(idle).is_none());
    assert!(rm.find_texture("idle").is_none());
    assert_eq!(rm.find_texture("busy"), Some(busy));
    assert_eq!(device.live_textures(), 1);
    assert_eq!(
        rm.memory().current_bytes(MemoryCategory::Texture),
        held.byte_size()
    );
}

#[test]
fn test_invalid_staging_is_rejected_before_upload() {
    // --- 1. ARRANGE ---
    let (device, ctx) = gpu_context();
    let rm = ResourceManager::default();
    let mut staging = checker_staging(4);
    staging.pixels.truncate(3);

    // --- 2. ACT ---
    let result = rm.create_texture_from_staging(&ctx, &staging, "broken");

    // --- 3. ASSERT ---
    assert!(result.is_err());
    assert_eq!(device.live_textures(), 0);
    assert_eq!(rm.stats().textures, 0);
}
