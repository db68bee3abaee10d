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

use std::fs;
use std::sync::Arc;

use prism_core::renderer::{GpuContext, GpuThreadGuard};
use prism_data::resources::ShaderSourcePaths;
use prism_data::{ReloadRequest, ResourceManager, Shader};
use prism_infra::HeadlessDevice;

const VERTEX: &str = "#version 430 core\nlayout(location = 0) in vec3 aPos;\nuniform mat4 uMVP;\nvoid main() { gl_Position = uMVP * vec4(aPos, 1.0); }\n";
const FRAGMENT: &str = "#version 430 core\nout vec4 color;\nvoid main() { color = vec4(1.0); }\n";

#[test]
fn test_shader_reload_from_disk_swaps_program_behind_handle() {
    // --- 1. ARRANGE ---
    let device = Arc::new(HeadlessDevice::new());
    let guard = Arc::new(GpuThreadGuard::new());
    guard.register_current().unwrap();
    let ctx = GpuContext::new(device.clone(), guard);

    let dir = tempfile::tempdir().unwrap();
    let vs = dir.path().join("basic.vert");
    let fs_path = dir.path().join("basic.frag");
    fs::write(&vs, VERTEX).unwrap();
    fs::write(&fs_path, FRAGMENT).unwrap();

    let rm = ResourceManager::default();
    let paths = ShaderSourcePaths {
        vertex: Some(vs.clone()),
        fragment: Some(fs_path.clone()),
        compute: None,
    };
    let shader = Shader::from_files(&ctx, paths).unwrap();
    let first_program = shader.program();
    let handle = rm.register_shader(shader, "basic");

    // --- 2. ACT ---
    fs::write(&vs, VERTEX.replace("uMVP", "uModelViewProjection")).unwrap();
    rm.queue_reload(ReloadRequest::Path(vs.clone()));
    let reloaded = rm.process_reload_queue(&ctx);

    // --- 3. ASSERT ---
    assert_eq!(reloaded, 1);
    let current = rm.get_shader(handle).expect("handle survives reload");
    assert_ne!(current.program(), first_program);
    assert_eq!(device.live_programs(), 1, "old program is deleted");
    assert!(current
        .uniform_location(&ctx, "uModelViewProjection")
        .is_some());
}

#[test]
fn test_failed_shader_reload_keeps_previous_program() {
    // --- 1. ARRANGE ---
    let device = Arc::new(HeadlessDevice::new());
    let guard = Arc::new(GpuThreadGuard::new());
    guard.register_current().unwrap();
    let ctx = GpuContext::new(device.clone(), guard);

    let dir = tempfile::tempdir().unwrap();
    let vs = dir.path().join("broken.vert");
    let fs_path = dir.path().join("broken.frag");
    fs::write(&vs, VERTEX).unwrap();
    fs::write(&fs_path, FRAGMENT).unwrap();

    let rm = ResourceManager::default();
    let shader = Shader::from_files(
        &ctx,
        ShaderSourcePaths {
            vertex: Some(vs.clone()),
            fragment: Some(fs_path),
            compute: None,
        },
    )
    .unwrap();
    let program = shader.program();
    let handle = rm.register_shader(shader, "broken");

    // --- 2. ACT ---
    fs::write(&vs, "#version 430 core\n#error syntax\n").unwrap();
    rm.queue_reload(ReloadRequest::Shader(handle));
    let reloaded = rm.process_reload_queue(&ctx);

    // --- 3. ASSERT ---
    assert_eq!(reloaded, 0);
    assert_eq!(rm.get_shader(handle).unwrap().program(), program);
    assert_eq!(rm.pending_reloads(), 0);
}
