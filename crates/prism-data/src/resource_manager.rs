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

//! The resource manager: one handle store per resource kind plus the indices and
//! queues that tie them together.

use parking_lot::{Mutex, RwLock};
use prism_core::memory::{GpuMemoryStats, MemoryTracker};
use prism_core::renderer::GpuContext;
use prism_core::{EngineError, EngineResult, ErrorKind, Handle};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::dependency::{DependencyGraph, ResourceId};
use crate::handle_store::HandleStore;
use crate::resources::{Material, Mesh, Shader, Texture, TextureStaging};

/// Decodes image files into staging data. Implemented by the texture decode lane and
/// injected so that hot reload can rebuild textures from disk.
pub trait TextureDecoder: Send + Sync {
    /// Decodes `path`. Runs on whichever thread processes the reload queue.
    fn decode(&self, path: &Path, generate_mipmap: bool) -> EngineResult<TextureStaging>;
}

/// A deferred reload, executed on the GPU thread by
/// [`ResourceManager::process_reload_queue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadRequest {
    /// Recompile a shader from its recorded source files.
    Shader(Handle<Shader>),
    /// Re-decode and re-upload a texture from its source file.
    Texture(Handle<Texture>),
    /// Reload whatever was loaded from this file.
    Path(PathBuf),
}

/// Live counts per resource kind plus GPU memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceStats {
    /// Live meshes.
    pub meshes: usize,
    /// Live textures.
    pub textures: usize,
    /// Live shaders.
    pub shaders: usize,
    /// Live materials.
    pub materials: usize,
    /// Dependency edges.
    pub dependency_edges: usize,
    /// Pending reload requests.
    pub pending_reloads: usize,
    /// GPU memory snapshot.
    pub memory: GpuMemoryStats,
}

#[derive(Debug, Default)]
struct NameIndex {
    meshes: HashMap<String, Handle<Mesh>>,
    textures: HashMap<String, Handle<Texture>>,
    shaders: HashMap<String, Handle<Shader>>,
    materials: HashMap<String, Handle<Material>>,
}

fn insert_name<T>(map: &mut HashMap<String, Handle<T>>, kind: &str, name: &str, h: Handle<T>) {
    if name.is_empty() {
        return;
    }
    if let Some(previous) = map.insert(name.to_owned(), h) {
        if previous != h {
            log::warn!("{kind} name '{name}' now refers to {h:?} (was {previous:?})");
        }
    }
}

fn remove_name<T>(map: &mut HashMap<String, Handle<T>>, h: Handle<T>) {
    map.retain(|_, v| *v != h);
}

/// Owns every mesh, texture, shader and material.
///
/// Every store has its own lock; the name index, the dependency graph, the path index
/// and the reload queue each have theirs. Operations that touch the GPU take a
/// [`GpuContext`] and must run on the GPU thread.
pub struct ResourceManager {
    meshes: HandleStore<Mesh>,
    textures: HandleStore<Texture>,
    shaders: HandleStore<Shader>,
    materials: HandleStore<Material>,
    names: Mutex<NameIndex>,
    dependencies: Mutex<DependencyGraph>,
    paths: Mutex<HashMap<PathBuf, Vec<ResourceId>>>,
    reload_queue: Mutex<VecDeque<ReloadRequest>>,
    texture_decoder: RwLock<Option<Arc<dyn TextureDecoder>>>,
    memory: Arc<MemoryTracker>,
    frame: AtomicU64,
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new(Arc::new(MemoryTracker::new()))
    }
}

impl ResourceManager {
    /// Creates an empty manager reporting to `memory`.
    pub fn new(memory: Arc<MemoryTracker>) -> Self {
        Self {
            meshes: HandleStore::new(),
            textures: HandleStore::new(),
            shaders: HandleStore::new(),
            materials: HandleStore::new(),
            names: Mutex::new(NameIndex::default()),
            dependencies: Mutex::new(DependencyGraph::new()),
            paths: Mutex::new(HashMap::new()),
            reload_queue: Mutex::new(VecDeque::new()),
            texture_decoder: RwLock::new(None),
            memory,
            frame: AtomicU64::new(0),
        }
    }

    /// The GPU memory tracker.
    pub fn memory(&self) -> &Arc<MemoryTracker> {
        &self.memory
    }

    /// Installs the decoder used to reload textures from disk.
    pub fn set_texture_decoder(&self, decoder: Arc<dyn TextureDecoder>) {
        *self.texture_decoder.write() = Some(decoder);
    }

    /// Advances the frame counter used for idle tracking.
    pub fn begin_frame(&self, frame: u64) {
        self.frame.store(frame, Ordering::Relaxed);
        self.meshes.set_current_frame(frame);
        self.textures.set_current_frame(frame);
        self.shaders.set_current_frame(frame);
        self.materials.set_current_frame(frame);
    }

    /// The current frame number.
    pub fn current_frame(&self) -> u64 {
        self.frame.load(Ordering::Relaxed)
    }

    fn index_path(&self, path: &Path, id: ResourceId) {
        let mut paths = self.paths.lock();
        let entry = paths.entry(path.to_path_buf()).or_default();
        if !entry.contains(&id) {
            entry.push(id);
        }
    }

    fn unindex_paths(&self, id: ResourceId) {
        self.paths.lock().retain(|_, ids| {
            ids.retain(|i| *i != id);
            !ids.is_empty()
        });
    }

    /// Every file path some resource was loaded from.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let mut out: Vec<_> = self.paths.lock().keys().cloned().collect();
        out.sort();
        out
    }

    // --- Meshes ---

    /// Registers a mesh without uploading it.
    pub fn create_mesh_handle(&self, mesh: Mesh, name: &str) -> Handle<Mesh> {
        let h = self.meshes.allocate(mesh, name, self.current_frame());
        insert_name(&mut self.names.lock().meshes, "Mesh", name, h);
        h
    }

    /// Uploads a mesh and registers it. Must run on the GPU thread.
    pub fn create_uploaded_mesh(
        &self,
        ctx: &GpuContext,
        mesh: Mesh,
        name: &str,
    ) -> EngineResult<Handle<Mesh>> {
        mesh.upload(ctx, &self.memory)?;
        Ok(self.create_mesh_handle(mesh, name))
    }

    /// Uploads an already registered mesh if it is not on the GPU yet.
    pub fn upload_mesh(&self, ctx: &GpuContext, handle: Handle<Mesh>) -> EngineResult<()> {
        let mesh = self
            .meshes
            .get(handle)
            .ok_or_else(|| EngineError::not_found(format!("mesh {handle:?}")))?;
        if !mesh.is_uploaded() {
            mesh.upload(ctx, &self.memory)?;
        }
        Ok(())
    }

    /// Replaces a mesh's data, reusing its GPU buffers. The handle stays valid and
    /// every holder sees the new data on its next access. Must run on the GPU thread.
    pub fn reload_mesh(
        &self,
        ctx: &GpuContext,
        handle: Handle<Mesh>,
        mesh: Mesh,
    ) -> EngineResult<()> {
        let old = self
            .meshes
            .get(handle)
            .ok_or_else(|| EngineError::not_found(format!("mesh {handle:?}")))?;
        let previous_gpu = old.take_gpu();
        drop(old);
        if let Err(e) = mesh.upload_reusing(ctx, &self.memory, previous_gpu) {
            if let Some(gpu) = previous_gpu {
                let gl = ctx.gl("ResourceManager::reload_mesh");
                gl.delete_vertex_array(gpu.vao);
                gl.delete_buffer(gpu.vbo);
                gl.delete_buffer(gpu.ebo);
            }
            return Err(e);
        }
        self.meshes.reload(handle, mesh);
        Ok(())
    }

    /// A mesh by handle.
    pub fn get_mesh(&self, handle: Handle<Mesh>) -> Option<Arc<Mesh>> {
        self.meshes.get(handle)
    }

    /// A mesh by name.
    pub fn find_mesh(&self, name: &str) -> Option<Handle<Mesh>> {
        let h = *self.names.lock().meshes.get(name)?;
        self.meshes.is_valid(h).then_some(h)
    }

    /// Frees a mesh and its GPU buffers. Returns `false` for a stale handle.
    pub fn free_mesh(&self, ctx: &GpuContext, handle: Handle<Mesh>) -> bool {
        match self.meshes.free(handle) {
            Some(mesh) => {
                mesh.release_gpu(ctx, &self.memory);
                remove_name(&mut self.names.lock().meshes, handle);
                self.dependencies.lock().remove_node(ResourceId::Mesh(handle));
                true
            }
            None => false,
        }
    }

    /// The mesh store.
    pub fn meshes(&self) -> &HandleStore<Mesh> {
        &self.meshes
    }

    // --- Textures ---

    /// Registers an uploaded texture.
    pub fn register_texture(&self, texture: Texture, name: &str) -> Handle<Texture> {
        let path = texture.source_path().map(Path::to_path_buf);
        let h = self.textures.allocate(texture, name, self.current_frame());
        insert_name(&mut self.names.lock().textures, "Texture", name, h);
        if let Some(path) = path {
            self.index_path(&path, ResourceId::Texture(h));
        }
        h
    }

    /// Uploads staging data and registers the texture. Must run on the GPU thread.
    pub fn create_texture_from_staging(
        &self,
        ctx: &GpuContext,
        staging: &TextureStaging,
        name: &str,
    ) -> EngineResult<Handle<Texture>> {
        let texture = Texture::from_staging(ctx, staging, &self.memory)?;
        Ok(self.register_texture(texture, name))
    }

    /// Replaces a texture, keeping its handle. The old GL texture is deleted.
    pub fn reload_texture(
        &self,
        ctx: &GpuContext,
        handle: Handle<Texture>,
        staging: &TextureStaging,
    ) -> EngineResult<()> {
        if !self.textures.is_valid(handle) {
            return Err(EngineError::not_found(format!("texture {handle:?}")));
        }
        let texture = Texture::from_staging(ctx, staging, &self.memory)?;
        if let Some(old) = self.textures.reload(handle, texture) {
            old.release_gpu(ctx, &self.memory);
        }
        Ok(())
    }

    /// A texture by handle.
    pub fn get_texture(&self, handle: Handle<Texture>) -> Option<Arc<Texture>> {
        self.textures.get(handle)
    }

    /// A texture by name.
    pub fn find_texture(&self, name: &str) -> Option<Handle<Texture>> {
        let h = *self.names.lock().textures.get(name)?;
        self.textures.is_valid(h).then_some(h)
    }

    /// Frees a texture and its GL object.
    pub fn free_texture(&self, ctx: &GpuContext, handle: Handle<Texture>) -> bool {
        match self.textures.free(handle) {
            Some(texture) => {
                texture.release_gpu(ctx, &self.memory);
                remove_name(&mut self.names.lock().textures, handle);
                self.dependencies
                    .lock()
                    .remove_node(ResourceId::Texture(handle));
                self.unindex_paths(ResourceId::Texture(handle));
                true
            }
            None => false,
        }
    }

    /// The texture store.
    pub fn textures(&self) -> &HandleStore<Texture> {
        &self.textures
    }

    // --- Shaders ---

    /// Registers a linked shader.
    pub fn register_shader(&self, shader: Shader, name: &str) -> Handle<Shader> {
        let paths: Vec<PathBuf> = shader
            .source_paths()
            .iter()
            .map(Path::to_path_buf)
            .collect();
        let h = self.shaders.allocate(shader, name, self.current_frame());
        insert_name(&mut self.names.lock().shaders, "Shader", name, h);
        for path in paths {
            self.index_path(&path, ResourceId::Shader(h));
        }
        h
    }

    /// A shader by handle.
    pub fn get_shader(&self, handle: Handle<Shader>) -> Option<Arc<Shader>> {
        self.shaders.get(handle)
    }

    /// A shader by name.
    pub fn find_shader(&self, name: &str) -> Option<Handle<Shader>> {
        let h = *self.names.lock().shaders.get(name)?;
        self.shaders.is_valid(h).then_some(h)
    }

    /// Frees a shader and deletes its program.
    pub fn free_shader(&self, ctx: &GpuContext, handle: Handle<Shader>) -> bool {
        match self.shaders.free(handle) {
            Some(shader) => {
                shader.release_gpu(ctx);
                remove_name(&mut self.names.lock().shaders, handle);
                self.dependencies
                    .lock()
                    .remove_node(ResourceId::Shader(handle));
                self.unindex_paths(ResourceId::Shader(handle));
                true
            }
            None => false,
        }
    }

    /// The shader store.
    pub fn shaders(&self) -> &HandleStore<Shader> {
        &self.shaders
    }

    // --- Materials ---

    /// Registers a material and records its shader and texture dependencies.
    pub fn register_material(&self, material: Material, name: &str) -> Handle<Material> {
        let shader = material.shader();
        let textures: Vec<_> = material.textures().values().copied().collect();
        let h = self.materials.allocate(material, name, self.current_frame());
        insert_name(&mut self.names.lock().materials, "Material", name, h);

        let mut deps = self.dependencies.lock();
        deps.add(ResourceId::Material(h), ResourceId::Shader(shader));
        for texture in textures {
            deps.add(ResourceId::Material(h), ResourceId::Texture(texture));
        }
        h
    }

    /// Edits a material in place and refreshes its dependency edges.
    pub fn update_material<R>(
        &self,
        handle: Handle<Material>,
        f: impl FnOnce(&mut Material) -> R,
    ) -> Option<R> {
        let (result, shader, textures) = self.materials.update(handle, |m| {
            let r = f(m);
            (r, m.shader(), m.textures().values().copied().collect::<Vec<_>>())
        })?;
        let id = ResourceId::Material(handle);
        let mut deps = self.dependencies.lock();
        for old in deps.dependencies_of(id) {
            deps.remove(id, old);
        }
        deps.add(id, ResourceId::Shader(shader));
        for texture in textures {
            deps.add(id, ResourceId::Texture(texture));
        }
        Some(result)
    }

    /// A material by handle.
    pub fn get_material(&self, handle: Handle<Material>) -> Option<Arc<Material>> {
        self.materials.get(handle)
    }

    /// A material by name.
    pub fn find_material(&self, name: &str) -> Option<Handle<Material>> {
        let h = *self.names.lock().materials.get(name)?;
        self.materials.is_valid(h).then_some(h)
    }

    /// Frees a material. Materials own no GPU objects.
    pub fn free_material(&self, handle: Handle<Material>) -> bool {
        if self.materials.free(handle).is_some() {
            remove_name(&mut self.names.lock().materials, handle);
            self.dependencies
                .lock()
                .remove_node(ResourceId::Material(handle));
            true
        } else {
            false
        }
    }

    /// The material store.
    pub fn materials(&self) -> &HandleStore<Material> {
        &self.materials
    }

    // --- Dependencies ---

    /// Records that `dependent` uses `dependency`.
    pub fn add_dependency(&self, dependent: ResourceId, dependency: ResourceId) -> bool {
        self.dependencies.lock().add(dependent, dependency)
    }

    /// Resources that use `id`.
    pub fn dependents_of(&self, id: ResourceId) -> Vec<ResourceId> {
        self.dependencies.lock().dependents_of(id)
    }

    /// Resources `id` uses.
    pub fn dependencies_of(&self, id: ResourceId) -> Vec<ResourceId> {
        self.dependencies.lock().dependencies_of(id)
    }

    // --- Hot reload ---

    /// Queues a reload. Callable from any thread; duplicates are dropped.
    pub fn queue_reload(&self, request: ReloadRequest) {
        let mut queue = self.reload_queue.lock();
        if !queue.contains(&request) {
            log::debug!("Queued reload: {request:?}");
            queue.push_back(request);
        }
    }

    /// Number of queued reloads.
    pub fn pending_reloads(&self) -> usize {
        self.reload_queue.lock().len()
    }

    /// Resources loaded from `path`.
    pub fn resources_for_path(&self, path: &Path) -> Vec<ResourceId> {
        self.paths.lock().get(path).cloned().unwrap_or_default()
    }

    /// Executes every queued reload. Must run on the GPU thread. Returns the number of
    /// resources reloaded; failures are logged and leave the old resource in place.
    pub fn process_reload_queue(&self, ctx: &GpuContext) -> usize {
        let requests: Vec<_> = self.reload_queue.lock().drain(..).collect();
        let mut reloaded = 0;
        for request in requests {
            let targets = match request {
                ReloadRequest::Shader(h) => vec![ResourceId::Shader(h)],
                ReloadRequest::Texture(h) => vec![ResourceId::Texture(h)],
                ReloadRequest::Path(path) => self.resources_for_path(&path),
            };
            for target in targets {
                let result = match target {
                    ResourceId::Shader(h) => self.reload_shader(ctx, h),
                    ResourceId::Texture(h) => self.reload_texture_from_source(ctx, h),
                    other => Err(EngineError::new(
                        ErrorKind::NotImplemented,
                        format!("hot reload of {other:?}"),
                    )),
                };
                match result {
                    Ok(()) => reloaded += 1,
                    Err(e) => log::warn!("Reload of {target:?} failed: {e}"),
                }
            }
        }
        reloaded
    }

    fn reload_shader(&self, ctx: &GpuContext, handle: Handle<Shader>) -> EngineResult<()> {
        let old = self
            .shaders
            .get(handle)
            .ok_or_else(|| EngineError::not_found(format!("shader {handle:?}")))?;
        let shader = Shader::from_files(ctx, old.source_paths().clone())?;
        drop(old);
        if let Some(old) = self.shaders.reload(handle, shader) {
            old.release_gpu(ctx);
        }
        log::info!("Reloaded shader {handle:?}");
        Ok(())
    }

    fn reload_texture_from_source(
        &self,
        ctx: &GpuContext,
        handle: Handle<Texture>,
    ) -> EngineResult<()> {
        let old = self
            .textures
            .get(handle)
            .ok_or_else(|| EngineError::not_found(format!("texture {handle:?}")))?;
        let path = old
            .source_path()
            .map(Path::to_path_buf)
            .ok_or_else(|| EngineError::invalid_state("texture has no source file"))?;
        let mipmap = old.has_mipmap();
        drop(old);

        let decoder = self
            .texture_decoder
            .read()
            .clone()
            .ok_or_else(|| EngineError::invalid_state("no texture decoder installed"))?;
        let staging = decoder.decode(&path, mipmap)?;
        self.reload_texture(ctx, handle, &staging)?;
        log::info!("Reloaded texture {handle:?} from {}", path.display());
        Ok(())
    }

    // --- Maintenance ---

    /// Evicts meshes and textures idle for more than `threshold` frames and not
    /// referenced outside the manager, releasing their GPU memory. Must run on the GPU
    /// thread. Returns the number of evicted resources.
    pub fn cleanup_unused(&self, ctx: &GpuContext, threshold: u64) -> usize {
        let frame = self.current_frame();
        let meshes = self.meshes.cleanup_unused_collect(frame, threshold);
        let textures = self.textures.cleanup_unused_collect(frame, threshold);
        let count = meshes.len() + textures.len();

        {
            let mut names = self.names.lock();
            let mut deps = self.dependencies.lock();
            for (h, mesh) in &meshes {
                mesh.release_gpu(ctx, &self.memory);
                remove_name(&mut names.meshes, *h);
                deps.remove_node(ResourceId::Mesh(*h));
            }
            for (h, texture) in &textures {
                texture.release_gpu(ctx, &self.memory);
                remove_name(&mut names.textures, *h);
                deps.remove_node(ResourceId::Texture(*h));
            }
        }
        for (h, _) in &textures {
            self.unindex_paths(ResourceId::Texture(*h));
        }
        if count > 0 {
            log::debug!("Evicted {count} unused resource(s) at frame {frame}");
        }
        count
    }

    /// Counts and memory usage.
    pub fn stats(&self) -> ResourceStats {
        ResourceStats {
            meshes: self.meshes.len(),
            textures: self.textures.len(),
            shaders: self.shaders.len(),
            materials: self.materials.len(),
            dependency_edges: self.dependencies.lock().edge_count(),
            pending_reloads: self.pending_reloads(),
            memory: self.memory.snapshot(),
        }
    }
}
