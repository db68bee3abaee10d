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

//! Multi-object OBJ models with MTL materials.
//!
//! Loading is split in two halves. [`ModelLoader::load`] runs on a worker: it parses the
//! geometry, reads the material library and decodes every referenced texture into
//! staging memory. [`ModelData::upload`] runs on the GPU thread: it creates the
//! textures, binds them into the material slots and registers everything with the
//! resource manager as [`ModelLoadOptions`] dictates.

use parking_lot::RwLock;
use prism_core::math::{LinearRgba, Vec3};
use prism_core::renderer::{GpuContext, UniformValue};
use prism_core::{EngineResult, Handle};
use prism_data::{
    Material, Mesh, PipelineState, ResourceId, ResourceManager, Shader, Texture, TextureStaging,
};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::obj_loader_lane::{mesh_from_tobj, obj_load_options};
use super::texture_loader_lane::TextureLoader;
use crate::asset_lane::{AssetLoaderLane, LoadError};

/// Texture slot of the MTL `map_Kd` image.
pub const TEXTURE_SLOT_DIFFUSE: u32 = 0;
/// Texture slot of the MTL `norm` / `map_Bump` image.
pub const TEXTURE_SLOT_NORMAL: u32 = 1;
/// Texture slot of the MTL `map_Ks` image.
pub const TEXTURE_SLOT_SPECULAR: u32 = 2;

/// Material parameter holding the diffuse color (`vec4`).
pub const DIFFUSE_COLOR_UNIFORM: &str = "uDiffuseColor";
/// Material parameter holding the specular color (`vec3`).
pub const SPECULAR_COLOR_UNIFORM: &str = "uSpecularColor";
/// Material parameter holding the specular exponent (`float`).
pub const SHININESS_UNIFORM: &str = "uShininess";

/// What [`ModelData::upload`] does besides creating GPU objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelLoadOptions {
    /// Upload every mesh immediately. Otherwise meshes are registered with CPU data
    /// only and upload on first draw.
    pub auto_upload: bool,
    /// Record the finished model in the [`ModelLibrary`] under its name.
    pub register_model: bool,
    /// Index meshes by `"<model>/<object>"` so they can be found by name.
    pub register_meshes: bool,
    /// Index materials and textures by `"<model>/<name>"`.
    pub register_materials: bool,
    /// Add a mesh → material edge for every part.
    pub update_dependency_graph: bool,
}

impl Default for ModelLoadOptions {
    fn default() -> Self {
        Self {
            auto_upload: true,
            register_model: true,
            register_meshes: true,
            register_materials: true,
            update_dependency_graph: true,
        }
    }
}

/// A texture a material wants bound, decoded on the worker and waiting for the GPU
/// thread.
#[derive(Debug, Clone)]
pub struct DeferredTexture {
    /// The material slot.
    pub slot: u32,
    /// The image file.
    pub path: PathBuf,
    /// The decoded pixels.
    pub staging: TextureStaging,
}

/// A material as described by the MTL file.
#[derive(Debug, Clone)]
pub struct MaterialDescription {
    /// The MTL material name.
    pub name: String,
    /// `Kd` with `d` as alpha.
    pub diffuse: LinearRgba,
    /// `Ks`.
    pub specular: Vec3,
    /// `Ns`.
    pub shininess: f32,
    /// Textures to create and bind on upload.
    pub textures: Vec<DeferredTexture>,
}

impl Default for MaterialDescription {
    fn default() -> Self {
        Self {
            name: String::new(),
            diffuse: LinearRgba::WHITE,
            specular: Vec3::ZERO,
            shininess: 0.0,
            textures: Vec::new(),
        }
    }
}

impl MaterialDescription {
    /// Returns `true` if the dissolve factor makes the material translucent.
    pub fn is_transparent(&self) -> bool {
        self.diffuse.is_translucent()
    }

    /// Builds an engine material without textures.
    pub fn to_material(&self, shader: Handle<Shader>) -> Material {
        let pipeline = if self.is_transparent() {
            PipelineState::transparent()
        } else {
            PipelineState::default()
        };
        Material::new(shader)
            .with_pipeline(pipeline)
            .with_param(DIFFUSE_COLOR_UNIFORM, UniformValue::Vec4(self.diffuse.to_array()))
            .with_param(SPECULAR_COLOR_UNIFORM, UniformValue::Vec3(self.specular.to_array()))
            .with_param(SHININESS_UNIFORM, UniformValue::Float(self.shininess))
    }
}

/// One object of a model.
#[derive(Debug)]
pub struct ModelObject {
    /// The OBJ object name.
    pub name: String,
    /// Geometry, not yet uploaded.
    pub mesh: Mesh,
    /// Index into [`ModelData::materials`].
    pub material: Option<usize>,
}

/// The CPU-side result of decoding a model file.
#[derive(Debug)]
pub struct ModelData {
    /// The file stem.
    pub name: String,
    /// The OBJ file.
    pub source_path: PathBuf,
    /// The objects, in file order.
    pub objects: Vec<ModelObject>,
    /// The materials referenced by the objects.
    pub materials: Vec<MaterialDescription>,
}

/// A part of an uploaded model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPart {
    /// The OBJ object name.
    pub name: String,
    /// The registered mesh.
    pub mesh: Handle<Mesh>,
    /// The registered material, if the object had one.
    pub material: Option<Handle<Material>>,
}

/// A model whose resources live in the resource manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModel {
    /// The model name.
    pub name: String,
    /// The parts, in file order.
    pub parts: Vec<ModelPart>,
    /// Every material created for the model.
    pub materials: Vec<Handle<Material>>,
    /// Every texture created for the model.
    pub textures: Vec<Handle<Texture>>,
}

/// Finished models by name.
#[derive(Debug, Default)]
pub struct ModelLibrary {
    models: RwLock<HashMap<String, Arc<LoadedModel>>>,
}

impl ModelLibrary {
    /// Creates an empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `model` under its name, replacing any previous entry.
    pub fn insert(&self, model: Arc<LoadedModel>) {
        let mut models = self.models.write();
        if models.contains_key(&model.name) {
            log::warn!("Model '{}' is already registered; replacing it", model.name);
        }
        models.insert(model.name.clone(), model);
    }

    /// A model by name.
    pub fn get(&self, name: &str) -> Option<Arc<LoadedModel>> {
        self.models.read().get(name).cloned()
    }

    /// Forgets a model. Its resources stay in the resource manager.
    pub fn remove(&self, name: &str) -> Option<Arc<LoadedModel>> {
        self.models.write().remove(name)
    }

    /// Number of models.
    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    /// Returns `true` if no model is registered.
    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }
}

fn scoped_name(enabled: bool, model: &str, item: &str) -> String {
    if enabled {
        format!("{model}/{item}")
    } else {
        String::new()
    }
}

impl ModelData {
    /// Total triangles over every object.
    pub fn triangle_count(&self) -> u64 {
        self.objects.iter().map(|o| o.mesh.triangle_count()).sum()
    }

    /// Number of textures waiting for upload.
    pub fn pending_texture_count(&self) -> usize {
        self.materials.iter().map(|m| m.textures.len()).sum()
    }

    /// Creates the model's GPU resources and registers them. Must run on the GPU thread.
    ///
    /// Every material uses `shader`. A texture that fails to upload leaves its slot
    /// empty; a mesh that fails to upload aborts the whole model.
    pub fn upload(
        self,
        ctx: &GpuContext,
        resources: &ResourceManager,
        library: &ModelLibrary,
        shader: Handle<Shader>,
        options: &ModelLoadOptions,
    ) -> EngineResult<Arc<LoadedModel>> {
        let ModelData {
            name,
            objects,
            materials: descriptions,
            ..
        } = self;

        let mut textures_by_path: HashMap<PathBuf, Handle<Texture>> = HashMap::new();
        let mut textures = Vec::new();
        let mut materials = Vec::with_capacity(descriptions.len());
        for description in &descriptions {
            let mut material = description.to_material(shader);
            for request in &description.textures {
                let handle = match textures_by_path.get(&request.path) {
                    Some(&h) => h,
                    None => {
                        let file = request
                            .path
                            .file_name()
                            .map(|f| f.to_string_lossy().into_owned())
                            .unwrap_or_default();
                        let texture_name = scoped_name(options.register_materials, &name, &file);
                        match TextureLoader::upload_staged(
                            ctx,
                            resources,
                            &texture_name,
                            &request.staging,
                        ) {
                            Ok(h) => {
                                textures_by_path.insert(request.path.clone(), h);
                                textures.push(h);
                                h
                            }
                            Err(e) => {
                                log::warn!(
                                    "Model '{name}': texture '{}' failed to upload: {e}",
                                    request.path.display()
                                );
                                continue;
                            }
                        }
                    }
                };
                material.set_texture(request.slot, handle);
            }
            let material_name =
                scoped_name(options.register_materials, &name, &description.name);
            materials.push(resources.register_material(material, &material_name));
        }

        let mut parts = Vec::with_capacity(objects.len());
        for object in objects {
            let mesh_name = scoped_name(options.register_meshes, &name, &object.name);
            let mesh = resources.create_mesh_handle(object.mesh, &mesh_name);
            if options.auto_upload {
                resources.upload_mesh(ctx, mesh)?;
            }
            let material = object.material.and_then(|i| materials.get(i).copied());
            if options.update_dependency_graph {
                if let Some(material) = material {
                    resources.add_dependency(ResourceId::Mesh(mesh), ResourceId::Material(material));
                }
            }
            parts.push(ModelPart {
                name: object.name,
                mesh,
                material,
            });
        }

        log::info!(
            "Model '{name}' ready: {} parts, {} materials, {} textures",
            parts.len(),
            materials.len(),
            textures.len()
        );
        let model = Arc::new(LoadedModel {
            name,
            parts,
            materials,
            textures,
        });
        if options.register_model {
            library.insert(Arc::clone(&model));
        }
        Ok(model)
    }
}

/// Lane that decodes OBJ + MTL models.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelLoader {
    generate_mipmaps: bool,
}

impl ModelLoader {
    /// Creates a loader. `generate_mipmaps` applies to every material texture.
    pub fn new(generate_mipmaps: bool) -> Self {
        Self { generate_mipmaps }
    }

    /// Parses `path`, its material libraries and their textures. No GPU work happens here.
    ///
    /// A missing or malformed material library, or an undecodable texture, is logged
    /// and skipped; only the geometry itself is mandatory.
    pub fn load(&self, path: &Path) -> Result<ModelData, LoadError> {
        let text = std::fs::read_to_string(path).map_err(|e| LoadError::from_io(path, e))?;
        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();

        let (models, mtl) = tobj::load_obj_buf(
            &mut Cursor::new(text.as_str()),
            &obj_load_options(),
            |mtl_path| tobj::load_mtl(base.join(mtl_path)),
        )
        .map_err(|e| LoadError::decode(path, e))?;

        let mtl = mtl.unwrap_or_else(|e| {
            log::warn!("'{}': material library unusable: {e}", path.display());
            Vec::new()
        });
        let materials: Vec<MaterialDescription> = mtl
            .iter()
            .map(|m| self.describe_material(m, &base))
            .collect();

        let objects: Vec<ModelObject> = models
            .iter()
            .enumerate()
            .filter_map(|(i, model)| {
                let mesh = mesh_from_tobj(&model.mesh)?;
                let name = if model.name.is_empty() {
                    format!("object{i}")
                } else {
                    model.name.clone()
                };
                let material = model.mesh.material_id.filter(|&id| id < materials.len());
                Some(ModelObject {
                    name,
                    mesh,
                    material,
                })
            })
            .collect();
        if objects.is_empty() {
            return Err(LoadError::Empty(path.to_path_buf()));
        }

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_owned());
        Ok(ModelData {
            name,
            source_path: path.to_path_buf(),
            objects,
            materials,
        })
    }

    fn describe_material(&self, m: &tobj::Material, base: &Path) -> MaterialDescription {
        let kd = m.diffuse.unwrap_or([1.0, 1.0, 1.0]);
        let alpha = m.dissolve.unwrap_or(1.0);
        let mut description = MaterialDescription {
            name: m.name.clone(),
            diffuse: LinearRgba::new(kd[0], kd[1], kd[2], alpha),
            specular: m
                .specular
                .map(|ks| Vec3::new(ks[0], ks[1], ks[2]))
                .unwrap_or(Vec3::ZERO),
            shininess: m.shininess.unwrap_or(0.0),
            textures: Vec::new(),
        };

        let slots = [
            (TEXTURE_SLOT_DIFFUSE, &m.diffuse_texture),
            (TEXTURE_SLOT_NORMAL, &m.normal_texture),
            (TEXTURE_SLOT_SPECULAR, &m.specular_texture),
        ];
        for (slot, file) in slots {
            let Some(file) = file.as_deref().filter(|f| !f.is_empty()) else {
                continue;
            };
            let texture_path = base.join(file);
            match TextureLoader::decode_to_staging(&texture_path, self.generate_mipmaps) {
                Ok(staging) => description.textures.push(DeferredTexture {
                    slot,
                    path: texture_path,
                    staging,
                }),
                Err(e) => log::warn!("Material '{}': {e}", m.name),
            }
        }
        description
    }
}

impl AssetLoaderLane<ModelData> for ModelLoader {
    fn load(&self, path: &Path) -> Result<ModelData, LoadError> {
        ModelLoader::load(self, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CRATE_OBJ: &str = "\
mtllib crate.mtl
o lid
v 0 1 0
v 1 1 0
v 1 1 1
usemtl wood
f 1 2 3
o body
v 0 0 0
v 1 0 0
v 1 0 1
f 4 5 6
";

    const CRATE_MTL: &str = "\
newmtl wood
Kd 0.5 0.25 0.0
Ns 32
d 0.5
map_Kd missing.png
";

    #[test]
    fn objects_and_materials_are_described() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("crate.obj"), CRATE_OBJ).unwrap();
        std::fs::write(dir.path().join("crate.mtl"), CRATE_MTL).unwrap();

        let data = ModelLoader::default()
            .load(&dir.path().join("crate.obj"))
            .unwrap();

        assert_eq!(data.name, "crate");
        assert_eq!(data.objects.len(), 2);
        assert_eq!(data.objects[0].name, "lid");
        assert_eq!(data.objects[0].material, Some(0));
        assert_eq!(data.objects[1].material, None);
        assert_eq!(data.triangle_count(), 2);

        let wood = &data.materials[0];
        assert_eq!(wood.name, "wood");
        assert!(wood.is_transparent());
        assert_eq!(wood.shininess, 32.0);
        // The texture file does not exist, so its slot is dropped.
        assert_eq!(data.pending_texture_count(), 0);
    }

    #[test]
    fn missing_material_library_still_loads_geometry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("crate.obj"), CRATE_OBJ).unwrap();
        let data = ModelLoader::default()
            .load(&dir.path().join("crate.obj"))
            .unwrap();
        assert_eq!(data.objects.len(), 2);
        assert!(data.materials.is_empty());
        assert!(data.objects.iter().all(|o| o.material.is_none()));
    }

    #[test]
    fn transparent_description_builds_blended_material() {
        let description = MaterialDescription {
            diffuse: LinearRgba::new(1.0, 1.0, 1.0, 0.25),
            ..Default::default()
        };
        let material = description.to_material(Handle::new(1, 0));
        assert!(material.is_transparent());
        assert!(material.param(DIFFUSE_COLOR_UNIFORM).is_some());
    }
}
