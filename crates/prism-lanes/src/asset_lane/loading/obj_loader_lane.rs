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

//! Defines a lane for loading OBJ mesh assets.

use prism_core::math::{Vec2, Vec3};
use prism_data::{Mesh, Vertex};
use std::io::Cursor;
use std::path::Path;

use crate::asset_lane::{AssetLoaderLane, LoadError};

/// Lane for loading OBJ meshes into the engine's interleaved vertex format.
///
/// Every object in the file is merged into a single indexed triangle mesh. Missing
/// normals are generated from the faces and missing vertex colors default to white.
/// The returned mesh is not uploaded.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeshLoader;

pub(crate) fn obj_load_options() -> tobj::LoadOptions {
    tobj::LoadOptions {
        triangulate: true,
        single_index: true,
        ..Default::default()
    }
}

impl MeshLoader {
    /// Reads and parses an OBJ file. Material libraries are ignored.
    pub fn load_obj(path: &Path) -> Result<Mesh, LoadError> {
        let text = std::fs::read_to_string(path).map_err(|e| LoadError::from_io(path, e))?;
        Self::parse_obj(&text, path)
    }

    /// Parses OBJ text. `source` is only used in error messages.
    pub fn parse_obj(text: &str, source: &Path) -> Result<Mesh, LoadError> {
        let (models, _materials) = tobj::load_obj_buf(
            &mut Cursor::new(text),
            &obj_load_options(),
            |_| Ok((Vec::new(), Default::default())),
        )
        .map_err(|e| LoadError::decode(source, e))?;

        let mut vertices = Vec::new();
        let mut indices = Vec::new();
        for model in &models {
            append_tobj_mesh(&model.mesh, &mut vertices, &mut indices);
        }
        if indices.is_empty() {
            return Err(LoadError::Empty(source.to_path_buf()));
        }
        log::debug!(
            "Parsed '{}': {} objects, {} vertices, {} triangles",
            source.display(),
            models.len(),
            vertices.len(),
            indices.len() / 3
        );
        Ok(Mesh::new(vertices, indices))
    }
}

impl AssetLoaderLane<Mesh> for MeshLoader {
    fn load(&self, path: &Path) -> Result<Mesh, LoadError> {
        Self::load_obj(path)
    }
}

/// Converts one parsed OBJ object into a standalone mesh, or `None` if it has no faces.
pub(crate) fn mesh_from_tobj(mesh: &tobj::Mesh) -> Option<Mesh> {
    let mut vertices = Vec::new();
    let mut indices = Vec::new();
    append_tobj_mesh(mesh, &mut vertices, &mut indices);
    (!indices.is_empty()).then(|| Mesh::new(vertices, indices))
}

/// Appends `mesh` to the buffers, offsetting its indices past the existing vertices.
fn append_tobj_mesh(mesh: &tobj::Mesh, vertices: &mut Vec<Vertex>, indices: &mut Vec<u32>) {
    let base = vertices.len() as u32;
    let count = mesh.positions.len() / 3;
    let has_normals = mesh.normals.len() == count * 3;
    let has_uvs = mesh.texcoords.len() == count * 2;
    let has_colors = mesh.vertex_color.len() == count * 3;

    let positions: Vec<Vec3> = mesh
        .positions
        .chunks_exact(3)
        .map(|p| Vec3::new(p[0], p[1], p[2]))
        .collect();

    // Indices pointing past the vertex data would make the draw read out of bounds.
    let faces: Vec<u32> = mesh
        .indices
        .chunks_exact(3)
        .filter(|tri| tri.iter().all(|&i| (i as usize) < count))
        .flatten()
        .copied()
        .collect();
    if faces.len() != mesh.indices.len() {
        log::warn!(
            "Dropped {} OBJ indices outside the vertex range",
            mesh.indices.len() - faces.len()
        );
    }

    let normals = if has_normals {
        mesh.normals
            .chunks_exact(3)
            .map(|n| Vec3::new(n[0], n[1], n[2]))
            .collect()
    } else {
        face_normals(&positions, &faces)
    };

    vertices.reserve(count);
    for (i, position) in positions.iter().enumerate() {
        let uv = if has_uvs {
            Vec2::new(mesh.texcoords[i * 2], mesh.texcoords[i * 2 + 1])
        } else {
            Vec2::ZERO
        };
        let mut vertex = Vertex::new(*position, normals[i], uv);
        if has_colors {
            let c = &mesh.vertex_color[i * 3..i * 3 + 3];
            vertex.color = [c[0], c[1], c[2], 1.0];
        }
        vertices.push(vertex);
    }
    indices.extend(faces.iter().map(|&i| i + base));
}

/// Area-weighted average of the normals of the faces around each vertex.
fn face_normals(positions: &[Vec3], indices: &[u32]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; positions.len()];
    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        let n = (positions[b] - positions[a]).cross(positions[c] - positions[a]);
        normals[a] += n;
        normals[b] += n;
        normals[c] += n;
    }
    normals
        .into_iter()
        .map(|n| {
            let n = n.normalize();
            if n == Vec3::ZERO {
                Vec3::Z
            } else {
                n
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const QUAD: &str = "\
o quad
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
f 1 2 3 4
";

    #[test]
    fn quad_is_triangulated_with_generated_normals() {
        let mesh = MeshLoader::parse_obj(QUAD, Path::new("quad.obj")).unwrap();
        assert_eq!(mesh.vertices().len(), 4);
        assert_eq!(mesh.triangle_count(), 2);
        for v in mesh.vertices() {
            assert_relative_eq!(v.normal().z, 1.0, epsilon = 1e-5);
            assert_eq!(v.color, [1.0, 1.0, 1.0, 1.0]);
        }
    }

    #[test]
    fn objects_are_merged_with_offset_indices() {
        let text = format!("{QUAD}o second\nv 0 0 1\nv 1 0 1\nv 0 1 1\nf 5 6 7\n");
        let mesh = MeshLoader::parse_obj(&text, Path::new("two.obj")).unwrap();
        assert_eq!(mesh.vertices().len(), 7);
        assert_eq!(mesh.triangle_count(), 3);
        assert!(mesh.indices()[6..].iter().all(|&i| (4..7).contains(&i)));
    }

    #[test]
    fn file_without_faces_is_empty() {
        let err = MeshLoader::parse_obj("v 0 0 0\n", Path::new("points.obj")).unwrap_err();
        assert!(matches!(err, LoadError::Empty(_)));
    }

    #[test]
    fn load_obj_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quad.obj");
        std::fs::write(&path, QUAD).unwrap();
        let mesh = MeshLoader.load(&path).unwrap();
        assert_eq!(mesh.indices().len(), 6);
        assert!(!mesh.is_uploaded());
    }
}
