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

//! A directed graph of "uses" edges between resources.

use prism_core::Handle;
use std::collections::{HashMap, HashSet};

use crate::resources::{Material, Mesh, Shader, Texture};

/// Any resource the manager owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceId {
    /// A mesh.
    Mesh(Handle<Mesh>),
    /// A texture.
    Texture(Handle<Texture>),
    /// A shader.
    Shader(Handle<Shader>),
    /// A material.
    Material(Handle<Material>),
}

/// Edges `dependent -> dependency`, indexed both ways.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    forward: HashMap<ResourceId, HashSet<ResourceId>>,
    reverse: HashMap<ResourceId, HashSet<ResourceId>>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `dependent` uses `dependency`. Returns `false` for a self edge.
    pub fn add(&mut self, dependent: ResourceId, dependency: ResourceId) -> bool {
        if dependent == dependency {
            return false;
        }
        self.forward.entry(dependent).or_default().insert(dependency);
        self.reverse.entry(dependency).or_default().insert(dependent);
        true
    }

    /// Removes a single edge.
    pub fn remove(&mut self, dependent: ResourceId, dependency: ResourceId) {
        if let Some(set) = self.forward.get_mut(&dependent) {
            set.remove(&dependency);
            if set.is_empty() {
                self.forward.remove(&dependent);
            }
        }
        if let Some(set) = self.reverse.get_mut(&dependency) {
            set.remove(&dependent);
            if set.is_empty() {
                self.reverse.remove(&dependency);
            }
        }
    }

    /// Removes every edge touching `id`.
    pub fn remove_node(&mut self, id: ResourceId) {
        if let Some(deps) = self.forward.remove(&id) {
            for dep in deps {
                if let Some(set) = self.reverse.get_mut(&dep) {
                    set.remove(&id);
                    if set.is_empty() {
                        self.reverse.remove(&dep);
                    }
                }
            }
        }
        if let Some(users) = self.reverse.remove(&id) {
            for user in users {
                if let Some(set) = self.forward.get_mut(&user) {
                    set.remove(&id);
                    if set.is_empty() {
                        self.forward.remove(&user);
                    }
                }
            }
        }
    }

    /// Resources `id` uses, sorted.
    pub fn dependencies_of(&self, id: ResourceId) -> Vec<ResourceId> {
        let mut out: Vec<_> = self
            .forward
            .get(&id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// Resources that use `id`, sorted.
    pub fn dependents_of(&self, id: ResourceId) -> Vec<ResourceId> {
        let mut out: Vec<_> = self
            .reverse
            .get(&id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.forward.values().map(HashSet::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_are_indexed_both_ways() {
        let mut g = DependencyGraph::new();
        let mat = ResourceId::Material(Handle::new(0, 0));
        let sh = ResourceId::Shader(Handle::new(0, 0));
        let tex = ResourceId::Texture(Handle::new(1, 0));
        assert!(g.add(mat, sh));
        assert!(g.add(mat, tex));
        assert!(!g.add(mat, mat));

        assert_eq!(g.dependencies_of(mat).len(), 2);
        assert_eq!(g.dependents_of(tex), vec![mat]);

        g.remove_node(tex);
        assert_eq!(g.dependencies_of(mat), vec![sh]);
        assert!(g.dependents_of(tex).is_empty());
        assert_eq!(g.edge_count(), 1);
    }
}
