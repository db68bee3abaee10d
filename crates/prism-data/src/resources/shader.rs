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

//! Linked GPU programs with cached attribute and uniform locations.

use parking_lot::Mutex;
use prism_core::renderer::{
    GpuContext, ProgramId, ShaderStage, ShaderStageSource, UniformLocation, UniformValue,
};
use prism_core::{EngineError, EngineResult, ErrorKind};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Where each stage of a program was loaded from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderSourcePaths {
    /// Vertex stage file.
    pub vertex: Option<PathBuf>,
    /// Fragment stage file.
    pub fragment: Option<PathBuf>,
    /// Compute stage file.
    pub compute: Option<PathBuf>,
}

impl ShaderSourcePaths {
    /// Every recorded path.
    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        [&self.vertex, &self.fragment, &self.compute]
            .into_iter()
            .filter_map(|p| p.as_deref())
    }

    /// Returns `true` when at least one stage came from a file.
    pub fn is_file_backed(&self) -> bool {
        self.iter().next().is_some()
    }

    /// Reads every recorded stage from disk.
    pub fn read_sources(&self) -> EngineResult<Vec<ShaderStageSource>> {
        let mut stages = Vec::new();
        let entries = [
            (ShaderStage::Vertex, &self.vertex),
            (ShaderStage::Fragment, &self.fragment),
            (ShaderStage::Compute, &self.compute),
        ];
        for (stage, path) in entries {
            if let Some(path) = path {
                let source = std::fs::read_to_string(path).map_err(|e| {
                    let mut err = EngineError::from(e);
                    err.message = format!("{}: {}", path.display(), err.message);
                    err
                })?;
                stages.push(ShaderStageSource::new(stage, source));
            }
        }
        if stages.is_empty() {
            return Err(EngineError::invalid_argument("shader has no source files"));
        }
        Ok(stages)
    }
}

/// A linked program.
#[derive(Debug)]
pub struct Shader {
    program: ProgramId,
    paths: ShaderSourcePaths,
    uniforms: Mutex<HashMap<String, Option<UniformLocation>>>,
    attributes: Mutex<HashMap<String, Option<u32>>>,
}

impl Shader {
    /// Compiles and links `stages`. Must run on the GPU thread.
    pub fn from_sources(ctx: &GpuContext, stages: &[ShaderStageSource]) -> EngineResult<Self> {
        let program = ctx.gl("Shader::from_sources").create_program(stages)?;
        log::debug!("Linked program {program:?} from {} stage(s)", stages.len());
        Ok(Self::from_program(program, ShaderSourcePaths::default()))
    }

    /// Reads the stage files, then compiles and links them.
    pub fn from_files(ctx: &GpuContext, paths: ShaderSourcePaths) -> EngineResult<Self> {
        let stages = paths.read_sources()?;
        let mut shader = Self::from_sources(ctx, &stages)?;
        shader.paths = paths;
        Ok(shader)
    }

    /// Wraps an existing program.
    pub fn from_program(program: ProgramId, paths: ShaderSourcePaths) -> Self {
        Self {
            program,
            paths,
            uniforms: Mutex::new(HashMap::new()),
            attributes: Mutex::new(HashMap::new()),
        }
    }

    /// The GL program name.
    #[inline]
    pub fn program(&self) -> ProgramId {
        self.program
    }

    /// The files the stages were read from.
    pub fn source_paths(&self) -> &ShaderSourcePaths {
        &self.paths
    }

    /// Looks up (and caches) a uniform location. Misses are cached too.
    pub fn uniform_location(&self, ctx: &GpuContext, name: &str) -> Option<UniformLocation> {
        if let Some(cached) = self.uniforms.lock().get(name) {
            return *cached;
        }
        let location = ctx
            .gl("Shader::uniform_location")
            .get_uniform_location(self.program, name);
        if location.is_none() {
            log::trace!(
                "{}: uniform '{name}' not found in {:?}",
                ErrorKind::ShaderUniformNotFound,
                self.program
            );
        }
        self.uniforms.lock().insert(name.to_owned(), location);
        location
    }

    /// Looks up (and caches) a vertex attribute location.
    pub fn attribute_location(&self, ctx: &GpuContext, name: &str) -> Option<u32> {
        if let Some(cached) = self.attributes.lock().get(name) {
            return *cached;
        }
        let location = ctx
            .gl("Shader::attribute_location")
            .get_attrib_location(self.program, name);
        self.attributes.lock().insert(name.to_owned(), location);
        location
    }

    /// Uploads a uniform on the program currently in use. Returns `false` when the
    /// uniform does not exist.
    pub fn set_uniform(&self, ctx: &GpuContext, name: &str, value: &UniformValue) -> bool {
        match self.uniform_location(ctx, name) {
            Some(location) => {
                ctx.gl("Shader::set_uniform").set_uniform(location, value);
                true
            }
            None => false,
        }
    }

    /// Drops every cached location (after a relink).
    pub fn clear_location_cache(&self) {
        self.uniforms.lock().clear();
        self.attributes.lock().clear();
    }

    /// Deletes the program. Must run on the GPU thread.
    pub fn release_gpu(&self, ctx: &GpuContext) {
        ctx.gl("Shader::release_gpu").delete_program(self.program);
    }
}
