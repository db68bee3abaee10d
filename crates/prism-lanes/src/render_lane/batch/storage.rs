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

//! Recorded frame contents: batches plus the ordered command stream.

use prism_core::renderer::FrameStats;
use prism_core::{BatchingMode, Handle};
use prism_data::Mesh;
use std::collections::HashMap;
use std::sync::Arc;

use super::batch::Batch;
use super::key::BatchKey;
use super::renderable::{BatchRoute, BatchableItem, RenderContext, Renderable};

/// Frames a batch may stay empty before its GPU resources are released.
pub const DEFAULT_MAX_IDLE_FRAMES: u32 = 8;

/// One entry of the command stream.
#[derive(Clone)]
pub enum RenderCommand {
    /// Draw this renderable on its own.
    Immediate(Arc<dyn Renderable>),
    /// Draw the batch at this index.
    Batch(usize),
}

impl std::fmt::Debug for RenderCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Immediate(r) => write!(f, "Immediate({:?}, layer {})", r.kind(), r.layer()),
            Self::Batch(index) => write!(f, "Batch({index})"),
        }
    }
}

/// Batches and commands for one frame.
///
/// The batch manager owns two of these: the worker records into one while the GPU
/// thread executes the other.
#[derive(Debug, Default)]
pub struct BatchStorage {
    batches: Vec<Batch>,
    lookup: HashMap<BatchKey, usize>,
    commands: Vec<RenderCommand>,
}

impl BatchStorage {
    /// An empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// The batches, including ones idle this frame.
    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    /// The command stream in submission order.
    pub fn commands(&self) -> &[RenderCommand] {
        &self.commands
    }

    /// Number of batches that received items this frame.
    pub fn active_batch_count(&self) -> usize {
        self.batches.iter().filter(|b| !b.entries().is_empty()).count()
    }

    /// Records one classified item. A batch gets a single command, emitted when its first
    /// item of the frame arrives.
    pub fn record(&mut self, item: BatchableItem, mode: BatchingMode) {
        let route = item.route(mode);
        let (Some(mesh), Some(material)) = (item.mesh, item.renderable.material().cloned()) else {
            self.commands.push(RenderCommand::Immediate(item.renderable));
            return;
        };
        let key = match route {
            BatchRoute::Immediate => {
                self.commands.push(RenderCommand::Immediate(item.renderable));
                return;
            }
            BatchRoute::Merge => BatchKey {
                pipeline: item.key,
                mesh: None,
            },
            BatchRoute::Instance => BatchKey {
                pipeline: item.key,
                mesh: Some(mesh),
            },
        };

        let index = match self.lookup.get(&key) {
            Some(&index) => index,
            None => {
                let index = self.batches.len();
                self.batches
                    .push(Batch::new(key, material, route == BatchRoute::Instance));
                self.lookup.insert(key, index);
                index
            }
        };
        let batch = &mut self.batches[index];
        if batch.entries().is_empty() {
            self.commands.push(RenderCommand::Batch(index));
        }
        batch.push(&item, mesh);
    }

    /// Pushes an immediate command without classification.
    pub fn record_immediate(&mut self, renderable: Arc<dyn Renderable>) {
        self.commands.push(RenderCommand::Immediate(renderable));
    }

    /// Prepares the storage for a new frame: clears commands and items, and drops batches
    /// idle for more than `max_idle_frames` recordings. Returns the merged meshes of the
    /// dropped batches, which the caller frees on the GPU thread.
    pub fn reset_for_recording(&mut self, max_idle_frames: u32) -> Vec<Handle<Mesh>> {
        self.commands.clear();
        for batch in &mut self.batches {
            batch.recycle();
        }

        let mut released = Vec::new();
        let before = self.batches.len();
        self.batches.retain(|batch| {
            let keep = batch.idle_frames() <= max_idle_frames;
            if !keep {
                released.extend(batch.merged_mesh());
            }
            keep
        });
        if self.batches.len() != before {
            self.lookup = self
                .batches
                .iter()
                .enumerate()
                .map(|(i, b)| (*b.key(), i))
                .collect();
            log::debug!("Pruned {} idle batch(es)", before - self.batches.len());
        }
        released
    }

    /// Executes the command stream and returns the frame's draw statistics.
    ///
    /// Commands run grouped by layer. Within a layer they keep the recorded order: immediate
    /// draws in submission order, each batch where its first item was submitted.
    pub fn execute(&mut self, ctx: &RenderContext<'_>) -> FrameStats {
        let mut order: Vec<usize> = (0..self.commands.len()).collect();
        let batches = &self.batches;
        let commands = &self.commands;
        order.sort_by_key(|&i| command_layer(batches, &commands[i]));

        let mut stats = FrameStats::default();
        for i in order {
            match &self.commands[i] {
                RenderCommand::Immediate(renderable) => {
                    if renderable.render(ctx) {
                        stats.record_fallback_draw();
                    }
                }
                RenderCommand::Batch(index) => {
                    if let Some(batch) = self.batches.get_mut(*index) {
                        batch.execute(ctx, &mut stats);
                    }
                }
            }
        }
        stats
    }
}

fn command_layer(batches: &[Batch], command: &RenderCommand) -> u32 {
    match command {
        RenderCommand::Immediate(r) => r.layer(),
        RenderCommand::Batch(i) => batches.get(*i).map_or(0, |b| b.key().pipeline.layer_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_lane::batch::MeshRenderable;
    use prism_core::math::{Mat4, Vec3};
    use prism_data::{Material, PipelineState};

    fn submit(storage: &mut BatchStorage, material: &Arc<Material>, layer: u32, mode: BatchingMode) {
        let r: Arc<dyn Renderable> = Arc::new(
            MeshRenderable::new(
                Handle::new(1, 0),
                material.clone(),
                Mat4::from_translation(Vec3::new(layer as f32, 0.0, 0.0)),
            )
            .with_layer(layer),
        );
        storage.record(BatchableItem::classify(r).unwrap(), mode);
    }

    #[test]
    fn same_key_records_one_batch_command() {
        let material = Arc::new(Material::new(Handle::new(1, 0)));
        let mut storage = BatchStorage::new();
        for _ in 0..5 {
            submit(&mut storage, &material, 0, BatchingMode::CpuMerge);
        }
        assert_eq!(storage.commands().len(), 1);
        assert_eq!(storage.batches().len(), 1);
        assert_eq!(storage.batches()[0].entries().len(), 5);
    }

    #[test]
    fn layers_split_batches() {
        let material = Arc::new(Material::new(Handle::new(1, 0)));
        let mut storage = BatchStorage::new();
        submit(&mut storage, &material, 1, BatchingMode::CpuMerge);
        submit(&mut storage, &material, 2, BatchingMode::CpuMerge);
        assert_eq!(storage.active_batch_count(), 2);
    }

    #[test]
    fn transparent_items_stay_in_command_order() {
        let opaque = Arc::new(Material::new(Handle::new(1, 0)));
        let glass = Arc::new(Material::new(Handle::new(1, 0)).with_pipeline(PipelineState::transparent()));
        let mut storage = BatchStorage::new();
        submit(&mut storage, &glass, 0, BatchingMode::CpuMerge);
        submit(&mut storage, &opaque, 0, BatchingMode::CpuMerge);
        submit(&mut storage, &glass, 0, BatchingMode::CpuMerge);
        let kinds: Vec<bool> = storage
            .commands()
            .iter()
            .map(|c| matches!(c, RenderCommand::Immediate(_)))
            .collect();
        assert_eq!(kinds, vec![true, false, true]);
    }

    #[test]
    fn idle_batches_are_pruned() {
        let material = Arc::new(Material::new(Handle::new(1, 0)));
        let mut storage = BatchStorage::new();
        submit(&mut storage, &material, 0, BatchingMode::GpuInstancing);
        assert!(storage.batches()[0].is_instanced());

        assert!(storage.reset_for_recording(1).is_empty());
        assert_eq!(storage.batches().len(), 1);
        storage.reset_for_recording(1);
        assert_eq!(storage.batches().len(), 1);
        storage.reset_for_recording(1);
        assert!(storage.batches().is_empty());
        assert!(storage.commands().is_empty());
    }
}
