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

//! Per-frame rendering counters.

use std::fmt;

/// Counters returned by `flush_render_queue` and kept by the renderer for the last frame.
///
/// `draw_calls` always equals `batched_draw_calls + fallback_draw_calls`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameStats {
    /// Draw calls issued for the frame.
    pub draw_calls: u32,
    /// Batches executed (merged or instanced).
    pub batch_count: u32,
    /// Draw calls that rendered a batch.
    pub batched_draw_calls: u32,
    /// Draw calls that rendered a single item.
    pub fallback_draw_calls: u32,
    /// Triangles drawn through batches (counting every instance).
    pub batched_triangles: u64,
    /// Vertices drawn through batches (counting every instance).
    pub batched_vertices: u64,
    /// Instanced draw calls issued.
    pub instanced_draw_calls: u32,
    /// Instances drawn by instanced draw calls.
    pub instanced_instances: u64,
    /// Deepest the binning worker's queue got during the frame.
    pub worker_max_queue_depth: u32,
    /// Time the GPU thread spent waiting for the binning worker to go idle.
    pub worker_wait_time_ms: f64,
}

impl FrameStats {
    /// Records one batched draw.
    pub fn record_batched_draw(&mut self, triangles: u64, vertices: u64) {
        self.draw_calls += 1;
        self.batched_draw_calls += 1;
        self.batched_triangles += triangles;
        self.batched_vertices += vertices;
    }

    /// Records one instanced draw of `instances` copies.
    pub fn record_instanced_draw(&mut self, triangles: u64, vertices: u64, instances: u64) {
        self.record_batched_draw(triangles * instances, vertices * instances);
        self.instanced_draw_calls += 1;
        self.instanced_instances += instances;
    }

    /// Records one per-item draw.
    pub fn record_fallback_draw(&mut self) {
        self.draw_calls += 1;
        self.fallback_draw_calls += 1;
    }

    /// Checks the draw-call identity.
    pub fn is_consistent(&self) -> bool {
        self.draw_calls == self.batched_draw_calls + self.fallback_draw_calls
    }
}

impl fmt::Display for FrameStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "draws={} (batched={}, fallback={}) batches={} instanced={}x{} tris={} verts={} queue_max={} wait={:.3}ms",
            self.draw_calls,
            self.batched_draw_calls,
            self.fallback_draw_calls,
            self.batch_count,
            self.instanced_draw_calls,
            self.instanced_instances,
            self.batched_triangles,
            self.batched_vertices,
            self.worker_max_queue_depth,
            self.worker_wait_time_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorders_keep_draw_identity() {
        let mut s = FrameStats::default();
        s.record_batched_draw(12, 24);
        s.record_instanced_draw(2, 4, 100);
        s.record_fallback_draw();
        assert!(s.is_consistent());
        assert_eq!(s.draw_calls, 3);
        assert_eq!(s.instanced_instances, 100);
        assert_eq!(s.batched_triangles, 12 + 200);
    }
}
