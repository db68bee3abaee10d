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

//! Defines the Renderer, the per-frame entry point of the render core.

use prism_core::math::LinearRgba;
use prism_core::renderer::{ClearFlags, FrameStats, GpuContext, GpuDevice, GpuThreadGuard};
use prism_core::{BatchingMode, EngineConfig, EngineResult, Stopwatch};
use prism_data::ResourceManager;
use prism_lanes::render_lane::{
    BatchManager, GpuBufferPool, LodInstancedRenderer, LodRenderStats, MaterialStateCache,
    RenderContext, Renderable, StateCache,
};
use std::fmt;
use std::sync::Arc;

use super::presenter::Presenter;

/// Frames between two idle-resource sweeps.
const CLEANUP_INTERVAL_FRAMES: u64 = 60;

/// Default clear color, a dark grey.
const DEFAULT_CLEAR_COLOR: LinearRgba = LinearRgba::rgb(0.1, 0.1, 0.12);

/// Drives one frame at a time: state reset, clears, submission, batched execution and
/// presentation.
///
/// The renderer is created on the thread that owns the GPU context and registers that
/// thread with the GPU thread guard. Every method except [`Renderer::submit`] must be
/// called from it.
pub struct Renderer {
    config: EngineConfig,
    ctx: GpuContext,
    state: StateCache,
    resources: Arc<ResourceManager>,
    pool: GpuBufferPool,
    batches: BatchManager,
    lod: LodInstancedRenderer,
    presenter: Box<dyn Presenter>,
    clear_color: LinearRgba,
    width: u32,
    height: u32,
    // --- Frame bookkeeping ---
    frame: u64,
    in_frame: bool,
    frame_clock: Option<Stopwatch>,
    delta_time: f32,
    last_stats: FrameStats,
    last_lod_stats: LodRenderStats,
    owns_registration: bool,
}

impl fmt::Debug for Renderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Renderer")
            .field("frame", &self.frame)
            .field("size", &(self.width, self.height))
            .field("batching_mode", &self.batches.batching_mode())
            .field("last_stats", &self.last_stats)
            .finish_non_exhaustive()
    }
}

impl Renderer {
    /// Creates a renderer with the default configuration.
    pub fn new(
        device: Arc<dyn GpuDevice>,
        presenter: Box<dyn Presenter>,
        width: u32,
        height: u32,
    ) -> EngineResult<Self> {
        Self::with_config(EngineConfig::default(), device, presenter, width, height)
    }

    /// Creates a renderer on the process-wide GPU thread guard and registers the calling
    /// thread as its owner. Fails with [`ErrorKind::WrongThread`](prism_core::ErrorKind)
    /// while another thread owns it. Dropping the renderer releases the registration.
    pub fn with_config(
        config: EngineConfig,
        device: Arc<dyn GpuDevice>,
        presenter: Box<dyn Presenter>,
        width: u32,
        height: u32,
    ) -> EngineResult<Self> {
        let guard = GpuThreadGuard::global();
        let newly_registered = guard.owner().is_none();
        guard.register_current()?;
        let ctx = GpuContext::new(device, Arc::clone(&guard));
        match Self::with_context(config, ctx, presenter, width, height) {
            Ok(mut renderer) => {
                renderer.owns_registration = newly_registered;
                Ok(renderer)
            }
            Err(e) => {
                if newly_registered {
                    guard.unregister();
                }
                Err(e)
            }
        }
    }

    /// Creates a renderer on an existing context. The calling thread must already own
    /// the context.
    pub fn with_context(
        config: EngineConfig,
        ctx: GpuContext,
        presenter: Box<dyn Presenter>,
        width: u32,
        height: u32,
    ) -> EngineResult<Self> {
        ctx.guard().set_strict_mode(config.gpu_thread_strict_mode);
        let resources = Arc::new(ResourceManager::default());
        let pool = GpuBufferPool::new(ctx.clone(), Arc::clone(resources.memory()));
        pool.set_memory_cap(config.buffer_pool_memory_cap_bytes);

        let state = StateCache::new(ctx.clone());
        state.sync_from_gl();

        let caps = ctx.caps();
        log::info!(
            "Renderer ready: GL {}.{}, {width}x{height}, batching {:?}, persistent mapping {}, compute {}",
            caps.version_major,
            caps.version_minor,
            config.batching_mode,
            caps.persistent_mapping,
            caps.compute_shaders
        );

        let mut renderer = Self {
            batches: BatchManager::new(config.batching_mode),
            lod: LodInstancedRenderer::new(config.lod_max_instances_per_frame as usize),
            config,
            ctx,
            state,
            resources,
            pool,
            presenter,
            clear_color: DEFAULT_CLEAR_COLOR,
            width,
            height,
            frame: 0,
            in_frame: false,
            frame_clock: None,
            delta_time: 0.0,
            last_stats: FrameStats::default(),
            last_lod_stats: LodRenderStats::default(),
            owns_registration: false,
        };
        renderer.apply_viewport();
        renderer.state.set_clear_color(renderer.clear_color);
        Ok(renderer)
    }

    // --- Frame loop ---

    /// Starts a frame: advances the frame counter and timing, and resets per-frame caches.
    pub fn begin_frame(&mut self) {
        if self.in_frame {
            log::warn!("begin_frame called twice without end_frame (frame {})", self.frame);
        }
        self.in_frame = true;
        self.frame += 1;
        self.delta_time = match self.frame_clock.as_mut() {
            Some(clock) => (clock.lap_ms() / 1000.0) as f32,
            None => {
                self.frame_clock = Some(Stopwatch::new());
                0.0
            }
        };

        MaterialStateCache::reset();
        self.resources.begin_frame(self.frame);
        // Transients from the last frame go back to the free list.
        self.pool.reset();
        self.pool.begin_frame(self.frame);
    }

    /// Clears the planes that have a value. `None` leaves a plane untouched.
    pub fn clear(&self, color: Option<LinearRgba>, depth: Option<f32>, stencil: Option<i32>) {
        let flags = ClearFlags {
            color: color.is_some(),
            depth: depth.is_some(),
            stencil: stencil.is_some(),
        };
        if flags.is_empty() {
            return;
        }
        if let Some(color) = color {
            self.state.set_clear_color(color);
        }
        // The clear depth and stencil values are not mirrored by the state cache.
        if let Some(depth) = depth {
            self.state.set_depth_mask(true);
            self.ctx.gl("Renderer::clear").clear_depth(depth);
        }
        if let Some(stencil) = stencil {
            self.ctx.gl("Renderer::clear").clear_stencil(stencil);
        }
        self.state.clear(flags);
    }

    /// Clears color with the configured clear color and depth to 1.
    pub fn clear_frame(&self) {
        self.clear(Some(self.clear_color), Some(1.0), None);
    }

    /// Queues a renderable for this frame. May be called from any thread that can reach
    /// the renderer.
    pub fn submit(&self, renderable: Arc<dyn Renderable>) {
        self.batches.submit(renderable);
    }

    /// Draws everything submitted since the previous flush, then the LOD instances.
    ///
    /// Returns the batch statistics; the LOD renderer's are available through
    /// [`Renderer::last_lod_stats`].
    pub fn flush_render_queue(&mut self) -> FrameStats {
        if !self.in_frame {
            log::warn!("flush_render_queue called outside begin_frame/end_frame");
        }
        let ctx = RenderContext {
            state: &self.state,
            resources: &self.resources,
            pool: &self.pool,
        };
        let stats = self.batches.flush(&ctx);
        self.last_lod_stats = self.lod.render_all(&ctx);

        self.state.check_gl_error("Renderer::flush_render_queue");
        log::debug!("Frame {}: {stats}", self.frame);
        self.last_stats = stats;
        stats
    }

    /// Ends the frame: processes queued hot reloads and periodically evicts idle
    /// resources and pooled buffers.
    pub fn end_frame(&mut self) {
        if !self.in_frame {
            log::warn!("end_frame called without begin_frame");
        }
        self.in_frame = false;

        let reloaded = self.resources.process_reload_queue(&self.ctx);
        if reloaded > 0 {
            MaterialStateCache::invalidate();
            log::debug!("Applied {reloaded} hot reload(s)");
        }
        if self.frame % CLEANUP_INTERVAL_FRAMES == 0 {
            self.pool
                .cleanup_unused(self.config.buffer_pool_unused_frame_threshold);
            self.resources
                .cleanup_unused(&self.ctx, self.config.resource_unused_frame_threshold);
        }
    }

    /// Hands the frame to the presenter.
    pub fn present(&mut self) -> EngineResult<()> {
        self.presenter.present()
    }

    // --- Settings ---

    /// Switches the batch strategy for subsequent submissions.
    pub fn set_batching_mode(&mut self, mode: BatchingMode) {
        self.config.batching_mode = mode;
        self.batches.set_batching_mode(mode);
    }

    /// The active batch strategy.
    pub fn batching_mode(&self) -> BatchingMode {
        self.batches.batching_mode()
    }

    /// Sets the color used by [`Renderer::clear_frame`].
    pub fn set_clear_color(&mut self, color: LinearRgba) {
        self.clear_color = color;
        self.state.set_clear_color(color);
    }

    /// The color used by [`Renderer::clear_frame`].
    pub fn clear_color(&self) -> LinearRgba {
        self.clear_color
    }

    /// Resizes the viewport and notifies the presenter.
    pub fn resize(&mut self, width: u32, height: u32) {
        if (width, height) == (self.width, self.height) {
            return;
        }
        log::info!("Renderer resized {}x{} -> {width}x{height}", self.width, self.height);
        self.width = width;
        self.height = height;
        self.apply_viewport();
        self.presenter.resize(width, height);
    }

    fn apply_viewport(&self) {
        let w = i32::try_from(self.width).unwrap_or(i32::MAX);
        let h = i32::try_from(self.height).unwrap_or(i32::MAX);
        self.state.set_viewport(0, 0, w, h);
    }

    // --- Accessors ---

    /// The configuration the renderer was built with, including later setting changes.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The GPU context.
    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    /// The GL state mirror.
    pub fn state_cache(&self) -> &StateCache {
        &self.state
    }

    /// The resource manager. Shared so that loaders can register into it.
    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    /// The transient buffer pool.
    pub fn buffer_pool(&self) -> &GpuBufferPool {
        &self.pool
    }

    /// The batch manager.
    pub fn batch_manager(&self) -> &BatchManager {
        &self.batches
    }

    /// The LOD instanced renderer. Instances may be added through a shared reference.
    pub fn lod_renderer(&self) -> &LodInstancedRenderer {
        &self.lod
    }

    /// Mutable access for LOD renderer settings.
    pub fn lod_renderer_mut(&mut self) -> &mut LodInstancedRenderer {
        &mut self.lod
    }

    /// Seconds between the last two `begin_frame` calls; zero on the first frame.
    pub fn delta_time(&self) -> f32 {
        self.delta_time
    }

    /// Viewport width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Viewport height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Frames begun so far.
    pub fn frame_index(&self) -> u64 {
        self.frame
    }

    /// Statistics of the most recent flush.
    pub fn last_frame_stats(&self) -> FrameStats {
        self.last_stats
    }

    /// LOD renderer statistics of the most recent flush.
    pub fn last_lod_stats(&self) -> &LodRenderStats {
        &self.last_lod_stats
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if self.ctx.is_gpu_thread() {
            self.lod.release_gpu(&self.ctx, self.resources.memory());
            self.pool.clear();
        } else {
            log::warn!("Renderer dropped off the GPU thread; GPU objects are leaked");
        }
        if self.owns_registration && self.ctx.is_gpu_thread() {
            self.ctx.guard().unregister();
        }
    }
}
