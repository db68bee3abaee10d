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
use std::thread;

use anyhow::Result;
use prism_agents::render_agent::{NullPresenter, Renderer};
use prism_core::renderer::GpuThreadGuard;
use prism_core::ErrorKind;
use prism_infra::HeadlessDevice;

fn null_renderer() -> prism_core::EngineResult<Renderer> {
    Renderer::new(
        Arc::new(HeadlessDevice::new()),
        Box::new(NullPresenter::default()),
        320,
        240,
    )
}

#[test]
fn test_renderers_share_the_process_wide_guard() -> Result<()> {
    // --- 1. ARRANGE ---
    let global = GpuThreadGuard::global();
    assert_eq!(global.owner(), None);

    // --- 2. ACT ---
    let renderer = null_renderer()?;
    let rival = thread::spawn(|| null_renderer().err().map(|e| e.kind))
        .join()
        .map_err(|_| anyhow::anyhow!("rival thread panicked"))?;
    let owner_while_alive = global.owner();
    drop(renderer);

    // --- 3. ASSERT ---
    assert_eq!(owner_while_alive, Some(thread::current().id()));
    assert_eq!(rival, Some(ErrorKind::WrongThread));
    assert_eq!(global.owner(), None, "dropping the renderer releases the guard");

    let rival_after_drop = thread::spawn(|| null_renderer().map(|r| r.context().is_gpu_thread()))
        .join()
        .map_err(|_| anyhow::anyhow!("second thread panicked"))??;
    assert!(rival_after_drop);
    Ok(())
}
