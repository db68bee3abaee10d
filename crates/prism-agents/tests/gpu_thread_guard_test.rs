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

use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::Result;
use log::{Level, LevelFilter, Log, Metadata, Record};
use prism_agents::render_agent::{NullPresenter, Renderer};
use prism_core::renderer::GpuThreadGuard;
use prism_core::EngineConfig;
use prism_infra::HeadlessDevice;

/// Keeps every error-level record so the test can inspect it.
struct CaptureLogger {
    errors: Mutex<Vec<String>>,
}

impl Log for CaptureLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= Level::Error
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            self.errors.lock().unwrap().push(record.args().to_string());
        }
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger {
    errors: Mutex::new(Vec::new()),
};

#[test]
fn test_wrong_thread_call_is_logged_and_counted_in_non_strict_mode() -> Result<()> {
    // --- 1. ARRANGE ---
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(LevelFilter::Error))
        .map_err(|e| anyhow::anyhow!("logger already installed: {e}"))?;
    let device = Arc::new(HeadlessDevice::new());
    let config = EngineConfig {
        gpu_thread_strict_mode: false,
        ..EngineConfig::default()
    };
    let renderer = Renderer::with_config(
        config,
        device.clone(),
        Box::new(NullPresenter::default()),
        640,
        480,
    )?;
    let guard = Arc::clone(renderer.context().guard());
    let state = renderer.state_cache();
    let violations_before = guard.violation_count();
    let viewport_calls_before = device.call_count("viewport");

    // --- 2. ACT ---
    let offender = thread::scope(|s| {
        s.spawn(|| {
            state.set_viewport(0, 0, 32, 32);
            thread::current().id()
        })
        .join()
        .expect("offending thread finished")
    });

    // --- 3. ASSERT ---
    assert_eq!(guard.violation_count(), violations_before + 1);
    let errors = LOGGER.errors.lock().unwrap();
    let needle = format!("{offender:?}");
    assert!(
        errors.iter().any(|line| line.contains(&needle)),
        "no error mentions {needle}: {errors:?}"
    );
    // Non-strict: the call still went through and the process kept running.
    assert_eq!(device.call_count("viewport"), viewport_calls_before + 1);
    assert!(guard.is_gpu_thread());
    assert!(Arc::ptr_eq(&guard, &GpuThreadGuard::global()));
    Ok(())
}
