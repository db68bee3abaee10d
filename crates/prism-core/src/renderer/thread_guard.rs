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

//! Tracks which thread owns the GL context.
//!
//! Exactly one thread may issue GPU commands. It claims ownership with
//! [`GpuThreadGuard::register`]; every GPU call site then runs
//! [`GpuThreadGuard::validate`], which logs a violation (and, in strict mode, aborts the
//! process) when called from any other thread.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

use crate::error::{EngineError, EngineResult, ErrorKind};

/// Ownership record for the GPU context.
#[derive(Debug, Default)]
pub struct GpuThreadGuard {
    owner: RwLock<Option<ThreadId>>,
    strict: AtomicBool,
    violations: AtomicU64,
}

static GLOBAL_GUARD: OnceLock<Arc<GpuThreadGuard>> = OnceLock::new();

impl GpuThreadGuard {
    /// Creates a guard with no owner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a guard with the given strict-mode setting.
    pub fn with_strict_mode(strict: bool) -> Self {
        let guard = Self::new();
        guard.set_strict_mode(strict);
        guard
    }

    /// The process-wide guard.
    pub fn global() -> Arc<GpuThreadGuard> {
        Arc::clone(GLOBAL_GUARD.get_or_init(|| Arc::new(GpuThreadGuard::new())))
    }

    /// Claims the GPU context for `thread_id`.
    ///
    /// Registering the current owner again is a no-op. Registering while another thread
    /// owns the context fails with [`ErrorKind::WrongThread`].
    pub fn register(&self, thread_id: ThreadId) -> EngineResult<()> {
        let mut owner = self.owner.write();
        match *owner {
            Some(current) if current == thread_id => Ok(()),
            Some(current) => {
                log::error!(
                    "GPU thread registration from {thread_id:?} rejected: context is owned by {current:?}"
                );
                Err(EngineError::new(
                    ErrorKind::WrongThread,
                    format!("GPU context already owned by {current:?}"),
                ))
            }
            None => {
                *owner = Some(thread_id);
                log::info!("GPU context owner registered: {thread_id:?}");
                Ok(())
            }
        }
    }

    /// Claims the GPU context for the calling thread.
    pub fn register_current(&self) -> EngineResult<()> {
        self.register(thread::current().id())
    }

    /// Releases ownership. Returns `false` if no thread was registered.
    pub fn unregister(&self) -> bool {
        let previous = self.owner.write().take();
        if let Some(id) = previous {
            log::info!("GPU context owner unregistered: {id:?}");
        }
        previous.is_some()
    }

    /// The registered owner, if any.
    pub fn owner(&self) -> Option<ThreadId> {
        *self.owner.read()
    }

    /// Returns `true` if the calling thread owns the GPU context.
    pub fn is_gpu_thread(&self) -> bool {
        *self.owner.read() == Some(thread::current().id())
    }

    /// Enables or disables process termination on violation.
    pub fn set_strict_mode(&self, strict: bool) {
        self.strict.store(strict, Ordering::Relaxed);
    }

    /// Returns `true` if violations abort the process.
    pub fn is_strict_mode(&self) -> bool {
        self.strict.load(Ordering::Relaxed)
    }

    /// Number of violations recorded so far.
    pub fn violation_count(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }

    /// Checks that the calling thread owns the GPU context.
    ///
    /// On violation, logs the offending thread, the owner and the call site, bumps the
    /// violation counter and returns `false`. In strict mode the process is aborted.
    pub fn validate(&self, file: &str, line: u32, function: &str) -> bool {
        let current = thread::current();
        let owner = *self.owner.read();
        if owner == Some(current.id()) {
            return true;
        }

        self.violations.fetch_add(1, Ordering::Relaxed);
        log::error!(
            "GPU call from wrong thread: kind={} thread={:?} ({}) owner={:?} at {}:{} ({})",
            ErrorKind::WrongThread,
            current.id(),
            current.name().unwrap_or("<unnamed>"),
            owner,
            file,
            line,
            function
        );

        if self.is_strict_mode() {
            log::error!("GPU thread guard is in strict mode; aborting");
            std::process::abort();
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent_and_exclusive() {
        let guard = Arc::new(GpuThreadGuard::new());
        guard.register_current().unwrap();
        guard.register_current().unwrap();
        assert!(guard.is_gpu_thread());

        let g = Arc::clone(&guard);
        let rejected = thread::spawn(move || g.register_current().is_err())
            .join()
            .unwrap();
        assert!(rejected);
        assert!(guard.is_gpu_thread());
    }

    #[test]
    fn validate_passes_only_on_owner() {
        let guard = Arc::new(GpuThreadGuard::new());
        assert!(!guard.validate(file!(), line!(), "before_register"));
        guard.register_current().unwrap();
        assert!(guard.validate(file!(), line!(), "owner"));

        let g = Arc::clone(&guard);
        let other = thread::spawn(move || g.validate(file!(), line!(), "worker"))
            .join()
            .unwrap();
        assert!(!other);
        assert_eq!(guard.violation_count(), 2);

        assert!(guard.unregister());
        assert!(!guard.is_gpu_thread());
        assert!(!guard.unregister());
    }

    #[test]
    fn global_guard_is_shared() {
        assert!(Arc::ptr_eq(&GpuThreadGuard::global(), &GpuThreadGuard::global()));
    }
}
