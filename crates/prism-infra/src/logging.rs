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

//! Logging bootstrap for binaries and integration tests.

use anyhow::{Context, Result};
use env_logger::{Builder, Env};

/// Installs `env_logger` as the global logger.
///
/// `RUST_LOG` takes precedence over `default_filter`. Installing a second time is a
/// no-op, so tests may call this freely.
pub fn init_logging(default_filter: &str) -> Result<()> {
    match Builder::from_env(Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .try_init()
    {
        Ok(()) => Ok(()),
        Err(_) if log::max_level() != log::LevelFilter::Off => Ok(()),
        Err(e) => Err(e).context("failed to install the global logger"),
    }
}

/// Test helper: installs a logger that writes through the test harness capture.
pub fn init_test_logging() {
    let _ = Builder::from_env(Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_harmless() {
        init_test_logging();
        assert!(init_logging("info").is_ok());
        assert!(init_logging("warn").is_ok());
    }
}
