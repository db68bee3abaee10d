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

//! A monotonic stopwatch used for per-phase frame timings.

use std::time::{Duration, Instant};

/// Measures wall time since construction or the last [`Stopwatch::restart`].
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    start: Instant,
}

impl Stopwatch {
    /// Starts a new stopwatch.
    #[inline]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Time since the stopwatch started.
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Elapsed time in fractional milliseconds.
    #[inline]
    pub fn elapsed_ms_f64(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the elapsed time in fractional milliseconds and starts over.
    #[inline]
    pub fn lap_ms(&mut self) -> f64 {
        let ms = self.elapsed_ms_f64();
        self.start = Instant::now();
        ms
    }

    /// Starts over.
    #[inline]
    pub fn restart(&mut self) {
        self.start = Instant::now();
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn lap_restarts_the_clock() {
        let mut watch = Stopwatch::new();
        thread::sleep(Duration::from_millis(5));
        let first = watch.lap_ms();
        assert!(first >= 5.0);
        assert!(watch.elapsed_ms_f64() < first);
    }
}
