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

//! # Prism Core
//!
//! Foundational crate containing the math primitives, the error taxonomy, generational
//! handles, engine configuration and the GPU device contract every other Prism crate
//! is written against.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod handle;
pub mod math;
pub mod memory;
pub mod renderer;
pub mod utils;

pub use config::{BatchingMode, EngineConfig};
pub use error::{EngineError, EngineResult, ErrorKind, Severity};
pub use handle::Handle;
pub use utils::timer::Stopwatch;
