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

//! # Prism Agents
//!
//! The orchestrators of the render core. Agents own the long-lived loops and decide
//! *when* work happens; the lanes they drive decide *how*.
//!
//! - [`scheduler_agent`]: the priority task scheduler.
//! - [`asset_agent`]: the asynchronous resource loader.
//! - [`render_agent`]: the renderer façade and the presenter boundary.

#![warn(missing_docs)]

pub mod asset_agent;
pub mod render_agent;
pub mod scheduler_agent;

pub use asset_agent::{AsyncLoader, LoadStatus, LoadTask, RetryPolicy};
pub use render_agent::{NullPresenter, Presenter, Renderer};
pub use scheduler_agent::{TaskHandle, TaskPriority, TaskScheduler};
