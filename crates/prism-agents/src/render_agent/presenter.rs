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

//! The boundary between the renderer and whatever owns the window surface.

use prism_core::EngineResult;

/// Shows finished frames. Implemented by the windowing layer (buffer swap) or by
/// off-screen targets.
pub trait Presenter: Send {
    /// Makes the frame just rendered visible.
    fn present(&mut self) -> EngineResult<()>;

    /// Called after the renderer's viewport changed size.
    fn resize(&mut self, _width: u32, _height: u32) {}
}

/// A presenter that only counts frames. Used for headless rendering.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPresenter {
    presented: u64,
}

impl NullPresenter {
    /// Frames presented so far.
    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl Presenter for NullPresenter {
    fn present(&mut self) -> EngineResult<()> {
        self.presented += 1;
        Ok(())
    }
}
