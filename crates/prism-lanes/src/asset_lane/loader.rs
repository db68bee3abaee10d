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

use prism_core::{EngineError, ErrorKind};
use std::path::{Path, PathBuf};

/// A failure while reading or decoding an asset file.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The file does not exist.
    #[error("file not found: '{0}'")]
    NotFound(PathBuf),
    /// The file exists but could not be read.
    #[error("failed to read '{path}': {source}")]
    Io {
        /// The file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The contents are not a valid file of the expected format.
    #[error("failed to decode '{path}': {reason}")]
    Decode {
        /// The file path.
        path: PathBuf,
        /// What the decoder rejected.
        reason: String,
    },
    /// The file parsed but holds nothing usable.
    #[error("'{0}' contains no geometry")]
    Empty(PathBuf),
}

impl LoadError {
    /// Classifies an I/O error raised while reading `path`.
    pub fn from_io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            LoadError::NotFound(path.to_path_buf())
        } else {
            LoadError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    /// Shorthand for a [`LoadError::Decode`].
    pub fn decode(path: &Path, reason: impl ToString) -> Self {
        LoadError::Decode {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// The error kind this failure maps to in the engine taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoadError::NotFound(_) => ErrorKind::FileNotFound,
            LoadError::Io { .. } => ErrorKind::FileReadFailed,
            LoadError::Decode { .. } => ErrorKind::ResourceInvalidFormat,
            LoadError::Empty(_) => ErrorKind::ResourceLoadFailed,
        }
    }
}

impl From<LoadError> for EngineError {
    #[track_caller]
    fn from(err: LoadError) -> Self {
        EngineError::new(err.kind(), err.to_string())
    }
}

/// A lane that decodes one kind of asset from a file.
///
/// This is the CPU half of a load: implementors parse and decode, and must not issue
/// any GPU call, so `load` is safe to run on a worker thread.
pub trait AssetLoaderLane<A>: Send + Sync {
    /// Reads and decodes `path`.
    fn load(&self, path: &Path) -> Result<A, LoadError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_becomes_file_not_found() {
        let err = LoadError::from_io(
            Path::new("missing.png"),
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, LoadError::NotFound(_)));
        let engine: EngineError = err.into();
        assert_eq!(engine.kind, ErrorKind::FileNotFound);
    }

    #[test]
    fn decode_error_maps_to_invalid_format() {
        let err = LoadError::decode(Path::new("a.obj"), "bad face");
        assert_eq!(err.kind(), ErrorKind::ResourceInvalidFormat);
        assert!(err.to_string().contains("bad face"));
    }
}
