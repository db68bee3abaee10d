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

//! Defines the engine-wide error taxonomy.
//!
//! Every failure surfaced by the render core carries an [`ErrorKind`], a [`Severity`]
//! and the [`SourceLocation`] of the call site that produced it. Domain crates keep
//! their own `thiserror` enums and convert into [`EngineError`] at API boundaries.

use std::fmt;
use std::panic::Location;

/// The category of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// `GL_INVALID_ENUM` reported by the driver.
    GlInvalidEnum,
    /// `GL_INVALID_VALUE` reported by the driver.
    GlInvalidValue,
    /// `GL_INVALID_OPERATION` reported by the driver.
    GlInvalidOperation,
    /// `GL_OUT_OF_MEMORY` reported by the driver.
    GlOutOfMemory,
    /// The GL context could not be created or made current.
    GlContextCreationFailed,
    /// A resource handle or name did not resolve.
    ResourceNotFound,
    /// A resource with the same identity already exists.
    ResourceAlreadyExists,
    /// A resource could not be loaded from its source.
    ResourceLoadFailed,
    /// Source data was decoded but is not in a supported format.
    ResourceInvalidFormat,
    /// Moving a resource to the GPU failed.
    ResourceUploadFailed,
    /// A GPU call was issued from a thread that does not own the context.
    WrongThread,
    /// A lock-ordering problem was detected.
    DeadlockDetected,
    /// A shader stage failed to compile.
    ShaderCompileFailed,
    /// A program failed to link.
    ShaderLinkFailed,
    /// A uniform name did not resolve to a location.
    ShaderUniformNotFound,
    /// Mesh buffers could not be created or filled.
    MeshUploadFailed,
    /// A file does not exist.
    FileNotFound,
    /// A file exists but could not be opened.
    FileOpenFailed,
    /// Reading an opened file failed.
    FileReadFailed,
    /// A subsystem could not be initialized.
    InitializationFailed,
    /// A caller-supplied argument was rejected.
    InvalidArgument,
    /// A required object was missing.
    NullPointer,
    /// An index or size was outside its valid range.
    OutOfRange,
    /// A CPU-side allocation failed or a memory cap was exceeded.
    OutOfMemory,
    /// The operation is not valid in the current state.
    InvalidState,
    /// A generic failure.
    OperationFailed,
    /// The feature is not available.
    NotImplemented,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ErrorKind; 27] = [
        ErrorKind::GlInvalidEnum,
        ErrorKind::GlInvalidValue,
        ErrorKind::GlInvalidOperation,
        ErrorKind::GlOutOfMemory,
        ErrorKind::GlContextCreationFailed,
        ErrorKind::ResourceNotFound,
        ErrorKind::ResourceAlreadyExists,
        ErrorKind::ResourceLoadFailed,
        ErrorKind::ResourceInvalidFormat,
        ErrorKind::ResourceUploadFailed,
        ErrorKind::WrongThread,
        ErrorKind::DeadlockDetected,
        ErrorKind::ShaderCompileFailed,
        ErrorKind::ShaderLinkFailed,
        ErrorKind::ShaderUniformNotFound,
        ErrorKind::MeshUploadFailed,
        ErrorKind::FileNotFound,
        ErrorKind::FileOpenFailed,
        ErrorKind::FileReadFailed,
        ErrorKind::InitializationFailed,
        ErrorKind::InvalidArgument,
        ErrorKind::NullPointer,
        ErrorKind::OutOfRange,
        ErrorKind::OutOfMemory,
        ErrorKind::InvalidState,
        ErrorKind::OperationFailed,
        ErrorKind::NotImplemented,
    ];

    /// The snake_case name used in log output.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::GlInvalidEnum => "gl_invalid_enum",
            ErrorKind::GlInvalidValue => "gl_invalid_value",
            ErrorKind::GlInvalidOperation => "gl_invalid_operation",
            ErrorKind::GlOutOfMemory => "gl_out_of_memory",
            ErrorKind::GlContextCreationFailed => "gl_context_creation_failed",
            ErrorKind::ResourceNotFound => "resource_not_found",
            ErrorKind::ResourceAlreadyExists => "resource_already_exists",
            ErrorKind::ResourceLoadFailed => "resource_load_failed",
            ErrorKind::ResourceInvalidFormat => "resource_invalid_format",
            ErrorKind::ResourceUploadFailed => "resource_upload_failed",
            ErrorKind::WrongThread => "wrong_thread",
            ErrorKind::DeadlockDetected => "deadlock_detected",
            ErrorKind::ShaderCompileFailed => "shader_compile_failed",
            ErrorKind::ShaderLinkFailed => "shader_link_failed",
            ErrorKind::ShaderUniformNotFound => "shader_uniform_not_found",
            ErrorKind::MeshUploadFailed => "mesh_upload_failed",
            ErrorKind::FileNotFound => "file_not_found",
            ErrorKind::FileOpenFailed => "file_open_failed",
            ErrorKind::FileReadFailed => "file_read_failed",
            ErrorKind::InitializationFailed => "initialization_failed",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::NullPointer => "null_pointer",
            ErrorKind::OutOfRange => "out_of_range",
            ErrorKind::OutOfMemory => "out_of_memory",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::OperationFailed => "operation_failed",
            ErrorKind::NotImplemented => "not_implemented",
        }
    }

    /// The severity attached to this kind unless a caller overrides it.
    pub fn default_severity(self) -> Severity {
        match self {
            ErrorKind::GlOutOfMemory
            | ErrorKind::GlContextCreationFailed
            | ErrorKind::DeadlockDetected
            | ErrorKind::OutOfMemory
            | ErrorKind::InitializationFailed => Severity::Critical,
            ErrorKind::ResourceNotFound
            | ErrorKind::ResourceAlreadyExists
            | ErrorKind::ShaderUniformNotFound
            | ErrorKind::FileNotFound => Severity::Warning,
            ErrorKind::NotImplemented => Severity::Info,
            _ => Severity::Error,
        }
    }

    /// Maps a raw `glGetError` code to a kind. Returns `None` for `GL_NO_ERROR`.
    pub fn from_gl_error(code: u32) -> Option<Self> {
        match code {
            0 => None,
            0x0500 => Some(ErrorKind::GlInvalidEnum),
            0x0501 => Some(ErrorKind::GlInvalidValue),
            0x0502 => Some(ErrorKind::GlInvalidOperation),
            0x0505 => Some(ErrorKind::GlOutOfMemory),
            _ => Some(ErrorKind::OperationFailed),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How serious a failure is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Informational; nothing is broken.
    Info,
    /// Degraded behavior; the engine continues.
    Warning,
    /// The operation failed.
    Error,
    /// The engine cannot continue safely.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// The file and line a failure was raised from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    /// Source file path.
    pub file: &'static str,
    /// Line number.
    pub line: u32,
}

impl SourceLocation {
    /// Captures the location of the caller.
    #[track_caller]
    pub fn caller() -> Self {
        let loc = Location::caller();
        Self {
            file: loc.file(),
            line: loc.line(),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// The error type shared by every engine API.
#[derive(Debug, Clone, thiserror::Error)]
#[error("[{severity}] {kind}: {message} (at {location})")]
pub struct EngineError {
    /// The failure category.
    pub kind: ErrorKind,
    /// The failure severity.
    pub severity: Severity,
    /// A human-readable description.
    pub message: String,
    /// Where the error was raised.
    pub location: SourceLocation,
}

impl EngineError {
    /// Creates an error with the kind's default severity, recording the caller's location.
    #[track_caller]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            location: SourceLocation::caller(),
        }
    }

    /// Overrides the severity.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Shorthand for [`ErrorKind::InvalidArgument`].
    #[track_caller]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// Shorthand for [`ErrorKind::ResourceNotFound`].
    #[track_caller]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceNotFound, message)
    }

    /// Shorthand for [`ErrorKind::InvalidState`].
    #[track_caller]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, message)
    }

    /// Logs the error at a level matching its severity.
    pub fn log(&self) {
        match self.severity {
            Severity::Info => log::info!("{self}"),
            Severity::Warning => log::warn!("{self}"),
            Severity::Error | Severity::Critical => log::error!("{self}"),
        }
    }
}

/// A `Result` carrying an [`EngineError`].
pub type EngineResult<T> = Result<T, EngineError>;

impl From<std::io::Error> for EngineError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::FileNotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::FileOpenFailed,
            _ => ErrorKind::FileReadFailed,
        };
        Self::new(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_has_unique_names() {
        let mut names: Vec<_> = ErrorKind::ALL.iter().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 27);
    }

    #[test]
    fn new_records_call_site() {
        let line = line!() + 1;
        let err = EngineError::new(ErrorKind::WrongThread, "bad thread");
        assert_eq!(err.location.line, line);
        assert!(err.location.file.ends_with("error.rs"));
        assert_eq!(err.severity, Severity::Error);
    }

    #[test]
    fn gl_error_codes_map_to_kinds() {
        assert_eq!(ErrorKind::from_gl_error(0), None);
        assert_eq!(
            ErrorKind::from_gl_error(0x0502),
            Some(ErrorKind::GlInvalidOperation)
        );
    }

    #[test]
    fn io_not_found_maps_to_file_not_found() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: EngineError = io.into();
        assert_eq!(err.kind, ErrorKind::FileNotFound);
        assert!(err.to_string().contains("file_not_found"));
    }
}
