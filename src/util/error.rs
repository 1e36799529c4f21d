//! Error types for graph compilation and rendering.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Structural or semantic problem found while compiling a scene graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileErrorKind {
    /// Render root without a camera node
    #[error("Project must contain a Camera!")]
    MissingCamera,

    /// No render node in the graph
    #[error("Project must contain a Render node")]
    MissingRender,

    /// More than one render node
    #[error("Only one Render node is allowed")]
    DuplicateRender,

    /// More than one environment node
    #[error("Only one Environment node is allowed")]
    DuplicateEnvironment,

    /// Node requires a `Name` option
    #[error("{0} needs a 'Name' parameter")]
    MissingName(String),

    /// Material reference that names no material node
    #[error("Unknown material '{0}'")]
    UnresolvedMaterial(String),

    /// Sphere light without an emissive material
    #[error("Sphere light needs a 'Material' parameter")]
    MissingLightMaterial,

    /// Option value that does not parse or has the wrong shape
    #[error("Malformed option '{option}': {reason}")]
    MalformedOption { option: String, reason: String },

    /// Identifier not bound in the current scope
    #[error("Unknown variable '{0}'")]
    UnknownVariable(String),

    /// Call to a function the evaluator does not provide
    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    /// Operand or assignment types do not agree
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },
}

/// Compile diagnostic with the source line it refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub line: usize,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind, line: usize) -> Self {
        Self { kind, line }
    }

    /// Human readable message without the line prefix.
    pub fn message(&self) -> String {
        self.kind.to_string()
    }

    pub fn malformed(option: impl Into<String>, reason: impl Into<String>, line: usize) -> Self {
        Self::new(CompileErrorKind::MalformedOption { option: option.into(), reason: reason.into() }, line)
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.kind)
    }
}

impl std::error::Error for CompileError {}

/// Main error type for compile and render operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Scene graph failed to compile
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    /// Render target allocation failed (out of memory or over limits)
    #[error("Could not allocate {target} target at {width}x{height}")]
    ResourceExhausted { target: String, width: u32, height: u32 },

    /// GPU device, shader or readback failure
    #[error("GPU error: {0}")]
    Gpu(String),

    /// Operation not valid in the current pipeline state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Settings file not found
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create a GPU error.
    pub fn gpu(msg: impl Into<String>) -> Self {
        Self::Gpu(msg.into())
    }

    /// Whether the error is an allocation failure that a later tick may retry.
    pub fn is_resource(&self) -> bool {
        matches!(self, Self::ResourceExhausted { .. })
    }
}

/// Result type alias for compile and render operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_error_display() {
        let e = CompileError::new(CompileErrorKind::MissingCamera, 12);
        assert_eq!(e.to_string(), "line 12: Project must contain a Camera!");
        assert_eq!(e.message(), "Project must contain a Camera!");

        let e = CompileError::malformed("Position", "expected 3 components", 4);
        assert!(e.to_string().contains("Position"));
        assert!(e.to_string().starts_with("line 4"));
    }

    #[test]
    fn test_error_from_compile() {
        let err: Error = CompileError::new(CompileErrorKind::UnresolvedMaterial("Gold".into()), 3).into();
        assert!(matches!(err, Error::Compile(_)));
        assert!(err.to_string().contains("Gold"));
    }

    #[test]
    fn test_resource_error() {
        let e = Error::ResourceExhausted { target: "main".into(), width: 640, height: 480 };
        assert!(e.is_resource());
        assert!(e.to_string().contains("640x480"));
        assert!(!Error::other("x").is_resource());
    }
}
