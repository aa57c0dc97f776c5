use serde::Serialize;
use thiserror::Error;

/// A compile failure in one asset. These are values handed to the editor
/// collaborator for annotation, never panics; line and column are 1-based.
#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
#[error("{asset}:{line}:{column}: {message}")]
pub struct CompileError {
    pub asset: String,
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl CompileError {
    /// `line` is the 0-based line index the compilers track internally.
    pub fn new(asset: impl Into<String>, line: u32, message: impl Into<String>) -> Self {
        CompileError { asset: asset.into(), line: line + 1, column: 0, message: message.into() }
    }

    /// The JSON record the embedded editor consumes for its annotations.
    pub fn to_annotation(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.to_string())
    }
}
