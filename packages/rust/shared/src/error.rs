//! Error types for AgentSync.
//!
//! Library crates use [`AgentSyncError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::types::PipelineStage;

/// Top-level error type for all AgentSync operations.
#[derive(Debug, thiserror::Error)]
pub enum AgentSyncError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// The document store could not be reached (connect, TLS, timeout, body read).
    #[error("transport error: {0}")]
    Transport(String),

    /// The document store answered with a non-2xx status.
    #[error("store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// A store response did not have the expected shape.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Invalid input to an operation.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A pipeline stage failed and the run was aborted.
    #[error("pipeline failed during {stage}: {source}")]
    Pipeline {
        stage: PipelineStage,
        source: Box<AgentSyncError>,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, AgentSyncError>;

impl AgentSyncError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Tag an error with the pipeline stage it aborted.
    pub fn at_stage(self, stage: PipelineStage) -> Self {
        Self::Pipeline {
            stage,
            source: Box::new(self),
        }
    }

    /// True for connectivity failures and non-2xx store responses.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Status { .. } => true,
            Self::Pipeline { source, .. } => source.is_transport(),
            _ => false,
        }
    }

    /// The stage a pipeline error aborted in, if any.
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            Self::Pipeline { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = AgentSyncError::config("missing store url");
        assert_eq!(err.to_string(), "config error: missing store url");

        let err = AgentSyncError::Status {
            status: 400,
            body: "parsing_exception".into(),
        };
        assert_eq!(err.to_string(), "store returned HTTP 400: parsing_exception");
    }

    #[test]
    fn stage_tagging_keeps_transport_classification() {
        let err = AgentSyncError::Transport("connection refused".into())
            .at_stage(PipelineStage::Detecting);
        assert!(err.is_transport());
        assert_eq!(err.stage(), Some(PipelineStage::Detecting));
        assert!(err.to_string().contains("detecting"));
        assert!(err.to_string().contains("connection refused"));

        let err = AgentSyncError::validation("empty set").at_stage(PipelineStage::Propagating);
        assert!(!err.is_transport());
    }
}
