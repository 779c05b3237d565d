//! Error types for peel.
//!
//! This module defines all error types used throughout the library.

use thiserror::Error;

/// Result type alias using [`UnwrapError`].
pub type Result<T> = std::result::Result<T, UnwrapError>;

/// Errors that can occur while unwrapping a mesh.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UnwrapError {
    /// The mesh has no faces.
    #[error("mesh has no faces")]
    EmptyMesh,

    /// A face references an invalid vertex index.
    #[error("face {face} references invalid vertex index {vertex}")]
    InvalidVertexIndex {
        /// The face index.
        face: usize,
        /// The invalid vertex index.
        vertex: usize,
    },

    /// A face has duplicate vertex indices (degenerate triangle).
    #[error("face {face} is degenerate (has duplicate vertices)")]
    DegenerateFace {
        /// The face index.
        face: usize,
    },

    /// An edge has more than two incident faces.
    #[error("edge ({v0}, {v1}) has more than two incident faces")]
    NonManifoldEdge {
        /// First vertex of the edge.
        v0: usize,
        /// Second vertex of the edge.
        v1: usize,
    },

    /// A chart could not be cut into a topological disk.
    #[error("chart {chart} could not be cut into a disk after {iterations} iterations")]
    UnresolvableTopology {
        /// The offending chart index.
        chart: usize,
        /// Number of cut iterations attempted.
        iterations: usize,
    },

    /// A chart's parameterization failed even after the harmonic fallback.
    #[error(
        "parameterization of chart {chart} failed after {iterations} iterations (residual {residual:.3e})"
    )]
    ParameterizationFailed {
        /// The offending chart index.
        chart: usize,
        /// Number of solver iterations attempted.
        iterations: usize,
        /// Final relative residual of the solve.
        residual: f64,
    },

    /// A chart footprint exceeds the maximum atlas extent.
    #[error("chart {chart} does not fit the atlas even at maximum extent {extent}")]
    PackingOverflow {
        /// The offending chart index.
        chart: usize,
        /// The maximum extent that was tried.
        extent: f64,
    },

    /// Invalid parameter value.
    #[error("invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// The invalid value (as string).
        value: String,
        /// Reason the value is invalid.
        reason: &'static str,
    },
}

impl UnwrapError {
    /// Create an invalid parameter error.
    pub fn invalid_param<T: std::fmt::Display>(
        name: &'static str,
        value: T,
        reason: &'static str,
    ) -> Self {
        UnwrapError::InvalidParameter {
            name,
            value: value.to_string(),
            reason,
        }
    }
}
