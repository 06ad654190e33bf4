//! Error Types
//!
//! This module defines the error types used throughout the material system.
//!
//! # Overview
//!
//! The main error type [`SigilError`] covers the recoverable failure modes:
//! - Shading graph translation failures ([`TranslationError`])
//! - Shader back-end compile failures ([`CompileError`])
//! - Persistent store and inline archive failures
//! - Producer-side teardown ordering violations
//!
//! Cache inconsistencies (a permutation missing from a map that claims to be
//! complete) and failures of the default material are not represented here:
//! they are logged with full diagnostics and terminate the process.
//!
//! # Usage
//!
//! All fallible public APIs return [`Result<T>`], an alias for
//! `std::result::Result<T, SigilError>`.

use thiserror::Error;

/// The main error type for the material system.
#[derive(Error, Debug)]
pub enum SigilError {
    // ========================================================================
    // Compilation Errors
    // ========================================================================
    /// The shading graph could not be translated into shader source.
    #[error("Translation failed: {0}")]
    Translation(#[from] TranslationError),

    /// One or more permutations failed to compile.
    #[error("Shader compilation failed with {} error(s)", .0.len())]
    Compile(Vec<CompileError>),

    /// Shaders are required but compiling is disabled in this configuration.
    #[error("Shader map for '{0}' is missing and cooked data is required")]
    MissingCookedShaderMap(String),

    // ========================================================================
    // Resource Lifecycle Errors
    // ========================================================================
    /// `discard_shader_map` was called while the render side still holds a map.
    #[error("Shader map of resource {0} is still bound on the render side")]
    ShaderMapStillBound(u64),

    /// The referenced resource is unknown.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    // ========================================================================
    // Store & Serialization Errors
    // ========================================================================
    /// Inline archive is truncated or malformed.
    #[error("Invalid inline archive: {0}")]
    InvalidArchive(String),

    /// JSON payload error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to translate a shading description into shader source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslationError {
    /// A reroute chain loops back onto itself.
    #[error("Reroute cycle detected at node {node} in '{material}'")]
    RerouteCycle {
        /// Owning description name.
        material: String,
        /// Node at which the cycle closed.
        node: u32,
    },

    /// A reroute node has no upstream connection.
    #[error("Reroute node {node} in '{material}' is not connected")]
    UnconnectedReroute {
        /// Owning description name.
        material: String,
        /// The dangling reroute.
        node: u32,
    },

    /// A node references an input that does not exist.
    #[error("Node {node} in '{material}' references missing input {input}")]
    MissingInput {
        /// Owning description name.
        material: String,
        /// Referencing node.
        node: u32,
        /// Missing input index.
        input: u32,
    },

    /// Free-form translator diagnostic.
    #[error("{0}")]
    Message(String),
}

/// Failure reported by the shader back end for one permutation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{permutation}: {message}")]
pub struct CompileError {
    /// Human-readable permutation label (`shader type` or `shader type/vertex factory`).
    pub permutation: String,
    /// Back-end diagnostic.
    pub message: String,
}

impl CompileError {
    #[must_use]
    pub fn new(permutation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            permutation: permutation.into(),
            message: message.into(),
        }
    }
}

/// Alias for `Result<T, SigilError>`.
pub type Result<T> = std::result::Result<T, SigilError>;
