//! Error types for the build orchestrator.

use std::path::PathBuf;

/// Result type alias for builder operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while preparing or running an SDK build.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    //
    // All detected before any container work starts.
    // =========================================================================
    /// Requested target is not a member of the known target set.
    #[error("unknown target '{target}' (known: {})", .known.join(", "))]
    UnknownTarget { target: String, known: Vec<String> },

    /// A configuration document failed schema validation.
    #[error("'{document}' failed validation: {}", .violations.join("; "))]
    SchemaViolation {
        document: String,
        violations: Vec<String>,
    },

    /// Mount entry is missing a required field.
    #[error("mount '{name}' is invalid: {reason}")]
    InvalidMount { name: String, reason: String },

    /// A developer override document was supplied outside development mode.
    #[error("developer config '{path}' is only legal in development mode")]
    DeveloperConfigNotAllowed { path: PathBuf },

    /// A layer contributed a path that escapes its declared root.
    #[error("path traversal detected in layer '{layer}': {path}")]
    PathTraversal { layer: String, path: String },

    /// A layer directory does not follow the files/scripts layout.
    #[error("invalid layout in layer '{layer}' at '{path}': {reason}")]
    InvalidLayerLayout {
        layer: String,
        path: String,
        reason: String,
    },

    /// A step entry does not match the `<integer>.<name>` convention.
    #[error("step '{name}' in namespace '{namespace}' does not match <integer>.<name>")]
    InvalidStepName { namespace: String, name: String },

    /// No SDK variant is implemented for the requested SDK name.
    #[error("no SDK variant implemented for '{sdk}'")]
    UnknownSdk { sdk: String },

    /// No interface exists for the requested container engine.
    #[error("no interface for container engine '{engine}'")]
    UnknownEngine { engine: String },

    /// Nonsensical command line.
    #[error("invalid command line: {0}")]
    InvalidCli(String),

    // =========================================================================
    // Precondition Errors
    // =========================================================================
    /// Restricted build requested but no cached image exists for the identity.
    #[error("no container image '{tag}' found; a full build must run first")]
    ImageNotFound { tag: String },

    /// Expected build container no longer exists.
    #[error("container not found: {id}")]
    ContainerNotFound { id: String },

    // =========================================================================
    // Step Failures
    // =========================================================================
    /// A step exited non-zero; remaining steps in the namespace were skipped.
    #[error("step '{order}.{step}' in namespace '{namespace}' failed with exit code {code}")]
    StepFailed {
        namespace: String,
        step: String,
        order: u32,
        code: i32,
    },

    /// A step was terminated by a signal before it could exit.
    #[error("step '{order}.{step}' in namespace '{namespace}' was terminated by a signal")]
    StepTerminated {
        namespace: String,
        step: String,
        order: u32,
    },

    /// A step process could not be spawned at all.
    #[error("step '{order}.{step}' in namespace '{namespace}' could not be spawned: {reason}")]
    StepSpawnFailed {
        namespace: String,
        step: String,
        order: u32,
        reason: String,
    },

    // =========================================================================
    // Container Engine Errors
    // =========================================================================
    /// Image build failed; carries the engine's exit status unchanged.
    #[error("image build for '{tag}' failed with exit code {code}")]
    ImageBuildFailed { tag: String, code: i32 },

    /// A build container exited non-zero.
    #[error("container for '{tag}' exited with code {code}")]
    ContainerExited { tag: String, code: i32 },

    /// An engine subprocess could not be spawned or queried.
    #[error("container engine command failed: {command}: {reason}")]
    EngineCommandFailed { command: String, reason: String },

    /// SDK source checkout failed.
    #[error("checkout of '{url}' (branch '{branch}') failed: {reason}")]
    CheckoutFailed {
        url: String,
        branch: String,
        reason: String,
    },

    // =========================================================================
    // Staging / Artifact Errors
    // =========================================================================
    /// Staging tree could not be materialized.
    #[error("failed to stage '{path}': {reason}")]
    StagingFailed { path: PathBuf, reason: String },

    /// Output artifact bundle could not be written.
    #[error("failed to bundle artifacts into '{path}': {reason}")]
    ArtifactBundleFailed { path: PathBuf, reason: String },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// True for errors that must be detected before touching the container
    /// engine (schema violations, bad layouts, unknown names).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::UnknownTarget { .. }
                | Error::SchemaViolation { .. }
                | Error::InvalidMount { .. }
                | Error::DeveloperConfigNotAllowed { .. }
                | Error::PathTraversal { .. }
                | Error::InvalidLayerLayout { .. }
                | Error::InvalidStepName { .. }
                | Error::UnknownSdk { .. }
                | Error::UnknownEngine { .. }
                | Error::InvalidCli(_)
        )
    }

    /// True for failed restricted-build preconditions. These must never fall
    /// back to an implicit full build.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::ImageNotFound { .. } | Error::ContainerNotFound { .. }
        )
    }
}
