//! Error types for the plugin-model bridge.

use crate::model::Calculation;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the bridge's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for loading, marshalling and dispatching plugin models.
#[derive(Error, Debug)]
pub enum Error {
    /// The path does not resolve to a module loadable on this platform.
    #[error("failed to load module {}: {reason}", path.display())]
    LoadFailed {
        /// Path that was handed to the platform loader.
        path: PathBuf,
        /// Loader diagnostic.
        reason: String,
    },

    /// Name-based lookup found no candidate on any search path.
    #[error("module '{name}' not found in search paths")]
    ModuleNotFound {
        /// Name that was looked up.
        name: String,
    },

    /// The module reports an ABI version other than the supported one.
    #[error("ABI version mismatch: expected {expected}, got {actual}")]
    IncompatibleAbi {
        /// Version supported by this bridge.
        expected: usize,
        /// Version reported by the module.
        actual: usize,
    },

    /// A required entry point is not exported by the module.
    #[error("missing required entry point: {0}")]
    MissingRequiredSymbol(String),

    /// The model info record returned by the module is malformed.
    #[error("invalid model descriptor: {0}")]
    InvalidDescriptor(String),

    /// The operation needs a loaded module.
    #[error("no module loaded")]
    NotLoaded,

    /// The module's create entry point returned a null handle.
    #[error("module returned a null model handle")]
    CreationFailed,

    /// The model handle is not tracked by this factory.
    #[error("model handle is not live in this factory")]
    UnknownHandle,

    /// The module does not export the entry point for this calculation.
    #[error("calculation not supported by module: {0}")]
    UnsupportedOperation(Calculation),

    /// Coordinate arrays passed to a 2-D or 3-D calculation differ in length.
    #[error("coordinate length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        /// Length of the first coordinate array.
        expected: usize,
        /// Length of the offending array.
        actual: usize,
    },

    /// A parameter value cannot be encoded for the native call.
    #[error("invalid value for parameter '{parameter}': {reason}")]
    InvalidValue {
        /// Parameter name.
        parameter: String,
        /// What is wrong with the value.
        reason: &'static str,
    },

    /// The parameter name is not declared by the model descriptor.
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    /// A parameter set does not belong to the loaded module's descriptor.
    #[error("parameters were built for model '{actual}', not '{expected}'")]
    ForeignParameters {
        /// Model loaded in the factory.
        expected: String,
        /// Model the parameter set was built for.
        actual: String,
    },

    /// A wire record carries a discriminator the decoder does not know.
    #[error("unknown wire tag {0:#x}")]
    UnknownWireTag(usize),

    /// The model was destroyed and can no longer be used.
    #[error("model has been destroyed")]
    ModelDestroyed,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
