//! Module manager errors.

use std::path::PathBuf;

use crate::driver::{DriverError, MAX_DEVICES};

/// Errors from loading, saving, realizing or launching a compiled module.
///
/// None of these are recoverable in place: a malformed artifact or a driver
/// failure means the environment is broken, so callers should surface them
/// with full context rather than retry.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("device ordinal {device} out of range (max {MAX_DEVICES})")]
    DeviceOutOfRange { device: usize },

    #[error("failed to load module on device {device}: {source}")]
    ModuleLoad { device: usize, source: DriverError },

    #[error("module-load hook failed on device {device}: {source}")]
    LoadHook {
        device: usize,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("cuModuleGetFunction {name} failed on device {device}: {source}")]
    FunctionLookup { name: String, device: usize, source: DriverError },

    #[error("cuModuleGetGlobal {name} failed on device {device}: {source}")]
    GlobalLookup { name: String, device: usize, source: DriverError },

    #[error("global {name} has {actual} bytes, expected {expected}")]
    GlobalSize { name: String, expected: usize, actual: usize },

    #[error("failed to set the allowed dynamic shared memory size of {name} to {bytes}: {source}")]
    SharedMemoryConfig { name: String, bytes: u32, source: DriverError },

    #[error("CUDA launch error in {name}: {source}\n grid={grid:?}, block={block:?}{listing}")]
    Launch {
        name: String,
        grid: [u32; 3],
        block: [u32; 3],
        source: DriverError,
        /// Retained source text with a header, or empty.
        listing: String,
    },

    #[error("failed to reset the global barrier on device {device}: {source}")]
    BarrierReset { device: usize, source: DriverError },

    #[error("device modules do not have a main entry point")]
    MainEntry,

    #[error("unknown module format '{0}'")]
    UnknownFormat(String),

    #[error("can only save to format={stored}, got {requested}")]
    FormatMismatch { requested: String, stored: String },

    #[error("no source text retained; cannot save as '{0}'")]
    MissingSource(String),

    #[error("unknown launch parameter tag '{0}'")]
    LaunchTag(String),

    #[error("unknown argument type '{0}'")]
    ArgType(String),

    #[error("{name}: expected {expected} arguments, got {actual}")]
    ArgCount { name: String, expected: usize, actual: usize },

    #[error("{name}: argument {index} must be {expected}")]
    ArgKind { name: String, index: usize, expected: &'static str },

    #[error("invalid module metadata: {0}")]
    Metadata(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },

    #[error("stream I/O error: {0}")]
    Stream(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ModuleError>;
