//! # tessel-core
//!
//! Shared value types for the Tessel GPU runtime.
//!
//! Provides:
//! - `Device`, the compute device a worker or module targets
//! - `WorkerIdentity` and its per-thread binding, consumed read-write by the
//!   symmetric-memory bootstrap

pub mod device;
pub mod worker;

pub use device::{Device, ParseDeviceError};
pub use worker::{SharedWorker, WorkerGuard, WorkerIdentity};
