use tessel_core::Device;
use tessel_module::DriverError;

/// Errors from the symmetric-memory bootstrap.
///
/// Every variant is terminal for the join attempt: a half-initialized
/// communication layer is not retried.
#[derive(Debug, thiserror::Error)]
pub enum ShmemError {
    #[error("NVSHMEM not available: {0}")]
    NotAvailable(String),

    #[error("{call} failed with error code {code}")]
    Call { call: &'static str, code: i32 },

    #[error("ValueError: the join token must have {expected} values, but got {actual}")]
    TokenLength { expected: usize, actual: usize },

    #[error("invalid join config: {0}")]
    InvalidConfig(String),

    #[error("device binding failed: {0}")]
    Device(#[from] DriverError),

    #[error(
        "the default device of the worker is inconsistent with the device used for NVSHMEM: \
         the default device is {default_device}, but the device used for NVSHMEM is {shmem_device}"
    )]
    DeviceMismatch { default_device: Device, shmem_device: Device },

    #[error("this process already joined the symmetric address space")]
    AlreadyJoined,

    #[error("no bootstrap installed in this process")]
    NotInstalled,
}

pub type Result<T> = std::result::Result<T, ShmemError>;
