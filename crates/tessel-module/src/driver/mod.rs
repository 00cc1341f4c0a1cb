//! Driver seam between the module manager and the GPU driver.
//!
//! The module manager only ever talks to a [`Driver`]. [`CudaDriver`] is the
//! production implementation over `libcuda` loaded at runtime; tests supply
//! counting mocks.

pub mod cuda;
pub mod ffi;

use std::ffi::c_void;

pub use cuda::CudaDriver;

/// Upper bound on device ordinals tracked by per-device caches.
pub const MAX_DEVICES: usize = 32;

/// `CUDA_ERROR_DEINITIALIZED`: the driver is shutting down.
pub const ERROR_DEINITIALIZED: i32 = 4;

/// Errors reported by a driver call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    #[error("GPU driver not available: {0}")]
    NotAvailable(String),

    #[error("{call} failed with {name} (code {code})")]
    Call { call: &'static str, code: i32, name: String },
}

impl DriverError {
    /// Numeric driver status, if this error came from a driver call.
    pub fn code(&self) -> Option<i32> {
        match self {
            DriverError::Call { code, .. } => Some(*code),
            DriverError::NotAvailable(_) => None,
        }
    }

    /// Whether the driver reported it was already torn down.
    pub fn is_deinitialized(&self) -> bool {
        self.code() == Some(ERROR_DEINITIALIZED)
    }
}

macro_rules! raw_handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(u64);

        impl $name {
            pub const NULL: Self = Self(0);

            pub fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            pub fn from_ptr(ptr: *mut c_void) -> Self {
                Self(ptr as usize as u64)
            }

            pub fn as_raw(self) -> u64 {
                self.0
            }

            pub fn as_ptr(self) -> *mut c_void {
                self.0 as usize as *mut c_void
            }

            pub fn is_null(self) -> bool {
                self.0 == 0
            }
        }
    };
}

raw_handle!(
    /// A device module realized in one device context (`CUmodule`).
    ModuleHandle
);
raw_handle!(
    /// A resolved kernel entry point inside a device module (`CUfunction`).
    FunctionHandle
);
raw_handle!(
    /// An address in device memory (`CUdeviceptr`).
    DevicePtr
);
raw_handle!(
    /// An execution stream (`CUstream`). `NULL` is the default stream.
    StreamHandle
);

/// Grid/block geometry and dynamic shared memory of one launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchDims {
    pub grid: [u32; 3],
    pub block: [u32; 3],
    pub dyn_shmem_bytes: u32,
}

/// Ambient device binding of the calling thread.
pub trait DeviceContext: Send + Sync {
    /// Device currently bound to the calling thread.
    fn current_device(&self) -> Result<usize, DriverError>;

    /// Bind the calling thread to `device`.
    fn set_device(&self, device: usize) -> Result<(), DriverError>;
}

/// Module, symbol and launch operations the module manager needs.
///
/// Every call that touches a device module expects the owning device to be
/// bound on the calling thread.
pub trait Driver: DeviceContext {
    fn load_module(&self, image: &[u8]) -> Result<ModuleHandle, DriverError>;

    fn unload_module(&self, module: ModuleHandle) -> Result<(), DriverError>;

    fn get_function(&self, module: ModuleHandle, name: &str) -> Result<FunctionHandle, DriverError>;

    /// Address and size in bytes of a module-scope global.
    fn get_global(&self, module: ModuleHandle, name: &str) -> Result<(DevicePtr, usize), DriverError>;

    fn set_max_dynamic_shared_memory(&self, func: FunctionHandle, bytes: u32) -> Result<(), DriverError>;

    /// Enqueue `func` on `stream`.
    ///
    /// # Safety
    /// `params` must hold one valid pointer per kernel parameter, each pointing
    /// at a value whose layout matches the kernel signature, and every device
    /// pointer reachable from them must be valid on the bound device.
    unsafe fn launch(
        &self,
        func: FunctionHandle,
        dims: &LaunchDims,
        stream: StreamHandle,
        params: &mut [*mut c_void],
    ) -> Result<(), DriverError>;

    /// Fill `count` 32-bit words at `ptr` with `value`.
    fn memset_d32(&self, ptr: DevicePtr, value: u32, count: usize) -> Result<(), DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_roundtrip_through_pointer() {
        let h = ModuleHandle::from_raw(0xdead_beef);
        assert_eq!(ModuleHandle::from_ptr(h.as_ptr()), h);
        assert!(!h.is_null());
        assert!(StreamHandle::NULL.is_null());
    }

    #[test]
    fn test_deinitialized_detection() {
        let e = DriverError::Call { call: "cuLaunchKernel", code: ERROR_DEINITIALIZED, name: "CUDA_ERROR_DEINITIALIZED".into() };
        assert!(e.is_deinitialized());
        assert!(!DriverError::NotAvailable("x".into()).is_deinitialized());
    }
}
