//! [`Driver`] over the CUDA driver API.
//!
//! Device binding follows the runtime API's model: each ordinal's primary
//! context is retained once and made current on the calling thread.

use std::borrow::Cow;
use std::ffi::{c_int, c_uint, c_void, CString};

use parking_lot::Mutex;

use super::ffi::{self, check, CudaApi, CuContext, CUDA_ERROR_INVALID_CONTEXT};
use super::{
    DeviceContext, DevicePtr, Driver, DriverError, FunctionHandle, LaunchDims, ModuleHandle,
    StreamHandle, MAX_DEVICES,
};

/// Wrapper around `CuContext` (`*mut c_void`) to make it Send+Sync.
/// Primary contexts are process-global and stay retained for the process lifetime.
#[derive(Clone, Copy)]
struct SendContext(CuContext);
unsafe impl Send for SendContext {}
unsafe impl Sync for SendContext {}

/// CUDA driver loaded at runtime.
pub struct CudaDriver {
    api: &'static CudaApi,
    contexts: Mutex<[Option<SendContext>; MAX_DEVICES]>,
}

impl CudaDriver {
    /// Load `libcuda` and initialize the driver.
    pub fn new() -> Result<Self, DriverError> {
        let api = ffi::cuda_api()?;
        check(api, unsafe { (api.cu_init)(0) }, "cuInit")?;
        Ok(Self { api, contexts: Mutex::new([None; MAX_DEVICES]) })
    }

    /// Number of visible CUDA devices.
    pub fn device_count(&self) -> Result<usize, DriverError> {
        let mut count: c_int = 0;
        check(self.api, unsafe { (self.api.cu_device_get_count)(&mut count) }, "cuDeviceGetCount")?;
        Ok(count.max(0) as usize)
    }

    fn primary_context(&self, device: usize) -> Result<CuContext, DriverError> {
        let mut contexts = self.contexts.lock();
        let slot = contexts.get_mut(device).ok_or(DriverError::Call {
            call: "cuDeviceGet",
            code: 101,
            name: format!("CUDA_ERROR_INVALID_DEVICE (ordinal {device} >= {MAX_DEVICES})"),
        })?;
        if let Some(SendContext(ctx)) = *slot {
            return Ok(ctx);
        }
        let mut dev: ffi::CuDevice = 0;
        check(self.api, unsafe { (self.api.cu_device_get)(&mut dev, device as c_int) }, "cuDeviceGet")?;
        let mut ctx: CuContext = std::ptr::null_mut();
        check(
            self.api,
            unsafe { (self.api.cu_device_primary_ctx_retain)(&mut ctx, dev) },
            "cuDevicePrimaryCtxRetain",
        )?;
        *slot = Some(SendContext(ctx));
        Ok(ctx)
    }
}

impl DeviceContext for CudaDriver {
    fn current_device(&self) -> Result<usize, DriverError> {
        let mut dev: ffi::CuDevice = 0;
        let code = unsafe { (self.api.cu_ctx_get_device)(&mut dev) };
        if code == CUDA_ERROR_INVALID_CONTEXT {
            // Nothing bound yet: behave like the runtime API and default to device 0.
            self.set_device(0)?;
            return Ok(0);
        }
        check(self.api, code, "cuCtxGetDevice")?;
        Ok(dev as usize)
    }

    fn set_device(&self, device: usize) -> Result<(), DriverError> {
        let ctx = self.primary_context(device)?;
        check(self.api, unsafe { (self.api.cu_ctx_set_current)(ctx) }, "cuCtxSetCurrent")
    }
}

impl Driver for CudaDriver {
    fn load_module(&self, image: &[u8]) -> Result<ModuleHandle, DriverError> {
        // PTX images are read as C strings.
        let image: Cow<'_, [u8]> = if image.last() == Some(&0) {
            Cow::Borrowed(image)
        } else {
            let mut owned = Vec::with_capacity(image.len() + 1);
            owned.extend_from_slice(image);
            owned.push(0);
            Cow::Owned(owned)
        };
        let mut module: ffi::CuModule = std::ptr::null_mut();
        check(
            self.api,
            unsafe { (self.api.cu_module_load_data)(&mut module, image.as_ptr() as *const c_void) },
            "cuModuleLoadData",
        )?;
        Ok(ModuleHandle::from_ptr(module))
    }

    fn unload_module(&self, module: ModuleHandle) -> Result<(), DriverError> {
        check(self.api, unsafe { (self.api.cu_module_unload)(module.as_ptr()) }, "cuModuleUnload")
    }

    fn get_function(&self, module: ModuleHandle, name: &str) -> Result<FunctionHandle, DriverError> {
        let c_name = symbol_name(name, "cuModuleGetFunction")?;
        let mut func: ffi::CuFunction = std::ptr::null_mut();
        check(
            self.api,
            unsafe { (self.api.cu_module_get_function)(&mut func, module.as_ptr(), c_name.as_ptr()) },
            "cuModuleGetFunction",
        )?;
        Ok(FunctionHandle::from_ptr(func))
    }

    fn get_global(&self, module: ModuleHandle, name: &str) -> Result<(DevicePtr, usize), DriverError> {
        let c_name = symbol_name(name, "cuModuleGetGlobal")?;
        let mut ptr: ffi::CuDeviceptr = 0;
        let mut nbytes: usize = 0;
        check(
            self.api,
            unsafe { (self.api.cu_module_get_global)(&mut ptr, &mut nbytes, module.as_ptr(), c_name.as_ptr()) },
            "cuModuleGetGlobal",
        )?;
        Ok((DevicePtr::from_raw(ptr), nbytes))
    }

    fn set_max_dynamic_shared_memory(&self, func: FunctionHandle, bytes: u32) -> Result<(), DriverError> {
        check(
            self.api,
            unsafe {
                (self.api.cu_func_set_attribute)(
                    func.as_ptr(),
                    ffi::CU_FUNC_ATTRIBUTE_MAX_DYNAMIC_SHARED_SIZE_BYTES,
                    bytes as c_int,
                )
            },
            "cuFuncSetAttribute",
        )
    }

    unsafe fn launch(
        &self,
        func: FunctionHandle,
        dims: &LaunchDims,
        stream: StreamHandle,
        params: &mut [*mut c_void],
    ) -> Result<(), DriverError> {
        let code = (self.api.cu_launch_kernel)(
            func.as_ptr(),
            dims.grid[0] as c_uint,
            dims.grid[1] as c_uint,
            dims.grid[2] as c_uint,
            dims.block[0] as c_uint,
            dims.block[1] as c_uint,
            dims.block[2] as c_uint,
            dims.dyn_shmem_bytes as c_uint,
            stream.as_ptr(),
            if params.is_empty() { std::ptr::null_mut() } else { params.as_mut_ptr() },
            std::ptr::null_mut(), // extra
        );
        check(self.api, code, "cuLaunchKernel")
    }

    fn memset_d32(&self, ptr: DevicePtr, value: u32, count: usize) -> Result<(), DriverError> {
        check(
            self.api,
            unsafe { (self.api.cu_memset_d32)(ptr.as_raw(), value as c_uint, count) },
            "cuMemsetD32",
        )
    }
}

fn symbol_name(name: &str, call: &'static str) -> Result<CString, DriverError> {
    CString::new(name).map_err(|_| DriverError::Call {
        call,
        code: 1,
        name: format!("CUDA_ERROR_INVALID_VALUE (symbol {name:?} contains a NUL byte)"),
    })
}
