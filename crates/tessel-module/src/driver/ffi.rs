//! Runtime-loaded CUDA driver API function pointers via dlopen.
//!
//! Avoids a build-time CUDA toolkit dependency: any install that ships
//! `libcuda.so.1` works. Set `TESSEL_CUDA_LIBRARY` to load a specific file.

use std::ffi::{c_char, c_int, c_uint, c_void, CStr};
use std::sync::OnceLock;

use libloading::Library;

use super::DriverError;

// ---------------------------------------------------------------------------
// Driver status codes and enums
// ---------------------------------------------------------------------------

pub type CuResult = c_int;
pub const CUDA_SUCCESS: CuResult = 0;
pub const CUDA_ERROR_INVALID_CONTEXT: CuResult = 201;

pub const CU_FUNC_ATTRIBUTE_MAX_DYNAMIC_SHARED_SIZE_BYTES: c_int = 8;

// Opaque handles
pub type CuDevice = c_int;
pub type CuContext = *mut c_void;
pub type CuModule = *mut c_void;
pub type CuFunction = *mut c_void;
pub type CuStream = *mut c_void;
pub type CuDeviceptr = u64;

// ---------------------------------------------------------------------------
// Driver API function signatures
// ---------------------------------------------------------------------------

type FnCuInit = unsafe extern "C" fn(c_uint) -> CuResult;
type FnCuDeviceGetCount = unsafe extern "C" fn(*mut c_int) -> CuResult;
type FnCuDeviceGet = unsafe extern "C" fn(*mut CuDevice, c_int) -> CuResult;
type FnCuDevicePrimaryCtxRetain = unsafe extern "C" fn(*mut CuContext, CuDevice) -> CuResult;
type FnCuCtxSetCurrent = unsafe extern "C" fn(CuContext) -> CuResult;
type FnCuCtxGetDevice = unsafe extern "C" fn(*mut CuDevice) -> CuResult;
type FnCuModuleLoadData = unsafe extern "C" fn(*mut CuModule, *const c_void) -> CuResult;
type FnCuModuleUnload = unsafe extern "C" fn(CuModule) -> CuResult;
type FnCuModuleGetFunction = unsafe extern "C" fn(
    *mut CuFunction, CuModule, *const c_char,
) -> CuResult;
type FnCuModuleGetGlobal = unsafe extern "C" fn(
    *mut CuDeviceptr, *mut usize, CuModule, *const c_char,
) -> CuResult;
type FnCuFuncSetAttribute = unsafe extern "C" fn(CuFunction, c_int, c_int) -> CuResult;
type FnCuLaunchKernel = unsafe extern "C" fn(
    CuFunction,
    c_uint, c_uint, c_uint,   // grid x, y, z
    c_uint, c_uint, c_uint,   // block x, y, z
    c_uint,                    // dynamic shared mem bytes
    CuStream,
    *mut *mut c_void,          // kernel params
    *mut *mut c_void,          // extra (null)
) -> CuResult;
type FnCuMemsetD32 = unsafe extern "C" fn(CuDeviceptr, c_uint, usize) -> CuResult;
type FnCuGetErrorName = unsafe extern "C" fn(CuResult, *mut *const c_char) -> CuResult;

// ---------------------------------------------------------------------------
// Loaded API struct
// ---------------------------------------------------------------------------

pub struct CudaApi {
    _lib: Library,
    pub cu_init: FnCuInit,
    pub cu_device_get_count: FnCuDeviceGetCount,
    pub cu_device_get: FnCuDeviceGet,
    pub cu_device_primary_ctx_retain: FnCuDevicePrimaryCtxRetain,
    pub cu_ctx_set_current: FnCuCtxSetCurrent,
    pub cu_ctx_get_device: FnCuCtxGetDevice,
    pub cu_module_load_data: FnCuModuleLoadData,
    pub cu_module_unload: FnCuModuleUnload,
    pub cu_module_get_function: FnCuModuleGetFunction,
    pub cu_module_get_global: FnCuModuleGetGlobal,
    pub cu_func_set_attribute: FnCuFuncSetAttribute,
    pub cu_launch_kernel: FnCuLaunchKernel,
    pub cu_memset_d32: FnCuMemsetD32,
    pub cu_get_error_name: FnCuGetErrorName,
}

// Safety: the loaded function pointers are process-global and the CUDA driver
// is internally synchronized.
unsafe impl Send for CudaApi {}
unsafe impl Sync for CudaApi {}

static CUDA_API: OnceLock<Result<CudaApi, String>> = OnceLock::new();

const LIBRARY_CANDIDATES: &[&str] = &["libcuda.so.1", "libcuda.so", "nvcuda.dll"];

impl CudaApi {
    fn try_load() -> Result<Self, String> {
        let lib = open_library()?;
        unsafe {
            let api = CudaApi {
                cu_init: *lib.get::<FnCuInit>(b"cuInit\0").map_err(|e| e.to_string())?,
                cu_device_get_count: *lib.get::<FnCuDeviceGetCount>(b"cuDeviceGetCount\0").map_err(|e| e.to_string())?,
                cu_device_get: *lib.get::<FnCuDeviceGet>(b"cuDeviceGet\0").map_err(|e| e.to_string())?,
                cu_device_primary_ctx_retain: *lib.get::<FnCuDevicePrimaryCtxRetain>(b"cuDevicePrimaryCtxRetain\0").map_err(|e| e.to_string())?,
                cu_ctx_set_current: *lib.get::<FnCuCtxSetCurrent>(b"cuCtxSetCurrent\0").map_err(|e| e.to_string())?,
                cu_ctx_get_device: *lib.get::<FnCuCtxGetDevice>(b"cuCtxGetDevice\0").map_err(|e| e.to_string())?,
                cu_module_load_data: *lib.get::<FnCuModuleLoadData>(b"cuModuleLoadData\0").map_err(|e| e.to_string())?,
                cu_module_unload: *lib.get::<FnCuModuleUnload>(b"cuModuleUnload\0").map_err(|e| e.to_string())?,
                cu_module_get_function: *lib.get::<FnCuModuleGetFunction>(b"cuModuleGetFunction\0").map_err(|e| e.to_string())?,
                cu_module_get_global: *lib.get::<FnCuModuleGetGlobal>(b"cuModuleGetGlobal_v2\0").map_err(|e| e.to_string())?,
                cu_func_set_attribute: *lib.get::<FnCuFuncSetAttribute>(b"cuFuncSetAttribute\0").map_err(|e| e.to_string())?,
                cu_launch_kernel: *lib.get::<FnCuLaunchKernel>(b"cuLaunchKernel\0").map_err(|e| e.to_string())?,
                cu_memset_d32: *lib.get::<FnCuMemsetD32>(b"cuMemsetD32_v2\0").map_err(|e| e.to_string())?,
                cu_get_error_name: *lib.get::<FnCuGetErrorName>(b"cuGetErrorName\0").map_err(|e| e.to_string())?,
                _lib: lib,
            };
            Ok(api)
        }
    }
}

fn open_library() -> Result<Library, String> {
    if let Ok(path) = std::env::var("TESSEL_CUDA_LIBRARY") {
        return unsafe { Library::new(&path) }.map_err(|e| format!("{path}: {e}"));
    }
    let mut last_err = String::from("no candidate library names");
    for name in LIBRARY_CANDIDATES {
        match unsafe { Library::new(name) } {
            Ok(lib) => return Ok(lib),
            Err(e) => last_err = format!("{name}: {e}"),
        }
    }
    Err(last_err)
}

/// Get the runtime-loaded CUDA driver API.
pub fn cuda_api() -> Result<&'static CudaApi, DriverError> {
    CUDA_API
        .get_or_init(CudaApi::try_load)
        .as_ref()
        .map_err(|e| DriverError::NotAvailable(e.clone()))
}

// ---------------------------------------------------------------------------
// Error checking helpers
// ---------------------------------------------------------------------------

/// Symbolic name of a driver status code, e.g. `CUDA_ERROR_INVALID_VALUE`.
pub fn error_name(api: &CudaApi, code: CuResult) -> String {
    let mut msg: *const c_char = std::ptr::null();
    let status = unsafe { (api.cu_get_error_name)(code, &mut msg) };
    if status != CUDA_SUCCESS || msg.is_null() {
        return format!("CUDA_ERROR_UNKNOWN({code})");
    }
    unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
}

/// Check a driver API return code.
pub fn check(api: &CudaApi, code: CuResult, call: &'static str) -> Result<(), DriverError> {
    if code == CUDA_SUCCESS {
        Ok(())
    } else {
        Err(DriverError::Call { call, code, name: error_name(api, code) })
    }
}
