//! Counting mock driver shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::Mutex;
use tessel_module::{
    CompiledModule, DeviceContext, DevicePtr, Driver, DriverError, FunctionHandle, FunctionInfo,
    FunctionTable, LaunchDims, ModuleFormat, ModuleHandle, StreamHandle,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Launch {
    pub device: usize,
    pub func: FunctionHandle,
    pub dims: LaunchDims,
    pub stream: StreamHandle,
    pub params: usize,
}

pub struct MockDriver {
    bound: Mutex<HashMap<ThreadId, usize>>,
    next_module: AtomicU64,
    pub loads: Mutex<Vec<usize>>,
    pub unloads: Mutex<Vec<(usize, ModuleHandle)>>,
    pub function_lookups: AtomicUsize,
    pub global_lookups: AtomicUsize,
    pub shmem_configs: Mutex<Vec<(FunctionHandle, u32)>>,
    pub launches: Mutex<Vec<Launch>>,
    pub memsets: Mutex<Vec<(DevicePtr, u32, usize)>>,
    pub launch_error: Mutex<Option<DriverError>>,
    pub global_bytes: Mutex<usize>,
}

impl MockDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            bound: Mutex::new(HashMap::new()),
            next_module: AtomicU64::new(1),
            loads: Mutex::new(Vec::new()),
            unloads: Mutex::new(Vec::new()),
            function_lookups: AtomicUsize::new(0),
            global_lookups: AtomicUsize::new(0),
            shmem_configs: Mutex::new(Vec::new()),
            launches: Mutex::new(Vec::new()),
            memsets: Mutex::new(Vec::new()),
            launch_error: Mutex::new(None),
            global_bytes: Mutex::new(4),
        })
    }

    fn bound_device(&self) -> usize {
        *self.bound.lock().get(&std::thread::current().id()).unwrap_or(&0)
    }
}

impl DeviceContext for MockDriver {
    fn current_device(&self) -> Result<usize, DriverError> {
        Ok(self.bound_device())
    }

    fn set_device(&self, device: usize) -> Result<(), DriverError> {
        self.bound.lock().insert(std::thread::current().id(), device);
        Ok(())
    }
}

impl Driver for MockDriver {
    fn load_module(&self, _image: &[u8]) -> Result<ModuleHandle, DriverError> {
        self.loads.lock().push(self.bound_device());
        Ok(ModuleHandle::from_raw(self.next_module.fetch_add(1, Ordering::SeqCst) << 8))
    }

    fn unload_module(&self, module: ModuleHandle) -> Result<(), DriverError> {
        self.unloads.lock().push((self.bound_device(), module));
        Ok(())
    }

    fn get_function(&self, module: ModuleHandle, name: &str) -> Result<FunctionHandle, DriverError> {
        self.function_lookups.fetch_add(1, Ordering::SeqCst);
        if name == "missing_in_binary" {
            return Err(DriverError::Call { call: "cuModuleGetFunction", code: 500, name: "CUDA_ERROR_NOT_FOUND".into() });
        }
        Ok(FunctionHandle::from_raw(module.as_raw() | 0x1))
    }

    fn get_global(&self, module: ModuleHandle, _name: &str) -> Result<(DevicePtr, usize), DriverError> {
        self.global_lookups.fetch_add(1, Ordering::SeqCst);
        Ok((DevicePtr::from_raw(module.as_raw() | 0x2), *self.global_bytes.lock()))
    }

    fn set_max_dynamic_shared_memory(&self, func: FunctionHandle, bytes: u32) -> Result<(), DriverError> {
        self.shmem_configs.lock().push((func, bytes));
        Ok(())
    }

    unsafe fn launch(
        &self,
        func: FunctionHandle,
        dims: &LaunchDims,
        stream: StreamHandle,
        params: &mut [*mut c_void],
    ) -> Result<(), DriverError> {
        if let Some(err) = self.launch_error.lock().clone() {
            return Err(err);
        }
        self.launches.lock().push(Launch {
            device: self.bound_device(),
            func,
            dims: *dims,
            stream,
            params: params.len(),
        });
        Ok(())
    }

    fn memset_d32(&self, ptr: DevicePtr, value: u32, count: usize) -> Result<(), DriverError> {
        self.memsets.lock().push((ptr, value, count));
        Ok(())
    }
}

/// Module exporting `K(handle, handle)` launched over `blockIdx.x`,
/// `threadIdx.x` and dynamic shared memory.
pub fn kernel_module(driver: Arc<MockDriver>, source: Option<&str>) -> CompiledModule {
    let mut table = FunctionTable::new();
    table.insert(
        "K".into(),
        FunctionInfo::new("K", &["handle", "handle"], &["blockIdx.x", "threadIdx.x", "tir.use_dyn_shared_memory"]),
    );
    table.insert("missing_in_binary".into(), FunctionInfo::new("missing_in_binary", &[], &[]));
    CompiledModule::new(driver, b"\x7fELF-cubin-image".to_vec(), ModuleFormat::Cubin, table, source.map(String::from))
}
