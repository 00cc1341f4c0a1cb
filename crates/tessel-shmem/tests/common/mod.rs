//! Recording mocks for the communication layer and the CUDA driver.

#![allow(dead_code)]

use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tessel_module::{
    DeviceContext, DevicePtr, Driver, DriverError, FunctionHandle, LaunchDims, ModuleHandle,
    StreamHandle,
};
use tessel_shmem::{InitStatus, Result, ShmemBackend, ShmemError, UniqueJoinToken, UNIQUEID_PADDING};

pub struct MockBackend {
    pub node_pe: usize,
    pub node_pe_fails: AtomicBool,
    pub status: Mutex<InitStatus>,
    pub inits: Mutex<Vec<(u32, u32, UniqueJoinToken)>>,
    pub patched: Mutex<Vec<ModuleHandle>>,
}

impl MockBackend {
    pub fn new(node_pe: usize) -> Arc<Self> {
        Arc::new(Self {
            node_pe,
            node_pe_fails: AtomicBool::new(false),
            status: Mutex::new(InitStatus::NotInitialized),
            inits: Mutex::new(Vec::new()),
            patched: Mutex::new(Vec::new()),
        })
    }

    pub fn token() -> UniqueJoinToken {
        let mut internal = [0u8; UNIQUEID_PADDING];
        for (i, b) in internal.iter_mut().enumerate() {
            *b = i as u8;
        }
        UniqueJoinToken::new(1, internal)
    }
}

impl ShmemBackend for MockBackend {
    fn unique_id(&self) -> Result<UniqueJoinToken> {
        Ok(Self::token())
    }

    fn init_with_unique_id(&self, pe: u32, npes: u32, token: &UniqueJoinToken) -> Result<()> {
        self.inits.lock().push((pe, npes, token.clone()));
        *self.status.lock() = InitStatus::Initialized;
        Ok(())
    }

    fn node_pe(&self) -> Result<usize> {
        if self.node_pe_fails.load(Ordering::SeqCst) {
            return Err(ShmemError::Call { call: "nvshmem_team_my_pe", code: -1 });
        }
        Ok(self.node_pe)
    }

    fn my_pe(&self) -> i32 {
        self.inits.lock().last().map_or(-1, |(pe, _, _)| *pe as i32)
    }

    fn n_pes(&self) -> i32 {
        self.inits.lock().last().map_or(-1, |(_, npes, _)| *npes as i32)
    }

    fn init_status(&self) -> InitStatus {
        *self.status.lock()
    }

    fn module_init(&self, module: ModuleHandle) -> Result<()> {
        self.patched.lock().push(module);
        Ok(())
    }
}

/// Records every device binding; also loads modules so it can back a
/// `CompiledModule`.
pub struct MockDevices {
    pub bindings: Mutex<Vec<usize>>,
    next_module: AtomicU64,
}

impl MockDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { bindings: Mutex::new(Vec::new()), next_module: AtomicU64::new(1) })
    }
}

impl DeviceContext for MockDevices {
    fn current_device(&self) -> std::result::Result<usize, DriverError> {
        Ok(self.bindings.lock().last().copied().unwrap_or(0))
    }

    fn set_device(&self, device: usize) -> std::result::Result<(), DriverError> {
        self.bindings.lock().push(device);
        Ok(())
    }
}

impl Driver for MockDevices {
    fn load_module(&self, _image: &[u8]) -> std::result::Result<ModuleHandle, DriverError> {
        Ok(ModuleHandle::from_raw(self.next_module.fetch_add(1, Ordering::SeqCst) << 8))
    }

    fn unload_module(&self, _module: ModuleHandle) -> std::result::Result<(), DriverError> {
        Ok(())
    }

    fn get_function(&self, module: ModuleHandle, _name: &str) -> std::result::Result<FunctionHandle, DriverError> {
        Ok(FunctionHandle::from_raw(module.as_raw() | 0x1))
    }

    fn get_global(&self, module: ModuleHandle, _name: &str) -> std::result::Result<(DevicePtr, usize), DriverError> {
        Ok((DevicePtr::from_raw(module.as_raw() | 0x2), 4))
    }

    fn set_max_dynamic_shared_memory(&self, _func: FunctionHandle, _bytes: u32) -> std::result::Result<(), DriverError> {
        Ok(())
    }

    unsafe fn launch(
        &self,
        _func: FunctionHandle,
        _dims: &LaunchDims,
        _stream: StreamHandle,
        _params: &mut [*mut c_void],
    ) -> std::result::Result<(), DriverError> {
        Ok(())
    }

    fn memset_d32(&self, _ptr: DevicePtr, _value: u32, _count: usize) -> std::result::Result<(), DriverError> {
        Ok(())
    }
}
