//! Callable adapters over a [`CompiledModule`].
//!
//! Each adapter caches one resolved value per device. Once resolved an entry
//! is read lock-free; the first resolution per device is serialized so that
//! its side effects (shared memory opt-in) happen at most once.

use std::ffi::c_void;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::args::{ArgType, ArgValue, PackedArgs};
use crate::driver::{DevicePtr, FunctionHandle, MAX_DEVICES};
use crate::error::{ModuleError, Result};
use crate::format::FunctionInfo;
use crate::launch::{LaunchParamConfig, ThreadWorkLoad};
use crate::module::{check_device, CompiledModule, GLOBAL_BARRIER_STATE, PREPARE_GLOBAL_BARRIER};
use crate::stream;

/// Per-device resolved values. Zero means unresolved.
struct DeviceCache {
    entries: [AtomicU64; MAX_DEVICES],
    resolve: Mutex<()>,
}

impl DeviceCache {
    fn new() -> Self {
        Self { entries: std::array::from_fn(|_| AtomicU64::new(0)), resolve: Mutex::new(()) }
    }

    fn get_or_resolve(&self, device: usize, resolve: impl FnOnce() -> Result<u64>) -> Result<u64> {
        let cached = self.entries[device].load(Ordering::Acquire);
        if cached != 0 {
            return Ok(cached);
        }
        let _guard = self.resolve.lock();
        let cached = self.entries[device].load(Ordering::Acquire);
        if cached != 0 {
            return Ok(cached);
        }
        let value = resolve()?;
        self.entries[device].store(value, Ordering::Release);
        Ok(value)
    }
}

/// Launches one exported kernel.
pub struct KernelFunction {
    module: CompiledModule,
    name: String,
    arg_types: Vec<ArgType>,
    launch: LaunchParamConfig,
    handles: DeviceCache,
}

impl KernelFunction {
    pub(crate) fn new(module: CompiledModule, name: &str, info: &FunctionInfo) -> Result<Self> {
        let arg_types = info.arg_types.iter().map(|t| ArgType::parse(t)).collect::<Result<Vec<_>>>()?;
        let launch = LaunchParamConfig::new(arg_types.len(), &info.launch_param_tags)?;
        Ok(Self { module, name: name.to_string(), arg_types, launch, handles: DeviceCache::new() })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total arguments a call takes: kernel parameters then launch values.
    pub fn arity(&self) -> usize {
        self.launch.arity()
    }

    /// Pack `args` by the declared parameter types and launch on the
    /// calling thread's current device and stream.
    pub fn call(&self, args: &[ArgValue]) -> Result<()> {
        let mut packed = PackedArgs::pack(&self.name, &self.arg_types, args)?;
        let mut params = packed.pointers();
        // Safety: every pointer addresses a slot of `packed`, encoded from the
        // declared parameter type, and `packed` outlives the launch call.
        unsafe { self.invoke(args, &mut params) }
    }

    /// Like [`call`](Self::call), binding `device` first.
    pub fn call_on(&self, device: usize, args: &[ArgValue]) -> Result<()> {
        self.module.driver().set_device(device)?;
        self.call(args)
    }

    /// Launch with caller-packed parameters on the current device.
    ///
    /// `args` supplies the launch values (its trailing entries); `params`
    /// is handed to the driver unchanged.
    ///
    /// # Safety
    /// `params` must hold one valid pointer per kernel parameter, each
    /// pointing at a value laid out as the kernel expects.
    pub unsafe fn invoke(&self, args: &[ArgValue], params: &mut [*mut c_void]) -> Result<()> {
        let device = self.module.driver().current_device()?;
        check_device(device)?;
        let wl = self.launch.extract(&self.name, args)?;
        let func = self.function_for(device, &wl)?;

        match self.module.driver().launch(func, &wl.dims(), stream::current(), params) {
            Ok(()) => Ok(()),
            Err(e) if e.is_deinitialized() => {
                tracing::debug!("ignoring launch of {} after driver teardown", self.name);
                Ok(())
            }
            Err(source) => {
                let err = ModuleError::Launch {
                    name: self.name.clone(),
                    grid: wl.grid,
                    block: wl.block,
                    source,
                    listing: self.source_listing(),
                };
                tracing::error!("{}", err);
                Err(err)
            }
        }
    }

    fn function_for(&self, device: usize, wl: &ThreadWorkLoad) -> Result<FunctionHandle> {
        let raw = self.handles.get_or_resolve(device, || {
            let func = self.module.get_function(device, &self.name)?;
            if wl.needs_shmem_opt_in() {
                // The requested size is assumed stable for this function on this device.
                self.module
                    .driver()
                    .set_max_dynamic_shared_memory(func, wl.dyn_shmem_bytes)
                    .map_err(|source| ModuleError::SharedMemoryConfig {
                        name: self.name.clone(),
                        bytes: wl.dyn_shmem_bytes,
                        source,
                    })?;
            }
            tracing::debug!("resolved {} on device {}", self.name, device);
            Ok(func.as_raw())
        })?;
        Ok(FunctionHandle::from_raw(raw))
    }

    fn source_listing(&self) -> String {
        let src = self.module.get_source("");
        if src.is_empty() {
            return String::new();
        }
        format!("\n// func_name={}\n// CUDA Source\n// -----------\n{}", self.name, src)
    }
}

/// Resets the module's global barrier counter on the current device.
pub struct GlobalBarrier {
    module: CompiledModule,
    state: DeviceCache,
}

impl GlobalBarrier {
    pub(crate) fn new(module: CompiledModule) -> Self {
        Self { module, state: DeviceCache::new() }
    }

    pub fn call(&self) -> Result<()> {
        let device = self.module.driver().current_device()?;
        self.reset(device)
    }

    pub fn call_on(&self, device: usize) -> Result<()> {
        self.module.driver().set_device(device)?;
        self.reset(device)
    }

    fn reset(&self, device: usize) -> Result<()> {
        check_device(device)?;
        let raw = self.state.get_or_resolve(device, || {
            self.module
                .get_global(device, GLOBAL_BARRIER_STATE, std::mem::size_of::<u32>())
                .map(DevicePtr::as_raw)
        })?;
        self.module
            .driver()
            .memset_d32(DevicePtr::from_raw(raw), 0, 1)
            .map_err(|source| ModuleError::BarrierReset { device, source })
    }
}

/// Anything [`CompiledModule::resolve_function`] can hand out.
pub enum PackedFunction {
    Kernel(KernelFunction),
    PrepareGlobalBarrier(GlobalBarrier),
}

impl PackedFunction {
    pub fn name(&self) -> &str {
        match self {
            PackedFunction::Kernel(k) => k.name(),
            PackedFunction::PrepareGlobalBarrier(_) => PREPARE_GLOBAL_BARRIER,
        }
    }

    /// Invoke on the current device. The barrier reset takes no arguments.
    pub fn call(&self, args: &[ArgValue]) -> Result<()> {
        match self {
            PackedFunction::Kernel(k) => k.call(args),
            PackedFunction::PrepareGlobalBarrier(b) => b.call(),
        }
    }

    pub fn call_on(&self, device: usize, args: &[ArgValue]) -> Result<()> {
        match self {
            PackedFunction::Kernel(k) => k.call_on(device, args),
            PackedFunction::PrepareGlobalBarrier(b) => b.call_on(device),
        }
    }

    pub fn as_kernel(&self) -> Option<&KernelFunction> {
        match self {
            PackedFunction::Kernel(k) => Some(k),
            _ => None,
        }
    }
}
