//! # tessel-module
//!
//! Lifecycle of compiled CUDA modules across the devices of one process.
//!
//! Provides:
//! - `CompiledModule`: one immutable binary, lazily loaded once per device
//! - Kernel call adapters with per-device handle caching and dynamic shared
//!   memory opt-in
//! - The global-barrier reset pseudo-function
//! - Artifact save/load (file pair and stream)
//! - A runtime-loaded CUDA driver behind the `Driver` trait
//! - Post-load hooks so other subsystems can patch freshly loaded modules
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tessel_module::{ArgValue, CompiledModule, CudaDriver, Driver};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let driver: Arc<dyn Driver> = Arc::new(CudaDriver::new()?);
//! let module = CompiledModule::load_from_file(driver, "kernels.cubin".as_ref(), "")?;
//! if let Some(f) = module.resolve_function("scale")? {
//!     f.call(&[ArgValue::Int(1024), ArgValue::Int(4), ArgValue::Int(256)])?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod args;
pub mod driver;
pub mod error;
pub mod format;
pub mod function;
pub mod hook;
pub mod launch;
pub mod module;
pub mod stream;

pub use args::{ArgType, ArgValue};
pub use driver::{
    CudaDriver, DeviceContext, DevicePtr, Driver, DriverError, FunctionHandle, LaunchDims,
    ModuleHandle, StreamHandle, MAX_DEVICES,
};
pub use error::{ModuleError, Result};
pub use format::{FunctionInfo, FunctionTable, ModuleFormat};
pub use function::{GlobalBarrier, KernelFunction, PackedFunction};
pub use hook::{HookError, ModuleLoadHook, MODULE_LOAD_HOOK};
pub use launch::{LaunchParamConfig, ThreadWorkLoad};
pub use module::{CompiledModule, GLOBAL_BARRIER_STATE, MAIN_SYMBOL, PREPARE_GLOBAL_BARRIER};
