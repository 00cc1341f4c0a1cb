//! Post-load hooks.
//!
//! A hook observes every device module right after it is loaded, while the
//! owning module's realization lock is still held. The symmetric-memory
//! bootstrap uses this to patch its symbols into freshly loaded modules
//! without the module manager depending on it.
//!
//! Hooks are either injected into a [`CompiledModule`](crate::CompiledModule)
//! directly or registered here by name. The registry is meant to be filled at
//! process start and cleared at shutdown.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::driver::ModuleHandle;

/// Registry name of the hook consulted by every module realization.
pub const MODULE_LOAD_HOOK: &str = "tessel.shmem.module_init";

pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Observer of freshly loaded device modules.
///
/// Called with the realization lock held: implementations must not call
/// back into the same `CompiledModule`.
pub trait ModuleLoadHook: Send + Sync {
    fn on_module_loaded(&self, device: usize, module: ModuleHandle) -> Result<(), HookError>;
}

impl<F> ModuleLoadHook for F
where
    F: Fn(usize, ModuleHandle) -> Result<(), HookError> + Send + Sync,
{
    fn on_module_loaded(&self, device: usize, module: ModuleHandle) -> Result<(), HookError> {
        self(device, module)
    }
}

static HOOKS: OnceLock<RwLock<HashMap<String, Arc<dyn ModuleLoadHook>>>> = OnceLock::new();

fn hooks() -> &'static RwLock<HashMap<String, Arc<dyn ModuleLoadHook>>> {
    HOOKS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register `hook` under `name`, returning the hook it replaced.
pub fn register(name: &str, hook: Arc<dyn ModuleLoadHook>) -> Option<Arc<dyn ModuleLoadHook>> {
    tracing::debug!("registering module-load hook '{}'", name);
    hooks().write().insert(name.to_string(), hook)
}

/// Remove the hook registered under `name`.
pub fn unregister(name: &str) -> Option<Arc<dyn ModuleLoadHook>> {
    hooks().write().remove(name)
}

/// Look up a hook by name. Absence is not an error.
pub fn lookup(name: &str) -> Option<Arc<dyn ModuleLoadHook>> {
    hooks().read().get(name).cloned()
}

/// Drop every registered hook.
pub fn clear() {
    hooks().write().clear();
}
