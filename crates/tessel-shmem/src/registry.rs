//! Process-wide bootstrap and its four entry points.
//!
//! [`install`] makes a [`Bootstrap`] the process's bootstrap and registers it
//! as the module-load hook, so every module realized afterwards is patched
//! once the layer is up. Install at process start, [`uninstall`] at shutdown.

use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tessel_module::{hook, CudaDriver, ModuleHandle, ModuleLoadHook, MODULE_LOAD_HOOK};

use crate::backend::NvshmemBackend;
use crate::bootstrap::{Bootstrap, JoinOutcome};
use crate::error::{Result, ShmemError};

static INSTALLED: OnceLock<RwLock<Option<Arc<Bootstrap>>>> = OnceLock::new();

fn slot() -> &'static RwLock<Option<Arc<Bootstrap>>> {
    INSTALLED.get_or_init(|| RwLock::new(None))
}

/// Install `bootstrap`, replacing any previous one.
pub fn install(bootstrap: Arc<Bootstrap>) {
    let hook: Arc<dyn ModuleLoadHook> = bootstrap.clone();
    hook::register(MODULE_LOAD_HOOK, hook);
    *slot().write() = Some(bootstrap);
}

/// Install a bootstrap over the NVSHMEM host library and the CUDA driver.
pub fn install_default() -> Result<Arc<Bootstrap>> {
    let backend = Arc::new(NvshmemBackend::load()?);
    let devices = Arc::new(CudaDriver::new()?);
    let bootstrap = Arc::new(Bootstrap::new(backend, devices));
    install(Arc::clone(&bootstrap));
    tracing::info!("installed NVSHMEM bootstrap");
    Ok(bootstrap)
}

/// Remove the installed bootstrap and its hook.
pub fn uninstall() -> Option<Arc<Bootstrap>> {
    hook::unregister(MODULE_LOAD_HOOK);
    slot().write().take()
}

pub fn installed() -> Option<Arc<Bootstrap>> {
    slot().read().clone()
}

fn require() -> Result<Arc<Bootstrap>> {
    installed().ok_or(ShmemError::NotInstalled)
}

/// Generate a join token with the installed bootstrap.
pub fn init_join_token() -> Result<Vec<i64>> {
    require()?.generate_join_token()
}

/// Join with the installed bootstrap.
pub fn init(token: &[i64], num_workers: u32, worker_id_start: u32) -> Result<JoinOutcome> {
    require()?.join(token, num_workers, worker_id_start)
}

pub fn init_from_json(text: &str) -> Result<JoinOutcome> {
    require()?.join_from_json(text)
}

/// Patch a loaded device module with the installed bootstrap.
pub fn module_init(module: ModuleHandle) -> Result<bool> {
    require()?.maybe_patch_module(module)
}
