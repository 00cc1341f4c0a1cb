//! Process-wide install; kept in its own test binary since the registry is
//! global.

mod common;

use std::sync::Arc;

use common::{MockBackend, MockDevices};
use tessel_module::{hook, CompiledModule, FunctionTable, ModuleFormat, MODULE_LOAD_HOOK};
use tessel_shmem::{registry, Bootstrap, ShmemError};

fn module(devices: Arc<MockDevices>) -> CompiledModule {
    CompiledModule::new(devices, b"cubin".to_vec(), ModuleFormat::Cubin, FunctionTable::new(), None)
}

#[test]
fn test_install_lifecycle() {
    assert!(matches!(registry::init_join_token(), Err(ShmemError::NotInstalled)));
    assert!(matches!(registry::init(&[], 1, 0), Err(ShmemError::NotInstalled)));
    assert!(matches!(registry::init_from_json("{}"), Err(ShmemError::NotInstalled)));
    assert!(hook::lookup(MODULE_LOAD_HOOK).is_none());

    let backend = MockBackend::new(0);
    let devices = MockDevices::new();
    registry::install(Arc::new(Bootstrap::new(backend.clone(), devices.clone())));
    assert!(hook::lookup(MODULE_LOAD_HOOK).is_some());

    // Loaded before the join: nothing to patch yet.
    let early = module(devices.clone());
    let early_handle = early.realize(0).unwrap();
    assert!(backend.patched.lock().is_empty());

    let token = registry::init_join_token().unwrap();
    let outcome = registry::init(&token, 1, 0).unwrap();
    assert_eq!(outcome.node_pe, 0);

    // Loaded after the join: patched by the hook during realization.
    let late = module(devices.clone());
    let late_handle = late.realize(0).unwrap();
    assert_eq!(*backend.patched.lock(), vec![late_handle]);

    // The early module is patched only when asked explicitly.
    assert!(registry::module_init(early_handle).unwrap());
    assert_eq!(*backend.patched.lock(), vec![late_handle, early_handle]);

    assert!(registry::uninstall().is_some());
    assert!(registry::installed().is_none());
    assert!(hook::lookup(MODULE_LOAD_HOOK).is_none());
    assert!(matches!(registry::module_init(early_handle), Err(ShmemError::NotInstalled)));
}
