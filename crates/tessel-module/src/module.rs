//! Compiled modules and their lazily realized per-device instances.
//!
//! A [`CompiledModule`] owns one immutable binary blob. The first time a
//! function is needed on a device, the blob is loaded into that device's
//! context and the handle is kept until the last holder drops the module.
//! Handles are never reloaded or invalidated.

use std::borrow::Cow;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::driver::{DevicePtr, Driver, FunctionHandle, ModuleHandle, MAX_DEVICES};
use crate::error::{ModuleError, Result};
use crate::format::{self, FunctionTable, ModuleFormat};
use crate::function::{GlobalBarrier, KernelFunction, PackedFunction};
use crate::hook::{self, ModuleLoadHook, MODULE_LOAD_HOOK};

/// Name device modules reserve for a host-side entry point; never resolvable.
pub const MAIN_SYMBOL: &str = "__tessel_main__";

/// Pseudo-function that resets the global barrier state before a cooperative launch.
pub const PREPARE_GLOBAL_BARRIER: &str = "__tessel_prepare_global_barrier";

/// Device-global counter used by grid-wide barriers in device code.
pub const GLOBAL_BARRIER_STATE: &str = "__tessel_global_barrier_state";

struct Realization {
    slots: [Option<ModuleHandle>; MAX_DEVICES],
    hook: Option<Arc<dyn ModuleLoadHook>>,
}

struct ModuleNode {
    driver: Arc<dyn Driver>,
    data: Vec<u8>,
    format: ModuleFormat,
    functions: FunctionTable,
    source: Option<String>,
    realization: Mutex<Realization>,
}

impl Drop for ModuleNode {
    fn drop(&mut self) {
        let realization = self.realization.get_mut();
        for (device, slot) in realization.slots.iter_mut().enumerate() {
            let Some(module) = slot.take() else { continue };
            let result = self
                .driver
                .set_device(device)
                .and_then(|()| self.driver.unload_module(module));
            if let Err(e) = result {
                tracing::error!("failed to unload module on device {}: {}", device, e);
            }
        }
    }
}

/// A compiled binary plus calling metadata, realized lazily on each device.
///
/// Cloning is cheap and shares the per-device state.
#[derive(Clone)]
pub struct CompiledModule {
    node: Arc<ModuleNode>,
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("format", &self.node.format)
            .field("bytes", &self.node.data.len())
            .field("functions", &self.node.functions.keys().collect::<Vec<_>>())
            .field("has_source", &self.node.source.is_some())
            .finish()
    }
}

impl CompiledModule {
    pub fn new(
        driver: Arc<dyn Driver>,
        data: Vec<u8>,
        format: ModuleFormat,
        functions: FunctionTable,
        source: Option<String>,
    ) -> Self {
        Self {
            node: Arc::new(ModuleNode {
                driver,
                data,
                format,
                functions,
                source: source.filter(|s| !s.is_empty()),
                realization: Mutex::new(Realization { slots: [None; MAX_DEVICES], hook: None }),
            }),
        }
    }

    /// Load an artifact and its metadata sidecar.
    ///
    /// The format is `format_hint` when non-empty, else the file extension.
    pub fn load_from_file(driver: Arc<dyn Driver>, path: &Path, format_hint: &str) -> Result<Self> {
        let format = ModuleFormat::for_file(path, format_hint)?;
        let functions = format::load_metadata(&format::meta_file_path(path))?;
        let data = std::fs::read(path).map_err(|source| ModuleError::Io { path: path.to_path_buf(), source })?;
        tracing::debug!("loaded {} module from {} ({} bytes)", format, path.display(), data.len());
        Ok(Self::new(driver, data, format, functions, None))
    }

    /// Read a module written by [`save_to_stream`](Self::save_to_stream).
    pub fn load_from_stream<R: Read>(driver: Arc<dyn Driver>, reader: &mut R) -> Result<Self> {
        let (format, functions, data) = format::read_module(reader)?;
        Ok(Self::new(driver, data, format, functions, None))
    }

    pub fn save_to_stream<W: Write>(&self, writer: &mut W) -> Result<()> {
        format::write_module(writer, self.node.format, &self.node.functions, &self.node.data)
    }

    /// Write the artifact and its metadata sidecar.
    ///
    /// Saving as `cu` writes the retained source text; any other format must
    /// match the stored binary format.
    pub fn save_to_file(&self, path: &Path, format: &str) -> Result<()> {
        let format = ModuleFormat::for_file(path, format)?;
        let payload: &[u8] = if format == ModuleFormat::Cu {
            self.node
                .source
                .as_deref()
                .ok_or_else(|| ModuleError::MissingSource(format.to_string()))?
                .as_bytes()
        } else if format == self.node.format {
            &self.node.data
        } else {
            return Err(ModuleError::FormatMismatch {
                requested: format.to_string(),
                stored: self.node.format.to_string(),
            });
        };
        format::save_metadata(&format::meta_file_path(path), &self.node.functions)?;
        std::fs::write(path, payload).map_err(|source| ModuleError::Io { path: path.to_path_buf(), source })
    }

    /// Source for diagnostics.
    ///
    /// The payload when `format` names the stored format; otherwise the
    /// retained source text; otherwise the payload if it is PTX; else empty.
    pub fn get_source(&self, format: &str) -> Cow<'_, str> {
        if format == self.node.format.as_str() {
            return String::from_utf8_lossy(&self.node.data);
        }
        if let Some(src) = &self.node.source {
            return Cow::Borrowed(src.as_str());
        }
        if self.node.format == ModuleFormat::Ptx {
            return String::from_utf8_lossy(&self.node.data);
        }
        Cow::Borrowed("")
    }

    /// Look up a callable by symbol name.
    ///
    /// Returns `Ok(None)` when the module exports no such function.
    pub fn resolve_function(&self, name: &str) -> Result<Option<PackedFunction>> {
        if name == MAIN_SYMBOL {
            return Err(ModuleError::MainEntry);
        }
        if name == PREPARE_GLOBAL_BARRIER {
            return Ok(Some(PackedFunction::PrepareGlobalBarrier(GlobalBarrier::new(self.clone()))));
        }
        let Some(info) = self.node.functions.get(name) else {
            return Ok(None);
        };
        KernelFunction::new(self.clone(), name, info).map(|f| Some(PackedFunction::Kernel(f)))
    }

    /// Inject a post-load hook, taking precedence over the registry.
    ///
    /// Only affects devices realized after the call.
    pub fn set_load_hook(&self, hook: Arc<dyn ModuleLoadHook>) {
        self.node.realization.lock().hook = Some(hook);
    }

    pub fn format(&self) -> ModuleFormat {
        self.node.format
    }

    pub fn functions(&self) -> &FunctionTable {
        &self.node.functions
    }

    pub fn data(&self) -> &[u8] {
        &self.node.data
    }

    pub fn source(&self) -> Option<&str> {
        self.node.source.as_deref()
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.node.driver
    }

    /// Whether the module has been realized on `device`.
    pub fn is_loaded(&self, device: usize) -> bool {
        device < MAX_DEVICES && self.node.realization.lock().slots[device].is_some()
    }

    /// Device module handle for `device`, loading it on first use.
    ///
    /// Binds `device` on the calling thread. A load whose post-load hook
    /// fails is unloaded again, so the next call retries from scratch.
    pub fn realize(&self, device: usize) -> Result<ModuleHandle> {
        check_device(device)?;
        self.node.driver.set_device(device)?;
        // Always lock before checking: realization happens once per device and
        // the hook must observe the handle before anyone else uses it.
        let mut realization = self.node.realization.lock();
        if let Some(module) = realization.slots[device] {
            return Ok(module);
        }
        let module = self
            .node
            .driver
            .load_module(&self.node.data)
            .map_err(|source| ModuleError::ModuleLoad { device, source })?;
        realization.slots[device] = Some(module);
        tracing::debug!("realized {} module on device {}", self.node.format, device);

        let hook = realization.hook.clone().or_else(|| hook::lookup(MODULE_LOAD_HOOK));
        if let Some(hook) = hook {
            if let Err(source) = hook.on_module_loaded(device, module) {
                realization.slots[device] = None;
                if let Err(e) = self.node.driver.unload_module(module) {
                    tracing::error!("failed to unload unpatched module on device {}: {}", device, e);
                }
                return Err(ModuleError::LoadHook { device, source });
            }
        }
        Ok(module)
    }

    /// Table entries the binary loaded on `device` does not export.
    ///
    /// Unlike [`resolve_function`](Self::resolve_function), which only
    /// consults the table, this asks the driver for every symbol.
    pub fn missing_exports(&self, device: usize) -> Result<Vec<String>> {
        let module = self.realize(device)?;
        Ok(self
            .node
            .functions
            .keys()
            .filter(|name| self.node.driver.get_function(module, name).is_err())
            .cloned()
            .collect())
    }

    pub(crate) fn get_function(&self, device: usize, name: &str) -> Result<FunctionHandle> {
        let module = self.realize(device)?;
        self.node
            .driver
            .get_function(module, name)
            .map_err(|source| ModuleError::FunctionLookup { name: name.to_string(), device, source })
    }

    pub(crate) fn get_global(&self, device: usize, name: &str, expect_bytes: usize) -> Result<DevicePtr> {
        let module = self.realize(device)?;
        let (ptr, nbytes) = self
            .node
            .driver
            .get_global(module, name)
            .map_err(|source| ModuleError::GlobalLookup { name: name.to_string(), device, source })?;
        if nbytes != expect_bytes {
            return Err(ModuleError::GlobalSize { name: name.to_string(), expected: expect_bytes, actual: nbytes });
        }
        Ok(ptr)
    }
}

pub(crate) fn check_device(device: usize) -> Result<()> {
    if device < MAX_DEVICES {
        Ok(())
    } else {
        Err(ModuleError::DeviceOutOfRange { device })
    }
}
