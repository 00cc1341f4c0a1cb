//! Saving and loading compiled modules.

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use common::{kernel_module, MockDriver};
use tessel_module::format::meta_file_path;
use tessel_module::{CompiledModule, FunctionTable, ModuleError, ModuleFormat};

fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tessel_artifacts_{}_{}", tag, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_stream_roundtrip() {
    let driver = MockDriver::new();
    let module = kernel_module(Arc::clone(&driver), Some("__global__ void K() {}"));

    let mut buf = Vec::new();
    module.save_to_stream(&mut buf).unwrap();
    let loaded = CompiledModule::load_from_stream(driver.clone(), &mut buf.as_slice()).unwrap();

    assert_eq!(loaded.format(), module.format());
    assert_eq!(loaded.functions(), module.functions());
    assert_eq!(loaded.data(), module.data());
    // Source text is diagnostic only and not part of the stream.
    assert!(loaded.source().is_none());

    let mut again = Vec::new();
    loaded.save_to_stream(&mut again).unwrap();
    assert_eq!(again, buf);
}

#[test]
fn test_file_roundtrip_binary() {
    let dir = temp_dir("binary");
    let path = dir.join("kernels.cubin");
    let driver = MockDriver::new();
    let module = kernel_module(Arc::clone(&driver), None);

    module.save_to_file(&path, "").unwrap();
    assert!(meta_file_path(&path).exists());

    let loaded = CompiledModule::load_from_file(driver, &path, "").unwrap();
    assert_eq!(loaded.format(), ModuleFormat::Cubin);
    assert_eq!(loaded.functions(), module.functions());
    assert_eq!(loaded.data(), module.data());

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_format_hint_overrides_extension() {
    let dir = temp_dir("hint");
    let path = dir.join("kernels.bin");
    let driver = MockDriver::new();
    let module = kernel_module(Arc::clone(&driver), None);

    module.save_to_file(&path, "cubin").unwrap();
    assert!(matches!(
        CompiledModule::load_from_file(driver.clone(), &path, ""),
        Err(ModuleError::UnknownFormat(t)) if t == "bin"
    ));
    let loaded = CompiledModule::load_from_file(driver, &path, "cubin").unwrap();
    assert_eq!(loaded.format(), ModuleFormat::Cubin);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_save_source_requires_retained_text() {
    let dir = temp_dir("source");
    let driver = MockDriver::new();

    let bare = kernel_module(Arc::clone(&driver), None);
    assert!(matches!(bare.save_to_file(&dir.join("a.cu"), ""), Err(ModuleError::MissingSource(_))));

    let src = "extern \"C\" __global__ void K(float* a, float* b) { a[0] = b[0]; }";
    let with_src = kernel_module(Arc::clone(&driver), Some(src));
    with_src.save_to_file(&dir.join("b.cu"), "").unwrap();
    assert_eq!(std::fs::read_to_string(dir.join("b.cu")).unwrap(), src);
    assert!(dir.join("b.tessel_meta.json").exists());

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_save_rejects_other_binary_format() {
    let dir = temp_dir("mismatch");
    let module = kernel_module(MockDriver::new(), None);
    let err = module.save_to_file(&dir.join("k.ptx"), "").unwrap_err();
    assert!(matches!(err, ModuleError::FormatMismatch { ref requested, ref stored } if requested == "ptx" && stored == "cubin"));
    assert!(!dir.join("k.tessel_meta.json").exists());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_missing_or_malformed_sidecar() {
    let dir = temp_dir("sidecar");
    let path = dir.join("k.ptx");
    std::fs::write(&path, ".version 8.0\n.target sm_80\n").unwrap();

    let missing = CompiledModule::load_from_file(MockDriver::new(), &path, "");
    assert!(matches!(missing, Err(ModuleError::Io { .. })));

    std::fs::write(meta_file_path(&path), "[1, 2, 3]").unwrap();
    let malformed = CompiledModule::load_from_file(MockDriver::new(), &path, "");
    assert!(matches!(malformed, Err(ModuleError::Metadata(_))));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_get_source() {
    let driver = MockDriver::new();
    let ptx = ".version 8.0\n.target sm_90\n.entry K() { ret; }\n";

    let ptx_module = CompiledModule::new(
        driver.clone(),
        ptx.as_bytes().to_vec(),
        ModuleFormat::Ptx,
        FunctionTable::new(),
        None,
    );
    assert_eq!(ptx_module.get_source("ptx"), ptx);
    // No retained source: PTX text is the best available listing.
    assert_eq!(ptx_module.get_source("cu"), ptx);

    let with_src = kernel_module(driver.clone(), Some("__global__ void K() {}"));
    assert_eq!(with_src.get_source("cu"), "__global__ void K() {}");
    assert_eq!(with_src.get_source("cubin").as_bytes(), with_src.data());

    let bare = kernel_module(driver, None);
    assert_eq!(bare.get_source(""), "");
}
