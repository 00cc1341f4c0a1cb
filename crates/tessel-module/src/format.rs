//! Compiled-module artifacts: format tags, function metadata, and codecs.
//!
//! On disk a module is a pair of files:
//! ```text
//! kernels.cubin               raw binary (or PTX / CUDA source text)
//! kernels.tessel_meta.json    {"tessel_version": "...", "func_info": {name: FunctionInfo}}
//! ```
//!
//! Embedded in a larger stream it is three length-prefixed fields, in order:
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ format tag      u64 LE len + UTF-8       │
//! │ function table  u64 LE count + entries   │
//! │ binary payload  u64 LE len + bytes       │
//! └──────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ModuleError, Result};

/// Extension of the metadata sidecar written next to every saved artifact.
pub const META_EXTENSION: &str = "tessel_meta.json";

/// Encoding of a module's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleFormat {
    /// SASS object code for a specific architecture.
    Cubin,
    /// PTX intermediate assembly (text).
    Ptx,
    /// Fat binary bundling several cubins and/or PTX.
    Fatbin,
    /// CUDA C++ source. Only valid as a save target for retained source text.
    Cu,
}

impl ModuleFormat {
    /// String tag used in streams and file extensions.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleFormat::Cubin => "cubin",
            ModuleFormat::Ptx => "ptx",
            ModuleFormat::Fatbin => "fatbin",
            ModuleFormat::Cu => "cu",
        }
    }

    /// Parse from string tag.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "cubin" => Some(ModuleFormat::Cubin),
            "ptx" => Some(ModuleFormat::Ptx),
            "fatbin" => Some(ModuleFormat::Fatbin),
            "cu" => Some(ModuleFormat::Cu),
            _ => None,
        }
    }

    /// Resolve the format of `path`: `hint` when non-empty, else the extension.
    pub fn for_file(path: &Path, hint: &str) -> Result<Self> {
        let tag = if hint.is_empty() {
            path.extension().and_then(|e| e.to_str()).unwrap_or_default()
        } else {
            hint
        };
        Self::from_str(tag).ok_or_else(|| ModuleError::UnknownFormat(tag.to_string()))
    }
}

impl fmt::Display for ModuleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Calling metadata for one exported kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    /// One type tag per kernel parameter (`int32`, `float32`, `handle`, ...).
    pub arg_types: Vec<String>,
    /// Launch tags, each consuming one trailing integer argument.
    #[serde(default)]
    pub launch_param_tags: Vec<String>,
}

impl FunctionInfo {
    pub fn new(name: impl Into<String>, arg_types: &[&str], launch_param_tags: &[&str]) -> Self {
        Self {
            name: name.into(),
            arg_types: arg_types.iter().map(|s| s.to_string()).collect(),
            launch_param_tags: launch_param_tags.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Exported symbol name → calling metadata.
pub type FunctionTable = BTreeMap<String, FunctionInfo>;

#[derive(Serialize, Deserialize)]
struct MetaFile {
    tessel_version: String,
    func_info: FunctionTable,
}

/// Sidecar path for an artifact: `dir/kernels.cubin` → `dir/kernels.tessel_meta.json`.
pub fn meta_file_path(path: &Path) -> PathBuf {
    path.with_extension(META_EXTENSION)
}

/// Write `table` as a JSON sidecar.
pub fn save_metadata(path: &Path, table: &FunctionTable) -> Result<()> {
    let meta = MetaFile {
        tessel_version: env!("CARGO_PKG_VERSION").to_string(),
        func_info: table.clone(),
    };
    let json = serde_json::to_string_pretty(&meta)
        .map_err(|e| ModuleError::Metadata(e.to_string()))?;
    std::fs::write(path, json).map_err(|source| ModuleError::Io { path: path.to_path_buf(), source })
}

/// Read a JSON sidecar.
pub fn load_metadata(path: &Path) -> Result<FunctionTable> {
    let text = std::fs::read_to_string(path)
        .map_err(|source| ModuleError::Io { path: path.to_path_buf(), source })?;
    let meta: MetaFile = serde_json::from_str(&text)
        .map_err(|e| ModuleError::Metadata(format!("{}: {}", path.display(), e)))?;
    Ok(meta.func_info)
}

// ---------------------------------------------------------------------------
// Stream codec
// ---------------------------------------------------------------------------

/// Write format, function table and payload in stream order.
pub fn write_module<W: Write>(
    w: &mut W,
    format: ModuleFormat,
    table: &FunctionTable,
    data: &[u8],
) -> Result<()> {
    write_bytes(w, format.as_str().as_bytes())?;
    write_len(w, table.len())?;
    for (key, info) in table {
        write_bytes(w, key.as_bytes())?;
        write_bytes(w, info.name.as_bytes())?;
        write_list(w, &info.arg_types)?;
        write_list(w, &info.launch_param_tags)?;
    }
    write_bytes(w, data)
}

/// Read format, function table and payload in stream order.
pub fn read_module<R: Read>(r: &mut R) -> Result<(ModuleFormat, FunctionTable, Vec<u8>)> {
    let tag = read_string(r)?;
    let format = ModuleFormat::from_str(&tag).ok_or(ModuleError::UnknownFormat(tag))?;
    let count = read_len(r)?;
    let mut table = FunctionTable::new();
    for _ in 0..count {
        let key = read_string(r)?;
        let info = FunctionInfo {
            name: read_string(r)?,
            arg_types: read_list(r)?,
            launch_param_tags: read_list(r)?,
        };
        table.insert(key, info);
    }
    let data = read_bytes(r)?;
    Ok((format, table, data))
}

fn write_len<W: Write>(w: &mut W, len: usize) -> Result<()> {
    w.write_all(&(len as u64).to_le_bytes()).map_err(ModuleError::Stream)
}

fn write_bytes<W: Write>(w: &mut W, bytes: &[u8]) -> Result<()> {
    write_len(w, bytes.len())?;
    w.write_all(bytes).map_err(ModuleError::Stream)
}

fn write_list<W: Write>(w: &mut W, items: &[String]) -> Result<()> {
    write_len(w, items.len())?;
    items.iter().try_for_each(|s| write_bytes(w, s.as_bytes()))
}

fn read_len<R: Read>(r: &mut R) -> Result<usize> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(ModuleError::Stream)?;
    usize::try_from(u64::from_le_bytes(buf))
        .map_err(|_| ModuleError::Metadata("length prefix overflows usize".into()))
}

fn read_bytes<R: Read>(r: &mut R) -> Result<Vec<u8>> {
    let len = read_len(r)?;
    // Allocation follows the bytes actually read, not the prefix.
    let mut buf = Vec::new();
    r.take(len as u64).read_to_end(&mut buf).map_err(ModuleError::Stream)?;
    if buf.len() != len {
        return Err(ModuleError::Metadata(format!(
            "truncated field: expected {} bytes, got {}",
            len,
            buf.len()
        )));
    }
    Ok(buf)
}

fn read_string<R: Read>(r: &mut R) -> Result<String> {
    String::from_utf8(read_bytes(r)?).map_err(|_| ModuleError::Metadata("field is not valid UTF-8".into()))
}

fn read_list<R: Read>(r: &mut R) -> Result<Vec<String>> {
    let count = read_len(r)?;
    (0..count).map(|_| read_string(r)).collect()
}
