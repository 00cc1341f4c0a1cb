//! Typed kernel arguments and the `void**` calling convention.

use std::ffi::c_void;

use crate::driver::DevicePtr;
use crate::error::{ModuleError, Result};

/// One argument value passed to a kernel call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArgValue {
    Int(i64),
    Float(f64),
    Ptr(DevicePtr),
}

impl ArgValue {
    /// Integer view used by launch-parameter extraction.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ArgValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<i64> for ArgValue {
    fn from(v: i64) -> Self {
        ArgValue::Int(v)
    }
}

impl From<f64> for ArgValue {
    fn from(v: f64) -> Self {
        ArgValue::Float(v)
    }
}

impl From<DevicePtr> for ArgValue {
    fn from(p: DevicePtr) -> Self {
        ArgValue::Ptr(p)
    }
}

/// Parameter type declared in a kernel's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Int32,
    Int64,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Handle,
}

impl ArgType {
    /// Parse from a metadata type tag.
    pub fn parse(tag: &str) -> Result<Self> {
        Ok(match tag {
            "int32" => ArgType::Int32,
            "int64" => ArgType::Int64,
            "uint32" => ArgType::UInt32,
            "uint64" => ArgType::UInt64,
            "float32" => ArgType::Float32,
            "float64" => ArgType::Float64,
            "handle" => ArgType::Handle,
            other => return Err(ModuleError::ArgType(other.to_string())),
        })
    }

    fn describe(&self) -> &'static str {
        match self {
            ArgType::Float32 | ArgType::Float64 => "a float",
            ArgType::Handle => "a device pointer",
            _ => "an integer",
        }
    }
}

/// Argument values laid out for `cuLaunchKernel`.
///
/// Every value occupies its own 8-byte slot; narrower types live in the
/// low-address bytes of their slot.
pub struct PackedArgs {
    slots: Vec<u64>,
}

impl PackedArgs {
    /// Pack `args` according to `types`. Trailing launch parameters beyond
    /// `types.len()` are ignored.
    pub fn pack(name: &str, types: &[ArgType], args: &[ArgValue]) -> Result<Self> {
        if args.len() < types.len() {
            return Err(ModuleError::ArgCount {
                name: name.to_string(),
                expected: types.len(),
                actual: args.len(),
            });
        }
        let slots = types
            .iter()
            .zip(args)
            .enumerate()
            .map(|(index, (ty, arg))| {
                encode(*ty, arg).ok_or_else(|| ModuleError::ArgKind {
                    name: name.to_string(),
                    index,
                    expected: ty.describe(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { slots })
    }

    /// One pointer per slot, valid while `self` is alive and not moved.
    pub fn pointers(&mut self) -> Vec<*mut c_void> {
        self.slots.iter_mut().map(|s| s as *mut u64 as *mut c_void).collect()
    }
}

fn encode(ty: ArgType, arg: &ArgValue) -> Option<u64> {
    let mut slot = [0u8; 8];
    match (ty, arg) {
        (ArgType::Int32, ArgValue::Int(v)) => slot[..4].copy_from_slice(&(*v as i32).to_ne_bytes()),
        (ArgType::UInt32, ArgValue::Int(v)) => slot[..4].copy_from_slice(&(*v as u32).to_ne_bytes()),
        (ArgType::Int64 | ArgType::UInt64, ArgValue::Int(v)) => slot.copy_from_slice(&v.to_ne_bytes()),
        (ArgType::Float32, ArgValue::Float(v)) => slot[..4].copy_from_slice(&(*v as f32).to_ne_bytes()),
        (ArgType::Float64, ArgValue::Float(v)) => slot.copy_from_slice(&v.to_ne_bytes()),
        (ArgType::Handle, ArgValue::Ptr(p)) => slot.copy_from_slice(&p.as_raw().to_ne_bytes()),
        _ => return None,
    }
    Some(u64::from_ne_bytes(slot))
}
