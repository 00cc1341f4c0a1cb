//! Launch-parameter extraction.
//!
//! A kernel's metadata lists launch tags after its parameter types. At call
//! time the caller appends one integer per tag to the argument list; the tags
//! say which grid/block extent (or the dynamic shared memory size) each one is.

use crate::args::ArgValue;
use crate::driver::LaunchDims;
use crate::error::{ModuleError, Result};

/// Tag whose argument carries the dynamic shared memory size in bytes.
pub const DYN_SHMEM_TAG: &str = "tir.use_dyn_shared_memory";

/// Dynamic shared memory at or above this size needs an explicit opt-in.
pub const DYN_SHMEM_OPT_IN_BYTES: u32 = 48 << 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Grid(usize),
    Block(usize),
    DynShmem,
}

impl Slot {
    fn parse(tag: &str) -> Result<Self> {
        let axis = |s: &str| match s {
            "x" => Some(0),
            "y" => Some(1),
            "z" => Some(2),
            _ => None,
        };
        if tag == DYN_SHMEM_TAG {
            return Ok(Slot::DynShmem);
        }
        let parsed = if let Some(a) = tag.strip_prefix("blockIdx.") {
            axis(a).map(Slot::Grid)
        } else if let Some(a) = tag.strip_prefix("threadIdx.") {
            axis(a).map(Slot::Block)
        } else {
            None
        };
        parsed.ok_or_else(|| ModuleError::LaunchTag(tag.to_string()))
    }
}

/// Grid/block extents and dynamic shared memory for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadWorkLoad {
    pub grid: [u32; 3],
    pub block: [u32; 3],
    pub dyn_shmem_bytes: u32,
}

impl Default for ThreadWorkLoad {
    fn default() -> Self {
        Self { grid: [1; 3], block: [1; 3], dyn_shmem_bytes: 0 }
    }
}

impl ThreadWorkLoad {
    pub fn dims(&self) -> LaunchDims {
        LaunchDims { grid: self.grid, block: self.block, dyn_shmem_bytes: self.dyn_shmem_bytes }
    }

    /// Whether this launch needs the dynamic shared memory opt-in attribute.
    pub fn needs_shmem_opt_in(&self) -> bool {
        self.dyn_shmem_bytes >= DYN_SHMEM_OPT_IN_BYTES
    }
}

/// Maps a kernel's launch tags onto its trailing arguments.
#[derive(Debug, Clone)]
pub struct LaunchParamConfig {
    base_args: usize,
    slots: Vec<Slot>,
}

impl LaunchParamConfig {
    /// `base_args` is the number of real kernel parameters preceding the
    /// launch arguments.
    pub fn new(base_args: usize, tags: &[String]) -> Result<Self> {
        let slots = tags.iter().map(|t| Slot::parse(t)).collect::<Result<Vec<_>>>()?;
        Ok(Self { base_args, slots })
    }

    /// Total arguments a call must supply.
    pub fn arity(&self) -> usize {
        self.base_args + self.slots.len()
    }

    pub fn extract(&self, name: &str, args: &[ArgValue]) -> Result<ThreadWorkLoad> {
        if args.len() < self.arity() {
            return Err(ModuleError::ArgCount {
                name: name.to_string(),
                expected: self.arity(),
                actual: args.len(),
            });
        }
        let mut wl = ThreadWorkLoad::default();
        for (i, slot) in self.slots.iter().enumerate() {
            let index = self.base_args + i;
            let value = args[index]
                .as_int()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| ModuleError::ArgKind {
                    name: name.to_string(),
                    index,
                    expected: "a non-negative 32-bit integer",
                })?;
            match *slot {
                Slot::Grid(axis) => wl.grid[axis] = value,
                Slot::Block(axis) => wl.block[axis] = value,
                Slot::DynShmem => wl.dyn_shmem_bytes = value,
            }
        }
        Ok(wl)
    }
}
