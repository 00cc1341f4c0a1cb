//! Runtime-loaded NVSHMEM host API via dlopen.
//!
//! Works with any NVSHMEM install that ships the host library; set
//! `TESSEL_NVSHMEM_LIBRARY` to load a specific file.

use std::ffi::{c_char, c_int, c_uint, c_void};
use std::sync::OnceLock;

use libloading::Library;

use crate::error::{Result, ShmemError};
use crate::token::UNIQUEID_PADDING;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const NVSHMEMX_INIT_WITH_UNIQUEID: c_uint = 1 << 3;
pub const NVSHMEMX_TEAM_NODE: c_int = 2;

pub const NVSHMEM_STATUS_NOT_INITIALIZED: c_int = 0;
pub const NVSHMEM_STATUS_IS_BOOTSTRAPPED: c_int = 1;
pub const NVSHMEM_STATUS_IS_INITIALIZED: c_int = 2;
pub const NVSHMEM_STATUS_LIMITED_MPG: c_int = 3;
pub const NVSHMEM_STATUS_FULL_MPG: c_int = 4;

/// Reserved bytes of `nvshmemx_init_args_t`.
const INIT_ARGS_CONTENT_BYTES: usize = 96;

// ---------------------------------------------------------------------------
// Structs
// ---------------------------------------------------------------------------

/// Version tag of a versioned NVSHMEM struct: major 1 plus its size.
const fn struct_version(size: usize) -> c_int {
    (1 << 16) + size as c_int
}

#[repr(C)]
pub struct NvshmemUniqueId {
    pub version: c_int,
    pub internal: [c_char; UNIQUEID_PADDING],
}

impl NvshmemUniqueId {
    pub fn zeroed() -> Self {
        Self { version: 0, internal: [0; UNIQUEID_PADDING] }
    }
}

/// `nvshmemx_uniqueid_args_t`
#[repr(C)]
pub struct NvshmemUniqueIdArgs {
    pub version: c_int,
    pub id: *mut NvshmemUniqueId,
    pub myrank: c_int,
    pub nranks: c_int,
}

/// `nvshmemx_init_args_t`
#[repr(C)]
pub struct NvshmemInitArgs {
    pub version: c_int,
    pub uid_args: NvshmemUniqueIdArgs,
    pub content: [c_char; INIT_ARGS_CONTENT_BYTES],
}

/// `nvshmemx_init_attr_t`
#[repr(C)]
pub struct NvshmemInitAttr {
    pub version: c_int,
    pub mpi_comm: *mut c_void,
    pub args: NvshmemInitArgs,
}

pub const UNIQUEID_ARGS_VERSION: c_int = struct_version(std::mem::size_of::<NvshmemUniqueIdArgs>());
pub const INIT_ARGS_VERSION: c_int = struct_version(std::mem::size_of::<NvshmemInitArgs>());
pub const INIT_ATTR_VERSION: c_int = struct_version(std::mem::size_of::<NvshmemInitAttr>());

impl NvshmemInitAttr {
    /// Same values as `NVSHMEMX_INIT_ATTR_INITIALIZER`.
    pub fn initializer() -> Self {
        Self {
            version: INIT_ATTR_VERSION,
            mpi_comm: std::ptr::null_mut(),
            args: NvshmemInitArgs {
                version: INIT_ARGS_VERSION,
                uid_args: NvshmemUniqueIdArgs {
                    version: UNIQUEID_ARGS_VERSION,
                    id: std::ptr::null_mut(),
                    myrank: -1,
                    nranks: -1,
                },
                content: [0; INIT_ARGS_CONTENT_BYTES],
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Host API function signatures
// ---------------------------------------------------------------------------

pub type FnGetUniqueId = unsafe extern "C" fn(*mut NvshmemUniqueId) -> c_int;
pub type FnSetAttrUniqueIdArgs = unsafe extern "C" fn(
    c_int,                    // my rank
    c_int,                    // number of ranks
    *const NvshmemUniqueId,
    *mut NvshmemInitAttr,
) -> c_int;
pub type FnInitAttr = unsafe extern "C" fn(c_uint, *mut NvshmemInitAttr) -> c_int;
pub type FnTeamMyPe = unsafe extern "C" fn(c_int) -> c_int;
pub type FnMyPe = unsafe extern "C" fn() -> c_int;
pub type FnNPes = unsafe extern "C" fn() -> c_int;
pub type FnInitStatus = unsafe extern "C" fn() -> c_int;
pub type FnCumoduleInit = unsafe extern "C" fn(*mut c_void) -> c_int;

pub struct NvshmemApi {
    _lib: Option<Library>,
    pub get_uniqueid: FnGetUniqueId,
    pub set_attr_uniqueid_args: FnSetAttrUniqueIdArgs,
    pub init_attr: FnInitAttr,
    pub team_my_pe: FnTeamMyPe,
    pub my_pe: FnMyPe,
    pub n_pes: FnNPes,
    pub init_status: FnInitStatus,
    pub cumodule_init: FnCumoduleInit,
}

// Safety: the function pointers are process-global; NVSHMEM host calls are
// made from one thread per process during bootstrap.
unsafe impl Send for NvshmemApi {}
unsafe impl Sync for NvshmemApi {}

static NVSHMEM_API: OnceLock<std::result::Result<NvshmemApi, String>> = OnceLock::new();

const LIBRARY_CANDIDATES: &[&str] = &["libnvshmem_host.so.3", "libnvshmem_host.so", "libnvshmem.so"];

impl NvshmemApi {
    fn try_load() -> std::result::Result<Self, String> {
        let lib = open_library()?;
        unsafe {
            let api = NvshmemApi {
                get_uniqueid: *lib.get::<FnGetUniqueId>(b"nvshmemx_get_uniqueid\0").map_err(|e| e.to_string())?,
                set_attr_uniqueid_args: *lib.get::<FnSetAttrUniqueIdArgs>(b"nvshmemx_set_attr_uniqueid_args\0").map_err(|e| e.to_string())?,
                init_attr: *lib.get::<FnInitAttr>(b"nvshmemx_init_attr\0").map_err(|e| e.to_string())?,
                team_my_pe: *lib.get::<FnTeamMyPe>(b"nvshmem_team_my_pe\0").map_err(|e| e.to_string())?,
                my_pe: *lib.get::<FnMyPe>(b"nvshmem_my_pe\0").map_err(|e| e.to_string())?,
                n_pes: *lib.get::<FnNPes>(b"nvshmem_n_pes\0").map_err(|e| e.to_string())?,
                init_status: *lib.get::<FnInitStatus>(b"nvshmemx_init_status\0").map_err(|e| e.to_string())?,
                cumodule_init: *lib.get::<FnCumoduleInit>(b"nvshmemx_cumodule_init\0").map_err(|e| e.to_string())?,
                _lib: Some(lib),
            };
            Ok(api)
        }
    }
}

#[cfg(test)]
impl NvshmemApi {
    /// API table over in-process functions, for exercising the call sequence.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_fns(
        get_uniqueid: FnGetUniqueId,
        set_attr_uniqueid_args: FnSetAttrUniqueIdArgs,
        init_attr: FnInitAttr,
        team_my_pe: FnTeamMyPe,
        my_pe: FnMyPe,
        n_pes: FnNPes,
        init_status: FnInitStatus,
        cumodule_init: FnCumoduleInit,
    ) -> Self {
        Self {
            _lib: None,
            get_uniqueid,
            set_attr_uniqueid_args,
            init_attr,
            team_my_pe,
            my_pe,
            n_pes,
            init_status,
            cumodule_init,
        }
    }
}

fn open_library() -> std::result::Result<Library, String> {
    if let Ok(path) = std::env::var("TESSEL_NVSHMEM_LIBRARY") {
        return unsafe { Library::new(&path) }.map_err(|e| format!("{path}: {e}"));
    }
    let mut last_err = String::from("no candidate library names");
    for name in LIBRARY_CANDIDATES {
        match unsafe { Library::new(name) } {
            Ok(lib) => return Ok(lib),
            Err(e) => last_err = format!("{name}: {e}"),
        }
    }
    Err(last_err)
}

/// Get the runtime-loaded NVSHMEM host API.
pub fn nvshmem_api() -> Result<&'static NvshmemApi> {
    NVSHMEM_API
        .get_or_init(NvshmemApi::try_load)
        .as_ref()
        .map_err(|e| ShmemError::NotAvailable(e.clone()))
}

/// Check an NVSHMEM return code (zero is success).
pub fn check(code: c_int, call: &'static str) -> Result<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(ShmemError::Call { call, code })
    }
}
