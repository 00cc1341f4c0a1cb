//! The communication layer as seen by the bootstrap.

use std::ffi::c_char;

use tessel_module::ModuleHandle;

use crate::error::{Result, ShmemError};
use crate::ffi::{self, check, NvshmemApi, NvshmemInitAttr, NvshmemUniqueId};
use crate::token::{UniqueJoinToken, UNIQUEID_PADDING};

/// Initialization state reported by the communication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStatus {
    NotInitialized,
    Bootstrapped,
    Initialized,
    /// Initialized with several processes sharing a GPU, limited feature set.
    LimitedMpg,
    /// Initialized with several processes sharing a GPU.
    FullMpg,
    Unknown(i32),
}

impl InitStatus {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            ffi::NVSHMEM_STATUS_NOT_INITIALIZED => InitStatus::NotInitialized,
            ffi::NVSHMEM_STATUS_IS_BOOTSTRAPPED => InitStatus::Bootstrapped,
            ffi::NVSHMEM_STATUS_IS_INITIALIZED => InitStatus::Initialized,
            ffi::NVSHMEM_STATUS_LIMITED_MPG => InitStatus::LimitedMpg,
            ffi::NVSHMEM_STATUS_FULL_MPG => InitStatus::FullMpg,
            other => InitStatus::Unknown(other),
        }
    }

    /// Whether device state exists, so loaded modules can be patched.
    pub fn is_initialized(&self) -> bool {
        matches!(self, InitStatus::Initialized | InitStatus::LimitedMpg | InitStatus::FullMpg)
    }
}

/// Operations the bootstrap needs from the symmetric-memory library.
pub trait ShmemBackend: Send + Sync {
    /// Fresh job identifier. Called by exactly one process per job.
    fn unique_id(&self) -> Result<UniqueJoinToken>;

    /// Attribute-based initialization as participant `pe` of `npes`.
    fn init_with_unique_id(&self, pe: u32, npes: u32, token: &UniqueJoinToken) -> Result<()>;

    /// This process's rank among the participants on the same host.
    fn node_pe(&self) -> Result<usize>;

    fn my_pe(&self) -> i32;

    fn n_pes(&self) -> i32;

    fn init_status(&self) -> InitStatus;

    /// Bind the library's device symbols inside a loaded module.
    fn module_init(&self, module: ModuleHandle) -> Result<()>;
}

/// [`ShmemBackend`] over the NVSHMEM host library.
pub struct NvshmemBackend {
    api: &'static NvshmemApi,
}

impl NvshmemBackend {
    pub fn load() -> Result<Self> {
        Ok(Self { api: ffi::nvshmem_api()? })
    }
}

impl ShmemBackend for NvshmemBackend {
    fn unique_id(&self) -> Result<UniqueJoinToken> {
        let mut uid = NvshmemUniqueId::zeroed();
        check(unsafe { (self.api.get_uniqueid)(&mut uid) }, "nvshmemx_get_uniqueid")?;
        let mut internal = [0u8; UNIQUEID_PADDING];
        for (dst, &c) in internal.iter_mut().zip(uid.internal.iter()) {
            *dst = c as u8;
        }
        Ok(UniqueJoinToken::new(uid.version, internal))
    }

    fn init_with_unique_id(&self, pe: u32, npes: u32, token: &UniqueJoinToken) -> Result<()> {
        let mut uid = NvshmemUniqueId::zeroed();
        uid.version = token.version();
        for (dst, &b) in uid.internal.iter_mut().zip(token.internal().iter()) {
            *dst = b as c_char;
        }
        // `attr` keeps a pointer to `uid`; both live until init returns.
        let mut attr = NvshmemInitAttr::initializer();
        check(
            unsafe { (self.api.set_attr_uniqueid_args)(pe as i32, npes as i32, &uid, &mut attr) },
            "nvshmemx_set_attr_uniqueid_args",
        )?;
        check(
            unsafe { (self.api.init_attr)(ffi::NVSHMEMX_INIT_WITH_UNIQUEID, &mut attr) },
            "nvshmemx_init_attr",
        )
    }

    fn node_pe(&self) -> Result<usize> {
        let pe = unsafe { (self.api.team_my_pe)(ffi::NVSHMEMX_TEAM_NODE) };
        usize::try_from(pe).map_err(|_| ShmemError::Call { call: "nvshmem_team_my_pe", code: pe })
    }

    fn my_pe(&self) -> i32 {
        unsafe { (self.api.my_pe)() }
    }

    fn n_pes(&self) -> i32 {
        unsafe { (self.api.n_pes)() }
    }

    fn init_status(&self) -> InitStatus {
        InitStatus::from_raw(unsafe { (self.api.init_status)() })
    }

    fn module_init(&self, module: ModuleHandle) -> Result<()> {
        check(unsafe { (self.api.cumodule_init)(module.as_ptr()) }, "nvshmemx_cumodule_init")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::{c_int, c_uint, c_void};

    use parking_lot::Mutex;

    use crate::ffi::{INIT_ARGS_VERSION, INIT_ATTR_VERSION, UNIQUEID_ARGS_VERSION};

    #[derive(Debug, Clone, PartialEq)]
    struct SeenAttr {
        flags: c_uint,
        attr_version: c_int,
        args_version: c_int,
        uid_args_version: c_int,
        myrank: c_int,
        nranks: c_int,
        uid_version: c_int,
        uid_first_byte: u8,
        mpi_comm_null: bool,
    }

    static SEEN: Mutex<Vec<SeenAttr>> = parking_lot::const_mutex(Vec::new());

    unsafe extern "C" fn fake_get_uniqueid(uid: *mut NvshmemUniqueId) -> c_int {
        (*uid).version = 7;
        (*uid).internal[0] = 0x5a;
        0
    }

    unsafe extern "C" fn fake_set_attr(
        myrank: c_int,
        nranks: c_int,
        uid: *const NvshmemUniqueId,
        attr: *mut NvshmemInitAttr,
    ) -> c_int {
        let args = &mut (*attr).args.uid_args;
        args.myrank = myrank;
        args.nranks = nranks;
        args.id = uid as *mut NvshmemUniqueId;
        0
    }

    unsafe extern "C" fn fake_init_attr(flags: c_uint, attr: *mut NvshmemInitAttr) -> c_int {
        let attr = &*attr;
        let uid = &*attr.args.uid_args.id;
        SEEN.lock().push(SeenAttr {
            flags,
            attr_version: attr.version,
            args_version: attr.args.version,
            uid_args_version: attr.args.uid_args.version,
            myrank: attr.args.uid_args.myrank,
            nranks: attr.args.uid_args.nranks,
            uid_version: uid.version,
            uid_first_byte: uid.internal[0] as u8,
            mpi_comm_null: attr.mpi_comm.is_null(),
        });
        0
    }

    unsafe extern "C" fn fake_team_my_pe(_team: c_int) -> c_int {
        -1
    }

    unsafe extern "C" fn fake_zero() -> c_int {
        0
    }

    unsafe extern "C" fn fake_cumodule_init(_module: *mut c_void) -> c_int {
        3
    }

    fn fake_backend() -> NvshmemBackend {
        let api = ffi::NvshmemApi::from_fns(
            fake_get_uniqueid,
            fake_set_attr,
            fake_init_attr,
            fake_team_my_pe,
            fake_zero,
            fake_zero,
            fake_zero,
            fake_cumodule_init,
        );
        NvshmemBackend { api: Box::leak(Box::new(api)) }
    }

    #[test]
    fn test_init_attr_carries_initializer_versions() {
        let backend = fake_backend();
        let mut internal = [0u8; UNIQUEID_PADDING];
        internal[0] = 0xab;
        backend.init_with_unique_id(2, 4, &UniqueJoinToken::new(3, internal)).unwrap();

        let seen = SEEN.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0],
            SeenAttr {
                flags: ffi::NVSHMEMX_INIT_WITH_UNIQUEID,
                attr_version: INIT_ATTR_VERSION,
                args_version: INIT_ARGS_VERSION,
                uid_args_version: UNIQUEID_ARGS_VERSION,
                myrank: 2,
                nranks: 4,
                uid_version: 3,
                uid_first_byte: 0xab,
                mpi_comm_null: true,
            }
        );
        assert_eq!(INIT_ATTR_VERSION >> 16, 1);
        assert_eq!((INIT_ATTR_VERSION & 0xffff) as usize, std::mem::size_of::<NvshmemInitAttr>());
    }

    #[test]
    fn test_fake_calls_map_results() {
        let backend = fake_backend();
        let token = backend.unique_id().unwrap();
        assert_eq!(token.version(), 7);
        assert_eq!(token.internal()[0], 0x5a);
        assert!(matches!(backend.node_pe(), Err(ShmemError::Call { call: "nvshmem_team_my_pe", code: -1 })));
        assert_eq!(backend.init_status(), InitStatus::NotInitialized);
        assert!(matches!(
            backend.module_init(ModuleHandle::from_raw(0x10)),
            Err(ShmemError::Call { call: "nvshmemx_cumodule_init", code: 3 })
        ));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(InitStatus::from_raw(0), InitStatus::NotInitialized);
        assert_eq!(InitStatus::from_raw(9), InitStatus::Unknown(9));
        assert!(!InitStatus::NotInitialized.is_initialized());
        assert!(!InitStatus::Bootstrapped.is_initialized());
        assert!(InitStatus::Initialized.is_initialized());
        assert!(InitStatus::LimitedMpg.is_initialized());
        assert!(InitStatus::FullMpg.is_initialized());
    }
}
