//! # tessel-shmem
//!
//! One-time bootstrap of the NVSHMEM symmetric address space across worker
//! processes that each drive one GPU.
//!
//! - [`Bootstrap`]: token generation, join, module patching
//! - [`ShmemBackend`]: the library seam, with [`NvshmemBackend`] over
//!   `libnvshmem_host` loaded at runtime
//! - [`registry`]: the process-wide bootstrap and its entry points
//!
//! ```no_run
//! use tessel_shmem::registry;
//!
//! # fn main() -> tessel_shmem::Result<()> {
//! registry::install_default()?;
//! let token = registry::init_join_token()?;
//! // ship `token` to every worker, then in each:
//! let outcome = registry::init(&token, 8, 0)?;
//! println!("joined as pe {} on device {}", outcome.pe, outcome.node_pe);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod ffi;
pub mod registry;
pub mod token;

pub use backend::{InitStatus, NvshmemBackend, ShmemBackend};
pub use bootstrap::{Bootstrap, JoinOutcome};
pub use config::JoinConfig;
pub use error::{Result, ShmemError};
pub use token::{UniqueJoinToken, TOKEN_LEN, UNIQUEID_PADDING};
