//! Joining the symmetric address space.
//!
//! One process per job calls [`Bootstrap::generate_join_token`] and ships
//! the token to every worker process; each then calls [`Bootstrap::join`]
//! with the same token. The device binding of the calling thread is changed
//! twice during a join: once to the participant ordinal before
//! initialization, then to the node-local rank the layer assigns.

use std::sync::Arc;

use parking_lot::Mutex;
use tessel_core::{worker, Device};
use tessel_module::{DeviceContext, HookError, ModuleHandle, ModuleLoadHook};

use crate::backend::ShmemBackend;
use crate::config::JoinConfig;
use crate::error::{Result, ShmemError};
use crate::token::UniqueJoinToken;

/// Result of a successful join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Global participant ordinal this process joined as.
    pub pe: u32,
    pub npes: u32,
    /// Rank among participants on this host; also the bound device.
    pub node_pe: usize,
}

#[derive(Debug, Clone, Copy)]
enum JoinState {
    Unjoined,
    /// The layer accepted the token but the join did not finish.
    LayerInitialized,
    Joined(JoinOutcome),
}

pub struct Bootstrap {
    backend: Arc<dyn ShmemBackend>,
    devices: Arc<dyn DeviceContext>,
    state: Mutex<JoinState>,
}

impl Bootstrap {
    pub fn new(backend: Arc<dyn ShmemBackend>, devices: Arc<dyn DeviceContext>) -> Self {
        Self { backend, devices, state: Mutex::new(JoinState::Unjoined) }
    }

    /// Fresh job identifier in its flattened integer form.
    pub fn generate_join_token(&self) -> Result<Vec<i64>> {
        Ok(self.backend.unique_id()?.to_values())
    }

    /// Join as participant `worker_id_start + worker_id` of `num_workers`.
    ///
    /// Without a worker bound to the calling thread the ordinal is
    /// `worker_id_start`. Once the layer has accepted the token, every later
    /// call fails with [`ShmemError::AlreadyJoined`], even if this one fails.
    pub fn join(&self, token: &[i64], num_workers: u32, worker_id_start: u32) -> Result<JoinOutcome> {
        let mut state = self.state.lock();
        if !matches!(*state, JoinState::Unjoined) {
            return Err(ShmemError::AlreadyJoined);
        }

        let worker = worker::current();
        let worker_id = worker.as_ref().map_or(0, |w| w.lock().worker_id);
        let pe = u32::try_from(worker_id)
            .ok()
            .and_then(|id| worker_id_start.checked_add(id))
            .ok_or_else(|| ShmemError::InvalidConfig(format!("worker ordinal {worker_id} out of range")))?;

        let token = UniqueJoinToken::from_values(token)?;
        if pe >= num_workers {
            return Err(ShmemError::InvalidConfig(format!(
                "participant ordinal {pe} is not below the participant count {num_workers}"
            )));
        }

        // Initialization identifies the participant by its bound device.
        self.devices.set_device(pe as usize)?;
        self.backend.init_with_unique_id(pe, num_workers, &token)?;
        *state = JoinState::LayerInitialized;
        let outcome = JoinOutcome { pe, npes: num_workers, node_pe: self.backend.node_pe()? };
        *state = JoinState::Joined(outcome);

        self.devices.set_device(outcome.node_pe)?;

        if let Some(worker) = worker {
            let mut identity = worker.lock();
            let shmem_device = Device::Cuda(outcome.node_pe);
            match identity.default_device.cuda_index() {
                None => identity.default_device = shmem_device,
                Some(idx) if idx == outcome.node_pe => {}
                Some(_) => {
                    return Err(ShmemError::DeviceMismatch {
                        default_device: identity.default_device,
                        shmem_device,
                    });
                }
            }
        }

        tracing::info!(
            "NVSHMEM init finished: mype={} npes={}",
            self.backend.my_pe(),
            self.backend.n_pes()
        );
        Ok(outcome)
    }

    /// [`join`](Self::join) with arguments from a [`JoinConfig`] document.
    pub fn join_from_json(&self, text: &str) -> Result<JoinOutcome> {
        let config = JoinConfig::parse(text)?;
        self.join(&config.uid, config.npes, config.pe_start)
    }

    /// Bind the layer's symbols inside `module` if the layer is up.
    ///
    /// Returns whether the module was patched. A module loaded before the
    /// join is left alone; call this again once joined.
    pub fn maybe_patch_module(&self, module: ModuleHandle) -> Result<bool> {
        let status = self.backend.init_status();
        if !status.is_initialized() {
            tracing::debug!("skipping module patch, NVSHMEM status {:?}", status);
            return Ok(false);
        }
        self.backend.module_init(module)?;
        Ok(true)
    }

    /// Whether the layer has accepted this process, even if the join then
    /// failed.
    pub fn is_joined(&self) -> bool {
        !matches!(*self.state.lock(), JoinState::Unjoined)
    }

    pub fn outcome(&self) -> Option<JoinOutcome> {
        match *self.state.lock() {
            JoinState::Joined(outcome) => Some(outcome),
            _ => None,
        }
    }
}

impl ModuleLoadHook for Bootstrap {
    fn on_module_loaded(&self, _device: usize, module: ModuleHandle) -> std::result::Result<(), HookError> {
        self.maybe_patch_module(module)?;
        Ok(())
    }
}
