//! Worker identity bound to the current OS thread.
//!
//! A worker process hosts one or more threads that act on behalf of a worker
//! ordinal. The control plane that owns workers is external; it binds the
//! identity here so that device-level code (notably the symmetric-memory join)
//! can read the ordinal and reconcile the worker's default device.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::Device;

/// Identity of a worker as seen by device-level code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerIdentity {
    /// Ordinal of this worker within its group.
    pub worker_id: usize,
    /// General-purpose default device. `Device::Cpu` means unset.
    pub default_device: Device,
}

impl WorkerIdentity {
    pub fn new(worker_id: usize) -> Self {
        Self { worker_id, default_device: Device::Cpu }
    }
}

/// A worker identity shared between the control plane and device code.
pub type SharedWorker = Arc<Mutex<WorkerIdentity>>;

thread_local! {
    static CURRENT: RefCell<Option<SharedWorker>> = const { RefCell::new(None) };
}

/// Bind `worker` to the current thread until the returned guard drops.
///
/// Nested binds restore the previous identity on drop.
pub fn bind(worker: SharedWorker) -> WorkerGuard {
    let previous = CURRENT.with(|c| c.borrow_mut().replace(worker));
    WorkerGuard { previous, _not_send: PhantomData }
}

/// The worker bound to the current thread, if any.
pub fn current() -> Option<SharedWorker> {
    CURRENT.with(|c| c.borrow().clone())
}

/// Restores the previous thread binding when dropped.
#[must_use = "the worker is unbound as soon as the guard drops"]
pub struct WorkerGuard {
    previous: Option<SharedWorker>,
    // The binding is thread-local; the guard must drop on the same thread.
    _not_send: PhantomData<*const ()>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|c| *c.borrow_mut() = previous);
    }
}
