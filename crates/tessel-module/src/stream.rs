//! Execution stream bound to the calling thread.
//!
//! Kernel launches go to whatever stream the calling thread has selected;
//! the default is the null stream.

use std::cell::Cell;

use crate::driver::StreamHandle;

thread_local! {
    static CURRENT: Cell<StreamHandle> = const { Cell::new(StreamHandle::NULL) };
}

/// Stream launches on this thread are enqueued on.
pub fn current() -> StreamHandle {
    CURRENT.with(Cell::get)
}

/// Select `stream` for this thread, returning the previous selection.
pub fn set_current(stream: StreamHandle) -> StreamHandle {
    CURRENT.with(|c| c.replace(stream))
}
