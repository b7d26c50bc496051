use std::sync::{Mutex, MutexGuard, PoisonError};

static RUNTIME: Mutex<()> = Mutex::new(());

/// Holds the process-wide runtime slot for the calling test. Bind it first
/// so it outlives every `Host` the test creates.
pub fn exclusive() -> MutexGuard<'static, ()> {
    RUNTIME.lock().unwrap_or_else(PoisonError::into_inner)
}
