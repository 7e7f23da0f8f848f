use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Lock a render-state mutex, recovering the inner value if a previous holder panicked.
///
/// Callers only mutate the guarded state in single steps that leave it valid.
pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        warn!(
            op,
            target_module = target,
            lock_kind = "mutex.lock",
            result = "poisoned_recovered",
            "Recovered from poisoned render lock"
        );
        poisoned.into_inner()
    })
}
