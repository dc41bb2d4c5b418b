//! Blocking-call offload.
//!
//! Remote calls block. Running one on an async worker thread would stall
//! every other session scheduled there, so each call is shipped to tokio's
//! blocking pool and awaited. The awaiting task is suspended, never blocked.
//!
//! A [`Handle`] owns a remote resource behind an async mutex. The closure
//! passed to [`Handle::call`] locks it from inside the blocking thread, so
//! the resource is only ever touched off the event loop.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::error;

use crate::error::{GatewayError, GatewayResult};

/// Run a blocking closure on the blocking pool and await its result.
///
/// A panic inside `f` surfaces as [`GatewayError::Offload`] instead of
/// unwinding into the caller.
pub async fn offload<T, F>(op: &'static str, f: F) -> GatewayResult<T>
where
    F: FnOnce() -> GatewayResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(e) => {
            error!("offloaded {op} failed: {e}");
            Err(GatewayError::Offload(format!("{op}: {e}")))
        }
    }
}

/// Shared ownership of a blocking resource.
pub struct Handle<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> Handle<T> {
    pub(crate) fn inner(&self) -> &Arc<Mutex<T>> {
        &self.inner
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> Handle<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(value)),
        }
    }

    /// Run `f` against the resource on the blocking pool.
    ///
    /// Calls on the same handle are serialized by the mutex.
    pub async fn call<R, F>(&self, op: &'static str, f: F) -> GatewayResult<R>
    where
        F: FnOnce(&mut T) -> GatewayResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        offload(op, move || {
            let mut guard = inner.blocking_lock();
            f(&mut guard)
        })
        .await
    }
}
