//! Blocking adapter for async provider calls.
//!
//! The dispatcher is synchronous from the UI's point of view, so every
//! network round-trip goes through [`run_to_completion`], which only returns
//! once the future has produced its output.

use std::future::Future;
use std::sync::{mpsc, OnceLock};

use tokio::runtime::{Builder, Handle, Runtime, RuntimeFlavor};

use crate::error::BridgeError;

static SHARED_RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Runtime used when the caller has none (or one that cannot be blocked).
/// A single instance keeps the HTTP clients' connection pools on one driver.
fn shared_runtime() -> Result<&'static Runtime, BridgeError> {
    if let Some(runtime) = SHARED_RUNTIME.get() {
        return Ok(runtime);
    }

    let runtime = Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("ask-bar-io")
        .enable_all()
        .build()?;

    // Another thread may have won the race. A plain drop would panic when
    // this thread is itself inside an async context.
    if let Err(spare) = SHARED_RUNTIME.set(runtime) {
        spare.shutdown_background();
    }
    SHARED_RUNTIME.get().ok_or(BridgeError::TaskLost)
}

fn spawn_and_wait<F>(handle: &Handle, future: F, on_worker: bool) -> Result<F::Output, BridgeError>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    handle.spawn(async move {
        let _ = tx.send(future.await);
    });

    // The sender is dropped without sending if the task panics.
    let received = if on_worker {
        tokio::task::block_in_place(|| rx.recv())
    } else {
        rx.recv()
    };
    received.map_err(|_| BridgeError::TaskLost)
}

/// Drive `future` to completion and return its output, blocking the caller.
///
/// Inside a multi-thread runtime the future is scheduled on that runtime.
/// A current-thread runtime cannot make progress while its only thread is
/// blocked here, so the future goes to the shared runtime instead, as it
/// does when no runtime is active at all.
pub fn run_to_completion<F>(future: F) -> Result<F::Output, BridgeError>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) if !matches!(handle.runtime_flavor(), RuntimeFlavor::CurrentThread) => {
            spawn_and_wait(&handle, future, true)
        }
        Ok(_) => {
            log::debug!("Current-thread runtime active, running call on the shared runtime");
            spawn_and_wait(shared_runtime()?.handle(), future, false)
        }
        Err(_) => spawn_and_wait(shared_runtime()?.handle(), future, false),
    }
}
