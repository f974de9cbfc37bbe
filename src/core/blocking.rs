//! Bridge from the synchronous batch components to async I/O.

use std::{future::Future, time::Duration};

use tokio::runtime::{Handle, RuntimeFlavor};

use crate::BatchError;

/// Runs `future` to completion on the current tokio runtime, within `timeout`.
///
/// The calling worker thread is handed over with `block_in_place`, so this
/// requires a multi-threaded runtime. Without one, or on a current-thread
/// runtime, a `Configuration` error is returned instead of panicking.
pub(crate) fn block_on<T, F>(
    component: &str,
    operation: &str,
    timeout: Duration,
    future: F,
) -> Result<T, BatchError>
where
    F: Future<Output = Result<T, BatchError>>,
{
    let handle = Handle::try_current().map_err(|_| {
        BatchError::Configuration(format!("{} must run inside a tokio runtime", component))
    })?;
    if handle.runtime_flavor() == RuntimeFlavor::CurrentThread {
        return Err(BatchError::Configuration(format!(
            "{} requires a multi-threaded tokio runtime",
            component
        )));
    }

    tokio::task::block_in_place(|| {
        handle.block_on(async { tokio::time::timeout(timeout, future).await })
    })
    .map_err(|_| BatchError::Timeout(format!("{} {} exceeded {:?}", component, operation, timeout)))?
}
