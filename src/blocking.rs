// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Drive async store calls from synchronous code.
//!
//! The blocking APIs (`acquire_blocking`, `execute_with_retry_blocking`
//! callers, ...) share the async implementation through [`block_on`]:
//!
//! - inside a multi-thread runtime: `block_in_place` + `Handle::block_on`
//! - inside a current-thread runtime: a scoped helper thread drives the
//!   future on the fallback runtime, since the current thread cannot
//!   block its own scheduler
//! - outside any runtime: the lazily built fallback runtime
//!
//! Store handles are bound to the runtime that created them; a Redis
//! connection created on a current-thread runtime cannot make progress
//! while that runtime is blocked, so sync callers on such a runtime should
//! use an in-process store or move to a multi-thread runtime.

use std::future::Future;
use std::io;
use std::sync::OnceLock;
use tokio::runtime::{Builder, Handle, Runtime, RuntimeFlavor};

static FALLBACK: OnceLock<Runtime> = OnceLock::new();

fn fallback_runtime() -> io::Result<&'static Runtime> {
    if let Some(rt) = FALLBACK.get() {
        return Ok(rt);
    }
    let rt = Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("marketplace-sync-blocking")
        .enable_all()
        .build()?;
    // Lost the race: dropping a runtime inside async context panics.
    if let Err(extra) = FALLBACK.set(rt) {
        extra.shutdown_background();
    }
    FALLBACK
        .get()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "fallback runtime missing"))
}

/// Handle suitable for spawning background work (e.g. lease renewal) from
/// synchronous code.
pub(crate) fn spawn_handle() -> io::Result<Handle> {
    match Handle::try_current() {
        Ok(handle) => Ok(handle),
        Err(_) => Ok(fallback_runtime()?.handle().clone()),
    }
}

/// Run `future` to completion from synchronous code.
pub(crate) fn block_on<F>(future: F) -> io::Result<F::Output>
where
    F: Future + Send,
    F::Output: Send,
{
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            Ok(tokio::task::block_in_place(|| handle.block_on(future)))
        }
        Ok(_) => {
            let rt = fallback_runtime()?;
            std::thread::scope(|scope| {
                scope
                    .spawn(|| rt.block_on(future))
                    .join()
                    .map_err(|_| io::Error::new(io::ErrorKind::Other, "blocking helper thread panicked"))
            })
        }
        Err(_) => Ok(fallback_runtime()?.block_on(future)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_on_outside_runtime() {
        let value = block_on(async { 7 }).unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_block_on_inside_multi_thread_runtime() {
        let value = tokio::task::spawn_blocking(|| block_on(async { 11 }).unwrap())
            .await
            .unwrap();
        assert_eq!(value, 11);
        assert_eq!(block_on(async { 3 }).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_block_on_inside_current_thread_runtime() {
        assert_eq!(block_on(async { 5 }).unwrap(), 5);
    }
}
