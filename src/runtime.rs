//! Process-wide tokio runtime for [`BlockingClient`](crate::BlockingClient).
//!
//! Multi-threaded, created on first use and kept for the life of the
//! process. The worker count defaults to the number of CPU cores and can be
//! overridden with `KVROUTE_RUNTIME_THREADS`.

use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::Runtime;

/// Environment variable overriding the worker thread count.
pub const THREADS_ENV: &str = "KVROUTE_RUNTIME_THREADS";

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Get (or initialize) the global runtime.
pub fn get_runtime() -> &'static Runtime {
    RUNTIME.get_or_init(|| {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.enable_all();

        if let Some(n) = worker_threads(std::env::var(THREADS_ENV).ok().as_deref()) {
            builder.worker_threads(n);
        }

        match builder.thread_name("kvroute-rt").build() {
            Ok(rt) => rt,
            // get_or_init has no error path.
            Err(e) => panic!("kvroute: failed to create tokio runtime: {e}"),
        }
    })
}

/// Parse the thread override; zero and garbage mean "use the default".
fn worker_threads(value: Option<&str>) -> Option<usize> {
    value
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
}

/// Block the calling thread on `future` using the global runtime.
///
/// Must not be called from within an async context (tokio panics).
pub fn block_on<F: Future>(future: F) -> F::Output {
    get_runtime().block_on(future)
}

// ── Tests ──────────────────────────────────────────────────────────
