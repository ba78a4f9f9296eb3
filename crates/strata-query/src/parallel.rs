//! Worker pool for chunk-parallel scans.
//!
//! The pool is crate-local rather than Rayon's global one: if it cannot be
//! created (thread limits, many test binaries at once) scans run on the
//! calling thread instead of panicking.

#![cfg(all(feature = "parallel", not(target_arch = "wasm32")))]

use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::OnceLock;

static SCAN_POOL: OnceLock<Option<ThreadPool>> = OnceLock::new();

/// `STRATA_THREADS`, then `RAYON_NUM_THREADS`, then the available parallelism.
fn requested_threads() -> usize {
    ["STRATA_THREADS", "RAYON_NUM_THREADS"]
        .iter()
        .find_map(|name| {
            std::env::var(name)
                .ok()
                .and_then(|s| s.trim().parse::<usize>().ok())
                .filter(|&n| n > 0)
        })
        .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()))
}

fn build_scan_pool() -> Option<ThreadPool> {
    let requested = requested_threads();
    let build = |threads: usize| {
        ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("strata-scan-{i}"))
            .build()
    };

    match build(requested) {
        Ok(pool) => {
            log::debug!("scan pool started with {requested} threads");
            Some(pool)
        }
        Err(err) if requested > 1 => {
            log::debug!("scan pool with {requested} threads failed ({err}); using one thread");
            build(1).ok()
        }
        Err(err) => {
            log::debug!("no scan pool available ({err}); scans stay sequential");
            None
        }
    }
}

/// The shared scan pool, if one could be created.
pub(crate) fn scan_pool() -> Option<&'static ThreadPool> {
    SCAN_POOL.get_or_init(build_scan_pool).as_ref()
}
