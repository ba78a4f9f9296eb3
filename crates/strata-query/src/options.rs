use crate::kernel::KernelChoice;
use crate::scope::DecimalPolicy;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag, checked between chunks.
#[derive(Clone, Debug, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Debug)]
pub struct EngineOptions {
    /// Scale assumed for decimal columns without type metadata.
    pub default_decimal_scale: i8,
    /// Fail with a schema error instead of assuming `default_decimal_scale`.
    pub require_decimal_scale: bool,
    pub kernel: KernelChoice,
    /// Rows buffered before a kernel batch runs. Independent of chunk size.
    pub batch_size: usize,
    /// Process fact chunks on the crate's thread pool (needs the `parallel` feature).
    pub parallel: bool,
    pub abort: Option<AbortHandle>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            default_decimal_scale: 2,
            require_decimal_scale: false,
            kernel: KernelChoice::default(),
            batch_size: 1024,
            parallel: true,
            abort: None,
        }
    }
}

impl EngineOptions {
    /// Defaults overridden by `STRATA_KERNEL`, `STRATA_BATCH_SIZE`,
    /// `STRATA_DECIMAL_SCALE` and `STRATA_PARALLEL`. Unparseable values are
    /// ignored with a warning.
    pub fn from_env() -> Self {
        let mut options = Self::default();

        if let Some(kernel) = env_parse::<KernelChoice>("STRATA_KERNEL") {
            options.kernel = kernel;
        }
        if let Some(batch) = env_parse::<usize>("STRATA_BATCH_SIZE").filter(|&n| n > 0) {
            options.batch_size = batch;
        }
        if let Some(scale) = env_parse::<i8>("STRATA_DECIMAL_SCALE") {
            options.default_decimal_scale = scale;
        }
        if let Some(parallel) = env_parse::<bool>("STRATA_PARALLEL") {
            options.parallel = parallel;
        }
        options
    }

    pub fn with_kernel(mut self, kernel: KernelChoice) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = Some(abort);
        self
    }

    pub fn decimal_policy(&self) -> DecimalPolicy {
        DecimalPolicy {
            default_scale: self.default_decimal_scale,
            require_scale: self.require_decimal_scale,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("ignoring unparseable {name}={raw:?}");
            None
        }
    }
}
