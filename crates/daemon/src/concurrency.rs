//! Worker pool sizing for pinning passes
//!
//! Derives how many libraries a pass processes in parallel from the CPU core
//! count and configuration.

use crate::config::Config;

/// Upper bound for the auto-derived worker count.
const AUTO_MAX_WORKERS: u32 = 4;

/// Worker pool plan derived from configuration and system resources
#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencyPlan {
    /// Total logical CPU cores available
    pub total_cores: u32,
    /// Maximum number of libraries processed at once
    pub max_parallel_libraries: u32,
}

impl ConcurrencyPlan {
    /// Derive a plan from configuration
    ///
    /// - an explicit non-zero `workers.max_parallel_libraries` is used as is
    /// - otherwise `min(cores, 4)`
    pub fn derive(cfg: &Config) -> Self {
        Self::derive_with_cores(cfg, num_cpus::get() as u32)
    }

    fn derive_with_cores(cfg: &Config, total_cores: u32) -> Self {
        let max_parallel_libraries = if cfg.workers.max_parallel_libraries > 0 {
            cfg.workers.max_parallel_libraries
        } else {
            total_cores.clamp(1, AUTO_MAX_WORKERS)
        };

        Self {
            total_cores,
            max_parallel_libraries,
        }
    }
}

/// Public function to derive a plan from configuration
pub fn derive_plan(cfg: &Config) -> ConcurrencyPlan {
    ConcurrencyPlan::derive(cfg)
}
