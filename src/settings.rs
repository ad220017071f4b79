//! Process-wide defaults (§4.7), grounded in the teacher's `flags`
//! module: a `lazy_static`-backed singleton read once at startup from
//! the environment, with every field overridable per call to
//! `crate::runner::run_sct`/`results_set`.

use crate::dpor::bounds::Bounds;
use crate::memory::MemoryType;
use lazy_static::lazy_static;
use std::env;

/// Default knobs for a systematic or randomised exploration, read from
/// the environment once at process start.
pub struct Settings {
    pub default_memory_type: MemoryType,
    pub default_bounds: Bounds,
    pub random_iterations: usize,
}

fn env_memory_type() -> MemoryType {
    match env::var("RD_SCT_MEMORY").ok().as_deref() {
        Some("tso") => MemoryType::TotalStoreOrder,
        Some("pso") => MemoryType::PartialStoreOrder,
        _ => MemoryType::SequentialConsistency,
    }
}

fn env_iterations() -> usize {
    env::var("RD_SCT_ITERATIONS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000)
}

fn init_settings() -> Settings {
    crate::log::init_from_env();
    Settings {
        default_memory_type: env_memory_type(),
        default_bounds: Bounds::default_preemption_and_fair(),
        random_iterations: env_iterations(),
    }
}

lazy_static! {
    static ref SETTINGS: Settings = init_settings();
}

impl Settings {
    pub fn get() -> &'static Settings {
        &SETTINGS
    }
}
