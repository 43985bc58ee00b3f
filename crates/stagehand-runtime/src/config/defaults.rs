//! Library defaults, overridable through `STAGEHAND_*` environment variables

/// Clock resolution in milliseconds
pub const TICK_MILLIS: u64 = 100;

/// Buckets per wheel revolution (rounded up to a power of two)
pub const TICK_COUNT: usize = 512;

/// Thread-name prefix
pub const NAME: &str = "stagehand";

/// Worker count per available processor
pub const PARALLELISM_PER_CPU: usize = 2;

/// Ceiling on compensating workers, as a multiple of parallelism
pub const MAX_THREADS_FACTOR: usize = 4;

/// Idle worker park timeout
pub const PARK_TIMEOUT_MS: u64 = 10;

/// Poll interval while draining the pool at stop
pub const SHUTDOWN_POLL_MS: u64 = 100;

/// Default worker count: twice the available processors
pub fn parallelism() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cpus * PARALLELISM_PER_CPU
}
