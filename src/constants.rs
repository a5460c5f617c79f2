// Gas
pub const DEFAULT_GAS_LIMIT: u64 = 400_000;
pub const GWEI: u64 = 1_000_000_000;

// Profit thresholds
pub const DEFAULT_MIN_PROFIT_WEI: u64 = 100_000_000_000_000; // 0.0001 ETH

// Fee fallback (gwei)
pub const FALLBACK_MAX_FEE_GWEI: u64 = 50;
pub const FALLBACK_PRIORITY_FEE_GWEI: u64 = 2;

// Worker pool
pub const MIN_WORKERS: usize = 2;
pub const DEFAULT_RESERVED_CORES: usize = 1;
pub const DEFAULT_MAX_QUEUE: usize = 256;

// Timing (milliseconds)
pub const DEFAULT_SLOT_BUDGET_MS: u64 = 2_000;
pub const DEFAULT_ORPHAN_GRACE_MS: u64 = 1_000;
pub const ORPHAN_SWEEP_INTERVAL_MS: u64 = 250;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;
pub const DEFAULT_INCLUSION_POLL_MS: u64 = 1_000;
pub const RELAY_HTTP_TIMEOUT_SECS: u64 = 10;
pub const FEE_ORACLE_TIMEOUT_MS: u64 = 1_500;
pub const FEE_REFRESH_INTERVAL_MS: u64 = 1_000;

// Relay inclusion wait ceiling (slots past the target)
pub const MAX_INCLUSION_WAIT_SLOTS: u64 = 3;

// Ingestion
pub const DEFAULT_SEEN_CACHE_SIZE: usize = 10_000;
pub const NOTIFICATION_CHANNEL_CAPACITY: usize = 4_096;

// Submission history
pub const SUBMISSION_HISTORY_LIMIT: usize = 512;

// Synthetic pool size used when no pool file is configured
pub const DEFAULT_SYNTHETIC_POOL_SIZE: usize = 1_500;

pub const DEFAULT_FLASHBOTS_RELAY: &str = "https://relay.flashbots.net";
