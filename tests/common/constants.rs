//! Shared constants for end-to-end tests

/// Maximum time to wait for a spawned server to answer
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Interval between readiness polls
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 20;

/// Per-request timeout of the test client
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

pub const CORE_1_0_0: &str = "elm/core@1.0.0";
pub const CORE_1_0_2: &str = "elm/core@1.0.2";
pub const CORE_1_0_10: &str = "elm/core@1.0.10";
pub const JSON_1_1_3: &str = "elm/json@1.1.3";
pub const HTML_1_0_0: &str = "elm/html@1.0.0";

/// Publish time given to the first upstream release, later ones follow at
/// one minute intervals
pub const FIRST_PUBLISHED_AT: i64 = 1_600_000_000;
