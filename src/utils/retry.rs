//! Retry utilities: backoff builders for transport connections.
//!
//! Uses `backon` for exponential backoff with jitter. Retrying belongs to the
//! transport layer; the orchestration handler itself never retries.

use std::time::Duration;

use backon::ExponentialBuilder;

/// Default number of connection retries before giving up.
pub const DEFAULT_CONNECT_RETRIES: usize = 30;

/// Backoff for transport connection retries.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Gives up after `retries` retries
/// - Jitter enabled
pub fn connection_backoff(retries: usize) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(retries)
        .with_jitter()
}
