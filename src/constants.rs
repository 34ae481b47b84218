//! Engine-wide policy constants.
//!
//! None of these are user-configurable. The staleness threshold and the
//! active-session validity window are product decisions; the rest are tuning
//! defaults that callers can override through explicit parameters.

use std::time::Duration;

/// Soft expiry: data older than this is flagged stale but still served.
pub const STALE_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// Hard expiry default for cached values.
/// Past the TTL an entry is evicted on lookup unless stale reads are allowed.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// How long a cached "currently running" session is still shown while offline.
/// Beyond this window the session is hidden, not evicted; it resurfaces in the
/// entry list once a reconnect observes the recorded stop.
pub const SESSION_VALIDITY_WINDOW: Duration = Duration::from_secs(8 * 60 * 60);

/// Hard timeout for a single connectivity probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Probe round-trips above this are reported as a slow connection.
pub const SLOW_PROBE_THRESHOLD: Duration = Duration::from_millis(1500);

/// Interval between background connectivity probes while the platform
/// reports online.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Upper bound for one refresh callback before its task is abandoned.
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);

/// First delay of the exponential retry backoff.
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Cap for a single backoff delay.
pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

/// Attempt limit for explicit retry paths.
pub const RETRY_MAX_ATTEMPTS: u32 = 4;
