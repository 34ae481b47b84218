//! Network-state detection: probe transport and connectivity monitor.

mod monitor;
mod probe;

pub use monitor::{ConnectionQuality, NetworkMonitor, NetworkStatus};
pub use probe::{ping_url, HttpProbe, ProbeTransport};
