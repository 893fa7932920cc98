//! Test fixtures
//!
//! Configuration tuned so a whole fleet comes up in well under a second.

use shard_common::GatewayConfig;
use std::time::Duration;

/// Minimum spacing between two admissions in [`fleet_config`]
pub const ADMISSION_INTERVAL: Duration = Duration::from_millis(200);

/// Upper bound for anything a test waits on
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A fleet of `shard_count` shards pointed at `url`
pub fn fleet_config(url: &str, shard_count: u32) -> GatewayConfig {
    let mut config = GatewayConfig::new(url, "integration-token");
    config.sharding.shard_count = shard_count;
    config.admission.interval_ms = ADMISSION_INTERVAL.as_millis() as u64;
    config.admission.margin_ms = 100;
    config.reconnect.initial_ms = 50;
    config.reconnect.max_ms = 200;
    config.timeouts.connection_timeout_ms = 2_000;
    config
}
