//! Session maintenance tunables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for release batching and keep-alive pacing.
///
/// The defaults match the server's expectations; deviating from them is
/// only useful in tests and unusual deployments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
	/// Queue length beyond which a release flush is forced.
	#[serde(default = "default_release_batch_limit")]
	pub release_batch_limit: usize,
	/// Delay before a scheduled release flush fires, in milliseconds.
	#[serde(default = "default_release_flush_delay_ms")]
	pub release_flush_delay_ms: u64,
	/// Interval between keep-alive pings, in seconds.
	#[serde(default = "default_keep_alive_secs")]
	pub keep_alive_secs: u64,
}

/// Returns the default forced-flush queue length.
fn default_release_batch_limit() -> usize {
	100
}

/// Returns the default flush delay in milliseconds.
fn default_release_flush_delay_ms() -> u64 {
	100
}

/// Returns the default keep-alive interval in seconds.
fn default_keep_alive_secs() -> u64 {
	10
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			release_batch_limit: default_release_batch_limit(),
			release_flush_delay_ms: default_release_flush_delay_ms(),
			keep_alive_secs: default_keep_alive_secs(),
		}
	}
}

impl SessionConfig {
	pub(crate) fn flush_delay(&self) -> Duration {
		Duration::from_millis(self.release_flush_delay_ms)
	}

	pub(crate) fn keep_alive_interval(&self) -> Duration {
		Duration::from_secs(self.keep_alive_secs)
	}
}
