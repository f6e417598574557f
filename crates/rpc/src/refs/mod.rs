//! Reference-pointer discovery and release guards.
//!
//! Call results may carry opaque handles to server-held objects,
//! nested arbitrarily deep. Every one found is wrapped in an
//! [`RpcRefGuard`]; dropping the guard enqueues the token for a
//! batched release notification.

use std::fmt;
use std::ops::Deref;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::Result;
use crate::release::ReleaseBatcher;
use crate::types::RpcRef;

/// Owns one tracked reference token.
///
/// The token was copied out of the call result, so it stays valid after
/// the result node itself is gone. Dropping the guard hands the token
/// to the owning session's release batcher; if that session has already
/// failed, the drop is a no-op.
pub struct RpcRefGuard {
	token: RpcRef,
	batcher: ReleaseBatcher,
}

impl RpcRefGuard {
	fn new(token: RpcRef, batcher: ReleaseBatcher) -> Self {
		Self { token, batcher }
	}

	/// The tracked token.
	pub fn token(&self) -> &str {
		&self.token.p
	}
}

impl fmt::Debug for RpcRefGuard {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("RpcRefGuard").field(&self.token.p).finish()
	}
}

impl Drop for RpcRefGuard {
	fn drop(&mut self) {
		self.batcher.enqueue(self.token.clone());
	}
}

/// A call result together with the guards keeping its server-side
/// references alive.
///
/// Dropping the result releases every reference pointer it contained.
/// Use [`RpcResult::into_parts`] to keep guards alive past the value.
#[derive(Debug)]
pub struct RpcResult {
	value: Value,
	refs: Vec<RpcRefGuard>,
}

impl RpcResult {
	pub(crate) fn new(value: Value, refs: Vec<RpcRefGuard>) -> Self {
		Self { value, refs }
	}

	/// The raw result value.
	pub fn value(&self) -> &Value {
		&self.value
	}

	/// Number of reference pointers found in the result.
	pub fn ref_count(&self) -> usize {
		self.refs.len()
	}

	/// Decode the result, keeping its reference guards alive.
	pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
		Ok(serde_json::from_value(self.value.clone())?)
	}

	/// Split into the raw value and its guards.
	pub fn into_parts(self) -> (Value, Vec<RpcRefGuard>) {
		(self.value, self.refs)
	}
}

impl Deref for RpcResult {
	type Target = Value;

	fn deref(&self) -> &Value {
		&self.value
	}
}

/// Wrap every reference pointer found in `value` in a guard tied to
/// `batcher`.
pub(crate) fn track(batcher: &ReleaseBatcher, value: &Value) -> Vec<RpcRefGuard> {
	let mut tokens = Vec::new();
	collect(value, &mut tokens);
	tokens
		.into_iter()
		.map(|token| RpcRefGuard::new(token, batcher.clone()))
		.collect()
}

/// Recursive walk over aggregate nodes.
///
/// A node matching the pointer shape is recorded and not descended
/// into; anything that is neither an object nor an array is skipped.
fn collect(value: &Value, out: &mut Vec<RpcRef>) {
	match value {
		Value::Object(map) => {
			if let Some(token) = pointer_token(map) {
				out.push(RpcRef::new(token));
				return;
			}
			for nested in map.values() {
				collect(nested, out);
			}
		}
		Value::Array(items) => {
			for nested in items {
				collect(nested, out);
			}
		}
		_ => {}
	}
}

/// The pointer shape: exactly one own field holding a string.
fn pointer_token(map: &Map<String, Value>) -> Option<&str> {
	if map.len() != 1 {
		return None;
	}
	map.values().next()?.as_str()
}
