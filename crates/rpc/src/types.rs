//! Identifier and wire types shared across the session core.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identity of an open document (its URI).
///
/// Many calls share one session per identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
	/// Wrap a document URI.
	pub fn new(uri: impl Into<String>) -> Self {
		Self(uri.into())
	}

	/// The underlying URI string.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for DocId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for DocId {
	fn from(uri: &str) -> Self {
		Self(uri.to_owned())
	}
}

impl From<String> for DocId {
	fn from(uri: String) -> Self {
		Self(uri)
	}
}

/// Opaque session identifier assigned by the server.
///
/// Immutable for the lifetime of the session object holding it; never
/// reused client-side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
	/// Wrap a server-assigned id.
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	/// The underlying id string.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// A position inside a document.
///
/// Calls are always scoped to a position: only server declarations
/// visible at that point may be invoked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextPosition {
	/// Document the position lies in.
	pub doc: DocId,
	/// Zero-based line.
	pub line: u32,
	/// Zero-based column.
	pub column: u32,
}

impl TextPosition {
	/// Construct a position.
	pub fn new(doc: impl Into<DocId>, line: u32, column: u32) -> Self {
		Self {
			doc: doc.into(),
			line,
			column,
		}
	}
}

/// Wire shape of a reference pointer: an opaque string token behind a
/// single field.
///
/// Tokens reference server-held objects; equality is by token value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RpcRef {
	/// The opaque token.
	pub p: String,
}

impl RpcRef {
	/// Wrap a token.
	pub fn new(token: impl Into<String>) -> Self {
		Self { p: token.into() }
	}
}

/// Error object carried by a failed call reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("rpc error {code}: {message}")]
pub struct ResponseError {
	/// Numeric error code.
	pub code: i64,
	/// Human-readable message.
	pub message: String,
	/// Optional structured payload.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<serde_json::Value>,
}

impl ResponseError {
	/// Construct an error with no payload.
	pub fn new(code: i64, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
			data: None,
		}
	}

	/// Whether this code means the worker/session behind the call is
	/// unusable and must be discarded and recreated.
	pub fn is_fatal(&self) -> bool {
		matches!(
			self.code,
			error_codes::RPC_NEEDS_RECONNECT | error_codes::WORKER_EXITED | error_codes::WORKER_CRASHED
		)
	}
}

/// Error codes with client-side meaning.
///
/// Values sit in the JSON-RPC implementation-reserved range.
pub mod error_codes {
	/// The server restarted; sessions must be re-established.
	pub const RPC_NEEDS_RECONNECT: i64 = -32900;
	/// The worker process behind the session exited.
	pub const WORKER_EXITED: i64 = -32901;
	/// The worker process behind the session crashed.
	pub const WORKER_CRASHED: i64 = -32902;
}
