//! Session-scoped RPC client core.
//!
//! Connects an editor-side client to a long-running language server
//! through calls scoped to a server-allocated session and a document
//! position:
//! * [`SessionRegistry`]: one cached [`Session`] per open document,
//!   rebuilt transparently after server crashes.
//! * [`Session`]: owns the server-assigned session id, performs calls,
//!   and turns fatal error codes into its own retirement.
//! * Reference tracking: call results are scanned for opaque
//!   server-object handles; each one found is wrapped in an
//!   [`RpcRefGuard`] whose drop schedules a release notification.
//! * Release batching: queued tokens go out in one notification per
//!   burst, bounded by a size threshold and a short delay.
//!
//! The actual wire I/O lives behind the injected [`RpcTransport`]; this
//! crate never interprets payloads beyond the reference-pointer shape.

#![warn(missing_docs)]

use std::fmt;
use std::io;
use std::sync::Arc;

mod config;
mod refs;
mod registry;
mod release;
mod session;
mod transport;
mod types;

pub use config::SessionConfig;
pub use refs::{RpcRefGuard, RpcResult};
pub use registry::SessionRegistry;
pub use serde_json::Value as JsonValue;
pub use session::{PositionHandle, Session, SessionState};
pub use transport::RpcTransport;
pub use types::error_codes;
pub use types::{DocId, ResponseError, RpcRef, SessionId, TextPosition};

/// A convenient type alias for `Result` with `E` = [`enum@crate::Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The peer replied with an error.
	#[error("{0}")]
	Response(#[from] ResponseError),
	/// The session this call was bound to is gone.
	#[error("session failed: {0}")]
	SessionFailed(FailureReason),
	/// The transport shut down before the call completed.
	#[error("service stopped")]
	ServiceStopped,
	/// The peer replied an undecodable or invalid payload.
	#[error("deserialization failed: {0}")]
	Deserialize(#[from] serde_json::Error),
	/// The peer violated the protocol.
	#[error("protocol error: {0}")]
	Protocol(String),
	/// Input/output errors from the underlying channels.
	#[error("{0}")]
	Io(#[from] io::Error),
}

/// Why a session became unusable.
///
/// Recorded once by [`Session`] and handed to every later caller.
#[derive(Debug, Clone)]
pub enum FailureReason {
	/// The owning document was closed.
	DocumentClosed,
	/// The registry was disposed, e.g. on a server restart.
	Disposed,
	/// The session-id request itself failed.
	CreateFailed(Arc<Error>),
	/// A call failed with a code from the fatal set.
	Fatal(ResponseError),
}

impl fmt::Display for FailureReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::DocumentClosed => f.write_str("document closed"),
			Self::Disposed => f.write_str("disposed"),
			Self::CreateFailed(err) => write!(f, "session creation failed: {err}"),
			Self::Fatal(err) => write!(f, "fatal rpc error: {err}"),
		}
	}
}
