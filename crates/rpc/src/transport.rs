//! Injected transport contract.
//!
//! The session core never performs I/O itself; the editor-integration
//! layer hands it one [`RpcTransport`] implementation.

use async_trait::async_trait;
use serde_json::Value;

use crate::Result;
use crate::types::{DocId, RpcRef, SessionId, TextPosition};

/// Transport performing the actual communication with the language
/// server.
///
/// `close_session`, `release`, and `keep_alive` are notifications: the
/// core invokes them fire-and-forget from spawned tasks and ignores
/// their outcome.
#[async_trait]
pub trait RpcTransport: Send + Sync {
	/// Ask the server to allocate a fresh session scoped to `doc`.
	async fn create_session(&self, doc: &DocId) -> Result<SessionId>;

	/// Tell the server a session may be discarded.
	async fn close_session(&self, session: &SessionId) -> Result<()>;

	/// Perform one request scoped to `session` and `pos`.
	///
	/// A rejected call may carry a [`crate::ResponseError`] whose code
	/// is in the fatal set; see [`crate::error_codes`].
	async fn call(
		&self,
		session: &SessionId,
		pos: &TextPosition,
		method: &str,
		params: Value,
	) -> Result<Value>;

	/// Tell the server a batch of reference tokens is no longer held by
	/// the client.
	async fn release(&self, session: &SessionId, doc: &DocId, refs: Vec<RpcRef>) -> Result<()>;

	/// Ping a session so the server keeps it alive.
	async fn keep_alive(&self, session: &SessionId, doc: &DocId) -> Result<()>;
}
