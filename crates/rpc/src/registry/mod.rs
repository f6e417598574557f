//! Per-document session registry.
//!
//! One cached session per open document; failed sessions are removed
//! synchronously and rebuilt on the next request.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::runtime::Handle;
use tracing::info;

use crate::FailureReason;
use crate::config::SessionConfig;
use crate::session::{PositionHandle, Session};
use crate::transport::RpcTransport;
use crate::types::{DocId, TextPosition};

/// Shared map from document identity to its live session.
pub(crate) type SessionMap = RwLock<HashMap<DocId, Arc<Session>>>;

/// Registry of per-document RPC sessions.
///
/// Holds no network state itself; it owns the map and the injected
/// transport shared by the sessions it creates. Tied to one editor
/// connection: construct it when the connection comes up, `close_all`
/// when it goes away.
pub struct SessionRegistry {
	transport: Arc<dyn RpcTransport>,
	config: SessionConfig,
	runtime: Handle,
	sessions: Arc<SessionMap>,
}

impl SessionRegistry {
	/// Create a registry with default tunables.
	///
	/// # Panics
	///
	/// Panics when called outside a tokio runtime; session maintenance
	/// tasks are spawned onto the runtime captured here.
	pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
		Self::with_config(transport, SessionConfig::default())
	}

	/// Create a registry with explicit tunables.
	///
	/// # Panics
	///
	/// Panics when called outside a tokio runtime.
	pub fn with_config(transport: Arc<dyn RpcTransport>, config: SessionConfig) -> Self {
		Self {
			transport,
			config,
			runtime: Handle::current(),
			sessions: Arc::new(RwLock::new(HashMap::new())),
		}
	}

	/// Get the cached session for `doc`, or create one.
	///
	/// A freshly created session immediately begins requesting its id
	/// from the transport.
	pub fn get_or_create(&self, doc: &DocId) -> Arc<Session> {
		{
			let sessions = self.sessions.read();
			if let Some(session) = sessions.get(doc)
				&& !session.is_failed()
			{
				return session.clone();
			}
		}

		let mut sessions = self.sessions.write();
		// Re-check under the write lock; another caller may have won.
		if let Some(session) = sessions.get(doc)
			&& !session.is_failed()
		{
			return session.clone();
		}

		info!(doc = %doc, "creating rpc session");
		let session = Session::new(
			doc.clone(),
			self.transport.clone(),
			self.config.clone(),
			self.runtime.clone(),
			Arc::downgrade(&self.sessions),
		);
		sessions.insert(doc.clone(), session.clone());
		Session::start(&session);
		session
	}

	/// Bind a call handle to `pos`, creating the session on demand.
	pub fn bind_position(&self, pos: TextPosition) -> PositionHandle {
		self.get_or_create(&pos.doc).bind_position(pos)
	}

	/// Retire the session for a closed document, if any.
	pub fn close_for_document(&self, doc: &DocId) {
		let session = self.sessions.read().get(doc).cloned();
		if let Some(session) = session {
			session.fail(FailureReason::DocumentClosed);
		}
	}

	/// Retire every session and empty the registry.
	///
	/// Used when the connection goes away wholesale, e.g. a server
	/// restart.
	pub fn close_all(&self) {
		let drained: Vec<Arc<Session>> = {
			let mut sessions = self.sessions.write();
			sessions.drain().map(|(_, session)| session).collect()
		};
		if !drained.is_empty() {
			info!(count = drained.len(), "disposing all rpc sessions");
		}
		for session in drained {
			session.fail(FailureReason::Disposed);
		}
	}

	/// Number of live sessions.
	pub fn active_count(&self) -> usize {
		self.sessions.read().len()
	}

	/// The underlying transport.
	pub fn transport(&self) -> Arc<dyn RpcTransport> {
		self.transport.clone()
	}
}

#[cfg(test)]
mod tests;
