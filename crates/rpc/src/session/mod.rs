//! Per-document RPC sessions.
//!
//! A session begins requesting its server-assigned id the moment the
//! registry creates it. Calls wait for the id, go through the injected
//! transport, and have their results scanned for reference pointers. A
//! fatal call error, a closed document, or a registry dispose retires
//! the session; the next request for the document builds a fresh one.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::refs;
use crate::refs::RpcResult;
use crate::registry::SessionMap;
use crate::release::ReleaseBatcher;
use crate::transport::RpcTransport;
use crate::types::{DocId, SessionId, TextPosition};
use crate::{Error, FailureReason, Result};

/// Lifecycle state of a session.
#[derive(Debug, Clone)]
pub enum SessionState {
	/// Session-id request in flight.
	Connecting,
	/// Id known; calls go through.
	Ready(SessionId),
	/// Terminal. Every further call fails with the stored reason.
	Failed(FailureReason),
}

/// One server-side RPC session scoped to a document.
///
/// Created lazily by [`crate::SessionRegistry`]. A session that fails
/// is removed from the registry synchronously and never resurrected.
pub struct Session {
	doc: DocId,
	transport: Arc<dyn RpcTransport>,
	config: SessionConfig,
	runtime: Handle,
	state_tx: watch::Sender<SessionState>,
	batcher: ReleaseBatcher,
	sessions: Weak<SessionMap>,
	keep_alive: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
	pub(crate) fn new(
		doc: DocId,
		transport: Arc<dyn RpcTransport>,
		config: SessionConfig,
		runtime: Handle,
		sessions: Weak<SessionMap>,
	) -> Arc<Self> {
		let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
		let batcher = ReleaseBatcher::new(
			transport.clone(),
			doc.clone(),
			&config,
			runtime.clone(),
			state_rx,
		);
		Arc::new(Self {
			doc,
			transport,
			config,
			runtime,
			state_tx,
			batcher,
			sessions,
			keep_alive: Mutex::new(None),
		})
	}

	/// Begin requesting the session id.
	///
	/// The registry publishes the session in its map before calling
	/// this; the failure path relies on the entry being present.
	pub(crate) fn start(this: &Arc<Self>) {
		this.runtime.spawn(connect(Arc::downgrade(this)));
	}

	/// The document this session is scoped to.
	pub fn doc(&self) -> &DocId {
		&self.doc
	}

	/// Current lifecycle state.
	pub fn state(&self) -> SessionState {
		self.state_tx.borrow().clone()
	}

	/// The server-assigned id, once known.
	pub fn session_id(&self) -> Option<SessionId> {
		match &*self.state_tx.borrow() {
			SessionState::Ready(id) => Some(id.clone()),
			_ => None,
		}
	}

	/// Whether the session has terminally failed.
	pub fn is_failed(&self) -> bool {
		matches!(&*self.state_tx.borrow(), SessionState::Failed(_))
	}

	/// Wait until the session id is known.
	///
	/// Returns immediately once the session is `Ready` or `Failed`.
	pub async fn wait_ready(&self) -> Result<SessionId> {
		let mut state_rx = self.state_tx.subscribe();
		loop {
			{
				let state = state_rx.borrow_and_update();
				match &*state {
					SessionState::Ready(id) => return Ok(id.clone()),
					SessionState::Failed(reason) => return Err(Error::SessionFailed(reason.clone())),
					SessionState::Connecting => {}
				}
			}
			if state_rx.changed().await.is_err() {
				return Err(Error::ServiceStopped);
			}
		}
	}

	/// Perform one call scoped to `pos`.
	///
	/// Fails fast without touching the transport once the session has
	/// failed. A successful result is scanned for reference pointers;
	/// the returned [`RpcResult`] owns their release guards. A call
	/// error with a fatal code retires the session, but the caller
	/// still sees the original error.
	pub async fn call(&self, pos: &TextPosition, method: &str, params: Value) -> Result<RpcResult> {
		let session_id = self.wait_ready().await?;
		match self.transport.call(&session_id, pos, method, params).await {
			Ok(value) => {
				let guards = refs::track(&self.batcher, &value);
				Ok(RpcResult::new(value, guards))
			}
			Err(err) => {
				if let Error::Response(resp) = &err
					&& resp.is_fatal()
				{
					warn!(doc = %self.doc, code = resp.code, "fatal rpc error, discarding session");
					self.fail(FailureReason::Fatal(resp.clone()));
				}
				Err(err)
			}
		}
	}

	/// Bind a call handle to one position.
	pub fn bind_position(self: Arc<Self>, pos: TextPosition) -> PositionHandle {
		PositionHandle { session: self, pos }
	}

	/// Transition `Connecting → Ready`.
	///
	/// Refused when the session failed first.
	fn activate(&self, id: SessionId) -> bool {
		self.state_tx.send_if_modified(|state| {
			if matches!(state, SessionState::Connecting) {
				*state = SessionState::Ready(id.clone());
				true
			} else {
				false
			}
		})
	}

	fn start_keep_alive(&self, id: SessionId) {
		let transport = self.transport.clone();
		let doc = self.doc.clone();
		let period = self.config.keep_alive_interval();
		let handle = self.runtime.spawn(async move {
			let mut ticker = tokio::time::interval(period);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
			// The first tick completes immediately.
			ticker.tick().await;
			loop {
				ticker.tick().await;
				if transport.keep_alive(&id, &doc).await.is_err() {
					break;
				}
			}
		});
		let mut slot = self.keep_alive.lock();
		// A failure that raced ahead already aborted whatever was in the
		// slot; do not hand it a ticker it can no longer see.
		if self.is_failed() {
			handle.abort();
			return;
		}
		*slot = Some(handle);
	}

	/// Retire the session.
	///
	/// Idempotent: only the first invocation stores the reason, removes
	/// the session from the registry, stops maintenance tasks, and
	/// schedules one best-effort close notification once the id is
	/// known.
	pub(crate) fn fail(&self, reason: FailureReason) {
		let mut previous = None;
		self.state_tx.send_if_modified(|state| {
			if matches!(state, SessionState::Failed(_)) {
				return false;
			}
			previous = Some(std::mem::replace(state, SessionState::Failed(reason.clone())));
			true
		});
		let Some(previous) = previous else {
			return;
		};
		debug!(doc = %self.doc, reason = %reason, "rpc session retired");

		if let Some(ticker) = self.keep_alive.lock().take() {
			ticker.abort();
		}
		self.batcher.shutdown();

		if let Some(sessions) = self.sessions.upgrade() {
			let mut map = sessions.write();
			// Only remove this exact instance; a replacement created
			// after an earlier failure must not be clobbered.
			if map
				.get(&self.doc)
				.is_some_and(|entry| std::ptr::eq(Arc::as_ptr(entry), self))
			{
				map.remove(&self.doc);
			}
		}

		// With the id still pending, the connect task observes the
		// failed state and closes the session itself.
		if let SessionState::Ready(id) = previous {
			let transport = self.transport.clone();
			self.runtime.spawn(async move {
				let _ = transport.close_session(&id).await;
			});
		}
	}
}

impl fmt::Debug for Session {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Session")
			.field("doc", &self.doc)
			.field("state", &self.state())
			.finish_non_exhaustive()
	}
}

impl Drop for Session {
	fn drop(&mut self) {
		if let Some(ticker) = self.keep_alive.lock().take() {
			ticker.abort();
		}
	}
}

/// Drives the session-id request started by [`Session::start`].
///
/// Holds only a weak reference so an abandoned session can drop; an id
/// that arrives for a session that is already failed or gone is handed
/// straight back to the server.
async fn connect(session: Weak<Session>) {
	let Some(strong) = session.upgrade() else {
		return;
	};
	let transport = strong.transport.clone();
	let doc = strong.doc.clone();
	drop(strong);

	match transport.create_session(&doc).await {
		Ok(id) => {
			let Some(strong) = session.upgrade() else {
				let _ = transport.close_session(&id).await;
				return;
			};
			if strong.activate(id.clone()) {
				debug!(doc = %doc, session = %id, "rpc session established");
				strong.start_keep_alive(id);
			} else {
				// Failed while the id request was in flight.
				let _ = transport.close_session(&id).await;
			}
		}
		Err(err) => {
			warn!(doc = %doc, error = %err, "rpc session creation failed");
			if let Some(strong) = session.upgrade() {
				strong.fail(FailureReason::CreateFailed(Arc::new(err)));
			}
		}
	}
}

/// Call handle bound to one document position.
///
/// The only operation is [`PositionHandle::call`]; every handle over a
/// session shares that session's queue and failure state.
#[derive(Clone, Debug)]
pub struct PositionHandle {
	session: Arc<Session>,
	pos: TextPosition,
}

impl PositionHandle {
	/// Perform one call at the bound position.
	pub async fn call(&self, method: &str, params: Value) -> Result<RpcResult> {
		self.session.call(&self.pos, method, params).await
	}

	/// The bound position.
	pub fn position(&self) -> &TextPosition {
		&self.pos
	}

	/// The underlying session.
	pub fn session(&self) -> &Arc<Session> {
		&self.session
	}
}
