//! Batched release notifications.
//!
//! Releasing references one at a time would flood the wire during
//! hover/scroll churn; the batcher coalesces tokens per session and
//! flushes either after a short delay or as soon as the queue outgrows
//! the batch limit.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::SessionConfig;
use crate::session::SessionState;
use crate::transport::RpcTransport;
use crate::types::{DocId, RpcRef};

/// Pending queue plus the flush timer guarding it.
struct BatchState {
	pending: Vec<RpcRef>,
	timer: Option<JoinHandle<()>>,
}

struct BatcherInner {
	transport: Arc<dyn RpcTransport>,
	doc: DocId,
	limit: usize,
	delay: Duration,
	runtime: Handle,
	state: watch::Receiver<SessionState>,
	queue: Mutex<BatchState>,
}

/// Per-session release queue.
///
/// Owned by the session; reference guards hold a clone so tokens can
/// still be enqueued while a call result outlives its session handle.
/// Failure is observed through the session's state channel, at enqueue
/// time and again when a timer fires.
#[derive(Clone)]
pub(crate) struct ReleaseBatcher {
	inner: Arc<BatcherInner>,
}

impl ReleaseBatcher {
	pub(crate) fn new(
		transport: Arc<dyn RpcTransport>,
		doc: DocId,
		config: &SessionConfig,
		runtime: Handle,
		state: watch::Receiver<SessionState>,
	) -> Self {
		Self {
			inner: Arc::new(BatcherInner {
				transport,
				doc,
				limit: config.release_batch_limit,
				delay: config.flush_delay(),
				runtime,
				state,
				queue: Mutex::new(BatchState {
					pending: Vec::new(),
					timer: None,
				}),
			}),
		}
	}

	/// Queue one token for release.
	///
	/// Exceeding the batch limit flushes immediately; otherwise a single
	/// timer is left to pick the queue up after the flush delay. Tokens
	/// for an already-failed session are dropped.
	pub(crate) fn enqueue(&self, token: RpcRef) {
		let inner = &self.inner;
		if matches!(&*inner.state.borrow(), SessionState::Failed(_)) {
			return;
		}
		let over_limit = {
			let mut queue = inner.queue.lock();
			queue.pending.push(token);
			if queue.pending.len() > inner.limit {
				if let Some(timer) = queue.timer.take() {
					timer.abort();
				}
				true
			} else {
				if queue.timer.is_none() {
					let batcher = self.clone();
					queue.timer = Some(inner.runtime.spawn(async move {
						tokio::time::sleep(batcher.inner.delay).await;
						// Clear the handle first so an enqueue racing the
						// flush can schedule a fresh timer.
						batcher.inner.queue.lock().timer = None;
						batcher.flush_now();
					}));
				}
				false
			}
		};
		if over_limit {
			self.flush_now();
		}
	}

	/// Send everything pending in one notification.
	///
	/// No-op for failed sessions and empty queues. The notification is
	/// fire-and-forget; its outcome is ignored.
	pub(crate) fn flush_now(&self) {
		let inner = &self.inner;
		let session = match &*inner.state.borrow() {
			SessionState::Ready(id) => id.clone(),
			// Nothing can be pending before the id exists, and a failed
			// session must not release anything.
			_ => return,
		};
		let batch = {
			let mut queue = inner.queue.lock();
			if queue.pending.is_empty() {
				return;
			}
			std::mem::take(&mut queue.pending)
		};
		debug!(doc = %inner.doc, count = batch.len(), "releasing rpc references");
		let transport = inner.transport.clone();
		let doc = inner.doc.clone();
		inner.runtime.spawn(async move {
			let _ = transport.release(&session, &doc, batch).await;
		});
	}

	/// Stop the timer and drop anything still queued.
	///
	/// Called on session failure.
	pub(crate) fn shutdown(&self) {
		let mut queue = self.inner.queue.lock();
		if let Some(timer) = queue.timer.take() {
			timer.abort();
		}
		if !queue.pending.is_empty() {
			debug!(doc = %self.inner.doc, dropped = queue.pending.len(), "dropping queued releases for failed session");
			queue.pending.clear();
		}
	}
}
