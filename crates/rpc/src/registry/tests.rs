use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::Notify;

use super::*;
use crate::types::{ResponseError, RpcRef, SessionId};
use crate::{Error, error_codes};

fn init_tracing() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Let fire-and-forget tasks spawned by the registry run to completion.
async fn settle() {
	for _ in 0..8 {
		tokio::task::yield_now().await;
	}
}

#[derive(Default)]
struct MockTransport {
	create_count: AtomicUsize,
	call_count: AtomicUsize,
	closed: Mutex<Vec<SessionId>>,
	next_call_error: Mutex<Option<ResponseError>>,
}

#[async_trait]
impl RpcTransport for MockTransport {
	async fn create_session(&self, doc: &DocId) -> crate::Result<SessionId> {
		let n = self.create_count.fetch_add(1, Ordering::SeqCst);
		Ok(SessionId::new(format!("{doc}#{n}")))
	}

	async fn close_session(&self, session: &SessionId) -> crate::Result<()> {
		self.closed.lock().push(session.clone());
		Ok(())
	}

	async fn call(
		&self,
		_session: &SessionId,
		_pos: &TextPosition,
		_method: &str,
		_params: Value,
	) -> crate::Result<Value> {
		self.call_count.fetch_add(1, Ordering::SeqCst);
		if let Some(err) = self.next_call_error.lock().take() {
			return Err(Error::Response(err));
		}
		Ok(json!({ "goals": [] }))
	}

	async fn release(&self, _session: &SessionId, _doc: &DocId, _refs: Vec<RpcRef>) -> crate::Result<()> {
		Ok(())
	}

	async fn keep_alive(&self, _session: &SessionId, _doc: &DocId) -> crate::Result<()> {
		Ok(())
	}
}

#[tokio::test]
async fn get_or_create_caches_one_session_per_document() {
	init_tracing();
	let transport = Arc::new(MockTransport::default());
	let registry = SessionRegistry::new(transport.clone());
	let doc = DocId::from("file:///a.ext");

	let first = registry.get_or_create(&doc);
	let second = registry.get_or_create(&doc);

	assert!(Arc::ptr_eq(&first, &second));
	let first_id = first.wait_ready().await.expect("ready");
	let second_id = second.wait_ready().await.expect("ready");
	assert_eq!(first_id, second_id);
	assert_eq!(transport.create_count.load(Ordering::SeqCst), 1);
	assert_eq!(registry.active_count(), 1);
}

struct GatedTransport {
	create_count: AtomicUsize,
	started: Notify,
	proceed: Notify,
}

#[async_trait]
impl RpcTransport for GatedTransport {
	async fn create_session(&self, _doc: &DocId) -> crate::Result<SessionId> {
		self.create_count.fetch_add(1, Ordering::SeqCst);
		self.started.notify_one();
		self.proceed.notified().await;
		Ok(SessionId::new("s-0"))
	}

	async fn close_session(&self, _session: &SessionId) -> crate::Result<()> {
		Ok(())
	}

	async fn call(
		&self,
		_session: &SessionId,
		_pos: &TextPosition,
		_method: &str,
		_params: Value,
	) -> crate::Result<Value> {
		unimplemented!()
	}

	async fn release(&self, _session: &SessionId, _doc: &DocId, _refs: Vec<RpcRef>) -> crate::Result<()> {
		Ok(())
	}

	async fn keep_alive(&self, _session: &SessionId, _doc: &DocId) -> crate::Result<()> {
		Ok(())
	}
}

#[tokio::test]
async fn callers_share_a_pending_session() {
	let transport = Arc::new(GatedTransport {
		create_count: AtomicUsize::new(0),
		started: Notify::new(),
		proceed: Notify::new(),
	});
	let registry = SessionRegistry::new(transport.clone());
	let doc = DocId::from("file:///a.ext");

	let first = registry.get_or_create(&doc);
	transport.started.notified().await;

	// The id request is still in flight; the same session is handed out.
	let second = registry.get_or_create(&doc);
	assert!(Arc::ptr_eq(&first, &second));

	transport.proceed.notify_one();
	let first_id = first.wait_ready().await.expect("ready");
	assert_eq!(first_id, second.wait_ready().await.expect("ready"));
	assert_eq!(transport.create_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn fatal_call_error_retires_session_and_recreates() {
	init_tracing();
	let transport = Arc::new(MockTransport::default());
	let registry = SessionRegistry::new(transport.clone());
	let doc = DocId::from("file:///a.ext");
	let pos = TextPosition::new(doc.clone(), 3, 7);

	let session = registry.get_or_create(&doc);
	let session_id = session.wait_ready().await.expect("ready");

	*transport.next_call_error.lock() =
		Some(ResponseError::new(error_codes::WORKER_CRASHED, "worker crashed"));
	let err = session
		.call(&pos, "m", json!({}))
		.await
		.expect_err("fatal error surfaces");
	assert!(matches!(err, Error::Response(resp) if resp.code == error_codes::WORKER_CRASHED));

	// Removal is synchronous with the failure, before the close
	// notification has settled.
	assert_eq!(registry.active_count(), 0);
	assert!(session.is_failed());

	let replacement = registry.get_or_create(&doc);
	assert!(!Arc::ptr_eq(&session, &replacement));
	replacement.wait_ready().await.expect("ready");
	assert_eq!(transport.create_count.load(Ordering::SeqCst), 2);

	settle().await;
	assert_eq!(transport.closed.lock().as_slice(), [session_id]);
}

#[tokio::test]
async fn transient_call_error_passes_through() {
	let transport = Arc::new(MockTransport::default());
	let registry = SessionRegistry::new(transport.clone());
	let doc = DocId::from("file:///a.ext");
	let pos = TextPosition::new(doc.clone(), 0, 0);

	let session = registry.get_or_create(&doc);
	session.wait_ready().await.expect("ready");

	*transport.next_call_error.lock() = Some(ResponseError::new(-32602, "invalid params"));
	let err = session
		.call(&pos, "m", json!({}))
		.await
		.expect_err("error surfaces");
	assert!(matches!(err, Error::Response(resp) if resp.code == -32602));

	assert!(!session.is_failed());
	assert_eq!(registry.active_count(), 1);
}

#[tokio::test]
async fn failed_session_rejects_without_calling_transport() {
	let transport = Arc::new(MockTransport::default());
	let registry = SessionRegistry::new(transport.clone());
	let doc = DocId::from("file:///a.ext");
	let pos = TextPosition::new(doc.clone(), 0, 0);

	let session = registry.get_or_create(&doc);
	session.wait_ready().await.expect("ready");
	registry.close_for_document(&doc);

	let err = session
		.call(&pos, "m", json!({}))
		.await
		.expect_err("failed session rejects");
	assert!(matches!(err, Error::SessionFailed(FailureReason::DocumentClosed)));
	assert_eq!(transport.call_count.load(Ordering::SeqCst), 0);
	assert_eq!(registry.active_count(), 0);
}

#[derive(Default)]
struct FailingTransport {
	create_count: AtomicUsize,
}

#[async_trait]
impl RpcTransport for FailingTransport {
	async fn create_session(&self, _doc: &DocId) -> crate::Result<SessionId> {
		self.create_count.fetch_add(1, Ordering::SeqCst);
		Err(Error::ServiceStopped)
	}

	async fn close_session(&self, _session: &SessionId) -> crate::Result<()> {
		Ok(())
	}

	async fn call(
		&self,
		_session: &SessionId,
		_pos: &TextPosition,
		_method: &str,
		_params: Value,
	) -> crate::Result<Value> {
		unimplemented!()
	}

	async fn release(&self, _session: &SessionId, _doc: &DocId, _refs: Vec<RpcRef>) -> crate::Result<()> {
		Ok(())
	}

	async fn keep_alive(&self, _session: &SessionId, _doc: &DocId) -> crate::Result<()> {
		Ok(())
	}
}

#[tokio::test]
async fn create_failure_fails_fast_and_allows_retry() {
	let transport = Arc::new(FailingTransport::default());
	let registry = SessionRegistry::new(transport.clone());
	let doc = DocId::from("file:///a.ext");

	let session = registry.get_or_create(&doc);
	let err = session.wait_ready().await.expect_err("creation failed");
	assert!(matches!(err, Error::SessionFailed(FailureReason::CreateFailed(_))));
	assert_eq!(registry.active_count(), 0);

	// Calls made afterward observe the stored reason.
	let err = session
		.call(&TextPosition::new(doc.clone(), 0, 0), "m", json!({}))
		.await
		.expect_err("still failed");
	assert!(matches!(err, Error::SessionFailed(FailureReason::CreateFailed(_))));

	let second = registry.get_or_create(&doc);
	assert!(!Arc::ptr_eq(&session, &second));
	let _ = second.wait_ready().await;
	assert_eq!(transport.create_count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn close_all_notifies_every_session() {
	let transport = Arc::new(MockTransport::default());
	let registry = SessionRegistry::new(transport.clone());

	let mut ids = Vec::new();
	for i in 0..3 {
		let doc = DocId::from(format!("file:///{i}.ext"));
		let session = registry.get_or_create(&doc);
		ids.push(session.wait_ready().await.expect("ready"));
	}

	registry.close_all();
	assert_eq!(registry.active_count(), 0);

	settle().await;
	let closed = transport.closed.lock().clone();
	assert_eq!(closed.len(), 3);
	for id in &ids {
		assert!(closed.contains(id));
	}
}
