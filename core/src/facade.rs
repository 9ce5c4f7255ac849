//! Caller-facing operation set
//!
//! [`MqttSessions`] resolves handles through the registry and queues work on
//! each session's task. Apart from `connect`, operations are fire-and-forget:
//! rejections are logged, and outcomes are observed through the listener.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::dispatcher::{EventDispatcher, EventListener};
use crate::engine::{EngineFactory, RumqttEngineFactory};
use crate::identity::decode_base64;
use crate::options::ConnectionOptions;
use crate::registry::SessionRegistry;
use crate::session::{Session, SessionActor, SessionHandler, SessionState};
use crate::{SessionError, SessionHandle};

#[cfg(test)]
mod facade_tests;

/// Multi-session MQTT facade.
///
/// Cheap to clone; clones share the same sessions and listener. Creating
/// sessions requires a running tokio runtime.
#[derive(Clone)]
pub struct MqttSessions {
	registry: Arc<SessionRegistry<SessionHandler>>,
	dispatcher: Arc<EventDispatcher>,
	engines: Arc<dyn EngineFactory>,
}

impl MqttSessions {
	/// Facade backed by `rumqttc`, delivering every event to `listener`.
	pub fn new(listener: impl EventListener) -> Self {
		Self::with_engine_factory(listener, RumqttEngineFactory::default())
	}

	/// Facade whose sessions get their engine from `engines`.
	pub fn with_engine_factory(
		listener: impl EventListener,
		engines: impl EngineFactory,
	) -> Self {
		Self {
			registry: Arc::new(SessionRegistry::new()),
			dispatcher: Arc::new(EventDispatcher::new(listener)),
			engines: Arc::new(engines),
		}
	}

	/// Allocate a session in the `New` state.
	pub fn new_session(&self) -> SessionHandle {
		let registry = Arc::downgrade(&self.registry);
		let handle = self.registry.create(|handle| {
			let engine = self.engines.create(handle);
			let (session, engine_events) =
				Session::new(handle.clone(), engine, Arc::clone(&self.dispatcher));
			SessionActor::spawn(session, engine_events, registry)
		});
		info!(handle = %handle, "Session created");
		handle
	}

	/// Connect a session; `callback` receives the outcome exactly once.
	///
	/// An unknown handle resolves with [`SessionError::UnknownSession`].
	pub fn connect_with_callback<F>(
		&self,
		handle: &SessionHandle,
		host: &str,
		options: ConnectionOptions,
		callback: F,
	) where
		F: FnOnce(Result<(), SessionError>) + Send + 'static,
	{
		match self.registry.get(handle) {
			| Some(session) => {
				// A failed send hands the callback its error itself
				let _ = session.connect(host.to_string(), options, Box::new(callback));
			}
			| None => {
				debug!(handle = %handle, "Connect on unknown session");
				callback(Err(SessionError::UnknownSession));
			}
		}
	}

	/// Connect a session and get its outcome as a future.
	///
	/// The request is queued right away; awaiting the outcome is optional.
	pub fn connect(
		&self,
		handle: &SessionHandle,
		host: &str,
		options: ConnectionOptions,
	) -> ConnectOutcome {
		let (tx, rx) = oneshot::channel();
		self.connect_with_callback(handle, host, options, move |result| {
			let _ = tx.send(result);
		});
		ConnectOutcome { rx }
	}

	/// Subscribe to `topics`, each at the QoS level at the same position.
	pub fn subscribe(
		&self,
		handle: &SessionHandle,
		topics: Vec<String>,
		qos_levels: Vec<i64>,
	) {
		self.forward(handle, "subscribe", |session| {
			session.subscribe(topics, qos_levels)
		});
	}

	/// Unsubscribe from `topics`.
	pub fn unsubscribe(&self, handle: &SessionHandle, topics: Vec<String>) {
		self.forward(handle, "unsubscribe", |session| session.unsubscribe(topics));
	}

	/// Publish `payload` to `topic`.
	pub fn publish(
		&self,
		handle: &SessionHandle,
		topic: &str,
		payload: impl Into<Bytes>,
		qos: i64,
		retained: bool,
	) {
		let payload = payload.into();
		self.forward(handle, "publish", |session| {
			session.publish(topic.to_string(), payload, qos, retained)
		});
	}

	/// Publish a payload that crossed the RPC boundary base64-encoded.
	///
	/// Undecodable input publishes nothing.
	pub fn publish_base64(
		&self,
		handle: &SessionHandle,
		topic: &str,
		payload_base64: &str,
		qos: i64,
		retained: bool,
	) {
		match decode_base64(payload_base64) {
			| Ok(payload) => self.publish(handle, topic, payload, qos, retained),
			| Err(err) => {
				let err = SessionError::MalformedInput(format!(
					"Payload is not valid base64: {err}"
				));
				warn!(handle = %handle, topic = %topic, error = %err, "Publish rejected");
			}
		}
	}

	/// Disconnect a session.
	pub fn disconnect(&self, handle: &SessionHandle) {
		self.forward(handle, "disconnect", SessionHandler::disconnect);
	}

	/// Close a disconnected session and release its handle.
	pub fn close(&self, handle: &SessionHandle) {
		self.forward(handle, "close", SessionHandler::close);
	}

	/// Current state of a session, after every operation queued on it so
	/// far. `None` for unknown or released handles.
	pub async fn state(&self, handle: &SessionHandle) -> Option<SessionState> {
		let session = self.registry.get(handle)?;
		session.state().await
	}

	/// Handles of all live sessions.
	pub fn sessions(&self) -> Vec<SessionHandle> {
		self.registry.handles()
	}

	/// Tear every session down and detach the listener.
	pub async fn shutdown(&self) {
		let sessions: Vec<SessionHandler> = self
			.registry
			.handles()
			.iter()
			.filter_map(|handle| self.registry.get(handle))
			.collect();
		info!(sessions = sessions.len(), "Shutting down all sessions");
		futures::future::join_all(sessions.iter().map(SessionHandler::shutdown))
			.await;
		self.dispatcher.detach();
	}

	fn forward<F>(&self, handle: &SessionHandle, operation: &str, op: F)
	where F: FnOnce(&SessionHandler) -> Result<(), SessionError> {
		let result = match self.registry.get(handle) {
			| Some(session) => op(&session),
			| None => Err(SessionError::UnknownSession),
		};
		if let Err(err) = result {
			debug!(handle = %handle, operation, error = %err, "Operation dropped");
		}
	}
}

impl std::fmt::Debug for MqttSessions {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MqttSessions")
			.field("sessions", &self.registry.len())
			.field("dispatcher", &self.dispatcher)
			.finish()
	}
}

/// Outcome of [`MqttSessions::connect`].
///
/// Resolves to [`SessionError::Cancelled`] if the session goes away before
/// answering.
#[derive(Debug)]
#[must_use = "the connect outcome reports failures only when awaited"]
pub struct ConnectOutcome {
	rx: oneshot::Receiver<Result<(), SessionError>>,
}

impl Future for ConnectOutcome {
	type Output = Result<(), SessionError>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		Pin::new(&mut self.rx).poll(cx).map(|received| {
			received.unwrap_or_else(|_| {
				Err(SessionError::Cancelled(
					"session dropped the connect request".to_string(),
				))
			})
		})
	}
}
