//! Session state machine

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::dispatcher::EventDispatcher;
use crate::engine::{
	ConnectFailure, ConnectRequest, Engine, EngineEvent, EngineEvents,
};
use crate::identity::{self, ClientIdentity};
use crate::options::{
	BrokerAddress, ConnectionOptions, qos_from_level, validate_publish_topic,
};
use crate::{Event, SessionError, SessionHandle};

/// One-shot continuation receiving the outcome of `connect`.
pub type ConnectCallback = Box<dyn FnOnce(Result<(), SessionError>) + Send>;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
	/// Allocated, never connected
	New,
	/// Connect issued, waiting for the broker
	Connecting,
	/// Live connection
	Connected,
	/// Connection ended; may connect again
	Disconnected,
	/// Torn down; the handle is released
	Closed,
}

impl fmt::Display for SessionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			| SessionState::New => "new",
			| SessionState::Connecting => "connecting",
			| SessionState::Connected => "connected",
			| SessionState::Disconnected => "disconnected",
			| SessionState::Closed => "closed",
		};
		f.write_str(name)
	}
}

/// State machine of one logical connection.
///
/// Not thread-safe by itself: every call must come from the same execution
/// context, which [`SessionActor`](super::SessionActor) provides.
pub struct Session {
	handle: SessionHandle,
	state: SessionState,
	/// State to fall back to when the pending connect fails
	resume_state: SessionState,
	engine: Box<dyn Engine>,
	pending_connect: Option<ConnectCallback>,
	identity: Option<ClientIdentity>,
	generation: u64,
	engine_tx: UnboundedSender<(u64, EngineEvent)>,
	dispatcher: Arc<EventDispatcher>,
}

impl Session {
	/// Create a session in [`SessionState::New`].
	///
	/// The returned receiver yields engine callbacks; feed them back through
	/// [`Session::handle_engine_event`].
	pub fn new(
		handle: SessionHandle,
		engine: Box<dyn Engine>,
		dispatcher: Arc<EventDispatcher>,
	) -> (Self, UnboundedReceiver<(u64, EngineEvent)>) {
		let (engine_tx, engine_rx) = mpsc::unbounded_channel();
		let session = Self {
			handle,
			state: SessionState::New,
			resume_state: SessionState::New,
			engine,
			pending_connect: None,
			identity: None,
			generation: 0,
			engine_tx,
			dispatcher,
		};
		(session, engine_rx)
	}

	/// Handle this session was registered under.
	pub fn handle(&self) -> &SessionHandle {
		&self.handle
	}

	/// Current lifecycle state.
	pub fn state(&self) -> SessionState {
		self.state
	}

	/// Whether a connect is waiting for its outcome.
	pub fn has_pending_connect(&self) -> bool {
		self.pending_connect.is_some()
	}

	/// Start connecting to `host`. The outcome is handed to `callback`
	/// exactly once, either right away (rejected before any network activity)
	/// or when the engine answers.
	pub fn connect(
		&mut self,
		host: &str,
		options: ConnectionOptions,
		callback: ConnectCallback,
	) {
		if let Err(err) = self.start_connect(host, options) {
			debug!(handle = %self.handle, error = %err, "Connect rejected");
			callback(Err(err));
			return;
		}
		if let Some(stale) = self.pending_connect.replace(callback) {
			warn!(handle = %self.handle, "Pending connect replaced, cancelling the old one");
			stale(Err(SessionError::Cancelled(
				"superseded by a newer connect".to_string(),
			)));
		}
	}

	fn start_connect(
		&mut self,
		host: &str,
		options: ConnectionOptions,
	) -> Result<(), SessionError> {
		match self.state {
			| SessionState::Connecting => return Err(SessionError::AlreadyConnecting),
			| SessionState::Connected => return Err(SessionError::AlreadyConnected),
			| SessionState::Closed => return Err(SessionError::SessionClosed),
			| SessionState::New | SessionState::Disconnected => {}
		}

		options.validate()?;
		let broker = BrokerAddress::parse(host)?;
		let identity = match options.tls.as_ref().and_then(|tls| tls.p12.as_deref()) {
			| Some(bundle) => {
				let passphrase = options
					.tls
					.as_ref()
					.and_then(|tls| tls.pass.as_deref())
					.unwrap_or_default();
				Some(identity::prepare(bundle, passphrase)?)
			}
			| None => None,
		};

		self.generation += 1;
		let events = EngineEvents::new(self.generation, self.engine_tx.clone());
		let request = ConnectRequest {
			broker,
			options,
			identity: identity.clone(),
		};
		self.engine.connect(request, events)?;

		self.identity = identity;
		self.transition(SessionState::Connecting);
		Ok(())
	}

	/// Subscribe to every topic at the QoS level at the same position.
	pub fn subscribe(
		&mut self,
		topics: Vec<String>,
		qos_levels: Vec<i64>,
	) -> Result<(), SessionError> {
		if topics.len() != qos_levels.len() {
			return Err(SessionError::MalformedInput(format!(
				"{} topics but {} QoS levels",
				topics.len(),
				qos_levels.len()
			)));
		}
		self.ensure_connected()?;
		if topics.is_empty() {
			return Ok(());
		}
		let filters = topics
			.into_iter()
			.zip(qos_levels.into_iter().map(qos_from_level))
			.collect();
		self.engine
			.subscribe(filters)
			.map_err(|err| self.report("Error subscribing", err.into()))
	}

	/// Unsubscribe from the given topic filters.
	pub fn unsubscribe(&mut self, topics: Vec<String>) -> Result<(), SessionError> {
		self.ensure_connected()?;
		if topics.is_empty() {
			return Ok(());
		}
		self.engine
			.unsubscribe(topics)
			.map_err(|err| self.report("Error unsubscribing", err.into()))
	}

	/// Publish one message; unknown QoS levels fall back to 0.
	pub fn publish(
		&mut self,
		topic: String,
		payload: Bytes,
		qos: i64,
		retained: bool,
	) -> Result<(), SessionError> {
		self.ensure_connected()?;
		validate_publish_topic(&topic)?;
		self.engine
			.publish(topic, payload, qos_from_level(qos), retained)
			.map_err(|err| self.report("Error publishing", err.into()))
	}

	/// Ask the engine to end the connection.
	///
	/// From `Connected` the transition happens when the engine confirms. A
	/// pending connect is cancelled on the spot.
	pub fn disconnect(&mut self) -> Result<(), SessionError> {
		match self.state {
			| SessionState::Closed => Err(SessionError::SessionClosed),
			| SessionState::New | SessionState::Disconnected => {
				// Stops an engine still retrying in the background
				self.engine.shutdown();
				Err(SessionError::NotConnected)
			}
			| SessionState::Connecting => {
				self.abandon_connection();
				self.cancel_pending("disconnect requested");
				self.transition(SessionState::Disconnected);
				Ok(())
			}
			| SessionState::Connected => {
				if let Err(err) = self.engine.disconnect() {
					warn!(handle = %self.handle, error = %err, "Engine refused disconnect, dropping connection");
					self.abandon_connection();
					self.transition(SessionState::Disconnected);
					self.emit(Event::Disconnect { cause: None });
				}
				Ok(())
			}
		}
	}

	/// Tear the session down. Only legal once no connection is live.
	pub fn close(&mut self) -> Result<(), SessionError> {
		match self.state {
			| SessionState::Connected | SessionState::Connecting => {
				Err(SessionError::NotDisconnected)
			}
			| SessionState::Closed => Err(SessionError::SessionClosed),
			| SessionState::New | SessionState::Disconnected => {
				self.teardown();
				Ok(())
			}
		}
	}

	/// Unconditional teardown: cancels a pending connect, stops the engine
	/// and moves to `Closed`.
	pub fn teardown(&mut self) {
		if self.state == SessionState::Closed {
			return;
		}
		self.abandon_connection();
		self.cancel_pending("session closed");
		self.identity = None;
		self.transition(SessionState::Closed);
	}

	/// Apply one engine callback tagged with its connect generation.
	pub fn handle_engine_event(&mut self, generation: u64, event: EngineEvent) {
		if generation != self.generation || self.state == SessionState::Closed {
			debug!(
				handle = %self.handle,
				generation,
				current = self.generation,
				"Ignoring engine event of a superseded connection"
			);
			return;
		}
		match event {
			| EngineEvent::ConnAck(Ok(())) => self.on_connected(),
			| EngineEvent::ConnAck(Err(failure)) => self.on_connect_failed(failure),
			| EngineEvent::Disconnected { cause } => self.on_disconnected(cause),
			| EngineEvent::Message { topic, payload } => {
				self.emit(Event::Message { topic, payload })
			}
			| EngineEvent::Error(message) => self.emit(Event::Error { message }),
		}
	}

	fn on_connected(&mut self) {
		match (self.state, self.pending_connect.take()) {
			| (SessionState::Connecting, Some(callback)) => {
				info!(handle = %self.handle, "Session connected");
				self.transition(SessionState::Connected);
				callback(Ok(()));
				self.emit(Event::Connect { reconnect: false });
			}
			| (SessionState::Connected, None) => {
				debug!(handle = %self.handle, "Duplicate connect acknowledgement ignored");
			}
			| (_, None) => {
				info!(handle = %self.handle, "Session reconnected by engine");
				self.transition(SessionState::Connected);
				self.emit(Event::Connect { reconnect: true });
			}
			| (state, Some(callback)) => {
				// Only `Connecting` ever holds a callback
				self.pending_connect = Some(callback);
				warn!(handle = %self.handle, state = %state, "Unexpected connect acknowledgement");
			}
		}
	}

	fn on_connect_failed(&mut self, failure: ConnectFailure) {
		let message = format!("Error connecting: {failure}");
		match self.pending_connect.take() {
			| Some(callback) => {
				warn!(handle = %self.handle, error = %failure, "Connect failed");
				self.abandon_connection();
				self.transition(self.resume_state);
				callback(Err(failure.into()));
			}
			| None => {
				warn!(handle = %self.handle, error = %failure, "Reconnect failed");
			}
		}
		self.emit(Event::Error { message });
	}

	fn on_disconnected(&mut self, cause: Option<String>) {
		match self.state {
			| SessionState::Connecting => {
				let reason = cause.unwrap_or_else(|| "connection closed".to_string());
				warn!(handle = %self.handle, cause = %reason, "Connection lost before acknowledgement");
				self.abandon_connection();
				self.transition(self.resume_state);
				if let Some(callback) = self.pending_connect.take() {
					callback(Err(SessionError::Engine(format!(
						"Error connecting: {reason}"
					))));
				}
			}
			| SessionState::Connected => {
				info!(handle = %self.handle, cause = ?cause, "Session disconnected");
				self.transition(SessionState::Disconnected);
				self.emit(Event::Disconnect { cause });
			}
			| state => {
				debug!(handle = %self.handle, state = %state, "Disconnect notification ignored");
			}
		}
	}

	fn ensure_connected(&self) -> Result<(), SessionError> {
		match self.state {
			| SessionState::Connected => Ok(()),
			| SessionState::Closed => Err(SessionError::SessionClosed),
			| _ => Err(SessionError::NotConnected),
		}
	}

	/// Stop the engine and invalidate callbacks already in flight.
	fn abandon_connection(&mut self) {
		self.engine.shutdown();
		self.generation += 1;
	}

	fn cancel_pending(&mut self, reason: &str) {
		if let Some(callback) = self.pending_connect.take() {
			callback(Err(SessionError::Cancelled(reason.to_string())));
		}
	}

	fn transition(&mut self, next: SessionState) {
		if next == SessionState::Connecting {
			self.resume_state = self.state;
		}
		debug!(handle = %self.handle, from = %self.state, to = %next, "Session state change");
		self.state = next;
	}

	fn report(&self, context: &str, err: SessionError) -> SessionError {
		self.emit(Event::Error {
			message: format!("{context}: {err}"),
		});
		err
	}

	fn emit(&self, event: Event) {
		self.dispatcher.emit(&self.handle, event);
	}
}

impl fmt::Debug for Session {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Session")
			.field("handle", &self.handle)
			.field("state", &self.state)
			.field("generation", &self.generation)
			.field("pending_connect", &self.pending_connect.is_some())
			.finish()
	}
}
