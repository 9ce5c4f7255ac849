//! Per-caller session view
//!
//! The facade delivers every session's events to one listener. [`SessionHub`]
//! makes that listener a broadcast channel; each [`MqttClient`] owns one
//! session, keeps its own receiver, and skips events of other sessions.

use bytes::Bytes;
use mqtt_sessions_core::{
	ConnectionOptions, EngineFactory, Event, MqttSessions, SessionError,
	SessionEvent, SessionHandle, SessionState,
};
use tokio::sync::broadcast;
use tracing::{debug, warn};

const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Owner of the facade and its broadcast event channel.
#[derive(Debug, Clone)]
pub struct SessionHub {
	sessions: MqttSessions,
	events: broadcast::Sender<SessionEvent>,
}

impl Default for SessionHub {
	fn default() -> Self {
		Self::new()
	}
}

impl SessionHub {
	/// Hub backed by `rumqttc`.
	pub fn new() -> Self {
		let (events, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
		Self {
			sessions: MqttSessions::new(events.clone()),
			events,
		}
	}

	/// Hub whose sessions get their engine from `engines`.
	///
	/// `capacity` bounds how far a client may fall behind before it starts
	/// losing events.
	pub fn with_engine_factory(
		engines: impl EngineFactory,
		capacity: usize,
	) -> Self {
		let (events, _) = broadcast::channel(capacity);
		Self {
			sessions: MqttSessions::with_engine_factory(events.clone(), engines),
			events,
		}
	}

	/// Allocate a session and wrap it in a client.
	pub fn client(&self) -> MqttClient {
		// Subscribe first so no event of the new session can be missed
		let events = self.events.subscribe();
		let handle = self.sessions.new_session();
		MqttClient {
			handle,
			sessions: self.sessions.clone(),
			events,
			connected: false,
			closed: false,
		}
	}

	/// The underlying facade.
	pub fn sessions(&self) -> &MqttSessions {
		&self.sessions
	}

	/// Tear every session down.
	pub async fn shutdown(&self) {
		self.sessions.shutdown().await;
	}
}

/// One logical MQTT connection as seen by its caller.
///
/// Checks the caller-side guards before anything reaches the session, and
/// tracks the connection from the events it consumes.
#[derive(Debug)]
pub struct MqttClient {
	handle: SessionHandle,
	sessions: MqttSessions,
	events: broadcast::Receiver<SessionEvent>,
	connected: bool,
	closed: bool,
}

impl MqttClient {
	/// Handle of the session behind this client.
	pub fn handle(&self) -> &SessionHandle {
		&self.handle
	}

	/// Whether the last known outcome left the session connected.
	pub fn is_connected(&self) -> bool {
		self.connected
	}

	/// Whether `close` was called.
	pub fn is_closed(&self) -> bool {
		self.closed
	}

	/// Connect and wait for the broker's answer.
	pub async fn connect(
		&mut self,
		host: &str,
		options: ConnectionOptions,
	) -> Result<(), SessionError> {
		self.ensure_open()?;
		if self.connected {
			return Err(SessionError::AlreadyConnected);
		}
		self.sessions.connect(&self.handle, host, options).await?;
		self.connected = true;
		Ok(())
	}

	/// Subscribe to `topics`, each at the QoS level at the same position.
	pub fn subscribe(
		&self,
		topics: Vec<String>,
		qos_levels: Vec<i64>,
	) -> Result<(), SessionError> {
		self.ensure_connected()?;
		self.sessions.subscribe(&self.handle, topics, qos_levels);
		Ok(())
	}

	/// Unsubscribe from `topics`.
	pub fn unsubscribe(&self, topics: Vec<String>) -> Result<(), SessionError> {
		self.ensure_connected()?;
		self.sessions.unsubscribe(&self.handle, topics);
		Ok(())
	}

	/// Publish `payload` to `topic`.
	pub fn publish(
		&self,
		topic: &str,
		payload: impl Into<Bytes>,
		qos: i64,
		retained: bool,
	) -> Result<(), SessionError> {
		self.ensure_connected()?;
		self.sessions
			.publish(&self.handle, topic, payload, qos, retained);
		Ok(())
	}

	/// Ask the session to disconnect; completion arrives as
	/// [`Event::Disconnect`].
	pub fn disconnect(&self) -> Result<(), SessionError> {
		self.ensure_open()?;
		self.sessions.disconnect(&self.handle);
		Ok(())
	}

	/// Close the session. The client is unusable afterwards.
	pub fn close(&mut self) -> Result<(), SessionError> {
		self.ensure_open()?;
		if self.connected {
			return Err(SessionError::NotDisconnected);
		}
		self.sessions.close(&self.handle);
		self.closed = true;
		Ok(())
	}

	/// Session state as the session itself sees it.
	pub async fn state(&self) -> Option<SessionState> {
		self.sessions.state(&self.handle).await
	}

	/// Next event of this client's session; `None` once the hub is gone.
	pub async fn next_event(&mut self) -> Option<Event> {
		loop {
			match self.events.recv().await {
				| Ok(SessionEvent { handle, event }) if handle == self.handle => {
					match &event {
						| Event::Connect { .. } => self.connected = true,
						| Event::Disconnect { .. } => self.connected = false,
						| _ => {}
					}
					return Some(event);
				}
				| Ok(_) => {}
				| Err(broadcast::error::RecvError::Lagged(skipped)) => {
					warn!(handle = %self.handle, skipped, "Client fell behind, events lost");
				}
				| Err(broadcast::error::RecvError::Closed) => {
					debug!(handle = %self.handle, "Event channel closed");
					return None;
				}
			}
		}
	}

	fn ensure_open(&self) -> Result<(), SessionError> {
		if self.closed {
			return Err(SessionError::SessionClosed);
		}
		Ok(())
	}

	fn ensure_connected(&self) -> Result<(), SessionError> {
		self.ensure_open()?;
		if !self.connected {
			return Err(SessionError::NotConnected);
		}
		Ok(())
	}
}
