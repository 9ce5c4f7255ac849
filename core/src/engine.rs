//! Seam between sessions and the MQTT wire-protocol engine
//!
//! A session drives its engine through [`Engine`] and hears back through
//! [`EngineEvents`]. The engine owns packet framing, QoS retries and
//! keep-alive; the session owns lifecycle state. Requests never block on
//! network I/O; their outcomes come back as [`EngineEvent`]s.

use bytes::Bytes;
use rumqttc::{ConnectReturnCode, QoS};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::identity::ClientIdentity;
use crate::options::{BrokerAddress, ConnectionOptions};
use crate::SessionHandle;

#[cfg(test)]
pub(crate) mod mock;
/// Engine backed by `rumqttc`
pub mod rumqtt;
pub(crate) mod transport;

pub use rumqtt::{EngineSettings, RumqttEngine, RumqttEngineFactory};

/// Everything an engine needs to open one connection.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
	/// Where to connect
	pub broker: BrokerAddress,
	/// Caller options; unset fields keep engine defaults
	pub options: ConnectionOptions,
	/// Client identity prepared from the PKCS#12 bundle, if any
	pub identity: Option<ClientIdentity>,
}

/// Callback raised by an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
	/// Broker answered a CONNECT, either the one the session asked for or one
	/// the engine sent while reconnecting on its own
	ConnAck(Result<(), ConnectFailure>),
	/// Connection gone; `cause` is `None` when the session asked for it
	Disconnected {
		/// Failure description
		cause: Option<String>,
	},
	/// Incoming PUBLISH
	Message {
		/// Concrete topic
		topic: String,
		/// Raw payload
		payload: Bytes,
	},
	/// Failure that does not end the connection
	Error(String),
}

/// Why a connection attempt did not produce a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectFailure {
	/// Broker answered with a failure return code
	#[error("Broker rejected connection: {code:?}")]
	Refused {
		/// CONNACK return code
		code: ConnectReturnCode,
	},

	/// Transport could not reach or talk to the broker
	#[error("Network connection failed: {0}")]
	Network(String),

	/// No CONNACK within the connect timeout
	#[error("Connection establishment timed out after {timeout_millis}ms")]
	Timeout {
		/// Timeout that expired
		timeout_millis: u64,
	},
}

impl ConnectFailure {
	/// Whether the broker refused the credentials.
	pub fn is_authentication(&self) -> bool {
		matches!(
			self,
			ConnectFailure::Refused {
				code: ConnectReturnCode::BadUserNamePassword
					| ConnectReturnCode::NotAuthorized,
			}
		)
	}
}

/// Engine request failures.
#[derive(Debug, Error)]
pub enum EngineError {
	/// Request issued while no connection attempt is running
	#[error("Engine has no active connection")]
	Inactive,

	/// Request queue rejected the request
	#[error("Engine request failed: {0}")]
	Request(#[from] rumqttc::ClientError),

	/// TLS material could not be turned into a transport
	#[error("Transport configuration failed: {0}")]
	Transport(String),
}

/// Channel an engine uses to report back to its session.
///
/// Each connect attempt gets its own generation so the session can tell
/// callbacks of an abandoned attempt from current ones.
#[derive(Debug, Clone)]
pub struct EngineEvents {
	generation: u64,
	tx: UnboundedSender<(u64, EngineEvent)>,
}

impl EngineEvents {
	pub(crate) fn new(
		generation: u64,
		tx: UnboundedSender<(u64, EngineEvent)>,
	) -> Self {
		Self { generation, tx }
	}

	/// Report an event. Returns `false` once the session is gone.
	pub fn emit(&self, event: EngineEvent) -> bool {
		self.tx.send((self.generation, event)).is_ok()
	}

	/// Connect attempt these events belong to.
	pub fn generation(&self) -> u64 {
		self.generation
	}
}

/// One engine instance, exclusively owned by one session.
pub trait Engine: Send + 'static {
	/// Start connecting. The outcome arrives as [`EngineEvent::ConnAck`].
	fn connect(
		&mut self,
		request: ConnectRequest,
		events: EngineEvents,
	) -> Result<(), EngineError>;

	/// Subscribe to all filters in one request.
	fn subscribe(&mut self, filters: Vec<(String, QoS)>) -> Result<(), EngineError>;

	/// Unsubscribe from the given filters.
	fn unsubscribe(&mut self, topics: Vec<String>) -> Result<(), EngineError>;

	/// Publish one message.
	fn publish(
		&mut self,
		topic: String,
		payload: Bytes,
		qos: QoS,
		retain: bool,
	) -> Result<(), EngineError>;

	/// Gracefully disconnect; completion arrives as
	/// [`EngineEvent::Disconnected`] without a cause.
	fn disconnect(&mut self) -> Result<(), EngineError>;

	/// Stop all activity immediately. Idempotent.
	fn shutdown(&mut self);
}

/// Builds one engine per session.
pub trait EngineFactory: Send + Sync + 'static {
	/// Create the engine for a freshly allocated session.
	fn create(&self, handle: &SessionHandle) -> Box<dyn Engine>;
}

impl<F> EngineFactory for F
where F: Fn(&SessionHandle) -> Box<dyn Engine> + Send + Sync + 'static
{
	fn create(&self, handle: &SessionHandle) -> Box<dyn Engine> {
		self(handle)
	}
}
