//! Events emitted by sessions

use bytes::Bytes;

use crate::SessionHandle;

/// Asynchronous protocol event raised by one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
	/// Connection established; `reconnect` is true when the engine
	/// re-established it on its own rather than in answer to `connect`
	Connect {
		/// Engine-driven re-connection
		reconnect: bool,
	},
	/// Connection ended; `cause` is set only when the caller did not ask for it
	Disconnect {
		/// Why the connection dropped
		cause: Option<String>,
	},
	/// Message received on a subscribed topic
	Message {
		/// Concrete topic the message was published to
		topic: String,
		/// Raw payload
		payload: Bytes,
	},
	/// Informational failure; the session keeps its state
	Error {
		/// Human readable description
		message: String,
	},
}

impl Event {
	/// Event name as seen by listeners across the RPC boundary.
	pub fn name(&self) -> &'static str {
		match self {
			| Event::Connect { .. } => "connect",
			| Event::Disconnect { .. } => "disconnect",
			| Event::Message { .. } => "message",
			| Event::Error { .. } => "error",
		}
	}
}

/// An event tagged with the handle of the session that raised it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
	/// Originating session
	pub handle: SessionHandle,
	/// What happened
	pub event: Event,
}

impl SessionEvent {
	/// Tag `event` with `handle`.
	pub fn new(handle: SessionHandle, event: Event) -> Self {
		Self { handle, event }
	}
}
