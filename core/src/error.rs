//! Error taxonomy of session operations

use thiserror::Error;

use crate::engine::{ConnectFailure, EngineError};
use crate::identity::IdentityError;

/// Errors reported by session operations.
///
/// State-invariant violations on fire-and-forget operations never cross the
/// facade; they are logged and dropped. Only `connect` hands them back, through
/// its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
	/// Bad URL, bad base64, mismatched topic/QoS lists, invalid topic
	#[error("Malformed input: {0}")]
	MalformedInput(String),

	/// TLS passphrase or broker credentials rejected
	#[error("Authentication failed: {0}")]
	AuthenticationFailed(String),

	/// A connect is already awaiting its acknowledgement
	#[error("Session is already connecting")]
	AlreadyConnecting,

	/// The session already holds a live connection
	#[error("Session is already connected")]
	AlreadyConnected,

	/// Operation needs a live connection
	#[error("Session is not connected")]
	NotConnected,

	/// The session was closed and its handle invalidated
	#[error("Session is closed")]
	SessionClosed,

	/// `close` was called on a live or connecting session
	#[error("Session is not disconnected")]
	NotDisconnected,

	/// No session is registered under the handle
	#[error("Unknown session")]
	UnknownSession,

	/// The pending connect was abandoned before the engine answered
	#[error("Connect cancelled: {0}")]
	Cancelled(String),

	/// Failure surfaced by the wire-protocol engine
	#[error("Engine error: {0}")]
	Engine(String),
}

impl From<IdentityError> for SessionError {
	fn from(err: IdentityError) -> Self {
		match err {
			| IdentityError::MalformedInput(reason) => {
				SessionError::MalformedInput(reason)
			}
			| IdentityError::AuthenticationFailed => {
				SessionError::AuthenticationFailed(err.to_string())
			}
		}
	}
}

impl From<ConnectFailure> for SessionError {
	fn from(failure: ConnectFailure) -> Self {
		let message = format!("Error connecting: {failure}");
		if failure.is_authentication() {
			SessionError::AuthenticationFailed(message)
		} else {
			SessionError::Engine(message)
		}
	}
}

impl From<EngineError> for SessionError {
	fn from(err: EngineError) -> Self {
		SessionError::Engine(err.to_string())
	}
}
