//! # MQTT Sessions Core
//!
//! Control layer for driving many independent MQTT connections through one
//! facade. Every connection is a session addressed by an opaque
//! [`SessionHandle`]; every asynchronous protocol event of every session flows
//! through a single ordered listener.
//!
//! ## Features
//!
//! - **Session lifecycle**: strict state machine (`New`, `Connecting`,
//!   `Connected`, `Disconnected`, `Closed`) enforced per session
//! - **Serialized sessions**: each session runs on its own task, so caller
//!   operations and engine callbacks never race
//! - **Single event sink**: per-session ordering preserved across sessions
//! - **Mutual TLS**: client identities prepared from PKCS#12 bundles
//! - **Pluggable engine**: `rumqttc` by default, any [`Engine`] in tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mqtt_sessions_core::{ConnectionOptions, MqttSessions, SessionEvent};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (tx, mut events) = mpsc::unbounded_channel::<SessionEvent>();
//!     let sessions = MqttSessions::new(tx);
//!
//!     let handle = sessions.new_session();
//!     let options = ConnectionOptions::from_json(r#"{"clientId": "demo"}"#)?;
//!     sessions.connect(&handle, "mqtt://localhost:1883", options).await?;
//!
//!     sessions.subscribe(&handle, vec!["sensors/#".to_string()], vec![1]);
//!     sessions.publish(&handle, "sensors/kitchen", "21.5", 1, false);
//!
//!     while let Some(SessionEvent { handle, event }) = events.recv().await {
//!         println!("{handle}: {}", event.name());
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod event;
pub mod facade;
pub mod handle;
pub mod identity;
pub mod options;
pub mod registry;
pub mod session;

// === Core Public API ===
pub use dispatcher::{EventDispatcher, EventListener, FnListener};
pub use engine::{
	ConnectFailure, ConnectRequest, Engine, EngineError, EngineEvent,
	EngineEvents, EngineFactory, EngineSettings, RumqttEngine,
	RumqttEngineFactory,
};
pub use error::SessionError;
pub use event::{Event, SessionEvent};
pub use facade::{ConnectOutcome, MqttSessions};
pub use handle::SessionHandle;
pub use identity::{ClientIdentity, IdentityError};
pub use options::{BrokerAddress, ConnectionOptions, TlsOptions};
pub use registry::SessionRegistry;
pub use session::SessionState;
// Essential external types
pub use rumqttc::QoS;

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Prelude module for convenient imports
///
/// ```rust
/// use mqtt_sessions_core::prelude::*;
/// ```
pub mod prelude {
	pub use crate::{
		ConnectionOptions, Event, EventListener, MqttSessions, QoS, Result,
		SessionError, SessionEvent, SessionHandle, SessionState, TlsOptions,
	};
}
