//! # MQTT Sessions
//!
//! Many independent MQTT connections behind opaque handles, with one ordered
//! event stream.
//!
//! [`MqttSessions`] is the raw facade: it addresses sessions by
//! [`SessionHandle`] and hands every event of every session to one listener.
//! [`SessionHub`] and [`MqttClient`] layer a per-caller view on top of it:
//! each client owns one session and only sees that session's events.
//!
//! ```rust,no_run
//! use mqtt_sessions::{ConnectionOptions, Event, SessionHub};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = SessionHub::new();
//!     let mut client = hub.client();
//!
//!     client
//!         .connect("mqtt://localhost:1883", ConnectionOptions::default())
//!         .await?;
//!     client.subscribe(vec!["greetings/#".to_string()], vec![1])?;
//!     client.publish("greetings/world", "hello", 1, false)?;
//!
//!     while let Some(event) = client.next_event().await {
//!         if let Event::Message { topic, payload } = event {
//!             println!("{topic}: {payload:?}");
//!             break;
//!         }
//!     }
//!
//!     client.disconnect()?;
//!     hub.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod client;

pub use client::{MqttClient, SessionHub};
pub use mqtt_sessions_core::*;

/// Prelude module for convenient imports
pub mod prelude {
	pub use mqtt_sessions_core::prelude::*;

	pub use crate::{MqttClient, SessionHub};
}
