//! Session lifecycle
//!
//! A session owns one logical MQTT connection. Its state machine lives in
//! [`machine`]; [`actor`] runs it on a task of its own, so operations from the
//! facade and callbacks from the engine are applied one at a time.

pub mod actor;
pub mod machine;


pub use actor::{SessionActor, SessionHandler};
pub use machine::{ConnectCallback, Session, SessionState};
