//! Per-session task and its command handle

use std::sync::Weak;

use bytes::Bytes;
use tokio::sync::mpsc::{
	UnboundedReceiver, UnboundedSender, error::SendError, unbounded_channel,
};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::machine::{ConnectCallback, Session, SessionState};
use crate::engine::EngineEvent;
use crate::options::ConnectionOptions;
use crate::registry::SessionRegistry;
use crate::SessionError;

/// Requests queued for one session task
pub(crate) enum Command {
	Connect {
		host: String,
		options: ConnectionOptions,
		callback: ConnectCallback,
	},
	Subscribe {
		topics: Vec<String>,
		qos_levels: Vec<i64>,
	},
	Unsubscribe(Vec<String>),
	Publish {
		topic: String,
		payload: Bytes,
		qos: i64,
		retained: bool,
	},
	Disconnect,
	Close,
	State(oneshot::Sender<SessionState>),
	Shutdown(oneshot::Sender<()>),
}

impl Command {
	fn name(&self) -> &'static str {
		match self {
			| Command::Connect { .. } => "connect",
			| Command::Subscribe { .. } => "subscribe",
			| Command::Unsubscribe(_) => "unsubscribe",
			| Command::Publish { .. } => "publish",
			| Command::Disconnect => "disconnect",
			| Command::Close => "close",
			| Command::State(_) => "state",
			| Command::Shutdown(_) => "shutdown",
		}
	}
}

/// Task serializing everything that happens to one [`Session`].
///
/// Engine callbacks are drained before the next caller command, so a command
/// always sees the state left by every callback already delivered.
pub struct SessionActor {
	session: Session,
	commands: UnboundedReceiver<Command>,
	engine_events: UnboundedReceiver<(u64, EngineEvent)>,
	registry: Weak<SessionRegistry<SessionHandler>>,
}

impl SessionActor {
	/// Spawn the task driving `session` and return its command handle.
	///
	/// Must be called from within a tokio runtime.
	pub fn spawn(
		session: Session,
		engine_events: UnboundedReceiver<(u64, EngineEvent)>,
		registry: Weak<SessionRegistry<SessionHandler>>,
	) -> SessionHandler {
		let (command_tx, commands) = unbounded_channel();
		let actor = Self {
			session,
			commands,
			engine_events,
			registry,
		};
		tokio::spawn(async move { actor.run().await });
		SessionHandler { command_tx }
	}

	async fn run(mut self) {
		loop {
			tokio::select! {
				biased;
				Some((generation, event)) = self.engine_events.recv() => {
					self.session.handle_engine_event(generation, event);
				}
				cmd = self.commands.recv() => {
					match cmd {
						| Some(cmd) => {
							if self.handle_command(cmd) {
								break;
							}
						}
						| None => {
							info!(handle = %self.session.handle(), "Session command channel closed, exiting");
							self.session.teardown();
							break;
						}
					}
				}
			}
		}
		self.reject_queued();
		debug!(handle = %self.session.handle(), "Session task stopped");
	}

	/// Answer whatever was queued behind the command that ended the session.
	fn reject_queued(&mut self) {
		self.commands.close();
		while let Ok(cmd) = self.commands.try_recv() {
			debug!(handle = %self.session.handle(), operation = cmd.name(), "Dropping command queued after close");
			match cmd {
				| Command::Connect { callback, .. } => {
					callback(Err(SessionError::SessionClosed))
				}
				| Command::Shutdown(reply) => {
					let _ = reply.send(());
				}
				| _ => {}
			}
		}
	}

	/// Apply one command. Returns `true` once the session is gone.
	fn handle_command(&mut self, cmd: Command) -> bool {
		let name = cmd.name();
		let result = match cmd {
			| Command::Connect {
				host,
				options,
				callback,
			} => {
				self.session.connect(&host, options, callback);
				Ok(())
			}
			| Command::Subscribe { topics, qos_levels } => {
				self.session.subscribe(topics, qos_levels)
			}
			| Command::Unsubscribe(topics) => self.session.unsubscribe(topics),
			| Command::Publish {
				topic,
				payload,
				qos,
				retained,
			} => self.session.publish(topic, payload, qos, retained),
			| Command::Disconnect => self.session.disconnect(),
			| Command::Close => match self.session.close() {
				| Ok(()) => {
					self.release();
					return true;
				}
				| Err(err) => Err(err),
			},
			| Command::State(reply) => {
				let _ = reply.send(self.session.state());
				Ok(())
			}
			| Command::Shutdown(reply) => {
				self.session.teardown();
				self.release();
				let _ = reply.send(());
				return true;
			}
		};
		if let Err(err) = result {
			warn!(
				handle = %self.session.handle(),
				operation = name,
				state = %self.session.state(),
				error = %err,
				"Session operation rejected"
			);
		}
		false
	}

	/// Drop the handle from the registry after the engine is torn down.
	fn release(&self) {
		let handle = self.session.handle();
		match self.registry.upgrade() {
			| Some(registry) => {
				registry.remove(handle);
				info!(handle = %handle, "Session closed and released");
			}
			| None => debug!(handle = %handle, "Registry already gone"),
		}
	}
}

/// Cloneable handle queueing commands for one session task.
#[derive(Debug, Clone)]
pub struct SessionHandler {
	command_tx: UnboundedSender<Command>,
}

impl SessionHandler {
	fn send(&self, cmd: Command) -> Result<(), SessionError> {
		self.command_tx.send(cmd).map_err(|SendError(cmd)| {
			if let Command::Connect { callback, .. } = cmd {
				callback(Err(SessionError::UnknownSession));
			}
			SessionError::UnknownSession
		})
	}

	/// Queue a connect; `callback` always receives the outcome.
	pub fn connect(
		&self,
		host: String,
		options: ConnectionOptions,
		callback: ConnectCallback,
	) -> Result<(), SessionError> {
		self.send(Command::Connect {
			host,
			options,
			callback,
		})
	}

	/// Queue a subscribe.
	pub fn subscribe(
		&self,
		topics: Vec<String>,
		qos_levels: Vec<i64>,
	) -> Result<(), SessionError> {
		self.send(Command::Subscribe { topics, qos_levels })
	}

	/// Queue an unsubscribe.
	pub fn unsubscribe(&self, topics: Vec<String>) -> Result<(), SessionError> {
		self.send(Command::Unsubscribe(topics))
	}

	/// Queue a publish.
	pub fn publish(
		&self,
		topic: String,
		payload: Bytes,
		qos: i64,
		retained: bool,
	) -> Result<(), SessionError> {
		self.send(Command::Publish {
			topic,
			payload,
			qos,
			retained,
		})
	}

	/// Queue a disconnect.
	pub fn disconnect(&self) -> Result<(), SessionError> {
		self.send(Command::Disconnect)
	}

	/// Queue a close.
	pub fn close(&self) -> Result<(), SessionError> {
		self.send(Command::Close)
	}

	/// State after every command queued so far; `None` once the task is gone.
	pub async fn state(&self) -> Option<SessionState> {
		let (tx, rx) = oneshot::channel();
		self.send(Command::State(tx)).ok()?;
		rx.await.ok()
	}

	/// Tear the session down regardless of its state and wait for it.
	pub async fn shutdown(&self) {
		let (tx, rx) = oneshot::channel();
		if self.send(Command::Shutdown(tx)).is_ok() {
			let _ = rx.await;
		}
	}
}
