//! Single ordered sink for session events
//!
//! Every session hands its events to one shared dispatcher, which forwards
//! them synchronously to the one listener registered at startup. Emission is
//! serialized, so the listener observes a single global order in which each
//! session's own events keep the order the session raised them.

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace};

use crate::{Event, SessionEvent, SessionHandle};

/// Receiver of every session event.
///
/// Called while the dispatcher holds its emission lock: keep it short and
/// never call back into the facade from here.
pub trait EventListener: Send + 'static {
	/// Consume one event.
	fn on_event(&self, event: SessionEvent);
}

impl EventListener for mpsc::UnboundedSender<SessionEvent> {
	fn on_event(&self, event: SessionEvent) {
		if let Err(err) = self.send(event) {
			debug!(handle = %err.0.handle, "Event listener channel closed, event dropped");
		}
	}
}

impl EventListener for broadcast::Sender<SessionEvent> {
	fn on_event(&self, event: SessionEvent) {
		// No receivers means nobody is listening right now, not a failure
		let _ = self.send(event);
	}
}

/// Adapter turning a closure into an [`EventListener`].
pub struct FnListener<F>(pub F);

impl<F> EventListener for FnListener<F>
where F: Fn(SessionEvent) + Send + 'static
{
	fn on_event(&self, event: SessionEvent) {
		(self.0)(event)
	}
}

/// Forwards `(handle, event)` pairs to the registered listener.
pub struct EventDispatcher {
	listener: Mutex<Option<Box<dyn EventListener>>>,
}

impl EventDispatcher {
	/// Create a dispatcher bound to `listener` for its whole lifetime.
	pub fn new(listener: impl EventListener) -> Self {
		Self {
			listener: Mutex::new(Some(Box::new(listener))),
		}
	}

	/// Forward one event. No filtering, no batching.
	pub fn emit(&self, handle: &SessionHandle, event: Event) {
		let listener = self.listener.lock();
		match listener.as_ref() {
			| Some(listener) => {
				trace!(handle = %handle, event = event.name(), "Dispatching session event");
				listener.on_event(SessionEvent::new(handle.clone(), event));
			}
			| None => {
				debug!(handle = %handle, event = event.name(), "Listener detached, event dropped");
			}
		}
	}

	/// Drop the listener; later events are discarded.
	pub fn detach(&self) {
		self.listener.lock().take();
	}
}

impl std::fmt::Debug for EventDispatcher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EventDispatcher")
			.field("attached", &self.listener.lock().is_some())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::thread;

	use super::*;

	#[test]
	fn test_emit_reaches_listener_with_handle() {
		let (tx, mut rx) = mpsc::unbounded_channel();
		let dispatcher = EventDispatcher::new(tx);
		let handle = SessionHandle::from("abc");

		dispatcher.emit(&handle, Event::Connect { reconnect: false });

		let received = rx.try_recv().unwrap();
		assert_eq!(received.handle, handle);
		assert_eq!(received.event, Event::Connect { reconnect: false });
	}

	#[test]
	fn test_per_session_order_preserved_under_interleaving() {
		let (tx, mut rx) = mpsc::unbounded_channel();
		let dispatcher = Arc::new(EventDispatcher::new(tx));

		let workers: Vec<_> = ["a", "b", "c"]
			.into_iter()
			.map(|name| {
				let dispatcher = Arc::clone(&dispatcher);
				thread::spawn(move || {
					let handle = SessionHandle::from(name);
					for i in 0 .. 200 {
						dispatcher.emit(&handle, Event::Error {
							message: i.to_string(),
						});
					}
				})
			})
			.collect();
		for worker in workers {
			worker.join().unwrap();
		}

		let mut last_seen = std::collections::HashMap::new();
		let mut total = 0;
		while let Ok(received) = rx.try_recv() {
			let Event::Error { message } = received.event else {
				panic!("unexpected event");
			};
			let index: i32 = message.parse().unwrap();
			let previous =
				last_seen.insert(received.handle.to_string(), index).unwrap_or(-1);
			assert_eq!(index, previous + 1);
			total += 1;
		}
		assert_eq!(total, 600);
	}

	#[test]
	fn test_detached_dispatcher_drops_events() {
		let (tx, mut rx) = mpsc::unbounded_channel();
		let dispatcher = EventDispatcher::new(tx);
		dispatcher.detach();

		dispatcher.emit(&SessionHandle::from("abc"), Event::Disconnect {
			cause: None,
		});

		assert!(rx.try_recv().is_err());
	}

	#[test]
	fn test_closure_listener() {
		let seen = Arc::new(Mutex::new(Vec::new()));
		let sink = Arc::clone(&seen);
		let dispatcher = EventDispatcher::new(FnListener(move |event: SessionEvent| {
			sink.lock().push(event.event.name());
		}));

		dispatcher.emit(&SessionHandle::from("x"), Event::Message {
			topic: "t".to_string(),
			payload: bytes::Bytes::from_static(b"p"),
		});

		assert_eq!(*seen.lock(), vec!["message"]);
	}
}
