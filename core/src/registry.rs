//! Handle table for live sessions

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use crate::SessionHandle;

/// Maps session handles to their entries.
///
/// Creation and removal take the table lock, so concurrent `create` calls
/// always yield distinct handles and a removal is never lost.
#[derive(Debug)]
pub struct SessionRegistry<T> {
	entries: Mutex<HashMap<SessionHandle, T>>,
}

impl<T> Default for SessionRegistry<T> {
	fn default() -> Self {
		Self {
			entries: Mutex::new(HashMap::new()),
		}
	}
}

impl<T> SessionRegistry<T> {
	/// Create an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Allocate a handle unique among registered ones and store the entry
	/// built for it.
	pub fn create(&self, make: impl FnOnce(&SessionHandle) -> T) -> SessionHandle {
		let mut entries = self.entries.lock();
		let handle = loop {
			let candidate = SessionHandle::generate();
			if !entries.contains_key(&candidate) {
				break candidate;
			}
			debug!(handle = %candidate, "Session handle collision, regenerating");
		};
		let entry = make(&handle);
		entries.insert(handle.clone(), entry);
		handle
	}

	/// Look up a session; `None` for unknown or released handles.
	pub fn get(&self, handle: &SessionHandle) -> Option<T>
	where T: Clone {
		self.entries.lock().get(handle).cloned()
	}

	/// Release a handle. Removing an absent handle is a no-op that returns
	/// `false`.
	pub fn remove(&self, handle: &SessionHandle) -> bool {
		self.entries.lock().remove(handle).is_some()
	}

	/// Whether the handle is currently registered.
	pub fn contains(&self, handle: &SessionHandle) -> bool {
		self.entries.lock().contains_key(handle)
	}

	/// Snapshot of registered handles.
	pub fn handles(&self) -> Vec<SessionHandle> {
		self.entries.lock().keys().cloned().collect()
	}

	/// Number of registered sessions.
	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	/// Whether no session is registered.
	pub fn is_empty(&self) -> bool {
		self.entries.lock().is_empty()
	}
}
