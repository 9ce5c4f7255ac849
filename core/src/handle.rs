//! Opaque session identifiers

use std::fmt;

use arcstr::ArcStr;
use uuid::Uuid;

/// Opaque identifier correlating every operation and event of one session.
///
/// Cheap to clone. Handles are generated by the session registry and are
/// never handed out twice while the registry still holds them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionHandle(ArcStr);

impl SessionHandle {
	/// Generate a fresh random handle.
	pub(crate) fn generate() -> Self {
		Self(ArcStr::from(Uuid::new_v4().simple().to_string()))
	}

	/// The handle as a string slice.
	pub fn as_str(&self) -> &str {
		self.0.as_str()
	}
}

impl fmt::Display for SessionHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for SessionHandle {
	fn from(value: &str) -> Self {
		Self(ArcStr::from(value))
	}
}

impl From<String> for SessionHandle {
	fn from(value: String) -> Self {
		Self(ArcStr::from(value))
	}
}

impl AsRef<str> for SessionHandle {
	fn as_ref(&self) -> &str {
		self.as_str()
	}
}
