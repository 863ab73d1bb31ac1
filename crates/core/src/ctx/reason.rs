use crate::err::Error;
use std::fmt;
use std::time::Duration;

/// The reason a context stopped being live.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Reason {
	Timedout(Duration),
	Canceled,
}

impl Reason {
	/// The error surfaced to the caller when work observes this reason.
	pub fn into_error(self) -> Error {
		match self {
			Reason::Timedout(timeout) => Error::QueryTimedout {
				timeout,
			},
			Reason::Canceled => Error::QueryCancelled,
		}
	}
}

impl fmt::Display for Reason {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Reason::Timedout(_) => f.write_str("context timed out"),
			Reason::Canceled => f.write_str("context canceled"),
		}
	}
}
