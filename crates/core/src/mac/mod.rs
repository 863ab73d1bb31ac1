/// Evaluates an environment variable once, falling back to a default value
/// when the variable is absent or fails to parse.
macro_rules! lazy_env_parse {
	($key:expr, $t:ty, $default:expr) => {
		once_cell::sync::Lazy::new(|| {
			std::env::var($key)
				.ok()
				.and_then(|s| s.parse::<$t>().ok())
				.unwrap_or($default)
		})
	};
}

/// Returns an [`crate::err::Error::Unreachable`] carrying the callsite.
/// Used where an invariant the planner upholds would otherwise be a panic.
macro_rules! fail {
	($msg:expr) => {
		return Err($crate::err::Error::Unreachable(concat!(file!(), ": ", $msg)))
	};
}
