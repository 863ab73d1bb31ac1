//! The scalar function registry. Every function callable from SQL is
//! registered here by its case-insensitive name with an arity range and an
//! invocation delegate. Built-ins are installed on first use; user-defined
//! scalars may be added with [`register`] before the engine starts serving
//! queries.

pub mod math;
pub mod string;
pub mod time;

use crate::err::{Error, Result};
use crate::sql::Value;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// The delegate type of a scalar function.
pub type ScalarFn = Arc<dyn Fn(Vec<Value>) -> Result<Value> + Send + Sync>;

/// A registered scalar function.
#[derive(Clone)]
pub struct ScalarFunction {
	pub name: String,
	pub min_args: usize,
	pub max_args: usize,
	pub invoke: ScalarFn,
}

static REGISTRY: Lazy<RwLock<HashMap<String, ScalarFunction>>> = Lazy::new(|| {
	let mut map = HashMap::new();
	for (name, min, max, f) in builtins() {
		map.insert(
			name.to_lowercase(),
			ScalarFunction {
				name: name.to_owned(),
				min_args: min,
				max_args: max,
				invoke: f,
			},
		);
	}
	RwLock::new(map)
});

fn builtins() -> Vec<(&'static str, usize, usize, ScalarFn)> {
	fn f(func: fn(Vec<Value>) -> Result<Value>) -> ScalarFn {
		Arc::new(func)
	}
	vec![
		// String
		("UPPER", 1, 1, f(string::upper)),
		("LOWER", 1, 1, f(string::lower)),
		("LEN", 1, 1, f(string::len)),
		("LEFT", 2, 2, f(string::left)),
		("RIGHT", 2, 2, f(string::right)),
		("SUBSTRING", 3, 3, f(string::substring)),
		("TRIM", 1, 1, f(string::trim)),
		("LTRIM", 1, 1, f(string::ltrim)),
		("RTRIM", 1, 1, f(string::rtrim)),
		("REPLACE", 3, 3, f(string::replace)),
		("CHARINDEX", 2, 3, f(string::charindex)),
		("CONCAT", 2, usize::MAX, f(string::concat)),
		("STUFF", 4, 4, f(string::stuff)),
		("REVERSE", 1, 1, f(string::reverse)),
		// Date and time
		("GETDATE", 0, 0, f(time::getdate)),
		("GETUTCDATE", 0, 0, f(time::getutcdate)),
		("YEAR", 1, 1, f(time::year)),
		("MONTH", 1, 1, f(time::month)),
		("DAY", 1, 1, f(time::day)),
		("WEEK", 1, 1, f(time::week)),
		("QUARTER", 1, 1, f(time::quarter)),
		("DATEADD", 3, 3, f(time::dateadd)),
		("DATEDIFF", 3, 3, f(time::datediff)),
		("DATEPART", 2, 2, f(time::datepart)),
		("DATETRUNC", 2, 2, f(time::datetrunc)),
		// NULL handling
		("ISNULL", 2, 2, f(math::isnull)),
		("COALESCE", 2, usize::MAX, f(math::coalesce)),
		("NULLIF", 2, 2, f(math::nullif)),
		// Numeric
		("ABS", 1, 1, f(math::abs)),
		("CEILING", 1, 1, f(math::ceiling)),
		("FLOOR", 1, 1, f(math::floor)),
		("ROUND", 2, 2, f(math::round)),
		("POWER", 2, 2, f(math::power)),
		("SQRT", 1, 1, f(math::sqrt)),
	]
}

/// Register a user-defined scalar function. Replaces any existing function
/// with the same name.
pub fn register(function: ScalarFunction) {
	let key = function.name.to_lowercase();
	REGISTRY.write().expect("function registry poisoned").insert(key, function);
}

/// Look up a function by case-insensitive name.
pub fn lookup(name: &str) -> Option<ScalarFunction> {
	REGISTRY.read().expect("function registry poisoned").get(&name.to_lowercase()).cloned()
}

/// Resolve a function and validate the argument count, at expression
/// compile time.
pub fn resolve(name: &str, arg_count: usize) -> Result<ScalarFunction> {
	let Some(function) = lookup(name) else {
		return Err(Error::FunctionNotFound {
			name: name.to_owned(),
		});
	};
	if arg_count < function.min_args || arg_count > function.max_args {
		let expected = if function.min_args == function.max_args {
			function.min_args.to_string()
		} else if function.max_args == usize::MAX {
			format!("at least {}", function.min_args)
		} else {
			format!("{} to {}", function.min_args, function.max_args)
		};
		return Err(Error::InvalidArguments {
			name: function.name.clone(),
			expected,
		});
	}
	Ok(function)
}

/// Run a function by name. Used by tests and by callers outside the
/// compiled-expression path.
pub fn run(name: &str, args: Vec<Value>) -> Result<Value> {
	let function = resolve(name, args.len())?;
	(function.invoke)(args)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn lookup_is_case_insensitive() {
		assert!(lookup("upper").is_some());
		assert!(lookup("Upper").is_some());
		assert!(lookup("no_such_fn").is_none());
	}

	#[test]
	fn arity_is_validated() {
		let err = run("UPPER", vec![]).unwrap_err();
		assert!(matches!(err, Error::InvalidArguments { .. }));
	}

	#[test]
	fn user_functions_can_be_registered() {
		register(ScalarFunction {
			name: "DOUBLE_IT".to_owned(),
			min_args: 1,
			max_args: 1,
			invoke: Arc::new(|args| args[0].try_mul(&Value::Int(2))),
		});
		assert_eq!(run("double_it", vec![Value::Int(21)]).unwrap(), Value::Int(42));
	}
}
