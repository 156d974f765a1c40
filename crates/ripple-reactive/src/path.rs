//! Dot-delimited watch paths

use std::sync::LazyLock;

use regex::Regex;

use crate::observe::Value;

// Anything outside unicode word characters, `$` and `.` makes a path unusable.
static BAIL_RE: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"[^\w.$]").expect("BAIL_RE: invalid regex pattern"));

/// Split `path` into segments, or `None` when it contains invalid characters
///
/// # Examples
///
/// ```
/// use ripple_reactive::path::parse_path;
///
/// assert_eq!(parse_path("a.b.0"), Some(vec!["a".to_string(), "b".to_string(), "0".to_string()]));
/// assert_eq!(parse_path("a[0]"), None);
/// ```
pub fn parse_path(path: &str) -> Option<Vec<String>> {
	if BAIL_RE.is_match(path) {
		return None;
	}
	Some(path.split('.').map(str::to_string).collect())
}

/// Follow `segments` from `root` through the read traps
///
/// Records are indexed by key and lists by numeric index (`length` yields the
/// list length). A missing link anywhere yields [`Value::Null`].
pub fn resolve_path(root: &Value, segments: &[String]) -> Value {
	let mut current = root.clone();
	for segment in segments {
		current = match &current {
			Value::Record(record) => record.get(segment),
			Value::List(list) if segment == "length" => Value::from(list.len()),
			Value::List(list) => match segment.parse::<usize>() {
				Ok(index) => list.get(index),
				Err(_) => Value::Null,
			},
			Value::Ref(cell) => match cell.get() {
				Value::Record(record) => record.get(segment),
				_ => Value::Null,
			},
			_ => return Value::Null,
		};
	}
	current
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::observe::reactive;
	use rstest::rstest;
	use serde_json::json;

	#[rstest]
	#[case("a", Some(vec!["a"]))]
	#[case("$data.user_name", Some(vec!["$data", "user_name"]))]
	#[case("données.clé", Some(vec!["données", "clé"]))]
	#[case("a-b", None)]
	#[case("a[0]", None)]
	#[case("a b", None)]
	fn test_parse_path(#[case] path: &str, #[case] expected: Option<Vec<&str>>) {
		let expected = expected.map(|segments| segments.into_iter().map(String::from).collect::<Vec<_>>());
		assert_eq!(parse_path(path), expected);
	}

	#[rstest]
	#[serial_test::serial(reactive)]
	fn test_resolve_path_through_records_and_lists() {
		let root = reactive(json!({ "users": [{ "name": "ada" }] }));

		let name = resolve_path(&root, &parse_path("users.0.name").unwrap());
		let length = resolve_path(&root, &parse_path("users.length").unwrap());
		let missing = resolve_path(&root, &parse_path("users.3.name").unwrap());

		assert_eq!(name, Value::from("ada"));
		assert_eq!(length, Value::Int(1));
		assert_eq!(missing, Value::Null);
	}
}
