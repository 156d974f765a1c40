//! Deep traversal for `deep` computations

use std::collections::HashSet;

use super::Value;

/// Read every field and element reachable from `value` through the read traps
///
/// Used inside a run, this links every nested subject to the running unit, so
/// a change anywhere in the structure re-runs it. Frozen containers are not
/// entered, and each container is visited once.
pub fn traverse(value: &Value) {
	let mut seen = HashSet::new();
	walk(value, &mut seen);
}

fn walk(value: &Value, seen: &mut HashSet<*const ()>) {
	if let Some(id) = value.identity()
		&& !seen.insert(id)
	{
		return;
	}

	match value {
		Value::Record(record) if !record.is_frozen() => {
			for key in record.keys() {
				walk(&record.get(&key), seen);
			}
		}
		Value::List(list) if !list.is_frozen() => {
			for item in list.to_vec() {
				walk(&item, seen);
			}
		}
		Value::Ref(cell) => walk(&cell.get(), seen),
		_ => {}
	}
}
