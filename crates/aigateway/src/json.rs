use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// convert re-shapes one serde type into another via the JSON data model.
pub fn convert<S: Serialize, D: DeserializeOwned>(s: &S) -> Result<D, serde_json::Error> {
	let v = serde_json::to_value(s)?;
	serde_json::from_value(v)
}

pub fn traverse<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
	if path.is_empty() {
		return Some(value);
	}
	path.iter().try_fold(value, |target, token| match target {
		Value::Object(map) => map.get(*token),
		Value::Array(list) => parse_index(token).and_then(|x| list.get(x)),
		_ => None,
	})
}

pub fn traverse_mut<'a>(value: &'a mut Value, path: &[&str]) -> Option<&'a mut Value> {
	if path.is_empty() {
		return Some(value);
	}
	path.iter().try_fold(value, |target, token| match target {
		Value::Object(map) => map.get_mut(*token),
		Value::Array(list) => parse_index(token).and_then(|x| list.get_mut(x)),
		_ => None,
	})
}

fn parse_index(s: &str) -> Option<usize> {
	if s.starts_with('+') || (s.starts_with('0') && s.len() != 1) {
		return None;
	}
	s.parse().ok()
}

/// set_field updates a single field of a raw JSON document in place,
/// preserving the order of sibling keys and any fields we do not model.
pub fn set_field(raw: &[u8], path: &[&str], value: Value) -> Result<Vec<u8>, serde_json::Error> {
	let mut doc: Value = serde_json::from_slice(raw)?;
	let (last, parents) = path.split_last().expect("path must not be empty");
	if let Some(Value::Object(map)) = traverse_mut(&mut doc, parents) {
		map.insert((*last).to_string(), value);
	}
	serde_json::to_vec(&doc)
}

/// delete_field removes a single field of a raw JSON document in place,
/// preserving the order of the remaining keys.
pub fn delete_field(raw: &[u8], path: &[&str]) -> Result<Vec<u8>, serde_json::Error> {
	let mut doc: Value = serde_json::from_slice(raw)?;
	let (last, parents) = path.split_last().expect("path must not be empty");
	if let Some(Value::Object(map)) = traverse_mut(&mut doc, parents) {
		map.shift_remove(*last);
	}
	serde_json::to_vec(&doc)
}
