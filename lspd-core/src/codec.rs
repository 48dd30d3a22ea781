// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Tagged-event codec (component B): every message is carried as an ordered
//! list of `(key, value)` string pairs rather than a single JSON blob, so it
//! can live directly on a relay event's tag list.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub type Tags = Vec<(String, String)>;

#[derive(Debug, Error)]
pub enum CodecError {
	#[error("missing tag: {0}")]
	MissingTag(&'static str),
	#[error("malformed tag {0}: {1}")]
	Malformed(&'static str, String),
}

/// Encode a scalar via its `Display` impl. Used for plain strings, numbers,
/// and enum-like types whose `Display` yields the wire value.
pub fn encode_display<T: fmt::Display>(v: &T) -> String {
	v.to_string()
}

/// `None` encodes as the literal string `"null"`; `Some(x)` delegates to
/// `x`'s `Display` impl.
pub fn encode_opt_display<T: fmt::Display>(v: &Option<T>) -> String {
	match v {
		Some(x) => x.to_string(),
		None => "null".to_string(),
	}
}

/// Compact, key-stable JSON for list/map/tuple-shaped fields.
pub fn encode_json<T: Serialize>(v: &T) -> String {
	serde_json::to_string(v).expect("tag value serialization is infallible for our field types")
}

/// Inverse of the encode_* helpers above: a value starting with `{` or `[`
/// parses as JSON; the literal `"null"` decodes to `None`; anything else is
/// the raw string.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
	Null,
	Json(Value),
	Str(String),
}

pub fn decode_tag_value(raw: &str) -> TagValue {
	if raw == "null" {
		return TagValue::Null;
	}
	if raw.starts_with('{') || raw.starts_with('[') {
		if let Ok(v) = serde_json::from_str(raw) {
			return TagValue::Json(v);
		}
	}
	TagValue::Str(raw.to_string())
}

/// Build a lookup map from an ordered tag list. Later duplicate keys win,
/// mirroring how a relay event's tag array would be consumed.
pub fn tag_map(tags: &[(String, String)]) -> HashMap<&str, &str> {
	let mut map = HashMap::with_capacity(tags.len());
	for (k, v) in tags {
		map.insert(k.as_str(), v.as_str());
	}
	map
}

pub fn require<'a>(
	map: &HashMap<&str, &'a str>, key: &'static str,
) -> Result<&'a str, CodecError> {
	map.get(key).copied().ok_or(CodecError::MissingTag(key))
}

pub fn require_parse<T: std::str::FromStr>(
	map: &HashMap<&str, &str>, key: &'static str,
) -> Result<T, CodecError> {
	let raw = require(map, key)?;
	raw.parse::<T>().map_err(|_| CodecError::Malformed(key, raw.to_string()))
}

pub fn require_opt_parse<T: std::str::FromStr>(
	map: &HashMap<&str, &str>, key: &'static str,
) -> Result<Option<T>, CodecError> {
	let raw = require(map, key)?;
	if raw == "null" {
		return Ok(None);
	}
	raw.parse::<T>().map(Some).map_err(|_| CodecError::Malformed(key, raw.to_string()))
}

pub fn require_json<T: serde::de::DeserializeOwned>(
	map: &HashMap<&str, &str>, key: &'static str,
) -> Result<T, CodecError> {
	let raw = require(map, key)?;
	serde_json::from_str(raw).map_err(|_| CodecError::Malformed(key, raw.to_string()))
}

/// A type that can be carried as a tagged event/DM payload. `field_keys`
/// lists the tag keys this type contributes, used by the rumor router for
/// structural (superset) dispatch instead of a discriminator field.
pub trait TagCodec: Sized {
	fn to_tags(&self) -> Tags;
	fn from_tags(tags: &[(String, String)]) -> Result<Self, CodecError>;
	fn field_keys() -> &'static [&'static str];
}

/// True iff every key in `required` is present in `present`. This is the
/// structural dispatch rule the rumor router uses to classify an incoming
/// tag set without a discriminator tag.
pub fn is_superset(present: &HashMap<&str, &str>, required: &[&str]) -> bool {
	required.iter().all(|k| present.contains_key(k))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn null_round_trips() {
		let encoded = encode_opt_display(&None::<u64>);
		assert_eq!(encoded, "null");
		assert_eq!(decode_tag_value(&encoded), TagValue::Null);
	}

	#[test]
	fn some_scalar_round_trips() {
		let encoded = encode_opt_display(&Some(42u64));
		assert_eq!(encoded, "42");
		let map: HashMap<&str, &str> = [("n", encoded.as_str())].into_iter().collect();
		let v: Option<u64> = require_opt_parse(&map, "n").unwrap();
		assert_eq!(v, Some(42));
	}

	#[test]
	fn json_list_round_trips() {
		let v = vec![1u32, 2, 3];
		let encoded = encode_json(&v);
		assert_eq!(encoded, "[1,2,3]");
		match decode_tag_value(&encoded) {
			TagValue::Json(Value::Array(a)) => assert_eq!(a.len(), 3),
			other => panic!("unexpected decode: {other:?}"),
		}
	}

	#[test]
	fn plain_string_is_not_mistaken_for_json() {
		assert_eq!(decode_tag_value("hello"), TagValue::Str("hello".to_string()));
	}

	#[test]
	fn superset_dispatch() {
		let present: HashMap<&str, &str> =
			[("a", "1"), ("b", "2"), ("c", "3")].into_iter().collect();
		assert!(is_superset(&present, &["a", "b"]));
		assert!(!is_superset(&present, &["a", "d"]));
	}
}
