// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Headers
//!
//! Header maps are a bag of scalar values keyed by string. The publisher only
//! ever writes the `request_id` key; every other entry passes through opaquely.

use crate::errors::AmqpError;
use lapin::types::{AMQPValue, ByteArray, FieldTable, LongString, ShortString};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Header key stamped with the caller's request id on every publish.
pub const REQUEST_ID_HEADER: &str = "request_id";

/// Longest AMQP short string (header keys, correlation ids), in bytes.
pub(crate) const SHORT_STRING_LIMIT: usize = u8::MAX as usize;

/// Header map accepted by the publisher.
pub type Headers = HashMap<String, HeaderValue>;

/// Closed set of values a header may carry.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl HeaderValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::String(v) => Some(v),
            _ => None,
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(v: &str) -> Self {
        HeaderValue::String(v.to_owned())
    }
}

impl From<String> for HeaderValue {
    fn from(v: String) -> Self {
        HeaderValue::String(v)
    }
}

impl From<i64> for HeaderValue {
    fn from(v: i64) -> Self {
        HeaderValue::Int(v)
    }
}

impl From<i32> for HeaderValue {
    fn from(v: i32) -> Self {
        HeaderValue::Int(i64::from(v))
    }
}

impl From<u32> for HeaderValue {
    fn from(v: u32) -> Self {
        HeaderValue::Int(i64::from(v))
    }
}

impl From<f64> for HeaderValue {
    fn from(v: f64) -> Self {
        HeaderValue::Float(v)
    }
}

impl From<bool> for HeaderValue {
    fn from(v: bool) -> Self {
        HeaderValue::Bool(v)
    }
}

impl From<Vec<u8>> for HeaderValue {
    fn from(v: Vec<u8>) -> Self {
        HeaderValue::Bytes(v)
    }
}

impl From<&HeaderValue> for AMQPValue {
    fn from(value: &HeaderValue) -> Self {
        match value {
            HeaderValue::String(v) => AMQPValue::LongString(LongString::from(v.as_str())),
            HeaderValue::Int(v) => AMQPValue::LongLongInt(*v),
            HeaderValue::Float(v) => AMQPValue::Double(*v),
            HeaderValue::Bool(v) => AMQPValue::Boolean(*v),
            HeaderValue::Bytes(v) => AMQPValue::ByteArray(ByteArray::from(v.clone())),
        }
    }
}

/// Converts a JSON object into a header map.
///
/// Only scalar JSON values have a header representation: numbers become
/// `Int` when they fit in an i64 and `Float` otherwise. Nulls, arrays and
/// nested objects are rejected.
///
/// # Returns
/// The header map or AmqpError::InvalidHeaderValue naming the offending key
pub fn from_json(object: &serde_json::Map<String, serde_json::Value>) -> Result<Headers, AmqpError> {
    object
        .iter()
        .map(|(key, value)| {
            let header = match value {
                serde_json::Value::String(v) => HeaderValue::String(v.clone()),
                serde_json::Value::Bool(v) => HeaderValue::Bool(*v),
                serde_json::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                    (Some(i), _) => HeaderValue::Int(i),
                    (None, Some(f)) => HeaderValue::Float(f),
                    _ => return Err(AmqpError::InvalidHeaderValue(key.clone())),
                },
                _ => return Err(AmqpError::InvalidHeaderValue(key.clone())),
            };
            Ok((key.clone(), header))
        })
        .collect()
}

/// Returns a private copy of `headers` with `request_id` injected.
///
/// The caller's map is only read, so concurrent publishes sharing one map never
/// observe each other's request ids.
pub fn stamp(headers: &Headers, request_id: &str) -> Headers {
    let mut stamped = headers.clone();
    stamped.insert(REQUEST_ID_HEADER.to_owned(), HeaderValue::from(request_id));
    stamped
}

/// Converts a header map into an AMQP field table.
///
/// Keys longer than a short string are dropped.
pub(crate) fn to_field_table(headers: &Headers) -> FieldTable {
    let btree: BTreeMap<ShortString, AMQPValue> = headers
        .iter()
        .filter(|(key, _)| {
            let fits = key.len() <= SHORT_STRING_LIMIT;
            if !fits {
                warn!(key_len = key.len(), "dropping header with oversized key");
            }
            fits
        })
        .map(|(key, value)| (ShortString::from(key.as_str()), AMQPValue::from(value)))
        .collect();

    FieldTable::from(btree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn should_stamp_a_private_copy() {
        let mut caller = Headers::new();
        caller.insert("tenant".to_owned(), HeaderValue::from("acme"));

        let stamped = stamp(&caller, "req-1");

        assert_eq!(caller.len(), 1);
        assert!(!caller.contains_key(REQUEST_ID_HEADER));
        assert_eq!(stamped.get(REQUEST_ID_HEADER), Some(&HeaderValue::from("req-1")));
        assert_eq!(stamped.get("tenant"), Some(&HeaderValue::from("acme")));
    }

    #[test]
    fn should_override_caller_request_id() {
        let mut caller = Headers::new();
        caller.insert(REQUEST_ID_HEADER.to_owned(), HeaderValue::from("stale"));

        let stamped = stamp(&caller, "fresh");

        assert_eq!(stamped[REQUEST_ID_HEADER].as_str(), Some("fresh"));
        assert_eq!(caller[REQUEST_ID_HEADER].as_str(), Some("stale"));
    }

    #[test]
    fn should_convert_json_scalars() {
        let value = json!({"name": "x", "count": 3, "ratio": 0.5, "ok": true});
        let headers = from_json(value.as_object().unwrap()).unwrap();

        assert_eq!(headers["name"], HeaderValue::from("x"));
        assert_eq!(headers["count"], HeaderValue::Int(3));
        assert_eq!(headers["ratio"], HeaderValue::Float(0.5));
        assert_eq!(headers["ok"], HeaderValue::Bool(true));
    }

    #[test]
    fn should_reject_nested_json() {
        let value = json!({"nested": {"a": 1}});
        let err = from_json(value.as_object().unwrap()).unwrap_err();
        assert_eq!(err, AmqpError::InvalidHeaderValue("nested".to_owned()));
    }

    #[test]
    fn should_build_field_table() {
        let mut headers = stamp(&Headers::new(), "req-9");
        headers.insert("attempts".to_owned(), HeaderValue::Int(2));
        headers.insert("raw".to_owned(), HeaderValue::from(vec![1u8, 2]));

        let table = to_field_table(&headers);
        let inner = table.inner();

        assert_eq!(
            inner.get(REQUEST_ID_HEADER),
            Some(&AMQPValue::LongString(LongString::from("req-9")))
        );
        assert_eq!(inner.get("attempts"), Some(&AMQPValue::LongLongInt(2)));
        assert!(matches!(inner.get("raw"), Some(AMQPValue::ByteArray(_))));
    }

    #[test]
    fn should_drop_oversized_keys() {
        let mut headers = stamp(&Headers::new(), "req-9");
        headers.insert("k".repeat(SHORT_STRING_LIMIT), HeaderValue::Int(1));
        headers.insert("k".repeat(SHORT_STRING_LIMIT + 1), HeaderValue::Int(2));

        let table = to_field_table(&headers);

        assert_eq!(table.inner().len(), 2);
        assert!(table.inner().contains_key(REQUEST_ID_HEADER));
    }
}
