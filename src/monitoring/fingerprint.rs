//! Response fingerprints used for drift detection.
//!
//! A fingerprint hashes the *shape* of a response rather than its bytes:
//! the status class, the media type, and either the structural skeleton of a
//! JSON body or a coarse size bucket for anything else. Values that change on
//! every request (timestamps, counters, ids) therefore do not move it.

use serde_json::Value;
use sha2::{Digest, Sha256};

const MAX_JSON_DEPTH: usize = 8;

/// What the probe saw of a response, borrowed from the probe executor.
#[derive(Debug, Clone, Copy)]
pub struct ResponseShape<'a> {
    pub status: u16,
    pub content_type: Option<&'a str>,
    pub content_length: Option<u64>,
    pub body_prefix: &'a [u8],
    /// `true` when `body_prefix` holds the entire body.
    pub body_complete: bool,
}

pub fn fingerprint(shape: &ResponseShape<'_>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(status_class(shape.status).as_bytes());
    hasher.update(b"|");
    if let Some(media_type) = shape.content_type.map(normalize_media_type) {
        hasher.update(media_type.as_bytes());
    }
    hasher.update(b"|");

    match json_skeleton(shape) {
        Some(skeleton) => {
            hasher.update(b"json:");
            hasher.update(skeleton.as_bytes());
        }
        None => {
            let length = shape
                .content_length
                .unwrap_or(shape.body_prefix.len() as u64);
            hasher.update(b"len:");
            hasher.update(length_bucket(length).to_string().as_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

fn status_class(status: u16) -> String {
    format!("{}xx", status / 100)
}

/// `application/json; charset=utf-8` -> `application/json`
fn normalize_media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Power-of-two size bucket; 0 for an empty body.
fn length_bucket(length: u64) -> u32 {
    u64::BITS - length.leading_zeros()
}

fn json_skeleton(shape: &ResponseShape<'_>) -> Option<String> {
    if !shape.body_complete || shape.body_prefix.is_empty() {
        return None;
    }
    let value: Value = serde_json::from_slice(shape.body_prefix).ok()?;
    let mut out = String::new();
    write_skeleton(&value, 0, &mut out);
    Some(out)
}

fn write_skeleton(value: &Value, depth: usize, out: &mut String) {
    if depth >= MAX_JSON_DEPTH {
        out.push('*');
        return;
    }
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(_) => out.push_str("bool"),
        Value::Number(_) => out.push_str("number"),
        Value::String(_) => out.push_str("string"),
        Value::Array(items) => {
            out.push('[');
            // Arrays are assumed homogeneous; the first element stands for all.
            if let Some(first) = items.first() {
                write_skeleton(first, depth + 1, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for key in keys {
                out.push_str(key);
                out.push(':');
                write_skeleton(&map[key.as_str()], depth + 1, out);
                out.push(',');
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json(status: u16, body: &str) -> String {
        fingerprint(&ResponseShape {
            status,
            content_type: Some("application/json; charset=utf-8"),
            content_length: Some(body.len() as u64),
            body_prefix: body.as_bytes(),
            body_complete: true,
        })
    }

    #[test]
    fn json_values_do_not_affect_fingerprint() {
        let a = json(200, r#"{"status":"ok","uptime":12,"checkedAt":"2024-01-01T00:00:00Z"}"#);
        let b = json(200, r#"{"checkedAt":"2025-06-30T12:34:56Z","uptime":98765,"status":"fine"}"#);
        assert_eq!(a, b);
    }

    #[test]
    fn json_shape_change_moves_fingerprint() {
        let before = json(200, r#"{"status":"ok","version":"1"}"#);
        let after = json(200, r#"{"status":"ok","version":{"major":2}}"#);
        assert_ne!(before, after);
    }

    #[test]
    fn added_field_moves_fingerprint() {
        let before = json(200, r#"{"items":[{"id":1}]}"#);
        let after = json(200, r#"{"items":[{"id":1,"name":"x"}]}"#);
        assert_ne!(before, after);
    }

    #[test]
    fn status_class_is_part_of_fingerprint() {
        assert_eq!(json(200, "{}"), json(204, "{}"));
        assert_ne!(json(200, "{}"), json(500, "{}"));
    }

    #[test]
    fn non_json_bodies_fall_back_to_size_bucket() {
        let shape = |body: &'static [u8]| ResponseShape {
            status: 200,
            content_type: Some("text/plain"),
            content_length: None,
            body_prefix: body,
            body_complete: true,
        };
        assert_eq!(fingerprint(&shape(b"OK 1234")), fingerprint(&shape(b"OK 9876")));
        assert_ne!(
            fingerprint(&shape(b"OK")),
            fingerprint(&shape(b"service under maintenance until further notice"))
        );
    }

    #[test]
    fn truncated_json_is_treated_as_opaque() {
        let body = br#"{"a":1,"b":"#;
        let shape = ResponseShape {
            status: 200,
            content_type: Some("application/json"),
            content_length: Some(10_000),
            body_prefix: body,
            body_complete: false,
        };
        assert_eq!(fingerprint(&shape).len(), 64);
    }

    #[test]
    fn length_buckets() {
        assert_eq!(length_bucket(0), 0);
        assert_eq!(length_bucket(1), 1);
        assert_eq!(length_bucket(1000), length_bucket(1023));
        assert_ne!(length_bucket(1023), length_bucket(1024));
    }
}
