//! Canonical cache keys for read requests.
//!
//! Keys stay human-readable so a dumped `cache` partition can be inspected:
//!
//! | Kind     | Key                                  |
//! |----------|--------------------------------------|
//! | Document | `doc:Trip:T1`                        |
//! | List     | `list:Vehicle:{"filters":{..},..}`   |
//! | Rpc      | `rpc:app.api.ping:{"a":1}`           |
//!
//! Object keys are sorted recursively before encoding, so argument order
//! never changes the fingerprint.

use std::fmt::Write;
use serde_json::Value;

/// What kind of read produced a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadKind {
    /// Single document; `identifier` is the resource type, `args` its key
    Document,
    /// List query; `identifier` is the resource type
    List,
    /// Remote method call; `identifier` is the method name
    Rpc,
}

impl ReadKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::List => "list",
            Self::Rpc => "rpc",
        }
    }
}

impl std::fmt::Display for ReadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic cache key for a read request.
#[must_use]
pub fn fingerprint(kind: ReadKind, identifier: &str, args: &Value) -> String {
    match kind {
        ReadKind::Document => match args {
            Value::String(key) => document_key(identifier, key),
            other => format!("doc:{}:{}", identifier, canonical_json(other)),
        },
        ReadKind::List => format!("list:{}:{}", identifier, canonical_json(args)),
        ReadKind::Rpc => format!("rpc:{}:{}", identifier, canonical_json(args)),
    }
}

/// Key of a single document, `doc:Type:key`.
///
/// Every fingerprint starts with its kind, so a resource type named `list`
/// or `rpc` cannot alias a list or method read.
#[must_use]
pub fn document_key(resource_type: &str, resource_key: &str) -> String {
    format!("doc:{}:{}", resource_type, resource_key)
}

/// Compact JSON with object keys sorted at every depth.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::String(s) => write_string(s, out),
        // Scalars have exactly one compact encoding
        other => {
            let _ = write!(out, "{}", other);
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    // Value's Display applies JSON escaping
    let _ = write!(out, "{}", Value::String(s.to_string()));
}
