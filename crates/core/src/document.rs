//! Schema-less structured documents (job payloads and results).
//!
//! The engine never looks inside a document; each handler interprets its own
//! payload shape.

use serde_json::{Map, Value};

/// A string-keyed JSON object.
pub type Document = Map<String, Value>;

pub fn empty_document() -> Document {
    Map::new()
}

/// Loose truthiness used by debug hooks such as `payload.fail`.
///
/// `null`, `false`, `0`, `""`, `[]` and `{}` are false; everything else is true.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truthiness_follows_emptiness() {
        for v in [json!(null), json!(false), json!(0), json!(0.0), json!(""), json!([]), json!({})] {
            assert!(!is_truthy(&v), "{v} should be falsy");
        }
        for v in [json!(true), json!(1), json!(-2.5), json!("no"), json!([0]), json!({"a": 1})] {
            assert!(is_truthy(&v), "{v} should be truthy");
        }
    }
}
