//! Runtime context supplied by the caller.
use serde_json::{Map, Value};

/// Arbitrary (possibly nested) key-value context supplied at call time. The engine never
/// modifies or retains it.
///
/// # Examples
/// ```
/// # use rollout_core::Context;
/// let context: Context = serde_json::from_value(serde_json::json!({
///     "userId": "user-123",
///     "device": {"os": "ios", "version": 17},
/// })).unwrap();
/// ```
pub type Context = Map<String, Value>;

/// Look up a dotted `path` (e.g. `"device.os"` or `"items.0.sku"`) in `context`.
///
/// Objects are indexed by key and arrays by decimal index. Returns `None` if any segment is
/// missing or the current value cannot be indexed.
pub fn lookup_field<'a>(context: &'a Context, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = context.get(first)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Render a context value as an identity string (unit key value, entity id component).
///
/// Strings are used verbatim, numbers in their shortest form (`42`, not `42.0`), booleans as
/// `true`/`false`. `null`, objects and arrays cannot identify a unit and yield `None`.
pub fn key_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(number_string(n)),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Object(_) | Value::Array(_) => None,
    }
}

fn number_string(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 => (f as i64).to_string(),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}
