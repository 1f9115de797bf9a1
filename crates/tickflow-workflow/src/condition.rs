//! Edge conditions: boolean predicates over an upstream node's output.
//!
//! The orchestrator only needs a yes/no answer; hosts with their own
//! predicate language plug in a [`ConditionEvaluator`].
//!
//! The default evaluator understands:
//! - `always` / `true`, `never` / `false`
//! - `path`: truthiness of a dotted field path (`result.items.0.ok`)
//! - `!path`: negated truthiness
//! - `path OP literal` with `==`, `!=`, `>`, `>=`, `<`, `<=`; the literal is
//!   JSON (`42`, `"done"`, `true`, `null`) or a bare word compared as a string

use serde_json::Value;

/// Decides whether an edge lets its source's result through.
pub trait ConditionEvaluator: Send + Sync {
    fn evaluate(&self, condition: &str, output: &Value) -> bool;
}

/// Built-in path/comparison evaluator.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConditionEvaluator;

const OPERATORS: [&str; 6] = ["==", "!=", ">=", "<=", ">", "<"];

impl ConditionEvaluator for DefaultConditionEvaluator {
    fn evaluate(&self, condition: &str, output: &Value) -> bool {
        let condition = condition.trim();
        match condition {
            "" | "always" | "true" => return true,
            "never" | "false" => return false,
            _ => {}
        }

        for op in OPERATORS {
            if let Some((left, right)) = condition.split_once(op) {
                let actual = lookup(output, left.trim());
                let expected = parse_literal(right.trim());
                return compare(actual, op, &expected);
            }
        }

        match condition.strip_prefix('!') {
            Some(path) => !is_truthy(lookup(output, path.trim())),
            None => is_truthy(lookup(output, condition)),
        }
    }
}

/// Resolve a dotted path. `output.` / `$.` prefixes are accepted and ignored.
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path
        .strip_prefix("$.")
        .or_else(|| path.strip_prefix("output."))
        .unwrap_or(path);
    if path.is_empty() || path == "$" || path == "output" {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn parse_literal(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| {
        let unquoted = raw.trim_matches(|c| c == '\'' || c == '"');
        Value::String(unquoted.to_string())
    })
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
    }
}

fn compare(actual: Option<&Value>, op: &str, expected: &Value) -> bool {
    let actual = actual.unwrap_or(&Value::Null);
    if let (Some(a), Some(b)) = (actual.as_f64(), expected.as_f64()) {
        return match op {
            "==" => (a - b).abs() < f64::EPSILON,
            "!=" => (a - b).abs() >= f64::EPSILON,
            ">" => a > b,
            ">=" => a >= b,
            "<" => a < b,
            "<=" => a <= b,
            _ => false,
        };
    }
    match op {
        "==" => actual == expected,
        "!=" => actual != expected,
        _ => match (actual.as_str(), expected.as_str()) {
            (Some(a), Some(b)) => match op {
                ">" => a > b,
                ">=" => a >= b,
                "<" => a < b,
                "<=" => a <= b,
                _ => false,
            },
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(condition: &str, output: Value) -> bool {
        DefaultConditionEvaluator.evaluate(condition, &output)
    }

    #[test]
    fn test_constants() {
        assert!(eval("always", json!(null)));
        assert!(eval("", json!(null)));
        assert!(!eval("never", json!({"ok": true})));
    }

    #[test]
    fn test_path_truthiness() {
        let output = json!({"approved": true, "items": [], "result": {"count": 0, "name": "x"}});
        assert!(eval("approved", output.clone()));
        assert!(!eval("items", output.clone()));
        assert!(!eval("result.count", output.clone()));
        assert!(eval("output.result.name", output.clone()));
        assert!(eval("!missing", output.clone()));
        assert!(!eval("!approved", output));
    }

    #[test]
    fn test_comparisons() {
        let output = json!({"status": "done", "score": 7.5, "tags": ["a", "b"]});
        assert!(eval("status == done", output.clone()));
        assert!(eval("status == \"done\"", output.clone()));
        assert!(eval("status != 'failed'", output.clone()));
        assert!(eval("score > 5", output.clone()));
        assert!(eval("score <= 7.5", output.clone()));
        assert!(!eval("score < 2", output.clone()));
        assert!(eval("tags.1 == b", output.clone()));
        assert!(eval("missing == null", output.clone()));
        assert!(!eval("missing > 1", output));
    }
}
