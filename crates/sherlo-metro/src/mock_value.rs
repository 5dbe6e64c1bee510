use std::collections::BTreeMap;

use serde_json::{Value, json};

/// Map of story id to the packages it mocks, to each package's extracted
/// mock shape. Built once per bundler invocation from static analysis;
/// never executed, only re-serialized into generated code.
pub type StoryMockMap = BTreeMap<String, BTreeMap<String, MockValue>>;

/// One statically extracted mock value.
///
/// Code-carrying variants hold regenerated source text: the value cannot
/// cross the static-analysis/codegen boundary as a live object, so it
/// travels as source and is rehydrated inside the generated module at
/// access time. NaN and the infinities get dedicated variants because
/// JSON cannot represent them.
#[derive(Debug, Clone, PartialEq)]
pub enum MockValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<MockValue>),
    Object(BTreeMap<String, MockValue>),
    Function { code: String },
    Class { code: String },
    Getter { code: String },
    Date { code: String },
    RegExp { code: String },
    NaN,
    Infinity,
    NegativeInfinity,
}

impl MockValue {
    /// Serializes into the marker-object JSON shape shared with the
    /// generated modules and the cross-worker cache files.
    pub fn to_json(&self) -> Value {
        match self {
            MockValue::Null => Value::Null,
            MockValue::Bool(value) => json!(value),
            MockValue::Number(value) => json!(value),
            MockValue::String(value) => json!(value),
            MockValue::Array(items) => {
                Value::Array(items.iter().map(MockValue::to_json).collect())
            }
            MockValue::Object(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
            MockValue::Function { code } => json!({"__isFunction": true, "__code": code}),
            MockValue::Class { code } => json!({"__isClass": true, "__code": code}),
            MockValue::Getter { code } => json!({"__isGetter": true, "__code": code}),
            MockValue::Date { code } => json!({"__isDate": true, "__code": code}),
            MockValue::RegExp { code } => json!({"__isRegExp": true, "__code": code}),
            MockValue::NaN => json!({"__isNaN": true}),
            MockValue::Infinity => json!({"__isInfinity": true}),
            MockValue::NegativeInfinity => json!({"__isNegativeInfinity": true}),
        }
    }

    /// Rebuilds a value from the marker-object shape. Unknown shapes
    /// decay to plain objects, never to errors; the cache may be written
    /// by a newer worker than the one reading it.
    pub fn from_json(value: &Value) -> MockValue {
        match value {
            Value::Null => MockValue::Null,
            Value::Bool(b) => MockValue::Bool(*b),
            Value::Number(n) => MockValue::Number(n.as_f64().unwrap_or(0.0)),
            Value::String(s) => MockValue::String(s.clone()),
            Value::Array(items) => MockValue::Array(items.iter().map(MockValue::from_json).collect()),
            Value::Object(map) => {
                let marker = |key: &str| map.get(key).and_then(Value::as_bool) == Some(true);
                let code = || {
                    map.get("__code")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                };
                if marker("__isFunction") {
                    return MockValue::Function { code: code() };
                }
                if marker("__isClass") {
                    return MockValue::Class { code: code() };
                }
                if marker("__isGetter") {
                    return MockValue::Getter { code: code() };
                }
                if marker("__isDate") {
                    return MockValue::Date { code: code() };
                }
                if marker("__isRegExp") {
                    return MockValue::RegExp { code: code() };
                }
                if marker("__isNaN") {
                    return MockValue::NaN;
                }
                if marker("__isInfinity") {
                    return MockValue::Infinity;
                }
                if marker("__isNegativeInfinity") {
                    return MockValue::NegativeInfinity;
                }
                MockValue::Object(
                    map.iter()
                        .map(|(key, value)| (key.clone(), MockValue::from_json(value)))
                        .collect(),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_shapes_round_trip() {
        let values = vec![
            MockValue::Null,
            MockValue::Bool(true),
            MockValue::Number(42.0),
            MockValue::String("hi".to_string()),
            MockValue::Function { code: "() => 1".to_string() },
            MockValue::Class { code: "class {}".to_string() },
            MockValue::Getter { code: "get x() { return 1; }".to_string() },
            MockValue::Date { code: "new Date(0)".to_string() },
            MockValue::RegExp { code: "/ab+/".to_string() },
            MockValue::NaN,
            MockValue::Infinity,
            MockValue::NegativeInfinity,
        ];
        for value in values {
            assert_eq!(MockValue::from_json(&value.to_json()), value);
        }
    }

    #[test]
    fn nested_structures_round_trip() {
        let value = MockValue::Object(
            [
                ("num".to_string(), MockValue::Number(1.5)),
                (
                    "list".to_string(),
                    MockValue::Array(vec![MockValue::NaN, MockValue::String("x".to_string())]),
                ),
                (
                    "fn".to_string(),
                    MockValue::Function { code: "(a) => a + 1".to_string() },
                ),
            ]
            .into_iter()
            .collect(),
        );
        assert_eq!(MockValue::from_json(&value.to_json()), value);
    }

    #[test]
    fn function_marker_serializes_to_original_shape() {
        let value = MockValue::Function { code: "() => 1".to_string() };
        assert_eq!(
            serde_json::to_string(&value.to_json()).expect("encode"),
            "{\"__code\":\"() => 1\",\"__isFunction\":true}"
        );
    }

    #[test]
    fn plain_objects_survive_even_with_unknown_dunder_keys() {
        let json: Value =
            serde_json::from_str("{\"__isFancy\":true,\"x\":1}").expect("parse");
        let value = MockValue::from_json(&json);
        assert!(matches!(value, MockValue::Object(_)));
    }
}
