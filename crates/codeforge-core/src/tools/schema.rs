// Argument validation against tool JSON schemas
//
// Covers the subset of JSON Schema the tool definitions actually use:
// object shape, `required`, per-property `type`, `enum`, and array
// `items` typing. Violations are returned as human-readable strings for
// the `{error}` tool result.

use serde_json::Value;

/// Validate `arguments` against `schema`. Returns the first violation.
pub fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), String> {
    check_value(schema, arguments, "arguments")
}

fn check_value(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    if let Some(allowed) = schema.get("enum").and_then(|e| e.as_array()) {
        if !allowed.contains(value) {
            return Err(format!("{path} must be one of {allowed:?}"));
        }
    }

    let Some(expected) = schema.get("type").and_then(|t| t.as_str()) else {
        return Ok(());
    };

    match expected {
        "object" => {
            let Some(map) = value.as_object() else {
                return Err(format!("{path} must be an object"));
            };
            if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
                for key in required.iter().filter_map(|k| k.as_str()) {
                    if !map.contains_key(key) {
                        return Err(format!("{path} is missing required property '{key}'"));
                    }
                }
            }
            if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
                for (key, prop_schema) in properties {
                    if let Some(prop_value) = map.get(key) {
                        check_value(prop_schema, prop_value, &format!("{path}.{key}"))?;
                    }
                }
            }
            Ok(())
        }
        "array" => {
            let Some(items) = value.as_array() else {
                return Err(format!("{path} must be an array"));
            };
            if let Some(item_schema) = schema.get("items") {
                for (i, item) in items.iter().enumerate() {
                    check_value(item_schema, item, &format!("{path}[{i}]"))?;
                }
            }
            Ok(())
        }
        "string" if !value.is_string() => Err(format!("{path} must be a string")),
        "number" if !value.is_number() => Err(format!("{path} must be a number")),
        "integer" if !value.is_i64() && !value.is_u64() => {
            Err(format!("{path} must be an integer"))
        }
        "boolean" if !value.is_boolean() => Err(format!("{path} must be a boolean")),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "count": {"type": "integer"},
                "mode": {"type": "string", "enum": ["fast", "slow"]},
                "tags": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["name"]
        })
    }

    #[test]
    fn test_valid_arguments_pass() {
        let args = json!({"name": "x", "count": 3, "mode": "fast", "tags": ["a"]});
        assert!(validate_arguments(&schema(), &args).is_ok());
    }

    #[test]
    fn test_missing_required() {
        let err = validate_arguments(&schema(), &json!({"count": 1})).unwrap_err();
        assert!(err.contains("required property 'name'"));
    }

    #[test]
    fn test_wrong_type() {
        let err = validate_arguments(&schema(), &json!({"name": 7})).unwrap_err();
        assert!(err.contains("must be a string"));
    }

    #[test]
    fn test_enum_violation() {
        let err =
            validate_arguments(&schema(), &json!({"name": "x", "mode": "warp"})).unwrap_err();
        assert!(err.contains("must be one of"));
    }

    #[test]
    fn test_array_item_type() {
        let err =
            validate_arguments(&schema(), &json!({"name": "x", "tags": [1]})).unwrap_err();
        assert!(err.contains("tags[0]"));
    }

    #[test]
    fn test_non_object_arguments() {
        let err = validate_arguments(&schema(), &json!("nope")).unwrap_err();
        assert!(err.contains("must be an object"));
    }
}
