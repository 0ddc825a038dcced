//! Schema validation collaborator.
//!
//! The pipeline does not implement a schema engine. It consumes one through
//! the narrow [`SchemaValidator`] contract: validate a parsed JSON value,
//! returning either the (possibly coerced) value or a list of violations.
//! Validation runs once per successful JSON response when a schema is
//! configured; a failure is a hard pipeline failure, never silently treated
//! as non-JSON.

use serde_json::Value;

/// Narrow contract for an external schema validation engine.
pub trait SchemaValidator: Send + Sync {
    /// Validates a parsed JSON value.
    ///
    /// On success returns the value to expose as the envelope's `data`
    /// (validators may coerce or strip fields). On failure returns the list
    /// of violations.
    fn validate(&self, value: &Value) -> std::result::Result<Value, Vec<String>>;
}

impl<F> SchemaValidator for F
where
    F: Fn(&Value) -> std::result::Result<Value, Vec<String>> + Send + Sync,
{
    fn validate(&self, value: &Value) -> std::result::Result<Value, Vec<String>> {
        self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_closure_implements_validator() {
        let validator = |value: &Value| {
            if value.get("id").is_some() {
                Ok(value.clone())
            } else {
                Err(vec!["id: missing".to_string()])
            }
        };

        assert!(validator.validate(&json!({"id": 1})).is_ok());
        let violations = validator.validate(&json!({})).unwrap_err();
        assert_eq!(violations, vec!["id: missing".to_string()]);
    }

    #[test]
    fn test_validator_may_replace_value() {
        let validator = |_: &Value| -> std::result::Result<Value, Vec<String>> {
            Ok(json!({"normalized": true}))
        };
        let out = validator.validate(&json!({"raw": 1})).unwrap();
        assert_eq!(out, json!({"normalized": true}));
    }
}
