use serde_json::Value;

use super::SchemaError;

/// Validates `instance` against `schema`, reporting the first violation.
pub fn validate(schema: &Value, instance: &Value) -> Result<(), SchemaError> {
    let validator = jsonschema::validator_for(schema)?;
    validator.validate(instance)?;
    Ok(())
}
