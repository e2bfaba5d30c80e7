//! JSON Schemas carried by rule types.
//!
//! Well-formedness and instance validation are delegated to `jsonschema`
//! (draft 2020-12 unless the schema names another `$schema`). The update
//! compatibility check in [`check_compatible`] is structural and only
//! reasons about the keywords it models; anything else must stay unchanged.

mod compat;
mod validate;

use thiserror::Error;

pub use compat::check_compatible;
pub use validate::validate;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", render(.path, .message))]
pub struct SchemaError {
    /// JSON pointer to the offending schema or instance location.
    pub path: String,
    pub message: String,
}

impl SchemaError {
    pub(crate) fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

impl From<jsonschema::ValidationError<'_>> for SchemaError {
    fn from(error: jsonschema::ValidationError<'_>) -> Self {
        Self {
            path: error.instance_path.to_string(),
            message: error.to_string(),
        }
    }
}

fn render(path: &str, message: &str) -> String {
    if path.is_empty() {
        message.to_string()
    } else {
        format!("{path}: {message}")
    }
}

/// Checks that `schema` is a valid JSON Schema that compiles.
///
/// The schema is validated against its metaschema; patterns that do not
/// compile and unresolvable `$ref`s are rejected too.
pub fn check_well_formed(schema: &serde_json::Value) -> Result<(), SchemaError> {
    jsonschema::validator_for(schema)?;
    Ok(())
}
