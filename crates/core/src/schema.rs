//! JSON Schema validation at the tool boundary.
//!
//! Payloads coming from the model are untyped, so they are checked against
//! the tool's declared schema before anything is deserialized.

use jsonschema::JSONSchema;
use serde_json::Value;

/// One violated constraint: where it happened and what was expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// JSON pointer into the instance, `(root)` for the top level
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Render a list of violations as `path: message; path: message`.
pub fn describe(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// A schema compiled once and reused for every validation.
pub struct CompiledSchema {
    source: Value,
    compiled: JSONSchema,
}

impl CompiledSchema {
    pub fn compile(schema: Value) -> Result<Self, String> {
        let compiled = JSONSchema::options()
            .compile(&schema)
            .map_err(|e| e.to_string())?;
        Ok(Self {
            source: schema,
            compiled,
        })
    }

    /// The schema document as declared by the tool.
    pub fn source(&self) -> &Value {
        &self.source
    }

    pub fn validate(&self, instance: &Value) -> Result<(), Vec<Violation>> {
        match self.compiled.validate(instance) {
            Ok(()) => Ok(()),
            Err(errors) => Err(errors
                .map(|e| {
                    let pointer = e.instance_path.to_string();
                    Violation {
                        path: if pointer.is_empty() {
                            "(root)".into()
                        } else {
                            pointer
                        },
                        message: e.to_string(),
                    }
                })
                .collect()),
        }
    }
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("source", &self.source)
            .finish()
    }
}
