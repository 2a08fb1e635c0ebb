//! State kinds, schemas, validation and repair-by-defaults.
//!
//! Editor state crosses this boundary on every snapshot read and write.
//! Values are JSON trees, but never untyped: each logical state has a
//! [`StateKind`] whose schema names the required fields, their types and
//! the defaults used to repair invalid payloads.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::{StateError, StateResult};

/// Logical state types recognized by the snapshot and recovery layers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Canvas,
    Project,
    Layer,
    Annotation,
    /// Caller-registered kind; see [`SchemaRegistry::register_schema`].
    Custom(String),
}

impl StateKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Canvas => "canvas",
            Self::Project => "project",
            Self::Layer => "layer",
            Self::Annotation => "annotation",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON type a schema field must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Number,
    Bool,
    Array,
    Object,
}

impl FieldKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

/// One required field with the default used to repair it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub default: Value,
}

impl FieldSpec {
    pub fn new(name: &str, kind: FieldKind, default: Value) -> Self {
        Self { name: name.to_string(), kind, default }
    }
}

/// The required shape of one state kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSchema {
    pub fields: Vec<FieldSpec>,
}

impl StateSchema {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }
}

/// Registry of schemas, seeded with the built-in editor state kinds.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schemas: HashMap<StateKind, StateSchema>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl SchemaRegistry {
    /// Registry seeded with canvas/project/layer/annotation schemas.
    pub fn with_builtins() -> Self {
        let mut schemas = HashMap::new();
        schemas.insert(
            StateKind::Canvas,
            StateSchema::new(vec![
                FieldSpec::new("id", FieldKind::String, json!("")),
                FieldSpec::new("name", FieldKind::String, json!("Untitled")),
                FieldSpec::new("shapes", FieldKind::Array, json!([])),
                FieldSpec::new("z_order", FieldKind::Array, json!([])),
                FieldSpec::new("camera", FieldKind::Object, json!({"x": 0.0, "y": 0.0, "zoom": 1.0})),
            ]),
        );
        schemas.insert(
            StateKind::Project,
            StateSchema::new(vec![
                FieldSpec::new("id", FieldKind::String, json!("")),
                FieldSpec::new("name", FieldKind::String, json!("Untitled Project")),
                FieldSpec::new("canvases", FieldKind::Array, json!([])),
                FieldSpec::new("updated_at", FieldKind::Number, json!(0)),
            ]),
        );
        schemas.insert(
            StateKind::Layer,
            StateSchema::new(vec![
                FieldSpec::new("id", FieldKind::String, json!("")),
                FieldSpec::new("name", FieldKind::String, json!("Layer")),
                FieldSpec::new("visible", FieldKind::Bool, json!(true)),
                FieldSpec::new("opacity", FieldKind::Number, json!(1.0)),
                FieldSpec::new("shape_ids", FieldKind::Array, json!([])),
            ]),
        );
        schemas.insert(
            StateKind::Annotation,
            StateSchema::new(vec![
                FieldSpec::new("id", FieldKind::String, json!("")),
                FieldSpec::new("target_id", FieldKind::String, json!("")),
                FieldSpec::new("text", FieldKind::String, json!("")),
                FieldSpec::new("position", FieldKind::Object, json!({"x": 0.0, "y": 0.0})),
            ]),
        );
        Self { schemas }
    }

    /// Add or replace the schema for a kind. This is how callers extend the
    /// recognized state types.
    pub fn register_schema(&mut self, kind: StateKind, schema: StateSchema) {
        self.schemas.insert(kind, schema);
    }

    pub fn schema(&self, kind: &StateKind) -> Option<&StateSchema> {
        self.schemas.get(kind)
    }

    /// Check a value against its kind's schema.
    pub fn validate(&self, kind: &StateKind, value: &Value) -> StateResult<()> {
        let schema = self
            .schemas
            .get(kind)
            .ok_or_else(|| StateError::UnknownKind(kind.to_string()))?;
        let Some(object) = value.as_object() else {
            return Err(StateError::SchemaValidation {
                kind: kind.to_string(),
                reason: "state is not an object".to_string(),
            });
        };
        for field in &schema.fields {
            match object.get(&field.name) {
                Some(value) if field.kind.matches(value) => {}
                Some(_) => {
                    return Err(StateError::SchemaValidation {
                        kind: kind.to_string(),
                        reason: format!("field '{}' has the wrong type", field.name),
                    });
                }
                None => {
                    return Err(StateError::SchemaValidation {
                        kind: kind.to_string(),
                        reason: format!("missing field '{}'", field.name),
                    });
                }
            }
        }
        Ok(())
    }

    /// Rebuild a value so it passes validation, substituting defaults for
    /// missing or mistyped fields. Extra fields are preserved.
    ///
    /// Only object inputs are repairable; anything else cannot carry over
    /// any caller data and is an error.
    pub fn repair(&self, kind: &StateKind, value: &Value) -> StateResult<Value> {
        let schema = self
            .schemas
            .get(kind)
            .ok_or_else(|| StateError::UnknownKind(kind.to_string()))?;
        let Some(object) = value.as_object() else {
            return Err(StateError::Unrepairable {
                kind: kind.to_string(),
                reason: "state is not an object".to_string(),
            });
        };
        let mut repaired: Map<String, Value> = object.clone();
        for field in &schema.fields {
            let ok = repaired.get(&field.name).map(|v| field.kind.matches(v)).unwrap_or(false);
            if !ok {
                repaired.insert(field.name.clone(), field.default.clone());
            }
        }
        Ok(Value::Object(repaired))
    }

    /// The documented default state for a kind.
    pub fn default_state(&self, kind: &StateKind) -> StateResult<Value> {
        let schema = self
            .schemas
            .get(kind)
            .ok_or_else(|| StateError::UnknownKind(kind.to_string()))?;
        let mut object = Map::new();
        for field in &schema.fields {
            object.insert(field.name.clone(), field.default.clone());
        }
        Ok(Value::Object(object))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_canvas_passes() {
        let registry = SchemaRegistry::with_builtins();
        let state = json!({
            "id": "c1",
            "name": "Garden plan",
            "shapes": [],
            "z_order": [],
            "camera": {"x": 0.0, "y": 0.0, "zoom": 1.0},
        });
        assert!(registry.validate(&StateKind::Canvas, &state).is_ok());
    }

    #[test]
    fn test_missing_field_fails_validation() {
        let registry = SchemaRegistry::with_builtins();
        let state = json!({"id": "c1"});
        assert!(registry.validate(&StateKind::Canvas, &state).is_err());
    }

    #[test]
    fn test_wrong_type_fails_validation() {
        let registry = SchemaRegistry::with_builtins();
        let state = json!({
            "id": "c1",
            "name": 42,
            "shapes": [],
            "z_order": [],
            "camera": {},
        });
        assert!(registry.validate(&StateKind::Canvas, &state).is_err());
    }

    #[test]
    fn test_repair_fills_defaults_and_keeps_extras() {
        let registry = SchemaRegistry::with_builtins();
        let state = json!({"id": "c1", "name": 42, "extra": "kept"});
        let repaired = registry.repair(&StateKind::Canvas, &state).unwrap();

        assert!(registry.validate(&StateKind::Canvas, &repaired).is_ok());
        assert_eq!(repaired["id"], json!("c1"));
        assert_eq!(repaired["name"], json!("Untitled"));
        assert_eq!(repaired["extra"], json!("kept"));
    }

    #[test]
    fn test_non_object_is_unrepairable() {
        let registry = SchemaRegistry::with_builtins();
        let result = registry.repair(&StateKind::Canvas, &json!("not an object"));
        assert!(matches!(result, Err(StateError::Unrepairable { .. })));
    }

    #[test]
    fn test_default_state_is_valid() {
        let registry = SchemaRegistry::with_builtins();
        for kind in [StateKind::Canvas, StateKind::Project, StateKind::Layer, StateKind::Annotation] {
            let state = registry.default_state(&kind).unwrap();
            assert!(registry.validate(&kind, &state).is_ok(), "default for {kind} invalid");
        }
    }

    #[test]
    fn test_register_custom_schema() {
        let mut registry = SchemaRegistry::with_builtins();
        let kind = StateKind::Custom("plant_palette".to_string());
        assert!(matches!(
            registry.validate(&kind, &json!({})),
            Err(StateError::UnknownKind(_))
        ));

        registry.register_schema(
            kind.clone(),
            StateSchema::new(vec![FieldSpec::new("species", FieldKind::Array, json!([]))]),
        );
        assert!(registry.validate(&kind, &json!({"species": []})).is_ok());
        assert!(registry.validate(&kind, &json!({})).is_err());
    }
}
