//! Input contracts for tools
//!
//! A contract lists the fields a tool accepts, which of them are required,
//! and simple primitive constraints. Validation collects every failure
//! instead of stopping at the first one, and contracts render to JSON
//! Schema for `tools/list`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Primitive type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// JSON string
    String,
    /// Integral JSON number
    Integer,
    /// Any JSON number
    Number,
    /// JSON boolean
    Boolean,
    /// JSON object
    Object,
    /// JSON array
    Array,
}

impl FieldKind {
    fn as_str(self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Integer => "integer",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::Object => "object",
            FieldKind::Array => "array",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Number => value.is_number(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Object => value.is_object(),
            FieldKind::Array => value.is_array(),
        }
    }
}

/// Declaration of a single input field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name
    pub name: String,
    /// Expected primitive type
    pub kind: FieldKind,
    /// Whether the field must be present
    pub required: bool,
    /// Optional description surfaced in the JSON Schema
    pub description: Option<String>,
    /// Minimum string length (characters)
    pub min_length: Option<usize>,
    /// Maximum string length (characters)
    pub max_length: Option<usize>,
    /// Minimum numeric value (inclusive)
    pub minimum: Option<f64>,
    /// Maximum numeric value (inclusive)
    pub maximum: Option<f64>,
    /// Allowed string values; empty means unrestricted
    pub allowed: Vec<String>,
}

impl FieldSpec {
    /// New optional field of the given kind.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            description: None,
            min_length: None,
            max_length: None,
            minimum: None,
            maximum: None,
            allowed: Vec::new(),
        }
    }

    /// Mark the field as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Attach a description.
    pub fn describe(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    /// Constrain string length.
    pub fn length(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        self.min_length = min;
        self.max_length = max;
        self
    }

    /// Constrain numeric range.
    pub fn range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.minimum = min;
        self.maximum = max;
        self
    }

    /// Restrict a string field to a fixed set of values.
    pub fn one_of<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = values.into_iter().map(Into::into).collect();
        self
    }

    fn check(&self, value: &Value, out: &mut Vec<FieldViolation>) {
        if !self.kind.matches(value) {
            out.push(FieldViolation::new(
                &self.name,
                format!("expected {}", self.kind.as_str()),
            ));
            return;
        }

        if let Some(text) = value.as_str() {
            let len = text.chars().count();
            if let Some(min) = self.min_length {
                if len < min {
                    out.push(FieldViolation::new(
                        &self.name,
                        format!("must be at least {min} characters"),
                    ));
                }
            }
            if let Some(max) = self.max_length {
                if len > max {
                    out.push(FieldViolation::new(
                        &self.name,
                        format!("must be at most {max} characters"),
                    ));
                }
            }
            if !self.allowed.is_empty() && !self.allowed.iter().any(|a| a == text) {
                out.push(FieldViolation::new(
                    &self.name,
                    format!("must be one of: {}", self.allowed.join(", ")),
                ));
            }
        }

        if let Some(number) = value.as_f64() {
            if let Some(min) = self.minimum {
                if number < min {
                    out.push(FieldViolation::new(&self.name, format!("must be >= {min}")));
                }
            }
            if let Some(max) = self.maximum {
                if number > max {
                    out.push(FieldViolation::new(&self.name, format!("must be <= {max}")));
                }
            }
        }
    }

    fn to_schema(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("type".into(), Value::String(self.kind.as_str().into()));
        if let Some(text) = &self.description {
            obj.insert("description".into(), Value::String(text.clone()));
        }
        if let Some(min) = self.min_length {
            obj.insert("minLength".into(), Value::from(min));
        }
        if let Some(max) = self.max_length {
            obj.insert("maxLength".into(), Value::from(max));
        }
        if let Some(min) = self.minimum {
            obj.insert("minimum".into(), json!(min));
        }
        if let Some(max) = self.maximum {
            obj.insert("maximum".into(), json!(max));
        }
        if !self.allowed.is_empty() {
            obj.insert("enum".into(), json!(self.allowed));
        }
        Value::Object(obj)
    }
}

/// A single validation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    /// Offending field (`$` for the argument object itself)
    pub field: String,
    /// What went wrong
    pub reason: String,
}

impl FieldViolation {
    /// Build a violation.
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.reason)
    }
}

/// Contract describing the arguments a tool accepts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputContract {
    fields: Vec<FieldSpec>,
    /// Accept fields not named in the contract
    pub allow_additional: bool,
}

impl InputContract {
    /// Empty contract that accepts no fields.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field declaration.
    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.retain(|existing| existing.name != spec.name);
        self.fields.push(spec);
        self
    }

    /// Shorthand for a required field without constraints.
    pub fn require(self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.field(FieldSpec::new(name, kind).required())
    }

    /// Shorthand for an optional field without constraints.
    pub fn optional(self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.field(FieldSpec::new(name, kind))
    }

    /// Permit fields that are not declared.
    pub fn allow_additional(mut self) -> Self {
        self.allow_additional = true;
        self
    }

    /// Declared fields in declaration order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Validate raw arguments, returning every violation found.
    ///
    /// `null` is treated as an empty argument object.
    pub fn validate(&self, args: &Value) -> Result<(), Vec<FieldViolation>> {
        let empty = Map::new();
        let obj = match args {
            Value::Object(obj) => obj,
            Value::Null => &empty,
            _ => return Err(vec![FieldViolation::new("$", "arguments must be an object")]),
        };

        let mut violations = Vec::new();
        for spec in &self.fields {
            match obj.get(&spec.name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        violations.push(FieldViolation::new(&spec.name, "is required"));
                    }
                }
                Some(value) => spec.check(value, &mut violations),
            }
        }

        if !self.allow_additional {
            for key in obj.keys() {
                if !self.fields.iter().any(|spec| &spec.name == key) {
                    violations.push(FieldViolation::new(key, "is not accepted"));
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    /// Render as a JSON Schema object.
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|spec| (spec.name.clone(), spec.to_schema()))
            .collect();
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|spec| spec.required)
            .map(|spec| spec.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": self.allow_additional,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flights() -> InputContract {
        InputContract::new()
            .field(FieldSpec::new("origin", FieldKind::String).required().length(Some(3), Some(3)))
            .field(FieldSpec::new("destination", FieldKind::String).required().length(Some(3), Some(3)))
            .field(FieldSpec::new("passengers", FieldKind::Integer).range(Some(1.0), Some(9.0)))
            .field(FieldSpec::new("cabin", FieldKind::String).one_of(["economy", "business"]))
    }

    #[test]
    fn accepts_valid_arguments() {
        let args = json!({"origin": "JFK", "destination": "LAX", "passengers": 2});
        assert!(flights().validate(&args).is_ok());
    }

    #[test]
    fn collects_every_violation() {
        let args = json!({"origin": "JFKX", "passengers": 12, "cabin": "first", "pets": true});
        let violations = flights().validate(&args).unwrap_err();
        let fields: Vec<&str> = violations.iter().map(|v| v.field.as_str()).collect();
        assert_eq!(fields, vec!["origin", "destination", "passengers", "cabin", "pets"]);
    }

    #[test]
    fn type_mismatch_is_reported_once() {
        let args = json!({"origin": 42, "destination": "LAX"});
        let violations = flights().validate(&args).unwrap_err();
        assert_eq!(violations, vec![FieldViolation::new("origin", "expected string")]);
    }

    #[test]
    fn null_arguments_behave_like_empty_object() {
        let contract = InputContract::new().optional("q", FieldKind::String);
        assert!(contract.validate(&Value::Null).is_ok());
        assert!(contract.validate(&json!("text")).is_err());
    }

    #[test]
    fn renders_json_schema() {
        let schema = flights().to_json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["origin", "destination"]));
        assert_eq!(schema["properties"]["cabin"]["enum"], json!(["economy", "business"]));
        assert_eq!(schema["additionalProperties"], false);
    }
}
