//! Flow input variables: declarations and per-run bound values.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::BindingError;

/// Declared type of a flow input variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VarType {
    #[serde(rename = "string")]
    Text,
    Number,
    Boolean,
    /// A string restricted to one of `options`.
    Enum { options: Vec<String> },
}

impl VarType {
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (VarType::Text, Value::String(_)) => true,
            (VarType::Number, Value::Number(_)) => true,
            (VarType::Boolean, Value::Bool(_)) => true,
            (VarType::Enum { options }, Value::String(s)) => options.iter().any(|o| o == s),
            _ => false,
        }
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarType::Text => f.write_str("string"),
            VarType::Number => f.write_str("number"),
            VarType::Boolean => f.write_str("boolean"),
            VarType::Enum { options } => write!(f, "one of [{}]", options.join(", ")),
        }
    }
}

/// Short description of a JSON value for error messages.
pub(crate) fn describe_value(value: &Value) -> String {
    match value {
        Value::Null => "null".into(),
        Value::Bool(_) => "boolean".into(),
        Value::Number(_) => "number".into(),
        Value::String(s) => format!("string '{s}'"),
        Value::Array(_) => "array".into(),
        Value::Object(_) => "object".into(),
    }
}

/// A named, typed input declared once by the flow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowInputVariable {
    pub name: String,
    #[serde(flatten)]
    pub kind: VarType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FlowInputVariable {
    pub fn new(name: impl Into<String>, kind: VarType) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: None,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Variable values bound for one run. Read-only once constructed.
#[derive(Debug, Clone, Default)]
pub struct BoundVariables {
    declared: HashMap<String, FlowInputVariable>,
    values: HashMap<String, Value>,
}

impl BoundVariables {
    /// Bind `supplied` values to `declarations`. Values for undeclared names
    /// are dropped with a warning; type checks happen on lookup so that a bad
    /// value only fails the steps that use it.
    pub fn new(
        declarations: &[FlowInputVariable],
        supplied: impl IntoIterator<Item = (String, Value)>,
    ) -> Self {
        let declared: HashMap<String, FlowInputVariable> = declarations
            .iter()
            .map(|decl| (decl.name.clone(), decl.clone()))
            .collect();

        let values = supplied
            .into_iter()
            .filter(|(name, _)| {
                let known = declared.contains_key(name);
                if !known {
                    warn!(variable = %name, "ignoring value for undeclared variable");
                }
                known
            })
            .collect();

        Self { declared, values }
    }

    /// Resolve variable `name` for `input`, falling back to its default.
    ///
    /// An optional variable with neither value nor default resolves to `null`.
    ///
    /// # Errors
    /// - [`BindingError::UnknownVariable`] if the flow does not declare `name`.
    /// - [`BindingError::MissingVariable`] if it is required and unresolved.
    /// - [`BindingError::TypeMismatch`] if the value does not match its type.
    pub fn lookup(&self, input: &str, name: &str) -> Result<Value, BindingError> {
        let decl = self.declared.get(name).ok_or_else(|| BindingError::UnknownVariable {
            input: input.to_owned(),
            variable: name.to_owned(),
        })?;

        let value = self
            .values
            .get(name)
            .filter(|v| !v.is_null())
            .or(decl.default.as_ref());

        match value {
            None if decl.required => Err(BindingError::MissingVariable {
                input: input.to_owned(),
                variable: name.to_owned(),
            }),
            None => Ok(Value::Null),
            Some(v) if !decl.kind.accepts(v) => Err(BindingError::TypeMismatch {
                input: input.to_owned(),
                variable: name.to_owned(),
                expected: decl.kind.to_string(),
                found: describe_value(v),
            }),
            Some(v) => Ok(v.clone()),
        }
    }

    /// Required variables with no supplied value and no default, sorted by name.
    pub fn missing_required(&self) -> Vec<&str> {
        let mut missing: Vec<&str> = self
            .declared
            .values()
            .filter(|decl| decl.required && decl.default.is_none())
            .filter(|decl| self.values.get(&decl.name).map_or(true, Value::is_null))
            .map(|decl| decl.name.as_str())
            .collect();
        missing.sort_unstable();
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn declarations() -> Vec<FlowInputVariable> {
        vec![
            FlowInputVariable::new("q", VarType::Text).required(),
            FlowInputVariable::new("limit", VarType::Number).with_default(json!(10)),
            FlowInputVariable::new("verbose", VarType::Boolean),
            FlowInputVariable::new(
                "tone",
                VarType::Enum { options: vec!["formal".into(), "casual".into()] },
            ),
        ]
    }

    fn bind(values: Value) -> BoundVariables {
        let supplied = values.as_object().cloned().unwrap_or_default();
        BoundVariables::new(&declarations(), supplied)
    }

    #[test]
    fn supplied_value_wins_over_default() {
        let vars = bind(json!({ "q": "hello", "limit": 3 }));
        assert_eq!(vars.lookup("query", "q").unwrap(), json!("hello"));
        assert_eq!(vars.lookup("n", "limit").unwrap(), json!(3));
    }

    #[test]
    fn default_fills_in_and_optional_falls_back_to_null() {
        let vars = bind(json!({}));
        assert_eq!(vars.lookup("n", "limit").unwrap(), json!(10));
        assert_eq!(vars.lookup("v", "verbose").unwrap(), Value::Null);
    }

    #[test]
    fn missing_required_variable_names_the_variable() {
        let vars = bind(json!({ "q": null }));
        assert_eq!(
            vars.lookup("query", "q").unwrap_err(),
            BindingError::MissingVariable { input: "query".into(), variable: "q".into() }
        );
        assert_eq!(vars.missing_required(), vec!["q"]);
    }

    #[test]
    fn type_mismatches_fail() {
        let vars = bind(json!({ "q": 5, "tone": "angry", "verbose": "yes" }));
        for name in ["q", "tone", "verbose"] {
            assert!(
                matches!(vars.lookup("x", name), Err(BindingError::TypeMismatch { variable, .. }) if variable == name),
                "{name} should mismatch"
            );
        }
    }

    #[test]
    fn enum_accepts_declared_options() {
        let vars = bind(json!({ "tone": "casual" }));
        assert_eq!(vars.lookup("x", "tone").unwrap(), json!("casual"));
    }

    #[test]
    fn undeclared_names_are_rejected_and_dropped() {
        let vars = bind(json!({ "q": "hi", "extra": 1 }));
        assert!(matches!(vars.lookup("x", "extra"), Err(BindingError::UnknownVariable { .. })));
    }

    #[test]
    fn declarations_use_the_document_shape() {
        let decl: FlowInputVariable = serde_json::from_value(json!({
            "name": "tone",
            "type": "enum",
            "options": ["formal", "casual"],
            "required": true
        }))
        .unwrap();
        assert!(decl.required);
        assert_eq!(decl.kind, VarType::Enum { options: vec!["formal".into(), "casual".into()] });

        let text: FlowInputVariable =
            serde_json::from_value(json!({ "name": "q", "type": "string" })).unwrap();
        assert_eq!(text.kind, VarType::Text);
    }
}
