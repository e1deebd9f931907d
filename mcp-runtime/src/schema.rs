//! Tool descriptors and their parameter schema.

use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Declared type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    pub fn as_str(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
        }
    }

    pub fn matches(self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Object => value.is_object(),
            ParamType::Array => value.is_array(),
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub kind: ParamType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    pub description: String,
}

impl ParamSpec {
    pub fn required(kind: ParamType, description: impl Into<String>) -> Self {
        Self {
            kind,
            required: true,
            default: None,
            description: description.into(),
        }
    }

    pub fn optional(kind: ParamType, description: impl Into<String>) -> Self {
        Self {
            kind,
            required: false,
            default: None,
            description: description.into(),
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Static metadata for one invocable tool.
///
/// `parameters` keeps declaration order; it serializes as a JSON object in
/// that order and validation walks it in that order.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub category: String,
    pub server_id: String,
    #[serde(serialize_with = "serialize_ordered_params")]
    #[schema(value_type = Object)]
    pub parameters: Vec<(String, ParamSpec)>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            category: String::new(),
            server_id: String::new(),
            parameters: Vec::new(),
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn server_id(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = server_id.into();
        self
    }

    pub fn param(mut self, name: impl Into<String>, spec: ParamSpec) -> Self {
        self.parameters.push((name.into(), spec));
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&ParamSpec> {
        self.parameters
            .iter()
            .find(|(param, _)| param == name)
            .map(|(_, spec)| spec)
    }
}

fn serialize_ordered_params<S>(params: &[(String, ParamSpec)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_map(params.iter().map(|(name, spec)| (name, spec)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn descriptor_serializes_parameters_in_declaration_order() {
        let descriptor = ToolDescriptor::new("send_message", "Send a message")
            .category("connections")
            .server_id("persona-hub")
            .param("server_name", ParamSpec::required(ParamType::String, "Target"))
            .param("message", ParamSpec::required(ParamType::String, "Text"))
            .param(
                "after",
                ParamSpec::optional(ParamType::Number, "Delay").with_default(json!(0)),
            );

        let text = serde_json::to_string(&descriptor).unwrap();
        let server = text.find("\"server_name\"").unwrap();
        let message = text.find("\"message\"").unwrap();
        let after = text.find("\"after\"").unwrap();
        assert!(server < message && message < after);

        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["serverId"], "persona-hub");
        assert_eq!(value["parameters"]["server_name"]["type"], "string");
        assert_eq!(value["parameters"]["server_name"]["required"], true);
        assert_eq!(value["parameters"]["after"]["default"], 0);
        assert!(value["parameters"]["message"].get("default").is_none());
    }

    #[test]
    fn param_type_checks_json_values() {
        assert!(ParamType::String.matches(&json!("x")));
        assert!(ParamType::Number.matches(&json!(1.5)));
        assert!(ParamType::Boolean.matches(&json!(false)));
        assert!(ParamType::Object.matches(&json!({})));
        assert!(ParamType::Array.matches(&json!([])));
        assert!(!ParamType::Number.matches(&json!("1")));
        assert!(!ParamType::Object.matches(&json!([])));
    }
}
