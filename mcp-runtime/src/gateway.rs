//! Request path for a tool call: received, validated, dispatched, then
//! succeeded or failed.

use persona_core::tools::ToolSuccess;
use serde_json::{Value, json};

use crate::error::ToolError;
use crate::registry::{Params, ToolRegistry};
use crate::schema::ToolDescriptor;

/// Pick the parameter object out of a raw request body.
///
/// Accepted shapes, first match wins: `{"parameters": {..}}`, `{"args": {..}}`,
/// or the body object itself. Anything unparseable is an empty object.
pub fn extract_parameters(body: &[u8]) -> Params {
    let Ok(Value::Object(mut object)) = serde_json::from_slice::<Value>(body) else {
        return Params::new();
    };
    for key in ["parameters", "args"] {
        if matches!(object.get(key), Some(Value::Object(_))) {
            if let Some(Value::Object(inner)) = object.remove(key) {
                return inner;
            }
        }
    }
    object
}

fn is_missing(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.is_empty(),
        Some(_) => false,
    }
}

/// Check parameters against the descriptor in declaration order and merge
/// defaults for absent optional ones. An optional parameter sent as null or
/// an empty string is rejected rather than read as absent.
pub fn validate(descriptor: &ToolDescriptor, mut params: Params) -> Result<Params, ToolError> {
    for (name, spec) in &descriptor.parameters {
        if is_missing(params.get(name)) {
            if spec.required {
                return Err(
                    ToolError::validation(format!("Missing required parameter: {name}"))
                        .with_hint(format!("Provide '{name}' ({}): {}", spec.kind, spec.description))
                        .with_context(json!({ "parameter": name, "tool": descriptor.name })),
                );
            }
            if params.contains_key(name) {
                return Err(ToolError::validation(format!(
                    "Optional parameter '{name}' must not be empty; omit it instead"
                ))
                .with_context(json!({
                    "parameter": name,
                    "tool": descriptor.name,
                    "received": params.get(name),
                })));
            }
            if let Some(default) = &spec.default {
                params.insert(name.clone(), default.clone());
            }
            continue;
        }

        if let Some(value) = params.get(name) {
            if !spec.kind.matches(value) {
                return Err(ToolError::validation(format!(
                    "Parameter '{name}' must be of type {}",
                    spec.kind
                ))
                .with_context(json!({
                    "parameter": name,
                    "expected": spec.kind,
                    "received": value,
                })));
            }
        }
    }
    Ok(params)
}

/// Run one tool call end to end.
pub async fn execute(
    registry: &ToolRegistry,
    tool_name: &str,
    body: &[u8],
) -> Result<ToolSuccess, ToolError> {
    let params = extract_parameters(body);

    let Some((descriptor, handler)) = registry.get(tool_name) else {
        let mut err = ToolError::not_found(format!("Tool '{tool_name}' not found"))
            .with_context(json!({ "tool": tool_name }));
        if let Some(closest) = registry.closest_name(tool_name) {
            err = err.with_hint(format!("Did you mean '{closest}'?"));
        }
        tracing::warn!(event = "tool_not_found", tool = %tool_name, "Unknown tool requested");
        return Err(err);
    };

    let params = validate(descriptor, params).inspect_err(|err| {
        tracing::info!(
            event = "tool_validation_failed",
            tool = %tool_name,
            reason = %err.message,
            "Tool parameters rejected"
        );
    })?;

    tracing::debug!(event = "tool_dispatched", tool = %tool_name, "Dispatching tool call");
    match handler.call(params).await {
        Ok(result) => {
            tracing::debug!(event = "tool_succeeded", tool = %tool_name, "Tool call succeeded");
            Ok(ToolSuccess::new(result))
        }
        Err(err) => {
            tracing::warn!(
                event = "tool_failed",
                tool = %tool_name,
                code = err.kind.code(),
                error = %err.message,
                "Tool call failed"
            );
            Err(err)
        }
    }
}
