//! Explicitly constructed tool registry.
//!
//! Descriptors are checked once at registration; request-time code only does
//! lookups.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{RegistryError, ToolError};
use crate::schema::ToolDescriptor;

pub type Params = Map<String, Value>;

#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool with validated, default-merged parameters.
    async fn call(&self, params: Params) -> Result<Value, ToolError>;
}

/// Adapts an async fn over a typed parameter struct.
struct TypedHandler<P, F> {
    handler: F,
    _params: PhantomData<fn() -> P>,
}

#[async_trait]
impl<P, F, Fut> ToolHandler for TypedHandler<P, F>
where
    P: DeserializeOwned + Send + 'static,
    F: Fn(P) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send,
{
    async fn call(&self, params: Params) -> Result<Value, ToolError> {
        let typed: P = serde_json::from_value(Value::Object(params))
            .map_err(|err| ToolError::validation(format!("Invalid parameters: {err}")))?;
        (self.handler)(typed).await
    }
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    by_name: HashMap<String, usize>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.iter().map(|t| &t.descriptor.name).collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<(&ToolDescriptor, Arc<dyn ToolHandler>)> {
        let tool = &self.tools[*self.by_name.get(name)?];
        Some((&tool.descriptor, Arc::clone(&tool.handler)))
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter().map(|tool| &tool.descriptor)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Closest registered name, for "did you mean" hints.
    pub fn closest_name(&self, name: &str) -> Option<&str> {
        let wanted = name.trim().to_lowercase();
        self.tools
            .iter()
            .map(|tool| {
                let score = strsim::jaro_winkler(&wanted, &tool.descriptor.name.to_lowercase());
                (score, tool.descriptor.name.as_str())
            })
            .filter(|(score, _)| *score >= 0.75)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, name)| name)
    }
}

#[derive(Default)]
pub struct ToolRegistryBuilder {
    registry: ToolRegistry,
}

impl ToolRegistryBuilder {
    pub fn register(
        mut self,
        descriptor: ToolDescriptor,
        handler: impl ToolHandler + 'static,
    ) -> Result<Self, RegistryError> {
        validate_descriptor(&descriptor)?;
        if self.registry.by_name.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateTool(descriptor.name));
        }
        tracing::debug!(
            event = "tool_registered",
            tool = %descriptor.name,
            category = %descriptor.category,
            params = descriptor.parameters.len(),
            "Tool registered"
        );
        let index = self.registry.tools.len();
        self.registry.by_name.insert(descriptor.name.clone(), index);
        self.registry.tools.push(RegisteredTool {
            descriptor,
            handler: Arc::new(handler),
        });
        Ok(self)
    }

    /// Register an async fn taking a `Deserialize` parameter struct.
    pub fn register_typed<P, F, Fut>(
        self,
        descriptor: ToolDescriptor,
        handler: F,
    ) -> Result<Self, RegistryError>
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        self.register(
            descriptor,
            TypedHandler {
                handler,
                _params: PhantomData,
            },
        )
    }

    pub fn build(self) -> ToolRegistry {
        self.registry
    }
}

fn validate_descriptor(descriptor: &ToolDescriptor) -> Result<(), RegistryError> {
    if descriptor.name.trim().is_empty() {
        return Err(RegistryError::BlankName);
    }
    let mut seen = std::collections::HashSet::new();
    for (param, spec) in &descriptor.parameters {
        if param.trim().is_empty() {
            return Err(RegistryError::BlankParameter {
                tool: descriptor.name.clone(),
            });
        }
        if !seen.insert(param.as_str()) {
            return Err(RegistryError::DuplicateParameter {
                tool: descriptor.name.clone(),
                param: param.clone(),
            });
        }
        if let Some(default) = &spec.default {
            if !spec.kind.matches(default) {
                return Err(RegistryError::DefaultTypeMismatch {
                    tool: descriptor.name.clone(),
                    param: param.clone(),
                    expected: spec.kind,
                });
            }
        }
    }
    Ok(())
}
