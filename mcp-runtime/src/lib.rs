//! Tool invocation runtime: descriptors with parameter schemas, an explicitly
//! built registry, the request gateway and the built-in connection tools.

pub mod builtin;
pub mod error;
pub mod gateway;
pub mod registry;
pub mod schema;

pub use error::{RegistryError, ToolError, ToolErrorKind};
pub use gateway::execute;
pub use registry::{Params, ToolHandler, ToolRegistry, ToolRegistryBuilder};
pub use schema::{ParamSpec, ParamType, ToolDescriptor};
