use std::sync::Arc;

use persona_mcp_runtime::ToolRegistry;
use persona_ws::ConnectionManager;

#[derive(Clone)]
pub struct AppState {
    pub manager: ConnectionManager,
    pub tools: Arc<ToolRegistry>,
}
