//! Tool catalog adapter: MCP tool definitions to model function declarations.

use crate::inference::types::{FunctionDeclaration, ModelToolSpec};
use crate::mcp_client::McpToolDefinition;

/// One declaration per tool, same name, description and schema, same order.
///
/// Schemas are passed through unmodified and duplicates are kept; the tool
/// server is the source of truth for its own registry.
pub fn to_model_declarations(tools: &[McpToolDefinition]) -> ModelToolSpec {
    ModelToolSpec {
        function_declarations: tools
            .iter()
            .map(|tool| FunctionDeclaration {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.input_schema.clone(),
            })
            .collect(),
    }
}
