//! Conversation orchestrator: one query, at most one tool round trip.
//!
//! Flow per query:
//! 1. **Guard**: no session means a not-connected reply, with no I/O at all
//! 2. **Catalog**: fetch the live tool list and declare it to the model
//! 3. **First call**: the model either answers or requests a tool
//! 4. **Tool**: run the first requested tool and record call + result
//! 5. **Second call**: the model answers from the tool output
//!
//! History lives only for the duration of one query. The session is never
//! torn down by a failing query.

use std::sync::Arc;

use crate::agent_core::catalog::to_model_declarations;
use crate::agent_core::errors::AgentError;
use crate::inference::client::ResponseDriver;
use crate::inference::types::{
    Content, FunctionCall, FunctionResponse, ModelResponse, ModelToolSpec, Part, PartKind, Role,
};
use crate::mcp_client::{CallToolResult, McpError, SessionManager, ToolSession};

/// Reply returned when a query arrives before the tool session is up.
pub const NOT_CONNECTED_REPLY: &str =
    "Not connected to the tool server. Start the session and try again.";

// ─── Types ──────────────────────────────────────────────────────────────────

/// Everything one processed query produced.
#[derive(Debug, Clone)]
pub struct Exchange {
    /// Final answer text, empty when the model produced none.
    pub answer: String,
    /// Full history of the query: 2 turns without a tool, 5 with one.
    pub history: Vec<Content>,
    /// The tool call that was executed, if any.
    pub tool_call: Option<FunctionCall>,
}

impl Exchange {
    fn not_connected() -> Self {
        Self {
            answer: NOT_CONNECTED_REPLY.to_string(),
            history: Vec::new(),
            tool_call: None,
        }
    }
}

// ─── Orchestrator ───────────────────────────────────────────────────────────

/// Drives a query through the model and the tool session.
///
/// Shareable across concurrent requests: every call keeps its own history.
pub struct Orchestrator {
    sessions: Arc<SessionManager>,
    driver: Arc<dyn ResponseDriver>,
}

impl Orchestrator {
    pub fn new(sessions: Arc<SessionManager>, driver: Arc<dyn ResponseDriver>) -> Self {
        Self { sessions, driver }
    }

    /// The session manager this orchestrator borrows sessions from.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Process a query and return the answer text.
    pub async fn process(&self, query: &str) -> Result<String, AgentError> {
        self.process_exchange(query).await.map(|exchange| exchange.answer)
    }

    /// Process a query and return the answer with its full history.
    pub async fn process_exchange(&self, query: &str) -> Result<Exchange, AgentError> {
        let query_id = uuid::Uuid::new_v4();

        let Some(session) = self.sessions.session() else {
            tracing::warn!(%query_id, "orchestrator: query received while not connected");
            return Ok(Exchange::not_connected());
        };

        tracing::info!(%query_id, query_len = query.len(), "orchestrator: processing query");

        let mut history = vec![Content::user_text(query)];

        let tools = session.list_tools().await.map_err(|e| match e {
            McpError::NotConnected => AgentError::NotConnected,
            other => {
                tracing::warn!(%query_id, error = %other, "orchestrator: tool catalog failed");
                AgentError::Catalog(other)
            }
        })?;
        let declarations = to_model_declarations(&tools);

        let first = self.generate(&history, &declarations, query_id).await?;
        append_content(&mut history, &first);

        let Some((call_part, call)) = first_function_call(&first) else {
            let answer = first.text().unwrap_or_default();
            tracing::info!(
                %query_id,
                answer_len = answer.len(),
                "orchestrator: answered without tools"
            );
            return Ok(Exchange {
                answer,
                history,
                tool_call: None,
            });
        };
        let extra = first.function_calls().len().saturating_sub(1);
        if extra > 0 {
            tracing::debug!(%query_id, ignored = extra, "orchestrator: extra function calls ignored");
        }

        let result = self.invoke(session.as_ref(), &call, query_id).await?;

        history.push(Content {
            role: Role::Model,
            parts: vec![call_part],
        });
        history.push(Content::user_function_responses(function_responses(
            &call.name, &result,
        )));

        let second = self.generate(&history, &declarations, query_id).await?;
        append_content(&mut history, &second);

        let answer = second.text().unwrap_or_default();
        tracing::info!(
            %query_id,
            tool = %call.name,
            answer_len = answer.len(),
            turns = history.len(),
            "orchestrator: answered with tool"
        );

        Ok(Exchange {
            answer,
            history,
            tool_call: Some(call),
        })
    }

    async fn generate(
        &self,
        history: &[Content],
        declarations: &ModelToolSpec,
        query_id: uuid::Uuid,
    ) -> Result<ModelResponse, AgentError> {
        self.driver
            .generate(history, declarations)
            .await
            .map_err(|e| {
                tracing::warn!(
                    %query_id,
                    error = %e,
                    rate_limited = e.is_rate_limited(),
                    "orchestrator: model call failed"
                );
                AgentError::Generation(e)
            })
    }

    async fn invoke(
        &self,
        session: &dyn ToolSession,
        call: &FunctionCall,
        query_id: uuid::Uuid,
    ) -> Result<CallToolResult, AgentError> {
        tracing::info!(
            %query_id,
            tool = %call.name,
            args = %call.arguments(),
            "orchestrator: calling tool"
        );

        let result = session
            .call_tool(&call.name, call.arguments())
            .await
            .map_err(|e| {
                tracing::warn!(%query_id, tool = %call.name, error = %e, "orchestrator: tool call failed");
                AgentError::tool(&call.name, &e)
            })?;

        if result.is_error {
            // Tool-level errors still go back to the model as text.
            tracing::warn!(%query_id, tool = %call.name, "orchestrator: tool reported an error");
        }
        Ok(result)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn append_content(history: &mut Vec<Content>, response: &ModelResponse) {
    if let Some(content) = response.content() {
        history.push(content.clone());
    }
}

/// The first named function call, along with the part that carried it (and
/// its thought signature). Calls without a name are skipped.
fn first_function_call(response: &ModelResponse) -> Option<(Part, FunctionCall)> {
    response
        .content()?
        .parts
        .iter()
        .find_map(|part| match part.kind() {
            PartKind::FunctionCall(call) if !call.name.is_empty() => {
                Some((part.clone(), call.clone()))
            }
            _ => None,
        })
}

/// One response per text item; a single empty one when there is no text.
fn function_responses(tool: &str, result: &CallToolResult) -> Vec<FunctionResponse> {
    let responses: Vec<FunctionResponse> = result
        .texts()
        .map(|text| FunctionResponse::text_result(tool, text))
        .collect();
    if responses.is_empty() {
        vec![FunctionResponse::text_result(tool, "")]
    } else {
        responses
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
