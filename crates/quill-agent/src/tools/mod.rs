//! Tools the assistant can call during a run.

mod web;

pub use web::{WEB_SEARCH, WebSearchConfig, WebSearchTool};

use quill_llm::{ToolCall, ToolOutput};
use serde_json::{Value, json};

/// Execute one tool call requested by the model.
///
/// Never fails: unknown tools and bad arguments produce error-shaped output
/// so the run can continue.
pub async fn execute_tool_call(web_search: &WebSearchTool, call: ToolCall) -> ToolOutput {
    match call.name.as_str() {
        WEB_SEARCH => {
            let query = serde_json::from_str::<Value>(&call.arguments)
                .ok()
                .and_then(|args| args.get("query").and_then(Value::as_str).map(String::from));

            match query {
                Some(query) => ToolOutput::new(call.id, web_search.search(&query).await),
                None => ToolOutput::new(
                    call.id,
                    json!({ "error": "Missing 'query' parameter" }).to_string(),
                ),
            }
        }
        other => {
            tracing::warn!(tool = other, "Model requested an unknown tool");
            call.into()
        }
    }
}
