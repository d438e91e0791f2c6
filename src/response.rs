use rmcp::model::{CallToolResult, Content};
use serde::Serialize;

use crate::extract::ExtractedComponent;
use crate::session::{RenderScope, SessionOutcome};

/// JSON envelope returned by every tool, double-encoded as `Content::text`.
#[derive(Debug, Serialize)]
pub struct ToolResponse {
    pub status: &'static str,
    pub content: String,
    pub content_type: &'static str,
    pub metadata: ToolMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<GenerationReport>,
}

#[derive(Debug, Serialize)]
pub struct ToolMetadata {
    pub tool_name: String,
    pub model_used: String,
    pub provider_used: String,
    #[serde(serialize_with = "serialize_finite_f64")]
    pub duration_seconds: f64,
}

impl ToolMetadata {
    /// Metadata for tools that make no model call.
    pub fn local(tool_name: &str, duration_seconds: f64) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            model_used: "none".to_string(),
            provider_used: "none".to_string(),
            duration_seconds,
        }
    }
}

/// Result of one generation: terminal state, extracted component and the
/// identifiers the renderer must provide.
#[derive(Debug, Serialize)]
pub struct GenerationReport {
    pub outcome: SessionOutcome,
    pub increments: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<ExtractedComponent>,
    pub scope: RenderScope,
}

/// Serialize f64, clamping non-finite values (NaN, Inf) to 0.0.
fn serialize_finite_f64<S: serde::Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(if v.is_finite() { *v } else { 0.0 })
}

impl ToolResponse {
    pub fn success(content: String, metadata: ToolMetadata) -> Self {
        Self {
            status: "success",
            content,
            content_type: "text",
            metadata,
            generation: None,
        }
    }

    pub fn error(message: String, metadata: ToolMetadata) -> Self {
        Self {
            status: "error",
            content: message,
            content_type: "text",
            metadata,
            generation: None,
        }
    }

    pub fn with_generation(mut self, report: GenerationReport) -> Self {
        self.generation = Some(report);
        self
    }

    /// Always a transport-level success; failures are reported through
    /// `"status": "error"` in the payload.
    pub fn into_call_tool_result(self) -> CallToolResult {
        match serde_json::to_string(&self) {
            Ok(json) => CallToolResult::success(vec![Content::text(json)]),
            Err(e) => {
                let escaped = e.to_string().replace('\\', "\\\\").replace('"', "\\\"");
                CallToolResult::success(vec![Content::text(format!(
                    r#"{{"status":"error","content":"serialization failed: {escaped}","content_type":"text","metadata":{{}}}}"#
                ))])
            }
        }
    }
}
