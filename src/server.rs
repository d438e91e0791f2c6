use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Implementation, ServerCapabilities, ServerInfo};
use rmcp::{ErrorData as McpError, ServerHandler, tool, tool_handler, tool_router};
use tokio::sync::Mutex;

use crate::config::{self, Config, EndpointSettings};
use crate::dispatch::StreamOutcome;
use crate::dispatch::http::HttpDispatch;
use crate::dispatch::providers::ProviderTable;
use crate::extract;
use crate::response::{GenerationReport, ToolMetadata, ToolResponse};
use crate::session::{self, RenderScope, Session, SessionController, SessionOutcome};
use crate::tools::configure::ConfigureRequest;
use crate::tools::extract::ExtractRequest;
use crate::tools::generate::{self, GenerateRequest};

#[derive(Clone)]
pub struct KilnServer {
    dispatch: Arc<HttpDispatch>,
    providers: ProviderTable,
    endpoint: Arc<Mutex<EndpointSettings>>,
    controller: Arc<Mutex<SessionController>>,
    config_path: PathBuf,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl KilnServer {
    pub fn new(config: Config) -> Self {
        let dispatch = HttpDispatch::new()
            .with_providers(config.providers.clone())
            .with_app_identity(config.app.clone());
        Self::with_dispatch(config, dispatch)
    }

    /// Build around a preconfigured dispatcher (custom backoff, test endpoints).
    pub fn with_dispatch(config: Config, dispatch: HttpDispatch) -> Self {
        let controller = SessionController::new(config.session.min_submit_interval());
        Self {
            dispatch: Arc::new(dispatch),
            providers: config.providers,
            endpoint: Arc::new(Mutex::new(config.endpoint)),
            controller: Arc::new(Mutex::new(controller)),
            config_path: config.config_path,
            tool_router: Self::tool_router(),
        }
    }

    pub async fn endpoint(&self) -> EndpointSettings {
        self.endpoint.lock().await.clone()
    }

    /// Run one generation. Throttled and misconfigured submissions never
    /// reach the network.
    pub async fn generate(&self, prompt: &str) -> ToolResponse {
        let start = Instant::now();
        let settings = self.endpoint().await.resolved();
        let metadata = |provider: String| ToolMetadata {
            tool_name: "generate_component".to_string(),
            model_used: settings.model_name.clone(),
            provider_used: provider,
            duration_seconds: start.elapsed().as_secs_f64(),
        };

        let req = match settings.to_request(session::compose_prompt(prompt), &self.providers) {
            Ok(req) => req,
            Err(e) => {
                tracing::warn!("generation rejected: {e}");
                return ToolResponse::error(e.user_message(), metadata("none".to_string()));
            }
        };
        let provider = self.dispatch.provider_name(&req);

        let cancel = match self.controller.lock().await.begin() {
            Ok(token) => token,
            Err(e) => {
                tracing::info!("submission throttled: {e}");
                return ToolResponse::error(e.user_message(), metadata(provider));
            }
        };

        tracing::info!(model = %req.model, provider = %provider, key = %req.key_hint(), "generation started");
        let (session, outcome) = Session::run(&self.dispatch, &req, &cancel).await;

        let report = GenerationReport {
            outcome: session.outcome().cloned().unwrap_or(SessionOutcome::Completed),
            increments: session.increments(),
            component: session.component().cloned(),
            scope: RenderScope::default(),
        };
        let response = match outcome {
            StreamOutcome::Completed => {
                tracing::info!(
                    increments = session.increments(),
                    has_component = session.component().is_some(),
                    "generation completed"
                );
                ToolResponse::success(session.text().to_string(), metadata(provider))
            }
            StreamOutcome::Failed(e) => {
                tracing::warn!("generation failed: {e}");
                ToolResponse::error(e.user_message(), metadata(provider))
            }
        };
        response.with_generation(report)
    }

    /// Apply a partial endpoint update, validate it and persist it.
    pub async fn reconfigure(&self, req: &ConfigureRequest) -> ToolResponse {
        let start = Instant::now();
        let mut endpoint = self.endpoint.lock().await;
        let next = req.apply(&endpoint);

        if !req.is_empty() {
            if let Err(e) = next.resolved().validate(&self.providers) {
                return ToolResponse::error(
                    e.user_message(),
                    ToolMetadata::local("configure", start.elapsed().as_secs_f64()),
                );
            }
            if let Err(e) = config::save_endpoint(&self.config_path, &next) {
                tracing::warn!("configuration not persisted: {e}");
                return ToolResponse::error(
                    e.user_message(),
                    ToolMetadata::local("configure", start.elapsed().as_secs_f64()),
                );
            }
            tracing::info!(path = %self.config_path.display(), "endpoint settings saved");
            *endpoint = next;
        }

        ToolResponse::success(
            describe_endpoint(&endpoint),
            ToolMetadata::local("configure", start.elapsed().as_secs_f64()),
        )
    }

    #[tool(
        name = "generate_component",
        description = "Generate a React function component from a plain-language description. Streams the model output and returns the full text plus the extracted, mountable component source and the identifiers the renderer must provide."
    )]
    pub async fn generate_component(
        &self,
        Parameters(req): Parameters<GenerateRequest>,
    ) -> Result<CallToolResult, McpError> {
        generate::validate_prompt(&req.prompt)
            .map_err(|msg| McpError::invalid_params(msg, None))?;
        Ok(self.generate(&req.prompt).await.into_call_tool_result())
    }

    #[tool(
        name = "extract_component",
        description = "Extract the first fenced code block from model output as mountable component source. Returns an error until the block's closing fence is present.",
        annotations(read_only_hint = true)
    )]
    pub async fn extract_component(
        &self,
        Parameters(req): Parameters<ExtractRequest>,
    ) -> Result<CallToolResult, McpError> {
        let start = Instant::now();
        let response = match extract::extract(&req.text) {
            Some(found) => ToolResponse::success(
                found.source_code.clone(),
                ToolMetadata::local("extract_component", start.elapsed().as_secs_f64()),
            )
            .with_generation(GenerationReport {
                outcome: SessionOutcome::Completed,
                increments: 0,
                component: Some(found),
                scope: RenderScope::default(),
            }),
            None => ToolResponse::error(
                "no complete fenced code block found".to_string(),
                ToolMetadata::local("extract_component", start.elapsed().as_secs_f64()),
            ),
        };
        Ok(response.into_call_tool_result())
    }

    #[tool(
        name = "test_connection",
        description = "Check that the configured endpoint is reachable and accepts the API key by listing its models.",
        annotations(read_only_hint = true)
    )]
    pub async fn test_connection(&self) -> Result<CallToolResult, McpError> {
        let start = Instant::now();
        let settings = self.endpoint().await.resolved();
        let result = match settings.to_request("", &self.providers) {
            Ok(req) => self
                .dispatch
                .test_connection(&req)
                .await
                .map(|()| self.dispatch.provider_name(&req)),
            Err(e) => Err(e),
        };

        let metadata = |provider: String| ToolMetadata {
            tool_name: "test_connection".to_string(),
            model_used: settings.model_name.clone(),
            provider_used: provider,
            duration_seconds: start.elapsed().as_secs_f64(),
        };
        let response = match result {
            Ok(provider) => ToolResponse::success(
                format!("connected to {}", settings.base_url),
                metadata(provider),
            ),
            Err(e) => {
                tracing::warn!("connection test failed: {e}");
                let provider = e.provider().unwrap_or("none").to_string();
                ToolResponse::error(e.user_message(), metadata(provider))
            }
        };
        Ok(response.into_call_tool_result())
    }

    #[tool(
        name = "configure",
        description = "View or change the endpoint settings (provider preset, base URL, API key, model). Call with no arguments to see the current settings. Changes are validated and saved to the config file."
    )]
    pub async fn configure(
        &self,
        Parameters(req): Parameters<ConfigureRequest>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self.reconfigure(&req).await.into_call_tool_result())
    }
}

/// Markdown summary of the endpoint. The API key is never shown.
fn describe_endpoint(endpoint: &EndpointSettings) -> String {
    let resolved = endpoint.resolved();
    let key = if resolved.api_key.is_empty() {
        "not set"
    } else {
        "set"
    };
    let mut out = format!(
        "provider: {}\nbase_url: {}\nmodel: {}\napi_key: {key}\n",
        resolved.provider.as_str(),
        if resolved.base_url.is_empty() {
            "not set"
        } else {
            resolved.base_url.as_str()
        },
        resolved.model_name,
    );
    let models = resolved.provider.models();
    if !models.is_empty() {
        out.push_str("\nsuggested models:\n");
        for model in models {
            out.push_str(&format!("- {model}\n"));
        }
    }
    out
}

#[tool_handler]
impl ServerHandler for KilnServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "kiln".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "Kiln: turn a plain-language description into a renderable React component.\n\n\
                 Workflow:\n\
                 1. Call `configure` with no arguments to inspect the endpoint, then set provider, base_url, api_key and model_name as needed.\n\
                 2. Call `test_connection` to verify the endpoint and key.\n\
                 3. Call `generate_component` with a description. Submissions closer together than the configured interval are rejected.\n\
                 4. Render `generation.component.source_code` with the identifiers in `generation.scope` in scope.\n\n\
                 `extract_component` re-runs extraction on any model output you already have."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_summary_hides_key() {
        let endpoint = EndpointSettings {
            api_key: "sk-or-secret-value".to_string(),
            ..Default::default()
        };
        let summary = describe_endpoint(&endpoint);
        assert!(!summary.contains("secret"));
        assert!(summary.contains("api_key: set"));
        assert!(summary.contains("https://openrouter.ai/api/v1"));
        assert!(summary.contains("- qwen/qwen-2.5-72b-instruct"));
    }
}
