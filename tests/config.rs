//! Tests for config file persistence and the `configure` flow.

use std::path::PathBuf;

use kiln::config::{
    Config, EndpointSettings, FileConfig, ProviderPreset, read_file_config, save_endpoint,
};
use kiln::server::KilnServer;
use kiln::tools::configure::ConfigureRequest;

/// Unique scratch path per test; removed on drop.
struct ScratchFile(PathBuf);

impl ScratchFile {
    fn new(name: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "kiln-config-{}-{name}.toml",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        Self(path)
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

#[test]
fn file_sections_parse_with_defaults() {
    let scratch = ScratchFile::new("parse");
    std::fs::write(
        &scratch.0,
        r#"
[endpoint]
provider = "openai"
api_key = "sk-0123456789"

[session]
min_submit_interval_ms = 250

[[providers]]
name = "gateway"
host_suffix = "llm.example.com"
headers = [["X-Team", "{title}"]]
key_prefix = "gw-"
"#,
    )
    .unwrap();

    let file = read_file_config(&scratch.0).unwrap();
    assert_eq!(file.endpoint.provider, ProviderPreset::OpenAi);
    assert_eq!(file.endpoint.base_url, "");
    assert_eq!(file.session.min_submit_interval_ms, 250);
    assert_eq!(file.app.title, "React Builder");
    assert_eq!(file.providers.len(), 1);

    let config = Config::from_file_config(file, scratch.0.clone());
    let gateway = config
        .providers
        .lookup_url("https://eu.llm.example.com/v1")
        .unwrap();
    assert_eq!(gateway.name, "gateway");
    assert_eq!(gateway.key_prefix.as_deref(), Some("gw-"));
    // Built-ins stay available behind configured profiles.
    assert!(config.providers.lookup("openrouter.ai").is_some());
}

#[test]
fn invalid_toml_is_a_configuration_error() {
    let scratch = ScratchFile::new("invalid");
    std::fs::write(&scratch.0, "[endpoint\nprovider = ").unwrap();
    let err = read_file_config(&scratch.0).unwrap_err();
    assert!(err.to_string().contains("cannot parse"), "{err}");
}

#[test]
fn saving_endpoint_keeps_other_sections() {
    let scratch = ScratchFile::new("save");
    std::fs::write(&scratch.0, "[session]\nmin_submit_interval_ms = 4000\n").unwrap();

    let endpoint = EndpointSettings {
        provider: ProviderPreset::Custom,
        base_url: "http://localhost:11434/v1".to_string(),
        api_key: "local-key-0123".to_string(),
        model_name: "llama3".to_string(),
    };
    save_endpoint(&scratch.0, &endpoint).unwrap();

    let file = read_file_config(&scratch.0).unwrap();
    assert_eq!(file.endpoint, endpoint);
    assert_eq!(file.session.min_submit_interval_ms, 4000);
}

#[tokio::test]
async fn configure_validates_then_persists() {
    let scratch = ScratchFile::new("configure");
    let server = KilnServer::new(Config::from_file_config(
        FileConfig::default(),
        scratch.0.clone(),
    ));

    // OpenRouter keys must carry the sk-or- prefix.
    let rejected = server
        .reconfigure(&ConfigureRequest {
            api_key: Some("sk-0123456789abcdef".to_string()),
            ..Default::default()
        })
        .await;
    assert_eq!(rejected.status, "error");
    assert!(rejected.content.contains("sk-or-"), "{}", rejected.content);
    assert!(!scratch.0.exists());

    let accepted = server
        .reconfigure(&ConfigureRequest {
            api_key: Some("sk-or-0123456789abcdef".to_string()),
            model_name: Some("openai/gpt-4".to_string()),
            ..Default::default()
        })
        .await;
    assert_eq!(accepted.status, "success", "{}", accepted.content);
    assert!(!accepted.content.contains("0123456789abcdef"));
    assert!(accepted.content.contains("model: openai/gpt-4"));

    let saved = read_file_config(&scratch.0).unwrap();
    assert_eq!(saved.endpoint.api_key, "sk-or-0123456789abcdef");
    assert_eq!(server.endpoint().await.model_name, "openai/gpt-4");
}

#[tokio::test]
async fn empty_configure_reports_without_writing() {
    let scratch = ScratchFile::new("view");
    let server = KilnServer::new(Config::from_file_config(
        FileConfig::default(),
        scratch.0.clone(),
    ));

    let response = server.reconfigure(&ConfigureRequest::default()).await;
    assert_eq!(response.status, "success");
    assert!(response.content.contains("provider: openrouter"));
    assert!(response.content.contains("api_key: not set"));
    assert!(!scratch.0.exists());
}
