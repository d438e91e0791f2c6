use schemars::JsonSchema;
use serde::Deserialize;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GenerateRequest {
    /// Plain-language description of the component to build (e.g. "a countdown timer").
    pub prompt: String,
}

pub fn validate_prompt(prompt: &str) -> Result<(), String> {
    if prompt.trim().is_empty() {
        return Err("prompt must not be empty".to_string());
    }
    Ok(())
}
