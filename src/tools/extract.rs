use schemars::JsonSchema;
use serde::Deserialize;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExtractRequest {
    /// Model output containing a fenced code block. May be partial.
    pub text: String,
}
