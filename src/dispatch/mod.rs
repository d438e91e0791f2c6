pub mod backoff;
pub mod http;
pub mod providers;
pub mod sse;

use crate::error::KilnError;

/// One generation request. Immutable once built; `new` validates the
/// endpoint triple so no network call is made with a bad configuration.
#[derive(Clone)]
pub struct StreamRequest {
    pub prompt: String,
    base_url: String,
    api_key: String,
    pub model: String,
}

impl StreamRequest {
    pub fn new(
        prompt: impl Into<String>,
        base_url: &str,
        api_key: &str,
        model: &str,
    ) -> Result<Self, KilnError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(KilnError::Configuration("base URL is empty".to_string()));
        }
        let parsed = reqwest::Url::parse(&base_url).map_err(|e| {
            KilnError::Configuration(format!("base URL is not an absolute URL: {e}"))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(KilnError::Configuration(format!(
                "base URL must use http or https, got {}",
                parsed.scheme()
            )));
        }

        let api_key = api_key.trim().to_string();
        if api_key.is_empty() {
            return Err(KilnError::Configuration("API key is empty".to_string()));
        }

        let model = model.trim().to_string();
        if model.is_empty() {
            return Err(KilnError::Configuration("model name is empty".to_string()));
        }

        Ok(Self {
            prompt: prompt.into(),
            base_url,
            api_key,
            model,
        })
    }

    /// Base URL without trailing slashes.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    pub fn models_url(&self) -> String {
        format!("{}/models", self.base_url)
    }

    /// First five characters of the key, for logs.
    pub fn key_hint(&self) -> String {
        let prefix: String = self.api_key.chars().take(5).collect();
        format!("{prefix}...")
    }
}

impl std::fmt::Debug for StreamRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRequest")
            .field("prompt_len", &self.prompt.len())
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .finish()
    }
}

/// Terminal state of one generation. Exactly one per `stream` call.
#[derive(Debug)]
pub enum StreamOutcome {
    Completed,
    Failed(KilnError),
}

impl StreamOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Receives the stream as it happens.
///
/// `on_increment` may fire any number of times, in server order. Exactly one
/// of `on_done` / `on_failure` fires last.
pub trait StreamObserver: Send {
    fn on_increment(&mut self, text: &str);
    fn on_done(&mut self);
    fn on_failure(&mut self, error: &KilnError);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_normalizes_url_and_key() {
        let req = StreamRequest::new("hi", " https://api.test/v1// ", "  sk-abcdefghij \n", "m")
            .unwrap();
        assert_eq!(req.base_url(), "https://api.test/v1");
        assert_eq!(req.api_key(), "sk-abcdefghij");
        assert_eq!(req.completions_url(), "https://api.test/v1/chat/completions");
        assert_eq!(req.key_hint(), "sk-ab...");
    }

    #[test]
    fn request_rejects_bad_triples() {
        for (url, key, model) in [
            ("", "k", "m"),
            ("api.test/v1", "k", "m"),
            ("ftp://api.test", "k", "m"),
            ("https://api.test", "   ", "m"),
            ("https://api.test", "k", " "),
        ] {
            let err = StreamRequest::new("p", url, key, model).unwrap_err();
            assert!(
                matches!(err, KilnError::Configuration(_)),
                "{url:?}/{key:?}/{model:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn debug_redacts_key() {
        let req = StreamRequest::new("p", "https://api.test", "sk-secret-value", "m").unwrap();
        assert!(!format!("{req:?}").contains("sk-secret-value"));
    }
}
