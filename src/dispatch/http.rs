use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::dispatch::backoff::BackoffPolicy;
use crate::dispatch::providers::{
    AppIdentity, GENERIC_PROVIDER, ProviderProfile, ProviderTable, generic_auth_guidance,
};
use crate::dispatch::sse::{Frame, FrameDecoder};
use crate::dispatch::{StreamObserver, StreamOutcome, StreamRequest};
use crate::error::KilnError;

pub const TEMPERATURE: f64 = 0.7;
pub const MAX_TOKENS: u32 = 2000;

/// Upstream error details are cut to this many characters.
const MAX_ERROR_DETAIL_CHARS: usize = 500;
/// At most this many bytes of an error body are read off the wire.
pub const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

pub struct HttpDispatch {
    client: Client,
    providers: ProviderTable,
    app: AppIdentity,
    backoff: BackoffPolicy,
}

impl Default for HttpDispatch {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpDispatch {
    pub fn new() -> Self {
        // No read timeout: a slow but live stream is never cut off here.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(4)
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            providers: ProviderTable::builtin(),
            app: AppIdentity::default(),
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_providers(mut self, providers: ProviderTable) -> Self {
        self.providers = providers;
        self
    }

    pub fn with_app_identity(mut self, app: AppIdentity) -> Self {
        self.app = app;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn profile_for(&self, req: &StreamRequest) -> Option<&ProviderProfile> {
        self.providers.lookup_url(req.base_url())
    }

    pub fn provider_name(&self, req: &StreamRequest) -> String {
        self.profile_for(req)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| GENERIC_PROVIDER.to_string())
    }

    /// Request body: fixed sampling parameters plus provider body fields.
    pub fn build_body(&self, req: &StreamRequest) -> Value {
        let mut body = serde_json::json!({
            "model": req.model,
            "messages": [{"role": "user", "content": req.prompt}],
            "stream": true,
            "temperature": TEMPERATURE,
            "max_tokens": MAX_TOKENS,
        });
        if let Some(profile) = self.profile_for(req) {
            for (key, value) in &profile.body_fields {
                body[key.as_str()] = value.clone();
            }
        }
        body
    }

    /// Auth, content negotiation and provider attribution headers.
    pub fn build_headers(&self, req: &StreamRequest) -> Result<HeaderMap, KilnError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        let auth = HeaderValue::from_str(&format!("Bearer {}", req.api_key())).map_err(|_| {
            KilnError::Configuration("API key contains characters not allowed in a header".into())
        })?;
        headers.insert(AUTHORIZATION, auth);

        if let Some(profile) = self.profile_for(req) {
            for (key, value) in profile.resolved_headers(&self.app) {
                let name = HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
                    KilnError::Configuration(format!("invalid provider header name: {key}"))
                })?;
                let value = HeaderValue::from_str(&value).map_err(|_| {
                    KilnError::Configuration(format!("invalid provider header value for {key}"))
                })?;
                headers.insert(name, value);
            }
        }
        Ok(headers)
    }

    /// Run one generation, reporting to `observer`.
    ///
    /// Calls `on_done` or `on_failure` exactly once, as the last callback.
    /// Cancelling `cancel` abandons the generation with `Superseded`.
    pub async fn stream(
        &self,
        req: &StreamRequest,
        observer: &mut dyn StreamObserver,
        cancel: &CancellationToken,
    ) -> StreamOutcome {
        tracing::info!(
            provider = %self.provider_name(req),
            model = %req.model,
            url = %req.completions_url(),
            key = %req.key_hint(),
            "starting stream"
        );

        match self.run(req, observer, cancel).await {
            Ok(()) => {
                tracing::info!(model = %req.model, "stream completed");
                observer.on_done();
                StreamOutcome::Completed
            }
            Err(e) => {
                tracing::warn!("stream failed: {e}");
                observer.on_failure(&e);
                StreamOutcome::Failed(e)
            }
        }
    }

    async fn run(
        &self,
        req: &StreamRequest,
        observer: &mut dyn StreamObserver,
        cancel: &CancellationToken,
    ) -> Result<(), KilnError> {
        let (response, attempts) = self.open(req, observer, cancel).await?;
        // `response` and its body stream are dropped on every return below,
        // which releases the connection.
        self.read_body(req, response, attempts, observer, cancel).await
    }

    /// Send the request, retrying 429s and network failures with backoff.
    /// Returns the successful response and the number of attempts it took.
    async fn open(
        &self,
        req: &StreamRequest,
        observer: &mut dyn StreamObserver,
        cancel: &CancellationToken,
    ) -> Result<(Response, u32), KilnError> {
        let url = req.completions_url();
        let headers = self.build_headers(req)?;
        let body = self.build_body(req);
        let provider = self.provider_name(req);
        let mut attempt: u32 = 0;

        loop {
            let send = self
                .client
                .post(&url)
                .headers(headers.clone())
                .json(&body)
                .send();
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(KilnError::Superseded),
                sent = send => sent,
            };

            let err = match sent {
                Ok(response) if response.status().is_success() => {
                    return Ok((response, attempt + 1));
                }
                Ok(response) => {
                    let status = response.status();
                    let body = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(KilnError::Superseded),
                        body = read_error_body(response) => body,
                    };
                    self.classify_status(req, status, &body, attempt + 1)
                }
                Err(e) if e.is_builder() => {
                    return Err(KilnError::Configuration(format!("invalid request: {e}")));
                }
                Err(e) => KilnError::Connectivity {
                    provider: provider.clone(),
                    attempts: attempt + 1,
                    message: e.to_string(),
                },
            };

            if !err.is_retryable() || !self.backoff.can_retry(attempt) {
                return Err(err);
            }
            tracing::warn!(provider = %provider, attempt, "retrying: {err}");
            self.pause_before_retry(attempt, retry_reason(&err), observer, cancel)
                .await?;
            attempt += 1;
        }
    }

    /// Announce the retry as an increment, then wait out the backoff delay.
    async fn pause_before_retry(
        &self,
        attempt: u32,
        reason: &str,
        observer: &mut dyn StreamObserver,
        cancel: &CancellationToken,
    ) -> Result<(), KilnError> {
        let delay = self.backoff.delay_for(attempt);
        observer.on_increment(&format!(
            "{reason}, retrying in {}ms ({}/{})...\n",
            delay.as_millis(),
            attempt + 1,
            self.backoff.max_retries
        ));
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(KilnError::Superseded),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    async fn read_body(
        &self,
        req: &StreamRequest,
        response: Response,
        attempts: u32,
        observer: &mut dyn StreamObserver,
        cancel: &CancellationToken,
    ) -> Result<(), KilnError> {
        if response.content_length() == Some(0) {
            return Err(empty_body());
        }

        let provider = self.provider_name(req);
        let mut bytes = response.bytes_stream();
        let mut decoder = FrameDecoder::new();
        let mut received = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(KilnError::Superseded),
                next = bytes.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(|e| KilnError::Connectivity {
                provider: provider.clone(),
                attempts,
                message: format!("stream interrupted: {e}"),
            })?;
            received += chunk.len();

            for frame in decoder.feed(&chunk) {
                if deliver(frame, &provider, observer)? {
                    return Ok(());
                }
            }
        }

        if received == 0 {
            return Err(empty_body());
        }

        tracing::debug!("stream ended without [DONE]");
        for frame in decoder.finish() {
            if deliver(frame, &provider, observer)? {
                break;
            }
        }
        Ok(())
    }

    /// Map a non-success status to the error taxonomy.
    pub fn classify_status(
        &self,
        req: &StreamRequest,
        status: StatusCode,
        body: &str,
        attempts: u32,
    ) -> KilnError {
        let provider = self.provider_name(req);
        let message = parse_error_detail(body, status);
        tracing::warn!(
            provider = %provider,
            status = status.as_u16(),
            detail = %message,
            "upstream rejected request"
        );

        match status.as_u16() {
            401 => {
                let guidance = match self.profile_for(req) {
                    Some(profile) => profile.auth_guidance(&message),
                    None => generic_auth_guidance(),
                };
                KilnError::AuthFailed {
                    provider,
                    message,
                    guidance,
                }
            }
            403 => KilnError::Forbidden { provider, message },
            429 => KilnError::RateLimited { provider, attempts },
            500 | 502 | 503 | 504 => KilnError::TransientServer {
                provider,
                status: status.as_u16(),
                message,
            },
            code => KilnError::Upstream {
                provider,
                status: code,
                message,
            },
        }
    }

    /// `GET {base}/models` with the same headers, to check an endpoint before use.
    pub async fn test_connection(&self, req: &StreamRequest) -> Result<(), KilnError> {
        let mut headers = self.build_headers(req)?;
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let response = self
            .client
            .get(req.models_url())
            .headers(headers)
            .send()
            .await
            .map_err(|e| KilnError::Connectivity {
                provider: self.provider_name(req),
                attempts: 1,
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = read_error_body(response).await;
        Err(self.classify_status(req, status, &body, 1))
    }
}

/// Forward one frame. Returns true when the stream is finished.
fn deliver(
    frame: Frame,
    provider: &str,
    observer: &mut dyn StreamObserver,
) -> Result<bool, KilnError> {
    match frame {
        Frame::Delta(text) => {
            observer.on_increment(&text);
            Ok(false)
        }
        Frame::Done => Ok(true),
        Frame::Error(message) => Err(KilnError::Protocol {
            provider: provider.to_string(),
            message,
        }),
    }
}

fn retry_reason(err: &KilnError) -> &'static str {
    match err {
        KilnError::RateLimited { .. } => "rate limited",
        _ => "connection failed",
    }
}

/// Read an error body, stopping after `MAX_ERROR_BODY_BYTES`.
async fn read_error_body(mut response: Response) -> String {
    let mut buf = Vec::new();
    while buf.len() < MAX_ERROR_BODY_BYTES {
        match response.chunk().await {
            Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
            Ok(None) => break,
            Err(e) if buf.is_empty() => return format!("failed to read error body: {e}"),
            Err(_) => break,
        }
    }
    buf.truncate(MAX_ERROR_BODY_BYTES);
    String::from_utf8_lossy(&buf).into_owned()
}

fn empty_body() -> KilnError {
    KilnError::Configuration("the response body is empty".to_string())
}

/// Pull `error.message` out of a JSON error body, else use the raw text.
pub fn parse_error_detail(body: &str, status: StatusCode) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string();
    }

    let from_json = serde_json::from_str::<Value>(trimmed).ok().and_then(|v| {
        v.get("error")
            .and_then(|e| e.get("message").or(Some(e)))
            .and_then(Value::as_str)
            .or_else(|| v.get("message").and_then(Value::as_str))
            .map(str::to_string)
    });

    let detail = from_json.unwrap_or_else(|| trimmed.to_string());
    detail.chars().take(MAX_ERROR_DETAIL_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_detail_prefers_nested_message() {
        let body = r#"{"error":{"message":"No auth credentials found","code":401}}"#;
        assert_eq!(
            parse_error_detail(body, StatusCode::UNAUTHORIZED),
            "No auth credentials found"
        );
    }

    #[test]
    fn error_detail_falls_back_to_raw_text() {
        assert_eq!(
            parse_error_detail("upstream exploded", StatusCode::BAD_GATEWAY),
            "upstream exploded"
        );
        assert_eq!(
            parse_error_detail("  ", StatusCode::SERVICE_UNAVAILABLE),
            "Service Unavailable"
        );
    }

    #[test]
    fn error_detail_is_capped() {
        let long = "x".repeat(10_000);
        assert_eq!(
            parse_error_detail(&long, StatusCode::BAD_REQUEST).len(),
            MAX_ERROR_DETAIL_CHARS
        );
    }
}
