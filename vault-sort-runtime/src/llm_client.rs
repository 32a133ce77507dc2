//! HTTP client for a llama.cpp-style `/completion` endpoint.

use crate::interfaces::{CompletionRequest, LlmBackend, RuntimeError};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Wire payload. Sampling is pinned so equal prompts give equal replies.
#[derive(Debug, Serialize)]
struct CompletionPayload<'a> {
    prompt: &'a str,
    n_predict: u32,
    temperature: f32,
    top_p: f32,
    stream: bool,
    #[serde(skip_serializing_if = "no_stop")]
    stop: &'a [String],
}

fn no_stop(stop: &&[String]) -> bool {
    stop.is_empty()
}

#[derive(Debug, Deserialize)]
struct CompletionBody {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    text: Option<String>,
}

/// Circuit breaker state.
struct CircuitBreaker {
    consecutive_failures: AtomicUsize,
    breaker_open: AtomicBool,
    opened_at: Mutex<Option<Instant>>,
    failure_threshold: usize,
    cooldown_duration: Duration,
}

impl CircuitBreaker {
    fn new(failure_threshold: usize, cooldown_duration: Duration) -> Self {
        Self {
            consecutive_failures: AtomicUsize::new(0),
            breaker_open: AtomicBool::new(false),
            opened_at: Mutex::new(None),
            failure_threshold,
            cooldown_duration,
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.breaker_open.store(false, Ordering::SeqCst);
        *self.opened_at.lock() = None;
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.failure_threshold {
            self.breaker_open.store(true, Ordering::SeqCst);
            *self.opened_at.lock() = Some(Instant::now());
        }
    }

    fn should_allow_request(&self) -> Result<(), RuntimeError> {
        if !self.breaker_open.load(Ordering::SeqCst) {
            return Ok(());
        }

        let opened_at = self.opened_at.lock();
        if let Some(opened_time) = *opened_at {
            if opened_time.elapsed() >= self.cooldown_duration {
                // Allow trial request
                return Ok(());
            }
        }

        Err(RuntimeError::LLMError(
            "Circuit breaker open: completion server unavailable".to_string(),
        ))
    }
}

/// Completion client. One request per [`LlmBackend::complete`] call; the
/// retry schedule belongs to the oracle.
#[derive(Clone)]
pub struct LLMClient {
    url: String,
    client: reqwest::Client,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl LLMClient {
    /// Create a client for `url` with a per-request timeout.
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            url: url.into(),
            client,
            circuit_breaker: Arc::new(CircuitBreaker::new(5, Duration::from_secs(30))),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Host and port the endpoint listens on.
    pub fn endpoint(&self) -> Result<(String, u16), RuntimeError> {
        let parsed = reqwest::Url::parse(&self.url)
            .map_err(|e| RuntimeError::ConfigError(format!("Invalid oracle URL: {}", e)))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| RuntimeError::ConfigError("Oracle URL has no host".to_string()))?
            .to_string();
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| RuntimeError::ConfigError("Oracle URL has no port".to_string()))?;
        Ok((host, port))
    }

    /// Whether a TCP connection to the endpoint opens within `timeout`.
    pub async fn is_reachable(&self, timeout: Duration) -> bool {
        let Ok((host, port)) = self.endpoint() else {
            return false;
        };
        matches!(
            tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), port))).await,
            Ok(Ok(_))
        )
    }

    /// Polls the endpoint until it accepts connections or `limit` elapses.
    pub async fn wait_until_reachable(&self, limit: Duration) -> Result<(), RuntimeError> {
        let deadline = Instant::now() + limit;
        loop {
            if self.is_reachable(Duration::from_secs(1)).await {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(RuntimeError::LLMError(format!(
                    "Completion server at {} not reachable after {}s",
                    self.url,
                    limit.as_secs()
                )));
            }
            debug!("Waiting for completion server at {}", self.url);
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    async fn complete_once(&self, request: &CompletionRequest) -> Result<String, RuntimeError> {
        let payload = CompletionPayload {
            prompt: &request.prompt,
            n_predict: request.n_predict,
            temperature: 0.0,
            top_p: 0.0,
            stream: false,
            stop: &request.stop,
        };

        debug!(
            "completion url={} prompt_chars={} n_predict={} stop={}",
            self.url,
            request.prompt.chars().count(),
            request.n_predict,
            request.stop.len()
        );

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RuntimeError::LLMTimeout
                } else if e.is_connect() {
                    RuntimeError::LLMError("Network connection failed".to_string())
                } else {
                    RuntimeError::LLMError(format!("HTTP request failed: {}", e))
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                RuntimeError::LLMTimeout
            } else {
                RuntimeError::LLMError(format!("Failed to read response: {}", e))
            }
        })?;

        if !status.is_success() {
            return Err(RuntimeError::LLMError(format!(
                "HTTP {}: {}",
                status,
                head(&body, 200)
            )));
        }

        Ok(extract_text(&body))
    }
}

#[async_trait]
impl LlmBackend for LLMClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, RuntimeError> {
        self.circuit_breaker.should_allow_request()?;

        match self.complete_once(request).await {
            Ok(text) => {
                self.circuit_breaker.record_success();
                Ok(text)
            }
            Err(e) => {
                warn!("Completion request failed: {}", e);
                self.circuit_breaker.record_failure();
                Err(e)
            }
        }
    }
}

/// `content` or `choices[0].text`. Bodies that are not a completion envelope
/// are passed through so the parser can still look for an action in them.
fn extract_text(body: &str) -> String {
    match serde_json::from_str::<CompletionBody>(body) {
        Ok(parsed) => parsed
            .content
            .or_else(|| parsed.choices.into_iter().next().and_then(|c| c.text))
            .map(|text| text.trim().to_string())
            .unwrap_or_default(),
        Err(_) => body.trim().to_string(),
    }
}

/// First `max` characters of `text`.
pub fn head(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_payload_serialization() {
        let stop = vec!["\n\n".to_string()];
        let payload = CompletionPayload {
            prompt: "p",
            n_predict: 64,
            temperature: 0.0,
            top_p: 0.0,
            stream: false,
            stop: &stop,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["n_predict"], 64);
        assert_eq!(value["stream"], false);
        assert_eq!(value["stop"][0], "\n\n");

        let no_stop = CompletionPayload { stop: &[], ..payload };
        let value = serde_json::to_value(&no_stop).unwrap();
        assert!(value.get("stop").is_none());
    }

    #[test]
    fn test_extract_text_variants() {
        assert_eq!(extract_text(r#"{"content":" {\"a\":1} "}"#), r#"{"a":1}"#);
        assert_eq!(extract_text(r#"{"choices":[{"text":"hi"}]}"#), "hi");
        assert_eq!(extract_text(r#"{"other":true}"#), "");
        assert_eq!(extract_text("plain text"), "plain text");
    }

    #[test]
    fn test_endpoint_parsing() {
        let client = LLMClient::new("http://127.0.0.1:8080/completion", Duration::from_secs(1));
        assert_eq!(client.endpoint().unwrap(), ("127.0.0.1".to_string(), 8080));

        let bad = LLMClient::new("not a url", Duration::from_secs(1));
        assert!(matches!(bad.endpoint(), Err(RuntimeError::ConfigError(_))));
    }

    #[test]
    fn test_circuit_breaker_opens() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record_failure();
        assert!(breaker.should_allow_request().is_ok());
        breaker.record_failure();
        assert!(breaker.should_allow_request().is_err());
        breaker.record_success();
        assert!(breaker.should_allow_request().is_ok());
    }

    async fn one_shot_server(reply: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64 * 1024];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                reply.len(),
                reply
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{}/completion", addr)
    }

    #[tokio::test]
    async fn test_complete_against_local_server() {
        let url = one_shot_server(r#"{"content":"{\"tool\":\"list_dir\"}"}"#).await;
        let client = LLMClient::new(url, Duration::from_secs(5));

        let text = client
            .complete(&CompletionRequest {
                prompt: "p".into(),
                n_predict: 8,
                stop: Vec::new(),
            })
            .await
            .unwrap();
        assert_eq!(text, r#"{"tool":"list_dir"}"#);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = LLMClient::new(format!("http://{}/completion", addr), Duration::from_secs(2));
        let result = client
            .complete(&CompletionRequest {
                prompt: "p".into(),
                n_predict: 8,
                stop: Vec::new(),
            })
            .await;
        assert!(matches!(result, Err(RuntimeError::LLMError(_))));
        assert!(
            client
                .wait_until_reachable(Duration::from_millis(100))
                .await
                .is_err()
        );
    }
}
