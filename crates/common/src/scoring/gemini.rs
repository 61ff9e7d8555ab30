//! Gemini `generateContent` client
//!
//! A primed session is the conversation prefix produced by sending the
//! instruction prompt once and keeping the model's acknowledgement. Each
//! article is scored by replaying that prefix followed by the article as a
//! new user turn.

use super::extract::parse_analytics;
use super::session::SessionCache;
use super::{NewsAnalytics, Scorer};
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Built-in instruction prompt
pub const DEFAULT_PROMPT: &str = include_str!("../../prompts/news_analysis.md");

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Content {
    #[serde(default)]
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Part {
    #[serde(default)]
    text: String,
}

impl Content {
    fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            parts: vec![Part { text: text.into() }],
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: &'a [Content],
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

/// Conversation prefix replayed before every article
#[derive(Debug)]
pub struct PrimedSession {
    history: Vec<Content>,
}

pub struct GeminiScorer {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    prompt: String,
    sessions: SessionCache<PrimedSession>,
}

impl GeminiScorer {
    pub fn new(
        api_key: String,
        model: String,
        base_url: Option<String>,
        prompt: String,
        timeout: Duration,
        session_max_uses: u32,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url: base_url.unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            prompt,
            sessions: SessionCache::new(session_max_uses),
        })
    }

    async fn generate(&self, contents: &[Content]) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        let request = GenerateRequest {
            contents,
            generation_config: GenerationConfig { temperature: 0.2 },
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Scoring {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Scoring {
                message: format!("API error {}: {}", status, body),
            });
        }

        let body: GenerateResponse = response.json().await.map_err(|e| {
            AppError::malformed_response(format!("Failed to parse response: {}", e))
        })?;

        body.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| AppError::malformed_response("response has no candidate text"))
    }

    async fn prime(&self) -> Result<PrimedSession> {
        let prompt = Content::user(self.prompt.clone());
        let ack = self.generate(std::slice::from_ref(&prompt)).await?;

        Ok(PrimedSession {
            history: vec![
                prompt,
                Content {
                    role: "model".to_string(),
                    parts: vec![Part { text: ack }],
                },
            ],
        })
    }
}

#[async_trait]
impl Scorer for GeminiScorer {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn analyze(&self, title: &str, content: &str) -> Result<NewsAnalytics> {
        let start = Instant::now();
        let session = self.sessions.acquire(|| self.prime()).await?;

        let mut contents = session.history.clone();
        contents.push(Content::user(format!("Title: {}\nContent: {}", title, content)));

        let result = match self.generate(&contents).await {
            Ok(reply) => parse_analytics(&reply),
            Err(e) => Err(e),
        };

        match &result {
            Ok(_) => {
                metrics::record_scoring(&self.model, "success", start.elapsed().as_secs_f64());
                debug!("Article scored");
            }
            Err(e) => {
                let outcome = match e {
                    AppError::MalformedResponse { .. } => "malformed",
                    _ => {
                        // Transport failures drop the primed session
                        self.sessions.invalidate().await;
                        "error"
                    }
                };
                metrics::record_scoring(&self.model, outcome, start.elapsed().as_secs_f64());
                warn!(error = %e, outcome, "Scoring request failed");
            }
        }

        result
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn test_request_shape() {
        let contents = vec![Content::user("hello")];
        let request = GenerateRequest {
            contents: &contents,
            generation_config: GenerationConfig { temperature: 0.2 },
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hello");
        assert!(json["generationConfig"]["temperature"].is_number());
    }

    #[test]
    fn test_response_without_candidates_parses() {
        let body: GenerateResponse = serde_json::from_str(r#"{"promptFeedback": {}}"#).unwrap();
        assert!(body.candidates.is_empty());
    }

    #[test]
    fn test_default_prompt_requests_json_block() {
        assert!(DEFAULT_PROMPT.contains("```json"));
        assert!(DEFAULT_PROMPT.contains("metricList"));
    }

    // ------------------------------------------------------------------
    // Session policy against a local generateContent stub
    // ------------------------------------------------------------------

    const SCORED: &str = "```json\n{\"titleAnalytics\": {\"score\": 7, \"metricList\": []}, \
                          \"contentAnalytics\": {\"score\": 6, \"metricList\": []}}\n```";

    fn candidate(text: &str) -> (u16, String) {
        let body = serde_json::json!({
            "candidates": [{ "content": { "role": "model", "parts": [{ "text": text }] } }]
        });
        (200, body.to_string())
    }

    /// Request bodies received by the stub, in arrival order
    type Received = Arc<Mutex<Vec<serde_json::Value>>>;

    /// Answer one connection per scripted reply, then stop listening
    async fn stub_api(replies: Vec<(u16, String)>) -> (String, Received) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        let log = received.clone();

        tokio::spawn(async move {
            for (status, body) in replies {
                let Ok((mut stream, _)) = listener.accept().await else { return };
                let request = read_body(&mut stream).await;
                log.lock().unwrap().push(request);

                let response = format!(
                    "HTTP/1.1 {} Stub\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                stream.write_all(response.as_bytes()).await.unwrap();
                stream.shutdown().await.ok();
            }
        });

        (base_url, received)
    }

    async fn read_body(stream: &mut TcpStream) -> serde_json::Value {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];

        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                return serde_json::Value::Null;
            }
            buf.extend_from_slice(&chunk[..n]);

            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else { continue };
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);

            let start = end + 4;
            if buf.len() >= start + length {
                return serde_json::from_slice(&buf[start..start + length]).unwrap();
            }
        }
    }

    fn scorer(base_url: String, session_max_uses: u32) -> GeminiScorer {
        GeminiScorer::new(
            "test-key".into(),
            "test-model".into(),
            Some(base_url),
            "Score the article.".into(),
            Duration::from_secs(5),
            session_max_uses,
        )
        .unwrap()
    }

    /// Requests that only carried the instruction prompt
    fn primes(received: &Received) -> usize {
        received
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request["contents"].as_array().map(Vec::len) == Some(1))
            .count()
    }

    #[tokio::test]
    async fn test_primed_session_is_replayed_across_articles() {
        let (base_url, received) =
            stub_api(vec![candidate("Understood."), candidate(SCORED), candidate(SCORED)]).await;
        let scorer = scorer(base_url, 10);

        let first = scorer.analyze("a", "body a").await.unwrap();
        scorer.analyze("b", "body b").await.unwrap();

        assert_eq!(first.title_analytics.score, 7.0);
        assert_eq!(primes(&received), 1);

        let requests = received.lock().unwrap();
        assert_eq!(requests.len(), 3);
        for request in &requests[1..] {
            let contents = request["contents"].as_array().unwrap();
            assert_eq!(contents.len(), 3);
            assert_eq!(contents[0]["parts"][0]["text"], "Score the article.");
            assert_eq!(contents[1]["role"], "model");
            assert_eq!(contents[1]["parts"][0]["text"], "Understood.");
        }
        assert!(requests[2]["contents"][2]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .starts_with("Title: b"));
    }

    #[tokio::test]
    async fn test_transport_error_drops_session() {
        let (base_url, received) = stub_api(vec![
            candidate("Understood."),
            (500, r#"{"error": "overloaded"}"#.to_string()),
            candidate("Ready."),
            candidate(SCORED),
        ])
        .await;
        let scorer = scorer(base_url, 10);

        let err = scorer.analyze("a", "body a").await.unwrap_err();
        assert!(matches!(err, AppError::Scoring { .. }));

        scorer.analyze("a", "body a").await.unwrap();

        assert_eq!(primes(&received), 2);
        let requests = received.lock().unwrap();
        assert_eq!(requests[3]["contents"][1]["parts"][0]["text"], "Ready.");
    }

    #[tokio::test]
    async fn test_malformed_reply_keeps_session() {
        let (base_url, received) = stub_api(vec![
            candidate("Understood."),
            candidate("I cannot score this article."),
            candidate(SCORED),
        ])
        .await;
        let scorer = scorer(base_url, 10);

        let err = scorer.analyze("a", "body a").await.unwrap_err();
        assert!(matches!(err, AppError::MalformedResponse { .. }));

        scorer.analyze("b", "body b").await.unwrap();

        assert_eq!(primes(&received), 1);
        assert_eq!(received.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_session_is_reprimed_after_its_use_budget() {
        let (base_url, received) = stub_api(vec![
            candidate("Understood."),
            candidate(SCORED),
            candidate(SCORED),
            candidate("Understood again."),
            candidate(SCORED),
        ])
        .await;
        let scorer = scorer(base_url, 2);

        for title in ["a", "b", "c"] {
            scorer.analyze(title, "body").await.unwrap();
        }

        assert_eq!(primes(&received), 2);
        assert_eq!(received.lock().unwrap().len(), 5);
    }
}
