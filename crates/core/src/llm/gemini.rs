use crate::config::Settings;
use crate::llm::{GenerationConfig, Provider, TextGenerator};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    generation_config: GenerationConfig,
}

impl GeminiClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_gemini_api_key()?.to_string();
        let base_url = non_blank_or(std::env::var("GEMINI_BASE_URL").ok(), DEFAULT_BASE_URL);
        let model = non_blank_or(std::env::var("GEMINI_MODEL").ok(), DEFAULT_MODEL);

        let timeout_secs = std::env::var("GEMINI_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Self::new(api_key, base_url, model, Duration::from_secs(timeout_secs))
    }

    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "Gemini API key must be non-empty");

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model,
            generation_config: GenerationConfig::default(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    fn request(&self, prompt: &str) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                }],
            }],
            generation_config: self.generation_config,
        }
    }

    async fn generate_content(
        &self,
        req: &GenerateContentRequest,
    ) -> anyhow::Result<GenerateContentResponse> {
        let mut headers = HeaderMap::new();
        headers.insert("x-goog-api-key", HeaderValue::from_str(&self.api_key)?);

        let res = self
            .http
            .post(self.url())
            .headers(headers)
            .json(req)
            .send()
            .await
            .context("Gemini request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read Gemini response body")?;
        if !status.is_success() {
            anyhow::bail!("Gemini HTTP {status}: {}", error_message(&text));
        }

        serde_json::from_str::<GenerateContentResponse>(&text)
            .with_context(|| format!("failed to decode Gemini response: {text}"))
    }

    fn response_text(res: &GenerateContentResponse) -> anyhow::Result<String> {
        let Some(candidate) = res.candidates.first() else {
            let reason = res
                .prompt_feedback
                .as_ref()
                .and_then(|f| f.block_reason.as_deref())
                .unwrap_or("no candidates returned");
            anyhow::bail!("Gemini returned no candidates: {reason}");
        };

        if candidate.finish_reason.as_deref() == Some("MAX_TOKENS") {
            tracing::warn!("Gemini finish_reason=MAX_TOKENS; output is likely truncated");
        }

        let mut out = String::new();
        if let Some(content) = &candidate.content {
            for text in content.parts.iter().filter_map(|p| p.text.as_deref()) {
                out.push_str(text);
            }
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl TextGenerator for GeminiClient {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    async fn invoke(&self, prompt: &str) -> anyhow::Result<String> {
        let res = self.generate_content(&self.request(prompt)).await?;
        Self::response_text(&res)
    }
}

fn non_blank_or(value: Option<String>, default: &str) -> String {
    value
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Pulls `error.message` out of a Gemini error body, falling back to the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> GeminiClient {
        GeminiClient::new(
            "test-key".to_string(),
            "http://localhost:9/".to_string(),
            DEFAULT_MODEL.to_string(),
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn blank_overrides_fall_back_to_defaults() {
        assert_eq!(non_blank_or(Some("  ".to_string()), DEFAULT_BASE_URL), DEFAULT_BASE_URL);
        assert_eq!(non_blank_or(None, DEFAULT_MODEL), DEFAULT_MODEL);
        assert_eq!(
            non_blank_or(Some("http://proxy:8080".to_string()), DEFAULT_BASE_URL),
            "http://proxy:8080"
        );
    }

    #[test]
    fn builds_generate_content_url() {
        assert_eq!(
            client().url(),
            "http://localhost:9/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn request_carries_fixed_decoding_parameters() {
        let v = serde_json::to_value(client().request("hello 你好")).unwrap();
        assert_eq!(v["contents"][0]["role"], "user");
        assert_eq!(v["contents"][0]["parts"][0]["text"], "hello 你好");
        assert_eq!(v["generationConfig"]["topK"], 40);
        assert_eq!(v["generationConfig"]["maxOutputTokens"], 2048);
    }

    #[test]
    fn joins_text_parts_of_first_candidate() {
        let res: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "```json\n{\"a\":"}, {"text": "1}\n```"}]},
                "finishReason": "STOP"
            }]
        }))
        .unwrap();

        let text = GeminiClient::response_text(&res).unwrap();
        assert_eq!(text, "```json\n{\"a\":1}\n```");
    }

    #[test]
    fn blocked_prompt_is_an_error() {
        let res: GenerateContentResponse = serde_json::from_value(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .unwrap();

        let err = GeminiClient::response_text(&res).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn extracts_api_error_message() {
        let body = r#"{"error": {"code": 400, "message": "API key not valid.", "status": "INVALID_ARGUMENT"}}"#;
        assert_eq!(error_message(body), "API key not valid.");
        assert_eq!(error_message("upstream timeout\n"), "upstream timeout");
    }

    #[test]
    fn rejects_blank_api_key() {
        let res = GeminiClient::new(
            " ".to_string(),
            DEFAULT_BASE_URL.to_string(),
            DEFAULT_MODEL.to_string(),
            Duration::from_secs(1),
        );
        assert!(res.is_err());
    }
}
