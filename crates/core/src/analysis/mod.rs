pub mod prompt;

use crate::domain::analysis::AnalysisResult;
use crate::domain::contract;
use crate::llm::error::AnalysisError;
use crate::llm::{json, Provider, TextGenerator};
use std::fmt;
use std::sync::Arc;

/// Turns pasted KOL commentary into an [`AnalysisResult`].
///
/// Stateless apart from the generator handle; clones share it and may run concurrently.
#[derive(Clone)]
pub struct Analyzer {
    generator: Arc<dyn TextGenerator>,
}

impl fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Analyzer")
            .field("provider", &self.generator.provider())
            .finish()
    }
}

impl Analyzer {
    pub fn new(generator: impl TextGenerator + 'static) -> Self {
        Self {
            generator: Arc::new(generator),
        }
    }

    pub fn provider(&self) -> Provider {
        self.generator.provider()
    }

    pub async fn analyze_text(&self, text: &str) -> Result<AnalysisResult, AnalysisError> {
        if text.trim().is_empty() {
            return Ok(AnalysisResult::empty());
        }

        let prompt = prompt::build_prompt(text);
        let provider = self.generator.provider();
        tracing::debug!(%provider, text_len = text.len(), prompt_len = prompt.len(), "invoking model");

        let raw = self
            .generator
            .invoke(&prompt)
            .await
            .map_err(|err| AnalysisError::ModelInvocation {
                provider,
                message: format!("{err:#}"),
            })?;

        Self::interpret(&raw)
    }

    /// Parses a raw model response. Blank output yields the empty result.
    pub fn interpret(raw: &str) -> Result<AnalysisResult, AnalysisError> {
        if raw.trim().is_empty() {
            tracing::warn!("model returned empty output; using empty result");
            return Ok(AnalysisResult::empty());
        }

        let payload = json::parse_payload(raw).inspect_err(|err| {
            tracing::error!(error = %err, raw_output = raw, "failed to parse model output");
        })?;

        let result = contract::normalize_payload(payload);
        tracing::debug!(
            sentiment = %result.sentiment,
            tickers = result.tickers.as_ref().map_or(0, Vec::len),
            "model output normalized"
        );
        Ok(result)
    }
}
