use crate::llm::Provider;

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("AI analysis failed: model invocation error (provider={provider}): {message}")]
    ModelInvocation { provider: Provider, message: String },

    /// `raw_output` is for logs only; it never appears in the message.
    #[error("AI analysis failed: JSON parse error: {detail}")]
    JsonParse { detail: String, raw_output: String },
}

impl AnalysisError {
    pub fn code(&self) -> &'static str {
        match self {
            AnalysisError::ModelInvocation { .. } => "model_invocation",
            AnalysisError::JsonParse { .. } => "json_parse",
        }
    }

    pub fn raw_output(&self) -> Option<&str> {
        match self {
            AnalysisError::ModelInvocation { .. } => None,
            AnalysisError::JsonParse { raw_output, .. } => Some(raw_output),
        }
    }
}
