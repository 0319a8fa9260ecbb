use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Sentiment {
    Bullish,
    Bearish,
    #[default]
    Neutral,
}

impl Sentiment {
    pub fn as_str(self) -> &'static str {
        match self {
            Sentiment::Bullish => "Bullish",
            Sentiment::Bearish => "Bearish",
            Sentiment::Neutral => "Neutral",
        }
    }

    /// Exact, case-sensitive match on the three labels the prompt asks for.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Bullish" => Some(Sentiment::Bullish),
            "Bearish" => Some(Sentiment::Bearish),
            "Neutral" => Some(Sentiment::Neutral),
            _ => None,
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerAnalysis {
    pub ticker: String,
    pub sentiment: Sentiment,
    pub is_primary: bool,
}

/// Structured outcome of analyzing one piece of KOL commentary.
///
/// Optional fields are omitted from the serialized form when absent, so the empty-input result
/// serializes as `{"sentiment":"Neutral"}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub sentiment: Sentiment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kol_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posted_at_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tickers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticker_analyses: Option<Vec<TickerAnalysis>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Full decoded model payload, kept for audit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Value>,
}

impl AnalysisResult {
    pub fn empty() -> Self {
        Self::default()
    }
}
