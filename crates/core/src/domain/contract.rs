use crate::domain::analysis::{AnalysisResult, Sentiment, TickerAnalysis};
use serde_json::{Map, Value};

/// Converts a decoded model payload into an [`AnalysisResult`].
///
/// Every field is read defensively: wrong types and empty values normalize to "absent". The
/// payload itself is retained verbatim in `analysis`.
pub fn normalize_payload(payload: Map<String, Value>) -> AnalysisResult {
    let ticker_analyses = read_ticker_analyses(&payload);

    let tickers: Vec<String> = if ticker_analyses.is_empty() {
        read_legacy_tickers(&payload)
    } else {
        ticker_analyses.iter().map(|t| t.ticker.clone()).collect()
    };

    let sentiment = resolve_sentiment(&ticker_analyses, &payload);

    AnalysisResult {
        sentiment,
        kol_name: read_text(&payload, "kolName"),
        posted_at_text: read_text(&payload, "postedAtText"),
        tickers: (!tickers.is_empty()).then_some(tickers),
        ticker_analyses: (!ticker_analyses.is_empty()).then_some(ticker_analyses),
        narrative: read_text(&payload, "narrative"),
        confidence: read_confidence(&payload),
        analysis: Some(Value::Object(payload)),
    }
}

/// Picks the overall sentiment: the primary ticker's call, else the first ticker's, else the
/// payload's top-level `sentiment`, else `Neutral`.
pub fn resolve_sentiment(
    ticker_analyses: &[TickerAnalysis],
    payload: &Map<String, Value>,
) -> Sentiment {
    if let Some(first) = ticker_analyses.first() {
        return ticker_analyses
            .iter()
            .find(|t| t.is_primary)
            .unwrap_or(first)
            .sentiment;
    }

    match payload.get("sentiment") {
        Some(Value::String(label)) if !label.is_empty() => parse_sentiment(label, "sentiment"),
        _ => Sentiment::Neutral,
    }
}

fn read_ticker_analyses(payload: &Map<String, Value>) -> Vec<TickerAnalysis> {
    let Some(Value::Array(entries)) = payload.get("tickerAnalyses") else {
        return Vec::new();
    };

    let mut out = Vec::with_capacity(entries.len());
    for (idx, entry) in entries.iter().enumerate() {
        let Some(obj) = entry.as_object() else {
            tracing::warn!(idx, "dropping non-object tickerAnalyses entry");
            continue;
        };
        let Some(ticker) = obj.get("ticker").and_then(Value::as_str).and_then(normalize_ticker)
        else {
            tracing::warn!(idx, "dropping tickerAnalyses entry without a ticker");
            continue;
        };

        let sentiment = match obj.get("sentiment") {
            Some(Value::String(label)) => parse_sentiment(label, "tickerAnalyses.sentiment"),
            _ => Sentiment::Neutral,
        };
        let is_primary = matches!(obj.get("isPrimary"), Some(Value::Bool(true)));

        out.push(TickerAnalysis {
            ticker,
            sentiment,
            is_primary,
        });
    }
    out
}

fn read_legacy_tickers(payload: &Map<String, Value>) -> Vec<String> {
    match payload.get("tickers") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .filter_map(normalize_ticker)
            .collect(),
        _ => Vec::new(),
    }
}

fn normalize_ticker(raw: &str) -> Option<String> {
    let ticker = raw.trim().to_ascii_uppercase();
    (!ticker.is_empty()).then_some(ticker)
}

// Verbatim pass-through. The model sometimes writes the literal string "null" for fields it
// could not fill.
fn read_text(payload: &Map<String, Value>, key: &str) -> Option<String> {
    let s = payload.get(key)?.as_str()?;
    if s.is_empty() || s.eq_ignore_ascii_case("null") {
        return None;
    }
    Some(s.to_string())
}

fn read_confidence(payload: &Map<String, Value>) -> Option<f64> {
    let c = payload.get("confidence")?.as_f64()?;
    if !c.is_finite() || c == 0.0 {
        return None;
    }
    Some(c.clamp(0.0, 1.0))
}

fn parse_sentiment(label: &str, field: &'static str) -> Sentiment {
    Sentiment::from_label(label).unwrap_or_else(|| {
        tracing::warn!(field, label, "unrecognized sentiment label; clamping to Neutral");
        Sentiment::Neutral
    })
}
