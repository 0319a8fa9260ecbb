/// Instruction block sent ahead of the pasted text. Kept provider-agnostic: JSON only.
const INSTRUCTIONS: &[&str] = &[
    "You are a professional US-equities analyst. Analyze the investment view expressed by a KOL",
    "(key opinion leader) in the text below.",
    "",
    "Tasks:",
    "1. Per-ticker analysis: find every US stock ticker mentioned (1-5 uppercase letters, e.g. AAPL, TSLA).",
    "   - Judge the sentiment for each ticker independently: Bullish, Bearish or Neutral.",
    "   - Mark the main subject with isPrimary: true and every other ticker with isPrimary: false.",
    "2. KOL identification: if the text is a KOL's statement, extract the KOL's name; otherwise kolName is null.",
    "3. Posting time: extract when the text was posted, relative (\"3 hours ago\", \"yesterday\") or",
    "   absolute (\"Dec 11 2:02 PM\"), exactly as written; otherwise postedAtText is null.",
    "4. Overall sentiment: use the primary ticker's sentiment; with no primary ticker, use the first ticker's.",
    "",
    "Return ONLY a JSON object with this shape:",
    "{",
    "  \"sentiment\": \"Bullish\" | \"Bearish\" | \"Neutral\",",
    "  \"kolName\": \"name or null\",",
    "  \"postedAtText\": \"time text or null\",",
    "  \"tickerAnalyses\": [",
    "    {",
    "      \"ticker\": \"AAPL\",",
    "      \"sentiment\": \"Bullish\",",
    "      \"isPrimary\": true",
    "    }",
    "  ],",
    "  \"narrative\": \"market narrative (optional)\",",
    "  \"confidence\": 0.85",
    "}",
    "Rules:",
    "- Use double quotes for all JSON strings. No trailing commas. No comments.",
    "- confidence must be in [0, 1].",
    "- Keep names and time expressions in the language they appear in.",
];

/// Builds the model instruction for `text`. The text is embedded verbatim, without escaping.
pub fn build_prompt(text: &str) -> String {
    format!("{}\n\nText to analyze:\n{text}", INSTRUCTIONS.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeds_text_verbatim_at_the_end() {
        let text = "@Ann: 我看好 $NVDA \"AI\" {capex} 3小時前\nline two";
        let prompt = build_prompt(text);
        assert!(prompt.ends_with(text));
        assert!(prompt.contains("\"tickerAnalyses\""));
        assert!(prompt.contains("isPrimary"));
    }

    #[test]
    fn is_deterministic() {
        assert_eq!(build_prompt("TSLA to the moon"), build_prompt("TSLA to the moon"));
    }
}
