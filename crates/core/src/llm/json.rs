use crate::llm::error::AnalysisError;
use serde_json::{Map, Value};

/// Removes Markdown code-fence markers (```` ```json ```` and bare ```` ``` ````) anywhere in
/// the text.
pub fn strip_code_fences(text: &str) -> String {
    text.replace("```json\n", "")
        .replace("```json", "")
        .replace("```\n", "")
        .replace("```", "")
        .trim()
        .to_string()
}

/// Best-effort extraction: first '{' to last '}' of the fence-stripped text.
///
/// This is a greedy span, not bracket matching. When no closing brace follows the first opening
/// one (typical for truncated output), the whole stripped text is returned so that
/// [`repair_truncated`] can work on it.
pub fn extract_json(text: &str) -> String {
    let stripped = strip_code_fences(text);
    let Some(start) = stripped.find('{') else {
        return stripped;
    };
    match stripped.rfind('}') {
        Some(end) if end > start => stripped[start..=end].to_string(),
        _ => stripped,
    }
}

/// Closes objects and arrays left open by a truncated response.
///
/// Delimiters inside string literals are ignored. Returns `None` when nothing is left open, in
/// which case the input is malformed in some other way and no repair is attempted.
pub fn repair_truncated(json: &str) -> Option<String> {
    let mut open: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in json.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' | '[' => open.push(c),
            '}' if open.last() == Some(&'{') => {
                open.pop();
            }
            ']' if open.last() == Some(&'[') => {
                open.pop();
            }
            _ => {}
        }
    }

    if open.is_empty() {
        return None;
    }

    let mut repaired = json.trim_end().to_string();
    for c in open.iter().rev() {
        repaired.push(if *c == '{' { '}' } else { ']' });
    }
    Some(repaired)
}

/// Extracts, parses and (once, if needed) repairs the JSON object in a raw model response.
pub fn parse_payload(raw: &str) -> Result<Map<String, Value>, AnalysisError> {
    let candidate = extract_json(raw);

    let value = match serde_json::from_str::<Value>(&candidate) {
        Ok(v) => v,
        Err(first_err) => {
            let Some(repaired) = repair_truncated(&candidate) else {
                return Err(parse_error(first_err.to_string(), raw));
            };
            tracing::warn!(
                error = %first_err,
                appended = repaired.len() - candidate.trim_end().len(),
                "model output is not valid JSON; retrying with closed delimiters"
            );
            serde_json::from_str::<Value>(&repaired)
                .map_err(|e| parse_error(format!("{e} (after repair)"), raw))?
        }
    };

    match value {
        Value::Object(map) => Ok(map),
        other => Err(parse_error(
            format!("expected a JSON object, got {}", json_kind(&other)),
            raw,
        )),
    }
}

fn parse_error(detail: String, raw: &str) -> AnalysisError {
    AnalysisError::JsonParse {
        detail,
        raw_output: raw.to_string(),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
