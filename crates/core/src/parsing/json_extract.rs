// crates/core/src/parsing/json_extract.rs
//! Extraction of a JSON object embedded in free-form model output, with a
//! bounded repair pass so partially-streamed JSON can still be rendered.

use serde_json::Value;

/// Outcome of [`extract_json_fields`].
///
/// `is_complete` is true only when the object parsed strictly (no repair)
/// and every required field is present. `data` may still be populated for
/// an incomplete extraction — that is the point: callers can render what
/// has arrived so far.
#[derive(Debug, Clone)]
pub struct JsonExtraction {
    pub data: Option<Value>,
    pub is_complete: bool,
    pub missing_fields: Vec<String>,
    pub error: Option<String>,
}

impl JsonExtraction {
    fn failed(error: String, required: &[&str]) -> Self {
        Self {
            data: None,
            is_complete: false,
            missing_fields: required.iter().map(|s| s.to_string()).collect(),
            error: Some(error),
        }
    }
}

/// Locate the first `{...}` span in `text`, parse it, and report which of
/// `required` fields are present.
///
/// Strict parse first; on failure a bounded repair is attempted: trailing
/// commas are stripped and unbalanced braces/brackets are auto-closed by
/// counting. Repair never loops — one rewrite, one re-parse.
pub fn extract_json_fields(text: &str, required: &[&str]) -> JsonExtraction {
    let Some(start) = text.find('{') else {
        return JsonExtraction::failed("no JSON object found".into(), required);
    };

    let candidate = match balanced_span(&text[start..]) {
        Some(end) => &text[start..start + end],
        None => &text[start..],
    };

    let (value, repaired) = match serde_json::from_str::<Value>(candidate) {
        Ok(v) => (v, false),
        Err(strict_err) => {
            let fixed = repair_json(candidate);
            match serde_json::from_str::<Value>(&fixed) {
                Ok(v) => (v, true),
                Err(_) => {
                    return JsonExtraction::failed(strict_err.to_string(), required);
                }
            }
        }
    };

    if !value.is_object() {
        return JsonExtraction::failed("extracted value is not an object".into(), required);
    }

    let missing: Vec<String> = required
        .iter()
        .filter(|f| value.get(**f).is_none())
        .map(|f| f.to_string())
        .collect();

    JsonExtraction {
        is_complete: !repaired && missing.is_empty(),
        missing_fields: missing,
        data: Some(value),
        error: None,
    }
}

/// Byte length of the first balanced `{...}` span at the start of `text`,
/// or `None` if the object never closes. String contents are skipped so
/// braces inside values don't confuse the depth count.
fn balanced_span(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// One bounded repair pass: drop trailing commas before closers (and at
/// end of input), then close whatever braces/brackets remain open. An
/// unterminated string is closed first so the appended closers parse.
fn repair_json(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in raw.chars() {
        if in_string {
            out.push(c);
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '{' => {
                stack.push('}');
                out.push(c);
            }
            '[' => {
                stack.push(']');
                out.push(c);
            }
            '}' | ']' => {
                // Trailing comma directly before a closer.
                trim_trailing_comma(&mut out);
                stack.pop();
                out.push(c);
            }
            _ => out.push(c),
        }
    }

    if in_string {
        out.push('"');
    }
    trim_trailing_comma(&mut out);
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

fn trim_trailing_comma(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    if out[..trimmed_len].ends_with(',') {
        out.truncate(trimmed_len - 1);
    }
}
