//! Permissive JSON parsing for model output.
//!
//! Models wrap JSON in code fences, add prose around it, leave trailing
//! commas, use single quotes, forget to quote keys, or emit Python literals.
//! `parse_lenient` tries a strict parse first and only falls back to
//! extraction and repair when that fails.

use serde_json::Value;

/// Strip a surrounding markdown code fence (```json ... ``` or ``` ... ```).
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(after_fence) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip optional language identifier (e.g., "json")
    let body = match after_fence.find('\n') {
        Some(nl) => &after_fence[nl + 1..],
        None => after_fence.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Return the outermost JSON object or array embedded in `text`.
///
/// Scans from the first `{` or `[`, tracking nesting outside of string
/// literals. When the value is never closed the remainder of the text is
/// returned so `repair_json` can close it.
pub fn extract_json_span(text: &str) -> Option<&str> {
    let start = text.find(|c| c == '{' || c == '[')?;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    Some(&text[start..])
}

/// Rewrite near-valid JSON into valid JSON.
///
/// Handles trailing commas, single-quoted strings, bare keys and bare word
/// values, `True`/`False`/`None`, raw newlines inside strings, and an
/// unterminated string or unclosed brackets at the end of the input.
pub fn repair_json(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut stack: Vec<char> = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];

        if let Some(q) = quote {
            if escaped {
                // `\'` is not a JSON escape
                if ch == '\'' {
                    out.pop();
                }
                out.push(ch);
                escaped = false;
            } else if ch == '\\' {
                out.push(ch);
                escaped = true;
            } else if ch == q {
                out.push('"');
                quote = None;
            } else if ch == '"' {
                out.push_str("\\\"");
            } else if ch == '\n' {
                out.push_str("\\n");
            } else if ch == '\r' {
                out.push_str("\\r");
            } else if ch == '\t' {
                out.push_str("\\t");
            } else {
                out.push(ch);
            }
            i += 1;
            continue;
        }

        match ch {
            '"' | '\'' => {
                quote = Some(ch);
                out.push('"');
                i += 1;
            }
            '{' | '[' => {
                stack.push(ch);
                out.push(ch);
                i += 1;
            }
            '}' | ']' => {
                drop_trailing_comma(&mut out);
                stack.pop();
                out.push(ch);
                i += 1;
            }
            c if c == '-' || c.is_ascii_digit() => {
                while i < chars.len()
                    && (chars[i].is_ascii_digit() || matches!(chars[i], '-' | '+' | '.' | 'e' | 'E'))
                {
                    out.push(chars[i]);
                    i += 1;
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '-')) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "true" | "True" => out.push_str("true"),
                    "false" | "False" => out.push_str("false"),
                    "null" | "None" => out.push_str("null"),
                    _ => {
                        out.push('"');
                        out.push_str(&word);
                        out.push('"');
                    }
                }
            }
            _ => {
                out.push(ch);
                i += 1;
            }
        }
    }

    if quote.is_some() {
        out.push('"');
    }
    while let Some(open) = stack.pop() {
        drop_trailing_comma(&mut out);
        out.push(if open == '{' { '}' } else { ']' });
    }
    out
}

fn drop_trailing_comma(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    if out[..trimmed_len].ends_with(',') {
        out.truncate(trimmed_len - 1);
    }
}

/// Parse model output as JSON, tolerating fences, surrounding prose, and
/// the near-valid forms handled by `repair_json`.
pub fn parse_lenient(text: &str) -> Result<Value, String> {
    let cleaned = strip_code_fence(text);
    if cleaned.is_empty() {
        return Err("response contained no text".to_string());
    }
    let strict_err = match serde_json::from_str::<Value>(cleaned) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    let span = extract_json_span(cleaned)
        .ok_or_else(|| format!("no JSON object or array found: {}", strict_err))?;
    if let Ok(value) = serde_json::from_str::<Value>(span) {
        return Ok(value);
    }

    let repaired = repair_json(span);
    serde_json::from_str::<Value>(&repaired)
        .map_err(|e| format!("invalid JSON after repair: {} (original error: {})", e, strict_err))
}
