//! Best-effort repair of malformed JSON from model output.
//!
//! Models routinely emit almost-JSON inside action blocks: unquoted object
//! keys, trailing commas, a missing closing brace, stray control characters.
//! Each repair is applied in turn with a re-parse after every step.
//!
//! The heuristics live here and nowhere else — a block that still fails to
//! parse after the full ladder is dropped by the extractor, never partially
//! trusted.

use serde_json::Value;

/// Attempt to parse `raw`, repairing common malformations.
///
/// Returns `None` if the input is irreparable.
pub fn repair_json(raw: &str) -> Option<Value> {
    // Maybe it's already valid
    if let Ok(v) = serde_json::from_str::<Value>(raw) {
        return Some(v);
    }

    let mut repaired = raw.to_string();

    // Repair 1: quote bare object keys ({title: "x"} → {"title": "x"})
    repaired = quote_bare_keys(&repaired);
    if let Ok(v) = serde_json::from_str::<Value>(&repaired) {
        return Some(v);
    }

    // Repair 2: remove trailing commas before closing braces/brackets
    repaired = strip_trailing_commas(&repaired);
    if let Ok(v) = serde_json::from_str::<Value>(&repaired) {
        return Some(v);
    }

    // Repair 3: balance braces — append missing closing braces
    repaired = balance_braces(&repaired);
    if let Ok(v) = serde_json::from_str::<Value>(&repaired) {
        return Some(v);
    }

    // Repair 4: strip control characters (except \n, \r, \t)
    repaired = strip_control_characters(&repaired);
    if let Ok(v) = serde_json::from_str::<Value>(&repaired) {
        return Some(v);
    }

    None
}

/// Quote bare object keys: an identifier following `{` or `,` and followed
/// by `:` gets wrapped in double quotes. Identifiers inside strings are left
/// alone, and bare values (`true`, `null`) never precede a `:` so they pass
/// through untouched.
fn quote_bare_keys(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut result = String::with_capacity(input.len() + 8);
    let mut in_string = false;
    let mut escaped = false;
    // The last significant character seen outside strings ('i' = identifier)
    let mut prev_significant = '\0';
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if in_string {
            result.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        if c == '"' {
            in_string = true;
            prev_significant = '"';
            result.push('"');
            i += 1;
        } else if c.is_ascii_alphabetic() || c == '_' {
            // Scan the full identifier
            let start = i;
            while i < chars.len()
                && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '-')
            {
                i += 1;
            }
            let ident: String = chars[start..i].iter().collect();

            // Key position: after `{` or `,`, and followed by `:`
            let mut j = i;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            let followed_by_colon = j < chars.len() && chars[j] == ':';
            let key_position = prev_significant == '{' || prev_significant == ',';

            if key_position && followed_by_colon {
                result.push('"');
                result.push_str(&ident);
                result.push('"');
            } else {
                result.push_str(&ident);
            }
            prev_significant = 'i';
        } else {
            if !c.is_whitespace() {
                prev_significant = c;
            }
            result.push(c);
            i += 1;
        }
    }

    result
}

/// Remove trailing commas before `}` or `]`.
fn strip_trailing_commas(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let chars: Vec<char> = input.chars().collect();
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if in_string {
            result.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        if c == '"' {
            in_string = true;
            result.push(c);
            i += 1;
            continue;
        }

        if c == ',' {
            // Look ahead past whitespace for `}` or `]`
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1; // drop the comma
                continue;
            }
        }

        result.push(c);
        i += 1;
    }

    result
}

/// Append closing braces to balance unmatched opening braces.
fn balance_braces(input: &str) -> String {
    let mut brace_depth: i32 = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for ch in input.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        if ch == '\\' && in_string {
            escape_next = true;
            continue;
        }
        if ch == '"' {
            in_string = !in_string;
            continue;
        }
        if !in_string {
            if ch == '{' {
                brace_depth += 1;
            } else if ch == '}' {
                brace_depth -= 1;
            }
        }
    }

    if brace_depth > 0 {
        let mut result = input.to_string();
        for _ in 0..brace_depth {
            result.push('}');
        }
        result
    } else {
        input.to_string()
    }
}

/// Remove non-printable control characters that break JSON parsing.
/// Preserves `\n`, `\r`, `\t` which are valid inside JSON text.
fn strip_control_characters(input: &str) -> String {
    input
        .chars()
        .filter(|&c| !c.is_control() || c == '\n' || c == '\r' || c == '\t')
        .collect()
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_valid_passes_through() {
        let v = repair_json(r#"{"type": "query", "payload": {"query": "*"}}"#).unwrap();
        assert_eq!(v["type"], "query");
    }

    #[test]
    fn test_quotes_bare_keys() {
        let v = repair_json(r#"{type: "update", payload: {documentId: "abc123"}}"#).unwrap();
        assert_eq!(v["type"], "update");
        assert_eq!(v["payload"]["documentId"], "abc123");
    }

    #[test]
    fn test_bare_keys_inside_strings_untouched() {
        let v = repair_json(r#"{note: "keep type: intact"}"#).unwrap();
        assert_eq!(v["note"], "keep type: intact");
    }

    #[test]
    fn test_bare_values_not_quoted() {
        let v = repair_json(r#"{flag: true, missing: null, items: [true, null]}"#).unwrap();
        assert_eq!(v["flag"], true);
        assert!(v["missing"].is_null());
    }

    #[test]
    fn test_strips_trailing_commas() {
        let v = repair_json(r#"{"a": 1, "b": [1, 2,],}"#).unwrap();
        assert_eq!(v["b"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_trailing_comma_inside_string_kept() {
        let v = repair_json(r#"{"a": "one, }", }"#).unwrap();
        assert_eq!(v["a"], "one, }");
    }

    #[test]
    fn test_balances_missing_brace() {
        let v = repair_json(r#"{"type": "delete", "payload": {"documentId": "x1""#).unwrap();
        assert_eq!(v["payload"]["documentId"], "x1");
    }

    #[test]
    fn test_strips_control_characters() {
        let raw = "{\"a\": \"b\u{0000}\"}";
        let v = repair_json(raw).unwrap();
        assert_eq!(v["a"], "b");
    }

    #[test]
    fn test_multibyte_strings_survive_repair() {
        let v = repair_json(r#"{title: "Café — déjà vu",}"#).unwrap();
        assert_eq!(v["title"], "Café — déjà vu");
    }

    #[test]
    fn test_combined_malformations() {
        let raw = r#"{type: "create", payload: {documentType: "page", fields: {title: "Hi",},}"#;
        let v = repair_json(raw).unwrap();
        assert_eq!(v["payload"]["fields"]["title"], "Hi");
    }

    #[test]
    fn test_irreparable_returns_none() {
        assert!(repair_json("this is prose, not JSON").is_none());
        assert!(repair_json("").is_none());
    }
}
