//! Action extraction — turns assistant reply text into `ParsedAction`s.
//!
//! Three surface syntaxes are recognized, all collected in source order:
//!
//! 1. **Action fence** — a code fence tagged `action`:
//!    ````text
//!    ```action
//!    { "type": "update", "description": "…", "payload": { … } }
//!    ```
//!    ````
//! 2. **Generic fence** — a ```` ```json ```` (or untagged) fence whose
//!    object carries a `type` from the action vocabulary.
//! 3. **Inline marker** — `[action: { … }]` embedded in prose.
//!
//! Candidates that fail a strict parse go through the repair ladder in
//! `json_repair`; blocks that still fail are logged and skipped without
//! aborting extraction of the others. Objects whose `type` is not in the
//! vocabulary are silently dropped — a ```` ```json ```` fence is allowed to
//! just be data.

use std::ops::Range;

use serde_json::Value;

use super::json_repair::repair_json;
use super::types::{ActionPayload, ActionType, ParsedAction};

/// Fence tags that always mark an action block.
const ACTION_FENCE_TAGS: &[&str] = &["action", "actions"];

/// Fence tags inspected for an embedded action object.
const GENERIC_FENCE_TAGS: &[&str] = &["", "json"];

/// Prefix of the inline marker syntax.
const INLINE_MARKER_PREFIX: &str = "[action:";

// ─── Public API ─────────────────────────────────────────────────────────────

/// Extract every action embedded in a reply, in source order.
///
/// Pure — no network, no side effects beyond the returned list.
pub fn extract(reply_text: &str) -> Vec<ParsedAction> {
    scan(reply_text).actions
}

/// Remove all recognized action syntax, leaving the prose for display.
///
/// Identity on replies containing no action markup.
pub fn strip_action_markup(reply_text: &str) -> String {
    let spans = scan(reply_text).strip_spans;
    if spans.is_empty() {
        return reply_text.to_string();
    }

    let mut result = String::with_capacity(reply_text.len());
    let mut cursor = 0;
    for span in &spans {
        result.push_str(&reply_text[cursor..span.start]);
        cursor = span.end;
    }
    result.push_str(&reply_text[cursor..]);

    collapse_blank_runs(&result)
}

// ─── Scanning ───────────────────────────────────────────────────────────────

struct ScanOutcome {
    actions: Vec<ParsedAction>,
    /// Byte ranges of recognized action markup, ascending and disjoint.
    strip_spans: Vec<Range<usize>>,
}

fn scan(reply: &str) -> ScanOutcome {
    // (source offset, action) so fence and marker hits interleave correctly
    let mut found: Vec<(usize, ParsedAction)> = Vec::new();
    let mut strip_spans: Vec<Range<usize>> = Vec::new();

    let fences = scan_fences(reply);
    for fence in &fences {
        let tag = fence.lang.as_str();
        if ACTION_FENCE_TAGS.contains(&tag) {
            // Recognized action syntax even when the body is broken
            strip_spans.push(fence.span.clone());
            if let Some(action) = parse_candidate(&fence.body) {
                found.push((fence.span.start, action));
            }
        } else if GENERIC_FENCE_TAGS.contains(&tag) {
            // Only an action if the object says so; otherwise leave the
            // fence alone — it is legitimate display data
            if let Some(action) = parse_candidate(&fence.body) {
                strip_spans.push(fence.span.clone());
                found.push((fence.span.start, action));
            }
        }
    }

    for marker in scan_inline_markers(reply, &fences) {
        strip_spans.push(marker.span.clone());
        if let Some(action) = parse_candidate(&marker.body) {
            found.push((marker.span.start, action));
        }
    }

    found.sort_by_key(|(offset, _)| *offset);
    strip_spans.sort_by_key(|span| span.start);

    ScanOutcome {
        actions: found.into_iter().map(|(_, action)| action).collect(),
        strip_spans,
    }
}

struct Block {
    lang: String,
    body: String,
    span: Range<usize>,
}

struct Marker {
    body: String,
    span: Range<usize>,
}

/// Find every closed ``` fence. An unterminated fence ends the scan.
fn scan_fences(text: &str) -> Vec<Block> {
    let mut fences = Vec::new();
    let mut pos = 0;

    while let Some(offset) = text[pos..].find("```") {
        let start = pos + offset;
        let lang_start = start + 3;
        let Some(newline) = text[lang_start..].find('\n') else {
            break;
        };
        let lang = text[lang_start..lang_start + newline].trim().to_lowercase();
        let body_start = lang_start + newline + 1;

        let Some(close) = text[body_start..].find("```") else {
            break;
        };
        let body_end = body_start + close;
        let mut end = body_end + 3;
        // Swallow one trailing newline so stripping doesn't leave a blank line
        if text[end..].starts_with('\n') {
            end += 1;
        }

        fences.push(Block {
            lang,
            body: text[body_start..body_end].to_string(),
            span: start..end,
        });
        pos = end;
    }

    fences
}

/// Find `[action: …]` markers outside code fences.
fn scan_inline_markers(text: &str, fences: &[Block]) -> Vec<Marker> {
    let mut markers = Vec::new();
    let mut pos = 0;

    while let Some(offset) = text[pos..].find(INLINE_MARKER_PREFIX) {
        let start = pos + offset;
        if fences.iter().any(|f| f.span.contains(&start)) {
            pos = start + INLINE_MARKER_PREFIX.len();
            continue;
        }
        match find_matching_bracket(text, start) {
            Some(close) => {
                let body = text[start + INLINE_MARKER_PREFIX.len()..close]
                    .trim()
                    .to_string();
                markers.push(Marker {
                    body,
                    span: start..close + 1,
                });
                pos = close + 1;
            }
            None => {
                pos = start + INLINE_MARKER_PREFIX.len();
            }
        }
    }

    markers
}

/// Find the `]` matching the `[` at `start`.
///
/// Brackets inside quoted strings are ignored so payload values containing
/// `[` or `]` don't derail the match.
fn find_matching_bracket(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    let mut i = start;

    while i < bytes.len() {
        let b = bytes[i];

        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

// ─── Candidate parsing ──────────────────────────────────────────────────────

/// Parse one candidate block into an action.
///
/// `None` covers both "not an action" (unknown or missing `type` — dropped
/// silently) and "broken beyond repair" (logged and skipped).
fn parse_candidate(raw: &str) -> Option<ParsedAction> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let value = match serde_json::from_str::<Value>(raw) {
        Ok(v) => v,
        Err(_) => match repair_json(raw) {
            Some(v) => v,
            None => {
                tracing::warn!(
                    block = %truncate_for_log(raw),
                    "skipping unparseable action block"
                );
                return None;
            }
        },
    };

    let type_str = value.get("type").and_then(Value::as_str)?;
    ActionType::from_wire(type_str)?;

    let description = value
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let payload_value = serde_json::json!({
        "type": type_str,
        "payload": value.get("payload").cloned().unwrap_or(Value::Object(Default::default())),
    });

    match serde_json::from_value::<ActionPayload>(payload_value) {
        Ok(payload) => Some(ParsedAction::new(description, payload)),
        Err(e) => {
            tracing::warn!(
                action_type = type_str,
                error = %e,
                "skipping action block with unusable payload"
            );
            None
        }
    }
}

fn truncate_for_log(s: &str) -> &str {
    let mut end = s.len().min(120);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Collapse runs of 3+ newlines left behind by stripped blocks.
fn collapse_blank_runs(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut newline_run = 0;
    for c in text.chars() {
        if c == '\n' {
            newline_run += 1;
            if newline_run <= 2 {
                result.push(c);
            }
        } else {
            newline_run = 0;
            result.push(c);
        }
    }
    result
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::ActionType;

    #[test]
    fn test_no_blocks_yields_empty_and_identity() {
        let reply = "Here's what I found about your pages.\n\nNothing to change.";
        assert!(extract(reply).is_empty());
        assert_eq!(strip_action_markup(reply), reply);
        // Idempotent
        assert_eq!(
            strip_action_markup(&strip_action_markup(reply)),
            strip_action_markup(reply)
        );
    }

    #[test]
    fn test_action_fence_extracted() {
        let reply = "I'll update the title.\n\n```action\n{\"type\": \"update\", \"description\": \"Retitle\", \"payload\": {\"documentId\": \"abc123xyz9\", \"fields\": {\"name\": \"New\"}}}\n```\n";
        let actions = extract(reply);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type(), ActionType::Update);
        assert_eq!(actions[0].description, "Retitle");
    }

    #[test]
    fn test_multiple_blocks_in_source_order_with_unique_ids() {
        let reply = "\
First, let me look:

```action
{\"type\": \"query\", \"payload\": {\"query\": \"*[_type == \\\"page\\\"]\"}}
```

then clean up:

```action
{\"type\": \"delete\", \"payload\": {\"documentId\": \"abc123xyz9\"}}
```
";
        let actions = extract(reply);
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].action_type(), ActionType::Query);
        assert_eq!(actions[1].action_type(), ActionType::Delete);
        assert_ne!(actions[0].id, actions[1].id);
    }

    #[test]
    fn test_generic_json_fence_with_action_type() {
        let reply = "```json\n{\"type\": \"explain\", \"payload\": {\"explanation\": \"Pages nest sections.\"}}\n```";
        let actions = extract(reply);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type(), ActionType::Explain);
    }

    #[test]
    fn test_generic_json_fence_without_action_type_ignored() {
        let reply = "```json\n{\"rows\": 3, \"columns\": 2}\n```";
        assert!(extract(reply).is_empty());
        // Non-action data fences survive stripping
        assert_eq!(strip_action_markup(reply), reply);
    }

    #[test]
    fn test_unknown_type_silently_dropped() {
        let reply = "```action\n{\"type\": \"publish\", \"payload\": {}}\n```";
        assert!(extract(reply).is_empty());
    }

    #[test]
    fn test_malformed_block_repaired() {
        let reply = "```action\n{type: \"navigate\", payload: {documentId: \"abc123xyz9\",}}\n```";
        let actions = extract(reply);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type(), ActionType::Navigate);
    }

    #[test]
    fn test_broken_block_skipped_without_aborting_others() {
        let reply = "\
```action
not json at all ~~~
```

```action
{\"type\": \"query\", \"payload\": {\"query\": \"*\"}}
```
";
        let actions = extract(reply);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type(), ActionType::Query);
    }

    #[test]
    fn test_inline_marker_extracted() {
        let reply = r#"Jumping there now. [action: {"type": "navigate", "payload": {"path": "/pages/home"}}] Done."#;
        let actions = extract(reply);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type(), ActionType::Navigate);
    }

    #[test]
    fn test_inline_marker_with_brackets_in_strings() {
        let reply = r#"[action: {"type": "query", "payload": {"query": "*[_type == \"page\"]"}}]"#;
        let actions = extract(reply);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type(), ActionType::Query);
    }

    #[test]
    fn test_strip_removes_action_markup_keeps_prose() {
        let reply = "\
I'll make that change.

```action
{\"type\": \"update\", \"payload\": {\"documentId\": \"abc123xyz9\", \"fields\": {\"name\": \"New\"}}}
```

All set. [action: {\"type\": \"navigate\", \"payload\": {\"path\": \"/home\"}}]";
        let stripped = strip_action_markup(reply);
        assert!(stripped.contains("I'll make that change."));
        assert!(stripped.contains("All set."));
        assert!(!stripped.contains("```"));
        assert!(!stripped.contains("[action:"));
    }

    #[test]
    fn test_strip_removes_broken_action_fence() {
        let reply = "Before.\n\n```action\nnot json\n```\n\nAfter.";
        let stripped = strip_action_markup(reply);
        assert!(stripped.contains("Before."));
        assert!(stripped.contains("After."));
        assert!(!stripped.contains("```"));
    }

    #[test]
    fn test_known_type_with_unusable_payload_skipped() {
        // update requires documentId and fields
        let reply = "```action\n{\"type\": \"update\", \"payload\": {}}\n```";
        assert!(extract(reply).is_empty());
    }

    #[test]
    fn test_unterminated_fence_ignored() {
        let reply = "```action\n{\"type\": \"query\", \"payload\": {\"query\": \"*\"}}";
        assert!(extract(reply).is_empty());
        assert_eq!(strip_action_markup(reply), reply);
    }

    #[test]
    fn test_marker_inside_fence_not_double_counted() {
        let reply = "```action\n{\"type\": \"explain\", \"payload\": {\"explanation\": \"see [action: syntax]\"}}\n```";
        let actions = extract(reply);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type(), ActionType::Explain);
    }

    #[test]
    fn test_actions_start_pending() {
        let reply = "```action\n{\"type\": \"query\", \"payload\": {\"query\": \"*\"}}\n```";
        let actions = extract(reply);
        assert_eq!(actions[0].status, crate::engine::types::ActionStatus::Pending);
        assert!(actions[0].result.is_none());
    }
}
