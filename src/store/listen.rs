//! SSE change-feed parser.
//!
//! Reads a `reqwest::Response` as a byte stream, splits on SSE event
//! boundaries (`data: …\n\n`), and parses each `data:` payload as a
//! [`DocumentEvent`]. Keep-alive comments and non-data lines are skipped;
//! partial lines are buffered across chunk boundaries.

use futures::stream::{self, BoxStream, StreamExt};

use super::errors::StoreError;
use super::types::DocumentEvent;

/// Parse raw SSE bytes into `DocumentEvent`s.
pub fn parse_event_stream(
    response: reqwest::Response,
) -> BoxStream<'static, Result<DocumentEvent, StoreError>> {
    let byte_stream = response.bytes_stream();

    stream::unfold(
        (byte_stream, String::new()),
        |(mut byte_stream, mut buffer)| async move {
            loop {
                // A complete SSE event already in the buffer?
                if let Some(event_end) = buffer.find("\n\n") {
                    let event = buffer[..event_end].to_string();
                    buffer = buffer[event_end + 2..].to_string();

                    match process_event(&event) {
                        Ok(Some(parsed)) => return Some((Ok(parsed), (byte_stream, buffer))),
                        Ok(None) => continue, // keep-alive or comment
                        Err(e) => return Some((Err(e), (byte_stream, buffer))),
                    }
                }

                // Need more data
                match byte_stream.next().await {
                    Some(Ok(bytes)) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                    }
                    Some(Err(e)) => {
                        return Some((
                            Err(StoreError::Transport {
                                reason: format!("change feed read error: {e}"),
                            }),
                            (byte_stream, buffer),
                        ));
                    }
                    None => {
                        // Stream ended — flush any trailing event
                        if !buffer.trim().is_empty() {
                            let event = std::mem::take(&mut buffer);
                            match process_event(event.trim()) {
                                Ok(Some(parsed)) => {
                                    return Some((Ok(parsed), (byte_stream, buffer)))
                                }
                                Ok(None) => return None,
                                Err(e) => return Some((Err(e), (byte_stream, buffer))),
                            }
                        }
                        return None;
                    }
                }
            }
        },
    )
    .boxed()
}

/// Process one SSE event block (may span multiple `data:` lines).
fn process_event(event: &str) -> Result<Option<DocumentEvent>, StoreError> {
    let mut data = String::new();

    for line in event.lines() {
        if let Some(rest) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) {
            data.push_str(rest.trim());
        }
        // Ignore comments (`:keep-alive`) and event-type lines
    }

    if data.is_empty() {
        return Ok(None);
    }

    let parsed: DocumentEvent =
        serde_json::from_str(&data).map_err(|e| StoreError::Serialization {
            reason: format!("invalid change feed event: {e} (data: {data})"),
        })?;
    Ok(Some(parsed))
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::DocumentEventKind;

    #[test]
    fn test_process_event_parses_data_line() {
        let event = r#"data: {"kind":"updated","documentId":"p1","document":{"_id":"p1"}}"#;
        let parsed = process_event(event).unwrap().unwrap();
        assert_eq!(parsed.kind, DocumentEventKind::Updated);
        assert_eq!(parsed.document_id, "p1");
        assert!(parsed.document.is_some());
    }

    #[test]
    fn test_process_event_deletion_without_document() {
        let event = r#"data: {"kind":"deleted","documentId":"p1"}"#;
        let parsed = process_event(event).unwrap().unwrap();
        assert_eq!(parsed.kind, DocumentEventKind::Deleted);
        assert!(parsed.document.is_none());
    }

    #[test]
    fn test_process_event_skips_keep_alive() {
        assert!(process_event(":keep-alive").unwrap().is_none());
        assert!(process_event("event: welcome").unwrap().is_none());
        assert!(process_event("").unwrap().is_none());
    }

    #[test]
    fn test_process_event_rejects_garbage_payload() {
        assert!(process_event("data: not json").is_err());
    }
}
