//! Chunked event stream encoding
//!
//! Each event becomes one or more `data: <json>\n\n` frames. An event whose
//! JSON exceeds the threshold is split into ordered chunk frames that the
//! client reassembles by `messageId`. The stream ends with `data: [DONE]`.

use crate::events::OrchestratorEvent;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, error};
use uuid::Uuid;

pub const DEFAULT_CHUNK_THRESHOLD: usize = 1800;
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

pub const DONE_FRAME: &str = "data: [DONE]\n\n";

const SERIALIZATION_FAILED_JSON: &str =
    r#"{"type":"error","data":{"message":"Event serialization failed"}}"#;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkFrame {
    #[serde(rename = "type")]
    pub kind: String,
    pub message_id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub chunk: String,
    pub original_type: String,
}

pub fn frame(json: &str) -> String {
    format!("data: {}\n\n", json)
}

/// Bytes `c` occupies once escaped inside a JSON string.
fn escaped_len(c: char) -> usize {
    match c {
        '"' | '\\' | '\n' | '\r' | '\t' | '\u{08}' | '\u{0c}' => 2,
        c if (c as u32) < 0x20 => 6,
        c => c.len_utf8(),
    }
}

/// Split `s` into pieces of at most `max_bytes` raw bytes and `max_escaped`
/// bytes once JSON-escaped, never inside a character. A single character
/// over either limit forms its own piece.
pub fn split_on_char_boundaries(s: &str, max_bytes: usize, max_escaped: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut escaped = 0;

    for (i, c) in s.char_indices() {
        let width = escaped_len(c);
        let end = i + c.len_utf8();
        if i > start && (end - start > max_bytes || escaped + width > max_escaped) {
            pieces.push(&s[start..i]);
            start = i;
            escaped = 0;
        }
        escaped += width;
    }
    if start < s.len() {
        pieces.push(&s[start..]);
    }

    pieces
}

#[derive(Debug, Clone, Copy)]
pub struct StreamEncoder {
    threshold: usize,
    chunk_size: usize,
}

impl Default for StreamEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_THRESHOLD, DEFAULT_CHUNK_SIZE)
    }
}

impl StreamEncoder {
    pub fn new(threshold: usize, chunk_size: usize) -> Self {
        Self {
            threshold,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Frames for one event. Serialization failures become a generic error
    /// frame so the stream itself stays intact.
    pub fn encode(&self, event: &OrchestratorEvent) -> Vec<String> {
        match serde_json::to_string(event) {
            Ok(json) => self.encode_json(event.event_type(), &json),
            Err(e) => {
                error!(event_type = event.event_type(), error = %e, "Event serialization failed");
                vec![frame(SERIALIZATION_FAILED_JSON)]
            }
        }
    }

    pub fn encode_json(&self, event_type: &str, json: &str) -> Vec<String> {
        if json.len() <= self.threshold {
            return vec![frame(json)];
        }

        let message_id = Uuid::new_v4().simple().to_string();

        // Frame size with an empty chunk and worst-case index digits.
        let skeleton = ChunkFrame {
            kind: "chunk".to_string(),
            message_id: message_id.clone(),
            chunk_index: json.len(),
            total_chunks: json.len(),
            chunk: String::new(),
            original_type: event_type.to_string(),
        };
        let overhead = serde_json::to_string(&skeleton)
            .map(|encoded| frame(&encoded).len())
            .unwrap_or(self.threshold);
        let budget = self.threshold.saturating_sub(overhead).max(1);

        let pieces = split_on_char_boundaries(json, self.chunk_size, budget);
        let total_chunks = pieces.len();

        debug!(event_type, bytes = json.len(), total_chunks, "Chunking oversized event");

        pieces
            .into_iter()
            .enumerate()
            .map(|(chunk_index, chunk)| {
                let chunk_frame = ChunkFrame {
                    kind: "chunk".to_string(),
                    message_id: message_id.clone(),
                    chunk_index,
                    total_chunks,
                    chunk: chunk.to_string(),
                    original_type: event_type.to_string(),
                };
                match serde_json::to_string(&chunk_frame) {
                    Ok(encoded) => frame(&encoded),
                    Err(_) => frame(SERIALIZATION_FAILED_JSON),
                }
            })
            .collect()
    }
}

/// The JSON payload of a frame, or `None` for the terminating frame.
pub fn frame_payload(frame: &str) -> Option<&str> {
    let payload = frame.trim_end().strip_prefix("data: ")?;
    if payload == "[DONE]" {
        None
    } else {
        Some(payload)
    }
}

/// Consumer side of the chunking protocol.
#[derive(Debug, Default)]
pub struct ChunkReassembler {
    pending: HashMap<String, Vec<Option<String>>>,
}

impl ChunkReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame payload. Returns the complete event JSON when a
    /// non-chunk payload arrives or the last chunk of a message completes it.
    pub fn feed(&mut self, payload: &str) -> Result<Option<String>> {
        let value: Value = serde_json::from_str(payload)?;
        if value.get("type").and_then(Value::as_str) != Some("chunk") {
            return Ok(Some(payload.to_string()));
        }

        let chunk: ChunkFrame = serde_json::from_value(value)?;
        if chunk.total_chunks == 0 || chunk.chunk_index >= chunk.total_chunks {
            return Ok(None);
        }

        let slots = self
            .pending
            .entry(chunk.message_id.clone())
            .or_insert_with(|| vec![None; chunk.total_chunks]);
        if let Some(slot) = slots.get_mut(chunk.chunk_index) {
            *slot = Some(chunk.chunk);
        }

        if slots.iter().any(Option::is_none) {
            return Ok(None);
        }

        Ok(self
            .pending
            .remove(&chunk.message_id)
            .map(|parts| parts.into_iter().flatten().collect()))
    }

    pub fn pending_messages(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble(frames: &[String]) -> Vec<String> {
        let mut reassembler = ChunkReassembler::new();
        frames
            .iter()
            .filter_map(|f| frame_payload(f))
            .filter_map(|p| reassembler.feed(p).unwrap())
            .collect()
    }

    #[test]
    fn test_small_event_is_single_frame() {
        let event = OrchestratorEvent::Error {
            message: "nope".into(),
        };
        let frames = StreamEncoder::default().encode(&event);

        assert_eq!(frames.len(), 1);
        assert!(frames[0].starts_with("data: {\"type\":\"error\""));
        assert!(frames[0].ends_with("\n\n"));
    }

    #[test]
    fn test_large_event_round_trips_through_chunks() {
        let event = OrchestratorEvent::Error {
            message: "x".repeat(2500),
        };
        let json = serde_json::to_string(&event).unwrap();
        let frames = StreamEncoder::default().encode(&event);

        assert!(frames.len() >= 2);
        let first: ChunkFrame = serde_json::from_str(frame_payload(&frames[0]).unwrap()).unwrap();
        assert_eq!(first.kind, "chunk");
        assert_eq!(first.original_type, "error");
        assert_eq!(first.total_chunks, frames.len());

        assert_eq!(reassemble(&frames), vec![json]);
    }

    #[test]
    fn test_multibyte_text_splits_on_char_boundaries() {
        let message = "삼성전자 현금흐름표 ".repeat(120);
        let json = serde_json::to_string(&OrchestratorEvent::Error { message }).unwrap();
        let frames = StreamEncoder::new(1800, 1000).encode_json("error", &json);

        assert!(frames.len() >= 2);
        assert_eq!(reassemble(&frames), vec![json]);
    }

    #[test]
    fn test_split_helper() {
        assert_eq!(split_on_char_boundaries("abcdef", 4, usize::MAX), vec!["abcd", "ef"]);
        assert_eq!(split_on_char_boundaries("가나", 4, usize::MAX), vec!["가", "나"]);
        assert_eq!(split_on_char_boundaries("가", 1, usize::MAX), vec!["가"]);
        assert!(split_on_char_boundaries("", 4, usize::MAX).is_empty());

        // Quotes and backslashes count double once escaped.
        assert_eq!(split_on_char_boundaries(r#"a"b\c"#, 10, 4), vec![r#"a"b"#, r#"\c"#]);
    }

    #[test]
    fn test_reassembler_waits_for_every_chunk() {
        let frames = StreamEncoder::new(10, 8)
            .encode_json("plan", r#"{"type":"plan","data":"0123456789"}"#);
        let payloads: Vec<&str> = frames.iter().filter_map(|f| frame_payload(f)).collect();

        let mut reassembler = ChunkReassembler::new();
        for p in &payloads[..payloads.len() - 1] {
            assert_eq!(reassembler.feed(p).unwrap(), None);
        }
        assert_eq!(reassembler.pending_messages(), 1);

        let done = reassembler.feed(payloads[payloads.len() - 1]).unwrap();
        assert_eq!(done.as_deref(), Some(r#"{"type":"plan","data":"0123456789"}"#));
        assert_eq!(reassembler.pending_messages(), 0);
    }

    #[test]
    fn test_escape_heavy_event_frames_stay_under_threshold() {
        let encoder = StreamEncoder::default();
        for message in ["\"".repeat(2500), "\\\"".repeat(1500), "\n\u{1}".repeat(900)] {
            let event = OrchestratorEvent::Error { message };
            let json = serde_json::to_string(&event).unwrap();
            let frames = encoder.encode(&event);

            assert!(frames.len() >= 2);
            for f in &frames {
                assert!(f.len() <= DEFAULT_CHUNK_THRESHOLD, "frame of {} bytes", f.len());
            }
            assert_eq!(reassemble(&frames), vec![json]);
        }
    }

    #[test]
    fn test_reassembler_accepts_chunks_out_of_order() {
        let json = r#"{"type":"plan","data":"0123456789abcdef"}"#;
        let frames = StreamEncoder::new(10, 8).encode_json("plan", json);
        let mut payloads: Vec<&str> = frames.iter().filter_map(|f| frame_payload(f)).collect();
        assert!(payloads.len() >= 3);
        payloads.reverse();

        let mut reassembler = ChunkReassembler::new();
        let mut done = None;
        for p in &payloads {
            if let Some(out) = reassembler.feed(p).unwrap() {
                done = Some(out);
            }
        }
        assert_eq!(done.as_deref(), Some(json));
        assert_eq!(reassembler.pending_messages(), 0);
    }

    #[test]
    fn test_done_frame_has_no_payload() {
        assert_eq!(frame_payload(DONE_FRAME), None);
    }
}
