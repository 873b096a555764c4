//! Incremental extraction of tool-call payloads from a model text stream.
//!
//! The model's output arrives as arbitrary chunks of free text with JSON
//! call payloads embedded anywhere in it, split anywhere across chunk
//! boundaries. [`StreamExtractor::feed`] appends each chunk and scans for
//! complete payloads of the shape
//!
//! ```json
//! {"tool": "read_file", "params": {"path": "src/lib.rs"}}
//! ```
//!
//! with optional `"id"` and `"depends_on"` fields, emitting a
//! [`CallRequest`] per payload found.
//!
//! # Scan outcomes
//!
//! Each `{` candidate parses to one of three outcomes:
//!
//! - **incomplete** — the parse ran off the end of the buffer. The payload
//!   may finish in a later chunk, so the scan stops without marking the
//!   offset; nothing is discarded.
//! - **malformed** — the parse failed structurally, or the value parsed
//!   but lacks the required shape. The offset is recorded as failed and
//!   the scan moves to the next candidate in the same feed.
//! - **well-formed** — a request is emitted and the scan cursor advances
//!   past the consumed bytes.
//!
//! Failed offsets are re-armed whenever new data arrives past them; total
//! work stays bounded by the per-feed attempt limit and the turn-wide
//! attempt ceiling. `feed` never blocks and never raises: hitting the
//! ceiling disables extraction for the rest of the turn and surfaces only
//! as a logged diagnostic plus [`is_exhausted`](StreamExtractor::is_exhausted).

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::ExtractorConfig;
use crate::request::CallRequest;

/// The wire shape of an embedded call payload.
#[derive(Deserialize)]
struct RawPayload {
    tool: String,
    params: Map<String, Value>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    depends_on: Option<Vec<String>>,
}

enum ParseOutcome {
    /// Ran off the end of the buffer; wait for more input.
    Incomplete,
    /// Structurally invalid (or invalid shape) at this offset.
    Malformed,
    /// A valid payload consuming `consumed` bytes from the offset.
    Payload { raw: RawPayload, consumed: usize },
}

/// Recognizes complete tool-call payloads in an unbounded, chunk-delivered
/// text stream.
///
/// State is turn-scoped: [`reset`](Self::reset) clears the buffer, scan
/// cursor, attempt counters, and the emitted-id list that implicit
/// dependencies draw from.
#[derive(Debug)]
pub struct StreamExtractor {
    config: ExtractorConfig,
    /// All text seen this turn.
    buffer: String,
    /// Byte offset below which no unconsumed payload can start.
    scanned: usize,
    /// Offsets known to be invalid at the current buffer length.
    failed: HashSet<usize>,
    /// Total parse attempts this turn.
    attempts: u32,
    /// Set once `attempts` crosses the turn ceiling.
    exhausted: bool,
    /// Ids emitted this turn, in order, for implicit dependencies.
    emitted: Vec<String>,
    next_auto_id: u64,
}

impl StreamExtractor {
    /// Creates an extractor with the given configuration.
    pub fn new(config: ExtractorConfig) -> Self {
        Self {
            config,
            buffer: String::new(),
            scanned: 0,
            failed: HashSet::new(),
            attempts: 0,
            exhausted: false,
            emitted: Vec::new(),
            next_auto_id: 0,
        }
    }

    /// Appends a chunk and returns every complete call payload it
    /// uncovered, in stream order.
    ///
    /// Never blocks; work per call is bounded regardless of input.
    pub fn feed(&mut self, chunk: &str) -> Vec<CallRequest> {
        if !chunk.is_empty() {
            self.buffer.push_str(chunk);
            // New data arrived past every recorded offset: re-arm them.
            self.failed.clear();
        }
        if self.exhausted {
            return Vec::new();
        }

        let mut requests = Vec::new();
        let mut feed_attempts = 0u32;
        let mut search = self.scanned;

        while let Some(found) = self.buffer[search..].find('{') {
            let offset = search + found;
            if self.failed.contains(&offset) {
                search = offset + 1;
                continue;
            }
            if feed_attempts >= self.config.max_attempts_per_feed {
                break;
            }
            if self.attempts >= self.config.max_parse_attempts {
                self.exhausted = true;
                tracing::warn!(
                    attempts = self.attempts,
                    "parse attempt ceiling reached; extraction disabled for the rest of the turn"
                );
                break;
            }
            feed_attempts += 1;
            self.attempts += 1;

            match self.parse_at(offset) {
                ParseOutcome::Incomplete => break,
                ParseOutcome::Malformed => {
                    self.failed.insert(offset);
                    search = offset + 1;
                }
                ParseOutcome::Payload { raw, consumed } => {
                    self.scanned = offset + consumed;
                    search = self.scanned;
                    let request = self.build_request(raw);
                    self.emitted.push(request.id.clone());
                    requests.push(request);
                }
            }
        }

        requests
    }

    /// Attempts to parse one payload starting at `offset`.
    fn parse_at(&self, offset: usize) -> ParseOutcome {
        let mut values = serde_json::Deserializer::from_str(&self.buffer[offset..])
            .into_iter::<Value>();
        match values.next() {
            Some(Ok(value)) => {
                let consumed = values.byte_offset();
                // Shape validation: missing/mistyped required fields make
                // the candidate malformed, not a broken request.
                match serde_json::from_value::<RawPayload>(value) {
                    Ok(raw) => ParseOutcome::Payload { raw, consumed },
                    Err(_) => ParseOutcome::Malformed,
                }
            }
            Some(Err(err)) if err.is_eof() => ParseOutcome::Incomplete,
            Some(Err(_)) | None => ParseOutcome::Malformed,
        }
    }

    fn build_request(&mut self, raw: RawPayload) -> CallRequest {
        let id = raw.id.unwrap_or_else(|| {
            self.next_auto_id += 1;
            format!("call_{}", self.next_auto_id)
        });
        let depends_on = match raw.depends_on {
            Some(deps) => deps,
            None if self.config.implicit_dependencies => self.emitted.clone(),
            None => Vec::new(),
        };
        CallRequest {
            id,
            tool_name: raw.tool,
            params: raw.params,
            depends_on,
        }
    }

    /// Whether the turn-wide attempt ceiling was reached. Extraction stays
    /// disabled until [`reset`](Self::reset).
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Total parse attempts made this turn.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Clears all turn-scoped state for the next turn.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
        self.failed.clear();
        self.attempts = 0;
        self.exhausted = false;
        self.emitted.clear();
        self.next_auto_id = 0;
    }
}
