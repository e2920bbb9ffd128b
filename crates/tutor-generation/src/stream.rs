use std::collections::HashMap;

use tokio::sync::mpsc;

use tutor_core::{
    Citation, ConfidenceLevel, GeneratorChunk, GeneratorError, RetrievalStrategy, StreamEvent,
};

/// Trailing buffer cap for the inline citation scanner: tolerates markers
/// split across token boundaries without retaining unbounded text
/// (spec §9).
const SCAN_BUFFER_CAP: usize = 100;

/// Bounded rendezvous capacity between the generator and the consumer
/// (spec §9 "Backpressure").
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4;

/// Turns a generator's token stream into the typed `StreamEvent` sequence
/// of spec §3/§4.9, detecting citation markers inline.
///
/// Ordering guarantees upheld: `Confidence` is always first; a `Citation`
/// event for id `k` is emitted only after a `Token` whose accumulated text
/// contained `[k]`; the stream terminates with exactly one `Done` or
/// `Error` and never emits a `Token` after termination.
pub struct StreamMultiplexer {
    citations_by_marker: HashMap<String, Citation>,
    emitted: std::collections::HashSet<String>,
    scan_buffer: String,
}

impl StreamMultiplexer {
    pub fn new(citations: &[Citation]) -> Self {
        Self {
            citations_by_marker: citations.iter().map(|c| (c.marker(), c.clone())).collect(),
            emitted: std::collections::HashSet::new(),
            scan_buffer: String::new(),
        }
    }

    /// Drives a generator chunk receiver to completion, pushing events
    /// onto `out`. Stops pulling as soon as the generator reports
    /// `Stop`/closes, errors, or `out` is dropped by the consumer
    /// (cancellation).
    ///
    /// Returns `true` if the stream reached its own terminal event
    /// (`Done`/`Error`), `false` if it stopped early because the consumer
    /// dropped `out` — the caller uses this to tag a cancellation cause in
    /// the metrics row (spec §5 "Cancellation").
    pub async fn run(
        mut self,
        level: ConfidenceLevel,
        has_insufficient_evidence: bool,
        top_score: f32,
        mut rx: mpsc::Receiver<Result<GeneratorChunk, GeneratorError>>,
        out: mpsc::Sender<StreamEvent>,
        strategy: RetrievalStrategy,
        final_context_tokens: usize,
        total_duration_ms: u64,
    ) -> bool {
        if out
            .send(StreamEvent::Confidence {
                level,
                has_insufficient_evidence,
                top_score,
            })
            .await
            .is_err()
        {
            return false; // consumer gone before we even started
        }

        loop {
            let Some(chunk) = rx.recv().await else {
                break; // generator closed without an explicit finish marker
            };

            match chunk {
                Ok(generator_chunk) => {
                    if !generator_chunk.delta.is_empty() {
                        if out
                            .send(StreamEvent::Token {
                                content: generator_chunk.delta.clone(),
                            })
                            .await
                            .is_err()
                        {
                            return false; // consumer cancelled
                        }

                        for citation in self.scan_for_citations(&generator_chunk.delta) {
                            if out.send(StreamEvent::Citation { citation }).await.is_err() {
                                return false;
                            }
                        }
                    }

                    if generator_chunk.finish_reason.is_some() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = out
                        .send(StreamEvent::Error {
                            message: e.fallback_message().to_string(),
                        })
                        .await;
                    return true;
                }
            }
        }

        if out
            .send(StreamEvent::Metadata {
                strategy,
                citation_count: self.emitted.len(),
                final_context_tokens,
                total_duration_ms,
            })
            .await
            .is_err()
        {
            return false;
        }
        out.send(StreamEvent::Done).await.is_ok()
    }

    /// Appends `delta` to the rolling scan buffer and returns any
    /// newly-matched, known citations not yet emitted.
    fn scan_for_citations(&mut self, delta: &str) -> Vec<Citation> {
        self.scan_buffer.push_str(delta);
        if self.scan_buffer.chars().count() > SCAN_BUFFER_CAP {
            let excess = self.scan_buffer.chars().count() - SCAN_BUFFER_CAP;
            self.scan_buffer = self.scan_buffer.chars().skip(excess).collect();
        }

        let mut found = Vec::new();
        for caps in once_cell::sync::Lazy::force(&MARKER_RE).captures_iter(&self.scan_buffer) {
            let marker = caps[0].to_string();
            if self.emitted.contains(&marker) {
                continue;
            }
            if let Some(citation) = self.citations_by_marker.get(&marker) {
                self.emitted.insert(marker);
                found.push(citation.clone());
            }
        }
        found
    }
}

static MARKER_RE: once_cell::sync::Lazy<regex::Regex> =
    once_cell::sync::Lazy::new(|| regex::Regex::new(r"\[\d+\]").unwrap());
