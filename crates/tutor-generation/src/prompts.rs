use tutor_core::{ChatMessage, Citation, ConfidenceLevel, RankedResult};

const GROUNDED_SYSTEM_PROMPT: &str = "You are a tutoring assistant. Answer the learner's question using only the numbered sources provided below. Cite every claim with its source marker, e.g. [1]. If the sources do not support a claim, do not make it.";

const PARTIAL_EVIDENCE_SYSTEM_PROMPT: &str = "You are a tutoring assistant. Some of the sources below are highly relevant and some are only partially relevant to the question. Answer using only these sources, clearly signal your certainty for each claim, and cite every claim with its source marker, e.g. [1].";

const INSUFFICIENT_EVIDENCE_SYSTEM_PROMPT: &str = "You are a tutoring assistant. The available sources provide limited coverage of this question. Acknowledge the limited coverage, do not invent information beyond the sources, and cite any source you do use with its marker, e.g. [1].";

/// Which prompt variant was selected for a query (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptVariant {
    Grounded,
    PartialEvidence,
    InsufficientEvidence,
}

/// Chooses a prompt variant from `(confidenceLevel, insufficientEvidence,
/// ranked)` and renders the system + user messages the generator will
/// receive (spec §4.7).
pub struct PromptAssembler;

impl PromptAssembler {
    pub fn assemble(
        question: &str,
        level: ConfidenceLevel,
        insufficient_evidence: bool,
        ranked: &[RankedResult],
        citations: &[Citation],
        confidence_threshold: f32,
    ) -> (PromptVariant, Vec<ChatMessage>) {
        if insufficient_evidence || level == ConfidenceLevel::Insufficient {
            return (
                PromptVariant::InsufficientEvidence,
                Self::insufficient_evidence_messages(question, citations),
            );
        }

        if level == ConfidenceLevel::Low {
            let (high, partial): (Vec<_>, Vec<_>) = citations
                .iter()
                .zip(ranked.iter())
                .partition(|(_, r)| r.rerank_score >= confidence_threshold);

            if !high.is_empty() && !partial.is_empty() {
                return (
                    PromptVariant::PartialEvidence,
                    Self::partial_evidence_messages(question, &high, &partial),
                );
            }
        }

        (
            PromptVariant::Grounded,
            Self::grounded_messages(question, citations),
        )
    }

    fn grounded_messages(question: &str, citations: &[Citation]) -> Vec<ChatMessage> {
        let context = render_context(citations);
        vec![
            ChatMessage::system(GROUNDED_SYSTEM_PROMPT),
            ChatMessage::user(format!("{context}\nQuestion: {question}")),
        ]
    }

    fn partial_evidence_messages(
        question: &str,
        high: &[(&Citation, &RankedResult)],
        partial: &[(&Citation, &RankedResult)],
    ) -> Vec<ChatMessage> {
        let high_context = render_context(&high.iter().map(|(c, _)| (*c).clone()).collect::<Vec<_>>());
        let partial_context = render_context(&partial.iter().map(|(c, _)| (*c).clone()).collect::<Vec<_>>());
        let user = format!(
            "Highly relevant sources:\n{high_context}\nPartially relevant sources:\n{partial_context}\nQuestion: {question}"
        );
        vec![ChatMessage::system(PARTIAL_EVIDENCE_SYSTEM_PROMPT), ChatMessage::user(user)]
    }

    fn insufficient_evidence_messages(question: &str, citations: &[Citation]) -> Vec<ChatMessage> {
        let user = if citations.is_empty() {
            format!("No sources were found for this question.\nQuestion: {question}")
        } else {
            let context = render_context(citations);
            format!("Low-relevance sources (treat with caution):\n{context}\nQuestion: {question}")
        };
        vec![
            ChatMessage::system(INSUFFICIENT_EVIDENCE_SYSTEM_PROMPT),
            ChatMessage::user(user),
        ]
    }
}

/// Renders context chunks as `[k] Source: <documentTitle>\n<content>\n---`
/// (spec §4.7).
fn render_context(citations: &[Citation]) -> String {
    citations
        .iter()
        .map(|c| format!("[{}] Source: {}\n{}\n---", c.id, c.document_title, c.snippet))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutor_core::ChunkMetadata;

    fn metadata() -> ChunkMetadata {
        ChunkMetadata {
            document_id: "d".into(),
            document_title: "Intro to DP".into(),
            document_url: "u".into(),
            section_header: None,
            chunk_index: 0,
            total_chunks: 1,
            token_count: 10,
            has_code: false,
            has_formula: false,
            has_table: false,
            topic_tag: None,
        }
    }

    fn ranked(score: f32) -> RankedResult {
        RankedResult {
            chunk_id: "c1".into(),
            content: "Dynamic programming avoids recomputation via memoization.".into(),
            rerank_score: score,
            original_fused_score: 0.1,
            metadata: metadata(),
        }
    }

    fn citation(id: &str) -> Citation {
        Citation {
            id: id.into(),
            chunk_id: "c1".into(),
            document_title: "Intro to DP".into(),
            document_url: "u".into(),
            snippet: "Dynamic programming avoids recomputation.".into(),
            relevance_score: 0.9,
        }
    }

    #[test]
    fn selects_grounded_for_high_confidence() {
        let ranked_list = vec![ranked(0.88)];
        let citations = vec![citation("1")];
        let (variant, messages) = PromptAssembler::assemble(
            "What is dynamic programming?",
            ConfidenceLevel::High,
            false,
            &ranked_list,
            &citations,
            0.6,
        );
        assert_eq!(variant, PromptVariant::Grounded);
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn selects_insufficient_when_flagged() {
        let (variant, _) = PromptAssembler::assemble(
            "What is dynamic programming?",
            ConfidenceLevel::Insufficient,
            true,
            &[],
            &[],
            0.6,
        );
        assert_eq!(variant, PromptVariant::InsufficientEvidence);
    }

    #[test]
    fn selects_insufficient_when_ranked_list_empty() {
        let (variant, messages) =
            PromptAssembler::assemble("q", ConfidenceLevel::Insufficient, true, &[], &[], 0.6);
        assert_eq!(variant, PromptVariant::InsufficientEvidence);
        assert!(messages[1].content.contains("No sources"));
    }

    #[test]
    fn selects_partial_evidence_when_both_groups_present() {
        let ranked_list = vec![ranked(0.65), ranked(0.45)];
        let citations = vec![citation("1"), citation("2")];
        let (variant, _) = PromptAssembler::assemble(
            "q",
            ConfidenceLevel::Low,
            false,
            &ranked_list,
            &citations,
            0.6,
        );
        assert_eq!(variant, PromptVariant::PartialEvidence);
    }
}
