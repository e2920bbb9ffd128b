use tutor_core::ConfidenceLevel;

/// Default confidence threshold θ (spec §4.5/§6).
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.6;

/// Pure function of the top rerank score. These bands are contract, not
/// implementation detail — tests pin the boundary points (spec §4.5,
/// §8 invariant 8).
pub fn confidence_level(top_score: f32) -> ConfidenceLevel {
    if top_score >= 0.8 {
        ConfidenceLevel::High
    } else if top_score >= 0.6 {
        ConfidenceLevel::Medium
    } else if top_score >= 0.4 {
        ConfidenceLevel::Low
    } else {
        ConfidenceLevel::Insufficient
    }
}

/// `insufficientEvidence(s, θ) ≡ s < θ` (spec §4.5).
pub fn insufficient_evidence(top_score: f32, threshold: f32) -> bool {
    top_score < threshold
}
