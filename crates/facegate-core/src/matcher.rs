//! Cosine-similarity matching of query embeddings against galleries.

use crate::types::{Embedding, Gallery, MatchResult};

/// Best similarity between any query embedding and any gallery vector.
/// The gallery mean participates as one more candidate.
fn best_similarity(queries: &[Embedding], gallery: &Gallery) -> f32 {
    let mut best = -1.0f32;

    for query in queries {
        if query.is_empty() {
            continue;
        }
        for stored in &gallery.embeddings {
            best = best.max(query.similarity(&stored.embedding));
        }
        if let Some(mean) = &gallery.mean {
            if !mean.is_empty() {
                best = best.max(query.similarity(mean));
            }
        }
    }

    best
}

/// Verify query embeddings against a single identity's gallery.
/// The threshold comparison is inclusive: best == threshold matches.
pub fn match_against(queries: &[Embedding], gallery: &Gallery, threshold: f32) -> MatchResult {
    if queries.is_empty() || gallery.embeddings.is_empty() {
        return MatchResult::no_match(0.0, "nothing to compare");
    }

    let best = best_similarity(queries, gallery);
    if best < -0.999 && queries.iter().all(|q| q.is_empty()) {
        return MatchResult::no_match(0.0, "no valid query embeddings");
    }

    let matched = best >= threshold;
    tracing::debug!(
        employee_id = %gallery.employee_id,
        similarity = best,
        threshold,
        matched,
        "gallery comparison"
    );

    MatchResult {
        matched,
        similarity: best,
        employee_id: if matched {
            gallery.employee_id.clone()
        } else {
            String::new()
        },
        message: if matched {
            format!("match for {} (similarity {best:.4})", gallery.employee_id)
        } else {
            format!("below threshold (similarity {best:.4}, threshold {threshold:.4})")
        },
    }
}

/// Identify query embeddings across every gallery, returning the best
/// identity at or above the threshold.
pub fn identify(queries: &[Embedding], galleries: &[Gallery], threshold: f32) -> MatchResult {
    if galleries.is_empty() {
        return MatchResult::no_match(0.0, "no enrolled identities");
    }

    let mut best_sim = -1.0f32;
    let mut best_id = String::new();

    for gallery in galleries {
        if gallery.embeddings.is_empty() {
            continue;
        }
        let sim = best_similarity(queries, gallery);
        if sim > best_sim {
            best_sim = sim;
            best_id = gallery.employee_id.clone();
        }
    }

    if best_id.is_empty() {
        return MatchResult::no_match(0.0, "no usable galleries");
    }

    let matched = best_sim >= threshold;
    tracing::debug!(
        candidates = galleries.len(),
        best = %best_id,
        similarity = best_sim,
        matched,
        "identification sweep"
    );

    MatchResult {
        matched,
        similarity: best_sim,
        employee_id: if matched { best_id.clone() } else { String::new() },
        message: if matched {
            format!("identified as {best_id} (similarity {best_sim:.4})")
        } else {
            format!("best candidate {best_id} below threshold (similarity {best_sim:.4})")
        },
    }
}
