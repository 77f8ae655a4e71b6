//! Similarity scoring for dense and late-interaction vectors.

use ndarray::Array2;

/// Cosine similarity between two dense vectors.
///
/// Returns 0.0 for empty or mismatched inputs so that malformed rows rank
/// last instead of failing the whole search.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;

    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

/// ColBERT-style MaxSim: for every query token, take the best cosine match
/// among the document tokens, and sum over query tokens.
///
/// Both matrices must have uniform row width; a ragged or empty matrix
/// scores 0.0.
pub fn max_sim(query: &[Vec<f32>], document: &[Vec<f32>]) -> f32 {
    let Some(q) = to_normalized_matrix(query) else {
        return 0.0;
    };
    let Some(d) = to_normalized_matrix(document) else {
        return 0.0;
    };
    if q.ncols() != d.ncols() {
        return 0.0;
    }

    let similarities = q.dot(&d.t());
    similarities
        .rows()
        .into_iter()
        .map(|row| row.iter().cloned().fold(f32::NEG_INFINITY, f32::max))
        .filter(|max| max.is_finite())
        .sum()
}

/// Stack token rows into an L2-row-normalized matrix.
fn to_normalized_matrix(rows: &[Vec<f32>]) -> Option<Array2<f32>> {
    let width = rows.first().map(|row| row.len())?;
    if width == 0 || rows.iter().any(|row| row.len() != width) {
        return None;
    }

    let mut flat = Vec::with_capacity(rows.len() * width);
    for row in rows {
        let norm = row.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm <= f32::EPSILON {
            flat.extend(std::iter::repeat(0.0).take(width));
        } else {
            flat.extend(row.iter().map(|x| x / norm));
        }
    }

    Array2::from_shape_vec((rows.len(), width), flat).ok()
}
