use rayon::prelude::*;

/// Encodes a vector as little-endian f32 bytes for the `entity_vectors.data`
/// BLOB column.
pub fn encode(vec: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn decode(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine distance (`1 - cosine_similarity`) between two equal-length
/// vectors, matching `4.A`'s "cosine (equivalent to negative dot on unit
/// vectors)" metric.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - (dot / (norm_a * norm_b))
}

/// Brute-force k-NN over `candidates`, sorted by `(distance asc,
/// tiebreak desc)` and truncated to `k`. No SQLite vector extension is
/// assumed to be available; this scans in parallel via rayon, appropriate
/// for a personal corpus rather than a web-scale index.
pub fn top_k(
    query: &[f32],
    candidates: &[(i64, Vec<f32>, i64)],
    k: usize,
) -> Vec<(i64, f32)> {
    let mut scored: Vec<(i64, f32, i64)> = candidates
        .par_iter()
        .map(|(id, vec, tiebreak)| (*id, cosine_distance(query, vec), *tiebreak))
        .collect();
    scored.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.2.cmp(&a.2))
    });
    scored.truncate(k);
    scored.into_iter().map(|(id, dist, _)| (id, dist)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let v = vec![0.1_f32, -0.2, 0.33333];
        let bytes = encode(&v);
        let back = decode(&bytes);
        assert_eq!(v.len(), back.len());
        for (a, b) in v.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn identical_vectors_have_zero_distance() {
        let v = vec![1.0, 0.0, 0.0];
        assert!(cosine_distance(&v, &v).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_distance_one() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!((cosine_distance(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn top_k_orders_by_ascending_distance() {
        let query = vec![1.0, 0.0];
        let candidates = vec![
            (1, vec![0.0, 1.0], 100),
            (2, vec![1.0, 0.0], 200),
            (3, vec![0.7, 0.7], 300),
        ];
        let result = top_k(&query, &candidates, 2);
        assert_eq!(result[0].0, 2);
        assert_eq!(result[1].0, 3);
    }
}
