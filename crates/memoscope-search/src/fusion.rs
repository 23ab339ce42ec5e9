//! Reciprocal rank fusion (`4.E` step 3): `1.0 / (RRF_K + rank + 1.0)`
//! summed per entity across the lexical and vector rankings, with
//! `RRF_K = 60.0`.

pub const RRF_K: f32 = 60.0;

/// Fuses `lists` (each already ordered best-first) into one ranking: for
/// every id at 0-based rank `r` in a list, add `1 / (k + r + 1)`. Ties are
/// broken by the order ids first appear across `lists` (`4.E`:
/// "lexical-first by insertion order").
pub fn reciprocal_rank_fusion(lists: &[Vec<i64>], limit: usize) -> Vec<i64> {
    let mut scores: std::collections::HashMap<i64, f32> = std::collections::HashMap::new();
    let mut first_seen_order: std::collections::HashMap<i64, usize> = std::collections::HashMap::new();
    let mut ordered: Vec<i64> = Vec::new();

    for list in lists {
        for (rank, id) in list.iter().enumerate() {
            if !first_seen_order.contains_key(id) {
                first_seen_order.insert(*id, ordered.len());
                ordered.push(*id);
            }
            let score = 1.0 / (RRF_K + rank as f32 + 1.0);
            *scores.entry(*id).or_insert(0.0) += score;
        }
    }

    ordered.sort_by(|a, b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| first_seen_order[a].cmp(&first_seen_order[b]))
    });
    ordered.truncate(limit);
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_list_preserves_order() {
        let fused = reciprocal_rank_fusion(&[vec![1, 2, 3]], 10);
        assert_eq!(fused, vec![1, 2, 3]);
    }

    #[test]
    fn items_in_both_lists_rank_above_single_list_items() {
        let lexical = vec![1, 2];
        let vector = vec![2, 3];
        let fused = reciprocal_rank_fusion(&[lexical, vector], 10);
        assert_eq!(fused[0], 2);
    }

    #[test]
    fn limit_truncates_result() {
        let fused = reciprocal_rank_fusion(&[vec![1, 2, 3, 4]], 2);
        assert_eq!(fused.len(), 2);
    }

    #[test]
    fn ties_break_by_lexical_first_insertion_order() {
        // Neither id appears in any list together, so both get the same
        // single rank-0 score; the lexical (first) list's id must sort first.
        let fused = reciprocal_rank_fusion(&[vec![10], vec![20]], 10);
        assert_eq!(fused, vec![10, 20]);
    }
}
