//! Reciprocal Rank Fusion (RRF) over any number of ranked lists.
//!
//! Each id's fused score = Σ 1/(k + rank) over the lists that contain it,
//! with 1-based ranks. The constant k damps the influence of top positions;
//! the usual value is 60.

use ragstream_core::retrieval::{PassageId, RankedHit};
use std::collections::HashMap;

/// An id with its fused score.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    pub id: PassageId,
    pub score: f64,
}

/// Merge ranked lists into one list sorted by descending fused score.
///
/// Ties keep first-seen order: lists are scanned in the order given and each
/// list in rank order, so identical inputs always produce identical output.
/// An id repeated inside a single list counts once, at its best rank.
pub fn reciprocal_rank_fusion(lists: &[Vec<RankedHit>], rrf_k: f64) -> Vec<FusedHit> {
    // id → position in `fused`, which is kept in first-seen order
    let mut slots: HashMap<&PassageId, usize> = HashMap::new();
    let mut fused: Vec<FusedHit> = Vec::new();

    for list in lists {
        let mut best_rank: HashMap<&PassageId, usize> = HashMap::new();
        for hit in list {
            best_rank
                .entry(&hit.id)
                .and_modify(|r| *r = (*r).min(hit.rank))
                .or_insert(hit.rank);
        }

        for hit in list {
            // First occurrence contributes the best rank; later ones are skipped
            let Some(rank) = best_rank.remove(&hit.id) else {
                continue;
            };
            let contribution = 1.0 / (rrf_k + rank as f64);

            match slots.get(&hit.id) {
                Some(&slot) => fused[slot].score += contribution,
                None => {
                    slots.insert(&hit.id, fused.len());
                    fused.push(FusedHit {
                        id: hit.id.clone(),
                        score: contribution,
                    });
                }
            }
        }
    }

    // Stable sort keeps first-seen order among equal scores
    fused.sort_by(|a, b| b.score.total_cmp(&a.score));
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(ids: &[&str]) -> Vec<RankedHit> {
        RankedHit::from_ordered(ids.iter().map(|s| PassageId::from(*s)))
    }

    fn hit(id: &str, rank: usize) -> RankedHit {
        RankedHit {
            id: PassageId::from(id),
            rank,
        }
    }

    #[test]
    fn known_scores_with_k_60() {
        // A: rank 1 in list 1, rank 3 in list 2. B: rank 2 in list 1 only.
        let lists = vec![
            vec![hit("A", 1), hit("B", 2)],
            vec![hit("X", 1), hit("Y", 2), hit("A", 3)],
        ];
        let fused = reciprocal_rank_fusion(&lists, 60.0);

        let a = fused.iter().find(|h| h.id.as_str() == "A").unwrap();
        let b = fused.iter().find(|h| h.id.as_str() == "B").unwrap();
        assert!((a.score - (1.0 / 61.0 + 1.0 / 63.0)).abs() < 1e-12);
        assert!((a.score - 0.03226).abs() < 1e-4);
        assert!((b.score - 1.0 / 62.0).abs() < 1e-12);

        let pos = |id: &str| fused.iter().position(|h| h.id.as_str() == id).unwrap();
        assert!(pos("A") < pos("B"));
        assert_eq!(fused[0].id.as_str(), "A");
    }

    #[test]
    fn ties_break_by_first_seen() {
        // Both ids appear once at rank 1; first list wins the tie.
        let lists = vec![list(&["p2"]), list(&["p1"])];
        let fused = reciprocal_rank_fusion(&lists, 60.0);
        assert_eq!(fused[0].id.as_str(), "p2");
        assert_eq!(fused[1].id.as_str(), "p1");

        let again = reciprocal_rank_fusion(&lists, 60.0);
        assert_eq!(fused, again);
    }

    #[test]
    fn more_appearances_rank_higher() {
        let lists = vec![list(&["a", "b"]), list(&["b", "a"]), list(&["b"])];
        let fused = reciprocal_rank_fusion(&lists, 60.0);
        assert_eq!(fused[0].id.as_str(), "b");
    }

    #[test]
    fn duplicate_within_list_counts_once_at_best_rank() {
        let lists = vec![vec![hit("a", 1), hit("b", 2), hit("a", 3)]];
        let fused = reciprocal_rank_fusion(&lists, 60.0);
        assert_eq!(fused.len(), 2);
        assert!((fused[0].score - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn empty_inputs_yield_empty_output() {
        assert!(reciprocal_rank_fusion(&[], 60.0).is_empty());
        assert!(reciprocal_rank_fusion(&[vec![], vec![]], 60.0).is_empty());
    }
}
