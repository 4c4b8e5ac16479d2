//! Score-based top-N ranking over fitted factors.
use std::cmp::Ordering;

use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::data::SparseRow;
use crate::ItemId;

/// A single ranked item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// The recommended item.
    pub item_id: ItemId,
    /// Affinity score: the dot product of the user and item factor
    /// vectors.
    pub score: f32,
}

/// Rank items for a user by the dot product of `user_vector` with every
/// row of `item_factors`.
///
/// Items present in `seen` are dropped from the candidate set before
/// ranking. The result is sorted by descending score with ties broken by
/// ascending item id, and holds at most `num_recommendations` entries;
/// if fewer candidates exist, all of them are returned.
pub fn rank_items(
    user_vector: ArrayView1<'_, f32>,
    item_factors: ArrayView2<'_, f32>,
    seen: Option<&SparseRow<'_>>,
    num_recommendations: usize,
) -> Vec<Recommendation> {
    let scores = item_factors.dot(&user_vector);

    let mut candidates: Vec<Recommendation> = scores
        .iter()
        .enumerate()
        .filter(|(item_id, _)| seen.map_or(true, |row| !row.contains(*item_id)))
        .map(|(item_id, &score)| Recommendation { item_id, score })
        .collect();

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.item_id.cmp(&b.item_id))
    });
    candidates.truncate(num_recommendations);

    candidates
}

#[cfg(test)]
mod tests {
    use ndarray::{arr1, arr2};

    use super::*;

    #[test]
    fn ranks_by_descending_score() {
        let user = arr1(&[1.0, 0.0]);
        let items = arr2(&[[0.1, 9.0], [0.7, 0.0], [0.3, -2.0]]);

        let ranked = rank_items(user.view(), items.view(), None, 10);

        let ids: Vec<_> = ranked.iter().map(|x| x.item_id).collect();
        assert_eq!(ids, vec![1, 2, 0]);

        for pair in ranked.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn ties_break_by_ascending_item_id() {
        let user = arr1(&[1.0]);
        let items = arr2(&[[0.5], [0.5], [0.5]]);

        let ranked = rank_items(user.view(), items.view(), None, 10);

        let ids: Vec<_> = ranked.iter().map(|x| x.item_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn truncates_to_requested_count() {
        let user = arr1(&[1.0]);
        let items = arr2(&[[3.0], [2.0], [1.0]]);

        let ranked = rank_items(user.view(), items.view(), None, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].item_id, 0);

        // Fewer candidates than requested: all of them, no padding.
        let ranked = rank_items(user.view(), items.view(), None, 10);
        assert_eq!(ranked.len(), 3);
    }

    #[test]
    fn seen_items_are_excluded() {
        let user = arr1(&[1.0]);
        let items = arr2(&[[3.0], [2.0], [1.0]]);

        let item_ids = [0, 2];
        let weights = [1.0, 1.0];
        let row = SparseRow {
            item_ids: &item_ids,
            weights: &weights,
        };

        let ranked = rank_items(user.view(), items.view(), Some(&row), 10);

        let ids: Vec<_> = ranked.iter().map(|x| x.item_id).collect();
        assert_eq!(ids, vec![1]);
    }
}
