//! Evaluation of fitted models on held-out interactions.
use rayon::prelude::*;

use crate::data::SparseMatrix;
use crate::{PredictionError, RankingModel};

/// Compute the mean reciprocal rank of held-out interactions.
///
/// For every user with at least one interaction in `test`, the full item
/// ranking is computed against `train` (items the user interacted with
/// during training are excluded from the candidates), and the reciprocal
/// ranks of the user's test items are averaged. Users without test
/// interactions are skipped; returns 0.0 if no user is evaluable.
pub fn mrr_score<T: RankingModel + Sync>(
    model: &T,
    train: &SparseMatrix,
    test: &SparseMatrix,
) -> Result<f32, PredictionError> {
    let num_items = train.num_items();

    let per_user: Vec<Option<f32>> = (0..test.num_users())
        .into_par_iter()
        .map(|user_id| -> Result<Option<f32>, PredictionError> {
            let test_row = match test.row(user_id) {
                Some(row) if !row.is_empty() => row,
                _ => return Ok(None),
            };

            let recommendations = model.recommend(user_id, train, num_items)?;

            let mut reciprocal_ranks = Vec::with_capacity(test_row.len());
            for (item_id, _) in test_row.iter() {
                if let Some(position) = recommendations
                    .iter()
                    .position(|recommendation| recommendation.item_id == item_id)
                {
                    reciprocal_ranks.push(1.0 / (position + 1) as f32);
                }
            }

            if reciprocal_ranks.is_empty() {
                Ok(None)
            } else {
                Ok(Some(
                    reciprocal_ranks.iter().sum::<f32>() / reciprocal_ranks.len() as f32,
                ))
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    let scores: Vec<f32> = per_user.into_iter().flatten().collect();

    if scores.is_empty() {
        Ok(0.0)
    } else {
        Ok(scores.iter().sum::<f32>() / scores.len() as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Interaction, Interactions};
    use crate::models::FitOutcome;
    use crate::ranking::Recommendation;
    use crate::{FittingError, UserId};

    // Ranks items in a fixed order regardless of the user, minus the
    // user's seen items.
    struct FixedRanking {
        order: Vec<usize>,
    }

    impl RankingModel for FixedRanking {
        fn fit(&mut self, _: &SparseMatrix) -> Result<FitOutcome, FittingError> {
            Ok(FitOutcome::Converged {
                iterations: 0,
                delta: 0.0,
            })
        }

        fn recommend(
            &self,
            user_id: UserId,
            interactions: &SparseMatrix,
            num_recommendations: usize,
        ) -> Result<Vec<Recommendation>, PredictionError> {
            let row = interactions
                .row(user_id)
                .ok_or(PredictionError::UnknownUser {
                    user_id,
                    num_users: interactions.num_users(),
                })?;

            Ok(self
                .order
                .iter()
                .filter(|&&item_id| !row.contains(item_id))
                .take(num_recommendations)
                .map(|&item_id| Recommendation {
                    item_id,
                    score: 0.0,
                })
                .collect())
        }
    }

    #[test]
    fn mrr_reflects_test_item_positions() {
        // Two users, three items. User 0 trained on item 0, user 1 on
        // item 1.
        let train = Interactions::from(vec![
            Interaction::new(0, 0, 1.0),
            Interaction::new(1, 1, 1.0),
            Interaction::new(0, 2, 0.0),
        ]);
        let train = train.to_sparse().unwrap();

        // User 0 held out item 1, user 1 held out item 0.
        let mut test = Interactions::new(2, 3);
        test.push(Interaction::new(0, 1, 1.0));
        test.push(Interaction::new(1, 0, 1.0));
        let test = test.to_sparse().unwrap();

        let model = FixedRanking {
            order: vec![0, 1, 2],
        };

        // User 0 sees candidates [1] (0 and 2 are train items): rank 1.
        // User 1 sees candidates [0, 2]: item 0 at rank 1.
        let score = mrr_score(&model, &train, &test).unwrap();
        assert!((score - 1.0).abs() < 1e-6);

        let model = FixedRanking {
            order: vec![2, 1, 0],
        };

        // User 0: candidates [1], rank 1. User 1: candidates [2, 0],
        // item 0 at rank 2.
        let score = mrr_score(&model, &train, &test).unwrap();
        assert!((score - 0.75).abs() < 1e-6);
    }

    #[test]
    fn users_without_test_interactions_are_skipped() {
        let train = Interactions::from(vec![
            Interaction::new(0, 0, 1.0),
            Interaction::new(1, 1, 1.0),
        ]);
        let train = train.to_sparse().unwrap();

        let mut test = Interactions::new(2, 2);
        test.push(Interaction::new(0, 1, 1.0));
        let test = test.to_sparse().unwrap();

        let model = FixedRanking { order: vec![1, 0] };

        let score = mrr_score(&model, &train, &test).unwrap();
        assert!((score - 1.0).abs() < 1e-6);
    }
}
