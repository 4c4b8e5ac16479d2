//! Interaction data structures.
//!
//! Raw `(user, item, weight)` triples are accumulated in [`Interactions`]
//! and compressed into an immutable [`SparseMatrix`] (CSR layout) before
//! training. The matrix is read-only after construction and can be shared
//! freely across threads.
use std::hash::Hasher;

use itertools::Itertools;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher;
use tracing::debug;

use crate::{DataError, ItemId, UserId};

/// A single observed implicit-feedback signal.
///
/// The weight encodes the strength of the signal (for example a play
/// count) and must be non-negative and finite.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Interaction {
    user_id: UserId,
    item_id: ItemId,
    weight: f32,
}

impl Interaction {
    /// Create a new interaction.
    pub fn new(user_id: UserId, item_id: ItemId, weight: f32) -> Self {
        Interaction {
            user_id,
            item_id,
            weight,
        }
    }

    /// The user id of the interaction.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// The item id of the interaction.
    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    /// The weight of the interaction.
    pub fn weight(&self) -> f32 {
        self.weight
    }
}

/// Randomly split interactions into test and train sets.
pub fn train_test_split<R: Rng>(
    interactions: &mut Interactions,
    rng: &mut R,
    test_fraction: f32,
) -> (Interactions, Interactions) {
    interactions.shuffle(rng);

    let (test, train) =
        interactions.split_at((test_fraction * interactions.len() as f32) as usize);

    (train, test)
}

/// Split interactions into test and train sets so that each user's
/// interactions land entirely on one side of the split.
pub fn user_based_split<R: Rng>(
    interactions: &Interactions,
    rng: &mut R,
    test_fraction: f32,
) -> (Interactions, Interactions) {
    let denominator = 100_000;
    let train_cutoff = (test_fraction * denominator as f32) as u64;

    let (key_0, key_1) = (rng.gen::<u64>(), rng.gen::<u64>());

    let is_train = |x: &Interaction| {
        let mut hasher = SipHasher::new_with_keys(key_0, key_1);
        hasher.write_usize(x.user_id());
        hasher.finish() % denominator > train_cutoff
    };

    interactions.split_by(is_train)
}

/// A growable collection of interactions with fixed dimensions.
#[derive(Clone, Debug)]
pub struct Interactions {
    num_users: usize,
    num_items: usize,
    interactions: Vec<Interaction>,
}

impl Interactions {
    /// Create an empty collection with explicit dimensions.
    pub fn new(num_users: usize, num_items: usize) -> Self {
        Interactions {
            num_users,
            num_items,
            interactions: Vec::new(),
        }
    }

    /// Add a single interaction.
    pub fn push(&mut self, interaction: Interaction) {
        self.interactions.push(interaction);
    }

    /// A view of the underlying data.
    pub fn data(&self) -> &[Interaction] {
        &self.interactions
    }

    /// Number of interactions in the collection.
    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    /// Whether the collection contains no interactions.
    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    /// Shuffle the interactions in place.
    pub fn shuffle<R: Rng>(&mut self, rng: &mut R) {
        self.interactions.shuffle(rng);
    }

    /// Split the collection at `idx`, preserving dimensions on both sides.
    pub fn split_at(&self, idx: usize) -> (Self, Self) {
        let head = Interactions {
            num_users: self.num_users,
            num_items: self.num_items,
            interactions: self.interactions[..idx].to_owned(),
        };
        let tail = Interactions {
            num_users: self.num_users,
            num_items: self.num_items,
            interactions: self.interactions[idx..].to_owned(),
        };

        (head, tail)
    }

    /// Partition the collection by a predicate, preserving dimensions on
    /// both sides.
    pub fn split_by<F: Fn(&Interaction) -> bool>(&self, func: F) -> (Self, Self) {
        let head = Interactions {
            num_users: self.num_users,
            num_items: self.num_items,
            interactions: self
                .interactions
                .iter()
                .filter(|x| func(x))
                .cloned()
                .collect(),
        };
        let tail = Interactions {
            num_users: self.num_users,
            num_items: self.num_items,
            interactions: self
                .interactions
                .iter()
                .filter(|x| !func(x))
                .cloned()
                .collect(),
        };

        (head, tail)
    }

    /// Compress into a [`SparseMatrix`], validating weights and ids.
    ///
    /// Duplicate `(user, item)` pairs are summed into a single entry.
    pub fn to_sparse(&self) -> Result<SparseMatrix, DataError> {
        SparseMatrix::build(self)
    }

    /// Number of distinct users the collection is dimensioned for.
    pub fn num_users(&self) -> usize {
        self.num_users
    }

    /// Number of distinct items the collection is dimensioned for.
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// The `(num_users, num_items)` dimensions.
    pub fn shape(&self) -> (usize, usize) {
        (self.num_users, self.num_items)
    }
}

impl From<Vec<Interaction>> for Interactions {
    fn from(data: Vec<Interaction>) -> Interactions {
        let num_users = data.iter().map(|x| x.user_id()).max().map_or(0, |x| x + 1);
        let num_items = data.iter().map(|x| x.item_id()).max().map_or(0, |x| x + 1);

        Interactions {
            num_users,
            num_items,
            interactions: data,
        }
    }
}

/// An immutable user-major sparse interaction matrix in CSR layout.
///
/// Within each row, item ids are sorted in ascending order and unique.
#[derive(Clone, Debug)]
pub struct SparseMatrix {
    num_users: usize,
    num_items: usize,
    row_pointers: Vec<usize>,
    item_ids: Vec<ItemId>,
    weights: Vec<f32>,
}

impl SparseMatrix {
    fn build(interactions: &Interactions) -> Result<SparseMatrix, DataError> {
        if interactions.is_empty() {
            return Err(DataError::Empty);
        }

        let (num_users, num_items) = interactions.shape();

        for interaction in interactions.data() {
            let weight = interaction.weight();

            if weight.is_nan() || weight.is_infinite() {
                return Err(DataError::NonFiniteWeight {
                    user_id: interaction.user_id(),
                    item_id: interaction.item_id(),
                    weight,
                });
            }
            if weight < 0.0 {
                return Err(DataError::NegativeWeight {
                    user_id: interaction.user_id(),
                    item_id: interaction.item_id(),
                    weight,
                });
            }
            if interaction.user_id() >= num_users || interaction.item_id() >= num_items {
                return Err(DataError::OutOfBounds {
                    user_id: interaction.user_id(),
                    item_id: interaction.item_id(),
                    num_users,
                    num_items,
                });
            }
        }

        let mut data = interactions.data().to_owned();
        data.sort_by_key(|x| (x.user_id(), x.item_id()));

        // Sum duplicate (user, item) pairs into a single entry.
        let mut merged: Vec<(UserId, ItemId, f32)> = Vec::with_capacity(data.len());

        for ((user_id, item_id), group) in &data.iter().group_by(|x| (x.user_id(), x.item_id())) {
            merged.push((user_id, item_id, group.map(|x| x.weight()).sum()));
        }

        let num_duplicates = data.len() - merged.len();
        if num_duplicates > 0 {
            debug!(num_duplicates, "summed duplicate interactions");
        }

        let mut row_pointers = vec![0; num_users + 1];
        let mut item_ids = Vec::with_capacity(merged.len());
        let mut weights = Vec::with_capacity(merged.len());

        for &(user_id, item_id, weight) in &merged {
            row_pointers[user_id + 1] += 1;
            item_ids.push(item_id);
            weights.push(weight);
        }

        for idx in 1..row_pointers.len() {
            row_pointers[idx] += row_pointers[idx - 1];
        }

        Ok(SparseMatrix {
            num_users,
            num_items,
            row_pointers,
            item_ids,
            weights,
        })
    }

    /// The row of observed interactions for `user_id`, or `None` if the
    /// id lies outside the matrix.
    pub fn row(&self, user_id: UserId) -> Option<SparseRow<'_>> {
        if user_id >= self.num_users {
            return None;
        }

        let start = self.row_pointers[user_id];
        let stop = self.row_pointers[user_id + 1];

        Some(SparseRow {
            item_ids: &self.item_ids[start..stop],
            weights: &self.weights[start..stop],
        })
    }

    /// Iterate over all rows in user order.
    pub fn iter_rows(&self) -> SparseMatrixRowIterator<'_> {
        SparseMatrixRowIterator {
            matrix: self,
            idx: 0,
        }
    }

    /// The item-major view of the matrix: the transposed matrix's rows
    /// list the `(user_id, weight)` pairs observing each item.
    pub fn transpose(&self) -> SparseMatrix {
        let mut row_pointers = vec![0; self.num_items + 1];

        for &item_id in &self.item_ids {
            row_pointers[item_id + 1] += 1;
        }
        for idx in 1..row_pointers.len() {
            row_pointers[idx] += row_pointers[idx - 1];
        }

        let mut offsets = row_pointers.clone();
        let mut item_ids = vec![0; self.item_ids.len()];
        let mut weights = vec![0.0; self.weights.len()];

        // Walking users in ascending order keeps each transposed row
        // sorted by user id.
        for user_id in 0..self.num_users {
            let start = self.row_pointers[user_id];
            let stop = self.row_pointers[user_id + 1];

            for idx in start..stop {
                let target = offsets[self.item_ids[idx]];
                item_ids[target] = user_id;
                weights[target] = self.weights[idx];
                offsets[self.item_ids[idx]] += 1;
            }
        }

        SparseMatrix {
            num_users: self.num_items,
            num_items: self.num_users,
            row_pointers,
            item_ids,
            weights,
        }
    }

    /// Number of stored (unique) interactions.
    pub fn nnz(&self) -> usize {
        self.item_ids.len()
    }

    /// Number of user rows.
    pub fn num_users(&self) -> usize {
        self.num_users
    }

    /// Number of item columns.
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// The `(num_users, num_items)` dimensions.
    pub fn shape(&self) -> (usize, usize) {
        (self.num_users, self.num_items)
    }
}

/// A single user's observed interactions, sorted by ascending item id.
#[derive(Clone, Copy, Debug)]
pub struct SparseRow<'a> {
    /// Item ids observed in this row.
    pub item_ids: &'a [ItemId],
    /// Weights aligned with `item_ids`.
    pub weights: &'a [f32],
}

impl<'a> SparseRow<'a> {
    /// Iterate over the `(item_id, weight)` pairs of the row.
    pub fn iter(&self) -> impl Iterator<Item = (ItemId, f32)> + 'a {
        self.item_ids
            .iter()
            .zip(self.weights.iter())
            .map(|(&item_id, &weight)| (item_id, weight))
    }

    /// Whether the row contains `item_id`.
    pub fn contains(&self, item_id: ItemId) -> bool {
        self.item_ids.binary_search(&item_id).is_ok()
    }

    /// Number of observed entries in the row.
    pub fn len(&self) -> usize {
        self.item_ids.len()
    }

    /// Whether the row has no observed entries.
    pub fn is_empty(&self) -> bool {
        self.item_ids.is_empty()
    }
}

/// Iterator over the rows of a [`SparseMatrix`].
pub struct SparseMatrixRowIterator<'a> {
    matrix: &'a SparseMatrix,
    idx: usize,
}

impl<'a> Iterator for SparseMatrixRowIterator<'a> {
    type Item = SparseRow<'a>;
    fn next(&mut self) -> Option<Self::Item> {
        let value = self.matrix.row(self.idx);
        self.idx += 1;

        value
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_xorshift::XorShiftRng;

    use super::*;
    use crate::DataError;

    #[test]
    fn dimensions_inferred_from_max_ids() {
        let interactions = Interactions::from(vec![
            Interaction::new(0, 3, 1.0),
            Interaction::new(5, 1, 2.0),
        ]);

        assert_eq!(interactions.shape(), (6, 4));
    }

    #[test]
    fn duplicates_are_summed() {
        let interactions = Interactions::from(vec![
            Interaction::new(0, 0, 3.0),
            Interaction::new(0, 1, 1.0),
            Interaction::new(0, 0, 4.0),
        ]);

        let matrix = interactions.to_sparse().unwrap();

        assert_eq!(matrix.nnz(), 2);

        let row = matrix.row(0).unwrap();
        let entries: Vec<_> = row.iter().collect();

        assert_eq!(entries, vec![(0, 7.0), (1, 1.0)]);
    }

    #[test]
    fn rows_are_sorted_by_item_id() {
        let interactions = Interactions::from(vec![
            Interaction::new(0, 5, 1.0),
            Interaction::new(0, 2, 1.0),
            Interaction::new(0, 4, 1.0),
        ]);

        let matrix = interactions.to_sparse().unwrap();
        let row = matrix.row(0).unwrap();

        assert_eq!(row.item_ids, &[2, 4, 5]);
        assert!(row.contains(4));
        assert!(!row.contains(3));
    }

    #[test]
    fn negative_weights_are_rejected() {
        let interactions = Interactions::from(vec![Interaction::new(0, 0, -1.0)]);

        match interactions.to_sparse() {
            Err(DataError::NegativeWeight { weight, .. }) => assert_eq!(weight, -1.0),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn non_finite_weights_are_rejected() {
        let interactions = Interactions::from(vec![Interaction::new(0, 0, f32::NAN)]);

        assert!(matches!(
            interactions.to_sparse(),
            Err(DataError::NonFiniteWeight { .. })
        ));
    }

    #[test]
    fn empty_interactions_are_rejected() {
        let interactions = Interactions::new(3, 3);

        assert!(matches!(
            interactions.to_sparse(),
            Err(DataError::Empty)
        ));
    }

    #[test]
    fn out_of_bounds_ids_are_rejected() {
        let mut interactions = Interactions::new(2, 2);
        interactions.push(Interaction::new(0, 0, 1.0));
        interactions.push(Interaction::new(2, 0, 1.0));

        assert!(matches!(
            interactions.to_sparse(),
            Err(DataError::OutOfBounds { user_id: 2, .. })
        ));
    }

    #[test]
    fn transpose_swaps_rows_and_columns() {
        let interactions = Interactions::from(vec![
            Interaction::new(0, 0, 5.0),
            Interaction::new(0, 1, 1.0),
            Interaction::new(1, 0, 2.0),
        ]);

        let matrix = interactions.to_sparse().unwrap();
        let transposed = matrix.transpose();

        assert_eq!(transposed.shape(), (2, 2));

        let item_0: Vec<_> = transposed.row(0).unwrap().iter().collect();
        let item_1: Vec<_> = transposed.row(1).unwrap().iter().collect();

        assert_eq!(item_0, vec![(0, 5.0), (1, 2.0)]);
        assert_eq!(item_1, vec![(0, 1.0)]);
    }

    #[test]
    fn train_test_split_preserves_interactions_and_dimensions() {
        let mut interactions = Interactions::from(
            (0..100)
                .map(|idx| Interaction::new(idx % 20, idx % 7, 1.0 + idx as f32))
                .collect::<Vec<_>>(),
        );
        let shape = interactions.shape();

        let mut rng = XorShiftRng::seed_from_u64(42);
        let (train, test) = train_test_split(&mut interactions, &mut rng, 0.2);

        assert_eq!(test.len(), 20);
        assert_eq!(train.len(), 80);
        assert_eq!(train.shape(), shape);
        assert_eq!(test.shape(), shape);

        let mut combined: Vec<_> = train
            .data()
            .iter()
            .chain(test.data().iter())
            .map(|x| (x.user_id(), x.item_id()))
            .collect();
        combined.sort_unstable();

        let mut expected: Vec<(UserId, ItemId)> = (0..100).map(|idx| (idx % 20, idx % 7)).collect();
        expected.sort_unstable();

        assert_eq!(combined, expected);
    }

    #[test]
    fn user_based_split_partitions_users() {
        let interactions = Interactions::from(
            (0..100)
                .map(|idx| Interaction::new(idx % 20, idx % 7, 1.0))
                .collect::<Vec<_>>(),
        );

        let mut rng = XorShiftRng::seed_from_u64(42);
        let (train, test) = user_based_split(&interactions, &mut rng, 0.5);

        assert_eq!(train.len() + test.len(), interactions.len());

        let train_users: Vec<_> = train.data().iter().map(|x| x.user_id()).collect();
        for interaction in test.data() {
            assert!(!train_users.contains(&interaction.user_id()));
        }
    }
}
