#![deny(missing_docs)]
//! # implicit-als
//!
//! `implicit_als` implements collaborative filtering from implicit
//! feedback: given how strongly users have interacted with items (play
//! counts, purchase counts), it factorizes the interaction matrix into
//! low-rank user and item embeddings and ranks unseen items by the dot
//! product of those embeddings.
//!
//! Training uses the alternating least squares (ALS) formulation for
//! implicit feedback: observed interactions are treated as positive
//! preferences with confidence `1 + alpha * weight`, unobserved pairs as
//! zero-preference with unit confidence.
//!
//! ## Example
//! ```rust
//! use implicit_als::RankingModel;
//! use implicit_als::data::{Interaction, Interactions};
//! use implicit_als::models::als::Hyperparameters;
//!
//! let interactions = Interactions::from(vec![
//!     Interaction::new(0, 0, 5.0),
//!     Interaction::new(0, 1, 1.0),
//!     Interaction::new(1, 0, 2.0),
//! ]);
//! let matrix = interactions.to_sparse().unwrap();
//!
//! let mut model = Hyperparameters::new(2)
//!     .regularization(0.01)
//!     .alpha(10.0)
//!     .num_iterations(15)
//!     .seed(42)
//!     .build();
//!
//! let outcome = model.fit(&matrix).unwrap();
//! assert!(outcome.is_success());
//!
//! // User 1 has only listened to item 0, so item 1 is the sole candidate.
//! let recommendations = model.recommend(1, &matrix, 5).unwrap();
//! assert_eq!(recommendations[0].item_id, 1);
//! ```
use failure::Fail;

pub mod data;
#[cfg(feature = "datasets")]
pub mod datasets;
pub mod evaluation;
pub mod models;
pub mod ranking;

pub use crate::models::{CancellationToken, FitOutcome};
pub use crate::ranking::Recommendation;

/// Alias for user indices.
pub type UserId = usize;
/// Alias for item indices.
pub type ItemId = usize;

/// Errors raised when assembling interaction data into a sparse matrix.
#[derive(Debug, Fail)]
pub enum DataError {
    /// An interaction carried a negative weight.
    #[fail(
        display = "negative weight {} for interaction (user {}, item {})",
        weight, user_id, item_id
    )]
    NegativeWeight {
        /// User id of the offending interaction.
        user_id: UserId,
        /// Item id of the offending interaction.
        item_id: ItemId,
        /// The rejected weight.
        weight: f32,
    },
    /// An interaction carried a NaN or infinite weight.
    #[fail(
        display = "non-finite weight {} for interaction (user {}, item {})",
        weight, user_id, item_id
    )]
    NonFiniteWeight {
        /// User id of the offending interaction.
        user_id: UserId,
        /// Item id of the offending interaction.
        item_id: ItemId,
        /// The rejected weight.
        weight: f32,
    },
    /// An interaction referenced an id outside the declared dimensions.
    #[fail(
        display = "interaction (user {}, item {}) lies outside a {}x{} matrix",
        user_id, item_id, num_users, num_items
    )]
    OutOfBounds {
        /// User id of the offending interaction.
        user_id: UserId,
        /// Item id of the offending interaction.
        item_id: ItemId,
        /// Declared number of users.
        num_users: usize,
        /// Declared number of items.
        num_items: usize,
    },
    /// No interactions were supplied.
    #[fail(display = "cannot build a sparse matrix from zero interactions")]
    Empty,
}

/// Errors raised while fitting a model.
#[derive(Debug, Fail)]
pub enum FittingError {
    /// A hyperparameter violated its validity constraints.
    #[fail(display = "invalid hyperparameters: {}", message)]
    InvalidHyperparameters {
        /// Which constraint was violated.
        message: &'static str,
    },
    /// A per-row system was not positive-definite, so the Cholesky
    /// solve failed. Fatal: training is aborted.
    #[fail(display = "linear system is not positive-definite")]
    SingularMatrix,
    /// The worker pool could not be constructed.
    #[fail(display = "failed to build worker pool: {}", message)]
    ThreadPool {
        /// Underlying pool construction error.
        message: String,
    },
}

/// Errors raised when computing recommendations.
#[derive(Debug, Fail)]
pub enum PredictionError {
    /// The model has not been successfully fitted yet.
    #[fail(display = "the model has not been fitted")]
    NotTrained,
    /// The requested user lies outside the trained range.
    #[fail(display = "unknown user {} (model knows {} users)", user_id, num_users)]
    UnknownUser {
        /// The requested user id.
        user_id: UserId,
        /// Number of users the model was trained on.
        num_users: usize,
    },
    /// The requested item lies outside the trained range (or is missing
    /// from a catalog).
    #[fail(display = "unknown item {}", item_id)]
    UnknownItem {
        /// The requested item id.
        item_id: ItemId,
    },
    /// The supplied interaction matrix does not match the dimensions the
    /// factors were trained with.
    #[fail(
        display = "factor dimensions {}x{} do not match matrix dimensions {}x{}",
        factor_users, factor_items, matrix_users, matrix_items
    )]
    ShapeMismatch {
        /// Users known to the factors.
        factor_users: usize,
        /// Items known to the factors.
        factor_items: usize,
        /// Users in the supplied matrix.
        matrix_users: usize,
        /// Items in the supplied matrix.
        matrix_items: usize,
    },
}

/// Errors raised when deserializing persisted factors.
#[derive(Debug, Fail)]
pub enum LoadError {
    /// Reading the underlying stream failed.
    #[fail(display = "I/O error while reading factors: {}", _0)]
    Io(#[fail(cause)] std::io::Error),
    /// The persisted header disagrees with the expected dimensions.
    #[fail(
        display = "persisted factors are {}x{} with rank {}, expected {}x{} with rank {}",
        actual_users, actual_items, actual_dim, expected_users, expected_items, expected_dim
    )]
    ShapeMismatch {
        /// Users recorded in the header.
        actual_users: usize,
        /// Items recorded in the header.
        actual_items: usize,
        /// Latent dimension recorded in the header.
        actual_dim: usize,
        /// Expected number of users.
        expected_users: usize,
        /// Expected number of items.
        expected_items: usize,
        /// Expected latent dimension.
        expected_dim: usize,
    },
}

impl From<std::io::Error> for LoadError {
    fn from(error: std::io::Error) -> Self {
        LoadError::Io(error)
    }
}

/// Trait describing recommender models trained on implicit feedback.
///
/// Alternative factorization strategies can be substituted behind this
/// interface without changing calling code.
pub trait RankingModel {
    /// Fit the model on an interaction matrix, running to one of the
    /// terminal states described by [`FitOutcome`]. Refitting always
    /// starts from a fresh initialization.
    fn fit(&mut self, interactions: &data::SparseMatrix) -> Result<FitOutcome, FittingError>;

    /// Compute up to `num_recommendations` items for `user_id`, ranked by
    /// descending score. Items the user has already interacted with in
    /// `interactions` are excluded from the candidates.
    fn recommend(
        &self,
        user_id: UserId,
        interactions: &data::SparseMatrix,
        num_recommendations: usize,
    ) -> Result<Vec<Recommendation>, PredictionError>;
}
