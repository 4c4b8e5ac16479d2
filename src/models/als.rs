//! Implicit-feedback matrix factorization trained with alternating
//! least squares.
//!
//! Each observed interaction is treated as a positive preference held
//! with confidence `1 + alpha * weight`; unobserved pairs are treated as
//! zero preferences held with unit confidence. Training alternates
//! between solving every user's k-dimensional normal equations with the
//! item factors held fixed, and vice versa:
//!
//! ```text
//! (VᵀV + λI + Σ_{i ∈ observed(u)} (c_ui − 1) v_i v_iᵀ) x_u = Σ_{i ∈ observed(u)} c_ui v_i
//! ```
//!
//! The Gramian `VᵀV` is computed once per sweep, so each row costs
//! `O(k² · |observed|)` instead of `O(k² · n_items)`.
use std::io::{self, Read, Write};

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::distributions::{Distribution, Uniform};
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CancellationToken, FitOutcome};
use crate::data::{SparseMatrix, SparseRow};
use crate::ranking::{rank_items, Recommendation};
use crate::{FittingError, ItemId, LoadError, PredictionError, RankingModel, UserId};

/// Half-width of the uniform interval used for factor initialization.
const INIT_SCALE: f32 = 0.01;

fn factor_init(rows: usize, cols: usize, rng: &mut XorShiftRng) -> Array2<f32> {
    let range = Uniform::new_inclusive(-INIT_SCALE, INIT_SCALE);
    Array2::from_shape_simple_fn((rows, cols), || range.sample(rng))
}

/// Hyperparameters describing the ALS model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Hyperparameters {
    latent_dim: usize,
    regularization: f32,
    alpha: f32,
    num_iterations: usize,
    tolerance: f32,
    seed: u64,
    num_threads: usize,
}

impl Hyperparameters {
    /// Build new hyperparameters for factors of rank `latent_dim`.
    pub fn new(latent_dim: usize) -> Self {
        Hyperparameters {
            latent_dim,
            regularization: 0.01,
            alpha: 1.0,
            num_iterations: 15,
            tolerance: 1e-5,
            seed: rand::thread_rng().gen(),
            num_threads: 1,
        }
    }

    /// Set the regularization strength (lambda).
    pub fn regularization(mut self, regularization: f32) -> Self {
        self.regularization = regularization;
        self
    }

    /// Set the confidence scaling applied to interaction weights.
    pub fn alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    /// Set the maximum number of iterations per `fit` call.
    pub fn num_iterations(mut self, num_iterations: usize) -> Self {
        self.num_iterations = num_iterations;
        self
    }

    /// Set the convergence tolerance on the per-iteration factor change.
    pub fn tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Set the seed for factor initialization.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the number of worker threads used for the per-row solves.
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    fn validate(&self) -> Result<(), FittingError> {
        let message = if self.latent_dim == 0 {
            Some("latent_dim must be positive")
        } else if self.num_iterations == 0 {
            Some("num_iterations must be positive")
        } else if self.num_threads == 0 {
            Some("num_threads must be positive")
        } else if !(self.regularization >= 0.0) {
            Some("regularization must be non-negative")
        } else if !(self.alpha >= 0.0) {
            Some("alpha must be non-negative")
        } else if !(self.tolerance >= 0.0) {
            Some("tolerance must be non-negative")
        } else {
            None
        };

        match message {
            Some(message) => Err(FittingError::InvalidHyperparameters { message }),
            None => Ok(()),
        }
    }

    /// Build the ALS model.
    pub fn build(self) -> ImplicitAlsModel {
        ImplicitAlsModel {
            hyper: self,
            factors: None,
        }
    }
}

/// The dense low-rank factor matrices of a fitted model.
#[derive(Clone, Debug)]
pub struct Factors {
    user_factors: Array2<f32>,
    item_factors: Array2<f32>,
}

impl Factors {
    fn initialize(num_users: usize, num_items: usize, latent_dim: usize, seed: u64) -> Self {
        let mut rng = XorShiftRng::seed_from_u64(seed);

        Factors {
            user_factors: factor_init(num_users, latent_dim, &mut rng),
            item_factors: factor_init(num_items, latent_dim, &mut rng),
        }
    }

    /// Read-only view of the user factor matrix (`num_users` x rank).
    pub fn user_factors(&self) -> ArrayView2<'_, f32> {
        self.user_factors.view()
    }

    /// Read-only view of the item factor matrix (`num_items` x rank).
    pub fn item_factors(&self) -> ArrayView2<'_, f32> {
        self.item_factors.view()
    }

    /// The factor vector of a single user, if the id is in range.
    pub fn user_vector(&self, user_id: UserId) -> Option<ArrayView1<'_, f32>> {
        if user_id < self.num_users() {
            Some(self.user_factors.row(user_id))
        } else {
            None
        }
    }

    /// The factor vector of a single item, if the id is in range.
    pub fn item_vector(&self, item_id: ItemId) -> Option<ArrayView1<'_, f32>> {
        if item_id < self.num_items() {
            Some(self.item_factors.row(item_id))
        } else {
            None
        }
    }

    /// Number of user rows.
    pub fn num_users(&self) -> usize {
        self.user_factors.nrows()
    }

    /// Number of item rows.
    pub fn num_items(&self) -> usize {
        self.item_factors.nrows()
    }

    /// The shared rank of the factor vectors.
    pub fn latent_dim(&self) -> usize {
        self.user_factors.ncols()
    }

    /// Persist the factors: a `(num_users, num_items, latent_dim)`
    /// header of little-endian u64 followed by the user factors and the
    /// item factors as row-major little-endian f32.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        for &dim in &[self.num_users(), self.num_items(), self.latent_dim()] {
            writer.write_all(&(dim as u64).to_le_bytes())?;
        }

        for &value in self.user_factors.iter().chain(self.item_factors.iter()) {
            writer.write_all(&value.to_le_bytes())?;
        }

        Ok(())
    }

    /// Read factors persisted by [`Factors::write_to`].
    ///
    /// The header is checked against the expected dimensions before any
    /// payload is read, so a corrupt or mismatched header fails with
    /// [`LoadError::ShapeMismatch`] instead of producing factors of the
    /// wrong shape.
    pub fn read_from<R: Read>(
        reader: &mut R,
        expected_users: usize,
        expected_items: usize,
        expected_dim: usize,
    ) -> Result<Self, LoadError> {
        let (num_users, num_items, latent_dim) = read_header(reader)?;

        if num_users != expected_users
            || num_items != expected_items
            || latent_dim != expected_dim
        {
            return Err(LoadError::ShapeMismatch {
                actual_users: num_users,
                actual_items: num_items,
                actual_dim: latent_dim,
                expected_users,
                expected_items,
                expected_dim,
            });
        }

        read_payload(reader, num_users, num_items, latent_dim)
    }
}

fn read_header<R: Read>(reader: &mut R) -> Result<(usize, usize, usize), LoadError> {
    let mut buffer = [0; 8];
    let mut dims = [0usize; 3];

    for dim in dims.iter_mut() {
        reader.read_exact(&mut buffer)?;
        *dim = u64::from_le_bytes(buffer) as usize;
    }

    Ok((dims[0], dims[1], dims[2]))
}

fn read_payload<R: Read>(
    reader: &mut R,
    num_users: usize,
    num_items: usize,
    latent_dim: usize,
) -> Result<Factors, LoadError> {
    let mut read_matrix = |rows: usize| -> Result<Array2<f32>, LoadError> {
        let mut buffer = [0; 4];
        let mut values = Vec::with_capacity(rows * latent_dim);

        for _ in 0..rows * latent_dim {
            reader.read_exact(&mut buffer)?;
            values.push(f32::from_le_bytes(buffer));
        }

        Ok(Array2::from_shape_vec((rows, latent_dim), values)
            .expect("buffer length matches shape"))
    };

    let user_factors = read_matrix(num_users)?;
    let item_factors = read_matrix(num_items)?;

    Ok(Factors {
        user_factors,
        item_factors,
    })
}

/// Solve `A x = b` for a symmetric positive-definite `A` via Cholesky
/// decomposition. Accumulation happens in f64.
fn cholesky_solve(a: Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>, FittingError> {
    let n = a.nrows();
    let mut lower = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += lower[[i, k]] * lower[[j, k]];
            }

            if i == j {
                let diagonal = a[[i, i]] - sum;
                if diagonal <= 0.0 || !diagonal.is_finite() {
                    return Err(FittingError::SingularMatrix);
                }
                lower[[i, j]] = diagonal.sqrt();
            } else {
                lower[[i, j]] = (a[[i, j]] - sum) / lower[[j, j]];
            }
        }
    }

    // Forward substitution: L y = b.
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += lower[[i, j]] * y[j];
        }
        y[i] = (b[i] - sum) / lower[[i, i]];
    }

    // Backward substitution: Lᵀ x = y.
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += lower[[j, i]] * x[j];
        }
        x[i] = (y[i] - sum) / lower[[i, i]];
    }

    Ok(x)
}

fn gramian(factors: &Array2<f32>) -> Array2<f64> {
    let wide = factors.mapv(f64::from);

    wide.t().dot(&wide)
}

fn solve_row(
    gram: &Array2<f64>,
    fixed: &Array2<f32>,
    row: &SparseRow<'_>,
    alpha: f32,
) -> Result<Vec<f32>, FittingError> {
    let latent_dim = fixed.ncols();

    if row.is_empty() {
        // With no observations the system reduces to (Gram + lambda I) x = 0,
        // whose unique solution is the zero vector.
        return Ok(vec![0.0; latent_dim]);
    }

    let mut a = gram.clone();
    let mut b = Array1::<f64>::zeros(latent_dim);

    for (fixed_id, weight) in row.iter() {
        let vector = fixed.row(fixed_id);
        let confidence = 1.0 + f64::from(alpha) * f64::from(weight);

        for i in 0..latent_dim {
            let value = f64::from(vector[i]);
            b[i] += confidence * value;

            for j in 0..latent_dim {
                a[[i, j]] += (confidence - 1.0) * value * f64::from(vector[j]);
            }
        }
    }

    let solution = cholesky_solve(a, &b)?;

    Ok(solution.iter().map(|&x| x as f32).collect())
}

/// One half-iteration: re-solve every row of one factor matrix with the
/// other held fixed. Rows are independent and solved in parallel; the
/// ordered `collect` is the sweep barrier.
fn solve_sweep(
    rows: &SparseMatrix,
    fixed: &Array2<f32>,
    regularization: f32,
    alpha: f32,
) -> Result<Array2<f32>, FittingError> {
    let latent_dim = fixed.ncols();

    let mut gram = gramian(fixed);
    for idx in 0..latent_dim {
        gram[[idx, idx]] += f64::from(regularization);
    }

    let row_refs: Vec<SparseRow<'_>> = rows.iter_rows().collect();
    let solved: Vec<Vec<f32>> = row_refs
        .par_iter()
        .map(|row| solve_row(&gram, fixed, row, alpha))
        .collect::<Result<Vec<_>, FittingError>>()?;

    let mut result = Array2::<f32>::zeros((rows.num_users(), latent_dim));
    for (mut target, values) in result.outer_iter_mut().zip(solved) {
        for (destination, value) in target.iter_mut().zip(values) {
            *destination = value;
        }
    }

    Ok(result)
}

fn frobenius_delta(old: &Array2<f32>, new: &Array2<f32>) -> f32 {
    let sum: f64 = old
        .iter()
        .zip(new.iter())
        .map(|(&a, &b)| {
            let diff = f64::from(a) - f64::from(b);
            diff * diff
        })
        .sum();

    sum.sqrt() as f32
}

/// An implicit-feedback ALS recommender.
///
/// Built from [`Hyperparameters::build`]; holds no factors until the
/// first successful `fit`.
#[derive(Clone, Debug)]
pub struct ImplicitAlsModel {
    hyper: Hyperparameters,
    factors: Option<Factors>,
}

impl ImplicitAlsModel {
    /// The hyperparameters the model was configured with.
    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyper
    }

    /// The fitted factors, if any successful fit has completed.
    pub fn factors(&self) -> Option<&Factors> {
        self.factors.as_ref()
    }

    /// Fit the model, checking `token` at every iteration boundary.
    ///
    /// A cancelled run finishes its current iteration, returns
    /// [`FitOutcome::Cancelled`] and leaves any previously fitted factors
    /// in place. Successful runs replace the previous factors wholesale.
    pub fn fit_cancellable(
        &mut self,
        interactions: &SparseMatrix,
        token: &CancellationToken,
    ) -> Result<FitOutcome, FittingError> {
        self.hyper.validate()?;

        let transposed = interactions.transpose();
        let mut factors = Factors::initialize(
            interactions.num_users(),
            interactions.num_items(),
            self.hyper.latent_dim,
            self.hyper.seed,
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.hyper.num_threads)
            .build()
            .map_err(|error| FittingError::ThreadPool {
                message: error.to_string(),
            })?;

        let mut outcome = None;
        let mut delta = f32::INFINITY;

        for iteration in 0..self.hyper.num_iterations {
            if token.is_cancelled() {
                outcome = Some(FitOutcome::Cancelled {
                    completed_iterations: iteration,
                });
                break;
            }

            let (new_user_factors, new_item_factors) =
                pool.install(|| -> Result<_, FittingError> {
                    let new_user_factors = solve_sweep(
                        interactions,
                        &factors.item_factors,
                        self.hyper.regularization,
                        self.hyper.alpha,
                    )?;
                    // The item sweep reads the freshly solved user factors.
                    let new_item_factors = solve_sweep(
                        &transposed,
                        &new_user_factors,
                        self.hyper.regularization,
                        self.hyper.alpha,
                    )?;

                    Ok((new_user_factors, new_item_factors))
                })?;

            delta = frobenius_delta(&factors.user_factors, &new_user_factors)
                + frobenius_delta(&factors.item_factors, &new_item_factors);

            factors.user_factors = new_user_factors;
            factors.item_factors = new_item_factors;

            debug!(
                iteration,
                delta = f64::from(delta),
                "completed ALS iteration"
            );

            if delta < self.hyper.tolerance {
                outcome = Some(FitOutcome::Converged {
                    iterations: iteration + 1,
                    delta,
                });
                break;
            }
        }

        let outcome = outcome.unwrap_or(FitOutcome::MaxIterationsReached {
            iterations: self.hyper.num_iterations,
            delta,
        });

        if outcome.is_success() {
            self.factors = Some(factors);
        }

        Ok(outcome)
    }

    /// Compute up to `num_recommendations` ranked items for `user_id`,
    /// optionally keeping items the user has already interacted with in
    /// the candidate set.
    pub fn recommend_with(
        &self,
        user_id: UserId,
        interactions: &SparseMatrix,
        num_recommendations: usize,
        exclude_seen: bool,
    ) -> Result<Vec<Recommendation>, PredictionError> {
        let factors = self.factors.as_ref().ok_or(PredictionError::NotTrained)?;

        if factors.num_users() != interactions.num_users()
            || factors.num_items() != interactions.num_items()
        {
            return Err(PredictionError::ShapeMismatch {
                factor_users: factors.num_users(),
                factor_items: factors.num_items(),
                matrix_users: interactions.num_users(),
                matrix_items: interactions.num_items(),
            });
        }

        let user_vector = factors
            .user_vector(user_id)
            .ok_or(PredictionError::UnknownUser {
                user_id,
                num_users: factors.num_users(),
            })?;
        let row = interactions
            .row(user_id)
            .ok_or(PredictionError::UnknownUser {
                user_id,
                num_users: factors.num_users(),
            })?;

        let seen = if exclude_seen { Some(&row) } else { None };

        Ok(rank_items(
            user_vector,
            factors.item_factors(),
            seen,
            num_recommendations,
        ))
    }

    /// The fitted factor vector of a user.
    pub fn user_vector(&self, user_id: UserId) -> Result<ArrayView1<'_, f32>, PredictionError> {
        let factors = self.factors.as_ref().ok_or(PredictionError::NotTrained)?;

        factors
            .user_vector(user_id)
            .ok_or(PredictionError::UnknownUser {
                user_id,
                num_users: factors.num_users(),
            })
    }

    /// The fitted factor vector of an item.
    pub fn item_vector(&self, item_id: ItemId) -> Result<ArrayView1<'_, f32>, PredictionError> {
        let factors = self.factors.as_ref().ok_or(PredictionError::NotTrained)?;

        factors
            .item_vector(item_id)
            .ok_or(PredictionError::UnknownItem { item_id })
    }

    /// Load persisted factors, validating the header against the model's
    /// configured rank and the dimensions of `interactions` before any
    /// payload is accepted.
    pub fn load_factors<R: Read>(
        &mut self,
        reader: &mut R,
        interactions: &SparseMatrix,
    ) -> Result<(), LoadError> {
        self.factors = Some(Factors::read_from(
            reader,
            interactions.num_users(),
            interactions.num_items(),
            self.hyper.latent_dim,
        )?);

        Ok(())
    }
}

impl RankingModel for ImplicitAlsModel {
    fn fit(&mut self, interactions: &SparseMatrix) -> Result<FitOutcome, FittingError> {
        self.fit_cancellable(interactions, &CancellationToken::new())
    }

    fn recommend(
        &self,
        user_id: UserId,
        interactions: &SparseMatrix,
        num_recommendations: usize,
    ) -> Result<Vec<Recommendation>, PredictionError> {
        self.recommend_with(user_id, interactions, num_recommendations, true)
    }
}
