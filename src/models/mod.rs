//! Models module.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub mod als;

/// The terminal state reached by a training run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FitOutcome {
    /// The factor change between iterations dropped below the
    /// convergence tolerance.
    Converged {
        /// Number of iterations completed.
        iterations: usize,
        /// Frobenius-norm change of the factors in the final iteration.
        delta: f32,
    },
    /// The iteration budget was exhausted before convergence.
    MaxIterationsReached {
        /// Number of iterations completed.
        iterations: usize,
        /// Frobenius-norm change of the factors in the final iteration.
        delta: f32,
    },
    /// Training was cancelled cooperatively. The model retains whatever
    /// factors it held before the run.
    Cancelled {
        /// Number of iterations fully completed before cancellation.
        completed_iterations: usize,
    },
}

impl FitOutcome {
    /// Whether the run produced usable factors.
    pub fn is_success(&self) -> bool {
        !matches!(self, FitOutcome::Cancelled { .. })
    }
}

/// Cooperative cancellation flag for training runs.
///
/// The flag is checked only at iteration boundaries: a cancelled run
/// finishes its current iteration in full, so factors are never left
/// half-updated.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, uncancelled token.
    pub fn new() -> Self {
        CancellationToken::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
