/*
 * Solver Errors
 *
 * Contract violations (duplicate summaries, unregistered statements) abort
 * via panic: they are programming errors in the host's flow functions or CFG
 * adapter and the fixed point cannot soundly continue. Everything the host
 * can observe as a value goes through SolverError.
 */

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SolverError {
    /// A job panicked; the panic payload is carried as text. The fixed-point
    /// state is partial and must not be queried for soundness-critical
    /// results.
    #[error("analysis job failed: {0}")]
    JobFailure(String),

    /// The problem carried no initial seeds.
    #[error("tabulation problem has no initial seeds")]
    NoSeeds,
}
