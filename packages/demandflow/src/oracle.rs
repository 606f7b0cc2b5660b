/*
 * Feasibility Oracle Interface
 *
 * An over-approximating satisfiability checker over justification
 * expressions. The engine submits a candidate together with an acceptance
 * predicate and a solved callback; the oracle notifies at most once, on
 * success. Silence means infeasible and is not an error.
 *
 * The concrete grammar/automaton algorithm is out of scope; PermissiveOracle
 * implements the contract trivially and is what most tests plug in.
 */

use std::sync::Arc;

use crate::domain::AnalysisDomain;
use crate::expr::JustExpr;

/// Structural predicate applied before the language check. Candidates it
/// rejects are infeasible regardless of the grammar.
pub type AcceptancePredicate<D> = Arc<dyn Fn(&JustExpr<D>) -> bool + Send + Sync>;

/// Invoked exactly once if the candidate is found satisfiable. The engine
/// always wraps re-entry in a scheduled job, so oracles are free to call
/// this synchronously from `check`.
pub type SolvedCallback = Box<dyn FnOnce() + Send + 'static>;

pub trait FeasibilityOracle<D: AnalysisDomain>: Send + Sync {
    /// Over-approximate the candidate to keep the membership check
    /// decidable. The default is the identity.
    fn approximate(&self, candidate: JustExpr<D>) -> JustExpr<D> {
        candidate
    }

    /// Asynchronous satisfiability check. Implementations must either drop
    /// the callback (infeasible) or invoke it exactly once.
    fn check(&self, candidate: &JustExpr<D>, accept: AcceptancePredicate<D>, on_solved: SolvedCallback);
}

/// Oracle that treats every candidate passing the acceptance predicate as
/// satisfiable, synchronously.
pub struct PermissiveOracle;

impl<D: AnalysisDomain> FeasibilityOracle<D> for PermissiveOracle {
    fn check(
        &self,
        candidate: &JustExpr<D>,
        accept: AcceptancePredicate<D>,
        on_solved: SolvedCallback,
    ) {
        if accept(candidate) {
            on_solved();
        }
    }
}

/// Oracle that never reports solved. Propagation gated on it simply does
/// not happen, the expected non-event of an infeasible justification.
pub struct RefusingOracle;

impl<D: AnalysisDomain> FeasibilityOracle<D> for RefusingOracle {
    fn check(&self, _: &JustExpr<D>, _: AcceptancePredicate<D>, _: SolvedCallback) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestDomain;

    impl AnalysisDomain for TestDomain {
        type Fact = String;
        type Statement = String;
        type Procedure = String;
        type Terminal = String;
    }

    #[test]
    fn permissive_notifies_once_when_accepted() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        let oracle = PermissiveOracle;
        FeasibilityOracle::<TestDomain>::check(
            &oracle,
            &JustExpr::terminals(vec!["f".to_string()]),
            Arc::new(|_| true),
            Box::new(move || {
                fired2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn permissive_respects_acceptance_predicate() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        let oracle = PermissiveOracle;
        FeasibilityOracle::<TestDomain>::check(
            &oracle,
            &JustExpr::Solved,
            Arc::new(|_| false),
            Box::new(move || {
                fired2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
