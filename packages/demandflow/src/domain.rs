/*
 * Analysis Domain
 *
 * The opaque user types the engine is parameterized over, bundled into one
 * trait so every solver structure takes a single type parameter.
 *
 * - Fact: abstract program-state value (must support equality; facts with
 *   internal state are updated in place through the merge handler)
 * - Statement / Procedure: program-point and procedure identifiers from the
 *   host CFG
 * - Terminal: one constraint symbol of the justification language
 */

use std::fmt::Debug;
use std::hash::Hash;

use crate::expr::JustExpr;

/// Bundle of the host-supplied types a tabulation run operates on.
///
/// All types are required to be cheap-ish to clone: the engine clones facts
/// and statements into its memo tables, call edges and summaries.
pub trait AnalysisDomain: Send + Sync + 'static {
    /// Dataflow fact (abstract domain element).
    type Fact: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    /// Program point identifier.
    type Statement: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    /// Procedure identifier.
    type Procedure: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    /// Terminal symbol of the justification constraint language.
    type Terminal: Clone + Eq + Hash + Debug + Send + Sync + 'static;
}

/// A fact paired with the justification under which it is valid.
///
/// The (statement, fact) pair *without* the justification is the memoization
/// key; the justification rides along and is only ever extended by
/// concatenation, never mutated.
pub struct WrappedFact<D: AnalysisDomain> {
    pub fact: D::Fact,
    pub justification: JustExpr<D>,
}

impl<D: AnalysisDomain> WrappedFact<D> {
    pub fn new(fact: D::Fact, justification: JustExpr<D>) -> Self {
        Self {
            fact,
            justification,
        }
    }

    /// Wrap a fact with the empty (solved) justification.
    pub fn unconditional(fact: D::Fact) -> Self {
        Self {
            fact,
            justification: JustExpr::Solved,
        }
    }
}

impl<D: AnalysisDomain> Clone for WrappedFact<D> {
    fn clone(&self) -> Self {
        Self {
            fact: self.fact.clone(),
            justification: self.justification.clone(),
        }
    }
}

impl<D: AnalysisDomain> Debug for WrappedFact<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappedFact")
            .field("fact", &self.fact)
            .field("justification", &self.justification)
            .finish()
    }
}

/// Identity of a per-context analyzer: one per (procedure, source fact).
///
/// The key carries the source fact as it was when the analyzer was created;
/// later incoming edges may merge into the analyzer's live source fact
/// without changing its identity.
pub struct AnalyzerKey<D: AnalysisDomain> {
    pub procedure: D::Procedure,
    pub source_fact: D::Fact,
}

impl<D: AnalysisDomain> AnalyzerKey<D> {
    pub fn new(procedure: D::Procedure, source_fact: D::Fact) -> Self {
        Self {
            procedure,
            source_fact,
        }
    }
}

impl<D: AnalysisDomain> Clone for AnalyzerKey<D> {
    fn clone(&self) -> Self {
        Self {
            procedure: self.procedure.clone(),
            source_fact: self.source_fact.clone(),
        }
    }
}

impl<D: AnalysisDomain> PartialEq for AnalyzerKey<D> {
    fn eq(&self, other: &Self) -> bool {
        self.procedure == other.procedure && self.source_fact == other.source_fact
    }
}

impl<D: AnalysisDomain> Eq for AnalyzerKey<D> {}

impl<D: AnalysisDomain> Hash for AnalyzerKey<D> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.procedure.hash(state);
        self.source_fact.hash(state);
    }
}

impl<D: AnalysisDomain> Debug for AnalyzerKey<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyzerKey")
            .field("procedure", &self.procedure)
            .field("source_fact", &self.source_fact)
            .finish()
    }
}
