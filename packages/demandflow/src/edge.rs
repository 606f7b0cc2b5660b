/*
 * Call Edges and Summaries
 *
 * A call edge links a caller analyzer's fact at a call site to a callee
 * source fact; summaries cache a callee's exit conditions so later callers
 * replay them instead of re-running the callee.
 */

use std::fmt::Debug;
use std::hash::{Hash, Hasher};

use crate::domain::{AnalysisDomain, AnalyzerKey, WrappedFact};
use crate::expr::JustExpr;

/// One concrete interprocedural edge.
///
/// Equality and hashing cover (caller analyzer, call-site fact, callee
/// source fact). The justification is excluded so the same edge reached
/// along different paths is registered once.
pub struct CallEdge<D: AnalysisDomain> {
    /// The caller's analyzer identity.
    pub caller: AnalyzerKey<D>,
    /// The call statement in the caller.
    pub call_site: D::Statement,
    /// Fact (with justification) at the call site.
    pub caller_fact: WrappedFact<D>,
    /// Source fact the callee analyzer was entered with.
    pub callee_source: D::Fact,
}

impl<D: AnalysisDomain> CallEdge<D> {
    pub fn new(
        caller: AnalyzerKey<D>,
        call_site: D::Statement,
        caller_fact: WrappedFact<D>,
        callee_source: D::Fact,
    ) -> Self {
        Self {
            caller,
            call_site,
            caller_fact,
            callee_source,
        }
    }

    /// The caller analyzer's own source fact.
    pub fn caller_source_fact(&self) -> &D::Fact {
        &self.caller.source_fact
    }
}

impl<D: AnalysisDomain> Clone for CallEdge<D> {
    fn clone(&self) -> Self {
        Self {
            caller: self.caller.clone(),
            call_site: self.call_site.clone(),
            caller_fact: self.caller_fact.clone(),
            callee_source: self.callee_source.clone(),
        }
    }
}

impl<D: AnalysisDomain> PartialEq for CallEdge<D> {
    fn eq(&self, other: &Self) -> bool {
        self.caller == other.caller
            && self.call_site == other.call_site
            && self.caller_fact.fact == other.caller_fact.fact
            && self.callee_source == other.callee_source
    }
}

impl<D: AnalysisDomain> Eq for CallEdge<D> {}

impl<D: AnalysisDomain> Hash for CallEdge<D> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.caller.hash(state);
        self.call_site.hash(state);
        self.caller_fact.fact.hash(state);
        self.callee_source.hash(state);
    }
}

impl<D: AnalysisDomain> Debug for CallEdge<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallEdge")
            .field("caller", &self.caller)
            .field("call_site", &self.call_site)
            .field("caller_fact", &self.caller_fact.fact)
            .field("callee_source", &self.callee_source)
            .finish()
    }
}

/// A cached exit condition of a per-context analyzer.
pub struct Summary<D: AnalysisDomain> {
    pub exit_stmt: D::Statement,
    pub exit_fact: D::Fact,
    pub justification: JustExpr<D>,
    /// Precomputed: whether applying this summary to a fresh incoming edge
    /// still needs a feasibility check. False only when the justification
    /// carries no constraints at all.
    pub requires_check: bool,
}

impl<D: AnalysisDomain> Summary<D> {
    pub fn new(exit_stmt: D::Statement, exit_fact: D::Fact, justification: JustExpr<D>) -> Self {
        let requires_check = justification.is_constrained();
        Self {
            exit_stmt,
            exit_fact,
            justification,
            requires_check,
        }
    }
}

impl<D: AnalysisDomain> Clone for Summary<D> {
    fn clone(&self) -> Self {
        Self {
            exit_stmt: self.exit_stmt.clone(),
            exit_fact: self.exit_fact.clone(),
            justification: self.justification.clone(),
            requires_check: self.requires_check,
        }
    }
}

impl<D: AnalysisDomain> Debug for Summary<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Summary")
            .field("exit_stmt", &self.exit_stmt)
            .field("exit_fact", &self.exit_fact)
            .field("requires_check", &self.requires_check)
            .finish()
    }
}
