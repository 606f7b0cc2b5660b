/*
 * Flow Functions
 *
 * The host supplies the semantics; the engine only routes. A flow function
 * maps one incoming fact to a set of target facts, each optionally carrying
 * extra constraint terminals that will be concatenated onto the incoming
 * justification and gated through the feasibility oracle.
 */

use std::fmt::Debug;

use crate::domain::AnalysisDomain;

/// One result of a flow function: a target fact plus the constraint
/// terminals its propagation incurs. An empty constraint list means the
/// target propagates immediately without consulting the oracle.
pub struct Target<D: AnalysisDomain> {
    pub fact: D::Fact,
    pub constraints: Vec<D::Terminal>,
}

impl<D: AnalysisDomain> Target<D> {
    /// Target with no extra constraints.
    pub fn unconstrained(fact: D::Fact) -> Self {
        Self {
            fact,
            constraints: Vec::new(),
        }
    }

    pub fn constrained(fact: D::Fact, constraints: Vec<D::Terminal>) -> Self {
        Self { fact, constraints }
    }
}

impl<D: AnalysisDomain> Clone for Target<D> {
    fn clone(&self) -> Self {
        Self {
            fact: self.fact.clone(),
            constraints: self.constraints.clone(),
        }
    }
}

impl<D: AnalysisDomain> Debug for Target<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("fact", &self.fact)
            .field("constraints", &self.constraints)
            .finish()
    }
}

/// Flow-function provider. Must be safe to invoke concurrently.
pub trait FlowFunctions<D: AnalysisDomain>: Send + Sync {
    /// Effect of a normal statement along the edge `stmt -> succ`.
    fn normal_flow(
        &self,
        stmt: &D::Statement,
        succ: &D::Statement,
        fact: &D::Fact,
    ) -> Vec<Target<D>>;

    /// Map a caller-side fact into a callee.
    fn call_flow(
        &self,
        call_site: &D::Statement,
        callee: &D::Procedure,
        fact: &D::Fact,
    ) -> Vec<Target<D>>;

    /// Call-site-local effects, bypassing the callee.
    fn call_to_return_flow(
        &self,
        call_site: &D::Statement,
        return_site: &D::Statement,
        fact: &D::Fact,
    ) -> Vec<Target<D>>;

    /// Map a callee exit fact back to a caller. `call_site`/`return_site`
    /// are absent for the side-effect-only invocation on a procedure with no
    /// callers.
    fn return_flow(
        &self,
        exit_stmt: &D::Statement,
        call_site: Option<&D::Statement>,
        return_site: Option<&D::Statement>,
        exit_fact: &D::Fact,
    ) -> Vec<Target<D>>;
}

/// Identity semantics: every flow passes the incoming fact through
/// unchanged, with no constraints.
pub struct IdentityFlows;

impl<D: AnalysisDomain> FlowFunctions<D> for IdentityFlows {
    fn normal_flow(&self, _: &D::Statement, _: &D::Statement, fact: &D::Fact) -> Vec<Target<D>> {
        vec![Target::unconstrained(fact.clone())]
    }

    fn call_flow(&self, _: &D::Statement, _: &D::Procedure, fact: &D::Fact) -> Vec<Target<D>> {
        vec![Target::unconstrained(fact.clone())]
    }

    fn call_to_return_flow(
        &self,
        _: &D::Statement,
        _: &D::Statement,
        fact: &D::Fact,
    ) -> Vec<Target<D>> {
        vec![Target::unconstrained(fact.clone())]
    }

    fn return_flow(
        &self,
        _: &D::Statement,
        _: Option<&D::Statement>,
        _: Option<&D::Statement>,
        exit_fact: &D::Fact,
    ) -> Vec<Target<D>> {
        vec![Target::unconstrained(exit_fact.clone())]
    }
}
