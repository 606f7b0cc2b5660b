/*
 * Fact-Merge Policy
 *
 * Invoked when a second arrival folds into an existing memo entry, when an
 * additional incoming edge merges into an analyzer's source fact, and when a
 * summary-derived return edge needs caller-side state reattached.
 */

use crate::domain::AnalysisDomain;

pub trait FactMergeHandler<D: AnalysisDomain>: Send + Sync {
    /// Fold `incoming` into `existing` in place. `existing` is the fact the
    /// memo table (or analyzer source) already holds.
    fn merge(&self, existing: &mut D::Fact, incoming: &D::Fact);

    /// Reattach caller-side information the callee abstraction discarded.
    /// `returned` is the fact flowing to the return site; `call_site_fact`
    /// is the caller's fact at the originating call site.
    fn restore_calling_context(&self, returned: &mut D::Fact, call_site_fact: &D::Fact);
}

/// Merge policy that keeps the existing fact untouched. Suitable for domains
/// whose facts carry no internal merge state.
pub struct NullMergeHandler;

impl<D: AnalysisDomain> FactMergeHandler<D> for NullMergeHandler {
    fn merge(&self, _existing: &mut D::Fact, _incoming: &D::Fact) {}

    fn restore_calling_context(&self, _returned: &mut D::Fact, _call_site_fact: &D::Fact) {}
}
