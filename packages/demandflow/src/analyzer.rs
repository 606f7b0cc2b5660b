/*
 * Per-Context Analyzer
 *
 * One instance per (procedure, source fact) pair. Owns the
 * reachable-statement memo table, the exit-summary list, the incoming-edge
 * set and the two resolver caches. Every mutable resource lives behind one
 * mutex: jobs targeting the same analyzer serialize here, jobs on different
 * analyzers run fully in parallel.
 *
 * The methods on this type are the lock-scope half of the protocol; the
 * session (solver.rs) drives flow functions, the oracle and cross-analyzer
 * traffic strictly outside this lock.
 */

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use crate::domain::{AnalysisDomain, AnalyzerKey, WrappedFact};
use crate::edge::{CallEdge, Summary};
use crate::expr::{JustExpr, MergeSymbol, SymbolKind};
use crate::merge::FactMergeHandler;

/// Outcome of offering a wrapped fact to the memo table.
pub(crate) enum MemoOutcome {
    /// First arrival: the entry was inserted and a job must be scheduled.
    Inserted,
    /// Later arrival: folded into the existing entry via the merge policy.
    Merged,
}

/// Outcome of registering an incoming call edge.
pub(crate) struct IncomingOutcome<D: AnalysisDomain> {
    /// False when the identical edge was already registered (no-op).
    pub newly_registered: bool,
    /// True when this was the analyzer's very first incoming edge.
    pub first_edge: bool,
    /// Snapshot of the summaries cached so far, for replay against the edge.
    pub summaries: Vec<Summary<D>>,
}

pub(crate) struct AnalyzerState<D: AnalysisDomain> {
    /// Live source fact: shared across all incoming edges, merged in place.
    pub source_fact: D::Fact,
    /// Memoized reachable (statement, fact) pairs with their justification.
    pub memo: FxHashMap<(D::Statement, D::Fact), WrappedFact<D>>,
    pub summaries: Vec<Summary<D>>,
    summary_keys: FxHashSet<(D::Statement, D::Fact)>,
    pub incoming: FxHashSet<CallEdge<D>>,
    pub bootstrapped: bool,
    return_resolvers: FxHashMap<(D::Fact, D::Statement), MergeSymbol<D>>,
    join_resolvers: FxHashMap<(D::Fact, D::Statement), MergeSymbol<D>>,
    /// Justifications that reached a join header before its resolver was
    /// created; drained into the symbol on creation.
    pending_join_alternatives: FxHashMap<(D::Fact, D::Statement), Vec<JustExpr<D>>>,
}

pub struct PerContextAnalyzer<D: AnalysisDomain> {
    key: AnalyzerKey<D>,
    /// Merge symbol standing for "any calling context that reaches this
    /// analyzer"; one alternative per incoming edge.
    calling_context: MergeSymbol<D>,
    state: Mutex<AnalyzerState<D>>,
}

impl<D: AnalysisDomain> PerContextAnalyzer<D> {
    pub fn new(key: AnalyzerKey<D>) -> Self {
        debug!(analyzer = ?key, "creating per-context analyzer");
        let source_fact = key.source_fact.clone();
        Self {
            key,
            calling_context: MergeSymbol::fresh(SymbolKind::CallingContext),
            state: Mutex::new(AnalyzerState {
                source_fact,
                memo: FxHashMap::default(),
                summaries: Vec::new(),
                summary_keys: FxHashSet::default(),
                incoming: FxHashSet::default(),
                bootstrapped: false,
                return_resolvers: FxHashMap::default(),
                join_resolvers: FxHashMap::default(),
                pending_join_alternatives: FxHashMap::default(),
            }),
        }
    }

    pub fn key(&self) -> &AnalyzerKey<D> {
        &self.key
    }

    pub fn procedure(&self) -> &D::Procedure {
        &self.key.procedure
    }

    pub fn calling_context(&self) -> &MergeSymbol<D> {
        &self.calling_context
    }

    pub fn source_fact(&self) -> D::Fact {
        self.state.lock().source_fact.clone()
    }

    /// Single deduplication point: insert the wrapped fact, or fold it into
    /// the existing entry. At most one `Inserted` per (statement, fact) key
    /// over the analyzer's lifetime.
    ///
    /// `join_header` reports whether the statement consolidates through a
    /// join resolver; it is only consulted on a merged arrival with no
    /// resolver yet, so callers may back it by a graph search.
    pub(crate) fn offer_memo(
        &self,
        stmt: &D::Statement,
        incoming: WrappedFact<D>,
        merge: &dyn FactMergeHandler<D>,
        join_header: impl FnOnce() -> bool,
    ) -> MemoOutcome {
        let mut state = self.state.lock();
        let key = (stmt.clone(), incoming.fact.clone());
        if let Some(existing) = state.memo.get_mut(&key) {
            merge.merge(&mut existing.fact, &incoming.fact);
            // A join resolver for this key absorbs the new justification as
            // one more alternative; without one it is parked until the join
            // job creates it. Statements that never consolidate drop the
            // justification instead of parking it forever.
            let resolver_key = (incoming.fact.clone(), stmt.clone());
            if let Some(sym) = state.join_resolvers.get(&resolver_key) {
                sym.add_alternative(incoming.justification);
            } else if join_header() {
                state
                    .pending_join_alternatives
                    .entry(resolver_key)
                    .or_default()
                    .push(incoming.justification);
            }
            return MemoOutcome::Merged;
        }
        trace!(analyzer = ?self.key, stmt = ?stmt, fact = ?incoming.fact, "memoizing reachable fact");
        state.memo.insert(key, incoming);
        MemoOutcome::Inserted
    }

    /// Justification memoized for a (statement, fact) pair, if reached.
    pub(crate) fn memoized_justification(
        &self,
        stmt: &D::Statement,
        fact: &D::Fact,
    ) -> Option<JustExpr<D>> {
        self.state
            .lock()
            .memo
            .get(&(stmt.clone(), fact.clone()))
            .map(|wf| wf.justification.clone())
    }

    pub(crate) fn is_reached(&self, stmt: &D::Statement, fact: &D::Fact) -> bool {
        self.state
            .lock()
            .memo
            .contains_key(&(stmt.clone(), fact.clone()))
    }

    /// Register an incoming call edge. Merging into the live source fact and
    /// the bootstrap decision happen here; the caller replays the returned
    /// summary snapshot and extends the calling-context symbol outside the
    /// lock.
    pub(crate) fn register_incoming(
        &self,
        edge: CallEdge<D>,
        merge: &dyn FactMergeHandler<D>,
    ) -> IncomingOutcome<D> {
        let mut state = self.state.lock();
        let first_edge = state.incoming.is_empty();
        if !state.incoming.insert(edge.clone()) {
            return IncomingOutcome {
                newly_registered: false,
                first_edge: false,
                summaries: Vec::new(),
            };
        }
        if !first_edge {
            let incoming_fact = edge.callee_source.clone();
            merge.merge(&mut state.source_fact, &incoming_fact);
        }
        IncomingOutcome {
            newly_registered: true,
            first_edge,
            summaries: state.summaries.clone(),
        }
    }

    /// Marks the bootstrap as performed; returns false if it already was.
    pub(crate) fn claim_bootstrap(&self) -> bool {
        let mut state = self.state.lock();
        if state.bootstrapped {
            false
        } else {
            state.bootstrapped = true;
            true
        }
    }

    /// Record a new exit summary. Producing the same (statement, fact) exit
    /// twice is a contract violation in the host's flow functions.
    pub(crate) fn record_summary(
        &self,
        exit_stmt: D::Statement,
        exit_fact: D::Fact,
        justification: JustExpr<D>,
    ) -> (Summary<D>, Vec<CallEdge<D>>) {
        let mut state = self.state.lock();
        let key = (exit_stmt.clone(), exit_fact.clone());
        if !state.summary_keys.insert(key) {
            panic!(
                "duplicate exit summary for analyzer {:?} at {:?} with fact {:?}",
                self.key, exit_stmt, exit_fact
            );
        }
        debug!(analyzer = ?self.key, exit = ?exit_stmt, fact = ?exit_fact, "recording summary");
        let summary = Summary::new(exit_stmt, exit_fact, justification);
        state.summaries.push(summary.clone());
        let edges = state.incoming.iter().cloned().collect();
        (summary, edges)
    }

    /// Create-once return-site resolver cache. The boolean is true exactly
    /// once per key: the caller performs the one-time scheduling side effect
    /// when it is set.
    pub(crate) fn return_resolver(
        &self,
        fact: &D::Fact,
        return_site: &D::Statement,
    ) -> (MergeSymbol<D>, bool) {
        let mut state = self.state.lock();
        let key = (fact.clone(), return_site.clone());
        if let Some(sym) = state.return_resolvers.get(&key) {
            return (sym.clone(), false);
        }
        let sym = MergeSymbol::fresh(SymbolKind::ReturnSite);
        trace!(analyzer = ?self.key, at = ?return_site, "creating return-site resolver");
        state.return_resolvers.insert(key, sym.clone());
        (sym, true)
    }

    /// Create-once control-flow-join resolver cache. On creation, every
    /// justification that was parked for this key is drained into the fresh
    /// symbol.
    pub(crate) fn join_resolver(
        &self,
        fact: &D::Fact,
        stmt: &D::Statement,
    ) -> (MergeSymbol<D>, bool) {
        let mut state = self.state.lock();
        let key = (fact.clone(), stmt.clone());
        if let Some(sym) = state.join_resolvers.get(&key) {
            return (sym.clone(), false);
        }
        let sym = MergeSymbol::fresh(SymbolKind::Join);
        trace!(analyzer = ?self.key, at = ?stmt, "creating join resolver");
        if let Some(parked) = state.pending_join_alternatives.remove(&key) {
            for alt in parked {
                sym.add_alternative(alt);
            }
        }
        state.join_resolvers.insert(key, sym.clone());
        (sym, true)
    }

    /// Snapshot of every memoized reachable (statement, fact) pair.
    pub fn reachable_pairs(&self) -> Vec<(D::Statement, D::Fact)> {
        self.state.lock().memo.keys().cloned().collect()
    }

    /// Snapshot of the cached exit summaries.
    pub fn summaries(&self) -> Vec<Summary<D>> {
        self.state.lock().summaries.clone()
    }

    /// Number of registered incoming call edges.
    pub fn num_incoming_edges(&self) -> usize {
        self.state.lock().incoming.len()
    }
}
