/*
 * Demand-Driven Tabulation Engine
 *
 * Fixed-point solver over per-context analyzers:
 * 1. Seeds are injected as (statement, fact) pairs and scheduled as jobs on
 *    the owning analyzer.
 * 2. A job classifies its statement (call / exit / normal) and routes the
 *    flow-function results: call edges into callee analyzers, exit facts
 *    into summaries, normal facts to successors.
 * 3. Summaries propagate to every current and future caller; loop headers
 *    consolidate alternative paths through join resolvers; constrained
 *    propagation suspends on the feasibility oracle.
 * 4. The run terminates at global quiescence of the scheduler.
 *
 * Lock discipline: per-analyzer state is touched only through the analyzer's
 * own mutex, and no job ever holds two analyzer locks at once. Re-entry from
 * oracle callbacks goes through the scheduler, never recursively.
 *
 * References:
 * - Reps, Horwitz, Sagiv (1995): "Precise Interprocedural Dataflow Analysis
 *   via Graph Reachability"
 * - Naeem, Lhoták, Rodriguez (2010): "Practical Extensions to the IFDS
 *   Algorithm"
 */

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use crate::analyzer::{MemoOutcome, PerContextAnalyzer};
use crate::domain::{AnalysisDomain, AnalyzerKey, WrappedFact};
use crate::edge::{CallEdge, Summary};
use crate::error::SolverError;
use crate::expr::JustExpr;
use crate::flow::{FlowFunctions, Target};
use crate::icfg::InterproceduralCfg;
use crate::merge::FactMergeHandler;
use crate::oracle::{AcceptancePredicate, FeasibilityOracle, SolvedCallback};
use crate::scheduler::Scheduler;

/// Everything a tabulation run needs: the collaborators, the neutral fact,
/// the seeds and the behavioral switches.
pub struct TabulationProblem<D: AnalysisDomain> {
    pub icfg: Arc<dyn InterproceduralCfg<D>>,
    pub flows: Arc<dyn FlowFunctions<D>>,
    pub merge: Arc<dyn FactMergeHandler<D>>,
    pub oracle: Arc<dyn FeasibilityOracle<D>>,
    /// The neutral/zero fact. Analyzers whose source fact equals it skip
    /// bootstrap and may follow returns past seeds.
    pub zero_fact: D::Fact,
    /// Initial (statement, fact) pairs.
    pub seeds: Vec<(D::Statement, D::Fact)>,
    /// Propagate unbalanced returns from zero-fact exits to every caller.
    pub follow_returns_past_seeds: bool,
    /// Record (instead of discard) return-flow targets produced by the
    /// side-effect-only invocation when an exiting procedure has no callers.
    pub record_unbalanced_targets: bool,
}

/// Shared state of one analysis run. Created by [`TabulationSession::run`],
/// then queried for the memoized reachable pairs and summaries.
pub struct TabulationSession<D: AnalysisDomain> {
    icfg: Arc<dyn InterproceduralCfg<D>>,
    flows: Arc<dyn FlowFunctions<D>>,
    merge: Arc<dyn FactMergeHandler<D>>,
    oracle: Arc<dyn FeasibilityOracle<D>>,
    scheduler: Arc<dyn Scheduler>,
    zero_fact: D::Fact,
    follow_returns_past_seeds: bool,
    record_unbalanced_targets: bool,
    analyzers: DashMap<AnalyzerKey<D>, Arc<PerContextAnalyzer<D>>>,
    unbalanced_targets: Mutex<Vec<(D::Statement, D::Fact)>>,
}

impl<D: AnalysisDomain> TabulationSession<D> {
    /// Run the problem to its fixed point on the given scheduler.
    pub fn run(
        problem: TabulationProblem<D>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Arc<Self>, SolverError> {
        let session = Self::start(problem, scheduler)?;
        session.scheduler.run_and_await_completion()?;
        Ok(session)
    }

    /// Inject the seeds without awaiting quiescence. Used to share one
    /// scheduler between several sessions; the caller drives the scheduler
    /// to completion itself.
    pub fn start(
        problem: TabulationProblem<D>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Arc<Self>, SolverError> {
        if problem.seeds.is_empty() {
            return Err(SolverError::NoSeeds);
        }
        let session = Arc::new(Self {
            icfg: problem.icfg,
            flows: problem.flows,
            merge: problem.merge,
            oracle: problem.oracle,
            scheduler,
            zero_fact: problem.zero_fact,
            follow_returns_past_seeds: problem.follow_returns_past_seeds,
            record_unbalanced_targets: problem.record_unbalanced_targets,
            analyzers: DashMap::new(),
            unbalanced_targets: Mutex::new(Vec::new()),
        });
        for (stmt, fact) in problem.seeds {
            session.add_initial_seed(stmt, fact);
        }
        Ok(session)
    }

    /// Schedule the given fact at `stmt` in its owning analyzer.
    pub fn add_initial_seed(self: &Arc<Self>, stmt: D::Statement, fact: D::Fact) {
        let procedure = self.icfg.procedure_of(&stmt);
        let key = AnalyzerKey::new(procedure, fact.clone());
        debug!(seed = ?stmt, fact = ?fact, "injecting seed");
        self.schedule_edge(&key, stmt, WrappedFact::unconditional(fact));
    }

    /// Get-or-create the analyzer for a key. The factory runs under the
    /// arena's entry lock, so analyzer creation is create-once even under
    /// concurrent lookups.
    fn analyzer(&self, key: &AnalyzerKey<D>) -> Arc<PerContextAnalyzer<D>> {
        self.analyzers
            .entry(key.clone())
            .or_insert_with(|| Arc::new(PerContextAnalyzer::new(key.clone())))
            .clone()
    }

    /// The single deduplication point (`schedule_edge_to` of the contract):
    /// first arrival memoizes and submits a job, later arrivals fold into
    /// the existing entry.
    fn schedule_edge(self: &Arc<Self>, key: &AnalyzerKey<D>, stmt: D::Statement, wf: WrappedFact<D>) {
        let analyzer = self.analyzer(key);
        let fact = wf.fact.clone();
        match analyzer.offer_memo(&stmt, wf, &*self.merge, || self.is_loop_header(&stmt)) {
            MemoOutcome::Inserted => {
                let session = Arc::clone(self);
                let key = key.clone();
                self.scheduler.schedule(Box::new(move || {
                    session.process(key, stmt, fact);
                }));
            }
            MemoOutcome::Merged => {}
        }
    }

    /// Job body: one memoized (statement, fact) pair of one analyzer.
    fn process(self: &Arc<Self>, key: AnalyzerKey<D>, stmt: D::Statement, fact: D::Fact) {
        let analyzer = self.analyzer(&key);
        let Some(justification) = analyzer.memoized_justification(&stmt, &fact) else {
            return;
        };
        trace!(analyzer = ?key, stmt = ?stmt, fact = ?fact, "processing");
        if self.icfg.is_call(&stmt) {
            self.process_call(&key, &stmt, &fact, &justification);
        } else if self.icfg.is_exit(&stmt) {
            self.process_exit(&key, &analyzer, stmt, fact, justification);
        } else {
            self.process_normal(&key, &analyzer, stmt, fact, justification);
        }
    }

    /// Call statement: register call edges into each callee and, separately,
    /// model call-site-local effects through the call-to-return flow without
    /// waiting on interprocedural summaries.
    fn process_call(
        self: &Arc<Self>,
        key: &AnalyzerKey<D>,
        stmt: &D::Statement,
        fact: &D::Fact,
        justification: &JustExpr<D>,
    ) {
        for callee in self.icfg.callees(stmt) {
            for target in self.flows.call_flow(stmt, &callee, fact) {
                let callee_key = AnalyzerKey::new(callee.clone(), target.fact.clone());
                let edge = CallEdge::new(
                    key.clone(),
                    stmt.clone(),
                    WrappedFact::new(fact.clone(), justification.concatenate(&target.constraints)),
                    target.fact,
                );
                self.add_incoming_edge(&callee_key, edge);
            }
        }
        for return_site in self.icfg.return_sites(stmt) {
            for target in self.flows.call_to_return_flow(stmt, &return_site, fact) {
                self.propagate_gated(key, justification, target, return_site.clone());
            }
        }
    }

    /// Register a caller on a callee analyzer: bootstrap on the first
    /// non-neutral edge, source-fact merge on later ones, one
    /// calling-context alternative per edge, then replay of every cached
    /// summary so callers arriving after a summary still receive it.
    fn add_incoming_edge(self: &Arc<Self>, callee_key: &AnalyzerKey<D>, edge: CallEdge<D>) {
        let callee = self.analyzer(callee_key);
        let outcome = callee.register_incoming(edge.clone(), &*self.merge);
        if !outcome.newly_registered {
            return;
        }
        debug!(callee = ?callee_key, edge = ?edge, "incoming call edge");

        let caller = self.analyzer(&edge.caller);
        callee.calling_context().add_alternative(JustExpr::compose(
            JustExpr::symbol(caller.calling_context().clone()),
            edge.caller_fact.justification.clone(),
        ));

        if outcome.first_edge
            && callee_key.source_fact != self.zero_fact
            && callee.claim_bootstrap()
        {
            for start in self.icfg.start_points(&callee_key.procedure) {
                self.schedule_edge(
                    callee_key,
                    start,
                    WrappedFact::unconditional(callee_key.source_fact.clone()),
                );
            }
        }

        for summary in outcome.summaries {
            self.apply_summary(callee_key, &edge, &summary);
        }
    }

    /// Exit statement: record the summary (asserted unique), apply it to all
    /// currently known incoming edges, and optionally follow the return past
    /// the seeds for the neutral fact.
    fn process_exit(
        self: &Arc<Self>,
        key: &AnalyzerKey<D>,
        analyzer: &PerContextAnalyzer<D>,
        stmt: D::Statement,
        fact: D::Fact,
        justification: JustExpr<D>,
    ) {
        let (summary, edges) = analyzer.record_summary(stmt.clone(), fact.clone(), justification.clone());
        for edge in edges {
            self.apply_summary(key, &edge, &summary);
        }
        if self.follow_returns_past_seeds && fact == self.zero_fact {
            self.propagate_unbalanced_returns(key, &stmt, &fact, &justification);
        }
    }

    /// Summary application for one (edge, summary) pair. The candidate says
    /// "reachable via this edge's calling context AND this exit's
    /// justification"; the acceptance predicate refuses candidates that
    /// justify themselves through a nested unrolling of the callee's own
    /// calling context.
    fn apply_summary(self: &Arc<Self>, callee_key: &AnalyzerKey<D>, edge: &CallEdge<D>, summary: &Summary<D>) {
        trace!(callee = ?callee_key, call_site = ?edge.call_site, "applying summary");
        let contribution = JustExpr::compose(
            edge.caller_fact.justification.clone(),
            summary.justification.clone(),
        );
        if !summary.requires_check && !edge.caller_fact.justification.is_constrained() {
            self.complete_summary_application(edge, summary, contribution);
            return;
        }

        let callee = self.analyzer(callee_key);
        let caller = self.analyzer(&edge.caller);
        let candidate = self.oracle.approximate(JustExpr::compose(
            JustExpr::symbol(caller.calling_context().clone()),
            contribution.clone(),
        ));
        let context_symbol = callee.calling_context().clone();
        let accept: AcceptancePredicate<D> =
            Arc::new(move |cand| !cand.has_nested_left_occurrence(&context_symbol));

        let session = Arc::clone(self);
        let edge = edge.clone();
        let summary = summary.clone();
        let on_solved: SolvedCallback = Box::new(move || {
            let job_session = Arc::clone(&session);
            session.scheduler.schedule(Box::new(move || {
                job_session.complete_summary_application(&edge, &summary, contribution);
            }));
        });
        self.oracle.check(&candidate, accept, on_solved);
    }

    /// Successful summary application: return-flow targets pass through the
    /// calling-context-restoration hook and enter the caller's return-site
    /// resolver for each return site of the call.
    fn complete_summary_application(
        self: &Arc<Self>,
        edge: &CallEdge<D>,
        summary: &Summary<D>,
        contribution: JustExpr<D>,
    ) {
        let caller = self.analyzer(&edge.caller);
        for return_site in self.icfg.return_sites(&edge.call_site) {
            let targets = self.flows.return_flow(
                &summary.exit_stmt,
                Some(&edge.call_site),
                Some(&return_site),
                &summary.exit_fact,
            );
            for target in targets {
                let mut fact = target.fact;
                self.merge
                    .restore_calling_context(&mut fact, &edge.caller_fact.fact);
                let (symbol, created) = caller.return_resolver(&fact, &return_site);
                symbol.add_alternative(contribution.concatenate(&target.constraints));
                if created {
                    self.schedule_edge(
                        &edge.caller,
                        return_site.clone(),
                        WrappedFact::new(fact.clone(), JustExpr::symbol(symbol)),
                    );
                }
            }
        }
    }

    /// Unbalanced return flow from a zero-fact exit: deliver return-flow
    /// targets into the zero-fact analyzer of every actual caller. With no
    /// callers at all, the return flow still runs once with no caller/return
    /// site so side-effecting flow functions are not silently skipped.
    fn propagate_unbalanced_returns(
        self: &Arc<Self>,
        key: &AnalyzerKey<D>,
        exit_stmt: &D::Statement,
        exit_fact: &D::Fact,
        justification: &JustExpr<D>,
    ) {
        let callers = self.icfg.callers_of(&key.procedure);
        if callers.is_empty() {
            let targets = self.flows.return_flow(exit_stmt, None, None, exit_fact);
            if self.record_unbalanced_targets {
                let mut recorded = self.unbalanced_targets.lock();
                recorded.extend(targets.into_iter().map(|t| (exit_stmt.clone(), t.fact)));
            }
            return;
        }
        for call_site in callers {
            let caller_key =
                AnalyzerKey::new(self.icfg.procedure_of(&call_site), self.zero_fact.clone());
            let caller = self.analyzer(&caller_key);
            for return_site in self.icfg.return_sites(&call_site) {
                let targets =
                    self.flows
                        .return_flow(exit_stmt, Some(&call_site), Some(&return_site), exit_fact);
                for target in targets {
                    let (symbol, created) = caller.return_resolver(&target.fact, &return_site);
                    symbol.add_alternative(justification.concatenate(&target.constraints));
                    if created {
                        self.schedule_edge(
                            &caller_key,
                            return_site.clone(),
                            WrappedFact::new(target.fact.clone(), JustExpr::symbol(symbol)),
                        );
                    }
                }
            }
        }
    }

    /// Normal statement: loop headers consolidate through the join resolver
    /// (one propagation per distinct fact, however many back-edges feed it);
    /// everything else propagates directly, gated on feasibility.
    fn process_normal(
        self: &Arc<Self>,
        key: &AnalyzerKey<D>,
        analyzer: &PerContextAnalyzer<D>,
        stmt: D::Statement,
        fact: D::Fact,
        justification: JustExpr<D>,
    ) {
        if self.icfg.successors(&stmt).is_empty() {
            return;
        }
        if self.is_loop_header(&stmt) {
            let (symbol, created) = analyzer.join_resolver(&fact, &stmt);
            symbol.add_alternative(justification);
            if created {
                let session = Arc::clone(self);
                let key = key.clone();
                let consolidated = JustExpr::symbol(symbol);
                self.scheduler.schedule(Box::new(move || {
                    session.propagate_from(&key, &stmt, &fact, &consolidated);
                }));
            }
            return;
        }
        self.propagate_from(key, &stmt, &fact, &justification);
    }

    fn propagate_from(
        self: &Arc<Self>,
        key: &AnalyzerKey<D>,
        stmt: &D::Statement,
        fact: &D::Fact,
        justification: &JustExpr<D>,
    ) {
        for succ in self.icfg.successors(stmt) {
            for target in self.flows.normal_flow(stmt, &succ, fact) {
                self.propagate_gated(key, justification, target, succ.clone());
            }
        }
    }

    /// Feasibility gate: unconstrained targets propagate synchronously;
    /// constrained ones suspend until the oracle reports the candidate
    /// satisfiable, with the continuation re-entering through the scheduler.
    fn propagate_gated(
        self: &Arc<Self>,
        key: &AnalyzerKey<D>,
        justification: &JustExpr<D>,
        target: Target<D>,
        to: D::Statement,
    ) {
        let extended = justification.concatenate(&target.constraints);
        if target.constraints.is_empty() {
            self.schedule_edge(key, to, WrappedFact::new(target.fact, extended));
            return;
        }
        let analyzer = self.analyzer(key);
        let candidate = self.oracle.approximate(JustExpr::compose(
            JustExpr::symbol(analyzer.calling_context().clone()),
            extended.clone(),
        ));
        let session = Arc::clone(self);
        let key = key.clone();
        let on_solved: SolvedCallback = Box::new(move || {
            let job_session = Arc::clone(&session);
            session.scheduler.schedule(Box::new(move || {
                job_session.schedule_edge(&key, to, WrappedFact::new(target.fact, extended));
            }));
        });
        self.oracle.check(&candidate, Arc::new(|_| true), on_solved);
    }

    /// Loop-header predicate: (more than one predecessor and not an exit, or
    /// a start point with predecessors) and a predecessor-directed search
    /// from its predecessors closes a cycle back to the statement.
    pub(crate) fn is_loop_header(&self, stmt: &D::Statement) -> bool {
        let preds = self.icfg.predecessors(stmt);
        if preds.is_empty() {
            return false;
        }
        let shape = (preds.len() > 1 && !self.icfg.is_exit(stmt)) || self.icfg.is_start_point(stmt);
        if !shape {
            return false;
        }
        let mut visited: FxHashSet<D::Statement> = FxHashSet::default();
        let mut stack = preds;
        while let Some(current) = stack.pop() {
            if current == *stmt {
                return true;
            }
            if visited.insert(current.clone()) {
                stack.extend(self.icfg.predecessors(&current));
            }
        }
        false
    }

    // ----- query API -------------------------------------------------------

    /// Analyzer for a (procedure, source fact) pair, if one was created.
    pub fn analyzer_for(
        &self,
        procedure: &D::Procedure,
        source_fact: &D::Fact,
    ) -> Option<Arc<PerContextAnalyzer<D>>> {
        self.analyzers
            .get(&AnalyzerKey::new(procedure.clone(), source_fact.clone()))
            .map(|entry| entry.value().clone())
    }

    /// Memoized reachable (statement, fact) pairs of one analyzer.
    pub fn reachable(
        &self,
        procedure: &D::Procedure,
        source_fact: &D::Fact,
    ) -> Option<Vec<(D::Statement, D::Fact)>> {
        self.analyzer_for(procedure, source_fact)
            .map(|a| a.reachable_pairs())
    }

    /// Cached exit summaries of one analyzer.
    pub fn summaries_for(
        &self,
        procedure: &D::Procedure,
        source_fact: &D::Fact,
    ) -> Option<Vec<Summary<D>>> {
        self.analyzer_for(procedure, source_fact).map(|a| a.summaries())
    }

    /// Targets recorded by side-effect-only unbalanced returns, when the run
    /// was configured to keep them.
    pub fn unbalanced_exit_targets(&self) -> Vec<(D::Statement, D::Fact)> {
        self.unbalanced_targets.lock().clone()
    }

    pub fn num_analyzers(&self) -> usize {
        self.analyzers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::IdentityFlows;
    use crate::icfg::InMemoryIcfg;
    use crate::merge::NullMergeHandler;
    use crate::oracle::{PermissiveOracle, RefusingOracle};
    use crate::scheduler::{QueueScheduler, ThreadedScheduler};
    use pretty_assertions::assert_eq;
    use rustc_hash::FxHashMap;

    struct TD;

    impl AnalysisDomain for TD {
        type Fact = String;
        type Statement = &'static str;
        type Procedure = &'static str;
        type Terminal = &'static str;
    }

    const ZERO: &str = "0";

    fn fact(name: &str) -> String {
        name.to_string()
    }

    /// Identity semantics with invocation counters, so tests can assert the
    /// at-most-once dispatch and consolidation properties.
    struct CountingFlows {
        normal_from: Mutex<FxHashMap<&'static str, usize>>,
        call_to_return: Mutex<usize>,
        return_call_sites: Mutex<Vec<Option<&'static str>>>,
        kill_call_to_return: bool,
    }

    impl CountingFlows {
        fn new(kill_call_to_return: bool) -> Arc<Self> {
            Arc::new(Self {
                normal_from: Mutex::new(FxHashMap::default()),
                call_to_return: Mutex::new(0),
                return_call_sites: Mutex::new(Vec::new()),
                kill_call_to_return,
            })
        }

        fn normal_count(&self, stmt: &'static str) -> usize {
            self.normal_from.lock().get(stmt).copied().unwrap_or(0)
        }
    }

    impl FlowFunctions<TD> for CountingFlows {
        fn normal_flow(&self, stmt: &&'static str, _: &&'static str, fact: &String) -> Vec<Target<TD>> {
            *self.normal_from.lock().entry(*stmt).or_insert(0) += 1;
            vec![Target::unconstrained(fact.clone())]
        }

        fn call_flow(&self, _: &&'static str, _: &&'static str, fact: &String) -> Vec<Target<TD>> {
            vec![Target::unconstrained(fact.clone())]
        }

        fn call_to_return_flow(
            &self,
            _: &&'static str,
            _: &&'static str,
            fact: &String,
        ) -> Vec<Target<TD>> {
            *self.call_to_return.lock() += 1;
            if self.kill_call_to_return {
                Vec::new()
            } else {
                vec![Target::unconstrained(fact.clone())]
            }
        }

        fn return_flow(
            &self,
            _: &&'static str,
            call_site: Option<&&'static str>,
            _: Option<&&'static str>,
            exit_fact: &String,
        ) -> Vec<Target<TD>> {
            self.return_call_sites.lock().push(call_site.copied());
            vec![Target::unconstrained(exit_fact.clone())]
        }
    }

    struct CountingMerge {
        merges: Mutex<usize>,
    }

    impl CountingMerge {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                merges: Mutex::new(0),
            })
        }
    }

    impl FactMergeHandler<TD> for CountingMerge {
        fn merge(&self, _: &mut String, _: &String) {
            *self.merges.lock() += 1;
        }

        fn restore_calling_context(&self, _: &mut String, _: &String) {}
    }

    fn problem(
        icfg: InMemoryIcfg<TD>,
        flows: Arc<dyn FlowFunctions<TD>>,
        merge: Arc<dyn FactMergeHandler<TD>>,
        oracle: Arc<dyn FeasibilityOracle<TD>>,
        seeds: Vec<(&'static str, String)>,
        follow_returns_past_seeds: bool,
    ) -> TabulationProblem<TD> {
        TabulationProblem {
            icfg: Arc::new(icfg),
            flows,
            merge,
            oracle,
            zero_fact: fact(ZERO),
            seeds,
            follow_returns_past_seeds,
            record_unbalanced_targets: true,
        }
    }

    fn run_queue(problem: TabulationProblem<TD>) -> Arc<TabulationSession<TD>> {
        TabulationSession::run(problem, Arc::new(QueueScheduler::new())).unwrap()
    }

    fn sorted(mut pairs: Vec<(&'static str, String)>) -> Vec<(&'static str, String)> {
        pairs.sort();
        pairs
    }

    #[test]
    fn empty_seed_set_is_an_error() {
        let icfg: InMemoryIcfg<TD> = InMemoryIcfg::new();
        let p = problem(
            icfg,
            Arc::new(IdentityFlows),
            Arc::new(NullMergeHandler),
            Arc::new(PermissiveOracle),
            Vec::new(),
            false,
        );
        let result = TabulationSession::run(p, Arc::new(QueueScheduler::new()));
        assert!(matches!(result, Err(SolverError::NoSeeds)));
    }

    #[test]
    fn two_statement_procedure_memoizes_both_points_and_one_summary() {
        let mut icfg: InMemoryIcfg<TD> = InMemoryIcfg::new();
        icfg.add_start_point("main", "s1");
        icfg.add_statement("s2", "main");
        icfg.add_edge("s1", "s2");
        icfg.add_exit("s2");

        let session = run_queue(problem(
            icfg,
            Arc::new(IdentityFlows),
            Arc::new(NullMergeHandler),
            Arc::new(PermissiveOracle),
            vec![("s1", fact("f"))],
            false,
        ));

        let reached = sorted(session.reachable(&"main", &fact("f")).unwrap());
        assert_eq!(reached, vec![("s1", fact("f")), ("s2", fact("f"))]);

        let summaries = session.summaries_for(&"main", &fact("f")).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].exit_stmt, "s2");
        assert_eq!(summaries[0].exit_fact, fact("f"));
        assert!(!summaries[0].requires_check);
    }

    #[test]
    fn diamond_dispatches_join_once_and_merges_second_arrival() {
        // s1 -> a -> j, s1 -> b -> j, j -> e. No cycle: j is a plain join,
        // dedup alone bounds the dispatch.
        let mut icfg: InMemoryIcfg<TD> = InMemoryIcfg::new();
        icfg.add_start_point("main", "s1");
        for s in ["a", "b", "j", "e"] {
            icfg.add_statement(s, "main");
        }
        icfg.add_edge("s1", "a");
        icfg.add_edge("s1", "b");
        icfg.add_edge("a", "j");
        icfg.add_edge("b", "j");
        icfg.add_edge("j", "e");
        icfg.add_exit("e");

        let flows = CountingFlows::new(false);
        let merge = CountingMerge::new();
        let session = run_queue(problem(
            icfg,
            flows.clone(),
            merge.clone(),
            Arc::new(PermissiveOracle),
            vec![("s1", fact("f"))],
            false,
        ));

        // j has one successor and was processed exactly once.
        assert_eq!(flows.normal_count("j"), 1);
        // The second arrival at (j, f) degraded to exactly one merge call.
        assert_eq!(*merge.merges.lock(), 1);
        assert_eq!(session.reachable(&"main", &fact("f")).unwrap().len(), 5);
    }

    #[test]
    fn call_and_return_flow_through_callee_summary() {
        let mut icfg: InMemoryIcfg<TD> = InMemoryIcfg::new();
        icfg.add_start_point("main", "m1");
        icfg.add_statement("m2", "main");
        icfg.add_call("m1", "callee", "m2");
        icfg.add_exit("m2");
        icfg.add_start_point("callee", "c1");
        icfg.add_exit("c1");

        let flows = CountingFlows::new(true); // return-site facts only via summaries
        let session = run_queue(problem(
            icfg,
            flows.clone(),
            Arc::new(NullMergeHandler),
            Arc::new(PermissiveOracle),
            vec![("m1", fact("f"))],
            false,
        ));

        // Callee analyzer bootstrapped with the mapped source fact.
        let callee_reached = session.reachable(&"callee", &fact("f")).unwrap();
        assert_eq!(callee_reached, vec![("c1", fact("f"))]);
        assert_eq!(session.summaries_for(&"callee", &fact("f")).unwrap().len(), 1);

        // Summary application delivered the fact at the return site.
        let main_reached = sorted(session.reachable(&"main", &fact("f")).unwrap());
        assert_eq!(main_reached, vec![("m1", fact("f")), ("m2", fact("f"))]);
        assert_eq!(*flows.return_call_sites.lock(), vec![Some("m1")]);
        // Local call-site effects were still consulted, once per return site.
        assert_eq!(*flows.call_to_return.lock(), 1);
    }

    #[test]
    fn cached_summary_replays_for_caller_arriving_later() {
        // A's call runs first and computes the callee summary; B's call site
        // sits behind an extra statement so its edge registers only after the
        // summary is cached.
        let mut icfg: InMemoryIcfg<TD> = InMemoryIcfg::new();
        icfg.add_start_point("A", "a1");
        icfg.add_statement("a2", "A");
        icfg.add_call("a1", "callee", "a2");
        icfg.add_exit("a2");
        icfg.add_start_point("B", "b0");
        icfg.add_statement("b1", "B");
        icfg.add_statement("b2", "B");
        icfg.add_edge("b0", "b1");
        icfg.add_call("b1", "callee", "b2");
        icfg.add_exit("b2");
        icfg.add_start_point("callee", "c1");
        icfg.add_exit("c1");

        let flows = CountingFlows::new(true);
        let session = run_queue(problem(
            icfg,
            flows.clone(),
            Arc::new(NullMergeHandler),
            Arc::new(PermissiveOracle),
            vec![("a1", fact("f")), ("b0", fact("f"))],
            false,
        ));

        // The callee exit executed exactly once.
        assert_eq!(
            session.reachable(&"callee", &fact("f")).unwrap(),
            vec![("c1", fact("f"))]
        );
        assert_eq!(session.summaries_for(&"callee", &fact("f")).unwrap().len(), 1);

        // Both callers received a summary-derived return edge: one return
        // flow per (edge, summary) application.
        let mut sites = flows.return_call_sites.lock().clone();
        sites.sort();
        assert_eq!(sites, vec![Some("a1"), Some("b1")]);
        assert!(session
            .reachable(&"B", &fact("f"))
            .unwrap()
            .contains(&("b2", fact("f"))));
    }

    #[test]
    fn second_caller_merges_source_fact_and_extends_calling_context() {
        // Two procedures call the same callee with the same fact: one
        // analyzer, two incoming edges. The second edge folds its callee
        // source fact into the live one and adds a calling-context
        // alternative; it does not create a second analyzer or re-bootstrap.
        let mut icfg: InMemoryIcfg<TD> = InMemoryIcfg::new();
        icfg.add_start_point("A", "a1");
        icfg.add_statement("a2", "A");
        icfg.add_call("a1", "callee", "a2");
        icfg.add_exit("a2");
        icfg.add_start_point("B", "b1");
        icfg.add_statement("b2", "B");
        icfg.add_call("b1", "callee", "b2");
        icfg.add_exit("b2");
        icfg.add_start_point("callee", "c1");
        icfg.add_exit("c1");

        let flows = CountingFlows::new(true);
        let merge = CountingMerge::new();
        let session = run_queue(problem(
            icfg,
            flows,
            merge.clone(),
            Arc::new(PermissiveOracle),
            vec![("a1", fact("f")), ("b1", fact("f"))],
            false,
        ));

        let callee = session.analyzer_for(&"callee", &fact("f")).unwrap();
        assert_eq!(callee.num_incoming_edges(), 2);
        // One alternative per incoming edge on the shared context symbol.
        assert_eq!(callee.calling_context().num_alternatives(), 2);
        // Exactly the one source-fact merge from the second edge; no memo
        // entry in this graph ever sees a second arrival.
        assert_eq!(*merge.merges.lock(), 1);
        // Bootstrap ran once for the first edge only.
        assert_eq!(
            session.reachable(&"callee", &fact("f")).unwrap(),
            vec![("c1", fact("f"))]
        );
    }

    #[test]
    fn loop_header_consolidates_back_edges() {
        // s1 -> h, h -> body -> h, h -> e. h closes a cycle, so its outgoing
        // flow runs once per distinct fact through the join resolver.
        let mut icfg: InMemoryIcfg<TD> = InMemoryIcfg::new();
        icfg.add_start_point("main", "s1");
        for s in ["h", "body", "e"] {
            icfg.add_statement(s, "main");
        }
        icfg.add_edge("s1", "h");
        icfg.add_edge("h", "body");
        icfg.add_edge("body", "h");
        icfg.add_edge("h", "e");
        icfg.add_exit("e");

        let flows = CountingFlows::new(false);
        let session = run_queue(problem(
            icfg,
            flows.clone(),
            Arc::new(NullMergeHandler),
            Arc::new(PermissiveOracle),
            vec![("s1", fact("f"))],
            false,
        ));

        // Two successors of h, one consolidated pass: two invocations, not
        // one per arriving back-edge.
        assert_eq!(flows.normal_count("h"), 2);
        let reached = sorted(session.reachable(&"main", &fact("f")).unwrap());
        assert_eq!(
            reached,
            vec![
                ("body", fact("f")),
                ("e", fact("f")),
                ("h", fact("f")),
                ("s1", fact("f")),
            ]
        );
    }

    #[test]
    fn loop_header_predicate_matches_shape_and_cycle() {
        let mut icfg: InMemoryIcfg<TD> = InMemoryIcfg::new();
        // Diamond join (no cycle) in main.
        icfg.add_start_point("main", "s1");
        for s in ["a", "b", "j"] {
            icfg.add_statement(s, "main");
        }
        icfg.add_edge("s1", "a");
        icfg.add_edge("s1", "b");
        icfg.add_edge("a", "j");
        icfg.add_edge("b", "j");
        // Loop header in main.
        icfg.add_statement("h", "main");
        icfg.add_statement("body", "main");
        icfg.add_edge("j", "h");
        icfg.add_edge("h", "body");
        icfg.add_edge("body", "h");
        // Recursive start point in rec.
        icfg.add_start_point("rec", "r1");
        icfg.add_statement("r2", "rec");
        icfg.add_edge("r1", "r2");
        icfg.add_edge("r2", "r1");

        let session = run_queue(problem(
            icfg,
            Arc::new(IdentityFlows),
            Arc::new(NullMergeHandler),
            Arc::new(PermissiveOracle),
            vec![("s1", fact("f"))],
            false,
        ));

        assert!(!session.is_loop_header(&"j"), "acyclic join is no loop header");
        assert!(session.is_loop_header(&"h"));
        assert!(
            session.is_loop_header(&"r1"),
            "recursive start point consolidates"
        );
        assert!(!session.is_loop_header(&"s1"));
    }

    /// Flows that attach a constraint terminal to one specific edge.
    struct ConstrainedEdgeFlows;

    impl FlowFunctions<TD> for ConstrainedEdgeFlows {
        fn normal_flow(&self, stmt: &&'static str, _: &&'static str, fact: &String) -> Vec<Target<TD>> {
            if *stmt == "s1" {
                vec![Target::constrained(fact.clone(), vec!["field"])]
            } else {
                vec![Target::unconstrained(fact.clone())]
            }
        }

        fn call_flow(&self, _: &&'static str, _: &&'static str, fact: &String) -> Vec<Target<TD>> {
            vec![Target::unconstrained(fact.clone())]
        }

        fn call_to_return_flow(
            &self,
            _: &&'static str,
            _: &&'static str,
            fact: &String,
        ) -> Vec<Target<TD>> {
            vec![Target::unconstrained(fact.clone())]
        }

        fn return_flow(
            &self,
            _: &&'static str,
            _: Option<&&'static str>,
            _: Option<&&'static str>,
            exit_fact: &String,
        ) -> Vec<Target<TD>> {
            vec![Target::unconstrained(exit_fact.clone())]
        }
    }

    fn constrained_icfg() -> InMemoryIcfg<TD> {
        let mut icfg: InMemoryIcfg<TD> = InMemoryIcfg::new();
        icfg.add_start_point("main", "s1");
        icfg.add_statement("s2", "main");
        icfg.add_edge("s1", "s2");
        icfg.add_exit("s2");
        icfg
    }

    #[test]
    fn constrained_propagation_waits_for_the_oracle() {
        let session = run_queue(problem(
            constrained_icfg(),
            Arc::new(ConstrainedEdgeFlows),
            Arc::new(NullMergeHandler),
            Arc::new(PermissiveOracle),
            vec![("s1", fact("f"))],
            false,
        ));
        let reached = sorted(session.reachable(&"main", &fact("f")).unwrap());
        assert_eq!(reached, vec![("s1", fact("f")), ("s2", fact("f"))]);
        // The summary at s2 now carries constraints.
        let summaries = session.summaries_for(&"main", &fact("f")).unwrap();
        assert!(summaries[0].requires_check);
    }

    #[test]
    fn infeasible_candidate_is_a_silent_non_event() {
        let session = run_queue(problem(
            constrained_icfg(),
            Arc::new(ConstrainedEdgeFlows),
            Arc::new(NullMergeHandler),
            Arc::new(RefusingOracle),
            vec![("s1", fact("f"))],
            false,
        ));
        // s2 is never reached, and that is not an error.
        assert_eq!(
            session.reachable(&"main", &fact("f")).unwrap(),
            vec![("s1", fact("f"))]
        );
        assert!(session.summaries_for(&"main", &fact("f")).unwrap().is_empty());
    }

    #[test]
    fn unbalanced_zero_return_climbs_into_callers() {
        let mut icfg: InMemoryIcfg<TD> = InMemoryIcfg::new();
        icfg.add_start_point("main", "m1");
        icfg.add_statement("m2", "main");
        icfg.add_call("m1", "callee", "m2");
        icfg.add_exit("m2");
        icfg.add_start_point("callee", "c1");
        icfg.add_exit("c1");

        let flows = CountingFlows::new(true);
        let session = run_queue(problem(
            icfg,
            flows.clone(),
            Arc::new(NullMergeHandler),
            Arc::new(PermissiveOracle),
            vec![("c1", fact(ZERO))],
            true,
        ));

        // The zero fact returned unbalanced into main's zero analyzer.
        let main_zero = session.reachable(&"main", &fact(ZERO)).unwrap();
        assert_eq!(main_zero, vec![("m2", fact(ZERO))]);

        // main itself has no callers: the return flow ran once with no
        // caller/return site, and its targets were recorded.
        assert!(flows.return_call_sites.lock().contains(&None));
        assert_eq!(session.unbalanced_exit_targets(), vec![("m2", fact(ZERO))]);
    }

    #[test]
    fn threaded_scheduler_reaches_the_same_fixed_point() {
        let mut icfg: InMemoryIcfg<TD> = InMemoryIcfg::new();
        icfg.add_start_point("main", "m1");
        icfg.add_statement("m2", "main");
        icfg.add_call("m1", "callee", "m2");
        icfg.add_exit("m2");
        icfg.add_start_point("callee", "c1");
        icfg.add_exit("c1");

        let flows = CountingFlows::new(true);
        let p = problem(
            icfg,
            flows,
            Arc::new(NullMergeHandler),
            Arc::new(PermissiveOracle),
            vec![("m1", fact("f"))],
            false,
        );
        let session = TabulationSession::run(p, Arc::new(ThreadedScheduler::new(4))).unwrap();

        let main_reached = sorted(session.reachable(&"main", &fact("f")).unwrap());
        assert_eq!(main_reached, vec![("m1", fact("f")), ("m2", fact("f"))]);
        assert_eq!(session.summaries_for(&"callee", &fact("f")).unwrap().len(), 1);
    }
}
