/*
 * Interprocedural Control-Flow Graph Provider
 *
 * The engine never walks a host program directly; it asks this trait for
 * successors, predecessors, statement classification and call structure.
 *
 * InMemoryIcfg is a complete adapter over an explicit edge list, used by the
 * test suite and by hosts that already have their program in graph form.
 */

use rustc_hash::{FxHashMap, FxHashSet};

use crate::domain::AnalysisDomain;

/// Read-only view of the host program's interprocedural CFG.
///
/// All methods must be safe to call concurrently from multiple jobs.
pub trait InterproceduralCfg<D: AnalysisDomain>: Send + Sync {
    /// Start points of a procedure.
    fn start_points(&self, procedure: &D::Procedure) -> Vec<D::Statement>;

    /// Intra-procedural successors of a statement.
    fn successors(&self, stmt: &D::Statement) -> Vec<D::Statement>;

    /// Intra-procedural predecessors of a statement.
    fn predecessors(&self, stmt: &D::Statement) -> Vec<D::Statement>;

    /// Whether the statement is a call site.
    fn is_call(&self, stmt: &D::Statement) -> bool;

    /// Whether the statement is a procedure exit.
    fn is_exit(&self, stmt: &D::Statement) -> bool;

    /// Whether the statement is a procedure start point.
    fn is_start_point(&self, stmt: &D::Statement) -> bool;

    /// Procedures a call site may invoke.
    fn callees(&self, call_site: &D::Statement) -> Vec<D::Procedure>;

    /// Return sites matching a call site.
    fn return_sites(&self, call_site: &D::Statement) -> Vec<D::Statement>;

    /// Call sites anywhere in the program that may invoke the procedure.
    fn callers_of(&self, procedure: &D::Procedure) -> Vec<D::Statement>;

    /// The procedure containing a statement.
    fn procedure_of(&self, stmt: &D::Statement) -> D::Procedure;
}

/// Explicit in-memory ICFG with builder methods.
pub struct InMemoryIcfg<D: AnalysisDomain> {
    successors: FxHashMap<D::Statement, Vec<D::Statement>>,
    predecessors: FxHashMap<D::Statement, Vec<D::Statement>>,
    procedure_of: FxHashMap<D::Statement, D::Procedure>,
    start_points: FxHashMap<D::Procedure, Vec<D::Statement>>,
    exits: FxHashSet<D::Statement>,
    call_targets: FxHashMap<D::Statement, Vec<D::Procedure>>,
    return_sites: FxHashMap<D::Statement, Vec<D::Statement>>,
    callers: FxHashMap<D::Procedure, Vec<D::Statement>>,
}

impl<D: AnalysisDomain> InMemoryIcfg<D> {
    pub fn new() -> Self {
        Self {
            successors: FxHashMap::default(),
            predecessors: FxHashMap::default(),
            procedure_of: FxHashMap::default(),
            start_points: FxHashMap::default(),
            exits: FxHashSet::default(),
            call_targets: FxHashMap::default(),
            return_sites: FxHashMap::default(),
            callers: FxHashMap::default(),
        }
    }

    /// Register a statement as belonging to a procedure.
    pub fn add_statement(&mut self, stmt: D::Statement, procedure: D::Procedure) {
        self.procedure_of.insert(stmt, procedure);
    }

    /// Mark a statement as a start point of its procedure.
    pub fn add_start_point(&mut self, procedure: D::Procedure, stmt: D::Statement) {
        self.procedure_of.insert(stmt.clone(), procedure.clone());
        self.start_points.entry(procedure).or_default().push(stmt);
    }

    /// Mark a statement as a procedure exit.
    pub fn add_exit(&mut self, stmt: D::Statement) {
        self.exits.insert(stmt);
    }

    /// Add an intra-procedural edge.
    pub fn add_edge(&mut self, from: D::Statement, to: D::Statement) {
        self.successors
            .entry(from.clone())
            .or_default()
            .push(to.clone());
        self.predecessors.entry(to).or_default().push(from);
    }

    /// Register a call site invoking `callee`, returning to `return_site`.
    pub fn add_call(
        &mut self,
        call_site: D::Statement,
        callee: D::Procedure,
        return_site: D::Statement,
    ) {
        self.call_targets
            .entry(call_site.clone())
            .or_default()
            .push(callee.clone());
        self.return_sites
            .entry(call_site.clone())
            .or_default()
            .push(return_site);
        self.callers.entry(callee).or_default().push(call_site);
    }
}

impl<D: AnalysisDomain> Default for InMemoryIcfg<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: AnalysisDomain> InterproceduralCfg<D> for InMemoryIcfg<D> {
    fn start_points(&self, procedure: &D::Procedure) -> Vec<D::Statement> {
        self.start_points.get(procedure).cloned().unwrap_or_default()
    }

    fn successors(&self, stmt: &D::Statement) -> Vec<D::Statement> {
        self.successors.get(stmt).cloned().unwrap_or_default()
    }

    fn predecessors(&self, stmt: &D::Statement) -> Vec<D::Statement> {
        self.predecessors.get(stmt).cloned().unwrap_or_default()
    }

    fn is_call(&self, stmt: &D::Statement) -> bool {
        self.call_targets.contains_key(stmt)
    }

    fn is_exit(&self, stmt: &D::Statement) -> bool {
        self.exits.contains(stmt)
    }

    fn is_start_point(&self, stmt: &D::Statement) -> bool {
        match self.procedure_of.get(stmt) {
            Some(proc) => self
                .start_points
                .get(proc)
                .map_or(false, |sps| sps.contains(stmt)),
            None => false,
        }
    }

    fn callees(&self, call_site: &D::Statement) -> Vec<D::Procedure> {
        self.call_targets.get(call_site).cloned().unwrap_or_default()
    }

    fn return_sites(&self, call_site: &D::Statement) -> Vec<D::Statement> {
        self.return_sites.get(call_site).cloned().unwrap_or_default()
    }

    fn callers_of(&self, procedure: &D::Procedure) -> Vec<D::Statement> {
        self.callers.get(procedure).cloned().unwrap_or_default()
    }

    fn procedure_of(&self, stmt: &D::Statement) -> D::Procedure {
        self.procedure_of
            .get(stmt)
            .cloned()
            .unwrap_or_else(|| panic!("statement {:?} not registered with any procedure", stmt))
    }
}
