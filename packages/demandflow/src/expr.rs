/*
 * Justification Expressions
 *
 * A justification is a formula in a context-free constraint language
 * recording the access-path/calling-context history under which a fact is
 * valid. Expressions are immutable values: propagation only ever extends
 * them by concatenation or wraps them in a composition.
 *
 * Merge symbols are the one shared piece: a symbol stands for "any of N
 * alternative justifications" and is the unit the return-site and join-point
 * resolvers hand out. Alternatives accumulate behind a lock; the symbol's
 * identity (and thus expression equality) never changes.
 *
 * The feasibility oracle consumes these expressions; the engine itself only
 * needs construction, constraint detection, and the structural
 * nested-left-occurrence check used by the summary acceptance predicate.
 */

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::domain::AnalysisDomain;

static NEXT_SYMBOL_ID: AtomicU64 = AtomicU64::new(1);

/// What a merge symbol was created for. Purely diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// Calling-context symbol of a per-context analyzer.
    CallingContext,
    /// Return-site resolver symbol.
    ReturnSite,
    /// Control-flow-join resolver symbol.
    Join,
}

struct SymbolInner<D: AnalysisDomain> {
    id: u64,
    kind: SymbolKind,
    alternatives: RwLock<Vec<JustExpr<D>>>,
}

/// A shared merge point consolidating alternative justifications.
///
/// Equality and hashing are by identity: two handles compare equal iff they
/// refer to the same underlying symbol, regardless of accumulated
/// alternatives.
pub struct MergeSymbol<D: AnalysisDomain> {
    inner: Arc<SymbolInner<D>>,
}

impl<D: AnalysisDomain> MergeSymbol<D> {
    pub fn fresh(kind: SymbolKind) -> Self {
        Self {
            inner: Arc::new(SymbolInner {
                id: NEXT_SYMBOL_ID.fetch_add(1, Ordering::Relaxed),
                kind,
                alternatives: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn kind(&self) -> SymbolKind {
        self.inner.kind
    }

    /// Register one more alternative production for this symbol.
    ///
    /// Downstream consumers of the symbol are not re-triggered: that is the
    /// whole point of the resolver mechanism.
    pub fn add_alternative(&self, alt: JustExpr<D>) {
        self.inner.alternatives.write().push(alt);
    }

    pub fn num_alternatives(&self) -> usize {
        self.inner.alternatives.read().len()
    }

    /// Snapshot of the current alternatives (for oracles and diagnostics).
    pub fn alternatives(&self) -> Vec<JustExpr<D>> {
        self.inner.alternatives.read().clone()
    }
}

impl<D: AnalysisDomain> Clone for MergeSymbol<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: AnalysisDomain> PartialEq for MergeSymbol<D> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl<D: AnalysisDomain> Eq for MergeSymbol<D> {}

impl<D: AnalysisDomain> std::hash::Hash for MergeSymbol<D> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl<D: AnalysisDomain> Debug for MergeSymbol<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}#{}", self.inner.kind, self.inner.id)
    }
}

/// A justification expression.
pub enum JustExpr<D: AnalysisDomain> {
    /// Solved/constant: holds unconditionally, carries no constraints.
    Solved,
    /// A run of constraint terminals, in order.
    Terminals(Vec<D::Terminal>),
    /// Left-to-right composition of two sub-expressions.
    Compose(Arc<JustExpr<D>>, Arc<JustExpr<D>>),
    /// Reference to a shared merge symbol (set of alternatives).
    Symbol(MergeSymbol<D>),
}

impl<D: AnalysisDomain> JustExpr<D> {
    pub fn terminals(ts: Vec<D::Terminal>) -> Self {
        if ts.is_empty() {
            JustExpr::Solved
        } else {
            JustExpr::Terminals(ts)
        }
    }

    pub fn symbol(sym: MergeSymbol<D>) -> Self {
        JustExpr::Symbol(sym)
    }

    /// Compose `left` then `right`, collapsing solved operands.
    pub fn compose(left: JustExpr<D>, right: JustExpr<D>) -> Self {
        match (left, right) {
            (JustExpr::Solved, r) => r,
            (l, JustExpr::Solved) => l,
            (JustExpr::Terminals(mut a), JustExpr::Terminals(b)) => {
                a.extend(b);
                JustExpr::Terminals(a)
            }
            (l, r) => JustExpr::Compose(Arc::new(l), Arc::new(r)),
        }
    }

    /// Produce a new justification extended with extra constraint terminals.
    pub fn concatenate(&self, extra: &[D::Terminal]) -> Self {
        if extra.is_empty() {
            return self.clone();
        }
        JustExpr::compose(self.clone(), JustExpr::Terminals(extra.to_vec()))
    }

    /// Whether the expression carries any constraint that would require a
    /// feasibility check. Symbols are conservatively constrained: their
    /// alternatives are open-ended.
    pub fn is_constrained(&self) -> bool {
        match self {
            JustExpr::Solved => false,
            JustExpr::Terminals(ts) => !ts.is_empty(),
            JustExpr::Compose(l, r) => l.is_constrained() || r.is_constrained(),
            JustExpr::Symbol(_) => true,
        }
    }

    /// Structural occurrence check for a merge symbol. Does not expand
    /// symbol alternatives (expansion could be unbounded).
    pub fn contains_symbol(&self, sym: &MergeSymbol<D>) -> bool {
        match self {
            JustExpr::Solved | JustExpr::Terminals(_) => false,
            JustExpr::Compose(l, r) => l.contains_symbol(sym) || r.contains_symbol(sym),
            JustExpr::Symbol(s) => s == sym,
        }
    }

    /// Soundness guard for summary application: true if `sym` occurs inside
    /// the left operand of a composition anywhere below the top level.
    ///
    /// The outermost left operand is the candidate's own calling-context
    /// prefix and is exempt; a deeper left occurrence means the candidate
    /// would justify itself through an unbounded unrolling of its own
    /// calling context.
    pub fn has_nested_left_occurrence(&self, sym: &MergeSymbol<D>) -> bool {
        self.nested_left_walk(sym, true)
    }

    fn nested_left_walk(&self, sym: &MergeSymbol<D>, at_root: bool) -> bool {
        match self {
            JustExpr::Solved | JustExpr::Terminals(_) | JustExpr::Symbol(_) => false,
            JustExpr::Compose(l, r) => {
                (!at_root && l.contains_symbol(sym))
                    || l.nested_left_walk(sym, false)
                    || r.nested_left_walk(sym, false)
            }
        }
    }
}

impl<D: AnalysisDomain> Clone for JustExpr<D> {
    fn clone(&self) -> Self {
        match self {
            JustExpr::Solved => JustExpr::Solved,
            JustExpr::Terminals(ts) => JustExpr::Terminals(ts.clone()),
            JustExpr::Compose(l, r) => JustExpr::Compose(Arc::clone(l), Arc::clone(r)),
            JustExpr::Symbol(s) => JustExpr::Symbol(s.clone()),
        }
    }
}

impl<D: AnalysisDomain> Debug for JustExpr<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JustExpr::Solved => write!(f, "ε"),
            JustExpr::Terminals(ts) => write!(f, "{:?}", ts),
            JustExpr::Compose(l, r) => write!(f, "({:?} . {:?})", l, r),
            JustExpr::Symbol(s) => write!(f, "{:?}", s),
        }
    }
}
