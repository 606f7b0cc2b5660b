/*
 * Demandflow - Demand-Driven Interprocedural Dataflow Tabulation
 *
 * Layered around one generic analysis domain:
 * - domain/icfg/flow/merge : the user-facing seams (facts, graph, transfer
 *   functions, widening)
 * - expr/oracle            : justification expressions and the feasibility
 *   gate over them
 * - analyzer/edge          : per-calling-context state, call edges, summaries
 * - solver                 : the tabulation fixed point over a scheduler
 * - sync                   : forward/backward rendezvous coordination
 *
 * Concurrency:
 * - pluggable scheduler (deterministic queue or Rayon pool)
 * - one mutex per analyzer, sharded arena for the analyzer registry
 * - oracle callbacks re-enter through the scheduler, never recursively
 */

#![allow(clippy::new_without_default)] // Constructors stay explicit at the seams
#![allow(clippy::type_complexity)] // Resolver keys pair facts with statements

pub mod analyzer;
pub mod domain;
pub mod edge;
pub mod error;
pub mod expr;
pub mod flow;
pub mod icfg;
pub mod merge;
pub mod oracle;
pub mod scheduler;
pub mod solver;
pub mod sync;

pub use analyzer::PerContextAnalyzer;
pub use domain::{AnalysisDomain, AnalyzerKey, WrappedFact};
pub use edge::{CallEdge, Summary};
pub use error::SolverError;
pub use expr::{JustExpr, MergeSymbol, SymbolKind};
pub use flow::{FlowFunctions, IdentityFlows, Target};
pub use icfg::{InMemoryIcfg, InterproceduralCfg};
pub use merge::{FactMergeHandler, NullMergeHandler};
pub use oracle::{AcceptancePredicate, FeasibilityOracle, PermissiveOracle, RefusingOracle, SolvedCallback};
pub use scheduler::{Job, QueueScheduler, Scheduler, ThreadedScheduler};
pub use solver::{TabulationProblem, TabulationSession};
pub use sync::{BidirectionalCoordinator, BidirectionalRun, Direction};
