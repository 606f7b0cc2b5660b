/*
 * Bidirectional Rendezvous Coordination
 *
 * A forward and a backward analysis meet in the middle: a continuation
 * submitted from one direction at a statement runs only once the opposite
 * direction has also reached that statement. Arrivals are sticky, so late
 * continuations on an already-met statement run immediately.
 *
 * The coordinator never forces unmet rendezvous to completion. A
 * continuation whose peer direction never arrives is simply dead work, and
 * [`BidirectionalCoordinator::pending_statements`] reports where that
 * happened after quiescence.
 */

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::domain::AnalysisDomain;
use crate::error::SolverError;
use crate::scheduler::{Job, Scheduler};
use crate::solver::{TabulationProblem, TabulationSession};

/// The two directions of a paired analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }

    fn index(self) -> usize {
        match self {
            Direction::Forward => 0,
            Direction::Backward => 1,
        }
    }
}

/// Per-statement rendezvous state: which directions have arrived, and the
/// continuations parked by each direction while its peer is still absent.
#[derive(Default)]
struct RendezvousCell {
    arrived: [bool; 2],
    parked: [Vec<Job>; 2],
}

/// Meeting point registry shared by a forward and a backward session.
///
/// Parked continuations are not `Sync`, so the registry lives behind one
/// mutex rather than a sharded map. All released continuations re-enter
/// through the scheduler, never inline under the registry lock, so flow
/// functions may call [`synchronize_on`](Self::synchronize_on) freely from
/// running jobs.
pub struct BidirectionalCoordinator<D: AnalysisDomain> {
    scheduler: Arc<dyn Scheduler>,
    cells: Mutex<FxHashMap<D::Statement, RendezvousCell>>,
}

impl<D: AnalysisDomain> BidirectionalCoordinator<D> {
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            scheduler,
            cells: Mutex::new(FxHashMap::default()),
        }
    }

    /// Register `direction`'s arrival at `stmt` and submit `job` to run once
    /// both directions have arrived there.
    ///
    /// The first arrival of a direction also releases everything the
    /// opposite direction parked at the statement. Arrivals are permanent:
    /// once both directions have met at `stmt`, every later continuation is
    /// scheduled straight away.
    pub fn synchronize_on(&self, direction: Direction, stmt: D::Statement, job: Job) {
        let mut released: Vec<Job> = Vec::new();
        {
            let mut cells = self.cells.lock();
            let cell = cells.entry(stmt.clone()).or_default();
            let me = direction.index();
            let peer = direction.opposite().index();
            cell.arrived[me] = true;
            if cell.arrived[peer] {
                debug!(direction = ?direction, stmt = ?stmt, "rendezvous met");
                released.push(job);
                released.append(&mut cell.parked[me]);
                released.append(&mut cell.parked[peer]);
            } else {
                debug!(direction = ?direction, stmt = ?stmt, "rendezvous parked");
                cell.parked[me].push(job);
            }
        }
        // Registry lock dropped: scheduling may run jobs synchronously on a
        // queue scheduler, and those jobs may synchronize again.
        for job in released {
            self.scheduler.schedule(job);
        }
    }

    /// Statements where one direction parked continuations the other never
    /// released. Meaningful after the scheduler reached quiescence.
    pub fn pending_statements(&self) -> Vec<D::Statement> {
        self.cells
            .lock()
            .iter()
            .filter(|(_, cell)| cell.parked.iter().any(|p| !p.is_empty()))
            .map(|(stmt, _)| stmt.clone())
            .collect()
    }

    /// Whether both directions have arrived at `stmt`.
    pub fn is_met(&self, stmt: &D::Statement) -> bool {
        self.cells
            .lock()
            .get(stmt)
            .map(|cell| cell.arrived[0] && cell.arrived[1])
            .unwrap_or(false)
    }
}

/// A forward and a backward tabulation driven to a joint fixed point on one
/// scheduler, with a shared rendezvous registry.
///
/// The coordinator is handed out before the run starts so the two problems'
/// flow functions and oracles can capture it and call
/// [`BidirectionalCoordinator::synchronize_on`] while the run is in flight.
pub struct BidirectionalRun<D: AnalysisDomain> {
    pub forward: Arc<TabulationSession<D>>,
    pub backward: Arc<TabulationSession<D>>,
    pub coordinator: Arc<BidirectionalCoordinator<D>>,
}

impl<D: AnalysisDomain> BidirectionalRun<D> {
    /// Seed both sessions on `scheduler` and drive the shared queue to
    /// quiescence once.
    pub fn run(
        forward: TabulationProblem<D>,
        backward: TabulationProblem<D>,
        coordinator: Arc<BidirectionalCoordinator<D>>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self, SolverError> {
        let forward = TabulationSession::start(forward, scheduler.clone())?;
        let backward = TabulationSession::start(backward, scheduler.clone())?;
        scheduler.run_and_await_completion()?;
        Ok(Self {
            forward,
            backward,
            coordinator,
        })
    }
}
