//! The update clock: single-threaded cycle driver.
//!
//! A process hosts one [`UpdateGraph`] per engine instance. Every mutation
//! to a tracked column, every row-set change, and every listener
//! invocation happens inside a cycle bracketed by
//! [`begin_cycle`](UpdateGraph::begin_cycle) and
//! [`end_cycle`](UpdateGraph::end_cycle). Ending the cycle runs each
//! registered committer exactly once — recycling previous-value shadows
//! and dropping row-set snapshots — then advances the step counter.
//!
//! A failed cycle is torn down with [`abort_cycle`](UpdateGraph::abort_cycle),
//! which discards previous-value state without committing it, so the next
//! cycle rebuilds shadows from scratch.
//!
//! There is no locking here: the graph is a single-threaded cooperative
//! scheduler, and committers are held as weak handles so dropping a column
//! or table detaches it from the clock automatically.

use std::cell::RefCell;
use std::rc::Weak;

use tracing::trace;

use crate::error::RillError;

/// End-of-cycle hook for structures that carry per-cycle state.
pub trait CycleCommitter {
    /// Called exactly once when the cycle ends normally.
    fn commit_cycle(&mut self);

    /// Called when the cycle is aborted. Per-cycle state must be
    /// discarded without being committed.
    fn rollback_cycle(&mut self);
}

/// Phase of the update clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    /// No cycle open; reads see the last committed snapshot.
    Idle,
    /// A cycle is open; mutations and listener delivery are in progress.
    Updating,
}

/// Single-threaded cycle driver with registered end-of-cycle committers.
pub struct UpdateGraph {
    step: u64,
    phase: CyclePhase,
    committers: Vec<Weak<RefCell<dyn CycleCommitter>>>,
}

impl Default for UpdateGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateGraph {
    pub fn new() -> Self {
        UpdateGraph {
            step: 0,
            phase: CyclePhase::Idle,
            committers: Vec::new(),
        }
    }

    /// Monotonic count of committed cycles.
    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// Attach an end-of-cycle committer. Dead handles are pruned on the
    /// next cycle end.
    pub fn register_committer(&mut self, committer: Weak<RefCell<dyn CycleCommitter>>) {
        self.committers.push(committer);
    }

    /// Open a cycle. Fails if one is already open.
    pub fn begin_cycle(&mut self) -> Result<(), RillError> {
        if self.phase == CyclePhase::Updating {
            return Err(RillError::CycleInProgress);
        }
        self.phase = CyclePhase::Updating;
        trace!(step = self.step, "update cycle begin");
        Ok(())
    }

    /// Close the cycle: run every live committer once, prune dead
    /// handles, advance the step.
    pub fn end_cycle(&mut self) -> Result<(), RillError> {
        if self.phase != CyclePhase::Updating {
            return Err(RillError::NoCycleInProgress);
        }
        let before = self.committers.len();
        self.committers.retain(|weak| match weak.upgrade() {
            Some(committer) => {
                committer.borrow_mut().commit_cycle();
                true
            }
            None => false,
        });
        trace!(
            step = self.step,
            committers = self.committers.len(),
            pruned = before - self.committers.len(),
            "update cycle commit"
        );
        self.phase = CyclePhase::Idle;
        self.step += 1;
        Ok(())
    }

    /// Tear down a failed cycle: per-cycle state is discarded, the step
    /// does not advance.
    pub fn abort_cycle(&mut self) -> Result<(), RillError> {
        if self.phase != CyclePhase::Updating {
            return Err(RillError::NoCycleInProgress);
        }
        self.committers.retain(|weak| match weak.upgrade() {
            Some(committer) => {
                committer.borrow_mut().rollback_cycle();
                true
            }
            None => false,
        });
        trace!(step = self.step, "update cycle aborted");
        self.phase = CyclePhase::Idle;
        Ok(())
    }

    /// Run `f` inside a cycle. Commits on success; aborts on error and
    /// propagates it.
    pub fn run_cycle<T>(
        &mut self,
        f: impl FnOnce() -> Result<T, RillError>,
    ) -> Result<T, RillError> {
        self.begin_cycle()?;
        match f() {
            Ok(value) => {
                self.end_cycle()?;
                Ok(value)
            }
            Err(err) => {
                self.abort_cycle()?;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[derive(Default)]
    struct Probe {
        commits: u32,
        rollbacks: u32,
    }

    impl CycleCommitter for Probe {
        fn commit_cycle(&mut self) {
            self.commits += 1;
        }
        fn rollback_cycle(&mut self) {
            self.rollbacks += 1;
        }
    }

    #[test]
    fn test_cycle_lifecycle() {
        let mut graph = UpdateGraph::new();
        assert_eq!(graph.phase(), CyclePhase::Idle);
        assert_eq!(graph.step(), 0);

        let probe: Rc<RefCell<Probe>> = Rc::new(RefCell::new(Probe::default()));
        graph.register_committer(Rc::downgrade(&probe) as Weak<RefCell<dyn CycleCommitter>>);

        graph.begin_cycle().unwrap();
        assert_eq!(graph.phase(), CyclePhase::Updating);
        graph.end_cycle().unwrap();
        assert_eq!(graph.step(), 1);
        assert_eq!(probe.borrow().commits, 1);
        assert_eq!(probe.borrow().rollbacks, 0);
    }

    #[test]
    fn test_double_begin_fails() {
        let mut graph = UpdateGraph::new();
        graph.begin_cycle().unwrap();
        assert!(matches!(
            graph.begin_cycle().unwrap_err(),
            RillError::CycleInProgress
        ));
    }

    #[test]
    fn test_end_without_begin_fails() {
        let mut graph = UpdateGraph::new();
        assert!(matches!(
            graph.end_cycle().unwrap_err(),
            RillError::NoCycleInProgress
        ));
        assert!(matches!(
            graph.abort_cycle().unwrap_err(),
            RillError::NoCycleInProgress
        ));
    }

    #[test]
    fn test_abort_rolls_back_and_keeps_step() {
        let mut graph = UpdateGraph::new();
        let probe: Rc<RefCell<Probe>> = Rc::new(RefCell::new(Probe::default()));
        graph.register_committer(Rc::downgrade(&probe) as Weak<RefCell<dyn CycleCommitter>>);

        graph.begin_cycle().unwrap();
        graph.abort_cycle().unwrap();
        assert_eq!(graph.step(), 0);
        assert_eq!(probe.borrow().commits, 0);
        assert_eq!(probe.borrow().rollbacks, 1);
    }

    #[test]
    fn test_dead_committers_pruned() {
        let mut graph = UpdateGraph::new();
        let probe: Rc<RefCell<Probe>> = Rc::new(RefCell::new(Probe::default()));
        graph.register_committer(Rc::downgrade(&probe) as Weak<RefCell<dyn CycleCommitter>>);
        drop(probe);
        graph.begin_cycle().unwrap();
        graph.end_cycle().unwrap();
        assert!(graph.committers.is_empty());
    }

    #[test]
    fn test_run_cycle_commits_on_ok() {
        let mut graph = UpdateGraph::new();
        let out = graph.run_cycle(|| Ok(42)).unwrap();
        assert_eq!(out, 42);
        assert_eq!(graph.step(), 1);
    }

    #[test]
    fn test_run_cycle_aborts_on_err() {
        let mut graph = UpdateGraph::new();
        let err = graph
            .run_cycle::<()>(|| Err(RillError::InternalError("boom".into())))
            .unwrap_err();
        assert!(matches!(err, RillError::InternalError(_)));
        assert_eq!(graph.step(), 0);
        assert_eq!(graph.phase(), CyclePhase::Idle);
    }
}
