//! Cooperative turn scheduler.
//!
//! Work is split into turns: closures run strictly in FIFO order, one per
//! step. Asynchronous work is registered as an in-flight future whose output
//! becomes a turn once it completes. Nothing runs until a caller drives the
//! scheduler, which is what keeps the first event of a request off the
//! caller's own stack.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::pin;

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;

/// Body of a scheduled turn.
pub type TurnFn = Box<dyn FnOnce() + Send + 'static>;

type InFlight = FuturesUnordered<BoxFuture<'static, (&'static str, TurnFn)>>;

/// Errors raised while driving the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// Driving did not reach idle within the configured number of turns
    #[error("Turn budget exhausted after {turns} turns")]
    TurnBudgetExhausted {
        /// Turns executed before giving up
        turns: usize,
    },
}

/// Unit of work waiting in the ready queue.
struct Turn {
    id: u64,
    label: &'static str,
    run: TurnFn,
}

#[derive(Default)]
struct SchedulerState {
    ready: VecDeque<Turn>,
    in_flight: InFlight,
    next_turn_id: u64,
    /// Set while a driver holds the in-flight set outside the lock
    in_flight_taken: bool,
    /// Bumped by `clear` so a driver returning a taken set drops it
    epoch: u64,
}

/// Deterministic single-logical-thread scheduler.
pub struct Scheduler {
    state: Mutex<SchedulerState>,
    /// Wakes drivers parked while another driver holds the in-flight set
    wakeup: Notify,
    max_turns: usize,
}

impl Scheduler {
    /// Creates scheduler that gives up after `max_turns` turns per drive.
    pub fn new(max_turns: usize) -> Self {
        Self {
            state: Mutex::new(SchedulerState::default()),
            wakeup: Notify::new(),
            max_turns,
        }
    }

    /// Queues a turn behind everything already queued.
    pub fn schedule<F>(&self, label: &'static str, run: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.state.lock();
            let id = state.next_turn_id;
            state.next_turn_id += 1;
            state.ready.push_back(Turn {
                id,
                label,
                run: Box::new(run),
            });
        }
        self.wakeup.notify_waiters();
    }

    /// Registers a future whose output is queued as a turn once it completes.
    ///
    /// The future is first polled by the driver, never by the caller.
    pub fn schedule_after<F>(&self, label: &'static str, future: F)
    where
        F: Future<Output = TurnFn> + Send + 'static,
    {
        self.state
            .lock()
            .in_flight
            .push(future.map(move |run| (label, run)).boxed());
    }

    /// Returns number of turns ready to run.
    pub fn ready_turns(&self) -> usize {
        self.state.lock().ready.len()
    }

    /// Returns number of futures still in flight.
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Checks whether there is nothing left to run or await.
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.ready.is_empty() && state.in_flight.is_empty() && !state.in_flight_taken
    }

    /// Drops every queued turn and in-flight future.
    pub fn clear(&self) {
        let (ready, in_flight) = {
            let mut state = self.state.lock();
            state.epoch += 1;
            (
                std::mem::take(&mut state.ready),
                std::mem::take(&mut state.in_flight),
            )
        };
        if !ready.is_empty() || !in_flight.is_empty() {
            tracing::debug!(
                ready = ready.len(),
                in_flight = in_flight.len(),
                "Scheduler cleared"
            );
        }
        // Dropped outside the lock; turn captures may own arbitrary state
        drop(ready);
        drop(in_flight);
    }

    /// Performs one step: runs a ready turn, or awaits one in-flight future.
    ///
    /// Returns `false` once there is nothing left to do. While another driver
    /// is awaiting the in-flight set, parks until that driver hands it back or
    /// a turn is queued.
    pub async fn advance(&self) -> bool {
        loop {
            if self.run_next_turn() {
                return true;
            }

            // Registered before inspecting state so a hand-back is not missed
            let mut wakeup = pin!(self.wakeup.notified());
            wakeup.as_mut().enable();

            if let Some(mut guard) = self.take_in_flight() {
                if let Some((label, run)) = guard.set_mut().next().await {
                    guard.complete(label, run);
                }
                return true;
            }

            let (taken, queued) = {
                let state = self.state.lock();
                (state.in_flight_taken, !state.ready.is_empty())
            };
            if queued {
                continue;
            }
            if !taken {
                return false;
            }
            wakeup.await;
        }
    }

    /// Drives until idle.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::TurnBudgetExhausted` - More than `max_turns` steps were needed
    pub async fn run_until_idle(&self) -> Result<usize, SchedulerError> {
        let mut turns = 0;
        while self.advance().await {
            turns += 1;
            if turns >= self.max_turns {
                tracing::warn!(turns, "Scheduler turn budget exhausted");
                return Err(SchedulerError::TurnBudgetExhausted { turns });
            }
        }
        Ok(turns)
    }

    /// Runs everything that can make progress without waiting.
    ///
    /// In-flight futures are polled once per pass; a future that is not
    /// ready stays in flight.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::TurnBudgetExhausted` - More than `max_turns` steps were needed
    pub fn run_pending(&self) -> Result<usize, SchedulerError> {
        let mut turns = 0;
        loop {
            while self.run_next_turn() {
                turns += 1;
                if turns >= self.max_turns {
                    tracing::warn!(turns, "Scheduler turn budget exhausted");
                    return Err(SchedulerError::TurnBudgetExhausted { turns });
                }
            }

            let Some(mut guard) = self.take_in_flight() else {
                return Ok(turns);
            };
            match guard.set_mut().next().now_or_never() {
                Some(Some((label, run))) => guard.complete(label, run),
                _ => return Ok(turns),
            }
        }
    }

    fn run_next_turn(&self) -> bool {
        let turn = self.state.lock().ready.pop_front();
        match turn {
            Some(turn) => {
                tracing::trace!(turn = turn.id, label = turn.label, "Running turn");
                (turn.run)();
                true
            }
            None => false,
        }
    }

    fn take_in_flight(&self) -> Option<InFlightGuard<'_>> {
        let mut state = self.state.lock();
        if state.in_flight_taken || state.in_flight.is_empty() {
            return None;
        }
        state.in_flight_taken = true;
        Some(InFlightGuard {
            scheduler: self,
            set: Some(std::mem::take(&mut state.in_flight)),
            epoch: state.epoch,
        })
    }
}

/// Holds the in-flight set outside the lock while it is polled.
///
/// Returning it on drop keeps the scheduler consistent even if the driving
/// future is cancelled mid-await.
struct InFlightGuard<'a> {
    scheduler: &'a Scheduler,
    set: Option<InFlight>,
    epoch: u64,
}

impl InFlightGuard<'_> {
    fn set_mut(&mut self) -> &mut InFlight {
        self.set.get_or_insert_with(FuturesUnordered::new)
    }

    fn complete(&mut self, label: &'static str, run: TurnFn) {
        let mut state = self.scheduler.state.lock();
        if state.epoch != self.epoch {
            return;
        }
        let id = state.next_turn_id;
        state.next_turn_id += 1;
        state.ready.push_back(Turn { id, label, run });
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let Some(mut set) = self.set.take() else {
            return;
        };
        let stale = {
            let mut state = self.scheduler.state.lock();
            state.in_flight_taken = false;
            if state.epoch == self.epoch {
                // Futures registered while this set was out of the lock
                set.extend(std::mem::take(&mut state.in_flight));
                state.in_flight = set;
                None
            } else {
                Some(set)
            }
        };
        self.scheduler.wakeup.notify_waiters();
        drop(stale);
    }
}
