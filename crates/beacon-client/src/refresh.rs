//! Single-flight coordination of token refreshes.
//!
//! # Design
//! - One mutex-guarded state object holds the in-flight flag and the FIFO
//!   queue of waiters; the lock is never held across an await.
//! - The first caller to observe an expired token receives a [`RefreshLease`]
//!   and performs the refresh; everyone else receives a [`PendingRefresh`]
//!   that resolves when the lease settles.
//! - Settling clears the flag and takes the queue in one critical section, so
//!   a waiter created afterwards belongs to the next refresh cycle.
//! - A lease dropped without settling (the refreshing future was cancelled)
//!   still releases its waiters, with [`ClientError::RefreshAbandoned`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::error::ClientError;

/// Result delivered to every request queued behind a refresh.
pub type RefreshOutcome = Result<(), Arc<ClientError>>;

#[derive(Debug, Default)]
struct RefreshState {
    in_flight: bool,
    waiters: VecDeque<oneshot::Sender<RefreshOutcome>>,
}

/// Coordinates refresh attempts so that at most one is in flight.
#[derive(Debug, Default, Clone)]
pub struct RefreshCoordinator {
    state: Arc<Mutex<RefreshState>>,
}

/// Role assigned to a caller that needs fresh credentials.
#[derive(Debug)]
pub enum RefreshTicket {
    /// No refresh was running; the holder must perform it and settle the lease.
    Leader(RefreshLease),
    /// A refresh is already running; wait for it to settle.
    Waiter(PendingRefresh),
}

impl RefreshCoordinator {
    /// Coordinator with no refresh in flight.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Become the refresher, or queue behind the refresh already in flight.
    #[must_use]
    pub fn acquire_or_wait(&self) -> RefreshTicket {
        let mut state = self.lock();
        if state.in_flight {
            let (sender, receiver) = oneshot::channel();
            state.waiters.push_back(sender);
            RefreshTicket::Waiter(PendingRefresh { receiver })
        } else {
            state.in_flight = true;
            RefreshTicket::Leader(RefreshLease {
                state: Arc::clone(&self.state),
                settled: false,
            })
        }
    }

    /// Whether a refresh is currently in flight.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.lock().in_flight
    }

    /// Number of requests queued behind the current refresh.
    #[must_use]
    pub fn pending_waiters(&self) -> usize {
        self.lock().waiters.len()
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive right to perform the in-flight refresh.
#[derive(Debug)]
#[must_use = "an unsettled lease releases its waiters with an abandoned-refresh error"]
pub struct RefreshLease {
    state: Arc<Mutex<RefreshState>>,
    settled: bool,
}

impl RefreshLease {
    /// Publish the refresh outcome to every waiter, in enqueue order.
    ///
    /// Returns the number of waiters released.
    pub fn settle(mut self, outcome: RefreshOutcome) -> usize {
        self.settled = true;
        drain(&self.state, &outcome)
    }
}

impl Drop for RefreshLease {
    fn drop(&mut self) {
        if !self.settled {
            drain(&self.state, &Err(Arc::new(ClientError::RefreshAbandoned)));
        }
    }
}

fn drain(state: &Mutex<RefreshState>, outcome: &RefreshOutcome) -> usize {
    let waiters = {
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        state.in_flight = false;
        std::mem::take(&mut state.waiters)
    };
    let released = waiters.len();
    for waiter in waiters {
        // A waiter whose request future was dropped has nothing left to replay.
        let _ = waiter.send(outcome.clone());
    }
    released
}

/// Handle held by a request queued behind the in-flight refresh.
#[derive(Debug)]
pub struct PendingRefresh {
    receiver: oneshot::Receiver<RefreshOutcome>,
}

impl PendingRefresh {
    /// Wait for the in-flight refresh to settle.
    pub async fn wait(self) -> RefreshOutcome {
        self.receiver
            .await
            .unwrap_or_else(|_| Err(Arc::new(ClientError::RefreshAbandoned)))
    }
}
