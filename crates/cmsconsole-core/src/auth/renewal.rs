//! Bookkeeping for single-flight token renewal.
//!
//! At most one renewal exchange is in flight. The caller that starts it is the
//! owner; everyone who arrives while it runs becomes a waiter and is parked on
//! a oneshot channel. The owner settles every waiter, in arrival order, with
//! the one outcome of its exchange.
//!
//! Nothing here awaits. `SessionClient` drives it from inside its state lock,
//! which keeps enqueueing, draining and flag flips atomic.

use std::collections::VecDeque;

use tokio::sync::oneshot;

use super::token::AccessToken;

/// Outcome handed to every waiter. The error side is the failure reason.
pub(crate) type RenewalOutcome = Result<AccessToken, String>;

struct PendingWaiter {
    ticket: u64,
    tx: oneshot::Sender<RenewalOutcome>,
}

struct Flight {
    epoch: u64,
    waiters: VecDeque<PendingWaiter>,
}

pub(crate) enum Role {
    /// Start the exchange, then call `settle`.
    Owner { epoch: u64 },
    /// Await the owner's outcome.
    Waiter {
        ticket: u64,
        rx: oneshot::Receiver<RenewalOutcome>,
    },
}

#[derive(Default)]
pub(crate) struct RenewalState {
    flight: Option<Flight>,
    next_ticket: u64,
}

impl RenewalState {
    pub fn is_renewing(&self) -> bool {
        self.flight.is_some()
    }

    pub fn queued(&self) -> usize {
        self.flight.as_ref().map_or(0, |f| f.waiters.len())
    }

    /// Epoch the in-flight renewal was started under.
    pub fn flight_epoch(&self) -> Option<u64> {
        self.flight.as_ref().map(|f| f.epoch)
    }

    /// Become the owner of a new renewal, or queue behind the current one.
    pub fn join(&mut self, epoch: u64) -> Role {
        match self.flight.as_mut() {
            Some(flight) => {
                self.next_ticket += 1;
                let ticket = self.next_ticket;
                let (tx, rx) = oneshot::channel();
                flight.waiters.push_back(PendingWaiter { ticket, tx });
                Role::Waiter { ticket, rx }
            }
            None => {
                self.flight = Some(Flight {
                    epoch,
                    waiters: VecDeque::new(),
                });
                Role::Owner { epoch }
            }
        }
    }

    /// End the in-flight renewal and hand `outcome` to every waiter, oldest
    /// first. Returns the settled tickets in the order they were settled.
    pub fn settle(&mut self, outcome: &RenewalOutcome) -> Vec<u64> {
        let Some(flight) = self.flight.take() else {
            return Vec::new();
        };
        let mut settled = Vec::with_capacity(flight.waiters.len());
        for waiter in flight.waiters {
            settled.push(waiter.ticket);
            // A dropped receiver means that caller went away; nothing to do
            let _ = waiter.tx.send(outcome.clone());
        }
        settled
    }
}
